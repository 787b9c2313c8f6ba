//! All setting definitions with their default values.

use std::collections::HashMap;
use std::sync::LazyLock;

type DefTuple = (&'static str, &'static str, &'static str);

const DEFS: &[DefTuple] = &[
    ("PAPER_WIDTH", "384", "Printer head width in dots (multiple of 8)"),
    (
        "THROTTLE_INTERVAL_MS",
        "100",
        "Minimum gap between the end of one conversion and the start of the next",
    ),
    (
        "RETRY_DELAY_MS",
        "250",
        "Delay before retrying a conversion that failed in a filter capability",
    ),
    ("FONT_PATH", "", "TrueType/OpenType font used for text documents"),
    ("LOG_FILTER", "info", "Tracing filter used when RUST_LOG is unset"),
];

/// A single setting definition.
#[derive(Debug, Clone)]
pub struct SettingDef {
    pub key: &'static str,
    pub default: &'static str,
    pub description: &'static str,
}

/// Global setting definitions indexed by key.
pub static DEFAULT_SETTINGS: LazyLock<HashMap<&'static str, SettingDef>> = LazyLock::new(|| {
    DEFS.iter()
        .map(|&(key, default, description)| {
            (
                key,
                SettingDef {
                    key,
                    default,
                    description,
                },
            )
        })
        .collect()
});

/// Get the default value for a setting key, or `None` if not defined.
pub fn get_default(key: &str) -> Option<&'static str> {
    DEFAULT_SETTINGS.get(key).map(|d| d.default)
}

/// Setting keys in declaration order.
pub fn keys() -> impl Iterator<Item = &'static str> {
    DEFS.iter().map(|&(key, _, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_default_passes_validation() {
        for key in keys() {
            let default = get_default(key).unwrap();
            assert!(
                crate::config::validation::validate_setting(key, default).is_ok(),
                "default for {key} is invalid"
            );
        }
    }

    #[test]
    fn test_unknown_key_has_no_default() {
        assert_eq!(get_default("PAPER_WIDTH"), Some("384"));
        assert_eq!(get_default("NO_SUCH_SETTING"), None);
    }
}
