//! Font discovery for text documents.

use std::path::Path;

use anyhow::Context;

/// Read the configured font, or the first system font that exists.
pub fn load_font_data(configured: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    if let Some(path) = configured {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        tracing::info!(path = %path.display(), "Using configured font");
        return Ok(data);
    }
    load_system_font_data()
}

fn load_system_font_data() -> anyhow::Result<Vec<u8>> {
    for path in system_font_candidates() {
        if let Ok(data) = std::fs::read(path) {
            tracing::info!(path = %path, "Using system font");
            return Ok(data);
        }
    }
    anyhow::bail!("no usable font found (set FONT_PATH or install system fonts)")
}

fn system_font_candidates() -> &'static [&'static str] {
    #[cfg(target_os = "macos")]
    {
        &[
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
            "/System/Library/Fonts/Helvetica.ttc",
        ]
    }
    #[cfg(target_os = "windows")]
    {
        &["C:\\Windows\\Fonts\\arial.ttf", "C:\\Windows\\Fonts\\msgothic.ttc"]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configured_font_is_an_error() {
        let err = load_font_data(Some(Path::new("/nonexistent/font.ttf"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/font.ttf"));
    }
}
