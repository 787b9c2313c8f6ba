//! Setting value validation.

/// Validate a setting value. Returns `Ok(())` if valid, or an error message.
pub fn validate_setting(key: &str, value: &str) -> Result<(), String> {
    match key {
        "PAPER_WIDTH" => {
            let v = validate_int_range(value, 8, 4096)?;
            if v % 8 != 0 {
                return Err("must be a multiple of 8".into());
            }
        }
        "THROTTLE_INTERVAL_MS" | "RETRY_DELAY_MS" => {
            validate_int_range(value, 0, 10_000)?;
        }
        "LOG_FILTER" => {
            if value.trim().is_empty() {
                return Err("must not be empty".into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_int_range(value: &str, min: u32, max: u32) -> Result<u32, String> {
    let v: u32 = value.trim().parse().map_err(|_| "must be an integer")?;
    if v < min || v > max {
        return Err(format!("must be between {min} and {max}"));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_width_multiple_of_eight() {
        assert!(validate_setting("PAPER_WIDTH", "384").is_ok());
        assert!(validate_setting("PAPER_WIDTH", "576").is_ok());
        assert_eq!(
            validate_setting("PAPER_WIDTH", "383"),
            Err("must be a multiple of 8".into())
        );
        assert!(validate_setting("PAPER_WIDTH", "0").is_err());
        assert!(validate_setting("PAPER_WIDTH", "wide").is_err());
    }

    #[test]
    fn test_interval_ranges() {
        assert!(validate_setting("THROTTLE_INTERVAL_MS", "0").is_ok());
        assert!(validate_setting("THROTTLE_INTERVAL_MS", "100").is_ok());
        assert!(validate_setting("RETRY_DELAY_MS", "10001").is_err());
        assert!(validate_setting("RETRY_DELAY_MS", "-1").is_err());
    }

    #[test]
    fn test_log_filter_and_free_form_keys() {
        assert!(validate_setting("LOG_FILTER", "debug,image_processor=trace").is_ok());
        assert!(validate_setting("LOG_FILTER", "  ").is_err());
        assert!(validate_setting("FONT_PATH", "").is_ok());
    }
}
