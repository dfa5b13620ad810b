//! Fixed-precision number formatting for display.

/// Rendered in place of a value that could not be computed.
pub const NO_DATA: &str = "no data";

/// Hours with one decimal and trailing zeros stripped: `12.5`, `40`.
pub fn hours(value: f64) -> String {
    strip_insignificant_zeros(&fixed(value, 1))
}

/// Percent with one decimal: `50.0%`.
pub fn percent(value: f64) -> String {
    format!("{}%", fixed(value, 1))
}

/// Ratio with two decimals: `0.80`.
pub fn ratio(value: f64) -> String {
    fixed(value, 2)
}

pub fn opt_hours(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map_or_else(|| NO_DATA.to_string(), hours)
}

pub fn opt_percent(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map_or_else(|| NO_DATA.to_string(), percent)
}

pub fn opt_ratio(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map_or_else(|| NO_DATA.to_string(), ratio)
}

/// `format!` with a fixed precision, never producing `-0.0`, `NaN` or `inf`.
fn fixed(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return NO_DATA.to_string();
    }
    let s = format!("{value:.precision$}");
    match s.strip_prefix('-') {
        Some(rest) if rest.chars().all(|c| c == '0' || c == '.') => rest.to_string(),
        _ => s,
    }
}

/// Drop trailing fractional zeros and a dangling decimal point.
pub fn strip_insignificant_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hours() {
        assert_eq!(hours(12.5), "12.5");
        assert_eq!(hours(40.0), "40");
        assert_eq!(hours(0.0), "0");
        assert_eq!(hours(33.333333), "33.3");
        assert_eq!(hours(99.96), "100");
        assert_eq!(hours(-30.0), "-30");
    }

    #[test]
    fn test_percent_and_ratio() {
        assert_eq!(percent(50.0), "50.0%");
        assert_eq!(percent(133.3333), "133.3%");
        assert_eq!(ratio(0.8), "0.80");
        assert_eq!(ratio(1.0 / 3.0), "0.33");
    }

    #[test]
    fn test_negative_zero_is_not_rendered() {
        assert_eq!(hours(-0.0), "0");
        assert_eq!(hours(-0.04), "0");
        assert_eq!(percent(-0.01), "0.0%");
        assert_eq!(ratio(-0.001), "0.00");
    }

    #[test]
    fn test_absent_and_non_finite() {
        assert_eq!(opt_hours(None), NO_DATA);
        assert_eq!(opt_percent(Some(f64::NAN)), NO_DATA);
        assert_eq!(opt_ratio(Some(f64::INFINITY)), NO_DATA);
        assert_eq!(opt_ratio(Some(1.25)), "1.25");
    }

    #[test]
    fn test_strip_insignificant_zeros() {
        assert_eq!(strip_insignificant_zeros("120.50"), "120.5");
        assert_eq!(strip_insignificant_zeros("120.00"), "120");
        assert_eq!(strip_insignificant_zeros("100"), "100");
    }
}
