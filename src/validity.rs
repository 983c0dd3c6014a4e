//! Semantics of the per-reading `Valid` flag.

/// Maps the recorder's textual Yes/No code to 1/0. Anything else is invalid.
pub fn normalize_validity(raw: Option<&str>) -> u8 {
    match raw.map(str::trim) {
        Some("Y") => 1,
        Some("N") => 0,
        _ => 0,
    }
}

/// Value to feed into an average: the reading itself when valid, NaN otherwise.
pub fn mask_invalid(value: f64, valid: u8) -> f64 {
    if valid == 1 {
        value
    } else {
        f64::NAN
    }
}

/// Validity of a bin built from `count` samples, `valid_count` of which were valid.
///
/// Partial validity is full invalidity.
pub fn clamp_bin_validity(valid_count: u32, count: u32) -> u8 {
    if count > 0 && valid_count == count {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_codes() {
        assert_eq!(normalize_validity(Some("Y")), 1);
        assert_eq!(normalize_validity(Some(" Y ")), 1);
        assert_eq!(normalize_validity(Some("N")), 0);
        assert_eq!(normalize_validity(Some("y")), 0);
        assert_eq!(normalize_validity(Some("yes")), 0);
        assert_eq!(normalize_validity(Some("")), 0);
        assert_eq!(normalize_validity(None), 0);
    }

    #[test]
    fn masking() {
        assert_eq!(mask_invalid(3.5, 1), 3.5);
        assert!(mask_invalid(3.5, 0).is_nan());
    }

    #[test]
    fn partial_validity_invalidates() {
        assert_eq!(clamp_bin_validity(12, 12), 1);
        assert_eq!(clamp_bin_validity(11, 12), 0);
        assert_eq!(clamp_bin_validity(0, 12), 0);
        assert_eq!(clamp_bin_validity(0, 0), 0);
    }
}
