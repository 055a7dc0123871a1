//! Deadband test applied before a new value reaches a result cell.

use pvcalc_protocol::PvValue;

/// Decide whether `candidate` differs enough from `previous` to be published.
///
/// When both values are numeric the change must exceed `mdel`. Any
/// non-numeric side (text states, the `#N/A` sentinel) always emits, even if
/// the text is unchanged.
pub fn should_emit(previous: &PvValue, candidate: &PvValue, mdel: f64) -> bool {
    match (previous.as_f64(), candidate.as_f64()) {
        (Some(p), Some(c)) => (p - c).abs() > mdel,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_numeric_deadband() {
        let one = PvValue::Number(1.0);
        assert!(!should_emit(&one, &PvValue::Number(1.3), 0.5));
        assert!(should_emit(&PvValue::Number(1.3), &PvValue::Number(2.0), 0.5));
        // Exactly at the deadband is not significant.
        assert!(!should_emit(&one, &PvValue::Number(1.5), 0.5));
        // Zero deadband publishes any change, but not a repeat.
        assert!(should_emit(&one, &PvValue::Number(1.000001), 0.0));
        assert!(!should_emit(&one, &one, 0.0));
    }

    #[test]
    fn test_numeric_text_uses_deadband() {
        assert!(!should_emit(&PvValue::from("1.0"), &PvValue::Number(1.2), 0.5));
        assert!(should_emit(&PvValue::from("1.0"), &PvValue::from("3"), 0.5));
    }

    #[test]
    fn test_non_numeric_always_emits() {
        assert!(should_emit(&PvValue::from("OPEN"), &PvValue::from("OPEN"), 5.0));
        assert!(should_emit(&PvValue::NotAvailable, &PvValue::Number(1.0), 100.0));
        assert!(should_emit(&PvValue::Number(1.0), &PvValue::from("FAULT"), 0.0));
    }

    proptest! {
        #[test]
        fn prop_numeric_pairs_follow_abs_difference(
            p in -1.0e6f64..1.0e6,
            c in -1.0e6f64..1.0e6,
            d in 0.0f64..1.0e3,
        ) {
            let emitted = should_emit(&PvValue::Number(p), &PvValue::Number(c), d);
            prop_assert_eq!(emitted, (p - c).abs() > d);
        }

        #[test]
        fn prop_alphabetic_text_always_emits(s in "[A-Z]{1,8}", d in 0.0f64..1.0e3) {
            // Guard against words that parse as floats ("INF", "NAN", ...).
            prop_assume!(s.parse::<f64>().is_err());
            let v = PvValue::Text(s);
            prop_assert!(should_emit(&v, &v, d));
        }
    }
}
