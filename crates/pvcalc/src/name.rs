//! PV name validation.

use lazy_regex::regex_is_match;

/// Longest accepted PV name, in characters.
pub const MAX_PV_NAME_LEN: usize = 40;

/// Test if `name` is a valid PV name.
///
/// A valid name is 1 to 40 characters drawn from `A-Z a-z 0-9 { } . : _ -`.
/// The whole string must match; a trailing newline is rejected.
pub fn is_valid_pv(name: &str) -> bool {
    regex_is_match!(r"\A[A-Za-z0-9{}.:_\-]{1,40}\z", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_typical_names() {
        assert!(is_valid_pv("PHY:TEST"));
        assert!(is_valid_pv("FE_ISRC2:BEAM:A_BOOK"));
        assert!(is_valid_pv("x"));
        assert!(is_valid_pv("SYS{Dev-01}.VAL"));
        assert!(is_valid_pv(&"A".repeat(MAX_PV_NAME_LEN)));
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!(!is_valid_pv(""));
        assert!(!is_valid_pv("bad name!"));
        assert!(!is_valid_pv("PHY:TEST\n"));
        assert!(!is_valid_pv("PHY/TEST"));
        assert!(!is_valid_pv("PHY:TÉST"));
        assert!(!is_valid_pv(&"A".repeat(MAX_PV_NAME_LEN + 1)));
    }

    proptest! {
        #[test]
        fn prop_alphabet_names_within_limit_are_valid(name in "[A-Za-z0-9{}.:_-]{1,40}") {
            prop_assert!(is_valid_pv(&name));
        }

        #[test]
        fn prop_overlong_names_are_invalid(name in "[A-Za-z0-9{}.:_-]{41,80}") {
            prop_assert!(!is_valid_pv(&name));
        }

        #[test]
        fn prop_foreign_character_is_invalid(
            head in "[A-Za-z0-9:]{0,15}",
            bad in "[ !#$%&*+/;<=>?@\\[\\]^|~,'\"]",
            tail in "[A-Za-z0-9:]{0,15}",
        ) {
            let name = format!("{head}{bad}{tail}");
            prop_assert!(!is_valid_pv(&name));
        }
    }
}
