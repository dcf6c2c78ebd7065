/*!
 * CAS Registry Number Module
 *
 * DESIGN DECISION: Regex detection plus check-digit validation, nothing looser
 * WHY: Lab text is full of digit runs that look like registry numbers; the
 * check digit rejects them before they reach the corpus lookup
 *
 * FORMAT: 2-7 digits, hyphen, 2 digits, hyphen, 1 check digit
 * (for example `71-43-2` for benzene). The check digit is the weighted
 * digit sum mod 10, weighting digits 1, 2, 3, ... from the right and
 * excluding the check digit itself.
 */

use regex::Regex;

/// Extracts and validates CAS Registry Numbers from free text.
#[derive(Debug)]
pub struct CasExtractor {
    pattern: Regex,
    anchored: Regex,
}

impl CasExtractor {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"\b(\d{2,7}-\d{2}-\d)\b").unwrap(),
            anchored: Regex::new(r"^\d{2,7}-\d{2}-\d$").unwrap(),
        }
    }

    /// First valid CAS number found in the text, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use analyte_resolve::CasExtractor;
    ///
    /// let cas = CasExtractor::new();
    /// assert_eq!(cas.extract_cas("Benzene (CAS: 71-43-2)").as_deref(), Some("71-43-2"));
    /// assert_eq!(cas.extract_cas("No CAS here"), None);
    /// ```
    pub fn extract_cas(&self, text: &str) -> Option<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|candidate| self.validate_cas(candidate))
            .map(str::to_string)
    }

    /// All valid CAS numbers found in the text, in order of appearance.
    pub fn extract_all_cas(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|candidate| self.validate_cas(candidate))
            .map(str::to_string)
            .collect()
    }

    /// Check-digit validation. Accepts only the hyphenated form.
    pub fn validate_cas(&self, cas: &str) -> bool {
        if !self.anchored.is_match(cas) {
            return false;
        }
        let digits: Vec<u32> = cas.chars().filter_map(|c| c.to_digit(10)).collect();
        if digits.len() < 5 {
            return false;
        }
        let check_digit = *digits.last().expect("length checked above");
        let total: u32 = digits[..digits.len() - 1]
            .iter()
            .rev()
            .enumerate()
            .map(|(i, d)| (i as u32 + 1) * d)
            .sum();
        total % 10 == check_digit
    }

    /// Re-hyphenate a digit string into standard CAS form, returning `None`
    /// when the result fails check-digit validation.
    ///
    /// # Examples
    ///
    /// ```
    /// use analyte_resolve::CasExtractor;
    ///
    /// let cas = CasExtractor::new();
    /// assert_eq!(cas.format_cas("71432").as_deref(), Some("71-43-2"));
    /// assert_eq!(cas.format_cas("71-43-2").as_deref(), Some("71-43-2"));
    /// assert_eq!(cas.format_cas("71433"), None);
    /// ```
    pub fn format_cas(&self, cas: &str) -> Option<String> {
        let digits: String = cas.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() < 5 || cas.chars().any(|c| !c.is_ascii_digit() && c != '-') {
            return None;
        }
        let (body, tail) = digits.split_at(digits.len() - 3);
        let (middle, check) = tail.split_at(2);
        let formatted = format!("{body}-{middle}-{check}");
        self.validate_cas(&formatted).then_some(formatted)
    }

    /// Shape check without check-digit validation.
    pub fn is_cas_format(&self, text: &str) -> bool {
        self.anchored.is_match(text.trim())
    }
}

impl Default for CasExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_cas_numbers_validate() {
        let cas = CasExtractor::new();
        // Benzene, toluene, trichloroethylene, water.
        for valid in ["71-43-2", "108-88-3", "79-01-6", "7732-18-5"] {
            assert!(cas.validate_cas(valid), "{valid} should validate");
        }
    }

    #[test]
    fn wrong_check_digit_rejected() {
        let cas = CasExtractor::new();
        assert!(!cas.validate_cas("71-43-3"));
        assert!(!cas.validate_cas("108-88-4"));
    }

    #[test]
    fn malformed_strings_rejected() {
        let cas = CasExtractor::new();
        assert!(!cas.validate_cas(""));
        assert!(!cas.validate_cas("71432"));
        assert!(!cas.validate_cas("7-43-2"));
        assert!(!cas.validate_cas("71-43-25"));
        assert!(!cas.validate_cas("benzene"));
    }

    #[test]
    fn extraction_from_context() {
        let cas = CasExtractor::new();
        assert_eq!(cas.extract_cas("Toluene 108-88-3").as_deref(), Some("108-88-3"));
        // Invalid check digit is skipped, the later valid one wins.
        assert_eq!(
            cas.extract_cas("bad 71-43-3 good 71-43-2").as_deref(),
            Some("71-43-2")
        );
        assert_eq!(
            cas.extract_all_cas("71-43-2 and 108-88-3"),
            vec!["71-43-2".to_string(), "108-88-3".to_string()]
        );
    }

    #[test]
    fn formatting() {
        let cas = CasExtractor::new();
        assert_eq!(cas.format_cas("108883").as_deref(), Some("108-88-3"));
        assert_eq!(cas.format_cas("12"), None);
        assert_eq!(cas.format_cas("71-43x2"), None);
    }

    #[test]
    fn shape_check() {
        let cas = CasExtractor::new();
        assert!(cas.is_cas_format(" 71-43-2 "));
        assert!(cas.is_cas_format("71-43-3")); // shape only, not validity
        assert!(!cas.is_cas_format("71-432"));
    }
}
