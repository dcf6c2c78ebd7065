/*!
 * Ontario Lab Pattern Module
 *
 * DESIGN DECISION: A lab-dialect layer composed on top of the core normalizer
 * WHY: Truncation codes like "TCE" are regional reporting habits, not
 * chemical identity; baking them into the core pipeline would leak one
 * jurisdiction's dialect into every stored key
 *
 * REASONING CHAIN:
 * 1. Locant-run spacing is fixed on the raw text ("1, 2, 3-" to "1,2,3-")
 * 2. The core normalizer runs unchanged
 * 3. Notation shorthands (diss/tot/rec, "F 2") and then known truncations
 *    (TCE, PCE, PHC F1-F4, Cr(VI)) expand on the normalized form
 * 4. Callers apply this only before storage-key lookups for messy inputs
 */

use crate::normalize::Normalizer;
use regex::Regex;

/// Expansion layer for Ontario lab notation.
///
/// [`OntarioLayer::apply`] fixes locant spacing in the raw text, runs the
/// core normalizer, then expands notation variants and known truncations on
/// the normalized form.
#[derive(Debug)]
pub struct OntarioLayer {
    normalizer: Normalizer,
    notation: Vec<(Regex, &'static str)>,
    truncations: Vec<(Regex, &'static str)>,
}

// Truncation patterns match the normalized form (lowercase, single spaces).
const TRUNCATIONS: [(&str, &str); 17] = [
    (r"\b1 4 diox\b", "1 4 dioxane"),
    (r"\bdiox\b", "dioxane"),
    (r"\b1 1 1 tca\b", "1 1 1 trichloroethane"),
    (r"\btca\b", "trichloroethane"),
    (r"\btce\b", "trichloroethylene"),
    (r"\bpce\b", "tetrachloroethylene"),
    (r"\bdce\b", "dichloroethylene"),
    (r"\bdca\b", "dichloroethane"),
    (r"\bphc f([1-4])\b", "petroleum hydrocarbons f${1}"),
    (r"\bhexavalent cr\b", "chromium hexavalent"),
    (r"\bcr vi\b", "chromium hexavalent"),
    (r"\bcr6\+", "chromium hexavalent"),
    (r"\bpah\b", "polyaromatic hydrocarbon"),
    (r"\bnaph\b", "naphthalene"),
    (r"\bbtex\b", "benzene toluene ethylbenzene xylene"),
    (r"\btotal p\b", "phosphorus total"),
    (r"\btkn\b", "nitrogen total kjeldahl"),
];

const NOTATION: [(&str, &str); 5] = [
    (r"\bf ([1-4])\b", "f${1}"),
    (r"\bdiss\b", "dissolved"),
    (r"\btot\b", "total"),
    (r"\brec\b", "recoverable"),
    (r"\btn\b", "nitrogen total"),
];

impl OntarioLayer {
    pub fn new() -> Self {
        Self {
            normalizer: Normalizer::new(),
            notation: NOTATION
                .iter()
                .map(|(p, r)| (Regex::new(p).unwrap(), *r))
                .collect(),
            truncations: TRUNCATIONS
                .iter()
                .map(|(p, r)| (Regex::new(p).unwrap(), *r))
                .collect(),
        }
    }

    /// Full Ontario expansion: locant fixes, core normalization, notation
    /// variants, truncation expansion.
    ///
    /// # Examples
    ///
    /// ```
    /// use analyte_resolve::OntarioLayer;
    ///
    /// let layer = OntarioLayer::new();
    /// assert_eq!(layer.apply("TCE"), "trichloroethylene");
    /// assert_eq!(layer.apply("1,4 Diox"), "1 4 dioxane");
    /// assert_eq!(layer.apply("PHC F2"), "petroleum hydrocarbons f2");
    /// ```
    pub fn apply(&self, text: &str) -> String {
        let fixed = self.fix_locant_spacing(text);
        let mut result = self.normalizer.normalize(&fixed);
        for (pattern, replacement) in &self.notation {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        for (pattern, replacement) in &self.truncations {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        result.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Collapse spaced locant runs in raw text: "1, 2, 3-TCP" becomes
    /// "1,2,3-TCP". A digit shared by two runs ("1, 2, 3") must serve as
    /// both a right and a left neighbor, so this is a scanner rather than
    /// a regex replacement.
    pub fn fix_locant_spacing(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < chars.len() {
            out.push(chars[i]);
            if chars[i].is_ascii_digit() {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ',' {
                    let mut k = j + 1;
                    while k < chars.len() && chars[k].is_whitespace() {
                        k += 1;
                    }
                    if k < chars.len() && chars[k].is_ascii_digit() {
                        out.push(',');
                        i = k;
                        continue;
                    }
                }
            }
            i += 1;
        }
        out
    }

    /// Expand laboratory truncation codes to full names: "TCA" becomes
    /// "trichloroethane". Runs the core normalizer and the truncation map
    /// only, without the notation-variant pass.
    pub fn expand_abbreviation(&self, text: &str) -> String {
        let mut result = self.normalizer.normalize(text);
        for (pattern, replacement) in &self.truncations {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        result.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// True when the normalized text still contains a known truncation.
    pub fn detect_truncated_name(&self, text: &str) -> bool {
        let normalized = self.normalizer.normalize(text);
        self.truncations.iter().any(|(p, _)| p.is_match(&normalized))
    }
}

impl Default for OntarioLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncations_expand() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.apply("TCE"), "trichloroethylene");
        assert_eq!(layer.apply("PCE"), "tetrachloroethylene");
        assert_eq!(layer.apply("1,4 Diox"), "1 4 dioxane");
        assert_eq!(layer.apply("1, 1, 1-TCA"), "1 1 1 trichloroethane");
    }

    #[test]
    fn petroleum_fractions() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.apply("PHC F2"), "petroleum hydrocarbons f2");
        assert_eq!(layer.apply("PHC F 4"), "petroleum hydrocarbons f4");
    }

    #[test]
    fn metals_and_parameters() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.apply("Hexavalent Cr"), "chromium hexavalent");
        assert_eq!(layer.apply("Cr(VI)"), "chromium hexavalent");
        assert_eq!(layer.apply("Total P"), "phosphorus total");
        assert_eq!(layer.apply("TKN"), "nitrogen total kjeldahl");
    }

    #[test]
    fn locant_spacing_fix() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.fix_locant_spacing("1, 2, 3-TCP"), "1,2,3-TCP");
        assert_eq!(layer.fix_locant_spacing("2, 4-D"), "2,4-D");
        assert_eq!(layer.fix_locant_spacing("Benzene"), "Benzene");
    }

    #[test]
    fn abbreviation_expansion() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.expand_abbreviation("TCA"), "trichloroethane");
        assert_eq!(layer.expand_abbreviation("TCE"), "trichloroethylene");
        assert_eq!(layer.expand_abbreviation("1,4 Diox"), "1 4 dioxane");
        // Names without a known truncation pass through normalized.
        assert_eq!(layer.expand_abbreviation("Benzene"), "benzene");
    }

    #[test]
    fn detection() {
        let layer = OntarioLayer::new();
        assert!(layer.detect_truncated_name("1,4 Diox"));
        assert!(layer.detect_truncated_name("TCE"));
        assert!(!layer.detect_truncated_name("Benzene"));
    }

    #[test]
    fn plain_names_pass_through() {
        let layer = OntarioLayer::new();
        assert_eq!(layer.apply("Benzene"), "benzene");
    }
}
