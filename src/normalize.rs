/*!
 * Text Normalization Module
 *
 * DESIGN DECISION: One versioned, total, idempotent pipeline in fixed order
 * WHY: Normalized text is the storage key for every synonym and vendor
 * observation; two spellings of the same name must collapse to one key,
 * and re-normalizing stored keys must be a no-op
 *
 * REASONING CHAIN:
 * 1. Order: NFKC, whitespace collapse, punctuation standardization,
 *    abbreviation expansion, Greek-letter name to symbol, stereochemistry
 *    descriptor spacing, multiplicity prefix joining, trailing-period trim,
 *    case fold, final collapse
 * 2. Expansion stages run to a fixpoint so no expandable token survives,
 *    which is what makes the whole pipeline idempotent
 * 3. Every stored normalized form carries NORMALIZATION_VERSION; bumping it
 *    leaves rows valid but eligible for offline re-normalization
 *
 * RELATED: ontario.rs (lab-specific layer composed on top, never inside)
 */

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Version of the normalization rules. Increment when any rule changes and
/// re-normalize stored rows offline.
pub const NORMALIZATION_VERSION: i64 = 1;

/// Normalizes chemical names to a standard form for matching.
///
/// Handles notation variants commonly seen in laboratory data: bracket and
/// dash styles, positional-isomer shorthands (o-/m-/p-), structural prefixes
/// (tert-, sec-, n-), spelled-out Greek letters, stereochemistry signs, and
/// hyphenated multiplicity prefixes.
#[derive(Debug)]
pub struct Normalizer {
    whitespace: Regex,
    brackets: Regex,
    commas: Regex,
    dashes: Regex,
    quotes: Regex,
    colons: Regex,
    tert: Regex,
    sec: Regex,
    ortho_short: Regex,
    meta_short: Regex,
    para_short: Regex,
    normal_short: Regex,
    greek: Vec<(Regex, &'static str)>,
    stereo_sign: Regex,
    multiplicity: Regex,
}

const GREEK_LETTERS: [(&str, &str); 24] = [
    ("alpha", "α"),
    ("beta", "β"),
    ("gamma", "γ"),
    ("delta", "δ"),
    ("epsilon", "ε"),
    ("zeta", "ζ"),
    ("eta", "η"),
    ("theta", "θ"),
    ("iota", "ι"),
    ("kappa", "κ"),
    ("lambda", "λ"),
    ("mu", "μ"),
    ("nu", "ν"),
    ("xi", "ξ"),
    ("omicron", "ο"),
    ("pi", "π"),
    ("rho", "ρ"),
    ("sigma", "σ"),
    ("tau", "τ"),
    ("upsilon", "υ"),
    ("phi", "φ"),
    ("chi", "χ"),
    ("psi", "ψ"),
    ("omega", "ω"),
];

impl Normalizer {
    pub fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").unwrap(),
            brackets: Regex::new(r"[(){}\[\]]").unwrap(),
            commas: Regex::new(r",").unwrap(),
            // ASCII hyphen, the Unicode dash block, and the minus sign.
            dashes: Regex::new(r"[-\u{2010}-\u{2015}\u{2212}]").unwrap(),
            quotes: Regex::new(r#"['"\u{2018}\u{2019}\u{201C}\u{201D}]"#).unwrap(),
            colons: Regex::new(r"[;:]").unwrap(),
            tert: Regex::new(r"(?i)\btert\b").unwrap(),
            sec: Regex::new(r"(?i)\bsec\b").unwrap(),
            ortho_short: Regex::new(r"(?i)\bo\s+([a-zA-Z])").unwrap(),
            meta_short: Regex::new(r"(?i)\bm\s+([a-zA-Z])").unwrap(),
            para_short: Regex::new(r"(?i)\bp\s+([a-zA-Z])").unwrap(),
            normal_short: Regex::new(r"(?i)\bn\s+([a-zA-Z])").unwrap(),
            greek: GREEK_LETTERS
                .iter()
                .map(|(word, symbol)| {
                    (Regex::new(&format!(r"(?i)\b{word}\b")).unwrap(), *symbol)
                })
                .collect(),
            stereo_sign: Regex::new(r"([+\u{00B1}])([a-zA-Z])").unwrap(),
            multiplicity: Regex::new(
                r"(?i)\b(mono|di|tri|tetra|penta|hexa|hepta|octa|nona|deca|poly)\s+([a-zA-Z])",
            )
            .unwrap(),
        }
    }

    /// Apply the complete normalization pipeline.
    ///
    /// # Examples
    ///
    /// ```
    /// use analyte_resolve::Normalizer;
    ///
    /// let n = Normalizer::new();
    /// assert_eq!(n.normalize("Benzo(a)pyrene"), "benzo a pyrene");
    /// assert_eq!(n.normalize("1,4-Dioxane"), "1 4 dioxane");
    /// assert_eq!(n.normalize("tert-Butanol"), "tertiary butanol");
    /// ```
    pub fn normalize(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }

        let text: String = text.nfkc().collect();
        let text = self.collapse_whitespace(&text);
        let text = self.standardize_punctuation(&text);
        let text = self.expand_abbreviations(&text);
        let text = self.normalize_greek(&text);
        let text = self.space_stereo_signs(&text);
        let text = self.join_multiplicity_prefixes(&text);
        let text = text.trim_end().trim_end_matches('.').to_string();
        let text = text.to_lowercase();
        self.collapse_whitespace(&text).trim().to_string()
    }

    fn collapse_whitespace(&self, text: &str) -> String {
        self.whitespace.replace_all(text, " ").into_owned()
    }

    fn standardize_punctuation(&self, text: &str) -> String {
        let text = self.brackets.replace_all(text, " ");
        let text = self.commas.replace_all(&text, " ");
        let text = self.dashes.replace_all(&text, " ");
        let text = self.quotes.replace_all(&text, " ");
        let text = self.colons.replace_all(&text, " ");
        self.collapse_whitespace(&text)
    }

    /// Closed abbreviation map: tert/sec words plus the hyphenated o-/m-/p-/n-
    /// shorthands, which arrive here as single-letter tokens after the dash
    /// family became spaces. Runs to a fixpoint so the output contains no
    /// remaining expandable token, which keeps the pipeline idempotent.
    fn expand_abbreviations(&self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            let mut next = self.tert.replace_all(&current, "tertiary").into_owned();
            next = self.sec.replace_all(&next, "secondary").into_owned();
            next = self.ortho_short.replace_all(&next, "ortho ${1}").into_owned();
            next = self.meta_short.replace_all(&next, "meta ${1}").into_owned();
            next = self.para_short.replace_all(&next, "para ${1}").into_owned();
            next = self.normal_short.replace_all(&next, "normal ${1}").into_owned();
            if next == current {
                return next;
            }
            current = next;
        }
    }

    fn normalize_greek(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (pattern, symbol) in &self.greek {
            result = pattern.replace_all(&result, *symbol).into_owned();
        }
        result
    }

    /// Optical-rotation descriptors keep a space before the name body:
    /// `+Camphor` becomes `+ Camphor`. Parenthesized descriptors were already
    /// separated when the brackets became spaces.
    fn space_stereo_signs(&self, text: &str) -> String {
        self.stereo_sign.replace_all(text, "${1} ${2}").into_owned()
    }

    /// Multiplicity prefixes that were hyphen-attached (`Tri-chloroethylene`)
    /// arrive as separate tokens; join them back to their stem so hyphenated
    /// and joined spellings normalize identically. Fixpoint for idempotence.
    fn join_multiplicity_prefixes(&self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            let next = self
                .multiplicity
                .replace_all(&current, "${1}${2}")
                .into_owned();
            if next == current {
                return next;
            }
            current = next;
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}
