use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::OcrError;

/// Code returned by [`Alphabet::encode`] for characters outside the alphabet.
/// A valid label never contains it.
pub const UNKNOWN_CODE: i64 = -1;

/// Glyph substituted by [`Alphabet::decode_code`] for out-of-range codes.
pub const FALLBACK_GLYPH: char = '?';

const DIGITS: &str = "0123456789";
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LETTERS_LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const PUNCTUATION: &str = " !\"#&'()*+,-./:;?";

/// Named character-set presets. The symbol order inside a preset is fixed so
/// codes stay reproducible across save/load of a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlphabetPreset {
    DigitsOnly,
    LettersOnly,
    LettersDigits,
    LettersDigitsLowercase,
    LettersDigitsExtended,
}

impl AlphabetPreset {
    pub fn symbols(self) -> String {
        match self {
            Self::DigitsOnly => DIGITS.to_string(),
            Self::LettersOnly => LETTERS.to_string(),
            Self::LettersDigits => format!("{DIGITS}{LETTERS}"),
            Self::LettersDigitsLowercase => format!("{DIGITS}{LETTERS_LOWERCASE}"),
            Self::LettersDigitsExtended => format!("{DIGITS}{LETTERS}{PUNCTUATION}"),
        }
    }
}

/// Ordered symbol set plus the reserved blank. The blank is not part of
/// `symbols`; it always takes the last class index, so the class count seen
/// by the model is `symbols.len() + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AlphabetRepr", into = "AlphabetRepr")]
pub struct Alphabet {
    symbols: Vec<char>,
    codes: HashMap<char, i64>,
}

/// Serialized form: the symbol string alone carries the full ordering.
#[derive(Serialize, Deserialize)]
struct AlphabetRepr {
    symbols: String,
}

impl TryFrom<AlphabetRepr> for Alphabet {
    type Error = OcrError;

    fn try_from(repr: AlphabetRepr) -> Result<Self, OcrError> {
        // Persisted alphabets may be folded decode-side tables, so repeated
        // symbols are legal here; the first occurrence owns the code.
        let symbols: Vec<char> = repr.symbols.chars().collect();
        if symbols.is_empty() {
            return Err(OcrError::config("alphabet must contain at least one symbol"));
        }
        let mut codes = HashMap::with_capacity(symbols.len());
        for (i, &c) in symbols.iter().enumerate() {
            codes.entry(c).or_insert(i as i64);
        }
        Ok(Alphabet { symbols, codes })
    }
}

impl From<Alphabet> for AlphabetRepr {
    fn from(alphabet: Alphabet) -> Self {
        Self {
            symbols: alphabet.symbols.iter().collect(),
        }
    }
}

impl Alphabet {
    pub fn new(symbols: impl IntoIterator<Item = char>) -> Result<Self, OcrError> {
        let symbols: Vec<char> = symbols.into_iter().collect();
        if symbols.is_empty() {
            return Err(OcrError::config("alphabet must contain at least one symbol"));
        }
        let mut codes = HashMap::with_capacity(symbols.len());
        for (i, &c) in symbols.iter().enumerate() {
            if codes.insert(c, i as i64).is_some() {
                return Err(OcrError::config(format!(
                    "duplicate symbol {c:?} in alphabet"
                )));
            }
        }
        Ok(Self { symbols, codes })
    }

    pub fn from_preset(preset: AlphabetPreset) -> Self {
        // Presets are static and duplicate-free.
        Self::new(preset.symbols().chars()).expect("preset alphabets are valid")
    }

    /// Derive a decode-side alphabet that renders this alphabet's codes
    /// case-insensitively. The result keeps the same length and ordering so
    /// it stays positionally compatible with this alphabet's codes; the
    /// folded symbols may repeat, and `encode` on the result resolves a
    /// repeated symbol to its first code.
    pub fn case_folded(&self) -> Self {
        let symbols: Vec<char> = self
            .symbols
            .iter()
            .map(|c| c.to_lowercase().next().unwrap_or(*c))
            .collect();
        let mut codes = HashMap::with_capacity(symbols.len());
        for (i, &c) in symbols.iter().enumerate() {
            codes.entry(c).or_insert(i as i64);
        }
        Self { symbols, codes }
    }

    /// Number of classes the model predicts over: symbols plus the blank.
    pub fn n_classes(&self) -> usize {
        self.symbols.len() + 1
    }

    /// The blank takes the last class index.
    pub fn blank_code(&self) -> i64 {
        self.symbols.len() as i64
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// Encode a label string. Out-of-alphabet characters map to
    /// [`UNKNOWN_CODE`]; callers that must fail fast use
    /// [`Alphabet::encode_checked`].
    pub fn encode(&self, label: &str) -> Vec<i64> {
        label
            .chars()
            .map(|c| self.codes.get(&c).copied().unwrap_or(UNKNOWN_CODE))
            .collect()
    }

    /// Encode a label string, rejecting any out-of-alphabet character. The
    /// sentinel corrupts CTC alignment if it reaches the loss, so training
    /// pipelines encode through this variant.
    pub fn encode_checked(&self, label: &str) -> Result<Vec<i64>, OcrError> {
        label
            .chars()
            .map(|c| {
                self.codes.get(&c).copied().ok_or_else(|| {
                    OcrError::invalid_input(format!("character {c:?} not in alphabet"))
                })
            })
            .collect()
    }

    /// Decode one code; out-of-range codes (including the blank and the
    /// unknown sentinel) render as [`FALLBACK_GLYPH`].
    pub fn decode_code(&self, code: i64) -> char {
        usize::try_from(code)
            .ok()
            .and_then(|i| self.symbols.get(i).copied())
            .unwrap_or(FALLBACK_GLYPH)
    }

    /// Decode a code sequence into a string. Codes are assumed already
    /// collapsed and blank-free; stray blanks render as the fallback glyph.
    pub fn decode(&self, codes: &[i64]) -> String {
        codes.iter().map(|&c| self.decode_code(c)).collect()
    }
}

/// Input-side alphabet (ground-truth encoding) plus an optional coarser
/// decode-side alphabet used to render predictions, e.g. case-folded output
/// while training against the case-sensitive set. Absent means the input
/// alphabet decodes predictions too; a present decode alphabet must cover the
/// same code space, i.e. have the same symbol count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphabetPair {
    pub input: Alphabet,
    pub decoding: Option<Alphabet>,
}

impl AlphabetPair {
    pub fn new(input: Alphabet) -> Self {
        Self {
            input,
            decoding: None,
        }
    }

    pub fn with_decoding(input: Alphabet, decoding: Alphabet) -> Result<Self, OcrError> {
        if decoding.symbols.len() != input.symbols.len() {
            return Err(OcrError::config(format!(
                "decode alphabet has {} symbols but the input alphabet has {}; \
                 they must share one code space",
                decoding.symbols.len(),
                input.symbols.len()
            )));
        }
        Ok(Self {
            input,
            decoding: Some(decoding),
        })
    }

    pub fn case_insensitive(input: Alphabet) -> Self {
        let decoding = input.case_folded();
        Self {
            input,
            decoding: Some(decoding),
        }
    }

    pub fn decoding(&self) -> &Alphabet {
        self.decoding.as_ref().unwrap_or(&self.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_in_alphabet_strings() {
        let alphabet = Alphabet::from_preset(AlphabetPreset::LettersDigits);
        let label = "Hello123";
        let codes = alphabet.encode(label);
        assert!(codes.iter().all(|&c| c != UNKNOWN_CODE));
        assert_eq!(alphabet.decode(&codes), label);
    }

    #[test]
    fn out_of_alphabet_yields_sentinel_not_a_valid_code() {
        let alphabet = Alphabet::from_preset(AlphabetPreset::DigitsOnly);
        let codes = alphabet.encode("1a2");
        assert_eq!(codes, vec![1, UNKNOWN_CODE, 2]);
        assert!(alphabet.encode_checked("1a2").is_err());
        assert!(alphabet.encode_checked("12").is_ok());
    }

    #[test]
    fn blank_is_last_class() {
        let alphabet = Alphabet::from_preset(AlphabetPreset::DigitsOnly);
        assert_eq!(alphabet.n_classes(), 11);
        assert_eq!(alphabet.blank_code(), 10);
        // Blank has no glyph.
        assert_eq!(alphabet.decode_code(alphabet.blank_code()), FALLBACK_GLYPH);
        assert_eq!(alphabet.decode_code(UNKNOWN_CODE), FALLBACK_GLYPH);
    }

    #[test]
    fn duplicate_and_empty_alphabets_are_rejected() {
        assert!(Alphabet::new("aa".chars()).is_err());
        assert!(Alphabet::new("".chars()).is_err());
    }

    #[test]
    fn serde_round_trip_keeps_code_assignment() {
        let alphabet = Alphabet::from_preset(AlphabetPreset::LettersDigitsExtended);
        let json = serde_json::to_string(&alphabet).unwrap();
        let restored: Alphabet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.symbols(), alphabet.symbols());
        assert_eq!(restored.encode("a7;"), alphabet.encode("a7;"));
    }

    #[test]
    fn pair_defaults_decoding_to_input() {
        let pair = AlphabetPair::new(Alphabet::from_preset(AlphabetPreset::LettersDigits));
        assert_eq!(pair.decoding().n_classes(), pair.input.n_classes());
    }

    #[test]
    fn pair_rejects_mismatched_code_spaces() {
        let result = AlphabetPair::with_decoding(
            Alphabet::from_preset(AlphabetPreset::LettersDigits),
            Alphabet::from_preset(AlphabetPreset::LettersDigitsLowercase),
        );
        assert!(result.is_err());
    }

    #[test]
    fn case_folded_decoding_renders_upper_and_lower_alike() {
        let pair =
            AlphabetPair::case_insensitive(Alphabet::from_preset(AlphabetPreset::LettersDigits));
        let upper = pair.input.encode("AB1");
        let lower = pair.input.encode("ab1");
        assert_ne!(upper, lower);
        assert_eq!(pair.decoding().decode(&upper), "ab1");
        assert_eq!(pair.decoding().decode(&lower), "ab1");
    }

    #[test]
    fn folded_alphabet_survives_serde() {
        let folded = Alphabet::from_preset(AlphabetPreset::LettersDigits).case_folded();
        let json = serde_json::to_string(&folded).unwrap();
        let restored: Alphabet = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.symbols(), folded.symbols());
    }
}
