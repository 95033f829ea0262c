//! Subtitle languages
//!
//! Languages are identified by their ISO 639-3 code. Parsing accepts
//! ISO 639-2/T, ISO 639-2/B and ISO 639-1 codes for the languages in
//! [`LANGUAGES`]; `und` stands for an unknown language.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// (alpha3 terminological, alpha3 bibliographic, alpha2, English name)
const LANGUAGES: &[(&str, &str, &str, &str)] = &[
    ("ara", "ara", "ar", "Arabic"),
    ("bul", "bul", "bg", "Bulgarian"),
    ("cat", "cat", "ca", "Catalan"),
    ("ces", "cze", "cs", "Czech"),
    ("dan", "dan", "da", "Danish"),
    ("deu", "ger", "de", "German"),
    ("ell", "gre", "el", "Greek"),
    ("eng", "eng", "en", "English"),
    ("est", "est", "et", "Estonian"),
    ("eus", "baq", "eu", "Basque"),
    ("fas", "per", "fa", "Persian"),
    ("fin", "fin", "fi", "Finnish"),
    ("fra", "fre", "fr", "French"),
    ("glg", "glg", "gl", "Galician"),
    ("heb", "heb", "he", "Hebrew"),
    ("hin", "hin", "hi", "Hindi"),
    ("hrv", "hrv", "hr", "Croatian"),
    ("hun", "hun", "hu", "Hungarian"),
    ("ind", "ind", "id", "Indonesian"),
    ("isl", "ice", "is", "Icelandic"),
    ("ita", "ita", "it", "Italian"),
    ("jpn", "jpn", "ja", "Japanese"),
    ("kor", "kor", "ko", "Korean"),
    ("lav", "lav", "lv", "Latvian"),
    ("lit", "lit", "lt", "Lithuanian"),
    ("mkd", "mac", "mk", "Macedonian"),
    ("msa", "may", "ms", "Malay"),
    ("nld", "dut", "nl", "Dutch"),
    ("nor", "nor", "no", "Norwegian"),
    ("pol", "pol", "pl", "Polish"),
    ("por", "por", "pt", "Portuguese"),
    ("ron", "rum", "ro", "Romanian"),
    ("rus", "rus", "ru", "Russian"),
    ("slk", "slo", "sk", "Slovak"),
    ("slv", "slv", "sl", "Slovenian"),
    ("spa", "spa", "es", "Spanish"),
    ("srp", "srp", "sr", "Serbian"),
    ("swe", "swe", "sv", "Swedish"),
    ("tha", "tha", "th", "Thai"),
    ("tur", "tur", "tr", "Turkish"),
    ("ukr", "ukr", "uk", "Ukrainian"),
    ("vie", "vie", "vi", "Vietnamese"),
    ("zho", "chi", "zh", "Chinese"),
];

const UNDEFINED: &str = "und";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LanguageError {
    #[error("unknown language code '{0}'")]
    Unknown(String),
}

/// A subtitle language, stored as its ISO 639-3 code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Language {
    alpha3: &'static str,
}

impl Language {
    /// The undefined language, used for subtitles without a language tag
    pub fn undefined() -> Self {
        Self { alpha3: UNDEFINED }
    }

    pub fn is_undefined(&self) -> bool {
        self.alpha3 == UNDEFINED
    }

    /// Parse a two or three letter code, case-insensitively
    pub fn from_code(code: &str) -> Result<Self, LanguageError> {
        let lower = code.trim().to_ascii_lowercase();
        if lower == UNDEFINED {
            return Ok(Self::undefined());
        }

        LANGUAGES
            .iter()
            .find(|(t, b, a2, _)| *t == lower || *b == lower || *a2 == lower)
            .map(|(t, _, _, _)| Self { alpha3: *t })
            .ok_or_else(|| LanguageError::Unknown(code.to_string()))
    }

    /// ISO 639-3 code
    pub fn alpha3(&self) -> &'static str {
        self.alpha3
    }

    /// ISO 639-1 code, when the language has one
    pub fn alpha2(&self) -> Option<&'static str> {
        self.entry().map(|(_, _, a2, _)| *a2)
    }

    pub fn name(&self) -> &'static str {
        self.entry().map(|(_, _, _, name)| *name).unwrap_or("Undetermined")
    }

    /// Short tag used in subtitle filenames: alpha2 when available
    pub fn file_tag(&self) -> &'static str {
        self.alpha2().unwrap_or(self.alpha3)
    }

    fn entry(&self) -> Option<&'static (&'static str, &'static str, &'static str, &'static str)> {
        LANGUAGES.iter().find(|(t, _, _, _)| *t == self.alpha3)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpha3)
    }
}

impl FromStr for Language {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.alpha3)
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Language::from_code(&code).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let french = Language::from_code("fra").unwrap();
        assert_eq!(Language::from_code("fre").unwrap(), french);
        assert_eq!(Language::from_code("FR").unwrap(), french);
        assert_eq!(french.alpha2(), Some("fr"));
        assert_eq!(french.file_tag(), "fr");
        assert_eq!(french.to_string(), "fra");
        assert_eq!(french.name(), "French");
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(
            Language::from_code("xx"),
            Err(LanguageError::Unknown("xx".to_string()))
        );
    }

    #[test]
    fn test_undefined() {
        let und = Language::from_code("und").unwrap();
        assert!(und.is_undefined());
        assert_eq!(und.alpha2(), None);
        assert_eq!(und.file_tag(), "und");
    }
}
