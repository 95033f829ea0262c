//! Subtitle format conversion
//!
//! [`CueConverter`] reads SubRip, WebVTT and SSA/ASS files into a neutral
//! list of [`Cue`]s and writes them back out in another format. Cue text uses
//! `<i>`, `<b>` and `<u>` tags for styling and `\n` for line breaks; any other
//! markup is dropped on the way in.

mod ass;
mod srt;
mod vtt;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

static SRT_TIMING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\d{1,2}:\d{2}:\d{2}[,.]\d{1,3}\s*-->\s*\d{1,2}:\d{2}:\d{2}[,.]\d{1,3}")
        .expect("valid regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("unknown subtitle format '{0}'")]
    UnknownFormat(String),
    #[error("unrecognized subtitle content")]
    Undetectable,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Supported subtitle formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    #[serde(rename = "srt")]
    SubRip,
    #[serde(rename = "vtt")]
    WebVtt,
    #[serde(rename = "ass")]
    Ass,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::SubRip => "srt",
            Self::WebVtt => "vtt",
            Self::Ass => "ass",
        }
    }
}

impl fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for SubtitleFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "srt" | "subrip" => Ok(Self::SubRip),
            "vtt" | "webvtt" => Ok(Self::WebVtt),
            "ass" | "ssa" => Ok(Self::Ass),
            other => Err(ConversionError::UnknownFormat(other.to_string())),
        }
    }
}

/// One timed subtitle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Detect the encoding of raw subtitle bytes: BOM first, then UTF-8
/// validity, then windows-1252.
pub fn detect_encoding(content: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(content) {
        return encoding;
    }
    if std::str::from_utf8(content).is_ok() {
        UTF_8
    } else {
        WINDOWS_1252
    }
}

/// Decode raw bytes with the detected encoding, dropping any BOM
pub fn decode(content: &[u8]) -> (String, &'static Encoding) {
    let encoding = detect_encoding(content);
    let (text, used, _) = encoding.decode(content);
    (text.into_owned(), used)
}

/// Detect the format of raw subtitle content
pub fn detect_format(content: &[u8]) -> Option<SubtitleFormat> {
    let (text, _) = decode(content);
    detect_text_format(&text)
}

fn detect_text_format(text: &str) -> Option<SubtitleFormat> {
    let head = text.trim_start();
    if head.starts_with("WEBVTT") {
        Some(SubtitleFormat::WebVtt)
    } else if head.starts_with("[Script Info]") || text.contains("[Events]") {
        Some(SubtitleFormat::Ass)
    } else if SRT_TIMING_RE.is_match(text) {
        Some(SubtitleFormat::SubRip)
    } else {
        None
    }
}

/// Parse subtitle text in the given format
pub fn parse(text: &str, format: SubtitleFormat) -> Result<Vec<Cue>, ConversionError> {
    match format {
        SubtitleFormat::SubRip => srt::parse(text),
        SubtitleFormat::WebVtt => vtt::parse(text),
        SubtitleFormat::Ass => ass::parse(text),
    }
}

/// Render cues in the given format
pub fn render(cues: &[Cue], format: SubtitleFormat) -> String {
    match format {
        SubtitleFormat::SubRip => srt::render(cues),
        SubtitleFormat::WebVtt => vtt::render(cues),
        SubtitleFormat::Ass => ass::render(cues),
    }
}

/// Parse a timestamp such as `01:02:03,456`, `02:03.456` or `1:02:03.45`
pub(crate) fn parse_timestamp(value: &str) -> Result<u64, ConversionError> {
    let invalid = || ConversionError::InvalidTimestamp(value.to_string());
    let value = value.trim();

    let (clock, fraction) = match value.rfind([',', '.']) {
        Some(i) => (&value[..i], &value[i + 1..]),
        None => (value, ""),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() > 3 {
        return Err(invalid());
    }
    let mut seconds: u64 = 0;
    for part in parts {
        let n: u64 = part.parse().map_err(|_| invalid())?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|s| s.checked_add(n))
            .ok_or_else(invalid)?;
    }

    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    // Digits past milliseconds are truncated
    let digits = &fraction[..fraction.len().min(3)];
    let millis = if digits.is_empty() {
        0
    } else {
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        n * 10u64.pow(3 - digits.len() as u32)
    };

    seconds
        .checked_mul(1000)
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(invalid)
}

/// `HH:MM:SS` plus a separator and milliseconds
pub(crate) fn format_timestamp(ms: u64, separator: char) -> String {
    format!(
        "{:02}:{:02}:{:02}{}{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        separator,
        ms % 1000
    )
}

/// Keep `<i>`, `<b>` and `<u>` tags and drop every other tag
pub(crate) fn keep_basic_tags(text: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(/?)([^>\s/]*)[^>]*>").expect("valid regex"));
    static BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\\[^}]*\}").expect("valid regex"));

    let without_overrides = BRACE_RE.replace_all(text, "");
    TAG_RE
        .replace_all(&without_overrides, |caps: &regex::Captures| {
            let name = caps[2].to_ascii_lowercase();
            match name.as_str() {
                "i" | "b" | "u" => format!("<{}{}>", &caps[1], name),
                _ => String::new(),
            }
        })
        .into_owned()
}

/// Result of converting one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub from: SubtitleFormat,
    pub to: SubtitleFormat,
    pub encoding: &'static str,
}

/// Converts subtitle files between formats
#[async_trait]
pub trait SubtitleConverter: Send + Sync {
    /// Convert the file at `path` to `target` in place. Returns `None` when
    /// the file already is in the target format.
    async fn convert_file(&self, path: &Path, target: SubtitleFormat) -> Result<Option<Conversion>>;
}

/// Converter built on the neutral cue list
#[derive(Debug, Default, Clone)]
pub struct CueConverter;

impl CueConverter {
    pub fn new() -> Self {
        Self
    }

    /// Convert raw content, keeping its text encoding
    pub fn convert_bytes(
        &self,
        content: &[u8],
        target: SubtitleFormat,
    ) -> Result<Option<(Vec<u8>, Conversion)>> {
        let (text, encoding) = decode(content);
        let source = detect_text_format(&text).ok_or(ConversionError::Undetectable)?;
        if source == target {
            return Ok(None);
        }

        let cues = parse(&text, source)?;
        let rendered = render(&cues, target);
        let (bytes, output_encoding, _) = encoding.encode(&rendered);

        debug!(from = %source, to = %target, cues = cues.len(), encoding = output_encoding.name(), "Converted subtitle");
        Ok(Some((
            bytes.into_owned(),
            Conversion {
                from: source,
                to: target,
                encoding: output_encoding.name(),
            },
        )))
    }
}

#[async_trait]
impl SubtitleConverter for CueConverter {
    async fn convert_file(&self, path: &Path, target: SubtitleFormat) -> Result<Option<Conversion>> {
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let converted = self
            .convert_bytes(&content, target)
            .with_context(|| format!("Failed to convert {}", path.display()))?;

        match converted {
            Some((bytes, conversion)) => {
                tokio::fs::write(path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), from = %conversion.from, to = %conversion.to, "Converted subtitle file");
                Ok(Some(conversion))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRT: &str = "1\r\n00:00:01,000 --> 00:00:02,500\r\n<i>Bonjour</i>\r\ntout le monde\r\n\r\n2\r\n00:01:00,000 --> 00:01:01,000\r\n<font color=\"red\">Salut</font>\r\n";

    #[test]
    fn test_timestamps() {
        assert_eq!(parse_timestamp("01:02:03,456").unwrap(), 3_723_456);
        assert_eq!(parse_timestamp("02:03.456").unwrap(), 123_456);
        assert_eq!(parse_timestamp("1:02:03.45").unwrap(), 3_723_450);
        assert!(parse_timestamp("aa:bb").is_err());
        assert_eq!(parse_timestamp("00:00:03,4567").unwrap(), 3_456);
        assert_eq!(parse_timestamp("00:00:03").unwrap(), 3_000);
        assert_eq!(format_timestamp(3_723_456, ','), "01:02:03,456");
    }

    #[test]
    fn test_malformed_timestamps_are_errors() {
        assert_eq!(
            parse_timestamp("00:00:03,00é"),
            Err(ConversionError::InvalidTimestamp("00:00:03,00é".to_string()))
        );
        assert!(parse_timestamp("00:00:03,é").is_err());
        assert!(parse_timestamp("99999999999999999999:00:00,000").is_err());
        assert!(parse_timestamp("9999999999999999:00:00,000").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
    }

    #[test]
    fn test_non_ascii_timing_fails_conversion() {
        let converter = CueConverter::new();
        let content = "1\n00:00:01,000 --> 00:00:02,000\nBonjour\n\n2\n00:00:03,00é --> 00:00:04,000\nSalut\n";
        let err = converter
            .convert_bytes(content.as_bytes(), SubtitleFormat::WebVtt)
            .unwrap_err();
        assert!(err.downcast_ref::<ConversionError>().is_some());
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(SRT.as_bytes()), Some(SubtitleFormat::SubRip));
        assert_eq!(detect_format(b"WEBVTT\n\n00:01.000 --> 00:02.000\nHi\n"), Some(SubtitleFormat::WebVtt));
        assert_eq!(detect_format(b"[Script Info]\nTitle: x\n"), Some(SubtitleFormat::Ass));
        assert_eq!(detect_format(b"just some text"), None);
    }

    #[test]
    fn test_detect_encoding() {
        assert_eq!(detect_encoding("é".as_bytes()), UTF_8);
        assert_eq!(detect_encoding(&[0x63, 0x61, 0x66, 0xe9]), WINDOWS_1252);
        assert_eq!(detect_encoding(&[0xff, 0xfe, 0x41, 0x00]), encoding_rs::UTF_16LE);
    }

    #[test]
    fn test_srt_to_vtt() {
        let converter = CueConverter::new();
        let (bytes, conversion) = converter
            .convert_bytes(SRT.as_bytes(), SubtitleFormat::WebVtt)
            .unwrap()
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert_eq!(conversion.from, SubtitleFormat::SubRip);
        assert_eq!(conversion.to, SubtitleFormat::WebVtt);
        assert!(text.starts_with("WEBVTT\n\n"));
        assert!(text.contains("00:00:01.000 --> 00:00:02.500\n<i>Bonjour</i>\ntout le monde\n"));
        assert!(text.contains("00:01:00.000 --> 00:01:01.000\nSalut\n"));
    }

    #[test]
    fn test_same_format_is_left_alone() {
        let converter = CueConverter::new();
        assert!(converter
            .convert_bytes(SRT.as_bytes(), SubtitleFormat::SubRip)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_windows_1252_is_preserved() {
        let converter = CueConverter::new();
        let mut content = b"1\n00:00:01,000 --> 00:00:02,000\nCaf".to_vec();
        content.push(0xe9);
        content.push(b'\n');

        let (bytes, conversion) = converter
            .convert_bytes(&content, SubtitleFormat::Ass)
            .unwrap()
            .unwrap();
        assert_eq!(conversion.encoding, "windows-1252");
        assert!(bytes.windows(4).any(|w| w == [b'C', b'a', b'f', 0xe9]));
    }

    #[test]
    fn test_format_names() {
        assert_eq!("VTT".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::WebVtt);
        assert_eq!("ssa".parse::<SubtitleFormat>().unwrap(), SubtitleFormat::Ass);
        assert!("sub".parse::<SubtitleFormat>().is_err());
    }
}
