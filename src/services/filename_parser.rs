//! Filename parser for scene-style release names
//!
//! Parses video filenames and subtitle release names like:
//! - "Chicago Fire S14E08 1080p WEB h264-ETHEL"
//! - "The.Big.Bang.Theory.S05E18.HDTV.x264-LOL.mp4"
//! - "Man.of.Steel.2013.720p.BluRay.x264-Felony.mkv"
//!
//! The result is a best guess; fields that cannot be recognized stay `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::video::{SUBTITLE_EXTENSIONS, VIDEO_EXTENSIONS};

static SXXEXX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*\bS(\d{1,2})\s*E(\d{1,3})\b").expect("valid regex"));
static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*\b(\d{1,2})x(\d{2,3})\b").expect("valid regex"));
static VERBOSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s*\bSeason\s*(\d+)\D*?Episode\s*(\d+)").expect("valid regex")
});
static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("valid regex"));
static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-([A-Za-z0-9]+)$").expect("valid regex"));
static RESOLUTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(2160p|1080p|1080i|720p|576p|480p|4K|UHD)\b").expect("valid regex"));
static QUALITY_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(2160p|1080p|1080i|720p|576p|480p|4K|UHD|BluRay|BDRip|BRRip|WEB|WEBRip|WEB-DL|WEBDL|HDTV|DVDRip|DVD|x264|x265|h264|h265|HEVC|XviD|AMZN|NF|HDR|PROPER|REPACK|REMUX)\b",
    )
    .expect("valid regex")
});
static SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Media kind inferred from a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuessedKind {
    Episode,
    Movie,
}

/// Information parsed from a filename or release name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReleaseGuess {
    pub kind: Option<GuessedKind>,
    /// Movie title, or episode title for episodes
    pub title: Option<String>,
    pub series: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,
    pub release_group: Option<String>,
    pub resolution: Option<String>,
    pub source: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// Quality information extracted from a name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuality {
    pub resolution: Option<String>,
    pub source: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

/// Parse a filename or release name
pub fn guess_release(name: &str) -> ReleaseGuess {
    let stem = strip_known_extension(name);
    let cleaned = clean(stem);

    let mut result = ReleaseGuess::default();

    let episode_caps = SXXEXX_RE
        .captures(&cleaned)
        .or_else(|| NXNN_RE.captures(&cleaned))
        .or_else(|| VERBOSE_RE.captures(&cleaned));

    if let Some(caps) = episode_caps {
        let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let (series, year) = split_trailing_year(prefix);
        result.kind = Some(GuessedKind::Episode);
        result.series = Some(series).filter(|s| !s.is_empty());
        result.year = year;
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());

        let end = caps.get(0).map(|m| m.end()).unwrap_or(cleaned.len());
        result.title = leading_words(&cleaned[end..]);
    } else {
        result.kind = Some(GuessedKind::Movie);
        let year_match = YEAR_RE.captures(&cleaned).and_then(|caps| {
            let start = caps.get(0)?.start();
            let year: i32 = caps.get(1)?.as_str().parse().ok()?;
            Some((start, year))
        });
        match year_match {
            Some((start, year)) if start > 0 => {
                result.title = Some(tidy(&cleaned[..start])).filter(|s| !s.is_empty());
                result.year = Some(year);
            }
            _ => {
                result.title = leading_words(&cleaned);
            }
        }
        if result.title.is_none() {
            result.kind = None;
        }
    }

    let quality = parse_quality(stem);
    result.resolution = quality.resolution;
    result.source = quality.source;
    result.video_codec = quality.video_codec;
    result.audio_codec = quality.audio_codec;

    if let Some(caps) = GROUP_RE.captures(stem) {
        let group = caps.get(1).map(|m| m.as_str().to_string());
        // "WEB-DL" style tokens are not release groups
        if group.as_deref().is_some_and(|g| !QUALITY_TOKEN_RE.is_match(g)) {
            result.release_group = group;
        }
    }

    debug!(
        name = name,
        kind = ?result.kind,
        series = ?result.series,
        title = ?result.title,
        season = ?result.season,
        episode = ?result.episode,
        year = ?result.year,
        "Parsed release name"
    );

    result
}

/// Parse quality information from a name
pub fn parse_quality(name: &str) -> ParsedQuality {
    let upper = name.to_uppercase();
    let mut quality = ParsedQuality::default();

    if let Some(caps) = RESOLUTION_RE.captures(name) {
        let res = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        quality.resolution = Some(match res.as_str() {
            "4k" | "uhd" => "2160p".to_string(),
            other => other.to_string(),
        });
    }

    if upper.contains("BLURAY") || upper.contains("BDRIP") || upper.contains("BRRIP") || upper.contains("BLU-RAY") {
        quality.source = Some("Blu-ray".to_string());
    } else if upper.contains("WEB") {
        quality.source = Some("Web".to_string());
    } else if upper.contains("HDTV") {
        quality.source = Some("HDTV".to_string());
    } else if upper.contains("DVD") {
        quality.source = Some("DVD".to_string());
    }

    if upper.contains("X265") || upper.contains("H265") || upper.contains("H.265") || upper.contains("HEVC") {
        quality.video_codec = Some("H.265".to_string());
    } else if upper.contains("X264") || upper.contains("H264") || upper.contains("H.264") || upper.contains("AVC") {
        quality.video_codec = Some("H.264".to_string());
    } else if upper.contains("AV1") {
        quality.video_codec = Some("AV1".to_string());
    } else if upper.contains("XVID") {
        quality.video_codec = Some("Xvid".to_string());
    }

    if upper.contains("TRUEHD") {
        quality.audio_codec = Some("Dolby TrueHD".to_string());
    } else if upper.contains("DTS") {
        quality.audio_codec = Some("DTS".to_string());
    } else if upper.contains("DDP") || upper.contains("DD+") || upper.contains("EAC3") {
        quality.audio_codec = Some("Dolby Digital Plus".to_string());
    } else if upper.contains("DD5") || upper.contains("AC3") {
        quality.audio_codec = Some("Dolby Digital".to_string());
    } else if upper.contains("AAC") {
        quality.audio_codec = Some("AAC".to_string());
    }

    quality
}

/// Normalize a title for comparison: lowercase, no articles or punctuation
pub fn normalize_title(name: &str) -> String {
    let mut normalized = name.to_lowercase().replace('&', "and");

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            normalized = rest.to_string();
        }
    }

    let stripped: String = normalized
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    tidy(&stripped)
}

/// Similarity between two titles (0.0 to 1.0)
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}

fn strip_known_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) => {
            let ext = ext.to_ascii_lowercase();
            if VIDEO_EXTENSIONS.contains(&ext.as_str()) || SUBTITLE_EXTENSIONS.contains(&ext.as_str()) {
                stem
            } else {
                name
            }
        }
        None => name,
    }
}

/// Dots and underscores become spaces. Hyphens inside words ("WEB-DL") stay.
fn clean(name: &str) -> String {
    let replaced = name.replace(['.', '_'], " ").replace(" - ", " ");
    tidy(&replaced)
}

fn tidy(s: &str) -> String {
    SPACES_RE.replace_all(s.trim(), " ").trim_matches([' ', '-']).to_string()
}

fn split_trailing_year(prefix: &str) -> (String, Option<i32>) {
    let prefix = tidy(prefix);
    if let Some(m) = YEAR_RE.find(&prefix)
        && m.end() == prefix.len()
        && m.start() > 0
    {
        let year = m.as_str().parse().ok();
        return (tidy(&prefix[..m.start()]), year);
    }
    (prefix, None)
}

/// Words up to the first quality token
fn leading_words(s: &str) -> Option<String> {
    let end = QUALITY_TOKEN_RE.find(s).map(|m| m.start()).unwrap_or(s.len());
    let words = GROUP_RE.replace(&s[..end], "");
    Some(tidy(&words)).filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sxxexx() {
        let result = guess_release("Chicago Fire S14E08 1080p WEB h264-ETHEL");
        assert_eq!(result.kind, Some(GuessedKind::Episode));
        assert_eq!(result.series.as_deref(), Some("Chicago Fire"));
        assert_eq!(result.season, Some(14));
        assert_eq!(result.episode, Some(8));
        assert_eq!(result.title, None);
        assert_eq!(result.resolution.as_deref(), Some("1080p"));
        assert_eq!(result.video_codec.as_deref(), Some("H.264"));
        assert_eq!(result.release_group.as_deref(), Some("ETHEL"));
    }

    #[test]
    fn test_parse_episode_with_title_and_extension() {
        let result = guess_release("Corner.Gas.S06E12.Super.Sensitive.720p.HDTV.x264-QOQ.mkv");
        assert_eq!(result.series.as_deref(), Some("Corner Gas"));
        assert_eq!(result.title.as_deref(), Some("Super Sensitive"));
        assert_eq!(result.source.as_deref(), Some("HDTV"));
        assert_eq!(result.release_group.as_deref(), Some("QOQ"));
    }

    #[test]
    fn test_parse_episode_with_series_year() {
        let result = guess_release("Doctor.Who.2005.8x01.Deep.Breath.mkv");
        assert_eq!(result.series.as_deref(), Some("Doctor Who"));
        assert_eq!(result.year, Some(2005));
        assert_eq!(result.season, Some(8));
        assert_eq!(result.episode, Some(1));
    }

    #[test]
    fn test_parse_movie() {
        let result = guess_release("Man.of.Steel.2013.720p.BluRay.x264-Felony.mkv");
        assert_eq!(result.kind, Some(GuessedKind::Movie));
        assert_eq!(result.title.as_deref(), Some("Man of Steel"));
        assert_eq!(result.year, Some(2013));
        assert_eq!(result.source.as_deref(), Some("Blu-ray"));
        assert_eq!(result.release_group.as_deref(), Some("Felony"));
    }

    #[test]
    fn test_parse_movie_without_year() {
        let result = guess_release("Inception.mkv");
        assert_eq!(result.kind, Some(GuessedKind::Movie));
        assert_eq!(result.title.as_deref(), Some("Inception"));
        assert_eq!(result.year, None);
    }

    #[test]
    fn test_parse_quality() {
        let quality = parse_quality("Show S01E01 2160p AMZN WEB-DL DDP5 1 Atmos HDR H.265-GROUP");
        assert_eq!(quality.resolution.as_deref(), Some("2160p"));
        assert_eq!(quality.source.as_deref(), Some("Web"));
        assert_eq!(quality.video_codec.as_deref(), Some("H.265"));
        assert_eq!(quality.audio_codec.as_deref(), Some("Dolby Digital Plus"));
    }

    #[test]
    fn test_title_similarity() {
        assert!(title_similarity("The Office", "Office") > 0.99);
        assert!(title_similarity("Chicago Fire", "Chicago P.D.") > 0.5);
        assert!(title_similarity("Lost", "Fringe") < 0.5);
    }
}
