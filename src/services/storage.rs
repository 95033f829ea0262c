//! Writing subtitles beside their video

use std::path::PathBuf;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use tracing::{debug, info};

use super::convert::decode;
use super::language::Language;
use super::providers::SubtitleCandidate;
use super::video::Video;

/// A subtitle written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSubtitle {
    pub path: PathBuf,
    pub provider: String,
    pub language: Language,
}

/// Resolve a WHATWG encoding label such as `utf-8` or `latin1`
pub fn lookup_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Save downloaded subtitles next to the video, one per language.
///
/// Content is decoded from its detected encoding and written in `encoding`.
/// Candidates without content are skipped.
pub async fn save_subtitles(
    video: &Video,
    subtitles: &[SubtitleCandidate],
    encoding: &'static Encoding,
) -> Result<Vec<SavedSubtitle>> {
    let mut saved: Vec<SavedSubtitle> = Vec::new();

    for subtitle in subtitles {
        let Some(content) = subtitle.content.as_deref() else {
            debug!(provider = %subtitle.provider, id = %subtitle.id, "Skipping subtitle without content");
            continue;
        };
        if saved.iter().any(|s| s.language == subtitle.language) {
            debug!(language = %subtitle.language, "Skipping subtitle, language already saved");
            continue;
        }

        let path = video.subtitle_path(&subtitle.language);
        let (text, _) = decode(content);
        let (bytes, _, _) = encoding.encode(&text);

        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write subtitle {}", path.display()))?;

        info!(path = %path.display(), provider = %subtitle.provider, language = %subtitle.language, "Saved subtitle");
        saved.push(SavedSubtitle {
            path,
            provider: subtitle.provider.clone(),
            language: subtitle.language,
        });
    }

    Ok(saved)
}
