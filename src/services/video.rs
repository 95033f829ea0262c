//! Discovered video files
//!
//! A [`Video`] is built for every file found during a scan and lives only for
//! the duration of one run.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::filename_parser::{GuessedKind, guess_release};
use super::language::Language;

/// Video file extensions we recognize
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "3g2", "3gp", "asf", "avi", "divx", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg",
    "mpg", "ogm", "ogv", "ts", "vob", "webm", "wmv",
];

/// Subtitle file extensions we recognize
pub const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "sub", "smi", "txt", "ssa", "ass", "mpl", "vtt"];

/// Name of the hash used by the OpenSubtitles "moviehash" matcher
pub const OPENSUBTITLES_HASH: &str = "opensubtitles";

const HASH_CHUNK_SIZE: u64 = 64 * 1024;

/// What a video was identified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoKind {
    Episode,
    Movie,
    Unknown,
}

/// A video file and everything known about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub path: PathBuf,
    pub kind: VideoKind,
    /// Movie title or episode title
    pub title: Option<String>,
    pub series: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
    pub series_imdb_id: Option<String>,
    pub tvmaze_id: Option<u32>,
    pub tmdb_id: Option<i32>,
    pub release_group: Option<String>,
    pub resolution: Option<String>,
    pub source: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub size: u64,
    /// Content hashes keyed by hash name
    pub hashes: BTreeMap<String, String>,
    /// Languages that already have a subtitle
    pub subtitle_languages: BTreeSet<Language>,
    /// Time since the file was last modified
    pub age: Duration,
}

impl Video {
    /// Build a video from its filename alone
    pub fn from_name(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let guess = guess_release(&name);

        let kind = match guess.kind {
            Some(GuessedKind::Episode) => VideoKind::Episode,
            Some(GuessedKind::Movie) => VideoKind::Movie,
            None => VideoKind::Unknown,
        };

        Self {
            path,
            kind,
            title: guess.title,
            series: guess.series,
            season: guess.season,
            episode: guess.episode,
            year: guess.year,
            imdb_id: None,
            series_imdb_id: None,
            tvmaze_id: None,
            tmdb_id: None,
            release_group: guess.release_group,
            resolution: guess.resolution,
            source: guess.source,
            video_codec: guess.video_codec,
            audio_codec: guess.audio_codec,
            size: 0,
            hashes: BTreeMap::new(),
            subtitle_languages: BTreeSet::new(),
            age: Duration::ZERO,
        }
    }

    /// File name without directories
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// True when the name resolves to a usable movie or episode
    pub fn is_identified(&self) -> bool {
        match self.kind {
            VideoKind::Episode => {
                self.series.is_some() && self.season.is_some() && self.episode.is_some()
            }
            VideoKind::Movie => self.title.is_some(),
            VideoKind::Unknown => false,
        }
    }

    /// Path a subtitle in `language` is saved to: `<stem>.<tag>.srt` beside the video
    pub fn subtitle_path(&self, language: &Language) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.path
            .with_file_name(format!("{}.{}.srt", stem, language.file_tag()))
    }

    /// Human readable label used in reports
    pub fn label(&self) -> String {
        match self.kind {
            VideoKind::Episode => format!(
                "{} ({}) S{:02}E{:02} - {}",
                self.series.as_deref().unwrap_or("?"),
                self.year.map(|y| y.to_string()).unwrap_or_else(|| "?".to_string()),
                self.season.unwrap_or(0),
                self.episode.unwrap_or(0),
                self.title.as_deref().unwrap_or("?"),
            ),
            VideoKind::Movie => match self.year {
                Some(year) => format!("{} ({})", self.title.as_deref().unwrap_or("?"), year),
                None => self.title.clone().unwrap_or_else(|| self.name()),
            },
            VideoKind::Unknown => self.name(),
        }
    }

    pub fn opensubtitles_hash(&self) -> Option<&str> {
        self.hashes.get(OPENSUBTITLES_HASH).map(String::as_str)
    }
}

/// OpenSubtitles movie hash: file size plus the 64-bit little-endian word sums
/// of the first and last 64 KiB. Files smaller than 128 KiB have no hash.
pub fn compute_opensubtitles_hash(path: &Path) -> Result<Option<String>> {
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata()?.len();
    if size < HASH_CHUNK_SIZE * 2 {
        return Ok(None);
    }

    let mut hash = size;
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE as usize];

    for offset in [0, size - HASH_CHUNK_SIZE] {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        for word in buffer.chunks_exact(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(word);
            hash = hash.wrapping_add(u64::from_le_bytes(bytes));
        }
    }

    Ok(Some(format!("{:016x}", hash)))
}
