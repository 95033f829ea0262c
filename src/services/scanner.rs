//! Video discovery
//!
//! Walks a directory tree for video files, attaches the languages of
//! subtitle files found next to them and decides which videos still need
//! subtitles. Everything here is blocking file I/O; callers run it on the
//! blocking thread pool.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use super::language::Language;
use super::video::{
    OPENSUBTITLES_HASH, SUBTITLE_EXTENSIONS, VIDEO_EXTENSIONS, Video, compute_opensubtitles_hash,
};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
}

/// Build a video from a file on disk: name guess, size, age and hashes
pub fn scan_video(path: &Path, now: SystemTime) -> Result<Video> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("No modification time for {}", path.display()))?;

    let mut video = Video::from_name(path);
    video.size = metadata.len();
    video.age = now.duration_since(modified).unwrap_or(Duration::ZERO);
    if let Some(hash) = compute_opensubtitles_hash(path)? {
        video.hashes.insert(OPENSUBTITLES_HASH.to_string(), hash);
    }

    Ok(video)
}

/// Every video under `root` at least `min_age` old.
///
/// Hidden files and directories and `sample` files are skipped.
pub fn scan_videos(root: &Path, min_age: Duration, now: SystemTime) -> Result<Vec<Video>> {
    info!(path = %root.display(), min_age_secs = min_age.as_secs(), "Scanning for videos");

    let mut videos = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, VIDEO_EXTENSIONS) {
            continue;
        }
        if entry.file_name().to_string_lossy().to_lowercase().starts_with("sample") {
            debug!(path = %path.display(), "Skipping sample video");
            continue;
        }

        let video = scan_video(path, now)?;
        if video.age < min_age {
            debug!(path = %path.display(), age_secs = video.age.as_secs(), "Skipping video younger than the cutoff");
            continue;
        }
        videos.push(video);
    }

    info!(count = videos.len(), "Video scan complete");
    Ok(videos)
}

/// Subtitle files next to `video_path`, keyed by path.
///
/// `movie.fr.srt` and `movie.fre.forced.srt` are French; a missing or
/// unknown language suffix is the undefined language.
pub fn search_external_subtitles(video_path: &Path) -> Result<BTreeMap<PathBuf, Language>> {
    let mut subtitles = BTreeMap::new();
    let (Some(dir), Some(stem)) = (video_path.parent(), video_path.file_stem()) else {
        return Ok(subtitles);
    };
    let stem = stem.to_string_lossy().to_string();
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };

    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if !has_extension(&path, SUBTITLE_EXTENSIONS) {
            continue;
        }
        let Some(file_stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let Some(suffix) = file_stem.strip_prefix(&stem) else {
            continue;
        };

        let language = suffix
            .split(['.', '_', '-'])
            .filter(|part| !part.is_empty())
            .find_map(|part| Language::from_code(part).ok())
            .unwrap_or_else(Language::undefined);

        debug!(path = %path.display(), language = %language, "Found external subtitle");
        subtitles.insert(path, language);
    }

    Ok(subtitles)
}

/// Whether a video should be processed.
///
/// Rejects videos that are not identified, are younger than `min_age` or
/// already have every requested language. With `undefined`, a subtitle of
/// undefined language counts as covering everything.
pub fn check_video(
    video: &Video,
    languages: &BTreeSet<Language>,
    min_age: Duration,
    undefined: bool,
) -> bool {
    if !video.is_identified() {
        debug!(video = %video.name(), "Video could not be identified");
        return false;
    }
    if languages.is_subset(&video.subtitle_languages) {
        debug!(video = %video.name(), "All languages exist");
        return false;
    }
    if video.age < min_age {
        debug!(video = %video.name(), "Video is too recent");
        return false;
    }
    if undefined && video.subtitle_languages.contains(&Language::undefined()) {
        debug!(video = %video.name(), "Undefined language found");
        return false;
    }
    true
}

/// Languages still missing for a video
pub fn missing_languages(video: &Video, languages: &BTreeSet<Language>) -> BTreeSet<Language> {
    languages.difference(&video.subtitle_languages).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn languages(codes: &[&str]) -> BTreeSet<Language> {
        codes.iter().map(|c| Language::from_code(c).unwrap()).collect()
    }

    #[test]
    fn test_scan_skips_hidden_samples_and_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".trash")).unwrap();
        fs::write(dir.path().join(".trash/Old.Movie.2001.mkv"), b"x").unwrap();
        fs::write(dir.path().join("sample-movie.mkv"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("Inception.2010.mkv"), b"x").unwrap();

        let later = SystemTime::now() + Duration::from_secs(3 * 7 * 24 * 3600);
        let videos = scan_videos(dir.path(), Duration::from_secs(7 * 24 * 3600), later).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].name(), "Inception.2010.mkv");

        let recent = scan_videos(dir.path(), Duration::from_secs(7 * 24 * 3600), SystemTime::now()).unwrap();
        assert!(recent.is_empty());
    }

    #[test]
    fn test_external_subtitle_languages() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("Inception.2010.mkv");
        fs::write(&video, b"x").unwrap();
        fs::write(dir.path().join("Inception.2010.fr.srt"), b"x").unwrap();
        fs::write(dir.path().join("Inception.2010.ger.forced.srt"), b"x").unwrap();
        fs::write(dir.path().join("Inception.2010.srt"), b"x").unwrap();
        fs::write(dir.path().join("Other.fr.srt"), b"x").unwrap();

        let found: BTreeSet<Language> = search_external_subtitles(&video)
            .unwrap()
            .into_values()
            .collect();
        assert_eq!(found, languages(&["fra", "deu", "und"]));
    }

    #[test]
    fn test_check_video() {
        let mut video = Video::from_name("/movies/Inception.2010.mkv");
        video.age = Duration::from_secs(3600);
        let wanted = languages(&["fra", "eng"]);

        assert!(check_video(&video, &wanted, Duration::from_secs(60), false));
        assert!(!check_video(&video, &wanted, Duration::from_secs(7200), false));

        video.subtitle_languages.insert(Language::undefined());
        assert!(check_video(&video, &wanted, Duration::from_secs(60), false));
        assert!(!check_video(&video, &wanted, Duration::from_secs(60), true));

        video.subtitle_languages = wanted.clone();
        assert!(!check_video(&video, &wanted, Duration::from_secs(60), false));

        let unknown = Video::from_name("/movies/1080p.mkv");
        assert!(!check_video(&unknown, &wanted, Duration::ZERO, false));
    }
}
