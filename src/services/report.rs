//! Run report returned as a job's result
//!
//! Sections are optional and only serialized once something was recorded in
//! them. `meta` is always present.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideosSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collected: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvidersSection {
    pub discarded: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitlesSection {
    /// Saved subtitle counts per video file name, then per provider
    #[serde(flatten)]
    pub saved: BTreeMap<String, BTreeMap<String, usize>>,
    pub total: usize,
    /// Subtitle paths dropped by the duplicate filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discarded: Vec<String>,
    /// Converted subtitle files, `name: from -> to`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub converted: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refreshed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `H:MM:SS.ffffff`
    pub duration: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<VideosSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub providers: Option<ProvidersSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<SubtitlesSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogSection>,
    pub meta: Meta,
}

impl RunReport {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            videos: None,
            providers: None,
            subtitles: None,
            catalog: None,
            meta: Meta {
                start,
                end: start,
                duration: format_duration(chrono::Duration::zero()),
            },
        }
    }

    pub fn collect(&mut self, name: String) {
        self.videos.get_or_insert_with(Default::default).collected.push(name);
    }

    pub fn ignore(&mut self, name: String) {
        self.videos.get_or_insert_with(Default::default).ignored.push(name);
    }

    pub fn collected(&self) -> &[String] {
        self.videos.as_ref().map(|v| v.collected.as_slice()).unwrap_or_default()
    }

    pub fn ignored(&self) -> &[String] {
        self.videos.as_ref().map(|v| v.ignored.as_slice()).unwrap_or_default()
    }

    pub fn discard_providers(&mut self, names: Vec<String>) {
        if !names.is_empty() {
            self.providers = Some(ProvidersSection { discarded: names });
        }
    }

    /// Open the subtitles section; its total starts at zero
    pub fn subtitles_mut(&mut self) -> &mut SubtitlesSection {
        self.subtitles.get_or_insert_with(Default::default)
    }

    pub fn record_saved(&mut self, video: &str, provider: &str) {
        let section = self.subtitles_mut();
        *section
            .saved
            .entry(video.to_string())
            .or_default()
            .entry(provider.to_string())
            .or_default() += 1;
        section.total += 1;
    }

    pub fn refreshed(&mut self, label: String) {
        self.catalog.get_or_insert_with(Default::default).refreshed.push(label);
    }

    pub fn refresh_failed(&mut self, label: String) {
        self.catalog.get_or_insert_with(Default::default).failed.push(label);
    }

    /// Total saved subtitles, zero when nothing was collected
    pub fn total_subtitles(&self) -> usize {
        self.subtitles.as_ref().map(|s| s.total).unwrap_or(0)
    }

    /// Stamp the end time and duration
    pub fn finish(&mut self, end: DateTime<Utc>) {
        self.meta.end = end;
        self.meta.duration = format_duration(end - self.meta.start);
    }
}

/// Format like `0:01:02.003000`
pub fn format_duration(duration: chrono::Duration) -> String {
    let micros = duration.num_microseconds().unwrap_or(i64::MAX).max(0);
    let seconds = micros / 1_000_000;
    format!(
        "{}:{:02}:{:02}.{:06}",
        seconds / 3600,
        (seconds / 60) % 60,
        seconds % 60,
        micros % 1_000_000
    )
}
