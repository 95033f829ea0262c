//! Duplicate filter for freshly downloaded subtitles
//!
//! Every item is keyed by the SHA-256 of its content and its destination
//! path. Items whose key is already in the dedup log are discarded. A key is
//! appended to the log once its item has been saved, so the log only ever
//! names files that were written.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::db::{Database, DedupRecord, DedupRepository};

/// Hex-encoded SHA-256 of some content
pub fn content_hash(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// Dedup log key of one item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub hash: String,
    pub path: String,
}

/// Items split by the filter, in input order
#[derive(Debug)]
pub struct FilterOutcome<T> {
    pub keep: Vec<T>,
    /// Keys of the kept items, parallel to `keep`
    pub keys: Vec<DedupKey>,
    pub discarded: Vec<T>,
    /// The existing log records that caused each discard
    pub discarded_records: Vec<DedupRecord>,
}

pub struct DuplicateFilter {
    log: DedupRepository,
}

impl DuplicateFilter {
    pub fn new(db: &Database) -> Self {
        Self { log: db.dedup() }
    }

    /// Split items against the log without recording anything. A key seen
    /// twice in the same batch keeps only its first item.
    pub async fn check<T, C, P>(&self, items: Vec<T>, content: C, destination: P) -> Result<FilterOutcome<T>>
    where
        C: Fn(&T) -> &[u8],
        P: Fn(&T) -> PathBuf,
    {
        let mut outcome = FilterOutcome {
            keep: Vec::new(),
            keys: Vec::new(),
            discarded: Vec::new(),
            discarded_records: Vec::new(),
        };
        let mut seen = HashSet::new();

        for item in items {
            let key = DedupKey {
                hash: content_hash(content(&item)),
                path: destination(&item).to_string_lossy().to_string(),
            };

            if let Some(record) = self.log.find(&key.hash, &key.path).await? {
                debug!(hash = %key.hash, path = %key.path, "Subtitle already saved, discarding");
                outcome.discarded_records.push(record);
                outcome.discarded.push(item);
                continue;
            }
            if !seen.insert(key.clone()) {
                debug!(hash = %key.hash, path = %key.path, "Duplicate in batch, discarding");
                outcome.discarded.push(item);
                continue;
            }

            outcome.keep.push(item);
            outcome.keys.push(key);
        }

        Ok(outcome)
    }

    /// Append a key to the log. Returns `false` when it was already present.
    pub async fn record(&self, key: &DedupKey) -> Result<bool> {
        self.log.insert(&key.hash, &key.path).await
    }

    /// Check and immediately record every kept item
    pub async fn filter<T, C, P>(&self, items: Vec<T>, content: C, destination: P) -> Result<FilterOutcome<T>>
    where
        C: Fn(&T) -> &[u8],
        P: Fn(&T) -> PathBuf,
    {
        let outcome = self.check(items, content, destination).await?;
        for key in &outcome.keys {
            self.record(key).await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn filter_input(items: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        items.to_vec()
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_same_hash_different_paths_are_kept() {
        let db = Database::connect_in_memory().await.unwrap();
        let filter = DuplicateFilter::new(&db);

        let outcome = filter
            .filter(
                filter_input(&[("same", "/a/movie.fr.srt"), ("same", "/b/movie.fr.srt")]),
                |(content, _)| content.as_bytes(),
                |(_, path)| PathBuf::from(path),
            )
            .await
            .unwrap();

        assert_eq!(outcome.keep.len(), 2);
        assert!(outcome.discarded.is_empty());
        assert_eq!(db.dedup().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_same_hash_same_path_is_discarded() {
        let db = Database::connect_in_memory().await.unwrap();
        let filter = DuplicateFilter::new(&db);
        let input = filter_input(&[
            ("first", "/a/movie.fr.srt"),
            ("first", "/a/movie.fr.srt"),
            ("second", "/a/movie.fr.srt"),
        ]);

        let outcome = filter
            .filter(input.clone(), |(content, _)| content.as_bytes(), |(_, path)| PathBuf::from(path))
            .await
            .unwrap();
        assert_eq!(outcome.keep, vec![("first", "/a/movie.fr.srt"), ("second", "/a/movie.fr.srt")]);
        assert_eq!(outcome.discarded, vec![("first", "/a/movie.fr.srt")]);
        assert!(outcome.discarded_records.is_empty());
        assert_eq!(db.dedup().count().await.unwrap(), 2);

        let again = filter
            .filter(input, |(content, _)| content.as_bytes(), |(_, path)| PathBuf::from(path))
            .await
            .unwrap();
        assert!(again.keep.is_empty());
        assert_eq!(again.discarded.len(), 3);
        assert_eq!(again.discarded_records.len(), 3);
        assert_eq!(again.discarded_records[0].hash, content_hash(b"first"));
    }

    #[tokio::test]
    async fn test_check_does_not_record() {
        let db = Database::connect_in_memory().await.unwrap();
        let filter = DuplicateFilter::new(&db);

        let outcome = filter
            .check(
                filter_input(&[("first", "/a/movie.fr.srt")]),
                |(content, _)| content.as_bytes(),
                |(_, path)| PathBuf::from(path),
            )
            .await
            .unwrap();
        assert_eq!(outcome.keep.len(), 1);
        assert_eq!(db.dedup().count().await.unwrap(), 0);

        assert!(filter.record(&outcome.keys[0]).await.unwrap());
        assert!(!filter.record(&outcome.keys[0]).await.unwrap());
        assert_eq!(db.dedup().count().await.unwrap(), 1);
    }
}
