//! Scheduled subtitle acquisition for a media library
//!
//! Jobs scan a directory for videos missing subtitles, fetch the best
//! matches from subtitle providers, save them beside the videos and
//! optionally refresh a Plex library and convert the saved files.

pub mod cli;
pub mod config;
pub mod db;
pub mod jobs;
pub mod services;
