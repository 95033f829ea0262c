//! Subtitle match scoring
//!
//! A candidate earns the weight of every property it shares with the video.
//! A hash match is worth the whole hash score on its own.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::filename_parser::{ReleaseGuess, normalize_title};
use super::video::{Video, VideoKind};

/// A property a candidate shares with the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Match {
    Hash,
    ImdbId,
    SeriesImdbId,
    Series,
    Title,
    Year,
    Season,
    Episode,
    ReleaseGroup,
    Source,
    AudioCodec,
    Resolution,
    VideoCodec,
    HearingImpaired,
}

/// Weight of a match for a video kind; zero for matches that only imply others
pub fn weight(kind: VideoKind, m: Match) -> u32 {
    match kind {
        VideoKind::Episode => match m {
            Match::Hash => 359,
            Match::Series => 180,
            Match::Year => 90,
            Match::Season | Match::Episode => 30,
            Match::ReleaseGroup => 15,
            Match::Source => 7,
            Match::AudioCodec => 3,
            Match::Resolution | Match::VideoCodec => 2,
            Match::HearingImpaired => 1,
            _ => 0,
        },
        VideoKind::Movie | VideoKind::Unknown => match m {
            Match::Hash => 119,
            Match::Title => 60,
            Match::Year => 30,
            Match::ReleaseGroup => 15,
            Match::Source => 7,
            Match::AudioCodec => 3,
            Match::Resolution | Match::VideoCodec => 2,
            Match::HearingImpaired => 1,
            _ => 0,
        },
    }
}

/// Score of a hash match, the strongest practical matcher
pub fn hash_score(kind: VideoKind) -> u32 {
    weight(kind, Match::Hash)
}

/// Minimum acceptable score: `hash_score * percentage / 100`
pub fn min_score(kind: VideoKind, percentage: u32) -> f64 {
    f64::from(hash_score(kind)) * f64::from(percentage) / 100.0
}

/// Total score of a set of matches against a video
pub fn compute_score(matches: &BTreeSet<Match>, video: &Video) -> u32 {
    if matches.contains(&Match::Hash) {
        return hash_score(video.kind);
    }

    let mut matches = matches.clone();
    match video.kind {
        VideoKind::Episode => {
            if matches.contains(&Match::ImdbId) {
                matches.extend([Match::Series, Match::Year, Match::Season, Match::Episode]);
            }
            if matches.contains(&Match::SeriesImdbId) {
                matches.extend([Match::Series, Match::Year]);
            }
        }
        VideoKind::Movie => {
            if matches.contains(&Match::ImdbId) {
                matches.extend([Match::Title, Match::Year]);
            }
        }
        VideoKind::Unknown => {}
    }

    matches.iter().map(|m| weight(video.kind, *m)).sum()
}

/// Matches between a video and a parsed release name
pub fn guess_matches(video: &Video, guess: &ReleaseGuess) -> BTreeSet<Match> {
    let mut matches = BTreeSet::new();

    match video.kind {
        VideoKind::Episode => {
            if same_title(video.series.as_deref(), guess.series.as_deref()) {
                matches.insert(Match::Series);
            }
            if video.season.is_some() && video.season == guess.season {
                matches.insert(Match::Season);
            }
            if video.episode.is_some() && video.episode == guess.episode {
                matches.insert(Match::Episode);
            }
            if same_title(video.title.as_deref(), guess.title.as_deref()) {
                matches.insert(Match::Title);
            }
            // Series without a year in their name match an unspecified year
            if video.year == guess.year {
                matches.insert(Match::Year);
            }
        }
        VideoKind::Movie | VideoKind::Unknown => {
            if same_title(video.title.as_deref(), guess.title.as_deref()) {
                matches.insert(Match::Title);
            }
            if video.year.is_some() && video.year == guess.year {
                matches.insert(Match::Year);
            }
        }
    }

    if same_token(video.release_group.as_deref(), guess.release_group.as_deref()) {
        matches.insert(Match::ReleaseGroup);
    }
    if same_token(video.source.as_deref(), guess.source.as_deref()) {
        matches.insert(Match::Source);
    }
    if same_token(video.resolution.as_deref(), guess.resolution.as_deref()) {
        matches.insert(Match::Resolution);
    }
    if same_token(video.video_codec.as_deref(), guess.video_codec.as_deref()) {
        matches.insert(Match::VideoCodec);
    }
    if same_token(video.audio_codec.as_deref(), guess.audio_codec.as_deref()) {
        matches.insert(Match::AudioCodec);
    }

    matches
}

fn same_title(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => normalize_title(a) == normalize_title(b),
        _ => false,
    }
}

fn same_token(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::filename_parser::guess_release;

    #[test]
    fn test_hash_match_wins_outright() {
        let video = Video::from_name("/tv/The.Big.Bang.Theory.S05E18.HDTV.x264-LOL.mp4");
        let matches = BTreeSet::from([Match::Hash, Match::Series, Match::ReleaseGroup]);
        assert_eq!(compute_score(&matches, &video), 359);
    }

    #[test]
    fn test_imdb_id_implies_title_and_year() {
        let video = Video::from_name("/movies/Man.of.Steel.2013.720p.BluRay.x264-Felony.mkv");
        let matches = BTreeSet::from([Match::ImdbId, Match::Resolution]);
        assert_eq!(compute_score(&matches, &video), 60 + 30 + 2);
    }

    #[test]
    fn test_guess_matches_episode_release() {
        let video = Video::from_name("/tv/The.Big.Bang.Theory.S05E18.720p.HDTV.x264-DIMENSION.mkv");
        let guess = guess_release("The.Big.Bang.Theory.S05E18.HDTV.x264-LOL");
        let matches = guess_matches(&video, &guess);

        assert!(matches.contains(&Match::Series));
        assert!(matches.contains(&Match::Season));
        assert!(matches.contains(&Match::Episode));
        assert!(matches.contains(&Match::Source));
        assert!(matches.contains(&Match::VideoCodec));
        assert!(!matches.contains(&Match::ReleaseGroup));
        assert!(!matches.contains(&Match::Resolution));
    }

    #[test]
    fn test_min_score() {
        assert_eq!(min_score(VideoKind::Movie, 50), 59.5);
        assert_eq!(min_score(VideoKind::Episode, 100), 359.0);
    }
}
