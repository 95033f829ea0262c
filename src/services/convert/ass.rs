//! SSA/ASS reader and writer
//!
//! Only the `[Events]` section is read. Written files get a single default
//! style.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ConversionError, Cue, keep_basic_tags, parse_timestamp};

static OVERRIDE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([^}]*)\}").expect("valid regex"));
static STYLE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([ibu])([01])").expect("valid regex"));
static NEUTRAL_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(/?)([ibu])>").expect("valid regex"));

const HEADER: &str = "[Script Info]
ScriptType: v4.00+
WrapStyle: 0
ScaledBorderAndShadow: yes
PlayResX: 384
PlayResY: 288

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: Default,Arial,20,&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,2,2,2,10,10,10,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
";

pub(super) fn parse(text: &str) -> Result<Vec<Cue>, ConversionError> {
    let mut in_events = false;
    let mut fields: Vec<String> = Vec::new();
    let mut cues = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_events = line.eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }

        if let Some(format) = line.strip_prefix("Format:") {
            fields = format.split(',').map(|f| f.trim().to_ascii_lowercase()).collect();
        } else if let Some(dialogue) = line.strip_prefix("Dialogue:") {
            if fields.is_empty() {
                fields = ["layer", "start", "end", "style", "name", "marginl", "marginr", "marginv", "effect", "text"]
                    .iter()
                    .map(|f| f.to_string())
                    .collect();
            }
            let values: Vec<&str> = dialogue.splitn(fields.len(), ',').collect();
            let field = |name: &str| {
                fields
                    .iter()
                    .position(|f| f == name)
                    .and_then(|i| values.get(i))
                    .map(|v| v.trim())
                    .unwrap_or_default()
            };

            cues.push(Cue {
                start_ms: parse_timestamp(field("start"))?,
                end_ms: parse_timestamp(field("end"))?,
                text: decode_markup(field("text")),
            });
        }
    }

    cues.sort_by_key(|c| c.start_ms);
    Ok(cues)
}

/// `{\i1}` style overrides become neutral tags; other overrides are dropped
fn decode_markup(text: &str) -> String {
    let with_tags = OVERRIDE_RE.replace_all(text, |caps: &regex::Captures| {
        STYLE_TAG_RE
            .captures_iter(&caps[1])
            .map(|tag| {
                if &tag[2] == "1" {
                    format!("<{}>", &tag[1])
                } else {
                    format!("</{}>", &tag[1])
                }
            })
            .collect::<String>()
    });
    let with_breaks = with_tags.replace("\\N", "\n").replace("\\n", "\n").replace("\\h", " ");
    keep_basic_tags(&with_breaks)
}

fn encode_markup(text: &str) -> String {
    let with_overrides = NEUTRAL_TAG_RE.replace_all(text, |caps: &regex::Captures| {
        let state = if caps[1].is_empty() { "1" } else { "0" };
        format!("{{\\{}{}}}", &caps[2], state)
    });
    with_overrides.replace('\n', "\\N")
}

/// ASS times use centiseconds and a single-digit hour
fn format_time(ms: u64) -> String {
    format!(
        "{}:{:02}:{:02}.{:02}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        (ms % 1000) / 10
    )
}

pub(super) fn render(cues: &[Cue]) -> String {
    let mut out = String::from(HEADER);
    for cue in cues {
        out.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            format_time(cue.start_ms),
            format_time(cue.end_ms),
            encode_markup(&cue.text)
        ));
    }
    out
}
