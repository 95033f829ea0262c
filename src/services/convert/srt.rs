//! SubRip reader and writer

use super::{ConversionError, Cue, format_timestamp, keep_basic_tags, parse_timestamp};

pub(super) fn parse(text: &str) -> Result<Vec<Cue>, ConversionError> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let mut lines = block.lines().skip_while(|l| !l.contains("-->"));
        let Some(timing) = lines.next() else {
            continue;
        };
        let Some((start, end)) = timing.split_once("-->") else {
            continue;
        };
        // Some files carry coordinates after the end time
        let end = end.split_whitespace().next().unwrap_or_default();

        let body: Vec<&str> = lines.collect();
        cues.push(Cue {
            start_ms: parse_timestamp(start)?,
            end_ms: parse_timestamp(end)?,
            text: keep_basic_tags(body.join("\n").trim_end()),
        });
    }

    Ok(cues)
}

pub(super) fn render(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start_ms, ','),
            format_timestamp(cue.end_ms, ','),
            cue.text
        ));
    }
    out
}
