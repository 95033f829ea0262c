//! Job definitions loaded from YAML
//!
//! ```yaml
//! jobs:
//!   - name: nightly-subtitles
//!     job: scan
//!     schedule: "0 0 3 * * *"
//!     arguments: ["/media/movies", 2, [fra, eng], utf-8, 80, [opensubtitles], {}, 4]
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// Which job a definition runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Scan,
    Report,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Report => "report",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub job: JobKind,
    /// Six-field cron expression (seconds first)
    pub schedule: String,
    /// Positional job arguments
    #[serde(default)]
    pub arguments: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct JobsFile {
    #[serde(default)]
    jobs: Vec<JobDefinition>,
}

pub fn parse_definitions(yaml: &str) -> Result<Vec<JobDefinition>> {
    let file: JobsFile = serde_yaml::from_str(yaml).context("Invalid job definitions")?;

    let mut names = BTreeSet::new();
    for definition in &file.jobs {
        if !names.insert(definition.name.as_str()) {
            bail!("Duplicate job name '{}'", definition.name);
        }
    }

    Ok(file.jobs)
}

pub fn load_definitions(path: &Path) -> Result<Vec<JobDefinition>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job definitions from {}", path.display()))?;
    parse_definitions(&yaml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_definitions() {
        let yaml = r#"
jobs:
  - name: nightly
    job: scan
    schedule: "0 0 3 * * *"
    arguments: ["/media", 2, [fra], utf-8, 80, [opensubtitles], {}, 4]
  - name: weekly-report
    job: report
    schedule: "0 0 6 * * Mon"
    arguments: ["/media", 1, "fra,eng"]
"#;
        let definitions = parse_definitions(yaml).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].job, JobKind::Scan);
        assert_eq!(definitions[0].arguments[1], json!(2));
        assert_eq!(definitions[0].arguments[2], json!(["fra"]));
        assert_eq!(definitions[1].arguments[2], json!("fra,eng"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
jobs:
  - {name: a, job: report, schedule: "0 * * * * *"}
  - {name: a, job: scan, schedule: "0 * * * * *"}
"#;
        assert!(parse_definitions(yaml).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let yaml = "jobs:\n  - {name: a, job: purge, schedule: \"0 * * * * *\"}\n";
        assert!(parse_definitions(yaml).is_err());
    }
}
