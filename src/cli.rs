//! Minimal CLI parsing for one-shot runs and job listing.

use std::env;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Job definitions file, overriding `JOBS_FILE`
    pub jobs_file: Option<String>,
    /// Run this definition once and exit
    pub run_job: Option<String>,
    /// Print the metadata of every job kind and exit
    pub list: bool,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--list" => options.list = true,
                "--jobs" => options.jobs_file = args.next(),
                "--run" => options.run_job = args.next(),
                _ if arg.starts_with("--jobs=") => {
                    options.jobs_file = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ if arg.starts_with("--run=") => {
                    options.run_job = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ => {}
            }
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliOptions {
        CliOptions::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse(&[]), CliOptions::default());
        assert_eq!(
            parse(&["--jobs", "jobs.yaml", "--run=nightly"]),
            CliOptions {
                jobs_file: Some("jobs.yaml".to_string()),
                run_job: Some("nightly".to_string()),
                list: false,
            }
        );
        assert!(parse(&["--list", "--unknown"]).list);
    }
}
