//! # The Command-Line Arguments
//!
//! Grounded on `examples/original_source/main.go`'s `parseArgs`: recognized
//! flags (`--dir`, `--dbfilename`) accept either `--flag value` or
//! `--flag=value` form, a flag with no following value is a hard error, and
//! any unrecognized flag is silently ignored rather than rejected. `clap`'s
//! derive parser rejects unknown flags by default, so recognized flags are
//! pre-filtered out of `env::args()` before handing them to `clap`.

use crate::constants::{DEFAULT_DBFILENAME, DEFAULT_DIR};
use crate::errors::ApplicationError;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "respdb")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Snapshot directory.
    #[arg(long, default_value_t = DEFAULT_DIR.to_string())]
    pub dir: String,

    /// Snapshot file name.
    #[arg(long, default_value_t = DEFAULT_DBFILENAME.to_string())]
    pub dbfilename: String,
}

impl Args {
    /// Parses `std::env::args()`, dropping any flag that isn't `--dir` or
    /// `--dbfilename` before clap ever sees it.
    pub fn parse_ignoring_unknown() -> Result<Self, ApplicationError> {
        let raw: Vec<String> = std::env::args().skip(1).collect();
        Self::parse_from_filtered(&raw)
    }

    fn parse_from_filtered(raw: &[String]) -> Result<Self, ApplicationError> {
        let filtered = filter_recognized(raw)?;
        let mut argv = vec!["respdb".to_string()];
        argv.extend(filtered);
        Ok(Self::parse_from(argv))
    }
}

fn filter_recognized(raw: &[String]) -> Result<Vec<String>, ApplicationError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let token = &raw[i];
        let (flag, inline_value) = match token.split_once('=') {
            Some((f, v)) => (f.to_ascii_lowercase(), Some(v.to_string())),
            None => (token.to_ascii_lowercase(), None),
        };

        if flag == "--dir" || flag == "--dbfilename" {
            match inline_value {
                Some(value) => out.push(format!("{flag}={value}")),
                None => {
                    i += 1;
                    let value = raw
                        .get(i)
                        .ok_or_else(|| anyhow::anyhow!("{flag} requires an argument"))?;
                    out.push(flag);
                    out.push(value.clone());
                }
            }
        }
        i += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_flags_pass_through_in_equals_form() {
        let raw = vec!["--dir=/tmp/x".to_string(), "--dbfilename=snap.rdb".to_string()];
        let args = Args::parse_from_filtered(&raw).unwrap();
        assert_eq!(args.dir, "/tmp/x");
        assert_eq!(args.dbfilename, "snap.rdb");
    }

    #[test]
    fn recognized_flags_pass_through_in_space_form() {
        let raw = vec!["--dir".to_string(), "/tmp/y".to_string()];
        let args = Args::parse_from_filtered(&raw).unwrap();
        assert_eq!(args.dir, "/tmp/y");
        assert_eq!(args.dbfilename, DEFAULT_DBFILENAME);
    }

    #[test]
    fn unrecognized_flags_are_ignored() {
        let raw = vec!["--whatever".to_string(), "--dir".to_string(), "/tmp/z".to_string()];
        let args = Args::parse_from_filtered(&raw).unwrap();
        assert_eq!(args.dir, "/tmp/z");
    }

    #[test]
    fn missing_value_is_an_error() {
        let raw = vec!["--dir".to_string()];
        assert!(Args::parse_from_filtered(&raw).is_err());
    }

    #[test]
    fn defaults_apply_when_no_flags_given() {
        let args = Args::parse_from_filtered(&[]).unwrap();
        assert_eq!(args.dir, DEFAULT_DIR);
        assert_eq!(args.dbfilename, DEFAULT_DBFILENAME);
    }
}
