//! Minimal CLI parsing

use std::env;
use std::path::PathBuf;

use anyhow::{Result, bail};

pub const USAGE: &str = "\
Usage: mediathek-dl [--config-check] <command>

Commands:
  run                                          Process enabled subscriptions and download
  dry-run                                      Print the resolved jobs as JSON
  adopt <subscription>                         Print adoption candidates as JSON
  adopt-set <subscription> <file> <api-id> [url]
                                               Map a local file to a catalog item
  daemon                                       Run on SEARCH_SCHEDULE
  strm-cleanup                                 Delete .strm files with dead links

<subscription> is the subscription id or its exact name.";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Run,
    DryRun,
    Adopt {
        subscription: String,
    },
    AdoptSet {
        subscription: String,
        file: PathBuf,
        api_id: String,
        video_url: Option<String>,
    },
    Daemon,
    StrmCleanup,
    Help,
}

#[derive(Debug, Default)]
pub struct CliOptions {
    pub command: Command,
    pub config_check: bool,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = CliOptions::default();
        let mut positional = Vec::new();

        for arg in args {
            match arg.as_str() {
                "--config-check" => options.config_check = true,
                "-h" | "--help" => options.command = Command::Help,
                _ if arg.starts_with("--") => bail!("Unknown option '{}'", arg),
                _ => positional.push(arg),
            }
        }

        if options.command == Command::Help {
            return Ok(options);
        }

        let mut positional = positional.into_iter();
        let Some(name) = positional.next() else {
            return Ok(options);
        };

        options.command = match name.as_str() {
            "run" => Command::Run,
            "dry-run" => Command::DryRun,
            "daemon" => Command::Daemon,
            "strm-cleanup" => Command::StrmCleanup,
            "help" => Command::Help,
            "adopt" => Command::Adopt {
                subscription: required(positional.next(), "adopt", "<subscription>")?,
            },
            "adopt-set" => Command::AdoptSet {
                subscription: required(positional.next(), "adopt-set", "<subscription>")?,
                file: PathBuf::from(required(positional.next(), "adopt-set", "<file>")?),
                api_id: required(positional.next(), "adopt-set", "<api-id>")?,
                video_url: positional.next(),
            },
            other => bail!("Unknown command '{}'", other),
        };

        if let Some(extra) = positional.next() {
            bail!("Unexpected argument '{}'", extra);
        }

        Ok(options)
    }
}

fn required(value: Option<String>, command: &str, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("'{}' requires {}", command, name),
    }
}
