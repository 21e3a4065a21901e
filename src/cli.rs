use anyhow::{bail, Result};
use std::str::FromStr;

/// One line typed in interactive mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Start(String),
    Pause(String),
    Resume(String),
    Cancel(String),
    Status(Option<String>),
    Check(String),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  start <url>    begin downloading
  pause <url>    pause, keeping what was received
  resume <url>   continue a paused download
  cancel <url>   stop and forget a download
  status [url]   show one or all tracked downloads
  check <url>    is the file already stored locally?
  help           this text
  quit           cancel everything and exit";

impl FromStr for Request {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let url = parts.next().map(str::to_string);
        if parts.next().is_some() {
            bail!("too many arguments: {}", line.trim());
        }

        let with_url = |make: fn(String) -> Request| -> Result<Request> {
            match &url {
                Some(url) => Ok(make(url.clone())),
                None => bail!("'{}' needs a url", verb),
            }
        };

        match verb.as_str() {
            "start" => with_url(Request::Start),
            "pause" => with_url(Request::Pause),
            "resume" => with_url(Request::Resume),
            "cancel" => with_url(Request::Cancel),
            "check" => with_url(Request::Check),
            "status" => Ok(Request::Status(url)),
            "help" | "?" => Ok(Request::Help),
            "quit" | "exit" => Ok(Request::Quit),
            "" => bail!("empty command"),
            other => bail!("unknown command '{}' (try 'help')", other),
        }
    }
}
