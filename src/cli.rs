//! Minimal CLI parsing for one-shot commands.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// JSON array of flight payloads to upsert
    pub import_flights: Option<PathBuf>,
    /// Stop after schema sync and alias validation
    pub validate_only: bool,
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
                "--validate-only" => options.validate_only = true,
                "--import-flights" => {
                    if let Some(value) = args.next() {
                        options.import_flights = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--import-flights=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.import_flights = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }
}
