//! Command-line interface handling for the Sentinel background host.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// Every option overrides the matching configuration file setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Force debug logging
    pub debug: bool,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list; the first item is the binary name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::from_matches(&command().try_get_matches_from(args)?))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("config.toml"),
            ),
            bind_address: matches.get_one::<String>("bind").cloned(),
            debug: matches.get_flag("debug"),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("Sentinel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Background messaging host for the Sentinel ad blocker")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:8090)"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
}
