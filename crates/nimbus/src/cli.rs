//! Command-line interface for a Nimbus node.
//!
//! Every option here overrides a value from the configuration file.

use crate::config::NodeRole;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the node role
    pub role: Option<NodeRole>,
    /// Optional override for the manager bind address
    pub bind_address: Option<String>,
    /// Optional override for the manager address
    pub manager_address: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    fn command() -> Command {
        Command::new("Nimbus")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Cluster node for managing game server services")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("nimbus.toml"),
            )
            .arg(
                Arg::new("role")
                    .short('r')
                    .long("role")
                    .value_name("ROLE")
                    .help("Node role (manager, wrapper, proxy)")
                    .value_parser(clap::value_parser!(String)),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Manager bind address (e.g., 0.0.0.0:1630)"),
            )
            .arg(
                Arg::new("manager")
                    .short('m')
                    .long("manager")
                    .value_name("ADDRESS")
                    .help("Manager address to connect to (e.g., 10.0.0.2:1630)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue),
            )
    }

    /// Parses the process arguments, exiting with usage on error.
    pub fn parse() -> Self {
        match Self::try_parse_from(std::env::args_os()) {
            Ok(args) => args,
            Err(err) => err.exit(),
        }
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut command = Self::command();
        let matches = command.try_get_matches_from_mut(args)?;

        let role = match matches.get_one::<String>("role") {
            Some(role) => Some(role.parse::<NodeRole>().map_err(|message| {
                command.error(clap::error::ErrorKind::InvalidValue, message)
            })?),
            None => None,
        };

        Ok(Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("nimbus.toml")),
            role,
            bind_address: matches.get_one::<String>("bind").cloned(),
            manager_address: matches.get_one::<String>("manager").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["nimbus"]).unwrap();
        assert_eq!(args.config_path, PathBuf::from("nimbus.toml"));
        assert_eq!(args.role, None);
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides() {
        let args = CliArgs::try_parse_from([
            "nimbus",
            "-c",
            "wrapper.toml",
            "--role",
            "wrapper",
            "--manager",
            "10.0.0.2:1630",
            "-l",
            "debug",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(args.config_path, PathBuf::from("wrapper.toml"));
        assert_eq!(args.role, Some(NodeRole::Wrapper));
        assert_eq!(args.manager_address.as_deref(), Some("10.0.0.2:1630"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!(CliArgs::try_parse_from(["nimbus", "--role", "router"]).is_err());
    }
}
