//! Command-line interface of the cluster supervisor.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use clusterd_config::Config;

use crate::node::{NodeArgs, NodeError};

/// Command-line interface for the cluster supervisor.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "clusterd", disable_version_flag = true)]
pub struct Cli {
    /// Run in foreground.
    #[arg(short = 'f')]
    pub foreground: bool,
    /// Increase debug mode level; repeat for more detail.
    #[arg(short = 'd', action = ArgAction::Count)]
    pub debug_level: u8,
    /// Print version and exit.
    #[arg(short = 'V')]
    pub version: bool,
    /// Run as root.
    #[arg(short = 'r')]
    pub root: bool,
    /// Test configuration and exit.
    #[arg(short = 't')]
    pub test_config: bool,
    /// Configuration file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Payload size for the performance test.
    #[arg(long = "performance_test", hide = true, allow_negative_numbers = true)]
    pub performance_test: Option<i64>,
    /// Request count for the concurrency test.
    #[arg(long = "concurrency_test", hide = true, allow_negative_numbers = true)]
    pub concurrency_test: Option<i64>,
    /// Size of a string to send to the master.
    #[arg(long = "string", hide = true, allow_negative_numbers = true)]
    pub send_string: Option<i64>,
    /// File to send to the master.
    #[arg(long = "file", hide = true)]
    pub send_file: Option<String>,
}

impl Cli {
    /// Configuration path, defaulting to the installed location.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Harness parameters handed to the node components, rejected when a
    /// payload would not fit in one frame.
    pub fn node_args(&self) -> Result<NodeArgs, NodeError> {
        let args = NodeArgs {
            performance_test: self.performance_test,
            concurrency_test: self.concurrency_test,
            send_string: self.send_string,
            send_file: self.send_file.clone(),
        };
        args.validate()?;
        Ok(args)
    }
}

/// Text printed by `-V`.
#[must_use]
pub fn version_banner() -> String {
    format!(
        "\nWazuh {} - Wazuh Inc\n\nThis program is free software; you can redistribute it and/or modify\n\
         it under the terms of the GNU General Public License (version 2) as \npublished by the \
         Free Software Foundation. For more details, go to \nhttps://www.gnu.org/licenses/gpl.html\n",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("clusterd").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn no_arguments_yield_defaults() {
        let cli = parse(&[]);
        assert_eq!(cli, Cli::default());
        assert_eq!(cli.config_path(), Config::default_path());
    }

    #[rstest]
    #[case(&["-d"], 1)]
    #[case(&["-dd"], 2)]
    #[case(&["-d", "-d", "-d"], 3)]
    fn debug_flag_counts(#[case] args: &[&str], #[case] expected: u8) {
        assert_eq!(parse(args).debug_level, expected);
    }

    #[test]
    fn short_flags_combine() {
        let cli = parse(&["-fr", "-t", "-c", "/tmp/cluster.toml"]);
        assert!(cli.foreground && cli.root && cli.test_config);
        assert!(!cli.version);
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/cluster.toml"));
    }

    #[test]
    fn hidden_harness_options_become_node_args() {
        let cli = parse(&[
            "--performance_test",
            "100",
            "--concurrency_test",
            "3",
            "--string",
            "12",
            "--file",
            "payload.txt",
        ]);
        assert_eq!(
            cli.node_args().expect("sizes fit in a frame"),
            NodeArgs {
                performance_test: Some(100),
                concurrency_test: Some(3),
                send_string: Some(12),
                send_file: Some("payload.txt".to_owned()),
            }
        );
    }

    #[rstest]
    #[case::performance("--performance_test", "performance_test")]
    #[case::string("--string", "string")]
    fn oversized_payloads_are_rejected(#[case] flag: &str, #[case] option: &str) {
        let too_big = (crate::node::MAX_HARNESS_PAYLOAD_BYTES + 1).to_string();
        let error = parse(&[flag, too_big.as_str()])
            .node_args()
            .expect_err("payload cannot fit in one frame");
        assert!(
            matches!(&error, NodeError::HarnessPayload { option: seen, .. } if *seen == option),
            "unexpected error {error:?}"
        );
    }

    #[test]
    fn largest_payload_is_accepted() {
        let largest = crate::node::MAX_HARNESS_PAYLOAD_BYTES.to_string();
        let args = parse(&["--performance_test", largest.as_str()])
            .node_args()
            .expect("largest payload fits");
        assert_eq!(
            args.performance_test,
            Some(crate::node::MAX_HARNESS_PAYLOAD_BYTES)
        );
    }

    #[test]
    fn version_banner_names_the_release() {
        let banner = version_banner();
        assert!(banner.starts_with(&format!("\nWazuh {} - Wazuh Inc\n", env!("CARGO_PKG_VERSION"))));
        assert!(banner.ends_with("https://www.gnu.org/licenses/gpl.html\n"));
    }
}
