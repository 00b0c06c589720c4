//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::commands;
use crate::config::Config;
use crate::ExitCode;

/// Wallet link relay demo
#[derive(Parser, Debug)]
#[command(name = "wlr-demo")]
#[command(version, about = "Wallet link relay demo - encrypted signer sessions over a bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, env = "WLR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Bridge WebSocket URL
    #[arg(long = "relay-url", global = true)]
    pub relay_url: Option<String>,

    /// Persist session state in this JSON file
    #[arg(long, global = true)]
    pub storage: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long = "request-timeout-ms", global = true)]
    pub request_timeout_ms: Option<u64>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a handshake and a few requests against a simulated wallet
    Simulate(SimulateArgs),
    /// Open a session on a bridge and wait for a wallet to link
    Host(HostArgs),
    /// Forget the stored session
    Reset,
    /// Write a default configuration file
    InitConfig {
        /// Destination; defaults to the platform config directory
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Accounts the simulated wallet holds
    #[arg(long = "account", default_value = "0x00000000000000000000000000000000000a11ce")]
    pub accounts: Vec<String>,

    /// Hex message to sign with personal_sign
    #[arg(long, default_value = "0x48656c6c6f2c20776f726c64")]
    pub message: String,

    /// Switch to this chain (hex or decimal) after the handshake
    #[arg(long)]
    pub switch_chain: Option<String>,

    /// Have the wallet reject the handshake
    #[arg(long)]
    pub reject: bool,

    /// Leave the session in storage instead of tearing it down
    #[arg(long)]
    pub keep: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HostArgs {
    /// Seconds to wait for the wallet to approve the handshake
    #[arg(long, default_value_t = 120)]
    pub wait_secs: u64,

    /// Sign this hex message once linked
    #[arg(long)]
    pub sign: Option<String>,

    /// Tear the session down before exiting
    #[arg(long)]
    pub disconnect: bool,
}

impl Cli {
    /// Execute the command with a resolved configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        match self.command {
            Commands::Simulate(args) => commands::simulate(&config, &args, self.output).await,
            Commands::Host(args) => commands::host(&config, &args, self.output).await,
            Commands::Reset => commands::reset(&config, self.output),
            Commands::InitConfig { path } => commands::init_config(&config, path, self.output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "wlr-demo",
            "--output",
            "json",
            "simulate",
            "--account",
            "0xabc",
            "--account",
            "0xdef",
            "--switch-chain",
            "0x2105",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.accounts, vec!["0xabc", "0xdef"]);
                assert_eq!(args.switch_chain.as_deref(), Some("0x2105"));
                assert!(!args.reject);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wlr-demo",
            "host",
            "--relay-url",
            "ws://localhost:9000/rpc",
            "--wait-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.relay_url.as_deref(), Some("ws://localhost:9000/rpc"));
        assert!(matches!(cli.command, Commands::Host(HostArgs { wait_secs: 5, .. })));
    }
}
