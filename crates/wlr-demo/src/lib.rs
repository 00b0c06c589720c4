//! wlr-demo - CLI for the wallet link relay
//!
//! - `simulate`: full handshake and signing flow against an in-process wallet
//! - `host`: open a session on a real bridge and wait for a wallet to link
//! - `reset`: forget the stored session
//! - `init-config`: write a default configuration file

pub mod cli;
pub mod commands;
pub mod config;

pub use cli::Cli;
pub use config::{CliOverrides, Config};

use wlr_core::SignerError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Handshake failed - the wallet refused or answered with a failure
/// - 3: Timeout
/// - 4: Connection failed - bridge unreachable or session rejected
/// - 5: Invalid input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    HandshakeFailed = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::HandshakeFailed => "HANDSHAKE_FAILED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
        }
    }
}

impl From<&SignerError> for ExitCode {
    fn from(e: &SignerError) -> Self {
        match e {
            SignerError::Protocol(_) | SignerError::Rpc(_) | SignerError::Unauthorized => {
                ExitCode::HandshakeFailed
            }
            SignerError::Timeout => ExitCode::Timeout,
            SignerError::Transport(_) | SignerError::Disconnected(_) => ExitCode::ConnectionFailed,
            SignerError::InvalidState(_) | SignerError::Decode(_) => ExitCode::InvalidInput,
            _ => ExitCode::GeneralError,
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use wlr_proto::RpcError;
    use wlr_transport::TransportError;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::HandshakeFailed as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
    }

    #[test]
    fn test_signer_error_mapping() {
        let rejected = SignerError::Rpc(RpcError::user_rejected());
        assert_eq!(ExitCode::from(&rejected), ExitCode::HandshakeFailed);
        assert_eq!(ExitCode::from(&SignerError::Timeout), ExitCode::Timeout);
        let lost = SignerError::Transport(TransportError::Disconnected);
        assert_eq!(ExitCode::from(&lost), ExitCode::ConnectionFailed);
        assert_eq!(ExitCode::from(&SignerError::Cancelled).name(), "GENERAL_ERROR");
    }
}
