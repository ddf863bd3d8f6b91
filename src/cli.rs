use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::crypto::keys::DigestAlgorithm;
use crate::middleware::rate_limit::parse_window;

/// keygate: token auth, quota and envelope encryption for JSON APIs
#[derive(Parser)]
#[command(name = "keygate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (defaults to KEYGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage access tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Client-side envelope helpers
    Envelope {
        #[command(subcommand)]
        command: EnvelopeCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Provision a token with a fresh key pair
    Create {
        #[arg(long, default_value = "cli")]
        user_id: String,
        /// Skip quota accounting entirely
        #[arg(long)]
        unlimited: bool,
        /// Calls per window (defaults to KEYGATE_DEFAULT_API_LIMIT)
        #[arg(long)]
        limit: Option<i64>,
        /// Window length, e.g. 30s, 15m, 1h, 1d (defaults to KEYGATE_DEFAULT_WINDOW_SECS)
        #[arg(long, value_parser = window_arg)]
        window: Option<i64>,
        /// RSA modulus size (defaults to KEYGATE_KEY_BITS)
        #[arg(long)]
        bits: Option<usize>,
    },
    /// Deactivate a token. Records are never deleted.
    Revoke {
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum EnvelopeCommands {
    /// Encrypt a JSON document for a token's public key
    Seal {
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        json: String,
    },
    /// Check a signed response against a token's public key
    Verify {
        #[arg(long)]
        public_key: PathBuf,
        /// The `{"signature": .., "data": ..}` document
        #[arg(long)]
        signed: String,
        #[arg(long, default_value = "sha512", value_parser = digest_arg)]
        digest: DigestAlgorithm,
    },
}

fn window_arg(s: &str) -> Result<i64, String> {
    parse_window(s).ok_or_else(|| {
        format!(
            "invalid window '{}', expected e.g. 60, 30s, 15m, 1h, 1d (at most 3650d)",
            s
        )
    })
}

fn digest_arg(s: &str) -> Result<DigestAlgorithm, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_token_create() {
        let cli = Cli::try_parse_from([
            "keygate", "token", "create", "--user-id", "u1", "--limit", "10", "--window", "1h",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Token {
                command:
                    TokenCommands::Create {
                        user_id,
                        unlimited,
                        limit,
                        window,
                        bits,
                    },
            }) => {
                assert_eq!(user_id, "u1");
                assert!(!unlimited);
                assert_eq!(limit, Some(10));
                assert_eq!(window, Some(3600));
                assert_eq!(bits, None);
            }
            _ => panic!("expected token create"),
        }
    }

    #[test]
    fn test_rejects_bad_window() {
        assert!(Cli::try_parse_from(["keygate", "token", "create", "--window", "soon"]).is_err());
        assert!(Cli::try_parse_from(["keygate", "token", "create", "--window", "4000d"]).is_err());
    }

    #[test]
    fn test_verify_digest_default() {
        let cli = Cli::try_parse_from([
            "keygate", "envelope", "verify", "--public-key", "k.pem", "--signed", "{}",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Envelope {
                command: EnvelopeCommands::Verify { digest, .. },
            }) => assert_eq!(digest, DigestAlgorithm::Sha512),
            _ => panic!("expected envelope verify"),
        }
    }
}
