//! Command-line interface definitions for Kindle Digest.
//!
//! Mail credentials are usually supplied through the environment so they
//! stay out of shell history.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Kindle Digest application.
///
/// # Examples
///
/// ```sh
/// # Build documents with the built-in sources and mail them
/// DIGEST_FROM=me@example.com DIGEST_PASSWORD=... DIGEST_TO=me@kindle.com kindle_digest
///
/// # Custom sources, keep everything local
/// kindle_digest --config sources.yaml --out-dir /tmp/digest --no-send
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML file with sources, mail and converter settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory receiving documents, images and the archive
    #[arg(short, long, default_value = "./out")]
    pub out_dir: PathBuf,

    /// Dedup ledger file, kept across runs
    #[arg(short, long, default_value = "./ledger.json")]
    pub ledger: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Sender address (also the SMTP login)
    #[arg(long, env = "DIGEST_FROM")]
    pub from: Option<String>,

    /// SMTP password of the sender
    #[arg(long, env = "DIGEST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Recipient address
    #[arg(long, env = "DIGEST_TO")]
    pub to: Option<String>,

    /// SMTP relay; defaults to `smtp.<sender domain>`
    #[arg(long, env = "DIGEST_SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// Build and archive documents but do not mail or clean them up
    #[arg(long)]
    pub no_send: bool,
}
