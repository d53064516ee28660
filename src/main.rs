//! # Kindle Digest
//!
//! Collects articles from a handful of news sites, feeds and APIs, keeps
//! only what has not been delivered before, bundles everything into
//! e-reader friendly XHTML documents and mails the bundle to a Kindle
//! address.
//!
//! ## Usage
//!
//! ```sh
//! kindle_digest --out-dir ./out --ledger ./ledger.json
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Extraction**: every source (feed, page scrape or JSON API) produces
//!    `{title, content}` candidates, all sources concurrently
//! 2. **Dedup**: feed items already recorded in the ledger are dropped
//! 3. **Images**: embedded images are downloaded into `out/images` and the
//!    content rewritten to point at them
//! 4. **Assembly**: one strict XHTML document per source (or per item)
//! 5. **Delivery**: optional conversion, zip archive, mail, then cleanup

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod assets;
mod cli;
mod config;
mod error;
mod fetch;
mod ledger;
mod models;
mod outputs;
mod pipeline;
mod queue;
mod scrapers;
mod utils;

use cli::Cli;
use error::DigestError;
use fetch::{FetchSettings, Fetcher};
use ledger::Ledger;
use outputs::mail::MailConfig;
use outputs::{archive, cleanup, convert, mail};
use pipeline::Pipeline;
use utils::{ensure_writable_dir, truncate_for_log};

/// Mail settings from the command line and the config file, if the
/// credentials are all present.
fn mail_config(args: &Cli, settings: &config::MailSettings) -> Option<MailConfig> {
    Some(MailConfig {
        from: args.from.clone()?,
        password: args.password.clone()?,
        to: args.to.clone()?,
        smtp_host: args.smtp_host.clone().or_else(|| settings.smtp_host.clone()),
        subject: settings.subject.clone(),
        body: settings.body.clone(),
    })
}

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("kindle_digest starting up");

    let args = Cli::parse();
    debug!(?args.out_dir, ?args.ledger, ?args.config, "Parsed CLI arguments");

    let app_config = config::load(args.config.as_deref()).await?;

    // Early check: the output directory must be writable before anything is fetched
    if let Err(e) = ensure_writable_dir(&args.out_dir).await {
        error!(
            path = %args.out_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }

    let ledger = Ledger::load(&args.ledger).await?;
    let fetcher = Fetcher::new(&FetchSettings {
        request_timeout: Duration::from_secs(args.timeout_secs),
        ..FetchSettings::default()
    })?;
    let pipeline = Pipeline::new(fetcher, ledger, &args.out_dir);

    // ---- Extract, dedup, localize, assemble ----
    let report = match pipeline.run(&app_config.sources).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, ledger = %args.ledger.display(), "Run aborted");
            return Err(e.into());
        }
    };

    let documents = report.documents();
    if documents.is_empty() {
        info!(
            failed = ?report.failed_sources(),
            "No new documents; nothing to deliver"
        );
        return Ok(());
    }

    // ---- Optional conversion ----
    let mut deliverables: Vec<PathBuf> = documents.clone();
    if let Some(settings) = &app_config.convert {
        if let Err(e) = convert::convert(settings, &documents).await {
            error!(
                error = %truncate_for_log(&e.to_string(), 300),
                "Conversion failed; keeping documents for inspection"
            );
            return Ok(());
        }
        if let Some(converted) = settings.outputs(&documents) {
            deliverables = converted;
        }
    }
    deliverables.extend(cleanup::walk(pipeline.assets().dir(), &[]).await?);

    // ---- Archive ----
    let archive_path = match archive::archive(&args.out_dir, deliverables).await {
        Ok(path) => path,
        Err(e) => {
            error!(error = %e, "Failed to build archive; keeping documents");
            return Ok(());
        }
    };

    if args.no_send {
        info!(archive = %archive_path.display(), "Delivery disabled; archive kept");
        return Ok(());
    }

    // ---- Delivery ----
    let Some(mail_config) = mail_config(&args, &app_config.mail) else {
        error!(
            archive = %archive_path.display(),
            "Sender, password and recipient are required to deliver; archive kept"
        );
        return Err(DigestError::Config("missing mail credentials".to_string()).into());
    };

    match mail::send_mail(&mail_config, &archive_path).await {
        Ok(()) => {
            info!(to = %mail_config.to, "Digest delivered");
            match cleanup::clean(&args.out_dir, pipeline.assets().dir()).await {
                Ok(removed) => debug!(removed, "Cleanup complete"),
                Err(e) => warn!(error = %e, "Cleanup failed"),
            }
        }
        Err(e) => {
            error!(error = %e, archive = %archive_path.display(), "Delivery failed; artifacts kept for retry");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        documents = documents.len(),
        "Execution complete"
    );

    Ok(())
}
