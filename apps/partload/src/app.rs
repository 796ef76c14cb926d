//! Runs one upload from the command line.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use partload_protocol::{Phase, ProgressSnapshot};
use partload_transfer::LocalFile;
use partload_uploader::{UploadEvent, UploadOrchestrator, UploadOutcome};

use crate::config::Config;

const USAGE: &str = "usage: partload <FILE>";

/// Parsed command line.
#[derive(Debug, PartialEq, Eq)]
pub struct Args {
    pub file: PathBuf,
}

impl Args {
    /// Parses the arguments after the program name.
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let file = args.next().context(USAGE)?;
        if file.starts_with('-') {
            anyhow::bail!("unknown option `{file}`\n{USAGE}");
        }
        if let Some(extra) = args.next() {
            anyhow::bail!("unexpected argument `{extra}`\n{USAGE}");
        }
        Ok(Self {
            file: PathBuf::from(file),
        })
    }
}

/// Formats one progress line.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let phase = match snapshot.phase {
        Phase::Checksum => "checksum",
        Phase::Upload => "upload",
    };
    match snapshot.eta_seconds {
        Some(eta) => format!(
            "{phase:>8} {:>3}% {}/{} bytes, eta {eta}s",
            snapshot.percent, snapshot.uploaded_bytes, snapshot.total_bytes
        ),
        None => format!(
            "{phase:>8} {:>3}% {}/{} bytes",
            snapshot.percent, snapshot.uploaded_bytes, snapshot.total_bytes
        ),
    }
}

/// Uploads `args.file` and prints the backend's completion payload.
pub async fn run(config: Config, args: Args) -> anyhow::Result<()> {
    if config.auth_token.is_empty() {
        tracing::warn!("no auth token configured; backend calls will likely be rejected");
    }

    let source = LocalFile::open(&args.file)
        .await
        .with_context(|| format!("cannot open {}", args.file.display()))?
        .with_buffer_size(config.upload.hash_buffer_size);

    let request = config.upload_request();
    let mut orchestrator =
        UploadOrchestrator::with_http(&config.api_endpoint, &config.auth_token, config.upload)?;
    let mut events = orchestrator
        .take_events()
        .context("event receiver already taken")?;
    let cancel = orchestrator.cancel_token();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::Progress(snapshot) => eprintln!("{}", progress_line(&snapshot)),
                UploadEvent::Completed { file_id } => {
                    tracing::debug!(file_id = %file_id, "completion event received");
                }
                UploadEvent::Failed { error } => {
                    tracing::debug!(error = %error, "failure event received");
                }
            }
        }
    });

    let outcome = {
        let upload = orchestrator.upload(Arc::new(source), request);
        tokio::pin!(upload);

        tokio::select! {
            outcome = &mut upload => outcome,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("SIGINT received, cancelling upload");
                cancel.cancel();
                upload.await
            }
        }
    };

    // Closes the event channel so the printer drains and exits.
    drop(orchestrator);
    let _ = printer.await;

    match outcome {
        UploadOutcome::Completed { response, .. } => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        UploadOutcome::Failed {
            message,
            kind,
            state,
        } => anyhow::bail!("upload failed ({kind}, during {state}): {message}"),
    }
}
