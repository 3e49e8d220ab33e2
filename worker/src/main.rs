use clap::Parser;
use dlm_core::WorkerMessage;
use std::io::Write;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use worker::cli::Args;
use worker::engine::LocalFileEngine;
use worker::reporter::{Reporter, Startup};
use worker::runner::{self, Outcome, RunSettings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    match run(args).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "worker failed");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Outcome> {
    let mut reporter =
        match Reporter::open(&args.state_path, &args.content_ref, std::io::stdout()).await? {
            Startup::Ready(reporter) => reporter,
            Startup::AlreadyFinished(status) => {
                tracing::info!(%status, slot = %args.state_path.display(), "slot already finished; nothing to do");
                return Ok(Outcome::Halted);
            }
        };
    tracing::info!(
        id = %reporter.record().id,
        content = %args.content_ref,
        target = %args.target_dir.display(),
        "worker started"
    );

    if let Err(err) = tokio::fs::create_dir_all(&args.target_dir).await {
        let message = format!(
            "failed to create target directory {}: {err}",
            args.target_dir.display()
        );
        return Ok(fail(&mut reporter, message).await);
    }

    let engine = match LocalFileEngine::from_content_ref(&args.content_ref) {
        Ok(engine) => engine.with_rate_limit(args.rate_limit),
        Err(err) => return Ok(fail(&mut reporter, err.to_string()).await),
    };

    let settings = RunSettings {
        connect_timeout: args.connect_timeout(),
        progress_interval: args.progress_interval(),
    };
    let outcome = runner::run(engine, args.target_dir.clone(), &mut reporter, &settings).await;
    tracing::info!(?outcome, "worker finished");
    Ok(outcome)
}

/// Reports a failure that happened before the engine could start.
async fn fail<W: Write>(reporter: &mut Reporter<W>, message: String) -> Outcome {
    tracing::warn!(error = %message, "cannot start transfer");
    if !reporter
        .emit(&WorkerMessage::Error {
            message: message.clone(),
        })
        .await
    {
        return Outcome::Halted;
    }
    Outcome::Failed(message)
}

// stderr is redirected to the transfer's log file by the manager.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .compact()
        .init();
}
