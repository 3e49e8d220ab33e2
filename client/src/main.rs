use anyhow::Context;
use clap::Parser;
use client::cli::{Args, Command, render_table};
use client::config::{self, Config};
use client::downloader::{DownloadManager, WorkerCommand};
use client::storage::Storage;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => config::default_config_path()?,
    };
    let cfg = config::load_or_create(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    config::init_tracing(&cfg.general.log_level);

    let data_dir = args.output.clone().or_else(|| cfg.general.data_dir.clone());
    let storage = Storage::new(data_dir)
        .await
        .context("failed to prepare data directory")?;

    let command = WorkerCommand::new(cfg.worker.resolve_program()).args(cfg.worker.leading_args());
    let manager = DownloadManager::new(
        storage.state_store(),
        storage.download_dir.clone(),
        command,
    );
    manager.load_from_disk().await;

    match args.command {
        Command::Start {
            content_ref,
            title,
            quality,
            watch,
        } => {
            let id = manager.start(&content_ref, &title, &quality).await;
            println!("{id}");
            if watch {
                watch_status(&manager, &cfg).await;
            }
        }
        Command::List { active } => {
            manager.refresh().await;
            let records = if active {
                manager.list_active()
            } else {
                manager.list()
            };
            print!("{}", render_table(&records));
        }
        Command::Watch => watch_status(&manager, &cfg).await,
        Command::Cancel { id } => {
            manager.cancel(&id).await;
            print_one(&manager, &id);
        }
        Command::Clear => {
            let cleared = manager.clear_completed().await;
            println!("cleared {cleared} transfer(s)");
        }
        Command::Delete { id } => {
            manager.delete(&id).await;
            println!("deleted {id}");
        }
    }
    Ok(())
}

fn print_one(manager: &DownloadManager, id: &str) {
    match manager.get(id) {
        Some(record) => print!("{}", render_table(&[record])),
        None => println!("unknown transfer {id}"),
    }
}

/// Redraws the table until nothing is active or Ctrl-C arrives.
async fn watch_status(manager: &DownloadManager, cfg: &Config) {
    let interval = cfg.status.refresh_interval();
    loop {
        manager.refresh().await;
        print!("\x1b[2J\x1b[H{}", render_table(&manager.list()));
        if manager.list_active().is_empty() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }
    // Let reader tasks finish persisting their final update.
    tokio::time::sleep(Duration::from_millis(50)).await;
}
