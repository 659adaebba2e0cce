//! Watch agent: forward new DICOM files from a directory to the configured sink.
//!
//! Each line typed on stdin selects a new directory to watch; `stop` stops
//! watching. EOF or Ctrl+C exits.

use anyhow::Result;
use clap::Parser;
use dicomwatch::{sink, Config, DicomExtractor, PipelineController, PipelineSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "dicomwatch")]
#[command(about = "Watch a directory for new DICOM files and upload them with patient metadata")]
struct Args {
    /// Directory to watch on startup (overrides agent.watch_dir)
    #[arg(long)]
    dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.agent.log_level),
    )
    .init();

    log::info!("Starting dicomwatch v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Accepting *.{} files, quiet period {:?}", config.extension(), config.debounce());

    let sink = sink::from_config(&config).await?;
    let (mut controller, mut logs) = PipelineController::new(
        PipelineSettings::from_config(&config),
        Arc::new(DicomExtractor::new()),
        sink,
    );

    // Log display
    tokio::spawn(async move {
        while let Some(line) = logs.recv().await {
            println!("{}", line);
        }
    });

    if let Some(dir) = args.dir.or_else(|| config.agent.watch_dir.clone()) {
        controller.select_directory(&dir).await?;
    } else {
        log::info!("No directory selected; enter a path to start watching");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "stop" {
                    controller.stop().await;
                    continue;
                }
                if let Err(e) = controller.select_directory(Path::new(line)).await {
                    log::error!("{}", e);
                }
            }
        }
    }

    controller.stop().await;
    log::info!("dicomwatch stopped");
    Ok(())
}
