//! Upload receiver: store incoming DICOM uploads and serve them back.

use anyhow::Result;
use clap::Parser;
use dicomwatch::store::UploadStore;
use dicomwatch::{receiver, Config};

#[derive(Parser, Debug)]
#[command(name = "receiver")]
#[command(about = "Receive DICOM uploads and store them with patient metadata")]
struct Args {
    /// Port to listen on (overrides receiver.port)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.agent.log_level),
    )
    .init();

    log::info!("Starting dicomwatch receiver v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Upload directory: {}", config.upload_dir().display());
    log::info!("Accepting *.{} uploads", config.extension());

    let store = UploadStore::open(config.db_path(), config.upload_dir()).await?;
    let port = args.port.unwrap_or(config.receiver.port);
    receiver::serve(store, port, config.receiver.max_upload_bytes, &config.extension()).await?;
    Ok(())
}
