//! Watch the Randomizer sequencer for the preview of one request

use clap::Parser;
use coinflip::{
    config::ARBITRUM_GOERLI_CHAIN_ID,
    games::{outcome::compute_coinflip, RequestId},
    preview::{randomness_from_result, PreviewClient},
    ConfigLoader,
};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "preview-watch")]
#[command(about = "Print the sequencer preview for a randomness request", long_about = None)]
struct Args {
    /// Request id to watch
    id: RequestId,

    /// Chain whose sequencer to ask
    #[arg(long, default_value_t = ARBITRUM_GOERLI_CHAIN_ID)]
    chain_id: u64,

    /// Give up after this many milliseconds (waits forever by default)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.as_str().into()),
        )
        .init();

    let client = PreviewClient::for_chain(args.chain_id, &config.preview)?;
    info!("🔭 Watching request {} on {}", args.id, client.endpoint());

    let result = match args.timeout_ms {
        Some(ms) => client.watch_with_timeout(args.id, Duration::from_millis(ms)).await,
        None => client.listen_for_preview(args.id).await,
    };
    client.shutdown().await;

    let result = result?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    match randomness_from_result(&result) {
        Ok(value) => info!("🪙 Preview flip: {}", compute_coinflip(&value)),
        Err(e) => warn!("Preview result carries no randomness: {}", e),
    }

    Ok(())
}
