use clap::Parser;
use tracing_subscriber::EnvFilter;

use mrd_standalone::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let report = mrd_standalone::run(args).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
