use anyhow::Result;
use clap::Parser;

use apilog::{config::load_config, init_tracing, server::start_server};

#[derive(Parser, Debug)]
#[command(name = "apilog", version, about = "HTTP API logging service")]
struct Args {
    /// Configuration file name (without extension), also overridable via
    /// APILOG__* environment variables
    #[arg(short, long, default_value = "apilog")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing();

    let config = load_config(&args.config)?;
    start_server(config).await?;

    Ok(())
}
