use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "slide-translator-rust",
    version,
    about = "Translate the text on slide images between Japanese and English"
)]
struct Cli {
    /// Slide image to translate (PNG, JPEG, ...)
    #[arg(short = 'i', long = "image")]
    image: Option<PathBuf>,

    /// Output JPEG path (default: <stem>.translated.jpg next to the input)
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Start the HTTP server on this address (e.g. 127.0.0.1:8080)
    #[arg(long = "server")]
    server: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    slide_translator_rust::logging::init(cli.verbose)?;

    if let Some(addr) = cli.server {
        return slide_translator_rust::serve(cli.read_settings.as_deref(), addr).await;
    }

    let image = cli
        .image
        .ok_or_else(|| anyhow!("--image is required unless --server is given"))?;
    let config = slide_translator_rust::Config {
        image,
        out: cli.out,
        settings_path: cli.read_settings,
    };
    let output = slide_translator_rust::run(config).await?;
    println!("{}", output);
    Ok(())
}
