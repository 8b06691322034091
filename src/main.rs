//! blobfs: command-line access to a blob container as a file system.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use blobfs::config::{EnvConfigSource, LayeredConfigSource};
use blobfs::{cli, Args, FileSystemRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging; logs go to stderr so command output stays clean
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Command line beats environment
    let source = LayeredConfigSource::new()
        .layer(args.config_overrides())
        .layer(EnvConfigSource::default());

    let registry = FileSystemRegistry::new();
    let fs = registry.from_source(&source).await?;

    let mut stdout = std::io::stdout();
    cli::run(args.command, &fs, &mut stdout).await?;
    Ok(())
}
