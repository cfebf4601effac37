//! Tapedeck CLI

use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use tapedeck::storage::load_file;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Tapedeck v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: tapedeck <command> [options]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  stats     List the interactions stored in a cassette file");
        process::exit(1);
    }

    let command = &args[1];

    match command.as_str() {
        "stats" => {
            if args.len() < 3 {
                eprintln!("Usage: tapedeck stats <cassette-file>");
                process::exit(1);
            }

            let path = PathBuf::from(&args[2]);
            if let Err(err) = show_stats(&path) {
                eprintln!("Error: {err:#}");
                process::exit(1);
            }
        }
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'tapedeck' for usage information.");
            process::exit(1);
        }
    }
}

fn body_len(body: Option<&Vec<u8>>) -> String {
    body.map_or_else(|| "-".to_string(), |body| body.len().to_string())
}

fn show_stats(path: &Path) -> anyhow::Result<()> {
    let interactions =
        load_file(path).with_context(|| format!("failed to load {}", path.display()))?;

    println!("Cassette: {}", path.display());
    println!("Interactions: {}", interactions.len());
    println!();

    for (index, interaction) in interactions.iter().enumerate() {
        let request = interaction.request();
        let response = interaction.response();
        println!(
            "{:>4}  {:<7} {}  -> {}  (request body: {}, response body: {})",
            index,
            request.method,
            request.url,
            response.status,
            body_len(request.body.as_ref()),
            body_len(response.body.as_ref()),
        );
    }

    Ok(())
}
