//! tileblob CLI - inspect and manage blob files from the command line
//!
//! The library is the real interface; this binary wraps the bulk
//! import/export helpers and the entry iterator for scripting and debugging.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tileblob::Blob;

#[derive(Parser)]
#[command(name = "tileblob")]
#[command(about = "Append-only single-file blob store for tiled data records")]
#[command(version)]
struct Cli {
    /// Path to the blob file
    #[arg(short, long, default_value = "tiles.blob")]
    blob: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty blob file
    Create,

    /// Append the contents of a file as a new entry
    Import {
        /// File whose bytes become the payload
        source: PathBuf,
        /// Metadata record to attach (stored as opaque bytes)
        #[arg(short, long, default_value = "")]
        meta: String,
    },

    /// Export an entry's payload into its own file
    Export {
        /// Base offset of the entry
        offset: u64,
        /// Destination path
        dest: PathBuf,
    },

    /// List committed entries in append order
    List,

    /// Show file-level counters
    Stat,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create => {
            let blob = Blob::open(&cli.blob)
                .with_context(|| format!("creating {}", cli.blob.display()))?;
            println!("created {} ({} bytes)", blob.path().display(), blob.size());
        }
        Commands::Import { source, meta } => {
            let blob = Blob::open(&cli.blob)?;
            let offset = blob
                .write_from_file(&source, meta.as_bytes())
                .with_context(|| format!("importing {}", source.display()))?;
            println!("{}", offset);
        }
        Commands::Export { offset, dest } => {
            let blob = Blob::open_read_only(&cli.blob)?;
            blob.read_to_file(offset, &dest)
                .with_context(|| format!("exporting entry at {}", offset))?;
            println!("wrote {}", dest.display());
        }
        Commands::List => {
            let blob = Blob::open_read_only(&cli.blob)?;
            for entry in blob.entries() {
                let entry = entry?;
                let data_size = blob.data_size(entry.base_offset)?;
                println!(
                    "{}\t{}\t{}",
                    entry.base_offset,
                    data_size,
                    String::from_utf8_lossy(&entry.header)
                );
            }
        }
        Commands::Stat => {
            let blob = Blob::open_read_only(&cli.blob)?;
            let entries = blob.entries().filter(|e| e.is_ok()).count();
            println!("path:        {}", blob.path().display());
            println!("size:        {}", blob.size());
            println!("write count: {}", blob.write_count());
            println!("entries:     {}", entries);
        }
    }

    Ok(())
}
