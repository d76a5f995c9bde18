use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use asset_store::ingest::hasher;
use asset_store::ingest::pipeline::{self, ImportOptions};
use asset_store::utils::config::{Config, DEFAULT_MAX_MEM_FILE_SIZE};
use asset_store::{AssetFilter, BlobStore, MetadataIndex};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `asset-storage/`. Defaults to the home directory.
    #[arg(long, global = true)]
    base: Option<PathBuf>,

    /// Gzip stored blobs.
    #[arg(long, global = true)]
    gzip: bool,

    /// Obfuscate stored blobs with this passphrase.
    #[arg(long, global = true)]
    xor: Option<String>,

    /// Uploads up to this size are staged in memory.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_MEM_FILE_SIZE)]
    maxmem: u64,

    /// Do not touch metadata of content that is already stored.
    #[arg(long, global = true)]
    skip_meta: bool,

    #[arg(long, global = true, default_value_t = 4)]
    workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store files and register their metadata.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Write the content of a blob to stdout or a file.
    Get {
        hash: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Ranked search, one JSON object per line.
    Search {
        #[arg(long, default_value_t = 0)]
        path_id: i64,
        #[arg(long, default_value = "")]
        media_type: String,
        #[arg(long, default_value = "")]
        file_name: String,
        #[arg(long, default_value = "")]
        path_name: String,
        /// `<hash>/<face index>`
        #[arg(long, default_value = "")]
        face: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// List the path segments below a parent.
    Paths {
        #[arg(long, default_value_t = 0)]
        parent: i64,
    },
    /// List known media types.
    MediaTypes,
    /// List collections, newest first.
    Collections {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// Record that two faces are similar.
    Face {
        hash_a: String,
        face_a: i64,
        hash_b: String,
        face_b: i64,
    },
    /// Re-hash every stored blob.
    Verify,
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .context("No --base given and no home directory found")
}

fn config_from(args: &Args) -> Result<Config> {
    let base = match &args.base {
        Some(base) => base.clone(),
        None => home_dir()?,
    };
    let mut config = Config::new(base).with_gzip(args.gzip);
    if let Some(passphrase) = &args.xor {
        config = config.with_xor_passphrase(passphrase);
    }
    config.max_mem_file_size = args.maxmem;
    config.skip_meta_if_exists = args.skip_meta;
    config.workers = args.workers;
    config.pin_transform_settings()?;
    Ok(config)
}

fn write_json_lines<T: serde::Serialize>(items: &[T]) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

fn run(args: Args) -> Result<ExitCode> {
    let config = config_from(&args)?;
    let store = Arc::new(BlobStore::from_config(&config).context("Failed to open blob store")?);
    let index = MetadataIndex::open(&config.database_path()).context("Failed to open metadata index")?;

    match args.command {
        Command::Add { paths, recursive } => {
            let options = ImportOptions {
                recursive,
                workers: config.workers,
                skip_meta_if_exists: config.skip_meta_if_exists,
                owner: pipeline::current_user(),
                show_progress: true,
            };
            let summary = pipeline::import_paths(store, &index, &paths, &options)?;
            println!("{}", serde_json::to_string(&summary)?);
            if summary.failed > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Get { hash, output } => {
            let mut reader = store.open(&hash)?;
            match output {
                Some(path) => {
                    let mut file = BufWriter::new(
                        File::create(&path).with_context(|| format!("Failed to create {:?}", path))?,
                    );
                    io::copy(&mut reader, &mut file)?;
                    file.flush()?;
                }
                None => {
                    let mut out = io::stdout().lock();
                    io::copy(&mut reader, &mut out)?;
                    out.flush()?;
                }
            }
        }
        Command::Search {
            path_id,
            media_type,
            file_name,
            path_name,
            face,
            offset,
            count,
        } => {
            let filter = AssetFilter {
                path_id,
                media_type,
                file_name,
                path_name,
                face,
                offset,
                count,
            };
            write_json_lines(&index.search(&filter)?)?;
        }
        Command::Paths { parent } => write_json_lines(&index.list_path_items(parent)?)?,
        Command::MediaTypes => write_json_lines(&index.list_media_types()?)?,
        Command::Collections { offset, count } => write_json_lines(&index.list_collections(offset, count)?)?,
        Command::Face {
            hash_a,
            face_a,
            hash_b,
            face_b,
        } => {
            let id = index.record_face_similarity(&hash_a, face_a, &hash_b, face_b)?;
            info!(id, "Recorded face similarity");
        }
        Command::Verify => {
            let report = hasher::verify_store(&store)?;
            println!("{}", serde_json::to_string(&report)?);
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
