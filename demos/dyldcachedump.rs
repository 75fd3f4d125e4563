//! A small inspection tool over this crate's public API.
//!
//! Grounded in the teacher's own `crates/examples/src/bin/dyldcachedump.rs`
//! (subcache discovery + `memmap2::Mmap`) and in `dsc`'s `clap::Subcommand`
//! shape (`other_examples`), with `log`/`env_logger` wired the way
//! `object-rewrite-cli` wires them.

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dyld_cache::{ByteSource, MmapByteSource, MultiCacheCoordinator};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "dyldcachedump")]
#[command(about = "Inspect a dyld shared cache file")]
struct Cli {
    /// Allow the run to proceed even if a declared subcache is missing.
    #[arg(long, global = true)]
    allow_missing_subcaches: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every image's UUID and load address.
    Images { path: PathBuf },
    /// List the exported symbols of one image, by its index in `images`.
    Exports { path: PathBuf, image_index: usize },
}

fn open_mmap_source(path: &Path) -> std::io::Result<Option<Box<dyn ByteSource>>> {
    match File::open(path) {
        Ok(file) => {
            let mmap = unsafe { MmapByteSource::map(&file)? };
            Ok(Some(Box::new(mmap)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let path = match &cli.command {
        Commands::Images { path } => path,
        Commands::Exports { path, .. } => path,
    };

    let require_all_sub_caches = !cli.allow_missing_subcaches;
    let coordinator = match MultiCacheCoordinator::open(
        path,
        &open_mmap_source,
        require_all_sub_caches,
        false,
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to open {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    info!(
        "opened {} main mappings, {} subcaches",
        coordinator.main().mappings().len(),
        coordinator.sub_caches().count()
    );

    match cli.command {
        Commands::Images { .. } => {
            for image in coordinator.main().images_text() {
                println!(
                    "{} @ {:#x}",
                    uuid::Uuid::from_bytes(image.uuid),
                    image.load_address
                );
            }
        }
        Commands::Exports { image_index, .. } => {
            match coordinator.exported_symbols_for_image(image_index) {
                Ok(symbols) => {
                    for symbol in symbols {
                        println!("{}", symbol.name);
                    }
                }
                Err(e) => {
                    warn!("failed to enumerate exports for image {image_index}: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

