use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{ArgAction, Parser, Subcommand};

use lode_core::blockstore::PipelineOptions;
use lode_core::commands::{
    clone::{clone_store, CloneParams},
    cp::{cp, CpParams},
    downsync::{downsync, DownsyncParams},
    dump::dump,
    get::{get, GetParams},
    init::{init, InitParams},
    ls::ls,
    print::{print_store_index, print_version_index},
    prune::{prune_store, PruneParams},
    stats::{stats, StatsParams},
    upsync::{upsync, UpsyncParams},
    validate::{validate, ValidateParams},
    version_store_index::{create_version_store_index, CreateVersionStoreIndexParams},
};
use lode_core::config;
use lode_core::error::{LodeError, Result};

#[derive(Parser)]
#[command(
    name = "lode",
    version,
    about = "Content-addressed, chunk-deduplicating version sync"
)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Print per-command statistics on stderr
    #[arg(long, global = true)]
    show_stats: bool,

    /// Print elapsed time on stderr
    #[arg(long, global = true)]
    show_time: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a directory tree as a new version
    Upsync {
        /// Block store URI (fsblob://, file://, gs://, s3://, or a bare path)
        #[arg(long)]
        storage_uri: String,

        /// Directory to upload
        #[arg(long)]
        source_path: PathBuf,

        /// URI the version index (.lvi) is written to
        #[arg(long)]
        target_path: String,

        /// Also write the merged per-version store index (.lsi) here
        #[arg(long)]
        version_local_store_index_path: Option<String>,

        #[arg(long, default_value_t = config::DEFAULT_TARGET_CHUNK_SIZE)]
        target_chunk_size: u32,

        #[arg(long, default_value_t = config::DEFAULT_TARGET_BLOCK_SIZE)]
        target_block_size: u32,

        #[arg(long, default_value_t = config::DEFAULT_MAX_CHUNKS_PER_BLOCK)]
        max_chunks_per_block: u32,

        /// none, brotli[_text][_min|_max], lz4, zstd[_min|_max]
        #[arg(long, default_value = config::DEFAULT_COMPRESSION_ALGORITHM)]
        compression_algorithm: String,

        /// blake3 or blake2
        #[arg(long, default_value = config::DEFAULT_HASH_ALGORITHM)]
        hash_algorithm: String,

        #[arg(long, default_value_t = config::DEFAULT_MIN_BLOCK_USAGE_PERCENT)]
        min_block_usage_percent: u8,

        #[arg(long)]
        include_filter_regex: Option<String>,

        #[arg(long)]
        exclude_filter_regex: Option<String>,
    },

    /// Reconstruct a directory tree at a version
    Downsync {
        #[arg(long)]
        storage_uri: String,

        /// URI of the version index (.lvi) to sync to
        #[arg(long)]
        source_path: String,

        /// Directory to reconstruct
        #[arg(long)]
        target_path: PathBuf,

        /// Per-version store index (.lsi) to seed the block lookup from
        #[arg(long)]
        version_local_store_index_path: Option<String>,

        /// Local block cache directory
        #[arg(long)]
        cache_path: Option<PathBuf>,

        /// Apply recorded permissions to reconstructed assets
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        retain_permissions: bool,

        /// Re-index the target afterwards and compare with the source
        #[arg(long)]
        validate: bool,

        #[arg(long)]
        include_filter_regex: Option<String>,

        #[arg(long)]
        exclude_filter_regex: Option<String>,
    },

    /// Downsync using a persisted get-config document
    Get {
        /// URI of the get-config JSON
        #[arg(long)]
        get_config_path: String,

        #[arg(long)]
        target_path: PathBuf,

        #[arg(long)]
        cache_path: Option<PathBuf>,

        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        retain_permissions: bool,

        #[arg(long)]
        validate: bool,

        #[arg(long)]
        include_filter_regex: Option<String>,

        #[arg(long)]
        exclude_filter_regex: Option<String>,
    },

    /// Check that the store holds every chunk a version references
    Validate {
        #[arg(long)]
        storage_uri: String,

        #[arg(long)]
        version_index_path: String,
    },

    /// Show a version index
    PrintVersionIndex {
        #[arg(long)]
        version_index_path: String,

        /// One-line summary
        #[arg(long)]
        compact: bool,

        /// Include the asset table
        #[arg(long)]
        details: bool,
    },

    /// Show a store index
    PrintStoreIndex {
        #[arg(long)]
        store_index_path: String,

        #[arg(long)]
        compact: bool,

        /// Include the block table
        #[arg(long)]
        details: bool,
    },

    /// List every asset path in a version index
    Dump {
        #[arg(long)]
        version_index_path: String,

        #[arg(long)]
        details: bool,
    },

    /// List one directory level inside a version index
    Ls {
        #[arg(long)]
        version_index_path: String,

        /// Directory inside the version (defaults to the root)
        #[arg(default_value = "")]
        path: String,
    },

    /// Copy one file asset out of the store
    Cp {
        #[arg(long)]
        storage_uri: String,

        #[arg(long)]
        version_index_path: String,

        #[arg(long)]
        cache_path: Option<PathBuf>,

        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        retain_permissions: bool,

        /// Asset path inside the version index
        source_path: String,

        /// Local destination file
        target_path: PathBuf,
    },

    /// Initialize a remote store
    Init {
        #[arg(long)]
        storage_uri: String,

        #[arg(long, default_value = config::DEFAULT_HASH_ALGORITHM)]
        hash_algorithm: String,
    },

    /// Report how a version maps onto the store's blocks
    Stats {
        #[arg(long)]
        storage_uri: String,

        #[arg(long)]
        version_index_path: String,
    },

    /// Build and persist a version-local store index
    CreateVersionStoreIndex {
        #[arg(long)]
        storage_uri: String,

        /// URI of the version index (.lvi)
        #[arg(long)]
        source_path: String,

        /// URI the store index (.lsi) is written to
        #[arg(long)]
        version_local_store_index_path: String,
    },

    /// Copy versions from one store to another
    CloneStore {
        #[arg(long)]
        source_storage_uri: String,

        #[arg(long)]
        target_storage_uri: String,

        /// Working directory versions are materialised in
        #[arg(long)]
        target_path: PathBuf,

        /// File listing source version URIs, one per line
        #[arg(long)]
        source_paths: PathBuf,

        /// File listing target version URIs, one per line
        #[arg(long)]
        target_paths: PathBuf,

        /// File listing fallback zip URIs, one per line
        #[arg(long)]
        source_zip_paths: Option<PathBuf>,

        #[arg(long, default_value_t = config::DEFAULT_TARGET_BLOCK_SIZE)]
        target_block_size: u32,

        #[arg(long, default_value_t = config::DEFAULT_MAX_CHUNKS_PER_BLOCK)]
        max_chunks_per_block: u32,

        #[arg(long, default_value = config::DEFAULT_COMPRESSION_ALGORITHM)]
        compression_algorithm: String,

        #[arg(long, default_value_t = config::DEFAULT_MIN_BLOCK_USAGE_PERCENT)]
        min_block_usage_percent: u8,

        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        retain_permissions: bool,

        /// Write .lsi side-files next to the target version URIs
        #[arg(long)]
        create_version_local_store_index: bool,
    },

    /// Delete blocks no listed version references
    PruneStore {
        #[arg(long)]
        storage_uri: String,

        /// File listing version index URIs to keep, one per line
        #[arg(long)]
        source_paths: PathBuf,

        /// File listing per-version store index URIs, one per line
        #[arg(long)]
        version_local_store_index_paths: Option<PathBuf>,

        /// Refresh the per-version store indices while scanning
        #[arg(long)]
        write_version_local_store_index: bool,

        /// Report the keep count without deleting anything
        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = config::DEFAULT_HASH_ALGORITHM)]
        hash_algorithm: String,
    },
}

fn read_path_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| LodeError::Other(format!("reading list file '{}': {e}", path.display())))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Upsync {
            storage_uri,
            source_path,
            target_path,
            version_local_store_index_path,
            target_chunk_size,
            target_block_size,
            max_chunks_per_block,
            compression_algorithm,
            hash_algorithm,
            min_block_usage_percent,
            include_filter_regex,
            exclude_filter_regex,
        } => {
            let summary = upsync(&UpsyncParams {
                storage_uri,
                source_path,
                target_version_path: target_path,
                version_local_store_index_path: version_local_store_index_path.as_deref(),
                target_chunk_size: *target_chunk_size,
                target_block_size: *target_block_size,
                max_chunks_per_block: *max_chunks_per_block,
                compression_algorithm,
                hash_algorithm,
                min_block_usage_percent: *min_block_usage_percent,
                include_filter_regex: include_filter_regex.as_deref(),
                exclude_filter_regex: exclude_filter_regex.as_deref(),
                pipeline: PipelineOptions::default(),
            })?;
            if cli.show_stats {
                eprintln!(
                    "assets: {}, chunks: {}, blocks written: {}, bytes: {}",
                    summary.asset_count,
                    summary.chunk_count,
                    summary.blocks_written,
                    summary.total_asset_size
                );
            }
            Ok(())
        }

        Commands::Downsync {
            storage_uri,
            source_path,
            target_path,
            version_local_store_index_path,
            cache_path,
            retain_permissions,
            validate,
            include_filter_regex,
            exclude_filter_regex,
        } => {
            let summary = downsync(&DownsyncParams {
                storage_uri,
                source_path,
                target_path,
                version_local_store_index_path: version_local_store_index_path.as_deref(),
                cache_path: cache_path.as_deref(),
                retain_permissions: *retain_permissions,
                validate: *validate,
                include_filter_regex: include_filter_regex.as_deref(),
                exclude_filter_regex: exclude_filter_regex.as_deref(),
                pipeline: PipelineOptions::default(),
            })?;
            if cli.show_stats {
                eprintln!(
                    "added: {}, modified: {}, removed: {}",
                    summary.added_assets, summary.modified_assets, summary.removed_assets
                );
            }
            Ok(())
        }

        Commands::Get {
            get_config_path,
            target_path,
            cache_path,
            retain_permissions,
            validate,
            include_filter_regex,
            exclude_filter_regex,
        } => {
            get(&GetParams {
                get_config_path,
                target_path,
                cache_path: cache_path.as_deref(),
                retain_permissions: *retain_permissions,
                validate: *validate,
                include_filter_regex: include_filter_regex.as_deref(),
                exclude_filter_regex: exclude_filter_regex.as_deref(),
                pipeline: PipelineOptions::default(),
            })?;
            Ok(())
        }

        Commands::Validate {
            storage_uri,
            version_index_path,
        } => {
            let summary = validate(&ValidateParams {
                storage_uri,
                version_index_path,
                pipeline: PipelineOptions::default(),
            })?;
            println!(
                "{version_index_path}: OK ({} assets, {} chunks, {} blocks)",
                summary.asset_count, summary.chunk_count, summary.block_count
            );
            Ok(())
        }

        Commands::PrintVersionIndex {
            version_index_path,
            compact,
            details,
        } => {
            print!(
                "{}",
                print_version_index(version_index_path, *compact, *details)?
            );
            Ok(())
        }

        Commands::PrintStoreIndex {
            store_index_path,
            compact,
            details,
        } => {
            print!("{}", print_store_index(store_index_path, *compact, *details)?);
            Ok(())
        }

        Commands::Dump {
            version_index_path,
            details,
        } => {
            print!("{}", dump(version_index_path, *details)?);
            Ok(())
        }

        Commands::Ls {
            version_index_path,
            path,
        } => {
            print!("{}", ls(version_index_path, path)?);
            Ok(())
        }

        Commands::Cp {
            storage_uri,
            version_index_path,
            cache_path,
            retain_permissions,
            source_path,
            target_path,
        } => {
            let written = cp(&CpParams {
                storage_uri,
                version_index_path,
                source_asset_path: source_path,
                target_file_path: target_path,
                cache_path: cache_path.as_deref(),
                retain_permissions: *retain_permissions,
                pipeline: PipelineOptions::default(),
            })?;
            if cli.show_stats {
                eprintln!("{written} bytes");
            }
            Ok(())
        }

        Commands::Init {
            storage_uri,
            hash_algorithm,
        } => init(&InitParams {
            storage_uri,
            hash_algorithm,
        }),

        Commands::Stats {
            storage_uri,
            version_index_path,
        } => {
            let summary = stats(&StatsParams {
                storage_uri,
                version_index_path,
                pipeline: PipelineOptions::default(),
            })?;
            println!("Asset Count:          {}", summary.asset_count);
            println!("Chunk Count:          {}", summary.chunk_count);
            println!("Block Count:          {}", summary.block_count);
            println!("Total Asset Size:     {}", summary.total_asset_size);
            println!("Stored Chunk Count:   {}", summary.stored_chunk_count);
            println!(
                "Asset Fragmentation:  {:.1}%",
                summary.asset_fragmentation_percent
            );
            Ok(())
        }

        Commands::CreateVersionStoreIndex {
            storage_uri,
            source_path,
            version_local_store_index_path,
        } => {
            let blocks = create_version_store_index(&CreateVersionStoreIndexParams {
                storage_uri,
                version_index_path: source_path,
                version_local_store_index_path,
                pipeline: PipelineOptions::default(),
            })?;
            if cli.show_stats {
                eprintln!("{blocks} blocks");
            }
            Ok(())
        }

        Commands::CloneStore {
            source_storage_uri,
            target_storage_uri,
            target_path,
            source_paths,
            target_paths,
            source_zip_paths,
            target_block_size,
            max_chunks_per_block,
            compression_algorithm,
            min_block_usage_percent,
            retain_permissions,
            create_version_local_store_index,
        } => {
            let sources = read_path_list(source_paths)?;
            let targets = read_path_list(target_paths)?;
            let zips = source_zip_paths
                .as_deref()
                .map(read_path_list)
                .transpose()?;
            let summary = clone_store(&CloneParams {
                source_storage_uri,
                target_storage_uri,
                target_path,
                source_paths: &sources,
                target_paths: &targets,
                source_zip_paths: zips.as_deref(),
                target_block_size: *target_block_size,
                max_chunks_per_block: *max_chunks_per_block,
                compression_algorithm,
                min_block_usage_percent: *min_block_usage_percent,
                retain_permissions: *retain_permissions,
                create_version_local_store_index: *create_version_local_store_index,
                pipeline: PipelineOptions::default(),
            })?;
            if cli.show_stats {
                eprintln!(
                    "versions: {}, from zip: {}, blocks written: {}",
                    summary.versions_cloned, summary.versions_from_zip, summary.blocks_written
                );
            }
            Ok(())
        }

        Commands::PruneStore {
            storage_uri,
            source_paths,
            version_local_store_index_paths,
            write_version_local_store_index,
            dry_run,
            hash_algorithm,
        } => {
            let sources = read_path_list(source_paths)?;
            let lsis = version_local_store_index_paths
                .as_deref()
                .map(read_path_list)
                .transpose()?;
            let summary = prune_store(&PruneParams {
                storage_uri,
                source_paths: &sources,
                version_local_store_index_paths: lsis.as_deref(),
                write_version_local_store_index: *write_version_local_store_index,
                dry_run: *dry_run,
                hash_algorithm,
                pipeline: PipelineOptions::default(),
            })?;
            if summary.dry_run {
                println!("Prune would keep {} blocks", summary.kept_blocks);
            } else {
                println!(
                    "Pruned {} blocks, kept {}",
                    summary.pruned_blocks, summary.kept_blocks
                );
            }
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let started = Instant::now();
    let result = run(&cli);
    if cli.show_time {
        eprintln!("elapsed: {:.3}s", started.elapsed().as_secs_f64());
    }

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
