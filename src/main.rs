use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use audiopack::{
    BulkLoader, KeyIndex, LoadObserver, LoaderConfig, NoopObserver, Pressure, SkippedRecord,
    StoreReader,
};

#[derive(Parser)]
#[command(
    name = "audiopack",
    about = "Pack keyed audio files into a single memory-mapped record store",
    version,
    long_about = "Reads a manifest of `key source_path` lines and loads every source file into \
                  a transactional store, growing the store's reserved capacity whenever it fills up."
)]
struct Cli {
    /// Set the logging level
    #[arg(short, long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Load every entry of a manifest into a store
    Load(LoadArgs),

    /// Show the header and index status of a store
    Inspect {
        /// Store directory
        store: PathBuf,

        /// Sentinel key holding the key index
        #[arg(long, default_value = audiopack::DEFAULT_INDEX_KEY)]
        index_key: String,
    },

    /// Check that every indexed key is present in the store
    Verify {
        /// Store directory
        store: PathBuf,

        /// Sentinel key holding the key index
        #[arg(long, default_value = audiopack::DEFAULT_INDEX_KEY)]
        index_key: String,
    },
}

#[derive(clap::Args)]
struct LoadArgs {
    /// Manifest of `key source_path` lines
    manifest: PathBuf,

    /// Store directory (created if missing)
    store: PathBuf,

    /// JSON file with loader settings; flags below override it
    #[arg(short, long, env = "AUDIOPACK_CONFIG")]
    config: Option<PathBuf>,

    /// Records per transaction
    #[arg(long)]
    batch_size: Option<usize>,

    /// First reserved capacity in bytes, instead of sizing from the manifest
    #[arg(long)]
    initial_capacity: Option<u64>,

    /// Give up shrinking below this many bytes
    #[arg(long)]
    shrink_floor: Option<u64>,

    /// Never reserve more than this many bytes
    #[arg(long)]
    max_capacity: Option<u64>,

    /// Sentinel key for the key index
    #[arg(long)]
    index_key: Option<String>,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,
}

impl LoadArgs {
    fn loader_config(&self) -> anyhow::Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_json_file(path)?,
            None => LoaderConfig::default(),
        };
        if let Some(batch_size) = self.batch_size {
            config = config.batch_size(batch_size);
        }
        if let Some(capacity) = self.initial_capacity {
            config = config.initial_capacity(capacity);
        }
        if let Some(floor) = self.shrink_floor {
            config = config.shrink_floor(floor);
        }
        if let Some(max) = self.max_capacity {
            config = config.max_capacity(max);
        }
        if let Some(key) = &self.index_key {
            config = config.index_key(key.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Renders load progress on a spinner-style bar sized to the manifest.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    fn new(total: u64) -> anyhow::Result<Self> {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )?
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }
}

impl LoadObserver for ProgressObserver {
    fn on_generation(&mut self, generation: u64, capacity: u64) {
        self.bar.set_position(0);
        self.bar
            .set_message(format!("generation {generation}, {}", format_bytes(capacity)));
    }

    fn on_record(&mut self, _processed: u64, _key: &str) {
        self.bar.inc(1);
    }

    fn on_skip(&mut self, record: &SkippedRecord) {
        self.bar.inc(1);
        self.bar
            .println(format!("skipped {} (line {}): {}", record.key, record.line, record.reason));
    }

    fn on_growth(&mut self, from: u64, to: u64, pressure: Pressure) {
        let cause = match pressure {
            Pressure::CapacityExhausted => "store full",
            Pressure::OutOfMemory => "address space unavailable",
        };
        self.bar.println(format!(
            "{cause}: resizing {} -> {}",
            format_bytes(from),
            format_bytes(to)
        ));
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level, &directives))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Load(args) => load(&args),
        Commands::Inspect { store, index_key } => inspect(&store, &index_key),
        Commands::Verify { store, index_key } => verify(&store, &index_key),
    }
}

/// `RUST_LOG` directives win; `--log-level` applies when none are given.
fn log_filter(level: LogLevel, directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(Level::from(level)).into())
        .parse_lossy(directives)
}

fn load(args: &LoadArgs) -> anyhow::Result<()> {
    let config = args.loader_config()?;
    let manifest = audiopack::Manifest::from_path(&args.manifest)
        .with_context(|| format!("reading manifest {}", args.manifest.display()))?;
    let loader = BulkLoader::new(config);

    let outcome = if args.no_progress {
        loader.load(&manifest, &args.store, &mut NoopObserver)
    } else {
        let mut observer = ProgressObserver::new(manifest.len() as u64)?;
        let outcome = loader.load(&manifest, &args.store, &mut observer);
        observer.bar.finish_and_clear();
        outcome
    };

    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            if let Some(committed) = err.committed_records() {
                eprintln!(
                    "load failed after committing {committed} records; \
                     the store has no key index"
                );
            }
            return Err(err).context("load aborted");
        }
    };

    println!(
        "loaded {} records into {} ({} skipped, {} generations, {} reserved, {:.2?})",
        report.records_loaded(),
        args.store.display(),
        report.skipped.len(),
        report.generations,
        format_bytes(report.reserved_capacity),
        report.elapsed
    );
    for skipped in &report.skipped {
        println!("  skipped {} ({})", skipped.key, skipped.path.display());
    }
    Ok(())
}

fn inspect(store: &Path, index_key: &str) -> anyhow::Result<()> {
    let reader = StoreReader::open(store)
        .with_context(|| format!("opening store {}", store.display()))?;
    let header = reader.header();
    println!("data file:       {}", reader.path().display());
    println!("format version:  {:#06x}", header.version);
    println!("generation:      {}", header.generation);
    println!("commits:         {}", header.sequence);
    println!("reserved:        {}", format_bytes(header.reserved_capacity));
    println!("committed bytes: {}", format_bytes(header.committed_end));
    println!("live keys:       {}", reader.len());
    match KeyIndex::read_from(&reader, index_key)? {
        Some(index) => println!("key index:       {} keys under {index_key:?}", index.len()),
        None => println!("key index:       missing (load incomplete)"),
    }
    Ok(())
}

fn verify(store: &Path, index_key: &str) -> anyhow::Result<()> {
    let reader = StoreReader::open(store)
        .with_context(|| format!("opening store {}", store.display()))?;
    let Some(index) = KeyIndex::read_from(&reader, index_key)? else {
        bail!("store {} has no key index under {index_key:?}", store.display());
    };

    let missing: Vec<&str> = index
        .keys
        .iter()
        .filter(|key| !reader.contains_key(key.as_bytes()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        for key in &missing {
            eprintln!("missing: {key}");
        }
        bail!("{} of {} indexed keys are missing", missing.len(), index.len());
    }
    println!("ok: {} indexed keys present", index.len());
    Ok(())
}

/// Format bytes to human-readable string
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}
