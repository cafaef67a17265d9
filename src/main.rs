//! colcache
//!
//! Command-line client for a shared columnlet cache: fetch one columnlet,
//! inspect the coordinator header, or drain pending miss reports.
//!
//! ```text
//! colcache --config reader.yaml get --file-id 7 --row-group 2 --column 5
//! colcache --config reader.yaml inspect
//! colcache --config reader.yaml misses --limit 100
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use prometheus::Registry;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use columnlet_cache::cache::{
    encode_text, CacheReader, CacheReaderBuilder, CacheReaderConfig, ColumnletKey, MappedRegion,
    ReadCoordinator, ReadOutcome, ReaderMetrics,
};
use columnlet_cache::error::{Error, Result};
use columnlet_cache::mq::MappedBusReader;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Columnlet cache reader
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reader configuration (YAML)
    #[arg(long, env = "COLCACHE_CONFIG", default_value = "colcache.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print read-path metrics to stderr on exit
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one columnlet and write its bytes to stdout
    Get {
        #[arg(long)]
        file_id: u64,
        #[arg(long)]
        row_group: u16,
        #[arg(long)]
        column: u16,
        /// Print the payload as hex instead of raw bytes
        #[arg(long)]
        hex: bool,
    },
    /// Print the coordinator header as JSON
    Inspect,
    /// Drain pending miss reports from the mapped bus
    Misses {
        /// Maximum records to print
        #[arg(long, default_value = "1000")]
        limit: usize,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = CacheReaderConfig::from_yaml_file(&args.config)?;
    info!(config = ?args.config, format = %config.format, "loaded configuration");

    let registry = Registry::new();
    let metrics = ReaderMetrics::new();
    if args.metrics {
        metrics.register(&registry)?;
    }

    match args.command {
        Command::Get {
            file_id,
            row_group,
            column,
            hex,
        } => {
            let key = ColumnletKey::new(file_id, row_group, column);
            let reader = reader_builder(&config).metrics(metrics).build()?;
            run_get(&reader, &key, hex)?;
        }
        Command::Inspect => run_inspect(&config)?,
        Command::Misses { limit } => run_misses(&config, limit)?,
    }

    if args.metrics {
        eprint!("{}", encode_text(&registry)?);
    }
    Ok(())
}

/// Builder for one-shot commands; they never truncate the shared miss bus.
fn reader_builder(config: &CacheReaderConfig) -> CacheReaderBuilder {
    CacheReaderBuilder::from_config(config).mq_append(true)
}

fn run_get(reader: &CacheReader, key: &ColumnletKey, hex: bool) -> Result<()> {
    let bytes = match reader.read(key) {
        ReadOutcome::Hit(bytes) => bytes,
        ReadOutcome::Miss => {
            eprintln!("{key}: not cached");
            return Ok(());
        }
        ReadOutcome::Unavailable(reason) => {
            eprintln!("{key}: unavailable ({reason})");
            return Ok(());
        }
    };

    let mut stdout = std::io::stdout().lock();
    if hex {
        writeln!(stdout, "{}", to_hex(&bytes))?;
    } else {
        stdout.write_all(&bytes)?;
    }
    stdout.flush()?;
    Ok(())
}

fn run_inspect(config: &CacheReaderConfig) -> Result<()> {
    let region = Arc::new(MappedRegion::open(&config.index.path, config.index.size)?);
    let coordinator = ReadCoordinator::new(region)?;
    let report = serde_json::json!({
        "index": config.index.path,
        "index_size": config.index.size,
        "content": config.content.path,
        "content_size": config.content.size,
        "format": config.format,
        "coordinator": coordinator.state(),
    });
    let text = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Config(format!("cannot render report: {e}")))?;
    println!("{text}");
    Ok(())
}

fn run_misses(config: &CacheReaderConfig, limit: usize) -> Result<()> {
    let mq = config
        .miss_channel
        .as_ref()
        .ok_or_else(|| Error::Config("no miss channel configured".into()))?;
    let mut bus = MappedBusReader::open(&mq.path, mq.file_size, mq.record_size)?;

    for record in bus.drain(limit) {
        match ColumnletKey::from_bytes(&record) {
            Some(key) => println!("{key}"),
            None => println!("{}", to_hex(&record)),
        }
    }
    info!(position = bus.position(), "drained miss bus");
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so payload bytes on stdout stay clean.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use columnlet_cache::cache::{IndexBuilder, MissChannelConfig, RegionConfig};
    use columnlet_cache::mq::{MappedBusWriter, MissChannel};

    fn config(dir: &std::path::Path) -> CacheReaderConfig {
        CacheReaderConfig {
            index: RegionConfig {
                path: dir.join("index"),
                size: 4096,
            },
            content: RegionConfig {
                path: dir.join("content"),
                size: 4096,
            },
            miss_channel: Some(MissChannelConfig {
                path: dir.join("misses"),
                file_size: 4096,
                record_size: 16,
                append: false,
            }),
            format: Default::default(),
        }
    }

    #[test]
    fn test_get_keeps_pending_misses() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mq = config.miss_channel.clone().unwrap();

        let pending = ColumnletKey::new(1, 1, 1);
        let bus = MappedBusWriter::open(&mq.path, mq.file_size, mq.record_size, false).unwrap();
        bus.report(&pending).unwrap();

        let reader = reader_builder(&config).build().unwrap();
        IndexBuilder::new(config.format)
            .publish(reader.index().region())
            .unwrap();
        let missing = ColumnletKey::new(2, 2, 2);
        assert_eq!(reader.read(&missing), ReadOutcome::Miss);

        let mut drained = MappedBusReader::open(&mq.path, mq.file_size, mq.record_size).unwrap();
        let records = drained.drain(10);
        assert_eq!(
            records,
            vec![pending.to_bytes().to_vec(), missing.to_bytes().to_vec()]
        );
    }
}
