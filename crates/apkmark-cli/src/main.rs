//! apkmark: APK signing block and verity tool
//!
//! Commands:
//!   locate <apk>                  - show EOCD, central directory and signing block layout
//!   put <apk> --id <id> ...       - insert a tagged value into the signing block
//!   get <apk> --id <id>           - print the first value stored under an id
//!   channel set|get <apk>         - write or read the channel number
//!   verity <apk>                  - compute the fs-verity root hash and tree
//!
//! Edits are staged: the new container is built in memory, written to a
//! temporary file next to the destination and renamed over it.

use anyhow::{Context, Result};
use apkmark_core::config::{parse_salt, ApkmarkConfig};
use apkmark_core::FileRegion;
use apkmark_verity::{build_verity_tree_with, TreeOptions};
use apkmark_zip::{
    extract_entry, has_v2_signature, insert_entry, locate, read_channel, write_channel,
    EndOfDirectoryRecord, SigningBlockRegion,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "apkmark",
    version,
    about = "Tag APK signing blocks and build fs-verity trees",
    long_about = "apkmark: insert and extract tagged values in an APK's signing block without \
                  breaking its ZIP offsets, and compute fs-verity Merkle trees"
)]
struct Cli {
    /// Path to apkmark.toml configuration file
    #[arg(long, short = 'c', env = "APKMARK_CONFIG", default_value = "apkmark.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "APKMARK_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "APKMARK_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the EOCD record, central directory and signing block entries
    Locate {
        apk: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Insert a tagged value into the signing block
    ///
    /// The new entry is placed before all existing entries, so it is the one
    /// `get` returns if the id was already present.
    Put {
        apk: PathBuf,
        /// Entry id (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_id)]
        id: u32,
        /// Value as hex digits
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        hex: Option<String>,
        /// Value as UTF-8 text
        #[arg(long)]
        text: Option<String>,
        /// Output path (default: rewrite the input)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Print the value stored under an id
    Get {
        apk: PathBuf,
        /// Entry id (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_id)]
        id: u32,
        /// Write the raw bytes to stdout instead of hex
        #[arg(long)]
        raw: bool,
    },

    /// Channel number management
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Compute the fs-verity tree of the whole file
    Verity {
        apk: PathBuf,
        /// Salt as 16 hex digits (overrides config)
        #[arg(long)]
        salt: Option<String>,
        /// Write header + tree to this file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Digest on a single thread
        #[arg(long)]
        sequential: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelAction {
    /// Tag the APK with a channel number
    Set {
        apk: PathBuf,
        #[arg(allow_hyphen_values = true)]
        channel: i32,
        /// Output path (default: rewrite the input)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Print the channel number, if any
    Get { apk: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ApkmarkConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = match cli.log_format {
        Some(format) => format,
        None if config.log.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, format);

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "apkmark starting"
    );

    match cli.command {
        Commands::Locate { apk, json } => cmd_locate(&apk, json),
        Commands::Put { apk, id, hex, text, output } => {
            let value = match (hex, text) {
                (Some(hex), _) => parse_hex(&hex)?,
                (None, Some(text)) => text.into_bytes(),
                (None, None) => anyhow::bail!("one of --hex or --text is required"),
            };
            cmd_put(&apk, id, &value, output.as_deref())
        }
        Commands::Get { apk, id, raw } => cmd_get(&apk, id, raw),
        Commands::Channel { action: ChannelAction::Set { apk, channel, output } } => {
            cmd_channel_set(&config, &apk, channel, output.as_deref())
        }
        Commands::Channel { action: ChannelAction::Get { apk } } => cmd_channel_get(&config, &apk),
        Commands::Verity { apk, salt, out, sequential, json } => {
            cmd_verity(&config, &apk, salt.as_deref(), out.as_deref(), sequential, json)
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_region(path: &Path) -> Result<FileRegion> {
    FileRegion::open(path).with_context(|| format!("opening {}", path.display()))
}

// ── `apkmark locate` ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct LocateReport {
    eocd: EndOfDirectoryRecord,
    signing_block: BlockReport,
    v2_signed: bool,
}

#[derive(Serialize)]
struct BlockReport {
    offset: u64,
    total_size: u64,
    entries: Vec<EntryReport>,
}

#[derive(Serialize)]
struct EntryReport {
    id: u32,
    offset: u64,
    length: usize,
}

impl From<&SigningBlockRegion> for BlockReport {
    fn from(block: &SigningBlockRegion) -> Self {
        Self {
            offset: block.offset,
            total_size: block.total_size,
            entries: block
                .entries
                .iter()
                .map(|e| EntryReport {
                    id: e.id,
                    offset: e.offset,
                    length: e.value.len(),
                })
                .collect(),
        }
    }
}

fn cmd_locate(apk: &Path, json: bool) -> Result<()> {
    let region = open_region(apk)?;
    let (eocd, block) =
        locate(&region).with_context(|| format!("locating signing block in {}", apk.display()))?;
    let v2_signed = has_v2_signature(&region)?;

    if json {
        let report = LocateReport {
            eocd,
            signing_block: BlockReport::from(&block),
            v2_signed,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", apk.display());
    println!("  eocd offset:       {}", eocd.record_offset);
    println!("  comment length:    {}", eocd.comment_length);
    println!("  central directory: {} ({} bytes)", eocd.directory_offset, eocd.directory_size);
    println!("  signing block:     {} ({} bytes)", block.offset, block.total_size);
    println!("  v2 signature:      {}", if v2_signed { "yes" } else { "no" });
    println!("  entries:           {}", block.entries.len());
    for entry in &block.entries {
        println!(
            "    {:#010x}  offset {:>10}  {} bytes",
            entry.id,
            entry.offset,
            entry.value.len()
        );
    }
    Ok(())
}

// ── `apkmark put` / `apkmark get` ─────────────────────────────────────────────

fn cmd_put(apk: &Path, id: u32, value: &[u8], output: Option<&Path>) -> Result<()> {
    let edited = {
        let region = open_region(apk)?;
        insert_entry(&region, id, value)
            .with_context(|| format!("inserting entry {id:#010x} into {}", apk.display()))?
    };
    let target = output.unwrap_or(apk);
    write_staged(target, &edited)?;
    println!("{}: added {id:#010x} ({} bytes)", target.display(), value.len());
    Ok(())
}

fn cmd_get(apk: &Path, id: u32, raw: bool) -> Result<()> {
    let region = open_region(apk)?;
    let value = extract_entry(&region, id)
        .with_context(|| format!("reading entry {id:#010x} from {}", apk.display()))?;
    let Some(value) = value else {
        anyhow::bail!("no entry {id:#010x} in {}", apk.display());
    };

    if raw {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&value).context("writing value to stdout")?;
        stdout.flush()?;
    } else {
        println!("{}", hex::encode(&value));
    }
    Ok(())
}

// ── `apkmark channel` ─────────────────────────────────────────────────────────

fn cmd_channel_set(
    config: &ApkmarkConfig,
    apk: &Path,
    channel: i32,
    output: Option<&Path>,
) -> Result<()> {
    let edited = {
        let region = open_region(apk)?;
        write_channel(&region, config.channel.block_id, channel)
            .with_context(|| format!("writing channel to {}", apk.display()))?
    };
    let target = output.unwrap_or(apk);
    write_staged(target, &edited)?;
    println!("{}: channel {channel}", target.display());
    Ok(())
}

fn cmd_channel_get(config: &ApkmarkConfig, apk: &Path) -> Result<()> {
    let region = open_region(apk)?;
    match read_channel(&region, config.channel.block_id)
        .with_context(|| format!("reading channel from {}", apk.display()))?
    {
        Some(channel) => println!("{channel}"),
        None => println!("none"),
    }
    Ok(())
}

// ── `apkmark verity` ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct VerityReport {
    root_hash: String,
    salt: String,
    content_size: u64,
    levels: usize,
    tree_size: usize,
}

fn cmd_verity(
    config: &ApkmarkConfig,
    apk: &Path,
    salt: Option<&str>,
    out: Option<&Path>,
    sequential: bool,
    json: bool,
) -> Result<()> {
    let salt = match salt {
        Some(hex) => parse_salt(hex)?,
        None => config.verity.salt_bytes()?,
    };
    let options = TreeOptions {
        parallel: config.verity.parallel && !sequential,
        region_size: config.verity.region_size,
    };

    let region = open_region(apk)?;
    let tree = build_verity_tree_with(&region, &salt, &options)
        .with_context(|| format!("building verity tree for {}", apk.display()))?;

    if let Some(out) = out {
        write_staged(out, &tree.to_bytes())?;
    }

    let report = VerityReport {
        root_hash: hex::encode(tree.root_hash),
        salt: hex::encode(salt),
        content_size: tree.header.content_size,
        levels: tree.levels.len(),
        tree_size: tree.tree_size(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("root hash: {}", report.root_hash);
        println!("  salt:    {}", report.salt);
        println!("  size:    {}", report.content_size);
        println!("  levels:  {} ({} bytes)", report.levels, report.tree_size);
        if let Some(out) = out {
            println!("  written: {}", out.display());
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Write `bytes` to a temporary file beside `target`, then rename it into place.
fn write_staged(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating staging file in {}", dir.display()))?;
    tmp.write_all(bytes).context("writing staging file")?;
    tmp.as_file().sync_all().context("syncing staging file")?;
    tmp.persist(target)
        .with_context(|| format!("replacing {}", target.display()))?;
    tracing::debug!(path = %target.display(), bytes = bytes.len(), "wrote staged file");
    Ok(())
}

fn parse_id(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid id {s:?}: {e}"))
}

fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    hex::decode(digits).with_context(|| format!("invalid hex value {s:?}"))
}
