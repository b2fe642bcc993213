use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use bpepack::core::{OutputArray, TokenTextEncoding};
use bpepack::{encode_file, EncodeConfig, Tokenizer};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, LevelFilter};
use rayon::ThreadPoolBuilder;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streaming BPE corpus encoder", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode a text corpus into a uint16 .npy token array
    Encode(EncodeArgs),
    /// Print the length and leading ids of a token array
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Vocabulary file (.json, .tiktoken or .pkl)
    #[arg(long, value_name = "PATH")]
    vocab: PathBuf,

    /// Merge rules file (.json, .pkl or GPT-2 merges .txt)
    #[arg(long, value_name = "PATH")]
    merges: PathBuf,

    /// Corpus text file (`.gz` is decompressed)
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// Output .npy path
    #[arg(short, long, value_name = "PATH")]
    output: PathBuf,

    /// Encode configuration (.json or .toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Special tokens (repeat flag); replaces the configured list
    #[arg(long = "special-token", value_name = "TOKEN")]
    special_tokens: Vec<String>,

    /// New corpus bytes read per chunk
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Encode chunk batches in parallel
    #[arg(long)]
    parallel: bool,

    /// Definition files use the GPT-2 byte-level alphabet
    #[arg(long)]
    byte_level: bool,

    /// Limit Rayon worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Token array (.npy)
    array: PathBuf,

    /// Number of leading ids to print
    #[arg(long, value_name = "N", default_value_t = 16)]
    head: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Encode(args) => run_encode(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    if let Some(level) = verbosity_filter(verbose, quiet) {
        builder.filter_level(level);
    }
    let _ = builder.try_init();
}

/// Level forced by `-v`/`-q`; `None` leaves `RUST_LOG` in charge.
fn verbosity_filter(verbose: u8, quiet: u8) -> Option<LevelFilter> {
    match (verbose, quiet) {
        (0, 0) => None,
        (_, 1) => Some(LevelFilter::Warn),
        (_, q) if q > 1 => Some(LevelFilter::Error),
        (1, _) => Some(LevelFilter::Debug),
        _ => Some(LevelFilter::Trace),
    }
}

fn build_config(args: &EncodeArgs) -> Result<EncodeConfig> {
    let mut config = match &args.config {
        Some(path) => EncodeConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EncodeConfig::default(),
    };

    if !args.special_tokens.is_empty() {
        config.special_tokens = args.special_tokens.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if args.parallel {
        config.parallel = true;
    }
    if args.byte_level {
        config.text_encoding = TokenTextEncoding::ByteLevel;
    }

    config.validate().context("invalid encode configuration")?;
    Ok(config)
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("unable to configure Rayon thread pool")?;
    }

    let config = build_config(&args)?;
    let tokenizer = Tokenizer::from_files(&args.vocab, &args.merges, &config)
        .context("failed to load vocabulary and merge rules")?;

    let start = Instant::now();
    let stats = encode_file(&args.input, &args.output, &tokenizer, &config)
        .with_context(|| format!("failed to encode {}", args.input.display()))?;
    let elapsed = start.elapsed();

    let mib_per_sec = stats.bytes_read as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(1e-9);
    info!(
        "Wrote {} tokens to {} in {:.2?} ({:.1} MiB/s, {:.3} bytes/token)",
        stats.tokens,
        args.output.display(),
        elapsed,
        mib_per_sec,
        stats.bytes_per_token()
    );
    Ok(())
}

fn run_inspect(args: InspectArgs) -> Result<()> {
    let array = OutputArray::load(&args.array)
        .with_context(|| format!("failed to read {}", args.array.display()))?;

    println!("path:   {}", args.array.display());
    println!("dtype:  uint16");
    println!("length: {}", array.len());
    let head: Vec<String> = array
        .as_slice()
        .iter()
        .take(args.head)
        .map(u16::to_string)
        .collect();
    println!("head:   [{}]", head.join(", "));
    Ok(())
}
