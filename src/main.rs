//! ncmdump 命令行入口
//!
//! 用法：
//!   ncmdump decode <input>... -o <output_dir>
//!   ncmdump sync <input_dir> <output_dir> [--exclude <prefix>]...
//!   ncmdump inspect <input>
//!
//! 所有实际逻辑都委托给库模块，这里只负责参数、日志与结果输出。

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use ncmdump::{BatchManager, BatchProgress, Config, DecodeJob, ProgressEvent, SharedSink};

#[derive(Parser, Debug)]
#[command(name = "ncmdump", version, about = "Decode NCM music containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Worker threads (defaults to available parallelism)
    #[arg(long, short = 'j', global = true, env = "NCMDUMP_THREADS")]
    threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "NCMDUMP_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, global = true, env = "NCMDUMP_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Print per-chunk progress to stderr
    #[arg(long, global = true)]
    progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode one or more .ncm files into a directory
    Decode {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(long, short = 'o', default_value = ".")]
        output: PathBuf,
    },

    /// Mirror a directory tree, decoding .ncm files and copying the rest
    Sync {
        input: PathBuf,
        output: PathBuf,

        /// Relative path prefix to skip (repeatable)
        #[arg(long = "exclude")]
        exclude_dirs: Vec<String>,

        /// Re-process files even if the output looks up to date
        #[arg(long)]
        no_skip_existing: bool,

        /// Only decode .ncm files, do not copy other files
        #[arg(long)]
        no_copy_others: bool,
    },

    /// Print container metadata without decoding the audio
    Inspect { input: PathBuf },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// 返回值表示是否全部成功
fn run(cli: Cli) -> Result<bool> {
    let sink = cli.progress.then(progress_printer);

    match cli.command {
        Commands::Decode { inputs, output } => {
            let config = Config {
                threads: cli.threads,
                ..Default::default()
            };
            let manager = BatchManager::from_config(&config).context("create worker pool")?;
            info!(threads = manager.threads(), files = inputs.len(), "decoding");

            for input in inputs {
                let mut job = DecodeJob::new(input, &output);
                if let Some(sink) = &sink {
                    job = job.with_sink(sink.clone());
                }
                manager.submit(job)?;
            }

            manager.wait_all();
            Ok(print_summary(&manager.progress()))
        }

        Commands::Sync {
            input,
            output,
            exclude_dirs,
            no_skip_existing,
            no_copy_others,
        } => {
            let config = Config {
                threads: cli.threads,
                exclude_dirs,
                skip_existing: !no_skip_existing,
                copy_others: !no_copy_others,
            };
            let manager = BatchManager::from_config(&config).context("create worker pool")?;

            let report = ncmdump::sync_folder(&manager, &input, &output, &config, sink)
                .with_context(|| format!("sync {}", input.display()))?;
            manager.wait_all();

            println!(
                "planned {}, skipped {}, copied {}, decoded {}",
                report.planned, report.skipped, report.copied, report.decodes_submitted
            );
            Ok(print_summary(&manager.progress()))
        }

        Commands::Inspect { input } => {
            inspect(&input)?;
            Ok(true)
        }
    }
}

fn inspect(input: &Path) -> Result<()> {
    let container =
        ncmdump::inspect(input).with_context(|| format!("inspect {}", input.display()))?;
    let meta = &container.metadata;

    println!("file:           {}", input.display());
    println!("magic ok:       {}", container.magic_ok);
    println!("format:         {}", meta.format);
    if let Some(name) = &meta.music_name {
        println!("title:          {name}");
    }
    let artists = meta.artists();
    if !artists.is_empty() {
        println!("artist:         {}", artists.join(", "));
    }
    if let Some(album) = &meta.album {
        println!("album:          {album}");
    }
    if let Some(bitrate) = meta.bitrate {
        println!("bitrate:        {bitrate}");
    }
    println!("cover bytes:    {}", container.cover_len);
    println!("payload offset: {}", container.payload_offset);
    Ok(())
}

fn print_summary(progress: &BatchProgress) -> bool {
    for file in &progress.files {
        match (&file.output_path, &file.error) {
            (Some(out), _) if file.success() => println!("ok    {} -> {}", file.file, out.display()),
            (_, Some(err)) => println!("fail  {}: {err}", file.file),
            _ => println!("fail  {}", file.file),
        }
    }
    let failed = progress.failed().count();
    println!(
        "{} of {} file(s) decoded, {failed} failed",
        progress.completed - failed,
        progress.submitted
    );
    failed == 0
}

fn progress_printer() -> SharedSink {
    Arc::new(|event: &ProgressEvent| {
        let pct = if event.bytes_total == 0 {
            100.0
        } else {
            event.bytes_done as f64 * 100.0 / event.bytes_total as f64
        };
        if event.finished {
            eprintln!("{}: done", event.file);
        } else {
            eprintln!("{}: {pct:5.1}%", event.file);
        }
    })
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

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
