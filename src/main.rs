use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use docsite::config::{MAX_FILE_SIZE, READ_TIMEOUT_SECS};
use docsite::parser::FileKind;
use docsite::processor::parse_or_fallback;
use docsite::worker::client::WorkerPool;
use docsite::worker::protocol::{ProgressUpdate, WorkerRequest};
use docsite::worker::{DocumentWorker, Engines, WorkerHandle};
use docsite::{FileProcessor, ProcessingError, ProcessorConfig, Section, UploadedFile, WorkerConfig};

const MB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "docsite", about = "Convert documents into editable website sections")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Reject files larger than this many megabytes
    #[arg(long, global = true, default_value_t = MAX_FILE_SIZE / MB)]
    max_size_mb: u64,

    /// Give up reading a file after this many seconds
    #[arg(long, global = true, default_value_t = READ_TIMEOUT_SECS)]
    read_timeout_secs: u64,

    /// Tesseract language for OCR
    #[arg(long, global = true, env = "DOCSITE_OCR_LANG", default_value = "eng")]
    ocr_lang: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert files and print their sections as JSON
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
        /// Skip the PDF/OCR worker and use the synchronous parsers only
        #[arg(long)]
        no_worker: bool,
        /// Number of document workers
        #[arg(short = 'w', long, default_value = "1")]
        workers: usize,
    },
    /// Convert every text, Markdown, HTML and Office file in a directory
    Batch {
        dir: PathBuf,
        /// Directory receiving one JSON file per input
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Serve the worker protocol as JSON lines on stdin/stdout
    Worker,
}

impl Cli {
    fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_file_size: self.max_size_mb * MB,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            ocr_language: self.ocr_lang.clone(),
            ..WorkerConfig::default()
        }
    }
}

#[derive(Serialize)]
struct FileOutput<'a> {
    file: &'a str,
    sections: &'a [Section],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let processor_config = cli.processor_config();
    let worker_config = cli.worker_config();

    let result = match cli.command {
        Commands::Convert {
            files,
            pretty,
            no_worker,
            workers,
        } => {
            let mut processor = FileProcessor::new(processor_config);
            if !no_worker {
                let engines = Engines::system(&worker_config);
                let pool = WorkerPool::spawn(workers, engines, worker_config);
                processor = processor.with_workers(Arc::new(pool));
            }
            convert_files(&processor, &files, pretty).await
        }
        Commands::Batch { dir, out } => {
            let counts = run_batch(&dir, &out, processor_config.max_file_size)?;
            counts.print();
            Ok(())
        }
        Commands::Worker => serve_worker(worker_config).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Mirror worker progress onto a 0..100 bar until the sender side is dropped.
fn forward_progress(bar: ProgressBar) -> (mpsc::UnboundedSender<ProgressUpdate>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let forward = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            bar.set_position((update.progress * 100.0).round() as u64);
            bar.set_message(update.message);
        }
    });
    (tx, forward)
}

async fn convert_files(
    processor: &FileProcessor,
    files: &[PathBuf],
    pretty: bool,
) -> anyhow::Result<()> {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:40.cyan/blue}] {pos}% {msg}")?
        .progress_chars("#>-");

    for path in files {
        let file = UploadedFile::from_path(path).await?;
        let name = file.name.clone();

        let pb = ProgressBar::new(100).with_style(style.clone());
        pb.set_prefix(name.clone());
        let (tx, forward) = forward_progress(pb.clone());

        let outcome = processor.process_file_with_progress(file, Some(tx)).await;
        forward.await?;
        pb.finish_and_clear();

        let sections = match outcome {
            Ok(sections) => sections,
            Err(err) => {
                eprintln!("{}: {}", name, err.kind.user_message());
                warn!("skipping {}: {}", name, err);
                continue;
            }
        };
        let output = FileOutput {
            file: &name,
            sections: &sections,
        };
        let json = if pretty {
            serde_json::to_string_pretty(&output)?
        } else {
            serde_json::to_string(&output)?
        };
        println!("{}", json);
    }
    Ok(())
}

#[derive(Default)]
struct BatchCounts {
    converted: usize,
    sections: usize,
    errors: usize,
}

impl BatchCounts {
    fn print(&self) {
        eprintln!(
            "Converted {} files into {} sections ({} errors).",
            self.converted, self.sections, self.errors,
        );
    }
}

fn is_batch_input(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    matches!(
        FileKind::from_file_name(&name),
        Ok(FileKind::Text | FileKind::Markdown | FileKind::Html | FileKind::Docx | FileKind::Pptx)
    )
}

fn run_batch(dir: &Path, out: &Path, max_file_size: u64) -> anyhow::Result<BatchCounts> {
    use rayon::prelude::*;

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_batch_input(path))
        .collect();
    files.sort();
    if files.is_empty() {
        eprintln!("No convertible files in {}.", dir.display());
        return Ok(BatchCounts::default());
    }
    std::fs::create_dir_all(out).with_context(|| format!("cannot create {}", out.display()))?;
    info!("Converting {} files from {}", files.len(), dir.display());

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut counts = BatchCounts::default();
    for chunk in files.chunks(64) {
        let results: Vec<_> = chunk
            .par_iter()
            .map(|path| convert_to_json(path, out, max_file_size).map_err(|e| (path, e)))
            .collect();

        for result in results {
            match result {
                Ok(sections) => {
                    counts.converted += 1;
                    counts.sections += sections;
                }
                Err((path, e)) => {
                    pb.suspend(|| warn!("{}: {:#}", path.display(), e));
                    counts.errors += 1;
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

/// Writes `<out>/<file name>.json` and returns the section count.
fn convert_to_json(path: &Path, out: &Path, max_file_size: u64) -> anyhow::Result<usize> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let size = std::fs::metadata(path)?.len();
    if size > max_file_size {
        return Err(ProcessingError::file_too_large(size, max_file_size).into());
    }

    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", name))?;
    let sections = parse_or_fallback(&name, &bytes);
    let output = FileOutput {
        file: &name,
        sections: &sections,
    };
    let target = out.join(format!("{}.json", name));
    std::fs::write(&target, serde_json::to_vec_pretty(&output)?)
        .with_context(|| format!("cannot write {}", target.display()))?;
    Ok(sections.len())
}

/// One request per stdin line; every worker message is one stdout line.
async fn serve_worker(config: WorkerConfig) -> anyhow::Result<()> {
    let WorkerHandle {
        requests,
        mut messages,
    } = DocumentWorker::new(Engines::system(&config), config).spawn();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = messages.recv().await {
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
            if message.is_terminal() {
                debug!("request {} answered", message.id().unwrap_or("-"));
            }
        }
        anyhow::Ok(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerRequest>(&line) {
            Ok(request) => {
                if requests.send(request).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("ignoring malformed request: {}", e),
        }
    }

    drop(requests);
    writer.await??;
    Ok(())
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsite::worker::protocol::Step;

    #[tokio::test]
    async fn progress_reaches_the_bar() {
        let bar = ProgressBar::hidden();
        let (tx, forward) = forward_progress(bar.clone());
        for (progress, message) in [(0.1, "loading"), (0.55, "page 2 of 3")] {
            tx.send(ProgressUpdate {
                step: Step::Extracting,
                progress,
                message: message.to_string(),
            })
            .unwrap();
        }
        drop(tx);
        forward.await.unwrap();

        assert_eq!(bar.position(), 55);
        assert_eq!(bar.message(), "page 2 of 3");
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
