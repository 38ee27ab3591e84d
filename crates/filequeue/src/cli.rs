//! The `fq` command-line interface.

use crate::config::FileQueueConfig;
use crate::encoding::Encoding;
use crate::host_fs::HostFs;
use crate::queue::FileQueue;
use crate::request::{MakeDir, ReadFile};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Command-line arguments of `fq`.
#[derive(Parser)]
#[command(name = "fq")]
#[command(about = "Filesystem operations behind an open-file admission queue", long_about = None)]
pub struct Cli {
    /// Maximum operations in flight; overrides the config file
    #[arg(short, long, env = "FQ_LIMIT")]
    pub limit: Option<usize>,

    /// TOML or JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base directory for relative paths; overrides the config file
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// `fq` subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Print files to stdout
    Cat {
        /// Files to print
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Decode as text (utf8, latin1, hex, base64) instead of raw bytes
        #[arg(short, long)]
        encoding: Option<Encoding>,
    },
    /// Show type, size and mode
    Stat {
        /// Paths to stat
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List a directory
    Ls {
        /// Directory to list
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Create a directory
    Mkdir {
        /// Directory to create
        path: PathBuf,
        /// Octal permission bits, e.g. 755
        #[arg(short, long, value_parser = parse_mode)]
        mode: Option<u32>,
    },
    /// Copy a file through a read stream and a write stream
    Cp {
        /// Source file
        src: PathBuf,
        /// Destination file
        dst: PathBuf,
    },
    /// Read one file many times at once and print the gate counters
    Stress {
        /// File to read
        path: PathBuf,
        /// Number of concurrent reads
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,
    },
}

fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode {:?}: {}", s, e))
}

impl Cli {
    /// Config file values with command-line overrides applied.
    pub fn config(&self) -> Result<FileQueueConfig> {
        let mut config = match &self.config {
            Some(path) => FileQueueConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => FileQueueConfig::default(),
        };
        if let Some(limit) = self.limit {
            config.max_open_files = limit;
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        Ok(config)
    }

    /// Executes the parsed command.
    pub async fn run(self) -> Result<()> {
        let config = self.config()?;
        let queue = FileQueue::from_config(Arc::new(HostFs::new(config.root.clone())), &config);
        info!(limit = queue.gate().limit(), root = %config.root.display(), "file queue ready");

        match self.command {
            Command::Cat { paths, encoding } => cat(&queue, paths, encoding).await,
            Command::Stat { paths } => stat(&queue, paths).await,
            Command::Ls { dir } => ls(&queue, dir).await,
            Command::Mkdir { path, mode } => mkdir(&queue, path, mode).await,
            Command::Cp { src, dst } => cp(&queue, src, dst).await,
            Command::Stress { path, count } => stress(&queue, path, count).await,
        }
    }
}

async fn cat(queue: &FileQueue, paths: Vec<PathBuf>, encoding: Option<Encoding>) -> Result<()> {
    let reads = paths.iter().map(|path| {
        let mut request = ReadFile::new(path.clone());
        request.encoding = encoding;
        queue.execute(request)
    });
    let results = join_all(reads).await;

    let mut stdout = tokio::io::stdout();
    for (path, result) in paths.iter().zip(results) {
        let data = result.with_context(|| format!("cat {}", path.display()))?;
        stdout.write_all(&data.into_bytes(Encoding::Utf8)?).await?;
    }
    stdout.flush().await?;
    Ok(())
}

async fn stat(queue: &FileQueue, paths: Vec<PathBuf>) -> Result<()> {
    let results = join_all(paths.iter().map(|path| queue.stat(path.clone()))).await;
    for (path, result) in paths.iter().zip(results) {
        let meta = result.with_context(|| format!("stat {}", path.display()))?;
        println!(
            "{}: {:?}, {} bytes, mode {:o}",
            path.display(),
            meta.kind,
            meta.len,
            meta.mode
        );
    }
    Ok(())
}

async fn ls(queue: &FileQueue, dir: PathBuf) -> Result<()> {
    let names = queue
        .read_dir(dir.clone())
        .await
        .with_context(|| format!("ls {}", dir.display()))?;
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

async fn mkdir(queue: &FileQueue, path: PathBuf, mode: Option<u32>) -> Result<()> {
    let mut request = MakeDir::new(path.clone());
    request.mode = mode;
    queue
        .execute(request)
        .await
        .with_context(|| format!("mkdir {}", path.display()))?;
    Ok(())
}

async fn cp(queue: &FileQueue, src: PathBuf, dst: PathBuf) -> Result<()> {
    // both streams hold a slot for the whole copy
    anyhow::ensure!(
        queue.gate().limit() >= 2,
        "cp holds two open files; raise --limit to at least 2"
    );

    let mut reader = queue
        .create_read_stream(src.clone())
        .await
        .with_context(|| format!("open {}", src.display()))?;
    let mut writer = queue
        .create_write_stream(dst.clone())
        .await
        .with_context(|| format!("create {}", dst.display()))?;

    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.close().await?;
    reader.close();

    info!(bytes = copied, src = %src.display(), dst = %dst.display(), "copy finished");
    Ok(())
}

async fn stress(queue: &FileQueue, path: PathBuf, count: usize) -> Result<()> {
    let results = join_all((0..count).map(|_| queue.read_file(path.clone()))).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(count, failed, "stress run finished");

    println!("{}", serde_json::to_string_pretty(&queue.gate().stats())?);
    if let Some(Err(e)) = results.into_iter().find(|r| r.is_err()) {
        anyhow::bail!("{} of {} reads failed, first error: {}", failed, count, e);
    }
    Ok(())
}
