//! Logging setup for sluice binaries.
//!
//! Connectors own stdout for protocol messages, so console output always goes
//! to stderr. An optional size-rotated file captures the same events.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "sluice=info,sluice_source=info";
const VERBOSE_LOG_FILTER: &str = "sluice=debug,sluice_source=debug";

/// Rotated files kept next to the live one.
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Raise the console filter to debug
    pub verbose: bool,
    /// Directory for `<app_name>.log`; no file output when `None`
    pub log_dir: Option<&'a Path>,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Fails if a subscriber is already
/// installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let base_filter = env_filter(DEFAULT_LOG_FILTER);
    let console_filter = if config.verbose {
        env_filter(VERBOSE_LOG_FILTER)
    } else {
        env_filter(DEFAULT_LOG_FILTER)
    };

    let file_layer = match config.log_dir {
        Some(dir) => {
            let writer = RotatingWriter::open(dir, config.app_name, RotationPolicy::default())
                .with_context(|| format!("Failed to open log file in {}", dir.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(base_filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// When and how far to rotate.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    /// Rotated files retained (`name.log.1` .. `name.log.N-1`), live file included in N
    pub max_files: usize,
    pub max_bytes: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_files: MAX_LOG_FILES,
            max_bytes: MAX_LOG_FILE_SIZE,
        }
    }
}

/// A log file that shifts itself to `.1`, `.2`, ... once it passes the size limit.
struct RotatingFile {
    live: PathBuf,
    policy: RotationPolicy,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, app_name: &str, policy: RotationPolicy) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let live = dir.join(format!("{}.log", file_stem(app_name)));
        let mut rotating = Self {
            live,
            policy: RotationPolicy {
                max_files: policy.max_files.max(1),
                max_bytes: policy.max_bytes,
            },
            file: None,
            written: 0,
        };
        rotating.reopen()?;
        if rotating.written > rotating.policy.max_bytes {
            rotating.rotate()?;
        }
        Ok(rotating)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.live)?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn numbered(&self, index: usize) -> PathBuf {
        let mut name = self.live.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }

        let keep = self.policy.max_files - 1;
        if keep > 0 {
            let oldest = self.numbered(keep);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..keep).rev() {
                let from = self.numbered(index);
                if from.exists() {
                    fs::rename(&from, self.numbered(index + 1))?;
                }
            }
            if self.live.exists() {
                fs::rename(&self.live, self.numbered(1))?;
            }
        } else if self.live.exists() {
            fs::remove_file(&self.live)?;
        }

        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.policy.max_bytes {
            self.rotate()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// `MakeWriter` handing out handles to one shared rotating file.
#[derive(Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    pub fn open(dir: &Path, app_name: &str, policy: RotationPolicy) -> io::Result<Self> {
        let file = RotatingFile::open(dir, app_name, policy)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    fn with_file<T>(&self, op: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        op(&mut file)
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "sluice".to_string()
    } else {
        stem
    }
}
