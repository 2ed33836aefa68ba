//! Log output setup.
//!
//! ```text
//!  log facade ──▶ env_logger ──▶ stderr                      (no log file)
//!                            └─▶ RotatingFile [+ stderr tee]  (log_file set)
//! ```
//!
//! The file rotates by size: `<file>` moves to `<file>.1`, `<file>.1` to
//! `<file>.2` and so on; the oldest of `max_count` backups is overwritten.
//! A `max_bytes` or `max_count` of zero disables rotation.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use env_logger::{Builder, Env, Target};

use crate::config::SystemConfig;

/// Everything needed to install the logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub filter: String,
    /// journald adds its own timestamps.
    pub systemd: bool,
    pub file: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_count: u32,
    /// Keep console output next to the log file.
    pub print: bool,
}

impl LogSettings {
    pub fn from_config(config: &SystemConfig, filter: &str, systemd: bool) -> Self {
        Self {
            filter: filter.to_owned(),
            systemd,
            file: config.log_file.clone(),
            max_bytes: config.log_max_bytes,
            max_count: config.log_max_count,
            print: config.log_print,
        }
    }

    /// Console only, e.g. when the configuration could not be read.
    pub fn console(filter: &str, systemd: bool) -> Self {
        Self {
            filter: filter.to_owned(),
            systemd,
            file: None,
            max_bytes: 0,
            max_count: 0,
            print: false,
        }
    }

    fn console_too(&self) -> bool {
        self.print || self.systemd
    }
}

/// Install the global logger.  Fails without installing anything if the
/// log file cannot be opened.
pub fn init(settings: &LogSettings) -> io::Result<()> {
    let target = match &settings.file {
        None => None,
        Some(path) => {
            let file = RotatingFile::open(path, settings.max_bytes, settings.max_count)?;
            let sink: Box<dyn Write + Send> = if settings.console_too() {
                Box::new(Tee {
                    file,
                    console: io::stderr(),
                })
            } else {
                Box::new(file)
            };
            Some(Target::Pipe(sink))
        }
    };

    let mut builder = Builder::from_env(Env::default().default_filter_or(&settings.filter));
    // Timestamps stay in files, journald lines go without.
    if settings.systemd && target.is_none() {
        builder.format_timestamp(None);
    }
    if let Some(target) = target {
        builder.target(target);
    }
    // A logger installed earlier (tests) keeps running.
    let _ = builder.try_init();
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Rotating file
// ───────────────────────────────────────────────────────────────

/// Append-only log file that rotates once it would reach `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_count: u32,
}

impl RotatingFile {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, max_count: u32) -> io::Result<Self> {
        let path = path.into();
        let file = append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_bytes,
            max_count,
        })
    }

    /// Path of the `n`-th backup.
    pub fn backup(&self, n: u32) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotates(&self) -> bool {
        self.max_bytes > 0 && self.max_count > 0
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.max_count).rev() {
            let from = self.backup(n);
            if from.exists() {
                fs::rename(&from, self.backup(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup(1))?;
        self.file = append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.rotates() && self.written > 0 && self.written + buf.len() as u64 >= self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Writes every record to the file and to stderr.
struct Tee {
    file: RotatingFile,
    console: io::Stderr,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        // A closed console must not stop file logging.
        let _ = self.console.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}
