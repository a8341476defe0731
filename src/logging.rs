//! Logging: tracing subscriber plus a size-rotated log file.
//!
//! Output always goes to stdout. When file logging is enabled the same
//! events are also written to `{dir}/{file}`, which is rotated once it
//! grows past `max_size` megabytes:
//!
//!   exporter.log                              (active)
//!   exporter-2026-10-19T08-15-02.113.log      (rotated)
//!   exporter-2026-10-18T21-40-55.902.log.gz   (rotated + compressed)
//!
//! Rotated files beyond `max_backups` or older than `max_age` days are
//! removed after each rotation.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LogConfig;

const MEGABYTE: u64 = 1024 * 1024;
const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(&cfg.level)));

    let file_layer = if cfg.enable_file {
        fs::create_dir_all(&cfg.dir)
            .with_context(|| format!("failed to create log dir {}", cfg.dir.display()))?;
        let writer = RotatingFile::open(cfg.file_path(), RotationPolicy::from(cfg))
            .with_context(|| format!("failed to open log file {}", cfg.file_path().display()))?;
        let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(writer));
        Some(if cfg.json { layer.json().boxed() } else { layer.boxed() })
    } else {
        None
    };

    let stdout_layer = if cfg.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}

/// Map a logrus-style level name onto a tracing filter directive.
fn level_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_backups: usize,
    pub max_age_days: u32,
    pub compress: bool,
}

impl From<&LogConfig> for RotationPolicy {
    fn from(cfg: &LogConfig) -> Self {
        let max_size = if cfg.max_size == 0 { 100 } else { cfg.max_size };
        Self {
            max_bytes: max_size * MEGABYTE,
            max_backups: cfg.max_backups,
            max_age_days: cfg.max_age,
            compress: cfg.compress,
        }
    }
}

/// Append-only log file that rotates itself by size.
pub struct RotatingFile {
    path: PathBuf,
    policy: RotationPolicy,
    file: File,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: PathBuf, policy: RotationPolicy) -> io::Result<Self> {
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { path, policy, file, size })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let backup = backup_path(&self.path, Utc::now());
        fs::rename(&self.path, &backup)?;
        self.file = open_append(&self.path)?;
        self.size = 0;

        if self.policy.compress {
            // The active file is already reopened; a failed gzip leaves
            // the plain backup in place.
            if let Err(e) = compress_file(&backup) {
                eprintln!("log rotation: failed to compress {}: {}", backup.display(), e);
            }
        }
        self.prune()
    }

    /// Delete backups past the retention limits, newest kept first.
    fn prune(&self) -> io::Result<()> {
        let mut backups = list_backups(&self.path)?;
        backups.sort_by(|a, b| b.0.cmp(&a.0));

        let cutoff = (self.policy.max_age_days > 0)
            .then(|| Utc::now() - chrono::Duration::days(i64::from(self.policy.max_age_days)));

        for (i, (stamp, path)) in backups.iter().enumerate() {
            let over_count = self.policy.max_backups > 0 && i >= self.policy.max_backups;
            let too_old = cutoff.map_or(false, |c| *stamp < c);
            if over_count || too_old {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size > 0 && self.size + buf.len() as u64 > self.policy.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Split `dir/name.ext` into (`dir`, `name`, `.ext`).
fn split_name(path: &Path) -> (PathBuf, String, String) {
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (dir, stem, ext)
}

fn backup_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let (dir, stem, ext) = split_name(path);
    dir.join(format!("{}-{}{}", stem, at.format(BACKUP_TIME_FORMAT), ext))
}

/// Rotated files belonging to `path`, with the timestamp parsed from each name.
fn list_backups(path: &Path) -> io::Result<Vec<(DateTime<Utc>, PathBuf)>> {
    let (dir, stem, ext) = split_name(path);
    let dir = if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir };
    let prefix = format!("{}-", stem);

    let mut found = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix(&prefix) else { continue };
        let rest = rest.strip_suffix(".gz").unwrap_or(rest);
        let Some(stamp) = rest.strip_suffix(ext.as_str()) else { continue };
        if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) {
            found.push((naive.and_utc(), entry.path()));
        }
    }
    Ok(found)
}

fn compress_file(path: &Path) -> io::Result<()> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let mut src = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&gz_path)?, Compression::default());
    io::copy(&mut src, &mut encoder)?;
    encoder.finish()?.sync_all()?;
    fs::remove_file(path)
}
