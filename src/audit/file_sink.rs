//! Append-only audit file with rotation and retention.
//!
//! # Responsibilities
//! - Append one JSON line per event and fsync it
//! - Rotate on size or local date change, before the write that would follow
//! - Delete rotated files older than the retention period
//!
//! # Design Decisions
//! - One mutex serializes producers, so lines never interleave and each
//!   triggering write rotates at most once
//! - Rotated names carry the last-write timestamp: `audit.log.20240131-235959`
//! - The first I/O failure disables the sink for the rest of the run

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

use super::event::AuditEvent;
use super::AuditError;

const ROTATED_FORMAT: &str = "%Y%m%d-%H%M%S";

struct SinkState {
    file: Option<File>,
    size: u64,
    last_write: Option<DateTime<Local>>,
}

pub struct FileSink {
    dir: PathBuf,
    file_name: String,
    max_bytes: u64,
    retention: Duration,
    state: Mutex<SinkState>,
    disabled: AtomicBool,
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("path", &self.current_path())
            .field("max_bytes", &self.max_bytes)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

impl FileSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        file_name: impl Into<String>,
        max_bytes: u64,
        retention: Duration,
    ) -> Result<Self, AuditError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| AuditError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            file_name: file_name.into(),
            max_bytes,
            retention,
            state: Mutex::new(SinkState {
                file: None,
                size: 0,
                last_write: None,
            }),
            disabled: AtomicBool::new(false),
        })
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Append one event as a JSON line.
    pub fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.append_line(&line)
    }

    fn append_line(&self, line: &[u8]) -> Result<(), AuditError> {
        if self.is_disabled() {
            return Err(AuditError::SinkDisabled);
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let result = self.write_locked(&mut state, line);
        if result.is_err() {
            self.disabled.store(true, Ordering::Release);
            state.file = None;
        }
        result
    }

    fn write_locked(&self, state: &mut SinkState, line: &[u8]) -> Result<(), AuditError> {
        let now = Local::now();
        let path = self.current_path();
        if state.file.is_none() {
            self.open(state)?;
        }
        if self.should_rotate(state, now) {
            self.rotate(state)?;
            self.open(state)?;
        }

        let io = |source| AuditError::Io {
            path: path.clone(),
            source,
        };
        let file = state.file.as_mut().ok_or(AuditError::SinkDisabled)?;
        file.write_all(line).map_err(io)?;
        file.sync_data().map_err(io)?;
        state.size += line.len() as u64;
        state.last_write = Some(now);
        Ok(())
    }

    fn should_rotate(&self, state: &SinkState, now: DateTime<Local>) -> bool {
        if state.size == 0 {
            return false;
        }
        if state.size >= self.max_bytes {
            return true;
        }
        state
            .last_write
            .is_some_and(|last| last.date_naive() != now.date_naive())
    }

    fn open(&self, state: &mut SinkState) -> Result<(), AuditError> {
        let path = self.current_path();
        let io = |source| AuditError::Io {
            path: path.clone(),
            source,
        };
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path).map_err(io)?;
        let metadata = file.metadata().map_err(io)?;
        state.size = metadata.len();
        state.last_write = if metadata.len() > 0 {
            metadata.modified().ok().map(DateTime::<Local>::from)
        } else {
            None
        };
        state.file = Some(file);
        Ok(())
    }

    /// Close, rename with the last-write suffix, leave no file open.
    fn rotate(&self, state: &mut SinkState) -> Result<(), AuditError> {
        if let Some(file) = state.file.take() {
            if let Err(e) = file.sync_all() {
                tracing::warn!(file = %self.current_path().display(), error = %e, "Audit file sync before rotation failed");
            }
        }
        let stamp = state
            .last_write
            .unwrap_or_else(Local::now)
            .format(ROTATED_FORMAT)
            .to_string();
        let mut target = self.dir.join(format!("{}.{stamp}", self.file_name));
        let mut n = 1;
        while target.exists() {
            target = self.dir.join(format!("{}.{stamp}-{n}", self.file_name));
            n += 1;
        }
        let current = self.current_path();
        fs::rename(&current, &target).map_err(|source| AuditError::Io {
            path: current.clone(),
            source,
        })?;
        tracing::info!(rotated = %target.display(), size = state.size, "Audit log rotated");
        state.size = 0;
        state.last_write = None;
        Ok(())
    }

    /// Delete rotated files older than the retention period.
    pub fn cleanup(&self) -> Result<usize, AuditError> {
        cleanup_dir(&self.dir, &self.file_name, self.retention)
    }

    /// Every event on disk, rotated files first, oldest first.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>, AuditError> {
        read_dir_events(&self.dir, &self.file_name)
    }
}

/// True for `<file_name>.<YYYYMMDD-HHMMSS>` with an optional `-<n>` suffix.
pub fn is_rotated_name(name: &str, file_name: &str) -> bool {
    rotation_key(name, file_name).is_some()
}

/// `(stamp, collision counter)` of a rotated name; the first file of a
/// second has counter 0. Orders rotated files oldest first.
fn rotation_key<'a>(name: &'a str, file_name: &str) -> Option<(&'a str, u64)> {
    let suffix = name.strip_prefix(file_name)?.strip_prefix('.')?;
    let rest = suffix.get(15..)?;
    let stamp = &suffix[..15];
    let stamp_ok = stamp
        .char_indices()
        .all(|(i, c)| if i == 8 { c == '-' } else { c.is_ascii_digit() });
    if !stamp_ok {
        return None;
    }
    if rest.is_empty() {
        return Some((stamp, 0));
    }
    let counter = rest.strip_prefix('-')?;
    if counter.is_empty() || !counter.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    counter.parse().ok().map(|n| (stamp, n))
}

/// Delete rotated audit files in `dir` last modified before `now - retention`.
pub fn cleanup_dir(dir: &Path, file_name: &str, retention: Duration) -> Result<usize, AuditError> {
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let io = |source| AuditError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(io)? {
        let entry = entry.map_err(io)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_rotated_name(name, file_name) {
            continue;
        }
        let modified = entry.metadata().and_then(|m| m.modified());
        match modified {
            Ok(modified) if modified < cutoff => {
                fs::remove_file(entry.path()).map_err(io)?;
                tracing::info!(file = %name, "Expired audit file removed");
                removed += 1;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(file = %name, error = %e, "Cannot read audit file age"),
        }
    }
    Ok(removed)
}

/// Read every event in `dir`: rotated files by stamp and collision counter,
/// then the current file.
pub fn read_dir_events(dir: &Path, file_name: &str) -> Result<Vec<AuditEvent>, AuditError> {
    let io = |source| AuditError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut keyed: Vec<((String, u64), PathBuf)> = fs::read_dir(dir)
        .map_err(io)?
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name();
            let (stamp, counter) = rotation_key(name.to_str()?, file_name)?;
            Some(((stamp.to_string(), counter), e.path()))
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    let mut rotated: Vec<PathBuf> = keyed.into_iter().map(|(_, path)| path).collect();

    let current = dir.join(file_name);
    if current.exists() {
        rotated.push(current);
    }

    let mut events = Vec::new();
    for path in rotated {
        let file = File::open(&path).map_err(|source| AuditError::Io {
            path: path.clone(),
            source,
        })?;
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| AuditError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::debug!(
                    file = %path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping unreadable audit line"
                ),
            }
        }
    }
    Ok(events)
}
