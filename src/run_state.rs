//! Worker run state shared across the isolation boundary.
//!
//! The state is a single byte with exactly one writer, the worker, and any
//! number of readers. It is read and written with atomic loads and stores, so no
//! lock is involved on either side.
//!
//! Two backings exist:
//!
//! - **Local**: an `Arc<AtomicU8>` for a worker running on a thread of this process.
//! - **Mapped**: a one-byte file mapped into both the controller and a worker
//!   child process. The controller creates (and later removes) the file; the
//!   worker maps it for writing.

use memmap2::MmapRaw;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppResult, QueueError};

/// Observable state of the scan machinery.
///
/// The worker itself only ever records `Idle` and `Running`; `Paused` is
/// reported by the controller while a queue run is held between items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RunState {
    /// No scan executing; ready for the next command.
    Idle = 0,
    /// A scan is executing.
    Running = 1,
    /// A run is held between items. Never written by the worker.
    Paused = 2,
}

impl RunState {
    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => RunState::Running,
            2 => RunState::Paused,
            _ => RunState::Idle,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

#[derive(Clone)]
enum Cell {
    Local(Arc<AtomicU8>),
    Mapped(Arc<MappedCell>),
}

impl Cell {
    fn atomic(&self) -> &AtomicU8 {
        match self {
            Cell::Local(atomic) => atomic,
            Cell::Mapped(mapped) => mapped.atomic(),
        }
    }
}

struct MappedCell {
    map: MmapRaw,
    path: PathBuf,
    remove_on_drop: bool,
}

impl MappedCell {
    fn map(path: &Path, remove_on_drop: bool) -> AppResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = MmapRaw::map_raw(&file)?;
        if map.len() < 1 {
            return Err(QueueError::RunState(format!(
                "run state file {} is empty",
                path.display()
            )));
        }
        Ok(Self {
            map,
            path: path.to_path_buf(),
            remove_on_drop,
        })
    }

    #[allow(unsafe_code)]
    fn atomic(&self) -> &AtomicU8 {
        // SAFETY: the mapping is at least one byte long (checked in `map`) and
        // lives as long as `self`. AtomicU8 has the size and alignment of u8, and
        // the byte is only ever accessed through atomic operations.
        unsafe { &*(self.map.as_mut_ptr() as *const AtomicU8) }
    }
}

impl Drop for MappedCell {
    fn drop(&mut self) {
        if self.remove_on_drop {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "Failed to remove run state file: {}", e);
            }
        }
    }
}

/// Write side. Owned by the worker; deliberately not `Clone`.
pub struct RunStateWriter {
    cell: Cell,
}

impl RunStateWriter {
    pub(crate) fn set(&self, state: RunState) {
        self.cell.atomic().store(state as u8, Ordering::Release);
    }

    /// Map a run state file created by the controller.
    pub fn open(path: &Path) -> AppResult<Self> {
        let cell = MappedCell::map(path, false)?;
        debug!(path = %path.display(), "Mapped run state for writing");
        Ok(Self {
            cell: Cell::Mapped(Arc::new(cell)),
        })
    }
}

/// Read side. Cheap to clone and safe to read from any thread.
#[derive(Clone)]
pub struct RunStateReader {
    cell: Cell,
}

impl RunStateReader {
    /// Current value.
    pub fn get(&self) -> RunState {
        RunState::from_byte(self.cell.atomic().load(Ordering::Acquire))
    }

    /// Create a zeroed (Idle) run state file in `dir` and map it for reading.
    ///
    /// Returns the reader and the path to hand to the worker process. The file
    /// is removed when the last reader clone is dropped.
    pub fn create_shared(dir: &Path) -> AppResult<(Self, PathBuf)> {
        let path = dir.join(format!("maia-run-state-{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(1)?;
        drop(file);

        let cell = MappedCell::map(&path, true)?;
        Ok((
            Self {
                cell: Cell::Mapped(Arc::new(cell)),
            },
            path,
        ))
    }
}

impl fmt::Debug for RunStateReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunStateReader").field(&self.get()).finish()
    }
}

/// In-process run state for a thread-hosted worker.
pub fn local() -> (RunStateWriter, RunStateReader) {
    let atomic = Arc::new(AtomicU8::new(RunState::Idle as u8));
    (
        RunStateWriter {
            cell: Cell::Local(atomic.clone()),
        },
        RunStateReader {
            cell: Cell::Local(atomic),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_writer_is_seen_by_readers() {
        let (writer, reader) = local();
        let other = reader.clone();
        assert_eq!(reader.get(), RunState::Idle);

        writer.set(RunState::Running);
        assert_eq!(reader.get(), RunState::Running);
        assert_eq!(other.get(), RunState::Running);

        writer.set(RunState::Idle);
        assert_eq!(other.get(), RunState::Idle);
    }

    #[test]
    fn test_mapped_state_crosses_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, path) = RunStateReader::create_shared(dir.path()).unwrap();
        assert_eq!(reader.get(), RunState::Idle);

        // A second, independent mapping stands in for the worker process.
        let writer = RunStateWriter::open(&path).unwrap();
        writer.set(RunState::Running);
        assert_eq!(reader.get(), RunState::Running);
        writer.set(RunState::Idle);
        assert_eq!(reader.get(), RunState::Idle);

        drop(writer);
        assert!(path.exists());
        drop(reader);
        assert!(!path.exists());
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunStateWriter::open(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(RunState::Paused.to_string(), "Paused");
    }
}
