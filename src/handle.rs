//! Open file/directory handle table backing `open`/`opendir` and the
//! `fh`-keyed calls that follow (`read`, `write`, `readdir`,
//! `release`/`releasedir`, `fsync`/`fsyncdir`).
//!
//! Same rationale and shape as [`crate::ino`], kept as a separate table
//! because handles and inodes have different lifetimes: a handle dies at
//! `release`, while an inode survives until `forget`.

use std::fs::File;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;

use crate::error::{FsError, Result};

pub type Fh = u64;

pub enum Open {
    File(File),
    /// A directory stream is just the node's already-resolved path; entries
    /// are read fresh on each `readdir` call rather than cached, since the
    /// backing store is the only source of truth.
    Dir(Utf8PathBuf),
}

#[derive(Default)]
pub struct Handles {
    table: Mutex<FxHashMap<Fh, Open>>,
    next: Mutex<Fh>,
}

impl Handles {
    pub fn new() -> Self {
        Handles {
            table: Mutex::new(FxHashMap::default()),
            next: Mutex::new(1),
        }
    }

    fn allocate(&self) -> Fh {
        let mut next = self.next.lock().unwrap();
        let fh = *next;
        *next += 1;
        fh
    }

    pub fn insert_file(&self, f: File) -> Fh {
        let fh = self.allocate();
        self.table.lock().unwrap().insert(fh, Open::File(f));
        fh
    }

    pub fn insert_dir(&self, path: Utf8PathBuf) -> Fh {
        let fh = self.allocate();
        self.table.lock().unwrap().insert(fh, Open::Dir(path));
        fh
    }

    /// Run `f` with the open file for `fh`, if any.
    pub fn with_file<T>(&self, fh: Fh, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut table = self.table.lock().unwrap();
        match table.get_mut(&fh) {
            Some(Open::File(file)) => f(file),
            Some(Open::Dir(_)) => Err(FsError::IsDirectory),
            None => Err(FsError::NotFound),
        }
    }

    pub fn dir_path(&self, fh: Fh) -> Result<Utf8PathBuf> {
        let table = self.table.lock().unwrap();
        match table.get(&fh) {
            Some(Open::Dir(path)) => Ok(path.clone()),
            Some(Open::File(_)) => Err(FsError::NotDirectory),
            None => Err(FsError::NotFound),
        }
    }

    /// Close and forget the handle. Closing happens implicitly via `Drop`
    /// on the removed entry; no leak is possible on any path that reaches
    /// here.
    pub fn release(&self, fh: Fh) {
        self.table.lock().unwrap().remove(&fh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn file_handles_round_trip() {
        let handles = Handles::new();
        let f = NamedTempFile::new().unwrap().reopen().unwrap();
        let fh = handles.insert_file(f);
        assert!(handles.with_file(fh, |_| Ok(())).is_ok());
        handles.release(fh);
        assert!(matches!(
            handles.with_file(fh, |_| Ok(())),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn dir_handles_reject_file_ops() {
        let handles = Handles::new();
        let fh = handles.insert_dir(Utf8PathBuf::from("/a"));
        assert!(matches!(
            handles.with_file(fh, |_| Ok(())),
            Err(FsError::IsDirectory)
        ));
    }
}
