//! The seam between the kernel's inode-addressed FUSE protocol and this
//! crate's path-addressed node model.
//!
//! Grounded on the reference-counted inode-arena pattern used to bridge a
//! handle-based filesystem representation to FUSE's inode numbers: a table
//! keyed by inode, with `forget()` decrementing a kernel lookup count and
//! reaping the entry at zero. Simplified here to a plain path bijection,
//! since nodes are classified by marker file rather than by an inode-kind
//! tag.

use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;

use crate::error::{FsError, Result};

pub type Ino = u64;

pub const ROOT_INO: Ino = 1;

struct Entry {
    path: Utf8PathBuf,
    lookups: u64,
}

struct Table {
    by_ino: FxHashMap<Ino, Entry>,
    by_path: FxHashMap<Utf8PathBuf, Ino>,
    next_ino: Ino,
}

impl Table {
    fn new() -> Self {
        let mut by_ino = FxHashMap::default();
        let mut by_path = FxHashMap::default();
        let root = Utf8PathBuf::from("/");
        by_ino.insert(
            ROOT_INO,
            Entry {
                path: root.clone(),
                lookups: 1, // the root is never forgotten away
            },
        );
        by_path.insert(root, ROOT_INO);
        Table {
            by_ino,
            by_path,
            next_ino: ROOT_INO + 1,
        }
    }

    fn intern(&mut self, path: Utf8PathBuf) -> Ino {
        if let Some(&ino) = self.by_path.get(&path) {
            self.by_ino.get_mut(&ino).unwrap().lookups += 1;
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_path.insert(path.clone(), ino);
        self.by_ino.insert(ino, Entry { path, lookups: 1 });
        ino
    }
}

/// The inode table. One per mounted filesystem; shared behind a `Mutex`
/// since `fuser` dispatches concurrent kernel requests from several
/// threads.
pub struct Inodes {
    table: Mutex<Table>,
}

impl Default for Inodes {
    fn default() -> Self {
        Self::new()
    }
}

impl Inodes {
    pub fn new() -> Self {
        Inodes {
            table: Mutex::new(Table::new()),
        }
    }

    /// The logical path for an already-known inode, or `None` if the
    /// kernel handed us a stale/unknown one.
    pub fn resolve(&self, ino: Ino) -> Option<Utf8PathBuf> {
        let table = self.table.lock().unwrap();
        table.by_ino.get(&ino).map(|e| e.path.clone())
    }

    /// Resolve `parent_ino` to its path, join `name` onto it (validating it
    /// as a single well-formed component), allocate or reuse an inode for
    /// the result, and bump its kernel lookup count.
    pub fn lookup(&self, parent_ino: Ino, name: &str) -> Result<(Ino, Utf8PathBuf)> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FsError::InvalidName);
        }
        let mut table = self.table.lock().unwrap();
        let parent_path = table
            .by_ino
            .get(&parent_ino)
            .map(|e| e.path.clone())
            .ok_or(FsError::NotFound)?;
        let child_path = parent_path.join(name);
        let ino = table.intern(child_path.clone());
        Ok((ino, child_path))
    }

    /// Register a path under `ino` without bumping its lookup count,
    /// e.g. when the root itself needs resolving on `getattr(1)`.
    pub fn path_for(&self, ino: Ino) -> Result<Utf8PathBuf> {
        self.resolve(ino).ok_or(FsError::NotFound)
    }

    /// The kernel is done caching this inode for `nlookup` of the lookups
    /// we handed out; reap the entry once its count hits zero. Pure
    /// bookkeeping -- never touches the backing store (the backing store
    /// is the source of truth, not this table).
    pub fn forget(&self, ino: Ino, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut table = self.table.lock().unwrap();
        let Some(entry) = table.by_ino.get_mut(&ino) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(nlookup);
        if entry.lookups == 0 {
            let path = table.by_ino.remove(&ino).unwrap().path;
            table.by_path.remove(&path);
        }
    }

    /// After a rename, every inode rooted under the old path now lives
    /// under the new one. Inode numbers themselves never change across a
    /// rename (required by the FUSE contract); only the paths they
    /// resolve to do.
    pub fn rename_path(&self, old: &Utf8Path, new: &Utf8Path) {
        let mut table = self.table.lock().unwrap();
        let affected: Vec<Ino> = table
            .by_path
            .iter()
            .filter(|(p, _)| p.as_path() == old || p.starts_with(old))
            .map(|(_, &ino)| ino)
            .collect();

        for ino in affected {
            let entry = table.by_ino.get_mut(&ino).unwrap();
            let old_path = entry.path.clone();
            let suffix = old_path.strip_prefix(old).unwrap_or(Utf8Path::new(""));
            let new_path = if suffix.as_str().is_empty() {
                new.to_owned()
            } else {
                new.join(suffix)
            };
            table.by_path.remove(&old_path);
            entry.path = new_path.clone();
            table.by_path.insert(new_path, ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_preseeded() {
        let inodes = Inodes::new();
        assert_eq!(inodes.resolve(ROOT_INO), Some(Utf8PathBuf::from("/")));
    }

    #[test]
    fn lookup_allocates_and_reuses_inodes() {
        let inodes = Inodes::new();
        let (ino_a, path_a) = inodes.lookup(ROOT_INO, "a").unwrap();
        assert_eq!(path_a, Utf8PathBuf::from("/a"));
        let (ino_a2, _) = inodes.lookup(ROOT_INO, "a").unwrap();
        assert_eq!(ino_a, ino_a2);
    }

    #[test]
    fn forget_reaps_at_zero() {
        let inodes = Inodes::new();
        let (ino, _) = inodes.lookup(ROOT_INO, "a").unwrap();
        inodes.lookup(ROOT_INO, "a").unwrap(); // lookups == 2
        inodes.forget(ino, 1);
        assert!(inodes.resolve(ino).is_some());
        inodes.forget(ino, 1);
        assert!(inodes.resolve(ino).is_none());
    }

    #[test]
    fn rename_path_updates_descendants() {
        let inodes = Inodes::new();
        let (dir_ino, _) = inodes.lookup(ROOT_INO, "a").unwrap();
        let (child_ino, _) = inodes.lookup(dir_ino, "b").unwrap();

        inodes.rename_path(Utf8Path::new("/a"), Utf8Path::new("/z"));

        assert_eq!(inodes.resolve(dir_ino), Some(Utf8PathBuf::from("/z")));
        assert_eq!(inodes.resolve(child_ino), Some(Utf8PathBuf::from("/z/b")));
    }

    #[test]
    fn lookup_rejects_malformed_names() {
        let inodes = Inodes::new();
        assert!(inodes.lookup(ROOT_INO, "..").is_err());
        assert!(inodes.lookup(ROOT_INO, "a/b").is_err());
    }
}
