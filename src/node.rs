//! Pure predicates and marker mutators against a *physical* node directory.
//!
//! Everything here operates on a single node directory path and never
//! resolves a logical path itself -- that's `mangle`'s and `ino`'s job.

use std::fs::{self, OpenOptions};

use camino::Utf8Path;

use crate::error::{FsError, Result, io_exists_is, io_not_found_is};
use crate::mangle::{DELETED_MARKER, DIR_MARKER};

/// True iff `node` is on the backing store at all (as a directory).
pub fn exists(node: &Utf8Path) -> bool {
    node.is_dir()
}

/// True iff `node/dir` exists -- this node represents a directory.
pub fn is_directory(node: &Utf8Path) -> bool {
    node.join(DIR_MARKER).is_file()
}

/// True iff `node/deleted` exists -- this node is currently tombstoned.
pub fn is_deleted(node: &Utf8Path) -> bool {
    node.join(DELETED_MARKER).is_file()
}

/// Create `node/dir`, marking `node` as a directory. Never removed once set.
///
/// `node` is created first if it doesn't already exist, since a freshly
/// `mkdir`'d node needs somewhere to put the marker.
pub fn mark_directory(node: &Utf8Path) -> Result<()> {
    fs::create_dir_all(node)?;
    create_marker(node, DIR_MARKER)
}

/// Create `node/deleted`, tombstoning the node.
///
/// Exclusive-create: if the marker is already there, callers decide for
/// themselves whether that's success (idempotent tombstoning) or a
/// not-found/conflict condition -- see the Dispatcher for each operation's
/// policy. Here we just report the collision.
pub fn mark_deleted(node: &Utf8Path) -> Result<()> {
    create_marker(node, DELETED_MARKER)
}

/// Remove `node/deleted`. Fails with `NotFound` if it wasn't there.
pub fn undelete(node: &Utf8Path) -> Result<()> {
    fs::remove_file(node.join(DELETED_MARKER)).map_err(|e| io_not_found_is(e, FsError::NotFound))
}

fn create_marker(node: &Utf8Path, marker: &str) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(node.join(marker)) {
        Ok(_) => Ok(()),
        Err(e) => Err(io_exists_is(e, FsError::Exists)),
    }
}

/// The node's classification, used throughout the Dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Absent,
    Directory,
    File,
}

/// Classify a node directory per I2: directory iff `dir` marker present,
/// file iff at least one revision file and no `dir` marker, else absent
/// (which also covers "node directory doesn't exist yet").
pub fn classify(node: &Utf8Path) -> Result<Kind> {
    if !exists(node) {
        return Ok(Kind::Absent);
    }
    if is_directory(node) {
        return Ok(Kind::Directory);
    }
    if crate::revision::latest_version_in(node)?.is_some() {
        return Ok(Kind::File);
    }
    Ok(Kind::Absent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absent_node_classifies_absent() {
        let root = tempdir().unwrap();
        let node = Utf8Path::from_path(root.path()).unwrap().join("a.node");
        assert_eq!(classify(&node).unwrap(), Kind::Absent);
        assert!(!exists(&node));
    }

    #[test]
    fn directory_marker_makes_it_a_directory() {
        let root = tempdir().unwrap();
        let node = Utf8Path::from_path(root.path()).unwrap().join("a.node");
        mark_directory(&node).unwrap();
        assert!(is_directory(&node));
        assert_eq!(classify(&node).unwrap(), Kind::Directory);
    }

    #[test]
    fn deleted_marker_roundtrips() {
        let root = tempdir().unwrap();
        let node = Utf8Path::from_path(root.path()).unwrap().join("a.node");
        fs::create_dir_all(&node).unwrap();
        assert!(!is_deleted(&node));
        mark_deleted(&node).unwrap();
        assert!(is_deleted(&node));
        undelete(&node).unwrap();
        assert!(!is_deleted(&node));
        assert!(matches!(undelete(&node), Err(FsError::NotFound)));
    }

    #[test]
    fn marking_deleted_twice_collides() {
        let root = tempdir().unwrap();
        let node = Utf8Path::from_path(root.path()).unwrap().join("a.node");
        fs::create_dir_all(&node).unwrap();
        mark_deleted(&node).unwrap();
        assert!(matches!(mark_deleted(&node), Err(FsError::Exists)));
    }
}
