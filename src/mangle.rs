//! Bijective translation between logical paths (what clients of the mount see)
//! and physical paths on the backing store (what's actually on disk).
//!
//! Every path segment, including the last, gets a `.node` suffix. This keeps
//! the revision files and markers a node directory holds (`0`, `1`, `dir`,
//! `deleted`) from ever colliding with a user-chosen child name.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{FsError, Result};

pub const NODE_SUFFIX: &str = ".node";
pub const DIR_MARKER: &str = "dir";
pub const DELETED_MARKER: &str = "deleted";

/// Suffix a single path component with `.node`.
pub fn mangle_segment(name: &str) -> String {
    format!("{name}{NODE_SUFFIX}")
}

/// Strip the `.node` suffix from a single path component.
///
/// Returns `None` if `name` doesn't end in `.node` -- i.e. it's not a
/// mangled segment at all (a marker file, a revision file, or a stray
/// entry left by manual tampering with the backing store).
pub fn demangle_segment(name: &str) -> Option<&str> {
    name.strip_suffix(NODE_SUFFIX)
}

/// The node directory for a logical path, given the backing root.
///
/// Never touches the filesystem. `logical` must be absolute; empty
/// components (from doubled `/`) are skipped.
pub fn versiondir(root: &Utf8Path, logical: &Utf8Path) -> Result<Utf8PathBuf> {
    let mut physical = root.to_owned();
    for seg in logical.components() {
        let seg = seg.as_str();
        if seg.is_empty() || seg == "/" {
            continue;
        }
        physical.push(mangle_segment(seg));
    }
    check_length(&physical)?;
    Ok(physical)
}

/// Join one more logical segment onto an already-mangled node directory.
///
/// Used by the inode table, which resolves one path component at a time
/// rather than a whole path, so it doesn't need to re-walk from the root.
pub fn versiondir_child(parent_node: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(FsError::InvalidName);
    }
    let child = parent_node.join(mangle_segment(name));
    check_length(&child)?;
    Ok(child)
}

/// Recover the logical path from a physical one beneath `root`.
///
/// If every segment demangles cleanly, returns `Ok(logical)`. If some
/// segment isn't fully mangled, still produces a best-effort logical path
/// (skipping the unmangled tail) but reports the failure via `Err`.
pub fn demangle(root: &Utf8Path, physical: &Utf8Path) -> (Utf8PathBuf, Result<()>) {
    let relative = match physical.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => return (Utf8PathBuf::from("/"), Err(FsError::InvalidName)),
    };

    let mut logical = Utf8PathBuf::from("/");
    let mut malformed = false;
    for seg in relative.components() {
        let seg = seg.as_str();
        match demangle_segment(seg) {
            Some(clean) if !clean.is_empty() && !clean.contains('/') && !clean.contains('\0') => {
                logical.push(clean);
            }
            _ => {
                malformed = true;
            }
        }
    }

    if malformed {
        (logical, Err(FsError::InvalidName))
    } else {
        (logical, Ok(()))
    }
}

/// Markers and revision-number names never look like each other by
/// construction, but this is here so callers don't have to remember the
/// literal strings.
pub fn is_marker_name(name: &str) -> bool {
    name == DIR_MARKER || name == DELETED_MARKER
}

fn check_length(p: &Utf8Path) -> Result<()> {
    // PATH_MAX on Linux; there's no portable way to query it per-filesystem,
    // so we use the usual conservative constant.
    const PATH_MAX: usize = 4096;
    if p.as_str().len() > PATH_MAX {
        Err(FsError::NameTooLong)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_maps_to_backing_root() {
        let root = Utf8Path::new("/backing");
        let got = versiondir(root, Utf8Path::new("/")).unwrap();
        assert_eq!(got, Utf8PathBuf::from("/backing"));
    }

    #[test]
    fn every_segment_is_mangled() {
        let root = Utf8Path::new("/backing");
        let got = versiondir(root, Utf8Path::new("/a/b/file.txt")).unwrap();
        assert_eq!(
            got,
            Utf8PathBuf::from("/backing/a.node/b.node/file.txt.node")
        );
    }

    #[test]
    fn doubled_slashes_collapse() {
        let root = Utf8Path::new("/backing");
        let got = versiondir(root, Utf8Path::new("/a//b")).unwrap();
        assert_eq!(got, Utf8PathBuf::from("/backing/a.node/b.node"));
    }

    #[test]
    fn demangle_round_trips() {
        let root = Utf8Path::new("/backing");
        let logical = Utf8Path::new("/a/b/file.txt");
        let physical = versiondir(root, logical).unwrap();
        let (back, result) = demangle(root, &physical);
        assert!(result.is_ok());
        assert_eq!(back, logical);
    }

    #[test]
    fn demangle_reports_malformed_but_best_effort() {
        let root = Utf8Path::new("/backing");
        let physical = root.join("a.node").join("stray");
        let (back, result) = demangle(root, &physical);
        assert!(result.is_err());
        assert_eq!(back, Utf8PathBuf::from("/a"));
    }

    #[test]
    fn too_long_fails() {
        let root = Utf8Path::new("/backing");
        let huge = "x".repeat(5000);
        let logical = Utf8PathBuf::from(format!("/{huge}"));
        assert!(matches!(
            versiondir(root, &logical),
            Err(FsError::NameTooLong)
        ));
    }

    #[test]
    fn child_rejects_slash_and_dotdot() {
        let parent = Utf8Path::new("/backing/a.node");
        assert!(versiondir_child(parent, "b").is_ok());
        assert!(versiondir_child(parent, "b/c").is_err());
        assert!(versiondir_child(parent, "..").is_err());
        assert!(versiondir_child(parent, ".").is_err());
    }
}
