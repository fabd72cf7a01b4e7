//! Enumerate, select, and allocate per-node revisions.

use std::fs::{self, File};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::error::{FsError, Result};
use crate::node;

/// Entries whose name parses as a non-negative decimal integer, within a
/// node directory, ignoring everything else (markers, stray files).
///
/// Returns `None` if the node directory doesn't exist or has no numeric
/// entries; an I/O error for anything else (permission denied, etc.)
pub fn latest_version_in(node: &Utf8Path) -> Result<Option<u64>> {
    let entries = match fs::read_dir(node) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut max = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Ok(n) = name.parse::<u64>() {
            max = Some(max.map_or(n, |m: u64| m.max(n)));
        }
    }
    Ok(max)
}

/// The physical path of the newest revision file in `node`, without regard
/// to whether the node is tombstoned (callers that care check that first).
pub fn latest_path_in(node: &Utf8Path, v: u64) -> Utf8PathBuf {
    node.join(v.to_string())
}

/// Resolve the physical path of the newest *visible* revision for a node
/// already known to be a live file node.
pub fn latest_path(node: &Utf8Path) -> Result<Utf8PathBuf> {
    match latest_version_in(node)? {
        Some(v) => Ok(latest_path_in(node, v)),
        None => Err(FsError::NotFound),
    }
}

/// Compute and prepare the physical destination for a new revision.
///
/// On return, the destination either doesn't exist yet (first write, or a
/// resurrection) or is freshly seeded with the prior revision's content and
/// attributes (an ordinary modify). Either way, the caller opens it next.
pub fn new_path(node: &Utf8Path) -> Result<Utf8PathBuf> {
    if node::is_directory(node) {
        return Err(FsError::IsDirectory);
    }

    match latest_version_in(node)? {
        None => {
            fs::create_dir_all(node)?;
            set_owner_rwx(node)?;
            Ok(latest_path_in(node, 0))
        }
        Some(n) if node::is_deleted(node) => {
            node::undelete(node)?;
            // No clone: the resurrected file starts with fresh content.
            Ok(latest_path_in(node, n + 1))
        }
        Some(n) => {
            let from = latest_path_in(node, n);
            let to = latest_path_in(node, n + 1);
            clone_revision(&from, &to)?;
            Ok(to)
        }
    }
}

#[cfg(unix)]
fn set_owner_rwx(node: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(node)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(node, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_rwx(_node: &Utf8Path) -> Result<()> {
    Ok(())
}

/// A full attribute-preserving copy of one revision file to the next:
/// content, permission bits, ownership, access/modify times, and extended
/// attributes when the backing filesystem has any.
///
/// Copies into a temporary file in the same node directory, restores
/// attributes on that temporary file, then renames it into place -- the
/// same "copy to `.part`, then rename" shape this project has always used
/// to guarantee a revision file is never observed half-written. Never
/// mutates `from`.
pub fn clone_revision(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    debug!(%from, %to, "cloning revision");
    let dir = to.parent().unwrap_or(Utf8Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".revision-")
        .tempfile_in(dir)
        .map_err(|e| {
            warn!(%from, %to, error = %e, "couldn't open temporary file for clone");
            FsError::Io(e)
        })?;

    let mut src = File::open(from)?;
    io::copy(&mut src, tmp.as_file_mut()).map_err(|e| {
        warn!(%from, %to, error = %e, "revision clone failed");
        FsError::Io(e)
    })?;
    tmp.as_file().sync_all()?;
    drop(src);

    let tmp_path = Utf8Path::from_path(tmp.path()).ok_or(FsError::InvalidName)?;
    if let Err(e) = copy_ownership(from, tmp_path) {
        warn!(%from, %to, error = %e, "couldn't preserve ownership on clone");
    }
    if let Err(e) = copy_times(from, tmp_path) {
        warn!(%from, %to, error = %e, "couldn't preserve timestamps on clone");
    }
    if let Err(e) = copy_xattrs(from, tmp_path) {
        warn!(%from, %to, error = %e, "couldn't preserve xattrs on clone");
    }

    tmp.persist(to).map_err(|e| {
        let err = e.error;
        warn!(%from, %to, error = %err, "couldn't publish cloned revision");
        FsError::Io(err)
    })?;

    Ok(())
}

#[cfg(unix)]
fn copy_ownership(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    use std::os::unix::fs::MetadataExt;
    let meta = fs::metadata(from)?;
    std::os::unix::fs::chown(to, Some(meta.uid()), Some(meta.gid()))
}

#[cfg(not(unix))]
fn copy_ownership(_from: &Utf8Path, _to: &Utf8Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn copy_times(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    use rustix::fs::{Timespec, Timestamps, utimensat, AtFlags, CWD};

    let meta = fs::metadata(from)?;
    let atime = meta.accessed()?;
    let mtime = meta.modified()?;

    let to_timespec = |t: std::time::SystemTime| -> Timespec {
        match t.duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => Timespec {
                tv_sec: d.as_secs() as _,
                tv_nsec: d.subsec_nanos() as _,
            },
            Err(e) => {
                let d = e.duration();
                Timespec {
                    tv_sec: -(d.as_secs() as i64),
                    tv_nsec: d.subsec_nanos() as _,
                }
            }
        }
    };

    let times = Timestamps {
        last_access: to_timespec(atime),
        last_modification: to_timespec(mtime),
    };
    utimensat(CWD, to.as_std_path(), &times, AtFlags::empty())
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn copy_times(_from: &Utf8Path, _to: &Utf8Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn copy_xattrs(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    for name in xattr::list(from)? {
        if let Some(value) = xattr::get(from, &name)? {
            xattr::set(to, &name, &value)?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn copy_xattrs(_from: &Utf8Path, _to: &Utf8Path) -> io::Result<()> {
    Ok(())
}

/// Open the latest revision for reading.
pub fn open_latest(node: &Utf8Path) -> Result<File> {
    File::open(latest_path(node)?).map_err(Into::into)
}
