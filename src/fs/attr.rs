//! `std::fs::Metadata` -> `fuser::FileAttr`, the same `mode & S_IFMT` bit
//! twiddling the project's tree-walking code already does to classify a
//! `stat()` result.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::time::{Duration, SystemTime};

use fuser::{FileAttr, FileType};

use crate::ino::Ino;

pub fn file_type_of(meta: &Metadata) -> FileType {
    let type_bits = meta.mode() & libc::S_IFMT;
    match type_bits {
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Build the `FileAttr` `fuser` wants from a `lstat()`-style `Metadata`.
///
/// `size`/`kind` are taken from `meta` directly; callers that need a
/// directory node to *report* as a directory (even though the node
/// directory's own `stat()` already says "directory", since it's a real
/// directory on the backing store) don't need to override anything here.
pub fn from_metadata(ino: Ino, meta: &Metadata) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size(),
        blocks: meta.blocks(),
        atime: system_time(meta.atime(), meta.atime_nsec()),
        mtime: system_time(meta.mtime(), meta.mtime_nsec()),
        ctime: system_time(meta.ctime(), meta.ctime_nsec()),
        crtime: system_time(meta.ctime(), meta.ctime_nsec()),
        kind: file_type_of(meta),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: 1, // every logical path has exactly one name in this model
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        SystemTime::UNIX_EPOCH - Duration::new((-secs) as u64, nsecs as u32)
    }
}
