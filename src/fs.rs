//! The Operation Dispatcher: implements the filesystem operation
//! contract as `fuser::Filesystem`.
//!
//! The `do_*` methods below are plain functions over logical paths and
//! return this crate's own `Result<_, FsError>` -- they never see a
//! `fuser::Request` or a reply type, so they're testable without a kernel
//! or a mount. The `impl fuser::Filesystem for Fs` block at the bottom is
//! the thin shim: resolve inode -> path via `ino::Inodes`, call a `do_*`
//! method, convert the result to the appropriate reply.

pub mod attr;

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use tracing::{debug, instrument, warn};

use crate::error::{FsError, Result, io_not_found_is};
use crate::handle::Handles;
use crate::ino::{Ino, Inodes};
use crate::mangle;
use crate::node::{self, Kind};
use crate::revision;

pub struct Fs {
    root: Utf8PathBuf,
    inodes: Inodes,
    handles: Handles,
    attr_ttl: Duration,
}

impl Fs {
    pub fn new(root: Utf8PathBuf, attr_ttl: Duration) -> Self {
        Fs {
            root,
            inodes: Inodes::new(),
            handles: Handles::new(),
            attr_ttl,
        }
    }

    fn node_dir(&self, logical: &Utf8Path) -> Result<Utf8PathBuf> {
        mangle::versiondir(&self.root, logical)
    }

    /// [`node::classify`], with one addition: the backing root itself is
    /// always a live directory. `node::classify` can't know this -- it's a
    /// pure predicate over a node directory with no notion of "the mount's
    /// root" -- but the root has no `dir` marker of its own (markers only
    /// ever live inside mangled node directories) and no numeric revision
    /// entries, so the bare predicate would misclassify it as absent.
    fn classify(&self, node: &Utf8Path) -> Result<Kind> {
        if node == self.root {
            return Ok(Kind::Directory);
        }
        node::classify(node)
    }

    // -- getattr / access / statfs --

    /// `lstat()` the node appropriate to its kind, short-circuiting to
    /// not-found if it's tombstoned.
    pub fn do_getattr(&self, logical: &Utf8Path) -> Result<fs::Metadata> {
        let node = self.node_dir(logical)?;
        match self.classify(&node)? {
            Kind::Absent => Err(FsError::NotFound),
            Kind::Directory => {
                if node::is_deleted(&node) {
                    return Err(FsError::NotFound);
                }
                fs::symlink_metadata(&node).map_err(Into::into)
            }
            Kind::File => {
                if node::is_deleted(&node) {
                    return Err(FsError::NotFound);
                }
                let latest = revision::latest_path(&node)?;
                fs::symlink_metadata(&latest).map_err(Into::into)
            }
        }
    }

    pub fn do_statfs(&self) -> Result<Statfs> {
        statvfs(&self.root)
    }

    // -- mkdir / unlink / rmdir --

    pub fn do_mkdir(&self, logical: &Utf8Path, mode: u32) -> Result<fs::Metadata> {
        let node = self.node_dir(logical)?;
        match self.classify(&node)? {
            Kind::File => Err(FsError::Exists),
            Kind::Directory if node::is_deleted(&node) => {
                node::undelete(&node)?;
                fs::symlink_metadata(&node).map_err(Into::into)
            }
            Kind::Directory => Err(FsError::Exists),
            Kind::Absent => {
                node::mark_directory(&node)?;
                set_mode(&node, mode)?;
                fs::symlink_metadata(&node).map_err(Into::into)
            }
        }
    }

    pub fn do_unlink(&self, logical: &Utf8Path) -> Result<()> {
        let node = self.node_dir(logical)?;
        match self.classify(&node)? {
            Kind::Absent => Err(FsError::NotFound),
            Kind::Directory => Err(FsError::IsDirectory),
            Kind::File => {
                if node::is_deleted(&node) {
                    return Err(FsError::NotFound);
                }
                node::mark_deleted(&node)
            }
        }
    }

    /// Permissive: does not verify children are already tombstoned before
    /// tombstoning the directory itself.
    pub fn do_rmdir(&self, logical: &Utf8Path) -> Result<()> {
        let node = self.node_dir(logical)?;
        match self.classify(&node)? {
            Kind::Absent => Err(FsError::NotFound),
            Kind::File => Err(FsError::NotDirectory),
            Kind::Directory => node::mark_deleted(&node),
        }
    }

    // -- create / open / mknod --

    pub fn do_create(&self, logical: &Utf8Path, mode: u32) -> Result<(File, fs::Metadata)> {
        let node = self.node_dir(logical)?;
        let dest = revision::new_path(&node)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&dest)?;
        set_mode(&dest, mode)?;
        let meta = file.metadata()?;
        Ok((file, meta))
    }

    /// `write` is true when the kernel opened for read-write or
    /// write-only; the new revision is allocated *at open time*.
    pub fn do_open(&self, logical: &Utf8Path, write: bool) -> Result<(File, fs::Metadata)> {
        let node = self.node_dir(logical)?;
        if write {
            if node::is_directory(&node) {
                return Err(FsError::IsDirectory);
            }
            let dest = revision::new_path(&node)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&dest)?;
            let meta = file.metadata()?;
            Ok((file, meta))
        } else {
            match self.classify(&node)? {
                Kind::Absent => Err(FsError::NotFound),
                Kind::Directory => Err(FsError::IsDirectory),
                Kind::File if node::is_deleted(&node) => Err(FsError::NotFound),
                Kind::File => {
                    let latest = revision::latest_path(&node)?;
                    let file = File::open(&latest)?;
                    let meta = file.metadata()?;
                    Ok((file, meta))
                }
            }
        }
    }

    pub fn do_mknod(&self, logical: &Utf8Path, mode: u32, rdev: u32) -> Result<fs::Metadata> {
        let node = self.node_dir(logical)?;
        let dest = revision::new_path(&node)?;
        mknod_at(&dest, mode, rdev)?;
        fs::symlink_metadata(&dest).map_err(Into::into)
    }

    // -- read / write via the handle table --

    pub fn do_read(&self, fh: crate::handle::Fh, offset: i64, size: u32) -> Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};
        self.handles.with_file(fh, |file| {
            file.seek(SeekFrom::Start(offset.max(0) as u64))?;
            let mut buf = vec![0u8; size as usize];
            let n = file.read(&mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
    }

    pub fn do_write(&self, fh: crate::handle::Fh, offset: i64, data: &[u8]) -> Result<u32> {
        use std::io::{Seek, SeekFrom, Write};
        self.handles.with_file(fh, |file| {
            file.seek(SeekFrom::Start(offset.max(0) as u64))?;
            file.write_all(data)?;
            Ok(data.len() as u32)
        })
    }

    // -- readlink / symlink / link --

    pub fn do_readlink(&self, logical: &Utf8Path) -> Result<Utf8PathBuf> {
        let node = self.node_dir(logical)?;
        if node::is_deleted(&node) {
            return Err(FsError::NotFound);
        }
        let latest = revision::latest_path(&node)?;
        let target = fs::read_link(&latest)?;
        Utf8PathBuf::from_path_buf(target).map_err(|_| FsError::InvalidName)
    }

    pub fn do_symlink(&self, logical: &Utf8Path, target: &Utf8Path) -> Result<fs::Metadata> {
        let node = self.node_dir(logical)?;
        let dest = revision::new_path(&node)?;
        std::os::unix::fs::symlink(target, &dest)?;
        fs::symlink_metadata(&dest).map_err(Into::into)
    }

    pub fn do_link(&self, old: &Utf8Path, new: &Utf8Path) -> Result<fs::Metadata> {
        let old_node = self.node_dir(old)?;
        if node::is_directory(&old_node) {
            return Err(FsError::IsDirectory);
        }
        let old_latest = revision::latest_path(&old_node)?;
        let new_node = self.node_dir(new)?;
        let dest = revision::new_path(&new_node)?;
        fs::remove_file(&dest).ok(); // new_path may have cloned a placeholder; link wants a bare slot
        fs::hard_link(&old_latest, &dest)?;
        fs::symlink_metadata(&dest).map_err(Into::into)
    }

    // -- rename, with the one local recovery path below --

    pub fn do_rename(&self, old: &Utf8Path, new: &Utf8Path) -> Result<()> {
        let old_node = self.node_dir(old)?;
        match self.classify(&old_node)? {
            Kind::Absent => Err(FsError::NotFound),
            Kind::Directory => {
                let new_node = self.node_dir(new)?;
                if new_node.exists() {
                    warn!(%old, %new, "rename overwrites destination node, losing its history");
                    fs::remove_dir_all(&new_node).ok();
                }
                if let Some(parent) = new_node.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::rename(&old_node, &new_node)?;
                self.inodes.rename_path(old, new);
                Ok(())
            }
            Kind::File => {
                if node::is_deleted(&old_node) {
                    return Err(FsError::NotFound);
                }
                let old_latest = revision::latest_path(&old_node)?;
                node::mark_deleted(&old_node)?;

                let new_node = self.node_dir(new)?;
                let dest = match revision::new_path(&new_node) {
                    Ok(d) => d,
                    Err(e) => {
                        node::undelete(&old_node).ok();
                        return Err(e);
                    }
                };
                if let Err(e) = revision::clone_revision(&old_latest, &dest) {
                    node::undelete(&old_node).ok();
                    return Err(e);
                }
                self.inodes.rename_path(old, new);
                Ok(())
            }
        }
    }

    // -- chmod / chown / utimens / truncate --

    fn mutable_target(&self, logical: &Utf8Path) -> Result<Utf8PathBuf> {
        let node = self.node_dir(logical)?;
        match self.classify(&node)? {
            Kind::Absent => Err(FsError::NotFound),
            Kind::Directory => Ok(node),
            Kind::File if node::is_deleted(&node) => Err(FsError::NotFound),
            Kind::File => revision::latest_path(&node),
        }
    }

    pub fn do_chmod(&self, logical: &Utf8Path, mode: u32) -> Result<()> {
        let target = self.mutable_target(logical)?;
        set_mode(&target, mode)
    }

    pub fn do_chown(&self, logical: &Utf8Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let target = self.mutable_target(logical)?;
        std::os::unix::fs::chown(&target, uid, gid).map_err(Into::into)
    }

    pub fn do_truncate(&self, logical: &Utf8Path, size: u64) -> Result<()> {
        let node = self.node_dir(logical)?;
        if node::is_directory(&node) {
            return Err(FsError::IsDirectory);
        }
        let target = self.mutable_target(logical)?;
        let file = OpenOptions::new().write(true).open(&target)?;
        file.set_len(size).map_err(Into::into)
    }

    pub fn do_utimens(
        &self,
        logical: &Utf8Path,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> Result<()> {
        let target = self.mutable_target(logical)?;
        set_times(&target, atime, mtime)
    }

    // -- readdir --

    /// Listing entries for the node directory of `logical`, following the
    /// readdir protocol: tombstoned files and malformed entries are
    /// skipped, live directories and files with a latest revision are
    /// kept.
    pub fn do_readdir(&self, logical: &Utf8Path) -> Result<Vec<(String, FileType)>> {
        let node = self.node_dir(logical)?;
        let mut out = Vec::new();
        for entry in fs::read_dir(&node).map_err(|e| io_not_found_is(e, FsError::NotFound))? {
            let entry = entry?;
            let Some(raw_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Some(clean) = mangle::demangle_segment(&raw_name) else {
                continue; // marker file or stray entry, never a child node
            };
            let child_node = node.join(&raw_name);
            if node::is_directory(&child_node) {
                if !node::is_deleted(&child_node) {
                    out.push((clean.to_owned(), FileType::Directory));
                }
            } else if !node::is_deleted(&child_node) && revision::latest_path(&child_node).is_ok()
            {
                out.push((clean.to_owned(), FileType::RegularFile));
            }
        }
        Ok(out)
    }
}

fn set_mode(path: &Utf8Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(mode);
    fs::set_permissions(path, perms).map_err(Into::into)
}

fn set_times(
    path: &Utf8Path,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
) -> Result<()> {
    use rustix::fs::{AtFlags, CWD, Timespec, Timestamps, utimensat};

    let meta = fs::metadata(path)?;
    let to_ts = |t: SystemTime| -> Timespec {
        match t.duration_since(SystemTime::UNIX_EPOCH) {
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
    let current = |accessed: bool| -> std::io::Result<Timespec> {
        let t = if accessed { meta.accessed()? } else { meta.modified()? };
        Ok(to_ts(t))
    };

    let times = Timestamps {
        last_access: atime.map(to_ts).map_or_else(|| current(true), Ok)?,
        last_modification: mtime.map(to_ts).map_or_else(|| current(false), Ok)?,
    };
    utimensat(CWD, path.as_std_path(), &times, AtFlags::empty())
        .map_err(|e| FsError::Io(std::io::Error::from_raw_os_error(e.raw_os_error())))
}

#[cfg(unix)]
fn mknod_at(dest: &Utf8Path, mode: u32, rdev: u32) -> Result<()> {
    use rustix::fs::{CWD, FileType as RFileType, Mode, mknodat};
    fs::remove_file(dest).ok(); // new_path() may have precreated/cloned a regular-file placeholder
    let kind = match mode & libc::S_IFMT {
        libc::S_IFIFO => RFileType::Fifo,
        libc::S_IFCHR => RFileType::CharacterDevice,
        libc::S_IFBLK => RFileType::BlockDevice,
        libc::S_IFSOCK => RFileType::Socket,
        _ => RFileType::RegularFile,
    };
    let perm = Mode::from_raw_mode(mode & 0o7777);
    mknodat(CWD, dest.as_std_path(), kind, perm, rdev as u64)
        .map_err(|e| FsError::Io(std::io::Error::from_raw_os_error(e.raw_os_error())))
}

pub struct Statfs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

fn statvfs(root: &Utf8Path) -> Result<Statfs> {
    let vfs = rustix::fs::statvfs(root.as_std_path())
        .map_err(|e| FsError::Io(std::io::Error::from_raw_os_error(e.raw_os_error())))?;
    Ok(Statfs {
        blocks: vfs.f_blocks,
        bfree: vfs.f_bfree,
        bavail: vfs.f_bavail,
        files: vfs.f_files,
        ffree: vfs.f_ffree,
        bsize: vfs.f_bsize as u32,
        namelen: vfs.f_namemax as u32,
        frsize: vfs.f_frsize as u32,
    })
}

// ---------------------------------------------------------------------
// fuser::Filesystem: resolve inode -> path, call a do_* method, reply.
// ---------------------------------------------------------------------

const GENERATION: u64 = 0;

fn name_str(name: &OsStr) -> Result<&str> {
    name.to_str().ok_or(FsError::InvalidName)
}

fn attr_of(ino: Ino, meta: &fs::Metadata) -> FileAttr {
    attr::from_metadata(ino, meta)
}

impl fuser::Filesystem for Fs {
    #[instrument(skip(self, _req, reply))]
    fn lookup(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEntry) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (ino, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_getattr(&path) {
            Ok(meta) => reply.entry(&self.attr_ttl, &attr_of(ino, &meta), GENERATION),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: Ino, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: Ino, _fh: Option<u64>, reply: ReplyAttr) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_getattr(&path) {
            Ok(meta) => reply.attr(&self.attr_ttl, &attr_of(ino, &meta)),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };

        let result = (|| -> Result<()> {
            if let Some(mode) = mode {
                self.do_chmod(&path, mode)?;
            }
            if uid.is_some() || gid.is_some() {
                self.do_chown(&path, uid, gid)?;
            }
            if let Some(size) = size {
                self.do_truncate(&path, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                let now = || SystemTime::now();
                let resolve = |t: Option<TimeOrNow>| match t {
                    Some(TimeOrNow::SpecificTime(t)) => Some(t),
                    Some(TimeOrNow::Now) => Some(now()),
                    None => None,
                };
                self.do_utimens(&path, resolve(atime), resolve(mtime))?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            return reply.error(e.errno());
        }
        match self.do_getattr(&path) {
            Ok(meta) => reply.attr(&self.attr_ttl, &attr_of(ino, &meta)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: Ino, reply: ReplyData) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_readlink(&path) {
            Ok(target) => reply.data(target.as_str().as_bytes()),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (ino, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_mknod(&path, mode, rdev) {
            Ok(meta) => reply.entry(&self.attr_ttl, &attr_of(ino, &meta), GENERATION),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (ino, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_mkdir(&path, mode) {
            Ok(meta) => reply.entry(&self.attr_ttl, &attr_of(ino, &meta), GENERATION),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEmpty) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (_, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_unlink(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: Ino, name: &OsStr, reply: ReplyEmpty) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (_, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_rmdir(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        link_name: &OsStr,
        target: &std::path::Path,
        reply: ReplyEntry,
    ) {
        let name = match name_str(link_name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (ino, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        let Some(target) = Utf8Path::from_path(target) else {
            return reply.error(FsError::InvalidName.errno());
        };
        match self.do_symlink(&path, target) {
            Ok(meta) => reply.entry(&self.attr_ttl, &attr_of(ino, &meta), GENERATION),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        newparent: Ino,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let newname = match name_str(newname) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (_, old_path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        let (_, new_path) = match self.inodes.lookup(newparent, newname) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_rename(&old_path, &new_path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        newparent: Ino,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let old_path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let newname = match name_str(newname) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (new_ino, new_path) = match self.inodes.lookup(newparent, newname) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_link(&old_path, &new_path) {
            Ok(meta) => reply.entry(&self.attr_ttl, &attr_of(new_ino, &meta), GENERATION),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: Ino, flags: i32, reply: ReplyOpen) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        match self.do_open(&path, write) {
            Ok((file, _meta)) => {
                let fh = self.handles.insert_file(file);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.do_read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.do_write(fh, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        let _ = self.handles.with_file(fh, |f| {
            use std::io::Write;
            f.flush()?;
            Ok(())
        });
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.release(fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: Ino, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.handles.with_file(fh, |f| f.sync_all().map_err(Into::into)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: Ino, _flags: i32, reply: ReplyOpen) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let node = match self.node_dir(&path) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        if !node::exists(&node) {
            return reply.error(FsError::NotFound.errno());
        }
        let fh = self.handles.insert_dir(path);
        reply.opened(fh, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: Ino,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.handles.dir_path(fh) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        debug!(%path, ino, "readdir");

        let mut entries = vec![
            (".".to_owned(), FileType::Directory),
            ("..".to_owned(), FileType::Directory),
        ];
        match self.do_readdir(&path) {
            Ok(mut children) => entries.append(&mut children),
            Err(e) => return reply.error(e.errno()),
        }

        for (i, (name, kind)) in entries.into_iter().enumerate().skip(offset as usize) {
            // Offset + 1: fuser treats `offset` as "the offset to resume
            // at," so we hand back i + 1 as the offset for the *next* call.
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break; // kernel's buffer is full; it'll call us again.
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: Ino, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.handles.release(fh);
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        _ino: Ino,
        _fh: u64,
        _datasync: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: Ino, reply: ReplyStatfs) {
        match self.do_statfs() {
            Ok(s) => reply.statfs(
                s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namelen, s.frsize,
            ),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: Ino, _mask: i32, reply: ReplyEmpty) {
        let path = match self.inodes.path_for(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_getattr(&path) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: Ino,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = match name_str(name) {
            Ok(n) => n,
            Err(e) => return reply.error(e.errno()),
        };
        let (ino, path) = match self.inodes.lookup(parent, name) {
            Ok(v) => v,
            Err(e) => return reply.error(e.errno()),
        };
        match self.do_create(&path, mode) {
            Ok((file, meta)) => {
                let fh = self.handles.insert_file(file);
                reply.created(&self.attr_ttl, &attr_of(ino, &meta), GENERATION, fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }
}
