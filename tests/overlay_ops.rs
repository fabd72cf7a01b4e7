//! Exercises the Dispatcher's `do_*` logic directly against a temporary
//! backing root. These don't mount anything -- no kernel round-trip is
//! needed to exercise the revisioning semantics, only a real directory tree
//! to read and write.

use std::io::{Read, Seek, SeekFrom, Write};
use std::time::Duration;

use anyhow::{Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::tempdir;
use walkdir::WalkDir;

use chronofs::error::FsError;
use chronofs::fs::Fs;
use chronofs::mangle;

fn fs_at(root: &Utf8Path) -> Fs {
    Fs::new(root.to_owned(), Duration::from_secs(1))
}

fn files_under(root: &Utf8Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.expect("couldn't walk backing root"))
        .filter(|e| e.file_type().is_file())
        .count()
}

fn root_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_owned()).unwrap()
}

#[test]
fn root_getattr_succeeds_on_empty_backing_root() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let meta = fs.do_getattr(Utf8Path::new("/"))?;
    ensure!(meta.is_dir(), "the mount root must report as a directory");
    Ok(())
}

#[test]
fn root_survives_a_child_being_tombstoned() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let (mut file, _) = fs.do_create(Utf8Path::new("/a.txt"), 0o644)?;
    file.write_all(b"hi")?;
    drop(file);
    fs.do_unlink(Utf8Path::new("/a.txt"))?;

    ensure!(fs.do_getattr(Utf8Path::new("/"))?.is_dir());
    Ok(())
}

#[test]
fn create_write_read_round_trips() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let path = Utf8Path::new("/hello.txt");
    let (mut file, _meta) = fs.do_create(path, 0o644)?;
    file.write_all(b"revision zero")?;
    drop(file);

    let (mut file, meta) = fs.do_open(path, false)?;
    ensure!(meta.len() == 13);
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    ensure!(buf == "revision zero");
    Ok(())
}

#[test]
fn modifying_a_file_keeps_its_prior_revision_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let path = Utf8Path::new("/doc.txt");
    let (mut file, _) = fs.do_create(path, 0o644)?;
    file.write_all(b"v0")?;
    drop(file);

    let (mut file, _) = fs.do_open(path, true)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(b"v1-longer")?;
    drop(file);

    let node = mangle::versiondir(&root, path)?;
    ensure!(std::fs::read(node.join("0"))? == b"v0", "revision 0 was mutated");
    ensure!(std::fs::read(node.join("1"))? == b"v1-longer");
    Ok(())
}

#[test]
fn unlink_tombstones_without_erasing_history() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let path = Utf8Path::new("/gone.txt");
    let (mut file, _) = fs.do_create(path, 0o644)?;
    file.write_all(b"still here on disk")?;
    drop(file);
    let before = files_under(&root);

    fs.do_unlink(path)?;
    ensure!(matches!(fs.do_getattr(path), Err(FsError::NotFound)));

    let node = mangle::versiondir(&root, path)?;
    ensure!(node.join("deleted").is_file());
    ensure!(node.join("0").is_file(), "tombstoning must not delete revisions");
    ensure!(
        files_under(&root) == before + 1,
        "unlink must only add a tombstone marker, never remove files"
    );
    Ok(())
}

#[test]
fn recreating_a_tombstoned_file_resurrects_without_cloning_old_content() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let path = Utf8Path::new("/phoenix.txt");
    let (mut file, _) = fs.do_create(path, 0o644)?;
    file.write_all(b"old content")?;
    drop(file);
    fs.do_unlink(path)?;

    let (mut file, _) = fs.do_create(path, 0o644)?;
    file.write_all(b"new content")?;
    drop(file);

    let (mut file, meta) = fs.do_open(path, false)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    ensure!(buf == b"new content");
    ensure!(meta.len() == 11);
    Ok(())
}

#[test]
fn directories_round_trip_through_mkdir_and_readdir() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    fs.do_mkdir(Utf8Path::new("/docs"), 0o755)?;
    let (mut file, _) = fs.do_create(Utf8Path::new("/docs/a.txt"), 0o644)?;
    file.write_all(b"a")?;
    drop(file);
    fs.do_mkdir(Utf8Path::new("/docs/sub"), 0o755)?;

    let mut entries = fs.do_readdir(Utf8Path::new("/docs"))?;
    entries.sort();
    ensure!(
        entries
            == vec![
                ("a.txt".to_owned(), fuser::FileType::RegularFile),
                ("sub".to_owned(), fuser::FileType::Directory),
            ]
    );
    Ok(())
}

#[test]
fn tombstoned_children_are_hidden_from_readdir() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    fs.do_mkdir(Utf8Path::new("/docs"), 0o755)?;
    let (mut file, _) = fs.do_create(Utf8Path::new("/docs/a.txt"), 0o644)?;
    file.write_all(b"a")?;
    drop(file);
    fs.do_unlink(Utf8Path::new("/docs/a.txt"))?;

    let entries = fs.do_readdir(Utf8Path::new("/docs"))?;
    ensure!(entries.is_empty());
    Ok(())
}

#[test]
fn rmdir_is_permissive_about_non_empty_children() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    fs.do_mkdir(Utf8Path::new("/docs"), 0o755)?;
    let (mut file, _) = fs.do_create(Utf8Path::new("/docs/a.txt"), 0o644)?;
    file.write_all(b"a")?;
    drop(file);

    fs.do_rmdir(Utf8Path::new("/docs"))?;
    ensure!(matches!(fs.do_getattr(Utf8Path::new("/docs")), Err(FsError::NotFound)));
    Ok(())
}

#[test]
fn rename_moves_the_node_and_old_path_becomes_not_found() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    let (mut file, _) = fs.do_create(Utf8Path::new("/old.txt"), 0o644)?;
    file.write_all(b"content")?;
    drop(file);

    fs.do_rename(Utf8Path::new("/old.txt"), Utf8Path::new("/new.txt"))?;
    ensure!(matches!(fs.do_getattr(Utf8Path::new("/old.txt")), Err(FsError::NotFound)));
    ensure!(fs.do_getattr(Utf8Path::new("/new.txt")).is_ok());
    Ok(())
}

#[test]
fn create_on_an_existing_directory_fails() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    fs.do_mkdir(Utf8Path::new("/docs"), 0o755)?;
    ensure!(matches!(
        fs.do_create(Utf8Path::new("/docs"), 0o644),
        Err(FsError::IsDirectory)
    ));
    Ok(())
}

#[test]
fn symlink_and_readlink_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let root = root_path(&dir);
    let fs = fs_at(&root);

    fs.do_symlink(Utf8Path::new("/link"), Utf8Path::new("/target/does/not/exist"))?;
    let target = fs.do_readlink(Utf8Path::new("/link"))?;
    ensure!(target == Utf8Path::new("/target/does/not/exist"));
    Ok(())
}
