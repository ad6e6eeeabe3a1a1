//! Archive module
//!
//! Packs a set of paths into a single TAR file and unpacks it again. Each
//! path is stored under its own file name, directories recursively, so the
//! relative tree is preserved on extraction.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Archive errors
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Nothing to archive")]
    Empty,

    #[error("Path has no file name: {0}")]
    Unnamed(PathBuf),

    #[error("Archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Extension used for temporary archives
pub const ARCHIVE_EXTENSION: &str = "tar";

/// Pack `paths` into a uniquely named archive inside `cache_dir`
pub fn archive(paths: &[PathBuf], cache_dir: &Path) -> ArchiveResult<PathBuf> {
    if paths.is_empty() {
        return Err(ArchiveError::Empty);
    }

    std::fs::create_dir_all(cache_dir)?;
    let archive_path = cache_dir.join(format!("{}.{}", uuid::Uuid::new_v4(), ARCHIVE_EXTENSION));

    let result = write_archive(paths, &archive_path);
    if result.is_err() {
        let _ = std::fs::remove_file(&archive_path);
    }
    result.map(|()| archive_path)
}

fn write_archive(paths: &[PathBuf], archive_path: &Path) -> ArchiveResult<()> {
    let file = BufWriter::new(File::create(archive_path)?);
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);

    for path in paths {
        let name = path
            .file_name()
            .ok_or_else(|| ArchiveError::Unnamed(path.clone()))?;
        if path.is_dir() {
            builder.append_dir_all(name, path)?;
        } else {
            builder.append_path_with_name(path, name)?;
        }
    }

    builder.into_inner()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

/// Unpack `archive_path` into `dest_dir`, creating it if needed
pub fn extract(archive_path: &Path, dest_dir: &Path) -> ArchiveResult<()> {
    std::fs::create_dir_all(dest_dir)?;
    let reader = BufReader::new(File::open(archive_path)?);
    tar::Archive::new(reader).unpack(dest_dir)?;
    Ok(())
}

/// [`archive`] on the blocking thread pool
pub async fn archive_async(paths: Vec<PathBuf>, cache_dir: PathBuf) -> ArchiveResult<PathBuf> {
    tokio::task::spawn_blocking(move || archive(&paths, &cache_dir)).await?
}

/// [`extract`] on the blocking thread pool
pub async fn extract_async(archive_path: PathBuf, dest_dir: PathBuf) -> ArchiveResult<()> {
    tokio::task::spawn_blocking(move || extract(&archive_path, &dest_dir)).await?
}
