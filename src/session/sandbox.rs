//! Sandboxed working directory
//!
//! Every filesystem command runs against a [`Sandbox`]: a root directory and
//! a working directory that is always the root or one of its descendants.
//! Navigation that would leave the root lands on the root instead, and a
//! name that resolves outside the root is treated as if it did not exist.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Argument to `rm` that clears the working directory
pub const WILDCARD: &str = "*";

/// Filesystem errors
///
/// The display text is the reply sent to the peer.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Target directory does not exist.")]
    DirectoryNotFound,

    #[error("Target is not a directory.")]
    NotADirectory,

    #[error("Target file does not exist.")]
    FileNotFound,

    #[error("Target does not exist.")]
    NotFound,

    #[error("Some target does not exist!")]
    SomeNotFound,

    #[error("Cannot remove the working directory or its parents.")]
    Protected,

    #[error("Operation failed: {0}")]
    Failed(String),
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        FsError::Failed(e.to_string())
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Sorted contents of a directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Subdirectory names, alphabetical
    pub directories: Vec<String>,
    /// Other entry names, alphabetical
    pub files: Vec<String>,
}

impl DirListing {
    /// Render as one reply: highlighted directories first, then files
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.directories.is_empty() {
            let dirs: Vec<String> = self
                .directories
                .iter()
                .map(|name| {
                    console::style(name)
                        .blue()
                        .bright()
                        .force_styling(true)
                        .to_string()
                })
                .collect();
            out.push_str(&dirs.join("\n"));
            out.push('\n');
        }
        out.push_str(&self.files.join("\n"));
        out
    }
}

/// A working directory confined to a root
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
    cwd: PathBuf,
}

impl Sandbox {
    /// Open a sandbox at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self {
            cwd: root.clone(),
            root,
        })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current working directory
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Working directory relative to the root, `/` at the root
    pub fn display_cwd(&self) -> String {
        match self.cwd.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => "/".to_string(),
        }
    }

    /// Change the working directory
    ///
    /// `~` and `/` go to the root, `..` goes up but never past the root.
    /// On error the working directory is unchanged.
    pub fn change_dir(&mut self, target: &str) -> FsResult<()> {
        match target {
            "~" | "/" => {
                self.cwd = self.root.clone();
            }
            ".." => {
                self.cwd = match self.cwd.parent() {
                    Some(parent) if parent.starts_with(&self.root) => parent.to_path_buf(),
                    _ => self.root.clone(),
                };
            }
            _ => {
                let resolved = self
                    .cwd
                    .join(target)
                    .canonicalize()
                    .map_err(|_| FsError::DirectoryNotFound)?;
                if !resolved.starts_with(&self.root) {
                    self.cwd = self.root.clone();
                    return Ok(());
                }
                if !resolved.is_dir() {
                    return Err(FsError::NotADirectory);
                }
                self.cwd = resolved;
            }
        }
        Ok(())
    }

    /// List the working directory
    pub fn list(&self) -> FsResult<DirListing> {
        let mut listing = DirListing::default();
        for entry in fs::read_dir(&self.cwd)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                listing.directories.push(name);
            } else {
                listing.files.push(name);
            }
        }
        listing.directories.sort();
        listing.files.sort();
        Ok(listing)
    }

    /// Resolve a name under the working directory
    ///
    /// Returns `None` if nothing exists there or it lies outside the root.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        let resolved = self.cwd.join(name).canonicalize().ok()?;
        resolved.starts_with(&self.root).then_some(resolved)
    }

    /// Resolve every name, failing if any of them is missing
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> FsResult<Vec<PathBuf>> {
        names
            .iter()
            .map(|name| self.resolve(name.as_ref()).ok_or(FsError::SomeNotFound))
            .collect()
    }

    /// Locate a directory entry without following a final symlink
    ///
    /// The parent is canonicalised and must lie inside the root; the entry
    /// itself is returned as named, so a link stays a link.
    fn entry(&self, name: &str) -> Option<PathBuf> {
        let joined = self.cwd.join(name);
        let path = match joined.file_name() {
            Some(file_name) => joined.parent()?.canonicalize().ok()?.join(file_name),
            // Ends in `..`, which names a real directory.
            None => joined.canonicalize().ok()?,
        };
        if !path.starts_with(&self.root) {
            return None;
        }
        fs::symlink_metadata(&path).ok().map(|_| path)
    }

    /// Delete one file in the working directory, or everything for `*`
    ///
    /// A symlink is removed itself, never its target.
    pub fn remove_file(&self, name: &str) -> FsResult<()> {
        if name == WILDCARD {
            return self.clear();
        }

        let path = self.entry(name).ok_or(FsError::FileNotFound)?;
        if fs::symlink_metadata(&path)?.is_dir() {
            return Err(FsError::FileNotFound);
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Delete every entry of the working directory, keeping the directory
    pub fn clear(&self) -> FsResult<()> {
        for entry in fs::read_dir(&self.cwd)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Recursively delete a directory below the working directory
    ///
    /// A symlink to a directory is unlinked; the directory it points to is
    /// left alone.
    pub fn remove_dir(&self, name: &str) -> FsResult<()> {
        let path = self.entry(name).ok_or(FsError::NotFound)?;
        let metadata = fs::symlink_metadata(&path)?;

        if metadata.file_type().is_symlink() {
            if !path.is_dir() {
                return Err(FsError::NotADirectory);
            }
            fs::remove_file(path)?;
            return Ok(());
        }

        if !metadata.is_dir() {
            return Err(FsError::NotADirectory);
        }
        if self.cwd.starts_with(&path) {
            return Err(FsError::Protected);
        }
        fs::remove_dir_all(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("share");
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("docs/b.txt"), b"b").unwrap();
        fs::write(dir.path().join("outside.txt"), b"secret").unwrap();
        let sandbox = Sandbox::new(&root).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn test_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().join("fresh")).unwrap();
        assert!(sandbox.root().is_dir());
        assert_eq!(sandbox.cwd(), sandbox.root());
        assert_eq!(sandbox.display_cwd(), "/");
    }

    #[test]
    fn test_listing_order() {
        let (_dir, sandbox) = fixture();
        fs::create_dir(sandbox.root().join("alpha")).unwrap();
        fs::write(sandbox.root().join("Zed.txt"), b"").unwrap();

        let listing = sandbox.list().unwrap();
        assert_eq!(listing.directories, ["alpha", "docs"]);
        assert_eq!(listing.files, ["Zed.txt", "a.txt"]);

        let rendered = listing.render();
        assert!(rendered.find("docs").unwrap() < rendered.find("a.txt").unwrap());
        assert!(rendered.ends_with("Zed.txt\na.txt"));
    }

    #[test]
    fn test_render_files_only() {
        let listing = DirListing {
            directories: vec![],
            files: vec!["a".into(), "b".into()],
        };
        assert_eq!(listing.render(), "a\nb");
    }

    #[test]
    fn test_change_dir_and_back() {
        let (_dir, mut sandbox) = fixture();

        sandbox.change_dir("docs").unwrap();
        assert_eq!(sandbox.display_cwd(), "/docs");
        sandbox.change_dir("deep").unwrap();
        assert_eq!(sandbox.display_cwd(), "/docs/deep");
        sandbox.change_dir("..").unwrap();
        assert_eq!(sandbox.display_cwd(), "/docs");
        sandbox.change_dir("~").unwrap();
        assert_eq!(sandbox.cwd(), sandbox.root());
    }

    #[test]
    fn test_parent_clamped_at_root() {
        let (_dir, mut sandbox) = fixture();
        for _ in 0..5 {
            sandbox.change_dir("..").unwrap();
            assert_eq!(sandbox.cwd(), sandbox.root());
        }
    }

    #[test]
    fn test_escape_lands_on_root() {
        let (dir, mut sandbox) = fixture();
        sandbox.change_dir("docs").unwrap();

        sandbox.change_dir("../..").unwrap();
        assert_eq!(sandbox.cwd(), sandbox.root());

        sandbox.change_dir("docs").unwrap();
        sandbox.change_dir(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(sandbox.cwd(), sandbox.root());
    }

    #[test]
    fn test_change_dir_failures_keep_cwd() {
        let (_dir, mut sandbox) = fixture();
        sandbox.change_dir("docs").unwrap();
        let before = sandbox.cwd().to_path_buf();

        assert!(matches!(sandbox.change_dir("nope"), Err(FsError::DirectoryNotFound)));
        assert!(matches!(sandbox.change_dir("b.txt"), Err(FsError::NotADirectory)));
        assert_eq!(sandbox.cwd(), before);
    }

    #[test]
    fn test_outside_file_is_not_revealed() {
        let (_dir, mut sandbox) = fixture();
        sandbox.change_dir("docs").unwrap();

        sandbox.change_dir("../../outside.txt").unwrap();
        assert_eq!(sandbox.cwd(), sandbox.root());
        assert!(matches!(
            sandbox.change_dir("../no-such-dir"),
            Err(FsError::DirectoryNotFound)
        ));
    }

    #[test]
    fn test_resolve_outside_root_is_missing() {
        let (_dir, sandbox) = fixture();
        assert!(sandbox.resolve("a.txt").is_some());
        assert!(sandbox.resolve("../outside.txt").is_none());
        assert!(sandbox.resolve("missing").is_none());
        assert!(matches!(
            sandbox.resolve_all(&["a.txt", "missing"]),
            Err(FsError::SomeNotFound)
        ));
        assert_eq!(sandbox.resolve_all(&["a.txt", "docs"]).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_file() {
        let (dir, sandbox) = fixture();

        assert!(matches!(sandbox.remove_file("missing.txt"), Err(FsError::FileNotFound)));
        assert!(matches!(sandbox.remove_file("docs"), Err(FsError::FileNotFound)));
        assert!(matches!(
            sandbox.remove_file("../outside.txt"),
            Err(FsError::FileNotFound)
        ));
        assert!(dir.path().join("outside.txt").exists());

        sandbox.remove_file("a.txt").unwrap();
        assert!(!sandbox.root().join("a.txt").exists());
    }

    #[test]
    fn test_wildcard_clears_but_keeps_cwd() {
        let (_dir, mut sandbox) = fixture();
        sandbox.change_dir("docs").unwrap();

        sandbox.remove_file(WILDCARD).unwrap();
        assert!(sandbox.cwd().is_dir());
        assert_eq!(fs::read_dir(sandbox.cwd()).unwrap().count(), 0);
        assert!(sandbox.root().join("a.txt").exists());
    }

    #[test]
    fn test_remove_dir() {
        let (_dir, sandbox) = fixture();

        assert!(matches!(sandbox.remove_dir("missing"), Err(FsError::NotFound)));
        assert!(matches!(sandbox.remove_dir("a.txt"), Err(FsError::NotADirectory)));

        sandbox.remove_dir("docs").unwrap();
        assert!(!sandbox.root().join("docs").exists());
    }

    #[test]
    fn test_remove_dir_refuses_cwd_and_parents() {
        let (_dir, mut sandbox) = fixture();
        sandbox.change_dir("docs").unwrap();
        sandbox.change_dir("deep").unwrap();

        assert!(matches!(sandbox.remove_dir("."), Err(FsError::Protected)));
        assert!(matches!(sandbox.remove_dir(".."), Err(FsError::Protected)));
        assert!(sandbox.cwd().is_dir());
    }

    #[test]
    fn test_error_text_is_reply() {
        assert_eq!(FsError::FileNotFound.to_string(), "Target file does not exist.");
        assert_eq!(
            FsError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied")).to_string(),
            "Operation failed: denied"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rm_unlinks_symlink_not_target() {
        let (dir, sandbox) = fixture();
        let root = sandbox.root().to_path_buf();
        std::os::unix::fs::symlink(root.join("docs/b.txt"), root.join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside.txt"), root.join("outlink")).unwrap();

        sandbox.remove_file("link").unwrap();
        assert!(fs::symlink_metadata(root.join("link")).is_err());
        assert!(root.join("docs/b.txt").exists());

        sandbox.remove_file("outlink").unwrap();
        assert!(fs::symlink_metadata(root.join("outlink")).is_err());
        assert!(dir.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_rmdir_unlinks_directory_symlink() {
        let (_dir, sandbox) = fixture();
        let root = sandbox.root().to_path_buf();
        std::os::unix::fs::symlink(root.join("docs"), root.join("shortcut")).unwrap();
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("filelink")).unwrap();

        assert!(matches!(sandbox.remove_dir("filelink"), Err(FsError::NotADirectory)));
        sandbox.remove_dir("shortcut").unwrap();
        assert!(fs::symlink_metadata(root.join("shortcut")).is_err());
        assert!(root.join("docs/b.txt").exists());
    }
}
