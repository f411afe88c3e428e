//! Virtual filesystem capability.
//!
//! The engine never touches a real filesystem: every path-like operand
//! (redirection targets, sourced scripts, glob walks) goes through the
//! async [`FileSystem`] trait. [`MemFs`] is the default in-memory backend;
//! [`OverlayFs`] layers copy-on-write mutations over an immutable backing
//! store with mount-point confinement.
//!
//! The executor is synchronous and reaches the async trait through
//! [`SyncFs`], which parks on the runtime handle (`block_in_place`).

mod memfs;
mod overlay;

pub use memfs::MemFs;
pub use overlay::OverlayFs;

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FsError {
    #[error("ENOENT: no such file or directory, {op} '{path}'")]
    NotFound { path: String, op: &'static str },

    #[error("EEXIST: file already exists, {op} '{path}'")]
    AlreadyExists { path: String, op: &'static str },

    #[error("EISDIR: illegal operation on a directory, {op} '{path}'")]
    IsDirectory { path: String, op: &'static str },

    #[error("ENOTDIR: not a directory, {op} '{path}'")]
    NotDirectory { path: String, op: &'static str },

    #[error("ENOTEMPTY: directory not empty, {op} '{path}'")]
    NotEmpty { path: String, op: &'static str },

    #[error("ELOOP: too many levels of symbolic links, {op} '{path}'")]
    SymlinkLoop { path: String, op: &'static str },

    #[error("EACCES: permission denied, {op} '{path}'")]
    PermissionDenied { path: String, op: &'static str },

    #[error("EINVAL: invalid argument, {op} '{path}'")]
    InvalidArgument { path: String, op: &'static str },
}

impl FsError {
    pub fn not_found(path: impl Into<String>, op: &'static str) -> Self {
        Self::NotFound {
            path: path.into(),
            op,
        }
    }
}

/// `stat`/`lstat` result.
#[derive(Debug, Clone)]
pub struct FsStat {
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub mode: u32,
    pub size: u64,
    pub mtime: SystemTime,
}

/// One `readdir` entry with type information.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Pluggable filesystem backend.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<String, FsError>;
    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError>;
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError>;
    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError>;
    async fn exists(&self, path: &str) -> bool;
    /// Follows symlinks.
    async fn stat(&self, path: &str) -> Result<FsStat, FsError>;
    /// Does not follow symlinks.
    async fn lstat(&self, path: &str) -> Result<FsStat, FsError>;
    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FsError>;
    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError>;
    async fn remove(&self, path: &str, recursive: bool) -> Result<(), FsError>;
    async fn copy(&self, src: &str, dst: &str) -> Result<(), FsError>;
    async fn rename(&self, src: &str, dst: &str) -> Result<(), FsError>;
    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError>;
    async fn symlink(&self, target: &str, link: &str) -> Result<(), FsError>;
    async fn hardlink(&self, existing: &str, new: &str) -> Result<(), FsError>;
    async fn read_link(&self, path: &str) -> Result<String, FsError>;
    /// Resolve symlinks to the canonical physical path.
    async fn canonicalize(&self, path: &str) -> Result<String, FsError>;
    async fn set_mtime(&self, path: &str, mtime: SystemTime) -> Result<(), FsError>;

    /// Resolve `path` against `base` and normalize. Pure.
    fn resolve(&self, base: &str, path: &str) -> String {
        resolve_path(base, path)
    }

    /// Every known path, for glob walking.
    async fn all_paths(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Normalize a path: leading `/`, `.` and `..` segments resolved, no
/// duplicate or trailing separators. `..` never escapes the root.
pub fn normalize_path(path: &str) -> String {
    let absolute = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let mut resolved: Vec<&str> = Vec::new();
    for part in absolute.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    if resolved.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", resolved.join("/"))
    }
}

/// Resolve `path` against `base` (used for cwd-relative operands).
pub fn resolve_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", base, path))
    }
}

pub fn dirname(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => "/".to_string(),
    }
}

pub fn basename(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(idx) => normalized[idx + 1..].to_string(),
        None => normalized,
    }
}

// ---------------------------------------------------------------------------
// Sync bridge
// ---------------------------------------------------------------------------

/// Synchronous view over an async [`FileSystem`], for the executor.
/// Every call parks the current thread on the runtime handle, so the
/// embedding host's reactor keeps running while a builtin does I/O.
#[derive(Clone)]
pub struct SyncFs {
    inner: Arc<dyn FileSystem>,
    handle: tokio::runtime::Handle,
}

impl SyncFs {
    pub fn new(inner: Arc<dyn FileSystem>, handle: tokio::runtime::Handle) -> Self {
        Self { inner, handle }
    }

    fn wait<F, T>(&self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        // On a runtime worker thread the park must be announced so the
        // scheduler can shift its tasks; elsewhere a plain block works.
        match tokio::runtime::Handle::try_current() {
            Ok(_) => tokio::task::block_in_place(|| self.handle.block_on(fut)),
            Err(_) => self.handle.block_on(fut),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String, FsError> {
        self.wait(self.inner.read_file(path))
    }

    pub fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        self.wait(self.inner.write_file(path, content))
    }

    pub fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        self.wait(self.inner.append_file(path, content))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.wait(self.inner.exists(path))
    }

    pub fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        self.wait(self.inner.stat(path))
    }

    pub fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        self.wait(self.inner.lstat(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.stat(path).map(|s| s.is_dir).unwrap_or(false)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.stat(path).map(|s| s.is_file).unwrap_or(false)
    }

    pub fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        self.wait(self.inner.mkdir(path, recursive))
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        self.wait(self.inner.read_dir(path))
    }

    pub fn remove(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        self.wait(self.inner.remove(path, recursive))
    }

    pub fn canonicalize(&self, path: &str) -> Result<String, FsError> {
        self.wait(self.inner.canonicalize(path))
    }

    pub fn resolve(&self, base: &str, path: &str) -> String {
        self.inner.resolve(base, path)
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.wait(self.inner.all_paths())
    }

    pub fn as_async(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize_path("/a/b/../c"), "/a/c");
        assert_eq!(normalize_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(normalize_path("/../../x"), "/x");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(resolve_path("/home/user", "docs"), "/home/user/docs");
        assert_eq!(resolve_path("/home/user", "/tmp"), "/tmp");
        assert_eq!(resolve_path("/home/user", "../other"), "/home/other");
    }

    #[test]
    fn dirname_basename() {
        assert_eq!(dirname("/a/b/c"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/"), "");
    }
}
