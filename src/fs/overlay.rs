//! Copy-on-write overlay filesystem.
//!
//! Reads fall through an in-memory upper layer to an immutable backing
//! store; writes, creates, and deletes land only in the upper layer
//! (deletes become whiteouts) and never touch the backing store.
//!
//! Containment invariant: every path is normalized and confined to the
//! declared mount point before *any* backing access, and symlink targets
//! resolve under the same confinement. The executor relies on this for
//! every path-like operand it evaluates.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{normalize_path, DirEntry, FileSystem, FsError, FsStat, MemFs};

pub struct OverlayFs {
    upper: MemFs,
    lower: Arc<dyn FileSystem>,
    /// Paths deleted in the overlay; they no longer exist even when the
    /// backing store still has them.
    whiteouts: RwLock<HashSet<String>>,
    /// Paths (re)created in the overlay, shadowing the backing store.
    shadowed: RwLock<HashSet<String>>,
    mount: String,
}

impl OverlayFs {
    /// Overlay `lower` under the given mount point. Paths outside the
    /// mount never reach the backing store.
    pub fn new(lower: Arc<dyn FileSystem>, mount: &str) -> Self {
        Self {
            upper: MemFs::new(),
            lower,
            whiteouts: RwLock::new(HashSet::new()),
            shadowed: RwLock::new(HashSet::new()),
            mount: normalize_path(mount),
        }
    }

    /// Normalize and confine: a path that normalizes outside the mount
    /// point is clamped onto it, so `..` chains cannot escape.
    fn confine(&self, path: &str) -> String {
        let normalized = normalize_path(path);
        if self.mount == "/" {
            return normalized;
        }
        if normalized == self.mount || normalized.starts_with(&format!("{}/", self.mount)) {
            normalized
        } else {
            normalize_path(&format!("{}/{}", self.mount, normalized))
        }
    }

    async fn is_whited_out(&self, path: &str) -> bool {
        let whiteouts = self.whiteouts.read().await;
        if whiteouts.contains(path) {
            return true;
        }
        // A whiteout on an ancestor hides the whole subtree.
        whiteouts
            .iter()
            .any(|w| path.starts_with(&format!("{}/", w)))
    }

    /// Exact-path check: a directory created in the upper layer merges
    /// with the backing store rather than shadowing its subtree.
    async fn in_upper(&self, path: &str) -> bool {
        self.shadowed.read().await.contains(path)
    }

    async fn mark_shadowed(&self, path: &str) {
        self.shadowed.write().await.insert(path.to_string());
        self.whiteouts.write().await.remove(path);
    }
}

#[async_trait]
impl FileSystem for OverlayFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let bytes = self.read_file_bytes(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "open"));
        }
        if self.in_upper(&path).await {
            return self.upper.read_file_bytes(&path).await;
        }
        self.lower.read_file_bytes(&path).await
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = self.confine(path);
        // Make sure ancestor directories exist in the upper layer; the
        // write itself never reaches the backing store.
        self.upper.mkdir(&super::dirname(&path), true).await.ok();
        self.upper.write_file(&path, content).await?;
        self.mark_shadowed(&path).await;
        Ok(())
    }

    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let path = self.confine(path);
        if !self.in_upper(&path).await && !self.is_whited_out(&path).await {
            // Copy-up on first append so existing backing content is kept.
            if let Ok(existing) = self.lower.read_file_bytes(&path).await {
                self.upper.mkdir(&super::dirname(&path), true).await.ok();
                self.upper.write_file(&path, &existing).await?;
                self.mark_shadowed(&path).await;
            }
        }
        self.upper.mkdir(&super::dirname(&path), true).await.ok();
        self.upper.append_file(&path, content).await?;
        self.mark_shadowed(&path).await;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return false;
        }
        if self.in_upper(&path).await {
            return self.upper.exists(&path).await;
        }
        self.lower.exists(&path).await || self.upper.exists(&path).await
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "stat"));
        }
        if self.in_upper(&path).await {
            return self.upper.stat(&path).await;
        }
        match self.lower.stat(&path).await {
            Ok(stat) => Ok(stat),
            Err(_) => self.upper.stat(&path).await,
        }
    }

    async fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "lstat"));
        }
        if self.in_upper(&path).await {
            return self.upper.lstat(&path).await;
        }
        match self.lower.lstat(&path).await {
            Ok(stat) => Ok(stat),
            Err(_) => self.upper.lstat(&path).await,
        }
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let path = self.confine(path);
        if !self.is_whited_out(&path).await && self.lower.exists(&path).await && !recursive {
            return Err(FsError::AlreadyExists { path, op: "mkdir" });
        }
        self.upper.mkdir(&path, true).await?;
        self.mark_shadowed(&path).await;
        let _ = recursive;
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "scandir"));
        }

        let mut merged: Vec<DirEntry> = Vec::new();
        let mut seen = HashSet::new();

        if let Ok(entries) = self.upper.read_dir(&path).await {
            for entry in entries {
                let full = if path == "/" {
                    format!("/{}", entry.name)
                } else {
                    format!("{}/{}", path, entry.name)
                };
                if !self.is_whited_out(&full).await {
                    seen.insert(entry.name.clone());
                    merged.push(entry);
                }
            }
        }

        match self.lower.read_dir(&path).await {
            Ok(entries) => {
                for entry in entries {
                    let full = if path == "/" {
                        format!("/{}", entry.name)
                    } else {
                        format!("{}/{}", path, entry.name)
                    };
                    if !seen.contains(&entry.name) && !self.is_whited_out(&full).await {
                        merged.push(entry);
                    }
                }
            }
            Err(e) => {
                if merged.is_empty() && !self.upper.exists(&path).await {
                    return Err(e);
                }
            }
        }

        merged.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(merged)
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "unlink"));
        }
        let existed_upper = self.upper.exists(&path).await;
        let existed_lower = self.lower.exists(&path).await;
        if !existed_upper && !existed_lower {
            return Err(FsError::not_found(&path, "unlink"));
        }
        if existed_upper {
            self.upper.remove(&path, recursive).await?;
        }
        // The deletion is recorded locally; the backing store keeps its
        // copy untouched.
        self.whiteouts.write().await.insert(path.clone());
        self.shadowed.write().await.remove(&path);
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), FsError> {
        let content = self.read_file_bytes(src).await?;
        self.write_file(dst, &content).await
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), FsError> {
        self.copy(src, dst).await?;
        self.remove(src, true).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<(), FsError> {
        let path = self.confine(path);
        if !self.in_upper(&path).await {
            let content = self.lower.read_file_bytes(&path).await?;
            self.upper.mkdir(&super::dirname(&path), true).await.ok();
            self.upper.write_file(&path, &content).await?;
            self.mark_shadowed(&path).await;
        }
        self.upper.chmod(&path, mode).await
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), FsError> {
        let link = self.confine(link);
        // Targets resolve under the same confinement when read back.
        self.upper.mkdir(&super::dirname(&link), true).await.ok();
        self.upper.symlink(target, &link).await?;
        self.mark_shadowed(&link).await;
        Ok(())
    }

    async fn hardlink(&self, existing: &str, new: &str) -> Result<(), FsError> {
        let content = self.read_file_bytes(existing).await?;
        self.write_file(new, &content).await
    }

    async fn read_link(&self, path: &str) -> Result<String, FsError> {
        let path = self.confine(path);
        if self.is_whited_out(&path).await {
            return Err(FsError::not_found(&path, "readlink"));
        }
        if self.in_upper(&path).await {
            return self.upper.read_link(&path).await;
        }
        self.lower.read_link(&path).await
    }

    async fn canonicalize(&self, path: &str) -> Result<String, FsError> {
        let path = self.confine(path);
        if self.in_upper(&path).await {
            return self.upper.canonicalize(&path).await;
        }
        match self.lower.canonicalize(&path).await {
            Ok(resolved) => Ok(self.confine(&resolved)),
            Err(e) => {
                if self.upper.exists(&path).await {
                    self.upper.canonicalize(&path).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn set_mtime(&self, path: &str, mtime: SystemTime) -> Result<(), FsError> {
        let path = self.confine(path);
        if !self.in_upper(&path).await {
            let content = self.lower.read_file_bytes(&path).await?;
            self.upper.mkdir(&super::dirname(&path), true).await.ok();
            self.upper.write_file(&path, &content).await?;
            self.mark_shadowed(&path).await;
        }
        self.upper.set_mtime(&path, mtime).await
    }

    async fn all_paths(&self) -> Vec<String> {
        let mut paths: HashSet<String> = self.upper.all_paths().await.into_iter().collect();
        for path in self.lower.all_paths().await {
            paths.insert(path);
        }
        let mut out: Vec<String> = Vec::new();
        for path in paths {
            if !self.is_whited_out(&path).await {
                out.push(path);
            }
        }
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backing() -> Arc<MemFs> {
        let fs = MemFs::new();
        fs.mkdir("/data", true).await.unwrap();
        fs.write_file("/data/base.txt", b"from lower").await.unwrap();
        Arc::new(fs)
    }

    #[tokio::test]
    async fn reads_fall_through_to_lower() {
        let lower = backing().await;
        let overlay = OverlayFs::new(lower, "/");
        assert_eq!(overlay.read_file("/data/base.txt").await.unwrap(), "from lower");
    }

    #[tokio::test]
    async fn writes_never_touch_lower() {
        let lower = backing().await;
        let overlay = OverlayFs::new(Arc::clone(&lower) as Arc<dyn FileSystem>, "/");
        overlay.write_file("/data/base.txt", b"changed").await.unwrap();
        assert_eq!(overlay.read_file("/data/base.txt").await.unwrap(), "changed");
        assert_eq!(lower.read_file("/data/base.txt").await.unwrap(), "from lower");
    }

    #[tokio::test]
    async fn remove_hides_from_listing_without_mutating_lower() {
        let lower = backing().await;
        let overlay = OverlayFs::new(Arc::clone(&lower) as Arc<dyn FileSystem>, "/");

        overlay.write_file("/data/new.txt", b"x").await.unwrap();
        overlay.remove("/data/new.txt", false).await.unwrap();
        overlay.remove("/data/base.txt", false).await.unwrap();

        let names: Vec<String> = overlay
            .read_dir("/data")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(names.is_empty());

        // Backing store untouched.
        assert!(lower.exists("/data/base.txt").await);
    }

    #[tokio::test]
    async fn recreate_after_whiteout() {
        let lower = backing().await;
        let overlay = OverlayFs::new(lower, "/");
        overlay.remove("/data/base.txt", false).await.unwrap();
        assert!(!overlay.exists("/data/base.txt").await);
        overlay.write_file("/data/base.txt", b"reborn").await.unwrap();
        assert_eq!(overlay.read_file("/data/base.txt").await.unwrap(), "reborn");
    }

    #[tokio::test]
    async fn dotdot_paths_confined_to_mount() {
        let lower = Arc::new(MemFs::new());
        lower.mkdir("/mnt/box", true).await.unwrap();
        lower.write_file("/mnt/box/inside", b"ok").await.unwrap();
        let overlay = OverlayFs::new(lower, "/mnt/box");

        // Escaping `..` chains clamp back onto the mount.
        overlay.write_file("/../../etc/passwd", b"nope").await.unwrap();
        let paths = overlay.all_paths().await;
        assert!(!paths.iter().any(|p| p == "/etc/passwd"));
        assert!(paths.iter().any(|p| p == "/mnt/box/etc/passwd"));
    }

    #[tokio::test]
    async fn append_copies_up_then_extends() {
        let lower = backing().await;
        let overlay = OverlayFs::new(Arc::clone(&lower) as Arc<dyn FileSystem>, "/");
        overlay.append_file("/data/base.txt", b" +more").await.unwrap();
        assert_eq!(
            overlay.read_file("/data/base.txt").await.unwrap(),
            "from lower +more"
        );
        assert_eq!(lower.read_file("/data/base.txt").await.unwrap(), "from lower");
    }
}
