//! In-memory filesystem backend.
//!
//! A flat map from normalized absolute paths to nodes. Files, directories,
//! and symlinks carry a mode and mtime; symlink resolution is bounded to
//! guard against loops.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{normalize_path, DirEntry, FileSystem, FsError, FsStat};

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
enum Node {
    File {
        content: Vec<u8>,
        mode: u32,
        mtime: SystemTime,
    },
    Dir {
        mode: u32,
        mtime: SystemTime,
    },
    Symlink {
        target: String,
        mode: u32,
        mtime: SystemTime,
    },
}

impl Node {
    fn file(content: Vec<u8>) -> Self {
        Node::File {
            content,
            mode: 0o644,
            mtime: SystemTime::now(),
        }
    }

    fn dir() -> Self {
        Node::Dir {
            mode: 0o755,
            mtime: SystemTime::now(),
        }
    }

    fn stat(&self, follow_target_missing: bool) -> FsStat {
        match self {
            Node::File {
                content,
                mode,
                mtime,
            } => FsStat {
                is_file: true,
                is_dir: false,
                is_symlink: false,
                mode: *mode,
                size: content.len() as u64,
                mtime: *mtime,
            },
            Node::Dir { mode, mtime } => FsStat {
                is_file: false,
                is_dir: true,
                is_symlink: false,
                mode: *mode,
                size: 0,
                mtime: *mtime,
            },
            Node::Symlink { target, mode, mtime } => FsStat {
                is_file: false,
                is_dir: false,
                is_symlink: true,
                mode: *mode,
                size: if follow_target_missing {
                    0
                } else {
                    target.len() as u64
                },
                mtime: *mtime,
            },
        }
    }
}

pub struct MemFs {
    nodes: RwLock<HashMap<String, Node>>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::dir());
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Seed a file, creating parent directories. For sandbox setup.
    pub async fn seed_file(&self, path: &str, content: &[u8]) {
        let mut nodes = self.nodes.write().await;
        let path = normalize_path(path);
        ensure_parents(&mut nodes, &path);
        nodes.insert(path, Node::file(content.to_vec()));
    }

    /// Seed a directory chain. For sandbox setup.
    pub async fn seed_dir(&self, path: &str) {
        let mut nodes = self.nodes.write().await;
        let path = normalize_path(path);
        ensure_parents(&mut nodes, &path);
        nodes.entry(path).or_insert_with(Node::dir);
    }

    /// Follow symlinks (bounded) to the physical path for `path`.
    fn follow(nodes: &HashMap<String, Node>, path: &str, op: &'static str) -> Result<String, FsError> {
        let mut current = normalize_path(path);
        for _ in 0..MAX_SYMLINK_HOPS {
            // Resolve symlinks in every ancestor, then the leaf.
            current = Self::follow_ancestors(nodes, &current, op)?;
            match nodes.get(&current) {
                Some(Node::Symlink { target, .. }) => {
                    current = if target.starts_with('/') {
                        normalize_path(target)
                    } else {
                        normalize_path(&format!("{}/{}", super::dirname(&current), target))
                    };
                }
                _ => return Ok(current),
            }
        }
        Err(FsError::SymlinkLoop {
            path: path.to_string(),
            op,
        })
    }

    fn follow_ancestors(
        nodes: &HashMap<String, Node>,
        path: &str,
        op: &'static str,
    ) -> Result<String, FsError> {
        let mut result = String::new();
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        for (idx, part) in parts.iter().enumerate() {
            result = format!("{}/{}", result, part);
            if idx + 1 == parts.len() {
                break;
            }
            let mut hops = 0;
            while let Some(Node::Symlink { target, .. }) = nodes.get(&result) {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(FsError::SymlinkLoop {
                        path: path.to_string(),
                        op,
                    });
                }
                result = if target.starts_with('/') {
                    normalize_path(target)
                } else {
                    normalize_path(&format!("{}/{}", super::dirname(&result), target))
                };
            }
        }
        if result.is_empty() {
            result = "/".to_string();
        }
        Ok(result)
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_parents(nodes: &mut HashMap<String, Node>, path: &str) {
    let mut current = String::new();
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return;
    }
    for part in &parts[..parts.len() - 1] {
        current = format!("{}/{}", current, part);
        nodes.entry(current.clone()).or_insert_with(Node::dir);
    }
}

fn children<'a>(
    nodes: &'a HashMap<String, Node>,
    dir: &str,
) -> impl Iterator<Item = (&'a String, &'a Node)> {
    let prefix = if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir)
    };
    nodes.iter().filter(move |(path, _)| {
        path.starts_with(&prefix)
            && path.len() > prefix.len()
            && !path[prefix.len()..].contains('/')
    })
}

#[async_trait]
impl FileSystem for MemFs {
    async fn read_file(&self, path: &str) -> Result<String, FsError> {
        let bytes = self.read_file_bytes(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let nodes = self.nodes.read().await;
        let physical = Self::follow(&nodes, path, "open")?;
        match nodes.get(&physical) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Dir { .. }) => Err(FsError::IsDirectory {
                path: path.to_string(),
                op: "read",
            }),
            _ => Err(FsError::not_found(path, "open")),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let physical = Self::follow(&nodes, path, "open")?;
        if matches!(nodes.get(&physical), Some(Node::Dir { .. })) {
            return Err(FsError::IsDirectory {
                path: path.to_string(),
                op: "open",
            });
        }
        let parent = super::dirname(&physical);
        if parent != "/" && !matches!(nodes.get(&parent), Some(Node::Dir { .. })) {
            return Err(FsError::not_found(parent, "open"));
        }
        nodes.insert(physical, Node::file(content.to_vec()));
        Ok(())
    }

    async fn append_file(&self, path: &str, content: &[u8]) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let physical = Self::follow(&nodes, path, "open")?;
        match nodes.get_mut(&physical) {
            Some(Node::File {
                content: existing,
                mtime,
                ..
            }) => {
                existing.extend_from_slice(content);
                *mtime = SystemTime::now();
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(FsError::IsDirectory {
                path: path.to_string(),
                op: "open",
            }),
            _ => {
                let parent = super::dirname(&physical);
                if parent != "/" && !matches!(nodes.get(&parent), Some(Node::Dir { .. })) {
                    return Err(FsError::not_found(parent, "open"));
                }
                nodes.insert(physical, Node::file(content.to_vec()));
                Ok(())
            }
        }
    }

    async fn exists(&self, path: &str) -> bool {
        let nodes = self.nodes.read().await;
        match Self::follow(&nodes, path, "stat") {
            Ok(physical) => nodes.contains_key(&physical),
            Err(_) => false,
        }
    }

    async fn stat(&self, path: &str) -> Result<FsStat, FsError> {
        let nodes = self.nodes.read().await;
        let physical = Self::follow(&nodes, path, "stat")?;
        nodes
            .get(&physical)
            .map(|n| n.stat(false))
            .ok_or_else(|| FsError::not_found(path, "stat"))
    }

    async fn lstat(&self, path: &str) -> Result<FsStat, FsError> {
        let nodes = self.nodes.read().await;
        let normalized = normalize_path(path);
        nodes
            .get(&normalized)
            .map(|n| n.stat(false))
            .ok_or_else(|| FsError::not_found(path, "lstat"))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let normalized = normalize_path(path);
        if nodes.contains_key(&normalized) {
            if recursive && matches!(nodes.get(&normalized), Some(Node::Dir { .. })) {
                return Ok(());
            }
            return Err(FsError::AlreadyExists {
                path: path.to_string(),
                op: "mkdir",
            });
        }
        let parent = super::dirname(&normalized);
        if !matches!(nodes.get(&parent), Some(Node::Dir { .. })) {
            if recursive {
                ensure_parents(&mut nodes, &normalized);
            } else {
                return Err(FsError::not_found(parent, "mkdir"));
            }
        }
        nodes.insert(normalized, Node::dir());
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let nodes = self.nodes.read().await;
        let physical = Self::follow(&nodes, path, "scandir")?;
        match nodes.get(&physical) {
            Some(Node::Dir { .. }) => {}
            Some(_) => {
                return Err(FsError::NotDirectory {
                    path: path.to_string(),
                    op: "scandir",
                })
            }
            None => return Err(FsError::not_found(path, "scandir")),
        }
        let mut entries: Vec<DirEntry> = children(&nodes, &physical)
            .map(|(child, node)| {
                let stat = node.stat(false);
                DirEntry {
                    name: super::basename(child),
                    is_file: stat.is_file,
                    is_dir: stat.is_dir,
                    is_symlink: stat.is_symlink,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn remove(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let normalized = normalize_path(path);
        match nodes.get(&normalized) {
            None => return Err(FsError::not_found(path, "unlink")),
            Some(Node::Dir { .. }) => {
                let has_children = children(&nodes, &normalized).next().is_some();
                if has_children && !recursive {
                    return Err(FsError::NotEmpty {
                        path: path.to_string(),
                        op: "rmdir",
                    });
                }
                let prefix = format!("{}/", normalized);
                nodes.retain(|p, _| p != &normalized && !p.starts_with(&prefix));
            }
            Some(_) => {
                nodes.remove(&normalized);
            }
        }
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let src_phys = Self::follow(&nodes, src, "copyfile")?;
        let node = nodes
            .get(&src_phys)
            .cloned()
            .ok_or_else(|| FsError::not_found(src, "copyfile"))?;
        let dst_norm = normalize_path(dst);
        match node {
            Node::Dir { .. } => {
                let prefix = format!("{}/", src_phys);
                let to_copy: Vec<(String, Node)> = nodes
                    .iter()
                    .filter(|(p, _)| p.starts_with(&prefix) || *p == &src_phys)
                    .map(|(p, n)| (p.clone(), n.clone()))
                    .collect();
                for (p, n) in to_copy {
                    let rel = &p[src_phys.len()..];
                    nodes.insert(format!("{}{}", dst_norm, rel), n);
                }
            }
            other => {
                ensure_parents(&mut nodes, &dst_norm);
                nodes.insert(dst_norm, other);
            }
        }
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<(), FsError> {
        self.copy(src, dst).await?;
        self.remove(src, true).await
    }

    async fn chmod(&self, path: &str, new_mode: u32) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let physical = Self::follow(&nodes, path, "chmod")?;
        match nodes.get_mut(&physical) {
            Some(Node::File { mode, .. })
            | Some(Node::Dir { mode, .. })
            | Some(Node::Symlink { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            None => Err(FsError::not_found(path, "chmod")),
        }
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let normalized = normalize_path(link);
        if nodes.contains_key(&normalized) {
            return Err(FsError::AlreadyExists {
                path: link.to_string(),
                op: "symlink",
            });
        }
        ensure_parents(&mut nodes, &normalized);
        nodes.insert(
            normalized,
            Node::Symlink {
                target: target.to_string(),
                mode: 0o777,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn hardlink(&self, existing: &str, new: &str) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let src_phys = Self::follow(&nodes, existing, "link")?;
        let node = nodes
            .get(&src_phys)
            .cloned()
            .ok_or_else(|| FsError::not_found(existing, "link"))?;
        let dst = normalize_path(new);
        if nodes.contains_key(&dst) {
            return Err(FsError::AlreadyExists {
                path: new.to_string(),
                op: "link",
            });
        }
        ensure_parents(&mut nodes, &dst);
        nodes.insert(dst, node);
        Ok(())
    }

    async fn read_link(&self, path: &str) -> Result<String, FsError> {
        let nodes = self.nodes.read().await;
        match nodes.get(&normalize_path(path)) {
            Some(Node::Symlink { target, .. }) => Ok(target.clone()),
            Some(_) => Err(FsError::InvalidArgument {
                path: path.to_string(),
                op: "readlink",
            }),
            None => Err(FsError::not_found(path, "readlink")),
        }
    }

    async fn canonicalize(&self, path: &str) -> Result<String, FsError> {
        let nodes = self.nodes.read().await;
        let physical = Self::follow(&nodes, path, "realpath")?;
        if nodes.contains_key(&physical) {
            Ok(physical)
        } else {
            Err(FsError::not_found(path, "realpath"))
        }
    }

    async fn set_mtime(&self, path: &str, new_mtime: SystemTime) -> Result<(), FsError> {
        let mut nodes = self.nodes.write().await;
        let physical = Self::follow(&nodes, path, "utimes")?;
        match nodes.get_mut(&physical) {
            Some(Node::File { mtime, .. })
            | Some(Node::Dir { mtime, .. })
            | Some(Node::Symlink { mtime, .. }) => {
                *mtime = new_mtime;
                Ok(())
            }
            None => Err(FsError::not_found(path, "utimes")),
        }
    }

    async fn all_paths(&self) -> Vec<String> {
        let nodes = self.nodes.read().await;
        let mut paths: Vec<String> = nodes.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_round() {
        let fs = MemFs::new();
        fs.mkdir("/tmp", true).await.unwrap();
        fs.write_file("/tmp/a.txt", b"hello").await.unwrap();
        assert_eq!(fs.read_file("/tmp/a.txt").await.unwrap(), "hello");
        assert!(fs.exists("/tmp/a.txt").await);
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let fs = MemFs::new();
        fs.append_file("/log", b"a").await.unwrap();
        fs.append_file("/log", b"b").await.unwrap();
        assert_eq!(fs.read_file("/log").await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn mkdir_recursive_and_readdir() {
        let fs = MemFs::new();
        fs.mkdir("/a/b/c", true).await.unwrap();
        fs.write_file("/a/b/c/x", b"1").await.unwrap();
        fs.write_file("/a/b/y", b"2").await.unwrap();
        let names: Vec<String> = fs
            .read_dir("/a/b")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["c", "y"]);
    }

    #[tokio::test]
    async fn mkdir_non_recursive_requires_parent() {
        let fs = MemFs::new();
        assert!(fs.mkdir("/no/parent", false).await.is_err());
    }

    #[tokio::test]
    async fn remove_dir_requires_recursive() {
        let fs = MemFs::new();
        fs.mkdir("/d", true).await.unwrap();
        fs.write_file("/d/f", b"x").await.unwrap();
        assert!(fs.remove("/d", false).await.is_err());
        fs.remove("/d", true).await.unwrap();
        assert!(!fs.exists("/d").await);
        assert!(!fs.exists("/d/f").await);
    }

    #[tokio::test]
    async fn symlink_follow_and_loop_guard() {
        let fs = MemFs::new();
        fs.write_file("/real", b"data").await.unwrap();
        fs.symlink("/real", "/alias").await.unwrap();
        assert_eq!(fs.read_file("/alias").await.unwrap(), "data");
        assert!(fs.stat("/alias").await.unwrap().is_file);
        assert!(fs.lstat("/alias").await.unwrap().is_symlink);

        fs.symlink("/b", "/a").await.unwrap();
        fs.symlink("/a", "/b").await.unwrap();
        assert!(matches!(
            fs.read_file("/a").await,
            Err(FsError::SymlinkLoop { .. })
        ));
    }

    #[tokio::test]
    async fn relative_symlink_resolves_from_link_dir() {
        let fs = MemFs::new();
        fs.mkdir("/dir", true).await.unwrap();
        fs.write_file("/dir/file", b"x").await.unwrap();
        fs.symlink("file", "/dir/link").await.unwrap();
        assert_eq!(fs.read_file("/dir/link").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn rename_moves_content() {
        let fs = MemFs::new();
        fs.write_file("/src", b"payload").await.unwrap();
        fs.rename("/src", "/dst").await.unwrap();
        assert!(!fs.exists("/src").await);
        assert_eq!(fs.read_file("/dst").await.unwrap(), "payload");
    }
}
