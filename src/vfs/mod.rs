//! The in-memory, tar-backed virtual filesystem (component D). Paths are
//! resolved against a tree of `Inode`s built once at startup from the
//! container rootfs archive, with `/proc/self/*` and `/dev/*` synthesized on
//! the fly rather than stored.

pub mod dev;
pub mod proc;
pub mod tar;

use crate::context::ExecuteContext;
use crate::error::Errno;
use std::collections::BTreeMap;

/// Symlinks nested deeper than this resolve to `ELOOP`, matching Linux's
/// own `MAXSYMLINKS` behavior (SPEC_FULL.md §4.E).
pub const MAX_SYMLINK_DEPTH: u32 = 40;

#[derive(Debug, Clone)]
pub enum InodeKind {
    File(Vec<u8>),
    Dir(BTreeMap<String, ()>),
    Symlink(String),
}

#[derive(Debug, Clone)]
pub struct Inode {
    pub kind: InodeKind,
    pub mode: u32,
}

pub struct Vfs {
    // Full normalized path -> inode. A flat map keeps path lookup O(log n)
    // without a real tree walk; directory listing reconstructs children by
    // prefix, which is good enough for a rootfs that is built once and never
    // mutated structurally by guests (no mkdir/rmdir support needed here).
    nodes: BTreeMap<String, Inode>,
}

fn normalize(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let mut out = String::from("/");
    for part in path.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if part == ".." {
            if let Some(pos) = out.trim_end_matches('/').rfind('/') {
                out.truncate(pos.max(1));
            }
            continue;
        }
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(part);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

impl Vfs {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Inode { kind: InodeKind::Dir(BTreeMap::new()), mode: 0o755 });
        Vfs { nodes }
    }

    pub fn ensure_dir(&mut self, path: &str) {
        let path = normalize(path);
        if !self.nodes.contains_key(&path) {
            self.nodes.insert(path.clone(), Inode { kind: InodeKind::Dir(BTreeMap::new()), mode: 0o755 });
        }
        self.link_parent(&path);
    }

    pub fn insert(&mut self, path: &str, inode: Inode) {
        let path = normalize(path);
        self.nodes.insert(path.clone(), inode);
        self.link_parent(&path);
    }

    fn link_parent(&mut self, path: &str) {
        if path == "/" {
            return;
        }
        let parent = match path.rfind('/') {
            Some(0) => "/".to_string(),
            Some(pos) => path[..pos].to_string(),
            None => return,
        };
        let name = path.rsplit('/').next().unwrap_or("").to_string();
        self.ensure_dir(&parent);
        if let Some(Inode { kind: InodeKind::Dir(children), .. }) = self.nodes.get_mut(&parent) {
            children.insert(name, ());
        }
    }

    pub fn lookup(&self, path: &str) -> Option<&Inode> {
        self.nodes.get(&normalize(path))
    }

    /// Resolve symlinks along the path, bounded by `MAX_SYMLINK_DEPTH`.
    /// Returns `ELOOP` if the bound is exceeded, `ENOENT` if any component is
    /// missing.
    pub fn resolve(&self, path: &str) -> Result<String, Errno> {
        let mut current = normalize(path);
        for _ in 0..MAX_SYMLINK_DEPTH {
            match self.nodes.get(&current) {
                Some(Inode { kind: InodeKind::Symlink(target), .. }) => {
                    current = if target.starts_with('/') {
                        normalize(target)
                    } else {
                        let parent = current.rfind('/').map(|p| &current[..p.max(1)]).unwrap_or("/");
                        normalize(&format!("{parent}/{target}"))
                    };
                }
                Some(_) => return Ok(current),
                None => return Err(Errno::ENOENT),
            }
        }
        Err(Errno::ELOOP)
    }

    /// Enforce "a path ending in `/` must name a directory" (SPEC_FULL.md §4.E).
    pub fn resolve_checked(&self, path: &str) -> Result<String, Errno> {
        let wants_dir = path.ends_with('/') && path != "/";
        let resolved = self.resolve(path)?;
        if wants_dir {
            match self.nodes.get(&resolved) {
                Some(Inode { kind: InodeKind::Dir(_), .. }) => Ok(resolved),
                Some(_) => Err(Errno::ENOTDIR),
                None => Err(Errno::ENOENT),
            }
        } else {
            Ok(resolved)
        }
    }

    pub fn read_file(&self, resolved_path: &str) -> Result<&[u8], Errno> {
        match self.nodes.get(resolved_path) {
            Some(Inode { kind: InodeKind::File(data), .. }) => Ok(data),
            Some(Inode { kind: InodeKind::Dir(_), .. }) => Err(Errno::EISDIR),
            _ => Err(Errno::ENOENT),
        }
    }

    pub fn list_dir(&self, resolved_path: &str) -> Result<Vec<String>, Errno> {
        match self.nodes.get(resolved_path) {
            Some(Inode { kind: InodeKind::Dir(children), .. }) => Ok(children.keys().cloned().collect()),
            Some(_) => Err(Errno::ENOTDIR),
            None => Err(Errno::ENOENT),
        }
    }
}

/// Read the content a guest `read(2)` on `path` should observe, dispatching
/// across regular VFS files, `/proc/self/*`, and `/dev/*` synthesis.
pub fn read_path(vfs: &Vfs, ctx: &ExecuteContext, exe_path: &str, path: &str) -> Result<Vec<u8>, Errno> {
    if let Some(dev) = dev::lookup_dev(path) {
        return Ok(dev.read(usize::MAX.min(4096)));
    }
    if proc::is_proc_path(path) {
        return proc::render(path, ctx, exe_path).ok_or(Errno::ENOENT);
    }
    let resolved = vfs.resolve_checked(path)?;
    vfs.read_file(&resolved).map(|b| b.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dotdot_and_dot() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
    }

    #[test]
    fn trailing_slash_on_file_is_notdir() {
        let mut vfs = Vfs::new();
        vfs.insert("/bin/hello", Inode { kind: InodeKind::File(vec![1, 2, 3]), mode: 0o755 });
        assert_eq!(vfs.resolve_checked("/bin/hello/"), Err(Errno::ENOTDIR));
        assert!(vfs.resolve_checked("/bin/hello").is_ok());
    }

    #[test]
    fn symlink_loop_hits_eloop() {
        let mut vfs = Vfs::new();
        vfs.insert("/a", Inode { kind: InodeKind::Symlink("/b".into()), mode: 0o777 });
        vfs.insert("/b", Inode { kind: InodeKind::Symlink("/a".into()), mode: 0o777 });
        assert_eq!(vfs.resolve("/a"), Err(Errno::ELOOP));
    }

    #[test]
    fn missing_path_is_enoent() {
        let vfs = Vfs::new();
        assert_eq!(vfs.resolve("/nope"), Err(Errno::ENOENT));
    }
}
