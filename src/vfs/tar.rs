//! Loads a ustar rootfs archive into the in-memory VFS tree at startup.

use super::{Inode, InodeKind, Vfs};
use anyhow::{Context, Result};
use std::io::Read;

/// Populate `vfs` from a ustar byte stream (the container rootfs named by
/// `--rootfs`). Directory entries are synthesized implicitly from file paths
/// when the archive omits explicit directory headers, which real
/// `docker export` tarballs frequently do.
pub fn load_rootfs(vfs: &mut Vfs, data: &[u8]) -> Result<()> {
    let mut archive = ::tar::Archive::new(data);
    for entry in archive.entries().context("reading tar entries")? {
        let mut entry = entry.context("reading tar entry header")?;
        let path = entry.path().context("invalid entry path")?.to_string_lossy().into_owned();
        let path = format!("/{}", path.trim_end_matches('/'));
        let header = entry.header();

        match header.entry_type() {
            ::tar::EntryType::Directory => {
                vfs.ensure_dir(&path);
            }
            ::tar::EntryType::Symlink => {
                let target = header
                    .link_name()
                    .ok()
                    .flatten()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                vfs.insert(&path, Inode { kind: InodeKind::Symlink(target), mode: 0o777 });
            }
            ::tar::EntryType::Regular | ::tar::EntryType::Continuous => {
                let mut buf = Vec::with_capacity(header.size().unwrap_or(0) as usize);
                entry.read_to_end(&mut buf).context("reading tar entry body")?;
                let mode = header.mode().unwrap_or(0o644);
                vfs.insert(&path, Inode { kind: InodeKind::File(buf), mode });
            }
            _ => {
                // Device nodes, hardlinks, etc. are not faithfully modeled;
                // the synthesized /dev tree in dev.rs covers what guests
                // actually probe.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = ::tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = ::tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn loads_regular_files_and_synthesizes_dirs() {
        let data = build_tar(&[("bin/hello", b"ELF...")]);
        let mut vfs = Vfs::new();
        load_rootfs(&mut vfs, &data).unwrap();
        assert!(vfs.lookup("/bin/hello").is_some());
        assert!(vfs.lookup("/bin").is_some());
    }
}
