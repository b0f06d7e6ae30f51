use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Build a tar archive holding `files`, keyed by absolute in-container path.
/// Entries are written relative to `/` with mode 0644.
pub fn pack(files: &BTreeMap<String, Bytes>) -> io::Result<Bytes> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let rel = path.trim_start_matches('/');
        if rel.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid file path '{path}'"),
            ));
        }
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, rel, data.as_ref())?;
    }
    Ok(Bytes::from(builder.into_inner()?))
}

/// Extract a downloaded archive into `dest`, dropping the leading path
/// component (the engine roots archives at the requested directory name).
/// File modes from the archive are kept, so private keys stay private.
pub fn unpack_stripped(archive: &[u8], dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut ar = tar::Archive::new(archive);
    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(rel) = strip_first(&path) else {
            continue;
        };
        let target = dest.join(&rel);
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mode = entry.header().mode()?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            std::fs::write(&target, buf)?;
            set_mode(&target, mode)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn strip_first(path: &Path) -> Option<PathBuf> {
    let rest: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .skip(1)
        .collect();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(archive: &[u8]) -> Vec<String> {
        let mut ar = tar::Archive::new(archive);
        ar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect()
    }

    #[test]
    fn pack_writes_relative_entries() {
        let mut files = BTreeMap::new();
        files.insert("/apply.sh".to_string(), Bytes::from_static(b"#!/bin/sh\n"));
        files.insert("/list.yaml".to_string(), Bytes::from_static(b"kind: List\n"));
        let tar = pack(&files).unwrap();
        assert_eq!(names(&tar), vec!["apply.sh", "list.yaml"]);
    }

    #[test]
    fn pack_rejects_root() {
        let mut files = BTreeMap::new();
        files.insert("/".to_string(), Bytes::new());
        assert!(pack(&files).is_err());
    }

    #[test]
    fn unpack_strips_leading_directory() {
        let mut files = BTreeMap::new();
        files.insert(
            "openshift.local.config/master/master-config.yaml".to_string(),
            Bytes::from_static(b"kind: MasterConfig\n"),
        );
        files.insert(
            "openshift.local.config/master/ca.crt".to_string(),
            Bytes::from_static(b"pem"),
        );
        let tar = pack(&files).unwrap();

        let dir = TempDir::new().unwrap();
        unpack_stripped(&tar, dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("master/master-config.yaml")).unwrap(),
            "kind: MasterConfig\n"
        );
        assert!(dir.path().join("master/ca.crt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn unpack_keeps_private_file_modes() {
        use std::os::unix::fs::PermissionsExt;

        let mut builder = tar::Builder::new(Vec::new());
        for (path, mode) in [("kube-apiserver/ca.key", 0o600), ("kube-apiserver/ca.crt", 0o644)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(3);
            header.set_mode(mode);
            header.set_cksum();
            builder.append_data(&mut header, path, &b"pem"[..]).unwrap();
        }
        let tar = builder.into_inner().unwrap();

        let dir = TempDir::new().unwrap();
        unpack_stripped(&tar, dir.path()).unwrap();
        let mode = |name: &str| {
            std::fs::metadata(dir.path().join(name)).unwrap().permissions().mode() & 0o777
        };
        assert_eq!(mode("ca.key"), 0o600);
        assert_eq!(mode("ca.crt"), 0o644);
    }
}
