use clusterup_core::paths::DEFAULT_BASE_DIR;
use std::path::{Path, PathBuf};

/// Resolve the base directory.
///
/// Priority:
/// 1. `--base-dir` flag / `CLUSTERUP_BASE_DIR` env var (passed in as `explicit`)
/// 2. `clusterup.local` under `cwd`
///
/// Relative paths are made absolute against `cwd`; bind mounts need
/// absolute host paths.
pub fn resolve_base_dir(explicit: Option<&Path>) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_against(&cwd, explicit)
}

fn resolve_against(cwd: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
        None => cwd.join(DEFAULT_BASE_DIR),
    }
}
