use bytes::Bytes;
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "assets/"]
struct Assets;

/// Bytes of a compiled-in asset.
///
/// # Panics
///
/// Panics if `path` was not compiled in. Asset paths are constants in this
/// crate, so a miss is a build defect rather than a runtime condition.
pub fn asset(path: &str) -> Bytes {
    match <Assets as Embed>::get(path) {
        Some(file) => Bytes::from(file.data.into_owned()),
        None => panic!("asset {path} is not compiled in"),
    }
}

pub fn asset_str(path: &str) -> String {
    String::from_utf8_lossy(&asset(path)).into_owned()
}

/// Paths of every asset under `dir`, sorted.
pub fn list(dir: &str) -> Vec<String> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    let mut paths: Vec<String> = <Assets as Embed>::iter()
        .filter(|p| p.starts_with(&prefix))
        .map(|p| p.into_owned())
        .collect();
    paths.sort();
    paths
}
