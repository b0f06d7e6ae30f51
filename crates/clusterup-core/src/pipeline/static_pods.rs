use std::collections::BTreeMap;

use crate::assets::{asset_str, list};
use crate::error::Result;
use crate::image::{expand, PullPolicy};

/// Values substituted into every static pod template.
#[derive(Debug, Clone)]
pub struct StaticPodValues {
    /// Image per manifest file stem; `${IMAGE}` in the template.
    pub images: BTreeMap<String, String>,
    pub pull_policy: PullPolicy,
    pub log_level: u8,
    pub api_port: u16,
    /// Control-plane config directory as the engine host sees it.
    pub master_config_dir: String,
}

/// Render every embedded static pod manifest, keyed by file name.
///
/// Every `${KEY}` placeholder must resolve, and a manifest with no image
/// configured is an error.
pub fn render(values: &StaticPodValues) -> Result<BTreeMap<String, String>> {
    let log_level = values.log_level.to_string();
    let api_port = values.api_port.to_string();

    let mut rendered = BTreeMap::new();
    for path in list("static-pods") {
        let file = path.trim_start_matches("static-pods/").to_string();
        let stem = file.trim_end_matches(".yaml");

        let mut vars = BTreeMap::from([
            ("PULL_POLICY", values.pull_policy.as_str()),
            ("LOG_LEVEL", log_level.as_str()),
            ("API_PORT", api_port.as_str()),
            ("MASTER_CONFIG_DIR", values.master_config_dir.as_str()),
        ]);
        if let Some(image) = values.images.get(stem) {
            vars.insert("IMAGE", image.as_str());
        }
        rendered.insert(file, expand(&asset_str(&path), &vars, true)?);
    }
    Ok(rendered)
}
