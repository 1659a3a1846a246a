use super::classify::AssetType;
use super::id::AssetId;
use super::registry::AssetRegistry;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_MANIFEST_NAME: &str = "asset_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookedAsset {
    pub id: AssetId,
    /// Forward-slash path relative to the cooked folder.
    pub path: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookManifest {
    pub assets: Vec<CookedAsset>,
}

impl CookManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse manifest {}", path.display()))
    }
}

/// Copies every registered asset of a scanned registry into `out_dir`, keeping its relative layout,
/// and writes a manifest of `{id, path, type}` next to them. Sidecars are not copied; the manifest
/// carries their ids.
pub fn cook(registry: &AssetRegistry, out_dir: &Path, manifest_name: &str) -> Result<CookManifest> {
    let Some(root) = registry.root() else {
        bail!("cannot cook before the registry has scanned a root");
    };
    fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let out_dir = fs::canonicalize(out_dir).with_context(|| format!("Failed to resolve {}", out_dir.display()))?;
    if out_dir == root {
        bail!("cook output {} is the asset root itself", out_dir.display());
    }

    let mut manifest = CookManifest::default();
    for entry in registry.entries() {
        let Ok(relative) = entry.path.strip_prefix(&root) else {
            log::warn!(target: "assets", "{} is outside {}; not cooked", entry.path.display(), root.display());
            continue;
        };
        let target = out_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(&entry.path, &target)
            .with_context(|| format!("Failed to copy {} to {}", entry.path.display(), target.display()))?;
        let path = relative.components().map(|part| part.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        manifest.assets.push(CookedAsset { id: entry.id, path, asset_type: entry.asset_type });
    }

    let manifest_path = out_dir.join(manifest_name);
    let mut bytes = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
    bytes.push(b'\n');
    fs::write(&manifest_path, bytes).with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    log::info!(
        target: "assets",
        "cooked {} assets into {} (manifest {})",
        manifest.assets.len(),
        out_dir.display(),
        manifest_name
    );
    Ok(manifest)
}
