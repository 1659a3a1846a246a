use super::classify::AssetType;
use super::id::AssetId;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const SIDECAR_SUFFIX: &str = ".asset.json";
pub const SIDECAR_VERSION: u32 = 1;

/// Path of the sidecar that binds `asset` to its id: `<asset>.asset.json`.
pub fn sidecar_path(asset: &Path) -> PathBuf {
    let mut name = asset.file_name().map(OsString::from).unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    asset.with_file_name(name)
}

pub fn is_sidecar(path: &Path) -> bool {
    path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.ends_with(SIDECAR_SUFFIX))
}

/// Fields as found on disk. Every field is optional so a partially written sidecar still yields
/// whatever it does carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SidecarFields {
    pub id: Option<String>,
    pub source: Option<String>,
    pub asset_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sidecar {
    pub version: u32,
    pub id: AssetId,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub source: String,
}

impl Sidecar {
    pub fn new(id: AssetId, asset_type: AssetType, source: impl Into<String>) -> Self {
        Self { version: SIDECAR_VERSION, id, asset_type, source: source.into() }
    }
}

/// Outcome of reconciling a sidecar with what the scanner observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub id: AssetId,
    /// The sidecar must be rewritten.
    pub dirty: bool,
    /// `id` was minted because the sidecar had none usable.
    pub minted: bool,
}

/// Reads a sidecar. Unreadable files and documents that are not JSON objects count as absent.
pub fn read_sidecar(path: &Path) -> Option<SidecarFields> {
    let text = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&text).ok()?;
    let object = value.as_object()?;
    let field = |key: &str| object.get(key).and_then(Value::as_str).map(|value| value.trim().to_string());
    Some(SidecarFields { id: field("id"), source: field("source"), asset_type: field("type") })
}

/// Decides the id for an asset given its (possibly missing) sidecar fields.
pub fn reconcile(fields: Option<&SidecarFields>, source: &str, asset_type: AssetType) -> Binding {
    let Some(fields) = fields else {
        return Binding { id: AssetId::new(), dirty: true, minted: true };
    };
    let parsed = fields.id.as_deref().filter(|id| !id.is_empty()).and_then(|id| id.parse::<AssetId>().ok());
    let (id, minted) = match parsed {
        Some(id) if !id.is_nil() => (id, false),
        _ => (AssetId::new(), true),
    };
    let source_matches = fields.source.as_deref() == Some(source);
    let type_matches = fields.asset_type.as_deref() == Some(asset_type.name());
    Binding { id, dirty: minted || !source_matches || !type_matches, minted }
}

/// Writes the sidecar through a hidden temporary sibling and a rename so readers never observe a
/// partially written document.
pub fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Sidecar path {} has no file name", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
    let mut bytes = serde_json::to_vec_pretty(sidecar).context("Failed to serialize sidecar")?;
    bytes.push(b'\n');
    fs::write(&tmp_path, &bytes).with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("Failed to move sidecar into place at {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sidecar_path_appends_suffix() {
        let path = sidecar_path(Path::new("/a/b/tex.png"));
        assert_eq!(path, PathBuf::from("/a/b/tex.png.asset.json"));
        assert!(is_sidecar(&path));
        assert!(!is_sidecar(Path::new("/a/b/tex.png")));
    }

    #[test]
    fn tolerant_reader_ignores_order_whitespace_and_extras() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("tex.png.asset.json");
        let id = AssetId::new();
        fs::write(
            &path,
            format!("{{\n  \"source\" :\"a/tex.png\",\"extra\": [1, 2],\n\t\"id\":   \"{id}\", \"type\":\"Texture\" }}"),
        )
        .expect("write sidecar");
        let fields = read_sidecar(&path).expect("fields");
        let binding = reconcile(Some(&fields), "a/tex.png", AssetType::Texture);
        assert_eq!(binding, Binding { id, dirty: false, minted: false });
    }

    #[test]
    fn empty_or_garbage_sidecars_are_handled() {
        let dir = tempdir().expect("temp dir");
        let empty = dir.path().join("empty.asset.json");
        fs::write(&empty, "{}").expect("write");
        let fields = read_sidecar(&empty).expect("empty object parses");
        let binding = reconcile(Some(&fields), "empty", AssetType::Other);
        assert!(binding.minted && binding.dirty);

        let garbage = dir.path().join("garbage.asset.json");
        fs::write(&garbage, "not json").expect("write");
        assert!(read_sidecar(&garbage).is_none());
        assert!(read_sidecar(&dir.path().join("missing.asset.json")).is_none());
    }

    #[test]
    fn id_without_source_is_only_dirty() {
        let id = AssetId::new();
        let fields = SidecarFields { id: Some(id.to_string()), source: None, asset_type: None };
        let binding = reconcile(Some(&fields), "mesh.obj", AssetType::Mesh);
        assert_eq!(binding, Binding { id, dirty: true, minted: false });
    }

    #[test]
    fn write_then_read_preserves_binding() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("cube.obj.asset.json");
        let sidecar = Sidecar::new(AssetId::new(), AssetType::Mesh, "models/cube.obj");
        write_sidecar(&path, &sidecar).expect("write sidecar");
        let fields = read_sidecar(&path).expect("read back");
        assert_eq!(fields.id, Some(sidecar.id.to_string()));
        assert_eq!(fields.source.as_deref(), Some("models/cube.obj"));
        assert_eq!(fields.asset_type.as_deref(), Some("Mesh"));
        let leftovers: Vec<_> = fs::read_dir(dir.path()).expect("list").collect();
        assert_eq!(leftovers.len(), 1, "temporary file should be renamed away");
    }
}
