use super::change_log::{AssetChange, ChangeKind, ChangeLog, DEFAULT_CHANGE_LOG_CAPACITY};
use super::classify::AssetType;
use super::id::AssetId;
use super::metadata::{self, Binding, Sidecar};
use crate::error::EngineError;
use crate::mesh::gltf_import::{self, GeometryReader, GltfGeometryReader, ImageSource};
use crate::mesh::{self, MeshData};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub id: AssetId,
    pub path: PathBuf,
    pub asset_type: AssetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    path: PathBuf,
    asset_time: Option<SystemTime>,
    meta_time: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMesh {
    pub id: AssetId,
    pub source: PathBuf,
    pub texture_ids: Vec<AssetId>,
    pub material_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTexture {
    pub id: AssetId,
    pub path: PathBuf,
    /// Pixel size when the file header could be decoded.
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedMaterial {
    pub key: String,
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub albedo_texture: Option<AssetId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GltfImport {
    pub mesh_id: AssetId,
    pub texture_ids: Vec<AssetId>,
    pub material_keys: Vec<String>,
}

impl GltfImport {
    /// Mesh id first, then textures, then material keys.
    pub fn produced_ids(&self) -> Vec<String> {
        std::iter::once(self.mesh_id.to_string())
            .chain(self.texture_ids.iter().map(AssetId::to_string))
            .chain(self.material_keys.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub entry_count: usize,
    pub changes: Vec<AssetChange>,
}

struct RegistryState {
    root: Option<PathBuf>,
    entries: Vec<AssetEntry>,
    entry_lookup: HashMap<AssetId, usize>,
    path_index: HashMap<String, AssetId>,
    states: HashMap<AssetId, FileState>,
    types: HashMap<AssetId, AssetType>,
    mesh_data: HashMap<AssetId, Arc<MeshData>>,
    meshes: HashMap<AssetId, CachedMesh>,
    textures: HashMap<AssetId, CachedTexture>,
    materials: HashMap<String, CachedMaterial>,
    /// Ids handed out for files imported from outside the scanned tree, by canonical path.
    transient_ids: HashMap<PathBuf, AssetId>,
    change_log: ChangeLog,
}

impl RegistryState {
    fn new(change_log_capacity: usize) -> Self {
        Self {
            root: None,
            entries: Vec::new(),
            entry_lookup: HashMap::new(),
            path_index: HashMap::new(),
            states: HashMap::new(),
            types: HashMap::new(),
            mesh_data: HashMap::new(),
            meshes: HashMap::new(),
            textures: HashMap::new(),
            materials: HashMap::new(),
            transient_ids: HashMap::new(),
            change_log: ChangeLog::new(change_log_capacity),
        }
    }

    fn evict(&mut self, id: AssetId, asset_type: AssetType) {
        self.mesh_data.remove(&id);
        self.meshes.remove(&id);
        self.textures.remove(&id);
        if asset_type == AssetType::Mesh {
            let prefix = id.material_prefix();
            self.materials.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        if path.is_absolute() {
            let root = self.root.as_ref()?;
            // The root is canonical; retry through the canonical path when `path` goes via a symlink.
            let relative = match path.strip_prefix(root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => fs::canonicalize(path).ok()?.strip_prefix(root).ok()?.to_path_buf(),
            };
            Some(path_key(&source_label(&relative)))
        } else {
            Some(path_key(&source_label(path)))
        }
    }
}

/// Canonical set of assets under a scan root, their stable ids, and the products imported from
/// them. Every operation takes an internal lock, so the registry can be shared across threads.
pub struct AssetRegistry {
    state: Mutex<RegistryState>,
    loads: Mutex<HashMap<AssetId, Arc<Mutex<()>>>>,
    reader: Box<dyn GeometryReader + Send + Sync>,
    change_log_capacity: usize,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANGE_LOG_CAPACITY)
    }

    pub fn with_capacity(change_log_capacity: usize) -> Self {
        Self::with_reader(change_log_capacity, Box::new(GltfGeometryReader))
    }

    pub fn with_reader(change_log_capacity: usize, reader: Box<dyn GeometryReader + Send + Sync>) -> Self {
        Self {
            state: Mutex::new(RegistryState::new(change_log_capacity)),
            loads: Mutex::new(HashMap::new()),
            reader,
            change_log_capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.lock().root.clone()
    }

    /// Walks `root`, binds every file to its id, and records what changed since the last scan.
    /// Scanning a different root than before discards all prior state.
    pub fn scan(&self, root: impl AsRef<Path>) -> ScanSummary {
        let root = normalize_root(root.as_ref());
        let mut state = self.lock();
        if state.root.as_ref().is_some_and(|previous| *previous != root) {
            log::info!(target: "assets", "scan root changed to {}; discarding previous state", root.display());
            *state = RegistryState::new(self.change_log_capacity);
        }
        state.root = Some(root.clone());

        let previous_states = std::mem::take(&mut state.states);
        let previous_types = std::mem::take(&mut state.types);
        let previous_paths = std::mem::take(&mut state.path_index);

        let mut next_states: HashMap<AssetId, FileState> = HashMap::new();
        let mut next_types: HashMap<AssetId, AssetType> = HashMap::new();
        let mut path_index: HashMap<String, AssetId> = HashMap::new();
        let mut entries: Vec<AssetEntry> = Vec::new();
        // (old id, new id) for files whose sidecar lost its id at an unchanged path.
        let mut reminted: Vec<(AssetId, AssetId)> = Vec::new();

        if !root.is_dir() {
            log::warn!(target: "assets", "scan root {} is not a directory", root.display());
        }

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!(target: "assets", "skipping unreadable path during scan: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() || metadata::is_sidecar(entry.path()) {
                continue;
            }
            let path = entry.path().to_path_buf();
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            let source = source_label(relative);
            let asset_type = AssetType::classify(relative);
            let meta_path = metadata::sidecar_path(&path);
            let fields = metadata::read_sidecar(&meta_path);
            let mut binding = metadata::reconcile(fields.as_ref(), &source, asset_type);
            if next_states.contains_key(&binding.id) {
                log::warn!(target: "assets", "{source} duplicates the id of another asset; minting a new one");
                binding = Binding { id: AssetId::new(), dirty: true, minted: true };
            }
            if binding.dirty {
                let sidecar = Sidecar::new(binding.id, asset_type, source.clone());
                if let Err(err) = metadata::write_sidecar(&meta_path, &sidecar) {
                    log::warn!(target: "assets", "could not write sidecar for {source}: {err:#}");
                }
            }

            let key = path_key(&source);
            if binding.minted {
                if let Some(&old) = previous_paths.get(&key) {
                    if old != binding.id && !next_states.contains_key(&old) {
                        reminted.push((old, binding.id));
                    }
                }
            }
            let asset_time = entry.metadata().ok().and_then(|meta| meta.modified().ok());
            let meta_time = fs::metadata(&meta_path).ok().and_then(|meta| meta.modified().ok());
            next_states.insert(binding.id, FileState { path: path.clone(), asset_time, meta_time });
            next_types.insert(binding.id, asset_type);
            path_index.insert(key, binding.id);
            entries.push(AssetEntry { id: binding.id, path, asset_type });
        }

        entries.sort_by(|a, b| (a.asset_type.order(), a.id).cmp(&(b.asset_type.order(), b.id)));
        state.entry_lookup = entries.iter().enumerate().map(|(index, entry)| (entry.id, index)).collect();

        // A reminted id only replaces its predecessor if the old id really disappeared.
        reminted.retain(|(old, _)| !next_states.contains_key(old));
        let reminted_new: HashSet<AssetId> = reminted.iter().map(|(_, new)| *new).collect();
        let reminted_old: HashSet<AssetId> = reminted.iter().map(|(old, _)| *old).collect();

        let mut emitted: Vec<(AssetId, AssetType, ChangeKind)> = Vec::new();
        for entry in &entries {
            let next = &next_states[&entry.id];
            let kind = match previous_states.get(&entry.id) {
                None if reminted_new.contains(&entry.id) => Some(ChangeKind::Metadata),
                None => Some(ChangeKind::Added),
                Some(previous) if previous.path != next.path => Some(ChangeKind::Moved),
                Some(previous) if previous.asset_time != next.asset_time => Some(ChangeKind::Modified),
                Some(previous) if previous.meta_time != next.meta_time => Some(ChangeKind::Metadata),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                emitted.push((entry.id, entry.asset_type, kind));
            }
        }

        let mut removed: Vec<(AssetId, AssetType)> = previous_states
            .iter()
            .filter(|(id, _)| !next_states.contains_key(id))
            .map(|(id, previous)| {
                let asset_type = previous_types.get(id).copied().unwrap_or_else(|| {
                    previous
                        .path
                        .strip_prefix(&root)
                        .map(AssetType::classify)
                        .unwrap_or_else(|_| AssetType::classify(&previous.path))
                });
                (*id, asset_type)
            })
            .collect();
        removed.sort_by_key(|(id, asset_type)| (asset_type.order(), *id));
        for (id, asset_type) in removed {
            if reminted_old.contains(&id) {
                state.evict(id, asset_type);
            } else {
                emitted.push((id, asset_type, ChangeKind::Removed));
            }
        }

        let mut changes = Vec::with_capacity(emitted.len());
        for (id, asset_type, kind) in emitted {
            if kind.invalidates_cache() {
                state.evict(id, asset_type);
            }
            let change = state.change_log.push(id, asset_type, kind);
            log::debug!(target: "assets", "{change}");
            changes.push(change);
        }

        state.entries = entries;
        state.states = next_states;
        state.types = next_types;
        state.path_index = path_index;
        if !changes.is_empty() {
            log::info!(
                target: "assets",
                "scanned {}: {} assets, {} changes",
                root.display(),
                state.entries.len(),
                changes.len()
            );
        }
        ScanSummary { entry_count: state.entries.len(), changes }
    }

    /// Scans the current root again. Without a previous scan this is a no-op.
    pub fn rescan(&self) -> ScanSummary {
        match self.root() {
            Some(root) => self.scan(root),
            None => {
                log::warn!(target: "assets", "rescan requested before any scan");
                ScanSummary::default()
            }
        }
    }

    pub fn entries(&self) -> Vec<AssetEntry> {
        self.lock().entries.clone()
    }

    pub fn find_entry(&self, id: AssetId) -> Option<AssetEntry> {
        let state = self.lock();
        state.entry_lookup.get(&id).and_then(|index| state.entries.get(*index)).cloned()
    }

    /// Looks an entry up by path, absolute or relative to the scan root. Matching ignores case and
    /// separator style.
    pub fn find_by_path(&self, path: impl AsRef<Path>) -> Option<AssetEntry> {
        let state = self.lock();
        let key = state.relative_key(path.as_ref())?;
        let id = state.path_index.get(&key)?;
        state.entry_lookup.get(id).and_then(|index| state.entries.get(*index)).cloned()
    }

    /// Cached mesh data, without importing.
    pub fn mesh_data(&self, id: AssetId) -> Option<Arc<MeshData>> {
        self.lock().mesh_data.get(&id).cloned()
    }

    /// Returns the sanitized mesh for `id`, importing it on first use. Concurrent callers asking
    /// for the same id wait for a single import.
    pub fn load_mesh_data(&self, id: AssetId) -> Option<Arc<MeshData>> {
        let (path, observed) = {
            let state = self.lock();
            if let Some(mesh) = state.mesh_data.get(&id) {
                return Some(Arc::clone(mesh));
            }
            let Some(entry) = state.entry_lookup.get(&id).and_then(|index| state.entries.get(*index)) else {
                log::warn!(target: "assets", "{}", EngineError::NotFound(format!("asset {id}")));
                return None;
            };
            if entry.asset_type != AssetType::Mesh {
                log::warn!(target: "assets", "asset {id} is a {}, not a mesh", entry.asset_type);
                return None;
            }
            (entry.path.clone(), state.states.get(&id).cloned())
        };

        let gate = {
            let mut loads = self.loads.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(loads.entry(id).or_default())
        };
        let _guard = gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mesh) = self.mesh_data(id) {
            return Some(mesh);
        }

        let outcome = match mesh::import_mesh(&path, &*self.reader) {
            Ok(mesh) => {
                let mesh = Arc::new(mesh);
                let mut state = self.lock();
                // A scan that ran during the import may have changed or dropped the file.
                if state.states.get(&id).cloned() == observed {
                    state.mesh_data.insert(id, Arc::clone(&mesh));
                }
                log::debug!(
                    target: "assets",
                    "imported {} ({} vertices, {} triangles)",
                    path.display(),
                    mesh.vertex_count(),
                    mesh.triangle_count()
                );
                Some(mesh)
            }
            Err(err) => {
                log::warn!(target: "assets", "failed to import mesh {id}: {err}");
                None
            }
        };
        // Only drop the gate once the result is visible in the cache.
        self.loads.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        outcome
    }

    /// Imports a glTF file together with the textures and materials it references. Unless
    /// `force_reimport` is set a previously imported mesh is returned from the cache.
    pub fn import_gltf(&self, path: impl AsRef<Path>, force_reimport: bool) -> Option<GltfImport> {
        let path = absolutize(path.as_ref());
        if !path.is_file() {
            log::warn!(target: "assets", "{}", EngineError::NotFound(format!("glTF {}", path.display())));
            return None;
        }
        let mesh_id = self.id_for_file(&path);
        if !force_reimport {
            if let Some(cached) = self.lock().meshes.get(&mesh_id) {
                return Some(GltfImport {
                    mesh_id,
                    texture_ids: cached.texture_ids.clone(),
                    material_keys: cached.material_keys.clone(),
                });
            }
        }

        let document = match self.reader.read(&path) {
            Ok(document) => document,
            Err(err) => {
                log::warn!(target: "assets", "glTF import failed: {err}");
                return None;
            }
        };
        if document.primitives.is_empty() {
            log::warn!(target: "assets", "glTF {} has no triangle primitives", path.display());
            return None;
        }
        let mesh_data = match mesh::sanitize(gltf_import::flatten(&document)) {
            Ok(mesh) => Arc::new(mesh),
            Err(err) => {
                log::warn!(target: "assets", "glTF {} rejected: {err}", path.display());
                return None;
            }
        };

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut image_ids: Vec<Option<AssetId>> = Vec::with_capacity(document.images.len());
        let mut textures = Vec::new();
        for image in &document.images {
            let ImageSource::Uri(uri) = image else {
                image_ids.push(None);
                continue;
            };
            let texture_path = base_dir.join(uri);
            let id = self.id_for_file(&texture_path);
            let dimensions = image::image_dimensions(&texture_path).ok();
            image_ids.push(Some(id));
            if !textures.iter().any(|texture: &CachedTexture| texture.id == id) {
                textures.push(CachedTexture { id, path: texture_path, dimensions });
            }
        }

        let materials: Vec<CachedMaterial> = document
            .materials
            .iter()
            .enumerate()
            .map(|(index, material)| CachedMaterial {
                key: mesh_id.material_key(index),
                name: material.name.clone().unwrap_or_else(|| format!("material_{index}")),
                base_color: material.base_color,
                metallic: material.metallic,
                roughness: material.roughness,
                albedo_texture: material.base_color_image.and_then(|image| image_ids.get(image).copied().flatten()),
            })
            .collect();

        let import = GltfImport {
            mesh_id,
            texture_ids: textures.iter().map(|texture| texture.id).collect(),
            material_keys: materials.iter().map(|material| material.key.clone()).collect(),
        };

        let mut state = self.lock();
        let prefix = mesh_id.material_prefix();
        state.materials.retain(|key, _| !key.starts_with(&prefix));
        state.mesh_data.insert(mesh_id, mesh_data);
        for texture in textures {
            state.textures.insert(texture.id, texture);
        }
        for material in materials {
            state.materials.insert(material.key.clone(), material);
        }
        state.meshes.insert(
            mesh_id,
            CachedMesh {
                id: mesh_id,
                source: path.clone(),
                texture_ids: import.texture_ids.clone(),
                material_keys: import.material_keys.clone(),
            },
        );
        log::info!(
            target: "assets",
            "imported glTF {} ({} textures, {} materials)",
            path.display(),
            import.texture_ids.len(),
            import.material_keys.len()
        );
        Some(import)
    }

    /// Registered id for `path`, else the id in its sidecar, else an in-memory id that stays
    /// stable for the lifetime of the current root.
    fn id_for_file(&self, path: &Path) -> AssetId {
        let mut state = self.lock();
        if let Some(id) = state.relative_key(path).and_then(|key| state.path_index.get(&key).copied()) {
            return id;
        }
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(id) = state.transient_ids.get(&canonical) {
            return *id;
        }
        let fields = metadata::read_sidecar(&metadata::sidecar_path(path));
        let binding = metadata::reconcile(fields.as_ref(), "", AssetType::classify(path));
        if binding.minted {
            log::debug!(target: "assets", "{} is not registered; using transient id {}", path.display(), binding.id);
            state.transient_ids.insert(canonical, binding.id);
        }
        binding.id
    }

    pub fn cached_mesh(&self, id: AssetId) -> Option<CachedMesh> {
        self.lock().meshes.get(&id).cloned()
    }

    pub fn cached_texture(&self, id: AssetId) -> Option<CachedTexture> {
        self.lock().textures.get(&id).cloned()
    }

    pub fn cached_material(&self, key: &str) -> Option<CachedMaterial> {
        self.lock().materials.get(key).cloned()
    }

    /// Events with a serial greater than `serial`, oldest first.
    pub fn changes_since(&self, serial: u64) -> Vec<AssetChange> {
        self.lock().change_log.since(serial)
    }

    pub fn change_serial(&self) -> u64 {
        self.lock().change_log.last_serial()
    }

    /// A consumer whose last seen serial is below `oldest_retained_serial() - 1` lost events to
    /// truncation and should reload everything.
    pub fn oldest_retained_serial(&self) -> u64 {
        self.lock().change_log.oldest_retained()
    }

    pub fn change_log_len(&self) -> usize {
        self.lock().change_log.len()
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}

/// Forward-slash relative path without `.` components.
fn source_label(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn path_key(source: &str) -> String {
    source.replace('\\', "/").trim_start_matches("./").to_lowercase()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    }
}

fn normalize_root(root: &Path) -> PathBuf {
    fs::canonicalize(root).unwrap_or_else(|_| absolutize(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_label_uses_forward_slashes() {
        assert_eq!(source_label(Path::new("./a/b/tex.png")), "a/b/tex.png");
        assert_eq!(path_key("A\\B/Tex.PNG"), "a/b/tex.png");
    }

    #[test]
    fn produced_ids_list_mesh_first() {
        let mesh_id = AssetId::new();
        let texture = AssetId::new();
        let import =
            GltfImport { mesh_id, texture_ids: vec![texture], material_keys: vec![mesh_id.material_key(0)] };
        let ids = import.produced_ids();
        assert_eq!(ids[0], mesh_id.to_string());
        assert_eq!(ids[1], texture.to_string());
        assert!(ids[2].ends_with(":mat:0"));
    }

    #[test]
    fn hidden_names_start_with_a_dot() {
        assert!(is_hidden(std::ffi::OsStr::new(".git")));
        assert!(!is_hidden(std::ffi::OsStr::new("models")));
    }
}
