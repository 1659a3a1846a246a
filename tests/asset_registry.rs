use aetherion_core::assets::metadata::{read_sidecar, sidecar_path};
use aetherion_core::assets::{self, AssetRegistry, AssetType, ChangeKind, CookManifest, DEFAULT_MANIFEST_NAME};
use aetherion_core::error::EngineError;
use aetherion_core::mesh::gltf_import::{GeometryDocument, GeometryPrimitive, GeometryReader};
use aetherion_core::renderer::{ChangeCursor, ChangePoll};
use glam::{Mat4, Vec3};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

const CUBE_OBJ: &str = "\
# unit cube, no normals
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
f 5 6 7
f 5 7 8
f 2 1 4
f 2 4 3
f 1 5 8
f 1 8 4
f 6 2 3
f 6 3 7
f 8 7 3
f 8 3 4
f 1 2 6
f 1 6 5
";

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dirs");
    }
    fs::write(path, contents).expect("write asset");
}

fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).expect("open asset");
    file.set_modified(SystemTime::now() + Duration::from_secs(10)).expect("set mtime");
}

#[test]
fn ids_are_stable_across_rescans_and_sidecars_are_written() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "textures/brick.png", "png");
    write(dir.path(), "models/cube.obj", CUBE_OBJ);

    let registry = AssetRegistry::new();
    let first = registry.scan(dir.path());
    assert_eq!(first.entry_count, 2);
    assert!(first.changes.iter().all(|change| change.kind == ChangeKind::Added));

    let cube = registry.find_by_path("models/cube.obj").expect("cube registered");
    assert_eq!(cube.asset_type, AssetType::Mesh);
    let sidecar = read_sidecar(&sidecar_path(&dir.path().join("models/cube.obj"))).expect("sidecar written");
    assert_eq!(sidecar.id.as_deref(), Some(cube.id.to_string().as_str()));
    assert_eq!(sidecar.source.as_deref(), Some("models/cube.obj"));
    assert_eq!(sidecar.asset_type.as_deref(), Some("Mesh"));

    let second = registry.rescan();
    assert!(second.changes.is_empty(), "idempotent rescan emitted {:?}", second.changes);

    let fresh = AssetRegistry::new();
    fresh.scan(dir.path());
    assert_eq!(fresh.find_by_path("models/cube.obj").map(|entry| entry.id), Some(cube.id));
}

#[test]
fn entries_are_sorted_by_type_then_id() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "a.wav", "");
    write(dir.path(), "b.obj", CUBE_OBJ);
    write(dir.path(), "c.png", "");
    write(dir.path(), "d.png", "");
    write(dir.path(), "scenes/level.json", "{}");
    write(dir.path(), "notes.txt", "");

    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let entries = registry.entries();
    let keys: Vec<_> = entries.iter().map(|entry| (entry.asset_type.order(), entry.id)).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    assert_eq!(entries.first().map(|entry| entry.asset_type), Some(AssetType::Texture));
    assert_eq!(entries.last().map(|entry| entry.asset_type), Some(AssetType::Other));
    assert_eq!(registry.find_by_path("scenes/level.json").map(|entry| entry.asset_type), Some(AssetType::Scene));
}

#[test]
fn renaming_with_sidecar_emits_moved_with_the_same_id() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "models/cube.obj", CUBE_OBJ);
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let id = registry.find_by_path("models/cube.obj").expect("registered").id;

    let old = dir.path().join("models/cube.obj");
    let new = dir.path().join("models/box.obj");
    fs::rename(&old, &new).expect("rename asset");
    fs::rename(sidecar_path(&old), sidecar_path(&new)).expect("rename sidecar");

    let summary = registry.rescan();
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].id, id);
    assert_eq!(summary.changes[0].kind, ChangeKind::Moved);
    assert_eq!(registry.find_by_path("models/box.obj").map(|entry| entry.id), Some(id));
    assert!(registry.find_by_path("models/cube.obj").is_none());
    let sidecar = read_sidecar(&sidecar_path(&new)).expect("sidecar");
    assert_eq!(sidecar.source.as_deref(), Some("models/box.obj"));
}

#[test]
fn corrupt_sidecar_is_reminted_with_a_metadata_event() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "brick.png", "png");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let old_id = registry.find_by_path("brick.png").expect("registered").id;

    fs::write(sidecar_path(&dir.path().join("brick.png")), "{ not json").expect("corrupt sidecar");
    let summary = registry.rescan();

    let new_id = registry.find_by_path("brick.png").expect("still registered").id;
    assert_ne!(new_id, old_id);
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].id, new_id);
    assert_eq!(summary.changes[0].kind, ChangeKind::Metadata);
    assert!(registry.find_entry(old_id).is_none());
}

#[test]
fn copied_sidecar_does_not_steal_an_id() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "a.png", "a");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let original = registry.find_by_path("a.png").expect("a").id;

    write(dir.path(), "c.png", "c");
    fs::copy(sidecar_path(&dir.path().join("a.png")), sidecar_path(&dir.path().join("c.png"))).expect("copy sidecar");
    let summary = registry.rescan();

    let copy = registry.find_by_path("c.png").expect("c").id;
    assert_eq!(registry.find_by_path("a.png").map(|entry| entry.id), Some(original));
    assert_ne!(copy, original);
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].kind, ChangeKind::Added);
    let rewritten = read_sidecar(&sidecar_path(&dir.path().join("c.png"))).expect("sidecar rewritten");
    assert_eq!(rewritten.id.as_deref(), Some(copy.to_string().as_str()));
    assert_eq!(rewritten.source.as_deref(), Some("c.png"));
}

#[test]
fn empty_sidecar_object_gets_an_id() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "theme.ogg", "");
    write(dir.path(), "theme.ogg.asset.json", "{}");
    let registry = AssetRegistry::new();
    let summary = registry.scan(dir.path());
    assert_eq!(summary.entry_count, 1);
    let entry = registry.find_by_path("theme.ogg").expect("registered");
    assert!(!entry.id.is_nil());
    let sidecar = read_sidecar(&sidecar_path(&dir.path().join("theme.ogg"))).expect("rewritten");
    assert_eq!(sidecar.id, Some(entry.id.to_string()));
}

#[test]
fn modified_and_removed_files_are_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "models/cube.obj", CUBE_OBJ);
    write(dir.path(), "sfx/hit.wav", "");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let cube = registry.find_by_path("models/cube.obj").expect("cube").id;
    let hit = registry.find_by_path("sfx/hit.wav").expect("hit").id;
    assert!(registry.load_mesh_data(cube).is_some());

    bump_mtime(&dir.path().join("models/cube.obj"));
    fs::remove_file(dir.path().join("sfx/hit.wav")).expect("remove");
    let summary = registry.rescan();

    let kinds: Vec<_> = summary.changes.iter().map(|change| (change.id, change.kind)).collect();
    assert!(kinds.contains(&(cube, ChangeKind::Modified)), "{kinds:?}");
    assert!(kinds.contains(&(hit, ChangeKind::Removed)), "{kinds:?}");
    assert!(registry.mesh_data(cube).is_none(), "modified mesh must be evicted");
}

#[test]
fn empty_root_has_no_entries_or_events() {
    let dir = tempfile::tempdir().expect("temp dir");
    let registry = AssetRegistry::new();
    let summary = registry.scan(dir.path());
    assert_eq!(summary.entry_count, 0);
    assert!(summary.changes.is_empty());
    assert_eq!(registry.change_serial(), 0);
}

#[test]
fn hidden_files_are_ignored() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), ".cache/thumb.png", "");
    write(dir.path(), ".DS_Store", "");
    write(dir.path(), "visible.png", "");
    let registry = AssetRegistry::new();
    assert_eq!(registry.scan(dir.path()).entry_count, 1);
}

#[test]
fn change_log_is_bounded_and_serials_increase() {
    let dir = tempfile::tempdir().expect("temp dir");
    for index in 0..6 {
        write(dir.path(), &format!("tex_{index}.png"), "");
    }
    let registry = AssetRegistry::with_capacity(4);
    let summary = registry.scan(dir.path());
    assert_eq!(summary.changes.len(), 6);
    assert!(summary.changes.windows(2).all(|pair| pair[0].serial < pair[1].serial));
    assert_eq!(registry.change_log_len(), 4);
    assert_eq!(registry.change_serial(), 6);
    assert_eq!(registry.oldest_retained_serial(), 3);
    let retained: Vec<u64> = registry.changes_since(0).iter().map(|change| change.serial).collect();
    assert_eq!(retained, vec![3, 4, 5, 6]);
}

#[test]
fn change_cursor_reports_gaps() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "a.png", "");
    let registry = AssetRegistry::with_capacity(2);
    registry.scan(dir.path());

    let mut cursor = ChangeCursor::new();
    match cursor.poll(&registry) {
        ChangePoll::Changes(changes) => assert_eq!(changes.len(), 1),
        ChangePoll::Gap => panic!("no events were truncated yet"),
    }
    assert_eq!(cursor.poll(&registry), ChangePoll::Changes(Vec::new()));

    for name in ["b.png", "c.png", "d.png"] {
        write(dir.path(), name, "");
    }
    registry.rescan();
    assert_eq!(cursor.poll(&registry), ChangePoll::Gap);
    assert_eq!(cursor.last_seen(), registry.change_serial());
    assert_eq!(cursor.poll(&registry), ChangePoll::Changes(Vec::new()));
}

#[test]
fn cube_obj_imports_with_flat_normals() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "cube.obj", CUBE_OBJ);
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let id = registry.find_by_path("cube.obj").expect("registered").id;

    let mesh = registry.load_mesh_data(id).expect("cube imports");
    mesh.validate().expect("valid mesh");
    assert_eq!(mesh.vertex_count(), 24);
    assert_eq!(mesh.indices.len(), 36);
    assert!(mesh.normals.iter().all(|n| (n.length() - 1.0).abs() < 1e-5));
    assert!(mesh.bounds.center.length() < 1e-6);
    assert!((mesh.bounds.radius - 3.0_f32.sqrt()).abs() < 1e-5);
    for tri in mesh.indices.chunks_exact(3) {
        let [a, b, c] = [0, 1, 2].map(|k| mesh.positions[tri[k] as usize]);
        assert!((b - a).cross(c - a).length_squared() > 0.0);
    }

    let again = registry.load_mesh_data(id).expect("cached");
    assert!(std::sync::Arc::ptr_eq(&mesh, &again));
}

#[test]
fn non_meshes_and_empty_meshes_do_not_load() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "brick.png", "png");
    write(dir.path(), "points.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\n");
    write(dir.path(), "rig.fbx", "fbx");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());

    let texture = registry.find_by_path("brick.png").expect("texture").id;
    assert!(registry.load_mesh_data(texture).is_none());

    let points = registry.find_by_path("points.obj").expect("points").id;
    assert!(registry.load_mesh_data(points).is_none());
    assert!(registry.mesh_data(points).is_none());

    let rig = registry.find_by_path("rig.fbx").expect("fbx is classified");
    assert_eq!(rig.asset_type, AssetType::Mesh);
    assert!(registry.load_mesh_data(rig.id).is_none());
}

#[test]
fn degenerate_triangles_are_dropped_on_import() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "tri.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 2 0 0\nf 1 2 3\nf 1 2 4\n");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let id = registry.find_by_path("tri.obj").expect("registered").id;
    let mesh = registry.load_mesh_data(id).expect("one good triangle");
    assert_eq!(mesh.triangle_count(), 1);
    assert!(mesh.normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-5));
}

/// Serves one triangle for any path and counts how often it was asked to.
struct CountingReader {
    reads: Arc<AtomicUsize>,
}

impl GeometryReader for CountingReader {
    fn read(&self, _path: &Path) -> Result<GeometryDocument, EngineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        Ok(GeometryDocument {
            primitives: vec![GeometryPrimitive {
                world: Mat4::IDENTITY,
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                colors: None,
                normals: None,
                tangents: None,
                uvs: None,
                indices: None,
                material: None,
            }],
            ..GeometryDocument::default()
        })
    }
}

#[test]
fn concurrent_loads_share_one_import_through_the_registry_reader() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "models/tri.gltf", "{}");
    let reads = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(AssetRegistry::with_reader(64, Box::new(CountingReader { reads: Arc::clone(&reads) })));
    registry.scan(dir.path());
    let id = registry.find_by_path("models/tri.gltf").expect("registered").id;

    let loaders: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.load_mesh_data(id))
        })
        .collect();
    let meshes: Vec<_> =
        loaders.into_iter().map(|loader| loader.join().expect("loader thread").expect("mesh loads")).collect();

    assert_eq!(reads.load(Ordering::SeqCst), 1);
    assert!(meshes.iter().all(|mesh| Arc::ptr_eq(mesh, &meshes[0])));
    assert_eq!(meshes[0].triangle_count(), 1);
}

#[test]
fn switching_roots_discards_everything_from_the_old_root() {
    let first = tempfile::tempdir().expect("temp dir");
    write(first.path(), "cube.obj", CUBE_OBJ);
    write(first.path(), "brick.png", "");
    let registry = AssetRegistry::new();
    registry.scan(first.path());
    let cube = registry.find_by_path("cube.obj").expect("cube").id;
    assert!(registry.load_mesh_data(cube).is_some());
    assert_eq!(registry.change_serial(), 2);

    let second = tempfile::tempdir().expect("temp dir");
    write(second.path(), "theme.ogg", "");
    let summary = registry.scan(second.path());

    assert_eq!(summary.entry_count, 1);
    assert_eq!(summary.changes.len(), 1);
    assert_eq!(summary.changes[0].serial, 1, "serials restart with the new root");
    assert_eq!(summary.changes[0].kind, ChangeKind::Added);
    assert_eq!(registry.change_serial(), 1);
    assert_eq!(registry.changes_since(0).len(), 1);
    assert!(registry.find_entry(cube).is_none());
    assert!(registry.mesh_data(cube).is_none());
    assert!(registry.find_by_path("cube.obj").is_none());
}

#[test]
fn touching_only_the_sidecar_reports_metadata() {
    let dir = tempfile::tempdir().expect("temp dir");
    write(dir.path(), "brick.png", "png");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let id = registry.find_by_path("brick.png").expect("brick").id;

    bump_mtime(&sidecar_path(&dir.path().join("brick.png")));
    let summary = registry.rescan();
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].id, id);
    assert_eq!(summary.changes[0].kind, ChangeKind::Metadata);
}

#[test]
fn cook_copies_assets_and_writes_a_manifest() {
    let assets_dir = tempfile::tempdir().expect("temp dir");
    write(assets_dir.path(), "models/cube.obj", CUBE_OBJ);
    write(assets_dir.path(), "scenes/intro.json", "{}");
    let registry = AssetRegistry::new();
    registry.scan(assets_dir.path());
    let cube = registry.find_by_path("models/cube.obj").expect("cube").id;

    let out = tempfile::tempdir().expect("out dir");
    let manifest = assets::cook(&registry, out.path(), DEFAULT_MANIFEST_NAME).expect("cook");
    assert_eq!(manifest.assets.len(), 2);
    assert_eq!(fs::read_to_string(out.path().join("models/cube.obj")).expect("copied"), CUBE_OBJ);
    assert!(out.path().join("scenes/intro.json").is_file());
    assert!(!sidecar_path(&out.path().join("models/cube.obj")).exists());

    let written = CookManifest::load(out.path().join(DEFAULT_MANIFEST_NAME)).expect("manifest parses");
    assert_eq!(written, manifest);
    let entry = written.assets.iter().find(|asset| asset.path == "models/cube.obj").expect("cube listed");
    assert_eq!(entry.id, cube);
    assert_eq!(entry.asset_type, AssetType::Mesh);
    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(out.path().join(DEFAULT_MANIFEST_NAME)).expect("read")).expect("json");
    assert!(raw["assets"][0]["type"].is_string());

    assert!(assets::cook(&registry, assets_dir.path(), DEFAULT_MANIFEST_NAME).is_err(), "cooking onto the root");
}
