use aetherion_core::assets::{AssetRegistry, ChangeKind};
use glam::Vec3;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// One triangle (0,0,0) (1,0,0) (0,1,0) with +X normals and u16 indices 0 1 2.
const TRIANGLE_BUFFER: &str =
    "AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAACAPwAAAAAAAAAAAACAPwAAAAAAAAAAAACAPwAAAAAAAAAAAAABAAIAAAA=";

fn mirrored_triangle_gltf() -> String {
    format!(
        r#"{{
  "asset": {{ "version": "2.0" }},
  "scene": 0,
  "scenes": [{{ "nodes": [0] }}],
  "nodes": [{{ "mesh": 0, "scale": [-1.0, 1.0, 1.0] }}],
  "meshes": [{{ "primitives": [{{ "attributes": {{ "POSITION": 0, "NORMAL": 1 }}, "indices": 2, "material": 0 }}] }}],
  "materials": [{{
    "name": "Painted",
    "pbrMetallicRoughness": {{
      "baseColorFactor": [1.0, 0.5, 0.25, 1.0],
      "baseColorTexture": {{ "index": 0 }},
      "metallicFactor": 0.0,
      "roughnessFactor": 0.75
    }}
  }}],
  "textures": [{{ "source": 0 }}],
  "images": [{{ "uri": "albedo.png" }}],
  "buffers": [{{ "byteLength": 80, "uri": "data:application/octet-stream;base64,{TRIANGLE_BUFFER}" }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 72, "byteLength": 6 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" }},
    {{ "bufferView": 2, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ]
}}"#
    )
}

fn bump_mtime(path: &Path) {
    let file = fs::File::options().write(true).open(path).expect("open asset");
    file.set_modified(SystemTime::now() + Duration::from_secs(10)).expect("set mtime");
}

fn write_scene(root: &Path) {
    fs::create_dir_all(root.join("models")).expect("models dir");
    fs::write(root.join("models/tri.gltf"), mirrored_triangle_gltf()).expect("write gltf");
    image::RgbaImage::new(4, 2).save(root.join("models/albedo.png")).expect("write png");
}

#[test]
fn mirrored_node_flips_positions_and_normals() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_scene(dir.path());
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let id = registry.find_by_path("models/tri.gltf").expect("registered").id;

    let mesh = registry.load_mesh_data(id).expect("gltf imports");
    mesh.validate().expect("valid mesh");
    assert_eq!(mesh.triangle_count(), 1);
    assert!(mesh.positions.contains(&Vec3::new(-1.0, 0.0, 0.0)));
    assert!(mesh.positions.iter().all(|p| p.x <= 0.0 && p.is_finite()));
    assert!(mesh.normals.iter().all(|n| (*n - Vec3::NEG_X).length() < 1e-5));
    assert!(mesh.tangents.iter().all(|t| t.is_finite() && t.w.abs() == 1.0));
}

#[test]
fn import_registers_textures_and_materials() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_scene(dir.path());
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let mesh_id = registry.find_by_path("models/tri.gltf").expect("mesh").id;
    let texture_id = registry.find_by_path("models/albedo.png").expect("texture").id;

    let import = registry.import_gltf(dir.path().join("models/tri.gltf"), false).expect("import");
    assert_eq!(import.mesh_id, mesh_id);
    assert_eq!(import.texture_ids, vec![texture_id]);
    assert_eq!(import.material_keys, vec![mesh_id.material_key(0)]);
    assert_eq!(import.produced_ids()[0], mesh_id.to_string());

    let texture = registry.cached_texture(texture_id).expect("texture cached");
    assert_eq!(texture.dimensions, Some((4, 2)));
    let material = registry.cached_material(&import.material_keys[0]).expect("material cached");
    assert_eq!(material.name, "Painted");
    assert_eq!(material.base_color, [1.0, 0.5, 0.25, 1.0]);
    assert_eq!(material.albedo_texture, Some(texture_id));
    assert!((material.roughness - 0.75).abs() < 1e-6);
    assert!(registry.cached_mesh(mesh_id).is_some());
    assert!(registry.mesh_data(mesh_id).is_some());
}

#[test]
fn reimport_is_deterministic() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_scene(dir.path());
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let path = dir.path().join("models/tri.gltf");

    let first = registry.import_gltf(&path, false).expect("first import");
    let first_mesh = registry.mesh_data(first.mesh_id).expect("mesh");
    let cached = registry.import_gltf(&path, false).expect("cached import");
    let forced = registry.import_gltf(&path, true).expect("forced import");
    let forced_mesh = registry.mesh_data(forced.mesh_id).expect("mesh");

    assert_eq!(first, cached);
    assert_eq!(first, forced);
    assert_eq!(first.produced_ids(), forced.produced_ids());
    assert_eq!(first_mesh.positions, forced_mesh.positions);
    assert_eq!(first_mesh.indices, forced_mesh.indices);
}

#[test]
fn missing_file_imports_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    assert!(registry.import_gltf(dir.path().join("nope.gltf"), false).is_none());
}

#[test]
fn unregistered_files_keep_one_id_across_imports() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_scene(dir.path());
    let registry = AssetRegistry::new();
    let path = dir.path().join("models/tri.gltf");

    let first = registry.import_gltf(&path, false).expect("first import");
    let cached = registry.import_gltf(&path, false).expect("cached import");
    let forced = registry.import_gltf(&path, true).expect("forced import");

    assert_eq!(first, cached);
    assert_eq!(first, forced);
    assert!(registry.cached_mesh(first.mesh_id).is_some());
    assert!(registry.cached_texture(first.texture_ids[0]).is_some());
}

#[test]
fn modified_scene_evicts_its_mesh_and_materials() {
    let dir = tempfile::tempdir().expect("temp dir");
    write_scene(dir.path());
    let registry = AssetRegistry::new();
    registry.scan(dir.path());
    let import = registry.import_gltf(dir.path().join("models/tri.gltf"), false).expect("import");
    let texture_id = import.texture_ids[0];

    bump_mtime(&dir.path().join("models/tri.gltf"));
    let summary = registry.rescan();
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].id, import.mesh_id);
    assert_eq!(summary.changes[0].kind, ChangeKind::Modified);
    assert!(registry.cached_mesh(import.mesh_id).is_none());
    assert!(registry.mesh_data(import.mesh_id).is_none());
    assert!(registry.cached_material(&import.material_keys[0]).is_none());
    assert!(registry.cached_texture(texture_id).is_some(), "textures are keyed by their own file");

    bump_mtime(&dir.path().join("models/albedo.png"));
    let summary = registry.rescan();
    assert_eq!(summary.changes.len(), 1, "{:?}", summary.changes);
    assert_eq!(summary.changes[0].id, texture_id);
    assert!(registry.cached_texture(texture_id).is_none());

    let reimported = registry.import_gltf(dir.path().join("models/tri.gltf"), false).expect("reimport");
    assert_eq!(reimported, import);
    assert!(registry.cached_material(&import.material_keys[0]).is_some());
}
