use aetherion_core::assets::{self, AssetRegistry, AssetType};
use aetherion_core::logging::{self, LogChannel, LogLevel};
use aetherion_core::mesh;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:?}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let _ = logging::install_global(Arc::new(LogChannel::with_stderr(LogLevel::Warn)));
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    match command.as_str() {
        "list" => {
            let root = args.next().ok_or_else(|| anyhow!("list requires a root: asset_report list <root>"))?;
            cmd_list(&root)
        }
        "meshes" => {
            let root = args.next().ok_or_else(|| anyhow!("meshes requires a root: asset_report meshes <root>"))?;
            cmd_meshes(&root)
        }
        "changes" => {
            let root =
                args.next().ok_or_else(|| anyhow!("changes requires a root: asset_report changes <root>"))?;
            cmd_changes(&root)
        }
        "gltf" => {
            let root = args
                .next()
                .ok_or_else(|| anyhow!("gltf requires arguments: asset_report gltf <root> <file>"))?;
            let file = args.next().ok_or_else(|| anyhow!("gltf missing file argument"))?;
            cmd_gltf(&root, &file)
        }
        "cook" => {
            let root = args.next().ok_or_else(|| anyhow!("cook requires arguments: asset_report cook <root> <out>"))?;
            let out = args.next().ok_or_else(|| anyhow!("cook missing output directory"))?;
            let manifest = args.next().unwrap_or_else(|| assets::DEFAULT_MANIFEST_NAME.to_string());
            cmd_cook(&root, &out, &manifest)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => Err(anyhow!("unknown command '{other}'")),
    }
}

fn print_usage() {
    eprintln!(
        "Asset Report
Usage:
  asset_report list <root>          List every asset with its id and type
  asset_report meshes <root>        Import every mesh and print vertex, triangle and bounds stats
  asset_report changes <root>       Scan twice and print the change events of each pass
  asset_report gltf <root> <file>   Import a glTF file and print the ids it produced
  asset_report cook <root> <out> [manifest]
                                    Copy every asset into <out> and write an id/path/type manifest"
    );
}

fn scan(root: &str) -> Result<AssetRegistry> {
    if !Path::new(root).is_dir() {
        bail!("'{root}' is not a directory");
    }
    let registry = AssetRegistry::new();
    registry.scan(root);
    Ok(registry)
}

fn cmd_list(root: &str) -> Result<()> {
    let registry = scan(root)?;
    let entries = registry.entries();
    let base = registry.root();
    for entry in &entries {
        let shown = base.as_ref().and_then(|base| entry.path.strip_prefix(base).ok()).unwrap_or(&entry.path);
        println!("{:<8} {} {}", entry.asset_type, entry.id, shown.display());
    }
    println!("{} asset(s)", entries.len());
    Ok(())
}

fn cmd_meshes(root: &str) -> Result<()> {
    let registry = scan(root)?;
    let mut failed = 0usize;
    for entry in registry.entries().iter().filter(|entry| entry.asset_type == AssetType::Mesh) {
        if !mesh::is_importable(&entry.path) {
            println!("{}  skipped (no importer)", entry.path.display());
            continue;
        }
        match registry.load_mesh_data(entry.id) {
            Some(mesh) => println!(
                "{}  {} vertices, {} triangles, center {:.3?}, radius {:.3}",
                entry.path.display(),
                mesh.vertex_count(),
                mesh.triangle_count(),
                mesh.bounds.center.to_array(),
                mesh.bounds.radius
            ),
            None => {
                failed += 1;
                println!("{}  failed to import", entry.path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} mesh(es) failed to import");
    }
    Ok(())
}

fn cmd_changes(root: &str) -> Result<()> {
    let registry = AssetRegistry::new();
    for pass in 1..=2 {
        let summary = registry.scan(root);
        println!("pass {pass}: {} asset(s), {} change(s)", summary.entry_count, summary.changes.len());
        for change in &summary.changes {
            println!("  {change}");
        }
    }
    println!("change serial {}", registry.change_serial());
    Ok(())
}

fn cmd_gltf(root: &str, file: &str) -> Result<()> {
    let registry = scan(root)?;
    let import = registry.import_gltf(file, false).ok_or_else(|| anyhow!("failed to import '{file}'"))?;
    println!("mesh {}", import.mesh_id);
    for id in &import.texture_ids {
        let dimensions = registry
            .cached_texture(*id)
            .and_then(|texture| texture.dimensions)
            .map_or_else(|| "unknown size".to_string(), |(w, h)| format!("{w}x{h}"));
        println!("texture {id} ({dimensions})");
    }
    for key in &import.material_keys {
        if let Some(material) = registry.cached_material(key) {
            println!(
                "material {key} '{}' base {:?} metallic {:.2} roughness {:.2}",
                material.name, material.base_color, material.metallic, material.roughness
            );
        }
    }
    Ok(())
}

fn cmd_cook(root: &str, out: &str, manifest_name: &str) -> Result<()> {
    let registry = scan(root)?;
    let manifest = assets::cook(&registry, Path::new(out), manifest_name)?;
    println!("cooked {} asset(s) into {out}", manifest.assets.len());
    println!("manifest: {}", Path::new(out).join(manifest_name).display());
    Ok(())
}
