use super::{RawMesh, DEFAULT_COLOR, DEFAULT_NORMAL, DEFAULT_TANGENT, DEFAULT_UV};
use crate::error::EngineError;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use gltf::mesh::Mode;
use std::path::Path;

/// Below this determinant the normal matrix is treated as identity.
const NORMAL_MATRIX_MIN_DET: f32 = 1e-8;

/// One triangle primitive with the world matrix of the node that instanced it.
#[derive(Clone, Debug)]
pub struct GeometryPrimitive {
    pub world: Mat4,
    pub positions: Vec<Vec3>,
    pub colors: Option<Vec<Vec4>>,
    pub normals: Option<Vec<Vec3>>,
    pub tangents: Option<Vec<Vec4>>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Option<Vec<u32>>,
    pub material: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaterialDesc {
    pub name: Option<String>,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub base_color_image: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// External file, relative to the document.
    Uri(String),
    /// Data URI or buffer view inside the document.
    Embedded,
}

#[derive(Clone, Debug, Default)]
pub struct GeometryDocument {
    pub primitives: Vec<GeometryPrimitive>,
    pub materials: Vec<MaterialDesc>,
    pub images: Vec<ImageSource>,
}

/// Reads a scene file into flattened primitives. Alternate decoders (compressed geometry, other
/// containers) plug in by implementing this.
pub trait GeometryReader {
    fn read(&self, path: &Path) -> Result<GeometryDocument, EngineError>;
}

/// Reader backed by the `gltf` crate. Buffers are loaded; images are only referenced.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfGeometryReader;

impl GeometryReader for GltfGeometryReader {
    fn read(&self, path: &Path) -> Result<GeometryDocument, EngineError> {
        let malformed = |err: gltf::Error| EngineError::Malformed(format!("{}: {err}", path.display()));
        let gltf::Gltf { document, blob } = gltf::Gltf::open(path).map_err(malformed)?;
        let buffers = gltf::import_buffers(&document, path.parent(), blob).map_err(malformed)?;

        let mut out = GeometryDocument::default();
        let mut visit = |node: gltf::Node<'_>, world: Mat4| -> Result<(), EngineError> {
            if let Some(mesh) = node.mesh() {
                append_mesh(&mut out, &mesh, world, &buffers, path)?;
            }
            Ok(())
        };

        if let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) {
            for node in scene.nodes() {
                walk_node(node, Mat4::IDENTITY, &mut visit)?;
            }
        } else if document.nodes().len() > 0 {
            let mut is_child = vec![false; document.nodes().len()];
            for node in document.nodes() {
                for child in node.children() {
                    is_child[child.index()] = true;
                }
            }
            for node in document.nodes().filter(|node| !is_child[node.index()]) {
                walk_node(node, Mat4::IDENTITY, &mut visit)?;
            }
        } else {
            for mesh in document.meshes() {
                append_mesh(&mut out, &mesh, Mat4::IDENTITY, &buffers, path)?;
            }
        }

        out.materials = document
            .materials()
            .map(|material| {
                let pbr = material.pbr_metallic_roughness();
                MaterialDesc {
                    name: material.name().map(str::to_string),
                    base_color: pbr.base_color_factor(),
                    metallic: pbr.metallic_factor(),
                    roughness: pbr.roughness_factor(),
                    base_color_image: pbr.base_color_texture().map(|info| info.texture().source().index()),
                }
            })
            .collect();
        out.images = document
            .images()
            .map(|image| match image.source() {
                gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => ImageSource::Uri(uri.to_string()),
                _ => ImageSource::Embedded,
            })
            .collect();
        Ok(out)
    }
}

fn walk_node<'a, F>(node: gltf::Node<'a>, parent: Mat4, visit: &mut F) -> Result<(), EngineError>
where
    F: FnMut(gltf::Node<'a>, Mat4) -> Result<(), EngineError>,
{
    let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
    for child in node.children() {
        walk_node(child, world, visit)?;
    }
    visit(node, world)
}

fn append_mesh(
    out: &mut GeometryDocument,
    mesh: &gltf::Mesh<'_>,
    world: Mat4,
    buffers: &[gltf::buffer::Data],
    path: &Path,
) -> Result<(), EngineError> {
    for primitive in mesh.primitives() {
        if primitive.mode() != Mode::Triangles {
            log::debug!(target: "mesh", "{}: skipping {:?} primitive", path.display(), primitive.mode());
            continue;
        }
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data.0[..]));
        let positions: Vec<Vec3> = reader
            .read_positions()
            .ok_or_else(|| EngineError::Malformed(format!("{}: primitive without POSITION", path.display())))?
            .map(Vec3::from_array)
            .collect();
        if positions.is_empty() {
            continue;
        }
        out.primitives.push(GeometryPrimitive {
            world,
            colors: reader.read_colors(0).map(|colors| colors.into_rgba_f32().map(Vec4::from_array).collect()),
            normals: reader.read_normals().map(|normals| normals.map(Vec3::from_array).collect()),
            tangents: reader.read_tangents().map(|tangents| tangents.map(Vec4::from_array).collect()),
            uvs: reader.read_tex_coords(0).map(|uvs| uvs.into_f32().map(Vec2::from_array).collect()),
            indices: reader.read_indices().map(|indices| indices.into_u32().collect()),
            material: primitive.material().index(),
            positions,
        });
    }
    Ok(())
}

/// Bakes every primitive into one vertex/index stream in world space.
pub fn flatten(document: &GeometryDocument) -> RawMesh {
    let mut mesh = RawMesh::default();
    for primitive in &document.primitives {
        let base = mesh.positions.len() as u32;
        let count = primitive.positions.len();
        let linear = Mat3::from_mat4(primitive.world);
        let det = linear.determinant();
        let normal_matrix =
            if det.abs() < NORMAL_MATRIX_MIN_DET { Mat3::IDENTITY } else { linear.inverse().transpose() };

        mesh.positions.extend(primitive.positions.iter().map(|p| primitive.world.transform_point3(*p)));
        mesh.colors.extend(attribute(&primitive.colors, count, DEFAULT_COLOR));
        mesh.uvs.extend(attribute(&primitive.uvs, count, DEFAULT_UV));
        mesh.normals.extend(attribute(&primitive.normals, count, DEFAULT_NORMAL).map(|n| normal_matrix * n));
        mesh.tangents.extend(
            attribute(&primitive.tangents, count, DEFAULT_TANGENT)
                .map(|t| (normal_matrix * t.truncate()).extend(t.w)),
        );
        mesh.missing_normals |= primitive.normals.as_ref().map_or(true, |n| n.len() < count);
        mesh.missing_tangents |= primitive.tangents.as_ref().map_or(true, |t| t.len() < count);

        let local: Vec<u32> = primitive.indices.clone().unwrap_or_else(|| (0..count as u32).collect());
        let mut dropped = 0usize;
        for tri in local.chunks_exact(3) {
            // A mirroring transform reverses winding; swap to keep faces front-facing.
            let tri = if det < 0.0 { [tri[0], tri[2], tri[1]] } else { [tri[0], tri[1], tri[2]] };
            match rebase(tri, base, count) {
                Some(rebased) => mesh.indices.extend(rebased),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            log::warn!(target: "mesh", "dropped {dropped} triangles indexing past their primitive's {count} vertices");
        }
    }
    mesh
}

/// Moves a primitive-local triangle into the flattened stream; `None` if any corner is outside the
/// primitive.
fn rebase(tri: [u32; 3], base: u32, count: usize) -> Option<[u32; 3]> {
    let mut out = [0; 3];
    for (slot, index) in out.iter_mut().zip(tri) {
        if index as usize >= count {
            return None;
        }
        *slot = index.checked_add(base)?;
    }
    Some(out)
}

fn attribute<T: Copy>(values: &Option<Vec<T>>, count: usize, default: T) -> impl Iterator<Item = T> + '_ {
    (0..count).map(move |i| values.as_ref().and_then(|list| list.get(i).copied()).unwrap_or(default))
}

pub fn load_gltf(path: &Path, reader: &dyn GeometryReader) -> Result<RawMesh, EngineError> {
    let document = reader.read(path)?;
    if document.primitives.is_empty() {
        return Err(EngineError::Malformed(format!("{}: no triangle primitives", path.display())));
    }
    Ok(flatten(&document))
}
