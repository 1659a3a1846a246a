use crate::error::EngineError;
use glam::{Vec2, Vec3, Vec4};
use std::path::Path;

pub mod gltf_import;
pub mod obj;

pub const DEFAULT_COLOR: Vec4 = Vec4::ONE;
pub const DEFAULT_NORMAL: Vec3 = Vec3::Z;
pub const DEFAULT_TANGENT: Vec4 = Vec4::new(1.0, 0.0, 0.0, 1.0);
pub const DEFAULT_UV: Vec2 = Vec2::ZERO;

/// Triangles whose edge cross product is at most this (squared) are dropped.
pub const MIN_TRIANGLE_AREA_SQ: f32 = 1e-12;
/// Faces meeting at a vertex keep a shared normal while within 60 degrees of each other.
const CREASE_COS: f32 = 0.5;

/// Interleaved vertex as uploaded to the GPU vertex buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
    pub uv: [f32; 2],
    pub tangent: [f32; 4],
}

impl MeshVertex {
    pub const STRIDE: u32 = std::mem::size_of::<MeshVertex>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const NORMAL_OFFSET: u32 = 12;
    pub const COLOR_OFFSET: u32 = 24;
    pub const UV_OFFSET: u32 = 40;
    pub const TANGENT_OFFSET: u32 = 48;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

impl MeshBounds {
    pub fn from_positions(positions: &[Vec3]) -> Self {
        if positions.is_empty() {
            return MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for &pos in positions {
            min = min.min(pos);
            max = max.max(pos);
        }
        let center = (min + max) * 0.5;
        let radius = positions.iter().fold(0.0_f32, |radius, pos| radius.max((*pos - center).length()));
        MeshBounds { min, max, center, radius }
    }
}

/// Geometry straight out of an importer. Attribute arrays may be shorter than `positions` or hold
/// non-finite values; [`sanitize`] repairs them.
#[derive(Clone, Debug, Default)]
pub struct RawMesh {
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec4>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
    /// At least one vertex had no source normal.
    pub missing_normals: bool,
    /// At least one vertex had no source tangent.
    pub missing_tangents: bool,
}

/// Sanitized triangle mesh. Every array has one entry per vertex, all values are finite, normals
/// and tangent xyz are unit length, tangent w is +1 or -1, and every triangle is non-degenerate.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec4>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    pub uvs: Vec<Vec2>,
    pub indices: Vec<u32>,
    pub bounds: MeshBounds,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn interleaved(&self) -> Vec<MeshVertex> {
        (0..self.positions.len())
            .map(|i| MeshVertex {
                position: self.positions[i].to_array(),
                normal: self.normals[i].to_array(),
                color: self.colors[i].to_array(),
                uv: self.uvs[i].to_array(),
                tangent: self.tangents[i].to_array(),
            })
            .collect()
    }

    /// Axis-aligned cube with per-face vertices, used when a draw references no mesh.
    pub fn cube(size: f32) -> Self {
        let hs = size * 0.5;
        let corners = [
            Vec3::new(-hs, -hs, -hs),
            Vec3::new(hs, -hs, -hs),
            Vec3::new(hs, hs, -hs),
            Vec3::new(-hs, hs, -hs),
            Vec3::new(-hs, -hs, hs),
            Vec3::new(hs, -hs, hs),
            Vec3::new(hs, hs, hs),
            Vec3::new(-hs, hs, hs),
        ];
        let uv_quad = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let mut raw = RawMesh { missing_tangents: true, ..RawMesh::default() };
        let mut write_face = |quad: [usize; 4], normal: Vec3| {
            let base = raw.positions.len() as u32;
            for (corner, &index) in quad.iter().enumerate() {
                raw.positions.push(corners[index]);
                raw.normals.push(normal);
                raw.uvs.push(uv_quad[corner]);
            }
            raw.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        };
        write_face([0, 3, 2, 1], Vec3::NEG_Z);
        write_face([4, 5, 6, 7], Vec3::Z);
        write_face([0, 4, 7, 3], Vec3::NEG_X);
        write_face([1, 2, 6, 5], Vec3::X);
        write_face([3, 7, 6, 2], Vec3::Y);
        write_face([0, 1, 5, 4], Vec3::NEG_Y);
        // Built from well-formed faces, so sanitizing cannot reject it.
        sanitize(raw).unwrap_or_else(|_| MeshData::empty())
    }

    fn empty() -> Self {
        MeshData {
            positions: Vec::new(),
            colors: Vec::new(),
            normals: Vec::new(),
            tangents: Vec::new(),
            uvs: Vec::new(),
            indices: Vec::new(),
            bounds: MeshBounds::from_positions(&[]),
        }
    }

    /// Checks every structural invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), String> {
        let count = self.positions.len();
        if [self.colors.len(), self.normals.len(), self.tangents.len(), self.uvs.len()].iter().any(|len| *len != count)
        {
            return Err("attribute arrays differ in length".to_string());
        }
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a positive multiple of 3", self.indices.len()));
        }
        for (tri_index, tri) in self.indices.chunks_exact(3).enumerate() {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a >= count || b >= count || c >= count {
                return Err(format!("triangle {tri_index} references a vertex out of range"));
            }
            if a == b || b == c || a == c {
                return Err(format!("triangle {tri_index} repeats a vertex"));
            }
            let cross = (self.positions[b] - self.positions[a]).cross(self.positions[c] - self.positions[a]);
            if cross.length_squared() <= MIN_TRIANGLE_AREA_SQ {
                return Err(format!("triangle {tri_index} is degenerate"));
            }
        }
        for i in 0..count {
            let finite = self.positions[i].is_finite()
                && self.colors[i].is_finite()
                && self.normals[i].is_finite()
                && self.tangents[i].is_finite()
                && self.uvs[i].is_finite();
            if !finite {
                return Err(format!("vertex {i} has a non-finite attribute"));
            }
            if (self.normals[i].length() - 1.0).abs() > 1e-3 {
                return Err(format!("vertex {i} normal is not unit length"));
            }
            if (self.tangents[i].truncate().length() - 1.0).abs() > 1e-3 {
                return Err(format!("vertex {i} tangent is not unit length"));
            }
            if self.tangents[i].w.abs() != 1.0 {
                return Err(format!("vertex {i} tangent handedness is not +/-1"));
            }
        }
        Ok(())
    }
}

pub const IMPORTABLE_EXTENSIONS: [&str; 3] = ["obj", "gltf", "glb"];

fn lowercase_extension(path: &Path) -> String {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).unwrap_or_default()
}

/// Whether [`import_mesh`] has a reader for the file. FBX and DAE classify as meshes but are not.
pub fn is_importable(path: &Path) -> bool {
    IMPORTABLE_EXTENSIONS.contains(&lowercase_extension(path).as_str())
}

/// Imports a mesh file, choosing the parser from its extension. glTF goes through `reader`.
pub fn import_mesh(path: &Path, reader: &dyn gltf_import::GeometryReader) -> Result<MeshData, EngineError> {
    let ext = lowercase_extension(path);
    let raw = match ext.as_str() {
        "obj" => obj::load_obj(path)?,
        "gltf" | "glb" => gltf_import::load_gltf(path, reader)?,
        other => return Err(EngineError::Malformed(format!("unsupported mesh format '.{other}'"))),
    };
    sanitize(raw)
        .map_err(|err| EngineError::Malformed(format!("{}: {}", path.display(), err)))
}

/// Repairs importer output into a [`MeshData`] or fails when nothing drawable remains.
pub fn sanitize(raw: RawMesh) -> Result<MeshData, EngineError> {
    let RawMesh { mut positions, colors, normals, tangents, uvs, indices, missing_normals, missing_tangents } = raw;
    if positions.is_empty() {
        return Err(EngineError::Malformed("mesh has no positions".to_string()));
    }

    let mut valid = vec![true; positions.len()];
    for (pos, ok) in positions.iter_mut().zip(valid.iter_mut()) {
        if !pos.is_finite() {
            *pos = Vec3::ZERO;
            *ok = false;
        }
    }

    let source_count = positions.len();
    let mut kept: Vec<[u32; 3]> = Vec::with_capacity(indices.len() / 3);
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0], tri[1], tri[2]];
        let in_range = [a, b, c].iter().all(|&i| (i as usize) < source_count && valid[i as usize]);
        if !in_range || a == b || b == c || a == c {
            continue;
        }
        let (pa, pb, pc) = (positions[a as usize], positions[b as usize], positions[c as usize]);
        if (pb - pa).cross(pc - pa).length_squared() <= MIN_TRIANGLE_AREA_SQ {
            continue;
        }
        kept.push([a, b, c]);
    }
    let dropped = indices.len() / 3 - kept.len();
    if kept.is_empty() {
        return Err(EngineError::Malformed("no non-degenerate triangles survived sanitization".to_string()));
    }
    if dropped > 0 {
        log::debug!(target: "mesh", "dropped {dropped} invalid or degenerate triangles");
    }

    // Compact away vertices no surviving triangle references, keeping their relative order.
    let mut referenced = vec![false; source_count];
    for tri in &kept {
        for &i in tri {
            referenced[i as usize] = true;
        }
    }
    let mut remap = vec![u32::MAX; source_count];
    let mut order = Vec::with_capacity(source_count);
    for (old, used) in referenced.iter().enumerate() {
        if *used {
            remap[old] = order.len() as u32;
            order.push(old);
        }
    }

    let pick = |old: usize| -> (Vec3, Vec4, Vec2) {
        let color = colors.get(old).copied().filter(|c| c.is_finite()).unwrap_or(DEFAULT_COLOR);
        let uv = uvs.get(old).copied().filter(|uv| uv.is_finite()).unwrap_or(DEFAULT_UV);
        (positions[old], color, uv)
    };
    let mut geometry = Geometry {
        positions: Vec::with_capacity(order.len()),
        colors: Vec::with_capacity(order.len()),
        uvs: Vec::with_capacity(order.len()),
        normals: Vec::new(),
        tangents: Vec::new(),
        indices: kept.iter().flat_map(|tri| tri.map(|i| remap[i as usize])).collect(),
    };
    for &old in &order {
        let (pos, color, uv) = pick(old);
        geometry.positions.push(pos);
        geometry.colors.push(color);
        geometry.uvs.push(uv);
    }

    let source_normals: Option<Vec<Vec3>> = if missing_normals {
        None
    } else {
        order
            .iter()
            .map(|&old| normals.get(old).and_then(|n| n.try_normalize()))
            .collect::<Option<Vec<_>>>()
    };
    let regenerated_normals = match source_normals {
        Some(list) => {
            geometry.normals = list;
            false
        }
        None => {
            regenerate_normals(&mut geometry);
            true
        }
    };

    let source_tangents: Option<Vec<Vec4>> = if regenerated_normals || missing_tangents {
        None
    } else {
        order
            .iter()
            .map(|&old| {
                let t = tangents.get(old).copied().filter(|t| t.w.is_finite())?;
                let xyz = t.truncate().try_normalize()?;
                Some(xyz.extend(if t.w < 0.0 { -1.0 } else { 1.0 }))
            })
            .collect::<Option<Vec<_>>>()
    };
    match source_tangents {
        Some(list) => geometry.tangents = list,
        None => geometry.tangents = compute_tangents(&geometry),
    }

    let bounds = MeshBounds::from_positions(&geometry.positions);
    Ok(MeshData {
        positions: geometry.positions,
        colors: geometry.colors,
        normals: geometry.normals,
        tangents: geometry.tangents,
        uvs: geometry.uvs,
        indices: geometry.indices,
        bounds,
    })
}

struct Geometry {
    positions: Vec<Vec3>,
    colors: Vec<Vec4>,
    uvs: Vec<Vec2>,
    normals: Vec<Vec3>,
    tangents: Vec<Vec4>,
    indices: Vec<u32>,
}

/// Area-weighted vertex normals. A vertex whose faces disagree by more than the crease angle is
/// split so each smoothing group gets its own copy.
fn regenerate_normals(geometry: &mut Geometry) {
    let face_normals: Vec<Vec3> = geometry
        .indices
        .chunks_exact(3)
        .map(|tri| {
            let a = geometry.positions[tri[0] as usize];
            let b = geometry.positions[tri[1] as usize];
            let c = geometry.positions[tri[2] as usize];
            (b - a).cross(c - a)
        })
        .collect();

    let vertex_count = geometry.positions.len();
    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
    for (slot, &index) in geometry.indices.iter().enumerate() {
        incident[index as usize].push(slot);
    }

    geometry.normals = vec![DEFAULT_NORMAL; vertex_count];
    for (vertex, slots) in incident.into_iter().enumerate() {
        let mut groups: Vec<(Vec3, Vec<usize>)> = Vec::new();
        for slot in slots {
            let face = face_normals[slot / 3];
            let direction = face.normalize_or_zero();
            match groups.iter_mut().find(|(sum, _)| sum.normalize_or_zero().dot(direction) >= CREASE_COS) {
                Some((sum, members)) => {
                    *sum += face;
                    members.push(slot);
                }
                None => groups.push((face, vec![slot])),
            }
        }
        for (group_index, (sum, members)) in groups.into_iter().enumerate() {
            let target = if group_index == 0 {
                vertex
            } else {
                geometry.positions.push(geometry.positions[vertex]);
                geometry.colors.push(geometry.colors[vertex]);
                geometry.uvs.push(geometry.uvs[vertex]);
                geometry.normals.push(DEFAULT_NORMAL);
                geometry.positions.len() - 1
            };
            geometry.normals[target] = sum.try_normalize().unwrap_or(DEFAULT_NORMAL);
            for slot in members {
                geometry.indices[slot] = target as u32;
            }
        }
    }
}

/// Per-vertex tangents from UV gradients, orthogonalized against the normal. Handedness is the
/// sign of `dot(cross(n, t), bitangent)`.
fn compute_tangents(geometry: &Geometry) -> Vec<Vec4> {
    let count = geometry.positions.len();
    let mut tan1 = vec![Vec3::ZERO; count];
    let mut tan2 = vec![Vec3::ZERO; count];

    for tri in geometry.indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let delta_pos1 = geometry.positions[i1] - geometry.positions[i0];
        let delta_pos2 = geometry.positions[i2] - geometry.positions[i0];
        let delta_uv1 = geometry.uvs[i1] - geometry.uvs[i0];
        let delta_uv2 = geometry.uvs[i2] - geometry.uvs[i0];

        let denom = delta_uv1.x * delta_uv2.y - delta_uv1.y * delta_uv2.x;
        if denom.abs() < 1e-8 {
            continue;
        }
        let r = 1.0 / denom;
        let sdir = (delta_pos1 * delta_uv2.y - delta_pos2 * delta_uv1.y) * r;
        let tdir = (delta_pos2 * delta_uv1.x - delta_pos1 * delta_uv2.x) * r;
        for i in [i0, i1, i2] {
            tan1[i] += sdir;
            tan2[i] += tdir;
        }
    }

    (0..count)
        .map(|i| {
            let normal = geometry.normals[i];
            let t1 = tan1[i];
            let tangent = (t1 - normal * normal.dot(t1))
                .try_normalize()
                .filter(|t| t.is_finite())
                .unwrap_or_else(|| normal.any_orthonormal_vector());
            let w = if normal.cross(tangent).dot(tan2[i]) < 0.0 { -1.0 } else { 1.0 };
            tangent.extend(w)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(normals: Vec<Vec3>) -> RawMesh {
        RawMesh {
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            uvs: vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)],
            missing_normals: normals.is_empty(),
            missing_tangents: true,
            normals,
            indices: vec![0, 1, 2, 0, 2, 3],
            ..RawMesh::default()
        }
    }

    #[test]
    fn builtin_cube_is_valid() {
        let cube = MeshData::cube(1.0);
        cube.validate().expect("cube invariants");
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert!((cube.bounds.radius - 0.75_f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn flat_quad_regenerates_facing_normals_and_tangents() {
        let mesh = sanitize(quad(Vec::new())).expect("quad sanitizes");
        mesh.validate().expect("valid mesh");
        assert_eq!(mesh.vertex_count(), 4, "coplanar faces must not split");
        for (normal, tangent) in mesh.normals.iter().zip(&mesh.tangents) {
            assert!((*normal - Vec3::Z).length() < 1e-5);
            assert!((tangent.truncate() - Vec3::X).length() < 1e-5);
            assert_eq!(tangent.w, 1.0);
        }
    }

    #[test]
    fn degenerate_and_out_of_range_triangles_are_dropped() {
        let mut raw = quad(vec![Vec3::Z; 4]);
        raw.positions.push(Vec3::new(f32::NAN, 0.0, 0.0));
        raw.indices.extend_from_slice(&[0, 0, 1, 0, 1, 9, 0, 1, 4, 0, 2, 2]);
        let mesh = sanitize(raw).expect("quad survives");
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertex_count(), 4, "the invalid vertex is compacted away");
        mesh.validate().expect("valid mesh");
    }

    #[test]
    fn collinear_mesh_fails() {
        let raw = RawMesh {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0],
            indices: vec![0, 1, 2],
            missing_normals: true,
            ..RawMesh::default()
        };
        assert!(matches!(sanitize(raw), Err(EngineError::Malformed(_))));
        assert!(matches!(sanitize(RawMesh::default()), Err(EngineError::Malformed(_))));
    }

    #[test]
    fn provided_normals_are_normalized_and_non_finite_attributes_replaced() {
        let mut raw = quad(vec![Vec3::Z * 3.0; 4]);
        raw.colors = vec![Vec4::new(f32::INFINITY, 0.0, 0.0, 1.0)];
        raw.uvs[2] = Vec2::new(f32::NAN, 0.0);
        let mesh = sanitize(raw).expect("sanitized");
        mesh.validate().expect("valid mesh");
        assert_eq!(mesh.colors, vec![DEFAULT_COLOR; 4]);
        assert_eq!(mesh.uvs[2], DEFAULT_UV);
        assert!((mesh.normals[0] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn a_zero_normal_forces_regeneration() {
        let mut normals = vec![Vec3::NEG_Z; 4];
        normals[1] = Vec3::ZERO;
        let mesh = sanitize(quad(normals)).expect("sanitized");
        assert!(mesh.normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-5));
    }

    #[test]
    fn overflowing_normals_and_tangents_are_regenerated() {
        let mut raw = quad(vec![Vec3::new(0.0, 0.0, 1e20); 4]);
        raw.tangents = vec![Vec4::new(1e30, 0.0, 0.0, 1.0); 4];
        raw.missing_tangents = false;
        let mesh = sanitize(raw).expect("sanitized");
        mesh.validate().expect("valid mesh");
        assert!(mesh.normals.iter().all(|n| (*n - Vec3::Z).length() < 1e-5));
        assert!(mesh.tangents.iter().all(|t| (t.truncate().length() - 1.0).abs() < 1e-5));

        let mut raw = quad(vec![Vec3::Z; 4]);
        raw.tangents = vec![Vec4::new(1e30, 0.0, 0.0, -1.0); 4];
        raw.missing_tangents = false;
        let mesh = sanitize(raw).expect("sanitized");
        mesh.validate().expect("valid mesh");
        assert!(mesh.tangents.iter().all(|t| t.is_finite() && t.w.abs() == 1.0));
    }

    #[test]
    fn importability_follows_extension_case_insensitively() {
        assert!(is_importable(Path::new("models/Crate.OBJ")));
        assert!(is_importable(Path::new("models/ship.glb")));
        assert!(!is_importable(Path::new("models/rig.fbx")));
        assert!(!is_importable(Path::new("models/noext")));
    }
}
