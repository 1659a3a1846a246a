use super::{RawMesh, DEFAULT_COLOR, DEFAULT_NORMAL, DEFAULT_UV};
use crate::error::EngineError;
use glam::{Vec2, Vec3, Vec4};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::SplitWhitespace;

pub fn load_obj(path: &Path) -> Result<RawMesh, EngineError> {
    let text = fs::read_to_string(path).map_err(|err| EngineError::io(path, err))?;
    parse_obj(&text).map_err(|err| match err {
        EngineError::Malformed(reason) => EngineError::Malformed(format!("{}: {reason}", path.display())),
        other => other,
    })
}

/// Corner of a face: 0-based position index plus optional texcoord and normal indices.
type CornerKey = (u32, Option<u32>, Option<u32>);

#[derive(Default)]
struct ObjState {
    positions: Vec<Vec3>,
    colors: Vec<Vec4>,
    texcoords: Vec<Vec2>,
    normals: Vec<Vec3>,
    corners: HashMap<CornerKey, u32>,
    mesh: RawMesh,
    skipped: usize,
}

/// Parses `v`, `vt`, `vn` and `f` directives. Lines that cannot be read and face corners that
/// reference missing data are skipped; every distinct corner becomes one output vertex and
/// polygons are fan-triangulated.
pub fn parse_obj(text: &str) -> Result<RawMesh, EngineError> {
    let mut state = ObjState::default();
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        if keyword.starts_with('#') {
            continue;
        }
        match keyword {
            "v" => state.vertex(tokens),
            "vt" => match parse_floats::<2>(&mut tokens) {
                Some([u, v]) => state.texcoords.push(Vec2::new(u, v)),
                None => state.skipped += 1,
            },
            "vn" => match parse_floats::<3>(&mut tokens) {
                Some(n) => state.normals.push(Vec3::from_array(n)),
                None => state.skipped += 1,
            },
            "f" => state.face(tokens),
            _ => {}
        }
    }

    if state.skipped > 0 {
        log::warn!(target: "mesh", "OBJ reader skipped {} unreadable entries", state.skipped);
    }
    if state.positions.is_empty() {
        return Err(EngineError::Malformed("OBJ contains no vertex positions".to_string()));
    }
    if state.mesh.indices.is_empty() {
        return Err(EngineError::Malformed("OBJ contains no faces".to_string()));
    }
    state.mesh.missing_tangents = true;
    Ok(state.mesh)
}

impl ObjState {
    fn vertex(&mut self, mut tokens: SplitWhitespace<'_>) {
        let Some(position) = parse_floats::<3>(&mut tokens) else {
            self.skipped += 1;
            return;
        };
        let extra: Vec<f32> = tokens.map_while(|token| token.parse::<f32>().ok()).collect();
        let color = match extra.as_slice() {
            [r, g, b] => Vec4::new(*r, *g, *b, 1.0),
            [r, g, b, a, ..] => Vec4::new(*r, *g, *b, *a),
            _ => DEFAULT_COLOR,
        };
        self.positions.push(Vec3::from_array(position));
        self.colors.push(color);
    }

    fn face(&mut self, tokens: SplitWhitespace<'_>) {
        let mut polygon: Vec<u32> = Vec::new();
        for token in tokens {
            match self.corner(token) {
                Some(index) => polygon.push(index),
                None => self.skipped += 1,
            }
        }
        if polygon.len() < 3 {
            return;
        }
        for i in 1..polygon.len() - 1 {
            self.mesh.indices.extend_from_slice(&[polygon[0], polygon[i], polygon[i + 1]]);
        }
    }

    fn corner(&mut self, token: &str) -> Option<u32> {
        let mut parts = token.split('/');
        let position = resolve_index(parts.next()?, self.positions.len())?;
        let texcoord = match parts.next() {
            Some(raw) if !raw.is_empty() => Some(resolve_index(raw, self.texcoords.len())?),
            _ => None,
        };
        let normal = match parts.next() {
            Some(raw) if !raw.is_empty() => Some(resolve_index(raw, self.normals.len())?),
            _ => None,
        };
        let key = (position, texcoord, normal);
        if let Some(&existing) = self.corners.get(&key) {
            return Some(existing);
        }

        let mesh = &mut self.mesh;
        let index = mesh.positions.len() as u32;
        mesh.positions.push(self.positions[position as usize]);
        mesh.colors.push(self.colors[position as usize]);
        mesh.uvs.push(texcoord.map(|t| self.texcoords[t as usize]).unwrap_or(DEFAULT_UV));
        match normal {
            Some(n) => mesh.normals.push(self.normals[n as usize]),
            None => {
                mesh.normals.push(DEFAULT_NORMAL);
                mesh.missing_normals = true;
            }
        }
        self.corners.insert(key, index);
        Some(index)
    }
}

/// Converts a 1-based (or negative, relative-to-end) OBJ index into a 0-based index.
fn resolve_index(raw: &str, count: usize) -> Option<u32> {
    let value = raw.parse::<i64>().ok()?;
    let resolved = match value {
        0 => return None,
        v if v > 0 => v - 1,
        v => count as i64 + v,
    };
    (0..count as i64).contains(&resolved).then_some(resolved as u32)
}

fn parse_floats<const N: usize>(tokens: &mut SplitWhitespace<'_>) -> Option<[f32; N]> {
    let mut out = [0.0; N];
    for slot in &mut out {
        *slot = tokens.next()?.parse().ok()?;
    }
    Some(out)
}
