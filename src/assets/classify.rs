use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetType {
    Texture,
    Mesh,
    Audio,
    Script,
    Scene,
    Shader,
    Other,
}

const TEXTURE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tga", "bmp", "gif", "dds", "ktx", "ktx2"];
const MESH_EXTENSIONS: &[&str] = &["gltf", "glb", "obj", "fbx", "dae"];
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "ogg", "flac", "aiff"];
const SCRIPT_EXTENSIONS: &[&str] = &["lua", "py", "js", "cs"];
const SHADER_EXTENSIONS: &[&str] = &["vert", "frag", "glsl", "spv"];

impl AssetType {
    pub const ALL: [AssetType; 7] = [
        AssetType::Texture,
        AssetType::Mesh,
        AssetType::Audio,
        AssetType::Script,
        AssetType::Scene,
        AssetType::Shader,
        AssetType::Other,
    ];

    /// Position used when sorting registry entries.
    pub fn order(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            AssetType::Texture => "Texture",
            AssetType::Mesh => "Mesh",
            AssetType::Audio => "Audio",
            AssetType::Script => "Script",
            AssetType::Scene => "Scene",
            AssetType::Shader => "Shader",
            AssetType::Other => "Other",
        }
    }

    /// Classifies by extension (case-insensitive). `.json` files are scenes only when some path
    /// component is exactly `scenes`.
    pub fn classify(path: &Path) -> AssetType {
        let ext = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).unwrap_or_default();
        let ext = ext.as_str();
        if TEXTURE_EXTENSIONS.contains(&ext) {
            AssetType::Texture
        } else if MESH_EXTENSIONS.contains(&ext) {
            AssetType::Mesh
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            AssetType::Audio
        } else if SCRIPT_EXTENSIONS.contains(&ext) {
            AssetType::Script
        } else if SHADER_EXTENSIONS.contains(&ext) {
            AssetType::Shader
        } else if ext == "json" && has_segment(path, "scenes") {
            AssetType::Scene
        } else {
            AssetType::Other
        }
    }
}

fn has_segment(path: &Path, segment: &str) -> bool {
    path.components().any(|component| matches!(component, Component::Normal(part) if part == segment))
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        AssetType::ALL
            .into_iter()
            .find(|ty| ty.name() == value.trim())
            .ok_or_else(|| format!("unknown asset type '{value}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension_case_insensitively() {
        assert_eq!(AssetType::classify(Path::new("a/b/Brick.PNG")), AssetType::Texture);
        assert_eq!(AssetType::classify(Path::new("cube.obj")), AssetType::Mesh);
        assert_eq!(AssetType::classify(Path::new("ship.glb")), AssetType::Mesh);
        assert_eq!(AssetType::classify(Path::new("hit.ogg")), AssetType::Audio);
        assert_eq!(AssetType::classify(Path::new("ai.lua")), AssetType::Script);
        assert_eq!(AssetType::classify(Path::new("lit.frag")), AssetType::Shader);
        assert_eq!(AssetType::classify(Path::new("README")), AssetType::Other);
    }

    #[test]
    fn json_is_scene_only_under_scenes_segment() {
        assert_eq!(AssetType::classify(Path::new("scenes/level1.json")), AssetType::Scene);
        assert_eq!(AssetType::classify(Path::new("/root/game/scenes/sub/level.json")), AssetType::Scene);
        assert_eq!(AssetType::classify(Path::new("myscenes/level.json")), AssetType::Other);
        assert_eq!(AssetType::classify(Path::new("config.json")), AssetType::Other);
    }

    #[test]
    fn names_round_trip_and_order_follows_declaration() {
        for (index, ty) in AssetType::ALL.into_iter().enumerate() {
            assert_eq!(ty.name().parse::<AssetType>(), Ok(ty));
            assert_eq!(ty.order() as usize, index);
        }
    }
}
