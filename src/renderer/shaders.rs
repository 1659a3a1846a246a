use crate::error::EngineError;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const VERTEX_SHADER: &str = "viewport_triangle.vert.spv";
pub const FRAGMENT_SHADER: &str = "viewport_triangle.frag.spv";

const DEFAULT_SHADER_DIRS: [&str; 3] = ["shaders", "build/shaders", "../shaders"];

/// Configured directories first, then the conventional locations relative to the working directory.
pub fn search_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
    extra.iter().cloned().chain(DEFAULT_SHADER_DIRS.iter().map(PathBuf::from)).collect()
}

pub fn locate(name: &str, dirs: &[PathBuf]) -> Result<PathBuf, EngineError> {
    dirs.iter().map(|dir| dir.join(name)).find(|candidate| candidate.is_file()).ok_or_else(|| {
        let searched = dirs.iter().map(|dir| dir.display().to_string()).collect::<Vec<_>>().join(", ");
        EngineError::NotFound(format!("shader {name} (searched {searched})"))
    })
}

/// Reads a SPIR-V binary into words, checking size and magic number.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, EngineError> {
    let bytes = fs::read(path).map_err(|err| EngineError::io(path, err))?;
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|err| EngineError::Malformed(format!("{}: invalid SPIR-V: {err}", path.display())))
}

pub struct ShaderBinaries {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

pub fn load_viewport_shaders(extra_dirs: &[PathBuf]) -> Result<ShaderBinaries, EngineError> {
    let dirs = search_dirs(extra_dirs);
    let vertex_path = locate(VERTEX_SHADER, &dirs)?;
    let fragment_path = locate(FRAGMENT_SHADER, &dirs)?;
    log::debug!(target: "viewport", "loading shaders from {} and {}", vertex_path.display(), fragment_path.display());
    Ok(ShaderBinaries { vertex: read_spirv(&vertex_path)?, fragment: read_spirv(&fragment_path)? })
}
