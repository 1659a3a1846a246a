use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("transient GPU condition: {0}")]
    TransientGpu(vk::Result),
    #[error("fatal GPU error: {0}")]
    FatalGpu(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io { path: path.into(), source }
    }

    /// Classifies a Vulkan result into the transient/fatal split used by the frame scheduler.
    pub fn from_vk(context: &str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR
            | vk::Result::SUBOPTIMAL_KHR
            | vk::Result::ERROR_SURFACE_LOST_KHR
            | vk::Result::TIMEOUT
            | vk::Result::NOT_READY => EngineError::TransientGpu(result),
            other => EngineError::FatalGpu(format!("{context}: {other:?}")),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientGpu(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::FatalGpu(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
