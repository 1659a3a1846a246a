pub mod app;
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod mesh;
pub mod render_view;
pub mod renderer;
pub mod time;

pub use app::{run, run_with_overrides, App};
pub use error::{EngineError, EngineResult};
