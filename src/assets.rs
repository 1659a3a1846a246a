pub mod change_log;
pub mod classify;
pub mod cook;
pub mod id;
pub mod metadata;
pub mod registry;
pub mod watch;

pub use change_log::{AssetChange, ChangeKind, ChangeLog, DEFAULT_CHANGE_LOG_CAPACITY};
pub use classify::AssetType;
pub use cook::{cook, CookManifest, CookedAsset, DEFAULT_MANIFEST_NAME};
pub use id::AssetId;
pub use registry::{
    AssetEntry, AssetRegistry, CachedMaterial, CachedMesh, CachedTexture, GltfImport, ScanSummary,
};
pub use watch::AssetWatcher;
