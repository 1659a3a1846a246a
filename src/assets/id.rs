use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identity of an asset file. Minted once, persisted in the sidecar, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Mints a random (v4) id. `Uuid::new_v4` draws from the OS CSPRNG.
    pub fn new() -> Self {
        AssetId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        AssetId(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Key prefix shared by every material imported from this mesh.
    pub fn material_prefix(&self) -> String {
        format!("{self}:")
    }

    pub fn material_key(&self, index: usize) -> String {
        format!("{self}:mat:{index}")
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for AssetId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim()).map(AssetId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_canonical_hyphenated() {
        let id = AssetId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.matches('-').count(), 4);
        assert_eq!(text, text.to_ascii_lowercase());
        assert_eq!(text.parse::<AssetId>().expect("parse id"), id);
    }

    #[test]
    fn minted_ids_are_distinct() {
        assert_ne!(AssetId::new(), AssetId::new());
    }

    #[test]
    fn material_keys_share_the_mesh_prefix() {
        let id = AssetId::new();
        assert!(id.material_key(3).starts_with(&id.material_prefix()));
        assert!(id.material_key(3).ends_with(":mat:3"));
    }
}
