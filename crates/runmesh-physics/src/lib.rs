//! # Runmesh Physics
//!
//! Collision side of the Runmesh runtime mesh system.
//!
//! ## Features
//! - Aggregation of collision-enabled sections into one triangle soup
//! - Collision cooking into a parry3d triangle mesh
//! - Synchronous or background cooking through a per-mesh cook queue
//! - Generation-based supersession of stale cooks
//! - Face-to-section lookup for collision hits

pub mod collision;
pub mod cook;
pub mod cooker;

pub use collision::{
    check_aggregate_size, collision_parts, CollisionParts, SectionFaceRange, TriMeshData,
};
pub use cook::{CookOutcome, CookQueue, CookState, CookStats};
pub use cooker::{cook, CollisionMesh, CookSnapshot, RaycastHit};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Collision cooking errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CookError {
    #[error("No collision geometry to cook")]
    EmptyGeometry,
    #[error("All {triangles} collision triangles are degenerate")]
    Degenerate { triangles: usize },
    #[error("Collision aggregate of {vertices} vertices and {faces} faces exceeds u32 indexing")]
    TooLarge { vertices: usize, faces: usize },
}

/// Result type for cooking operations
pub type CookResult<T> = Result<T, CookError>;

/// Where cooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CookingMode {
    /// Cook inline on the owner context during the tick
    #[default]
    SyncOnly,
    /// Cook on a worker and install on a later tick
    AsyncPreferred,
}

/// What the cooked collision is optimized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CookPriority {
    /// Weld shared vertices for a smaller runtime mesh
    #[default]
    CollisionPerformance,
    /// Skip welding for faster cooks
    CookingPerformance,
}

/// Collision cooking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookConfig {
    pub cooking_mode: CookingMode,
    /// Use the triangles for simple queries instead of a bounding box
    pub use_complex_as_simple: bool,
    pub priority: CookPriority,
}

impl Default for CookConfig {
    fn default() -> Self {
        Self {
            cooking_mode: CookingMode::SyncOnly,
            use_complex_as_simple: true,
            priority: CookPriority::CollisionPerformance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cook_config_default() {
        let config = CookConfig::default();
        assert_eq!(config.cooking_mode, CookingMode::SyncOnly);
        assert!(config.use_complex_as_simple);
    }

    #[test]
    fn test_cook_error_display() {
        assert_eq!(
            CookError::Degenerate { triangles: 3 }.to_string(),
            "All 3 collision triangles are degenerate"
        );
    }
}
