//! # Runmesh
//!
//! Runtime-editable meshes whose sections are edited on an owner thread,
//! mirrored to a render context and cooked into collision in the background.
//!
//! ## Features
//! - Section store with generation-stamped mutations
//! - Render proxy kept in sync through an ordered command channel
//! - Collision cooking, inline or on worker threads, with stale cooks superseded
//! - Change notifications to every linked component

pub mod mesh;

pub use mesh::{DeferredSender, DeferredTask, RuntimeMesh};

pub use runmesh_core::math::{Aabb, MeshBounds, Vec2, Vec3, Vec4};
pub use runmesh_core::{
    Generation, JobPool, JobPoolConfig, ListenerId, MeshError, MeshEvent, MeshListener,
    MeshResult, SectionFlags, SectionId, SectionLod, UpdateFrequency, MAX_LODS,
};
pub use runmesh_physics::{
    CollisionMesh, CookConfig, CookError, CookOutcome, CookPriority, CookResult, CookState,
    CookStats, CookingMode, TriMeshData,
};
pub use runmesh_renderer::{
    ManualRenderContext, ProxyId, RenderContext, RenderContextConfig, RenderQueue, ViewRelevance,
};

use serde::{Deserialize, Serialize};

/// Runtime mesh configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Collision cooking settings
    pub cook: CookConfig,
    /// Cook worker count, `None` to size the pool from the machine
    pub cook_workers: Option<usize>,
}

impl MeshConfig {
    /// Job pool configuration for the cook workers
    pub fn job_pool_config(&self) -> JobPoolConfig {
        let mut config = JobPoolConfig::default();
        if let Some(workers) = self.cook_workers {
            config.num_workers = workers;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_json() {
        let config: MeshConfig =
            serde_json::from_str(r#"{ "cook": { "cooking_mode": "AsyncPreferred" } }"#).unwrap();

        assert_eq!(config.cook.cooking_mode, CookingMode::AsyncPreferred);
        assert!(config.cook.use_complex_as_simple);
        assert_eq!(config.cook_workers, None);
    }

    #[test]
    fn test_job_pool_config() {
        let config = MeshConfig {
            cook_workers: Some(0),
            ..Default::default()
        };
        assert_eq!(config.job_pool_config().num_workers, 0);
        assert!(MeshConfig::default().job_pool_config().num_workers >= 1);
    }
}
