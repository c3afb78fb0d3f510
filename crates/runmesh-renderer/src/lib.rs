//! # Runmesh Renderer
//!
//! Render-context side of the Runmesh runtime mesh system.
//!
//! ## Features
//! - Render proxies mirroring a mesh's renderable sections
//! - Generation-checked, idempotent command application
//! - Render-only operations gated behind a non-sendable [`RenderToken`]
//! - Proxy destruction handed off to the render context as a command
//! - Threaded and manually-pumped render contexts

pub mod context;
pub mod handle;
pub mod proxy;
pub mod scene;
pub mod token;

pub use context::{ManualRenderContext, RenderContext, RenderContextConfig};
pub use handle::{OwnerProxyHandle, RenderQueue};
pub use proxy::{BufferUsage, RenderProxy, RenderSection, ViewRelevance};
pub use scene::{ProxyId, RenderCommand, RenderScene, SceneStats};
pub use token::{is_in_render_context, RenderToken};

use thiserror::Error;

/// Renderer errors
#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Render thread creation failed: {0}")]
    ThreadSpawn(String),
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_render_context() {
        assert!(!is_in_render_context());
        assert!(RenderToken::current().is_none());
    }
}
