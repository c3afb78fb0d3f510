//! Render Scene
//!
//! Owner of every render proxy on the render context, and the command
//! envelope the render context consumes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use runmesh_core::MeshCommand;

use crate::proxy::RenderProxy;
use crate::token::RenderToken;

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a render proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(u64);

impl ProxyId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy-{}", self.0)
    }
}

/// Read-only task run on the render context
pub type RenderTask = Box<dyn FnOnce(&RenderToken, &RenderScene) + Send>;

/// Everything the render context can be asked to do
pub enum RenderCommand {
    /// Build a proxy and replay the owner's current state into it
    CreateProxy {
        proxy: ProxyId,
        initial: Vec<MeshCommand>,
    },
    /// Apply one mesh command to a proxy
    Mesh { proxy: ProxyId, command: MeshCommand },
    /// Deallocate a proxy; always executed on the render context
    DestroyProxy { proxy: ProxyId },
    /// Inspect the scene without changing it
    Execute(RenderTask),
}

impl fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateProxy { proxy, initial } => f
                .debug_struct("CreateProxy")
                .field("proxy", proxy)
                .field("initial", &initial.len())
                .finish(),
            Self::Mesh { proxy, command } => f
                .debug_struct("Mesh")
                .field("proxy", proxy)
                .field("command", &command.kind())
                .finish(),
            Self::DestroyProxy { proxy } => {
                f.debug_struct("DestroyProxy").field("proxy", proxy).finish()
            }
            Self::Execute(_) => f.write_str("Execute"),
        }
    }
}

/// Counters kept by the render scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Mesh commands that changed a proxy
    pub applied: u64,
    /// Mesh commands ignored as stale, duplicate or orphaned
    pub skipped: u64,
    pub proxies_created: u64,
    pub proxies_destroyed: u64,
}

/// All proxies living on the render context
#[derive(Debug, Default)]
pub struct RenderScene {
    proxies: AHashMap<ProxyId, RenderProxy>,
    stats: SceneStats,
}

impl RenderScene {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Execute one command
    pub fn execute(&mut self, token: &RenderToken, command: RenderCommand) {
        match command {
            RenderCommand::CreateProxy { proxy, initial } => {
                let mut render_proxy = RenderProxy::new();
                for command in &initial {
                    render_proxy.apply(token, command);
                }
                self.proxies.insert(proxy, render_proxy);
                self.stats.proxies_created += 1;
                log::debug!("Created {} with {} sections", proxy, initial.len());
            }
            RenderCommand::Mesh { proxy, command } => {
                let applied = match self.proxies.get_mut(&proxy) {
                    Some(render_proxy) => render_proxy.apply(token, &command),
                    None => {
                        log::trace!("{} for destroyed {}", command.kind(), proxy);
                        false
                    }
                };
                if applied {
                    self.stats.applied += 1;
                } else {
                    self.stats.skipped += 1;
                }
            }
            RenderCommand::DestroyProxy { proxy } => {
                if self.proxies.remove(&proxy).is_some() {
                    self.stats.proxies_destroyed += 1;
                    log::debug!("Destroyed {}", proxy);
                }
            }
            RenderCommand::Execute(task) => task(token, self),
        }
    }

    pub fn proxy(&self, id: ProxyId) -> Option<&RenderProxy> {
        self.proxies.get(&id)
    }

    pub fn num_proxies(&self) -> usize {
        self.proxies.len()
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }
}
