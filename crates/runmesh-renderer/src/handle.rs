//! Owner-side Handles
//!
//! The only ways the owner context reaches the render context: queueing
//! commands through a [`RenderQueue`] and owning a proxy through an
//! [`OwnerProxyHandle`].

use runmesh_core::channel::ChannelStats;
use runmesh_core::{CommandSender, MeshCommand};

use crate::scene::{ProxyId, RenderCommand, RenderScene};
use crate::token::{is_in_render_context, RenderToken};

/// Cloneable submission end of a render context
#[derive(Debug, Clone)]
pub struct RenderQueue {
    sender: CommandSender<RenderCommand>,
}

impl RenderQueue {
    pub(crate) fn new(sender: CommandSender<RenderCommand>) -> Self {
        Self { sender }
    }

    /// Create a proxy on the render context, seeded with `initial` commands
    pub fn create_proxy(&self, initial: Vec<MeshCommand>) -> OwnerProxyHandle {
        let proxy = ProxyId::allocate();
        self.sender.submit(RenderCommand::CreateProxy { proxy, initial });
        OwnerProxyHandle {
            proxy,
            queue: self.clone(),
        }
    }

    /// Queue a read-only task for the render context
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce(&RenderToken, &RenderScene) + Send + 'static,
    {
        self.sender.submit(RenderCommand::Execute(Box::new(task)))
    }

    pub(crate) fn submit(&self, command: RenderCommand) -> bool {
        self.sender.submit(command)
    }

    pub fn stats(&self) -> &ChannelStats {
        self.sender.stats()
    }
}

/// Owner-side reference to a render proxy
///
/// Dropping the handle, on any thread, queues the proxy's destruction; the
/// render context deallocates it after every command submitted before the drop.
#[derive(Debug)]
pub struct OwnerProxyHandle {
    proxy: ProxyId,
    queue: RenderQueue,
}

impl OwnerProxyHandle {
    pub fn id(&self) -> ProxyId {
        self.proxy
    }

    /// Queue a mesh command for this proxy
    pub fn submit(&self, command: MeshCommand) -> bool {
        log::trace!("Submitting {} to {}", command.kind(), self.proxy);
        self.queue.submit(RenderCommand::Mesh {
            proxy: self.proxy,
            command,
        })
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }
}

impl Drop for OwnerProxyHandle {
    fn drop(&mut self) {
        log::trace!(
            "Releasing {} from {} context",
            self.proxy,
            if is_in_render_context() { "render" } else { "owner" }
        );
        self.queue.submit(RenderCommand::DestroyProxy { proxy: self.proxy });
    }
}
