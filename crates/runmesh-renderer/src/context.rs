//! Render Context
//!
//! The thread that owns the render scene and applies queued commands.
//! Features:
//! - Dedicated named render thread with ordered command processing
//! - Blocking flush and query round-trips for the owner
//! - Manual variant driven from the calling thread for deterministic tests and tools

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, RecvTimeoutError};
use runmesh_core::{command_channel, CommandReceiver};

use crate::handle::RenderQueue;
use crate::scene::{RenderCommand, RenderScene};
use crate::token::{RenderContextGuard, RenderToken};
use crate::{RendererError, RendererResult};

/// Render context configuration
#[derive(Debug, Clone)]
pub struct RenderContextConfig {
    /// Render thread name
    pub thread_name: String,
    /// How long the render thread waits for a command before checking for shutdown
    pub poll_interval: Duration,
}

impl Default for RenderContextConfig {
    fn default() -> Self {
        Self {
            thread_name: String::from("render"),
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// Render context running on its own thread
pub struct RenderContext {
    queue: RenderQueue,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RenderContext {
    /// Spawn the render thread
    pub fn spawn(config: RenderContextConfig) -> RendererResult<Self> {
        let (sender, receiver) = command_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let poll_interval = config.poll_interval;

        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || render_loop(receiver, thread_shutdown, poll_interval))
            .map_err(|err| RendererError::ThreadSpawn(err.to_string()))?;

        log::info!("Render context '{}' started", config.thread_name);

        Ok(Self {
            queue: RenderQueue::new(sender),
            shutdown,
            thread: Some(thread),
        })
    }

    /// Submission end for owners
    pub fn queue(&self) -> RenderQueue {
        self.queue.clone()
    }

    /// Run `f` on the render thread and wait for its result
    ///
    /// Returns `None` if the render thread is gone.
    pub fn query<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&RenderToken, &RenderScene) -> R + Send + 'static,
    {
        let (reply, result) = bounded(1);
        let queued = self.queue.execute(move |token, scene| {
            let _ = reply.send(f(token, scene));
        });
        if !queued {
            return None;
        }
        result.recv().ok()
    }

    /// Block until every command submitted so far has been applied
    pub fn flush(&self) -> bool {
        self.query(|_, _| ()).is_some()
    }

    /// Stop the render thread after it has applied everything queued
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_loop(
    receiver: CommandReceiver<RenderCommand>,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let (_guard, token) = RenderContextGuard::enter();
    let mut scene = RenderScene::new();

    while !shutdown.load(Ordering::Acquire) {
        match receiver.recv_timeout(poll_interval) {
            Ok(command) => scene.execute(&token, command),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for command in receiver.drain() {
        scene.execute(&token, command);
    }

    let stats = scene.stats();
    log::info!(
        "Render context stopped: {} applied, {} skipped, {} proxies still alive",
        stats.applied,
        stats.skipped,
        scene.num_proxies()
    );
    // The scene, and every proxy left in it, is deallocated here on the render thread.
}

/// Render context pumped explicitly by the thread that owns it
pub struct ManualRenderContext {
    queue: RenderQueue,
    receiver: CommandReceiver<RenderCommand>,
    scene: RenderScene,
}

impl ManualRenderContext {
    pub fn new() -> Self {
        let (sender, receiver) = command_channel();
        Self {
            queue: RenderQueue::new(sender),
            receiver,
            scene: RenderScene::new(),
        }
    }

    /// Submission end for owners
    pub fn queue(&self) -> RenderQueue {
        self.queue.clone()
    }

    /// Apply every queued command on the calling thread
    pub fn pump(&mut self) -> usize {
        let (_guard, token) = RenderContextGuard::enter();
        let mut processed = 0;
        while let Some(command) = self.receiver.try_recv() {
            self.scene.execute(&token, command);
            processed += 1;
        }
        processed
    }

    /// Number of commands waiting to be pumped
    pub fn pending(&self) -> usize {
        self.receiver.pending()
    }

    /// Inspect the scene as the render context
    pub fn with_scene<R>(&self, f: impl FnOnce(&RenderToken, &RenderScene) -> R) -> R {
        let (_guard, token) = RenderContextGuard::enter();
        f(&token, &self.scene)
    }
}

impl Default for ManualRenderContext {
    fn default() -> Self {
        Self::new()
    }
}
