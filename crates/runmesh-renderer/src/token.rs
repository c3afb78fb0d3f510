//! Render Context Token
//!
//! Proof that the current thread is the render context. Render-only
//! operations take a `&RenderToken`, so owner-side code cannot call them.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static RENDER_CONTEXT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Witness that the holder runs on the render context
///
/// Cannot be sent to or shared with another thread.
#[derive(Debug)]
pub struct RenderToken {
    _not_send: PhantomData<*const ()>,
}

impl RenderToken {
    /// Token for the current thread, if it is the render context
    pub fn current() -> Option<Self> {
        if is_in_render_context() {
            Some(Self { _not_send: PhantomData })
        } else {
            None
        }
    }
}

/// Whether the calling thread is currently acting as the render context
pub fn is_in_render_context() -> bool {
    RENDER_CONTEXT_DEPTH.with(|depth| depth.get() > 0)
}

/// Marks the current thread as the render context until dropped
pub(crate) struct RenderContextGuard {
    _not_send: PhantomData<*const ()>,
}

impl RenderContextGuard {
    pub(crate) fn enter() -> (Self, RenderToken) {
        RENDER_CONTEXT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        (
            Self { _not_send: PhantomData },
            RenderToken { _not_send: PhantomData },
        )
    }
}

impl Drop for RenderContextGuard {
    fn drop(&mut self) {
        RENDER_CONTEXT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
