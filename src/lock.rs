//! The two locks that order graph edits against rendering.
//!
//! - The **graph lock** guards topology: connection sets, enabled flags and the
//!   node registry. The control thread holds it for every edit. The render thread
//!   only ever *tries* to take it at quantum boundaries, so a busy editor can
//!   delay bookkeeping by a quantum but never stall the audio.
//! - The **render lock** is held by the render thread for a whole quantum and by
//!   the control thread only to request changes to render-visible state.
//!
//! Both guards are passed explicitly to every operation that needs them, so the
//! discipline shows up in signatures. Blocking on the graph lock while holding
//! the render lock could deadlock against the render thread and is rejected by
//! a debug assertion.

use std::cell::Cell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::context::Context;

thread_local! {
    static RENDER_DEPTH: Cell<u32> = const { Cell::new(0) };
}

fn holds_render_lock() -> bool {
    RENDER_DEPTH.with(|d| d.get() > 0)
}

#[derive(Default)]
pub(crate) struct ContextLocks {
    graph: Mutex<()>,
    render: Mutex<()>,
}

impl ContextLocks {
    pub(crate) fn lock_graph<'a>(&'a self, context: &'a Context) -> GraphLock<'a> {
        debug_assert!(
            !holds_render_lock(),
            "graph lock requested while this thread holds the render lock"
        );
        GraphLock {
            context,
            _guard: self.graph.lock(),
        }
    }

    pub(crate) fn try_lock_graph<'a>(&'a self, context: &'a Context) -> Option<GraphLock<'a>> {
        self.graph.try_lock().map(|guard| GraphLock {
            context,
            _guard: guard,
        })
    }

    pub(crate) fn lock_render<'a>(&'a self, context: &'a Context) -> RenderLock<'a> {
        debug_assert!(
            !holds_render_lock(),
            "render lock is not reentrant"
        );
        let guard = self.render.lock();
        RENDER_DEPTH.with(|d| d.set(d.get() + 1));
        RenderLock {
            context,
            quantum: context.current_quantum(),
            _guard: guard,
        }
    }
}

/// Proof that the caller holds its context's graph lock.
///
/// Obtained from [`Context::lock_graph`]. Released on drop.
pub struct GraphLock<'a> {
    context: &'a Context,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> GraphLock<'a> {
    /// The context this lock belongs to.
    #[inline]
    pub fn context(&self) -> &'a Context {
        self.context
    }
}

impl fmt::Debug for GraphLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphLock").finish_non_exhaustive()
    }
}

/// Proof that the caller holds its context's render lock.
///
/// The render thread holds one for each quantum; the control thread can take
/// one through [`Context::lock_render`] to request render-visible changes such
/// as a new output channel count.
pub struct RenderLock<'a> {
    context: &'a Context,
    quantum: u64,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> RenderLock<'a> {
    /// The context this lock belongs to.
    #[inline]
    pub fn context(&self) -> &'a Context {
        self.context
    }

    /// Index of the quantum being rendered under this lock.
    ///
    /// Starts at 1 for the first rendered quantum; 0 means nothing has been
    /// rendered yet.
    #[inline]
    pub fn quantum(&self) -> u64 {
        self.quantum
    }

    pub(crate) fn begin_quantum(&mut self) {
        self.quantum = self.context.advance_quantum();
    }
}

impl Drop for RenderLock<'_> {
    fn drop(&mut self) {
        RENDER_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

impl fmt::Debug for RenderLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLock")
            .field("quantum", &self.quantum)
            .finish_non_exhaustive()
    }
}

/// Read-only view into render-thread state such as a rendered bus or a
/// parameter's per-sample values.
///
/// Valid until dropped; drop it before pulling anything that could re-render
/// the same terminal.
pub struct View<'a, T: ?Sized>(MappedMutexGuard<'a, T>);

impl<'a, T: ?Sized> View<'a, T> {
    pub(crate) fn new(guard: MappedMutexGuard<'a, T>) -> Self {
        Self(guard)
    }
}

impl<T: ?Sized> Deref for View<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for View<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Writable counterpart of [`View`], handed to processors for their outputs.
pub struct ViewMut<'a, T: ?Sized>(MappedMutexGuard<'a, T>);

impl<'a, T: ?Sized> ViewMut<'a, T> {
    pub(crate) fn new(guard: MappedMutexGuard<'a, T>) -> Self {
        Self(guard)
    }
}

impl<T: ?Sized> Deref for ViewMut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> DerefMut for ViewMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use crate::Context;

    #[test]
    fn graph_lock_is_exclusive() {
        let ctx = Context::new(48_000);
        let g = ctx.lock_graph();
        assert!(ctx.try_lock_graph().is_none());
        drop(g);
        assert!(ctx.try_lock_graph().is_some());
    }

    #[test]
    fn render_thread_may_try_graph_lock() {
        let ctx = Context::new(48_000);
        let r = ctx.lock_render();
        assert!(ctx.try_lock_graph().is_some());
        drop(r);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "graph lock requested")]
    fn blocking_on_graph_under_render_lock_panics_in_debug() {
        let ctx = Context::new(48_000);
        let _r = ctx.lock_render();
        let _g = ctx.lock_graph();
    }
}
