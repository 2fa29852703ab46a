//! Audio-rate parameters.
//!
//! A parameter has a base value set from any thread. Outputs connected to it
//! are rendered every quantum and their mono down-mix is added to the base
//! value, sample by sample.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dasp_graph::Buffer;
use parking_lot::{Mutex, MutexGuard};

use crate::bus::QUANTUM_FRAMES;
use crate::error::ConnectError;
use crate::lock::{GraphLock, RenderLock, View};
use crate::node::{AudioNode, Connection, NodeId};
use crate::output::{AudioNodeOutput, Pulled};

/// Static description of a parameter, declared by a processor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamInfo {
    pub name: &'static str,
    pub default: f32,
    pub min: f32,
    pub max: f32,
}

impl ParamInfo {
    /// An unbounded parameter.
    pub const fn new(name: &'static str, default: f32) -> Self {
        Self {
            name,
            default,
            min: f32::MIN,
            max: f32::MAX,
        }
    }

    pub const fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    #[inline]
    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

/// Identifies a parameter across the whole process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ParamId(u32);

impl ParamId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A parameter of an [`AudioNode`], readable per sample during processing.
pub struct AudioParam {
    id: ParamId,
    owner: NodeId,
    info: ParamInfo,
    value: AtomicU32,
    topology: Mutex<Vec<Connection>>,
    sources: Mutex<Vec<Connection>>,
    values: Mutex<Buffer>,
}

impl AudioParam {
    pub(crate) fn new(owner: NodeId, info: ParamInfo) -> Self {
        Self {
            id: ParamId::next(),
            owner,
            info,
            value: AtomicU32::new(info.clamp(info.default).to_bits()),
            topology: Mutex::new(Vec::new()),
            sources: Mutex::new(Vec::new()),
            values: Mutex::new(Buffer::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> ParamId {
        self.id
    }

    /// The node this parameter belongs to.
    #[inline]
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    #[inline]
    pub fn info(&self) -> &ParamInfo {
        &self.info
    }

    /// Base value, before connected signals are added.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Set the base value, clamped to the parameter's range. Any thread.
    pub fn set_value(&self, value: f32) {
        self.value
            .store(self.info.clamp(value).to_bits(), Ordering::Relaxed);
    }

    /// Feed output `output` of `source` into this parameter.
    ///
    /// Connecting the same output twice is a no-op.
    pub fn connect(
        self: &Arc<Self>,
        g: &GraphLock<'_>,
        source: &Arc<AudioNode>,
        output: usize,
    ) -> Result<(), ConnectError> {
        let count = source.outputs().len();
        if output >= count {
            return Err(ConnectError::OutputIndex { index: output, count });
        }

        let mut topology = self.topology.lock();
        if topology.iter().any(|c| c.is(source, output)) {
            return Ok(());
        }
        let connection = Connection::new(source.clone(), output);
        connection.terminal().add_param(g, self);
        topology.push(connection);
        drop(topology);

        g.context().mark_param_dirty(self);
        Ok(())
    }

    pub fn disconnect(self: &Arc<Self>, g: &GraphLock<'_>, source: &AudioNode, output: usize) -> bool {
        let removed = {
            let mut topology = self.topology.lock();
            let pos = topology.iter().position(|c| c.is(source, output));
            pos.map(|pos| topology.remove(pos))
        };
        match removed {
            Some(connection) => {
                connection.terminal().remove_param(g, self);
                g.context().mark_param_dirty(self);
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(self: &Arc<Self>, g: &GraphLock<'_>) {
        let connections = std::mem::take(&mut *self.topology.lock());
        for connection in &connections {
            connection.terminal().remove_param(g, self);
        }
        if !connections.is_empty() {
            g.context().mark_param_dirty(self);
        }
    }

    // Called by the output side, which updates its own set.
    pub(crate) fn remove_source(self: &Arc<Self>, g: &GraphLock<'_>, output: &AudioNodeOutput) -> bool {
        let mut topology = self.topology.lock();
        let before = topology.len();
        topology.retain(|c| !std::ptr::eq(Arc::as_ptr(c.terminal()), output));
        let removed = topology.len() != before;
        drop(topology);
        if removed {
            g.context().mark_param_dirty(self);
        }
        removed
    }

    /// Number of enabled outputs feeding this parameter.
    pub fn fan_in_count(&self, g: &GraphLock<'_>) -> usize {
        self.topology
            .lock()
            .iter()
            .filter(|c| c.terminal().is_enabled(g))
            .count()
    }

    /// Connected sources as `(node, output index)` pairs.
    pub fn sources(&self, _g: &GraphLock<'_>) -> Vec<(NodeId, usize)> {
        self.topology.lock().iter().map(Connection::key).collect()
    }

    pub(crate) fn update_rendering_state(&self, _r: &RenderLock<'_>, g: &GraphLock<'_>) {
        let topology = self.topology.lock();
        let mut sources = self.sources.lock();
        sources.clear();
        sources.extend(
            topology
                .iter()
                .filter(|c| c.terminal().is_enabled(g))
                .cloned(),
        );
    }

    /// Compute this quantum's per-sample values: the base value plus the mono
    /// down-mix of every connected output, clamped to the parameter's range.
    pub fn calculate(&self, r: &RenderLock<'_>, frames: usize) {
        let frames = frames.min(QUANTUM_FRAMES);
        let base = self.value();

        let mut values = self.values.lock();
        values.iter_mut().for_each(|v| *v = base);

        let sources = self.sources.lock();
        if sources.is_empty() {
            return;
        }
        for connection in sources.iter() {
            if let Pulled::Internal(bus) = connection.terminal().pull(r, None, frames) {
                bus.sum_mono_into(&mut values[..frames]);
            }
        }
        for v in values[..frames].iter_mut() {
            *v = self.info.clamp(*v);
        }
    }

    /// Values computed by the last [`calculate`](Self::calculate).
    pub fn values(&self, _r: &RenderLock<'_>) -> View<'_, [f32]> {
        View::new(MutexGuard::map(self.values.lock(), |b| &mut **b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_value_is_clamped() {
        let param = AudioParam::new(NodeId(0), ParamInfo::new("q", 1.0).with_range(0.0, 2.0));
        assert_eq!(param.value(), 1.0);
        param.set_value(5.0);
        assert_eq!(param.value(), 2.0);
        param.set_value(-1.0);
        assert_eq!(param.value(), 0.0);
    }

    #[test]
    fn ids_are_unique() {
        let a = AudioParam::new(NodeId(0), ParamInfo::new("a", 0.0));
        let b = AudioParam::new(NodeId(0), ParamInfo::new("b", 0.0));
        assert_ne!(a.id(), b.id());
    }
}
