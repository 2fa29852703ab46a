//! A node's input terminal.
//!
//! An input mixes every output connected to it into one summing bus per
//! quantum. Its channel count is resolved from its sources at quantum
//! boundaries according to the owning node's [`ChannelCountMode`].

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::bus::{AudioBus, ChannelInterpretation};
use crate::error::ConnectError;
use crate::fan::{FanSet, MAX_FAN_IN};
use crate::lock::{GraphLock, RenderLock, View};
use crate::node::{AudioNode, ChannelCountMode, Connection, NodeId};
use crate::output::{AudioNodeOutput, Pulled};

/// How an input decides its channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChannelConfig {
    pub count: usize,
    pub mode: ChannelCountMode,
    pub interpretation: ChannelInterpretation,
}

impl ChannelConfig {
    /// Channel count for an input whose widest source has `max_source`
    /// channels (0 when nothing is connected).
    pub fn resolve(&self, max_source: usize) -> usize {
        if max_source == 0 {
            return self.count;
        }
        match self.mode {
            ChannelCountMode::Max => max_source,
            ChannelCountMode::ClampedMax => max_source.min(self.count),
            ChannelCountMode::Explicit => self.count,
        }
    }
}

/// One input of an [`AudioNode`].
pub struct AudioNodeInput {
    node: Weak<AudioNode>,
    index: usize,
    config: ChannelConfig,
    topology: Mutex<FanSet<Connection, MAX_FAN_IN>>,
    /// Enabled sources, snapshotted at the last quantum boundary.
    sources: Mutex<Vec<Connection>>,
    bus: Mutex<AudioBus>,
}

impl AudioNodeInput {
    pub(crate) fn new(node: Weak<AudioNode>, index: usize, config: ChannelConfig) -> Self {
        Self {
            node,
            index,
            config,
            topology: Mutex::new(FanSet::new()),
            sources: Mutex::new(Vec::with_capacity(MAX_FAN_IN)),
            bus: Mutex::new(AudioBus::new(config.count)),
        }
    }

    pub fn node(&self) -> Option<Arc<AudioNode>> {
        self.node.upgrade()
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn channel_interpretation(&self) -> ChannelInterpretation {
        self.config.interpretation
    }

    /// Connect output `output` of `source` to this input.
    ///
    /// Connecting an existing pair again is a no-op. On error the graph is left
    /// as it was.
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
        if topology.contains_where(|c| c.is(source, output)) {
            return Ok(());
        }
        if topology.is_full() {
            return Err(ConnectError::FanInExceeded);
        }

        let connection = Connection::new(source.clone(), output);
        connection.terminal().add_input(g, self)?;
        // Capacity was checked above and the lock is still held.
        let _ = topology.try_insert(connection);
        drop(topology);

        g.context().mark_input_dirty(self);
        Ok(())
    }

    /// Remove the connection from output `output` of `source`.
    ///
    /// Returns `false` if there was no such connection.
    pub fn disconnect(self: &Arc<Self>, g: &GraphLock<'_>, source: &AudioNode, output: usize) -> bool {
        let removed = self.topology.lock().remove_where(|c| c.is(source, output));
        match removed {
            Some(connection) => {
                connection.terminal().remove_input(g, self);
                g.context().mark_input_dirty(self);
                true
            }
            None => false,
        }
    }

    /// Remove every connection to this input.
    pub fn disconnect_all(self: &Arc<Self>, g: &GraphLock<'_>) {
        let connections: Vec<Connection> = {
            let mut topology = self.topology.lock();
            let all = topology.iter().cloned().collect();
            topology.clear();
            all
        };
        for connection in &connections {
            connection.terminal().remove_input(g, self);
        }
        if !connections.is_empty() {
            g.context().mark_input_dirty(self);
        }
    }

    // Called by the output side, which updates its own set.
    pub(crate) fn remove_source(self: &Arc<Self>, g: &GraphLock<'_>, output: &AudioNodeOutput) -> bool {
        let removed = self
            .topology
            .lock()
            .remove_where(|c| std::ptr::eq(Arc::as_ptr(c.terminal()), output))
            .is_some();
        if removed {
            g.context().mark_input_dirty(self);
        }
        removed
    }

    /// Number of enabled outputs connected to this input.
    pub fn fan_in_count(&self, g: &GraphLock<'_>) -> usize {
        self.topology
            .lock()
            .iter()
            .filter(|c| c.terminal().is_enabled(g))
            .count()
    }

    /// Number of outputs summed during the current quantum.
    pub fn rendering_fan_in_count(&self, _r: &RenderLock<'_>) -> usize {
        self.sources.lock().len()
    }

    /// Connected sources as `(node, output index)` pairs, enabled or not.
    pub fn sources(&self, _g: &GraphLock<'_>) -> Vec<(NodeId, usize)> {
        self.topology.lock().iter().map(Connection::key).collect()
    }

    /// Channel count of the summing bus for the current quantum.
    pub fn number_of_channels(&self, _r: &RenderLock<'_>) -> usize {
        self.bus.lock().channels()
    }

    /// Snapshot enabled sources and resolve the channel count. Called by the
    /// context at a quantum boundary with both locks held.
    pub(crate) fn update_rendering_state(&self, r: &RenderLock<'_>, g: &GraphLock<'_>) {
        let max_source = {
            let topology = self.topology.lock();
            let mut sources = self.sources.lock();
            sources.clear();
            sources.extend(topology.iter().filter(|c| c.terminal().is_enabled(g)).cloned());
            sources
                .iter()
                .map(|c| c.terminal().number_of_channels())
                .max()
                .unwrap_or(0)
        };

        let channels = self.config.resolve(max_source);
        {
            let mut bus = self.bus.lock();
            if bus.channels() != channels {
                trace!(input = self.index, from = bus.channels(), to = channels, "input channel count changed");
                bus.set_channels(channels);
            }
        }

        if let Some(node) = self.node.upgrade() {
            node.check_number_of_channels_for_input(r, self.index, channels);
        }
    }

    /// Pull every source for this quantum and mix them into the summing bus.
    ///
    /// A single source with a matching channel count renders straight into the
    /// summing bus. No sources leave the bus silent.
    pub fn sum(&self, r: &RenderLock<'_>, frames: usize) -> View<'_, AudioBus> {
        self.render(r, frames);
        self.bus(r)
    }

    pub(crate) fn render(&self, r: &RenderLock<'_>, frames: usize) {
        let interpretation = self.config.interpretation;
        let sources = self.sources.lock();
        let mut bus = self.bus.lock();

        match sources.as_slice() {
            [] => bus.silence(),
            [only] => match only.terminal().pull(r, Some(&mut *bus), frames) {
                Pulled::InPlace => {}
                Pulled::Internal(rendered) => bus.copy_from(&rendered, interpretation),
            },
            many => {
                bus.silence();
                for connection in many {
                    if let Pulled::Internal(rendered) = connection.terminal().pull(r, None, frames) {
                        bus.sum_from(&rendered, interpretation);
                    }
                }
            }
        }
    }

    /// The summing bus as left by the most recent [`sum`](Self::sum).
    pub fn bus(&self, _r: &RenderLock<'_>) -> View<'_, AudioBus> {
        View::new(MutexGuard::map(self.bus.lock(), |b| b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: ChannelCountMode) -> ChannelConfig {
        ChannelConfig {
            count: 2,
            mode,
            interpretation: ChannelInterpretation::Speakers,
        }
    }

    #[test]
    fn unconnected_input_uses_default_count() {
        for mode in [ChannelCountMode::Max, ChannelCountMode::ClampedMax, ChannelCountMode::Explicit] {
            assert_eq!(config(mode).resolve(0), 2);
        }
    }

    #[test]
    fn count_modes_resolve() {
        assert_eq!(config(ChannelCountMode::Max).resolve(6), 6);
        assert_eq!(config(ChannelCountMode::Max).resolve(1), 1);
        assert_eq!(config(ChannelCountMode::ClampedMax).resolve(6), 2);
        assert_eq!(config(ChannelCountMode::ClampedMax).resolve(1), 1);
        assert_eq!(config(ChannelCountMode::Explicit).resolve(6), 2);
    }
}
