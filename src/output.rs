//! A node's output terminal.
//!
//! An output owns the bus its node renders into and remembers which inputs and
//! parameters consume it. Consumers pull it during a quantum; the owning node
//! is processed at most once per quantum no matter how many consumers there
//! are.
//!
//! Connection sets live behind the graph lock. Channel counts, the internal bus
//! and the rendering fan-out snapshot are only changed by the render thread at
//! quantum boundaries, so a consumer never sees them move mid-quantum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::bus::AudioBus;
use crate::error::ConnectError;
use crate::fan::{FanSet, MAX_FAN_OUT};
use crate::input::AudioNodeInput;
use crate::lock::{GraphLock, RenderLock, View, ViewMut};
use crate::node::AudioNode;
use crate::param::{AudioParam, ParamId};

/// Result of [`AudioNodeOutput::pull`].
pub enum Pulled<'a> {
    /// The rendered audio was moved into the bus the caller offered.
    InPlace,
    /// The rendered audio lives in the output's internal bus.
    Internal(View<'a, AudioBus>),
}

struct Topology {
    inputs: FanSet<Weak<AudioNodeInput>, MAX_FAN_OUT>,
    params: HashMap<ParamId, Weak<AudioParam>>,
    enabled: bool,
}

impl Topology {
    fn live_inputs(&self) -> impl Iterator<Item = Arc<AudioNodeInput>> + '_ {
        self.inputs.iter().filter_map(Weak::upgrade)
    }

    fn live_params(&self) -> impl Iterator<Item = Arc<AudioParam>> + '_ {
        self.params.values().filter_map(Weak::upgrade)
    }

    fn prune(&mut self) {
        self.inputs.retain(|w| w.strong_count() > 0);
        self.params.retain(|_, w| w.strong_count() > 0);
    }
}

struct RenderState {
    bus: AudioBus,
    fan_out: usize,
    param_fan_out: usize,
}

/// One output of an [`AudioNode`].
pub struct AudioNodeOutput {
    node: Weak<AudioNode>,
    index: usize,
    /// Only written by the render thread, at quantum boundaries.
    channels: AtomicUsize,
    /// Requested channel count, applied at the next boundary.
    desired_channels: AtomicUsize,
    topology: Mutex<Topology>,
    render: Mutex<RenderState>,
}

impl AudioNodeOutput {
    /// `channels` may be 0, meaning the count is unknown until someone calls
    /// [`set_number_of_channels`](Self::set_number_of_channels).
    pub(crate) fn new(node: Weak<AudioNode>, index: usize, channels: usize) -> Self {
        Self {
            node,
            index,
            channels: AtomicUsize::new(channels),
            desired_channels: AtomicUsize::new(channels),
            topology: Mutex::new(Topology {
                inputs: FanSet::new(),
                params: HashMap::new(),
                enabled: true,
            }),
            render: Mutex::new(RenderState {
                bus: AudioBus::new(channels),
                fan_out: 0,
                param_fan_out: 0,
            }),
        }
    }

    /// The node this output belongs to, if it is still alive.
    pub fn node(&self) -> Option<Arc<AudioNode>> {
        self.node.upgrade()
    }

    /// Position of this output on its node.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current channel count. Safe to read from any thread.
    #[inline]
    pub fn number_of_channels(&self) -> usize {
        self.channels.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_channel_count_known(&self) -> bool {
        self.number_of_channels() > 0
    }

    /// Render the owning node for the current quantum (if it has not been
    /// rendered yet) and return its audio for this output.
    ///
    /// If `in_place` has this output's channel count and the caller is the
    /// only consumer, the rendered bus is swapped into `in_place` instead of
    /// being copied and [`Pulled::InPlace`] is returned.
    ///
    /// An output with no channels yields an empty bus, which mixes as silence.
    pub fn pull(
        &self,
        r: &RenderLock<'_>,
        in_place: Option<&mut AudioBus>,
        frames: usize,
    ) -> Pulled<'_> {
        if let Some(node) = self.node.upgrade() {
            node.process_if_necessary(r, frames);
        }

        let mut render = self.render.lock();
        if let Some(dst) = in_place {
            let sole_consumer = render.fan_out + render.param_fan_out == 1;
            if sole_consumer && dst.channels() == render.bus.channels() {
                std::mem::swap(dst, &mut render.bus);
                return Pulled::InPlace;
            }
        }
        Pulled::Internal(View::new(MutexGuard::map(render, |s| &mut s.bus)))
    }

    /// The internal bus as left by the most recent render.
    pub fn bus(&self, _r: &RenderLock<'_>) -> View<'_, AudioBus> {
        View::new(MutexGuard::map(self.render.lock(), |s| &mut s.bus))
    }

    pub(crate) fn bus_mut(&self, _r: &RenderLock<'_>) -> ViewMut<'_, AudioBus> {
        ViewMut::new(MutexGuard::map(self.render.lock(), |s| &mut s.bus))
    }

    /// Request a new channel count.
    ///
    /// The internal bus is reallocated at the start of the next quantum, never
    /// during one, so a consumer reading this quantum's bus is never torn.
    pub fn set_number_of_channels(self: &Arc<Self>, r: &RenderLock<'_>, channels: usize) {
        if self.desired_channels.swap(channels, Ordering::AcqRel) != channels {
            r.context().mark_output_dirty(self);
        }
    }

    /// Apply pending changes. Called by the context at a quantum boundary with
    /// both locks held.
    pub(crate) fn update_rendering_state(&self, r: &RenderLock<'_>, _g: &GraphLock<'_>) {
        let mut topology = self.topology.lock();
        topology.prune();

        let (fan_out, param_fan_out) = if topology.enabled {
            (topology.inputs.len(), topology.params.len())
        } else {
            (0, 0)
        };

        let desired = self.desired_channels.load(Ordering::Acquire);
        let changed = {
            let mut render = self.render.lock();
            render.fan_out = fan_out;
            render.param_fan_out = param_fan_out;
            if render.bus.channels() != desired {
                render.bus.set_channels(desired);
                self.channels.store(desired, Ordering::Release);
                true
            } else {
                false
            }
        };

        if changed {
            self.propagate_channel_count(r, &topology);
        }
    }

    // One hop only: each input re-resolves its own count at the boundary.
    fn propagate_channel_count(&self, r: &RenderLock<'_>, topology: &Topology) {
        for input in topology.live_inputs() {
            r.context().mark_input_dirty(&input);
        }
    }

    /// Number of inputs fed during the current quantum.
    pub fn rendering_fan_out_count(&self, _r: &RenderLock<'_>) -> usize {
        self.render.lock().fan_out
    }

    /// Number of parameters fed during the current quantum.
    pub fn rendering_param_fan_out_count(&self, _r: &RenderLock<'_>) -> usize {
        self.render.lock().param_fan_out
    }

    /// Number of connected inputs. 0 while disabled.
    pub fn fan_out_count(&self, _g: &GraphLock<'_>) -> usize {
        let topology = self.topology.lock();
        if topology.enabled {
            topology.live_inputs().count()
        } else {
            0
        }
    }

    /// Number of connected parameters. 0 while disabled.
    pub fn param_fan_out_count(&self, _g: &GraphLock<'_>) -> usize {
        let topology = self.topology.lock();
        if topology.enabled {
            topology.live_params().count()
        } else {
            0
        }
    }

    pub fn is_connected(&self, g: &GraphLock<'_>) -> bool {
        self.fan_out_count(g) > 0 || self.param_fan_out_count(g) > 0
    }

    pub fn is_enabled(&self, _g: &GraphLock<'_>) -> bool {
        self.topology.lock().enabled
    }

    pub(crate) fn add_input(
        self: &Arc<Self>,
        g: &GraphLock<'_>,
        input: &Arc<AudioNodeInput>,
    ) -> Result<(), ConnectError> {
        let mut topology = self.topology.lock();
        if topology.inputs.contains_where(|w| w.as_ptr() == Arc::as_ptr(input)) {
            return Ok(());
        }
        topology.prune();
        topology
            .inputs
            .try_insert(Arc::downgrade(input))
            .map_err(|_| ConnectError::FanOutExceeded)?;
        drop(topology);

        g.context().mark_output_dirty(self);
        Ok(())
    }

    pub(crate) fn remove_input(self: &Arc<Self>, g: &GraphLock<'_>, input: &AudioNodeInput) -> bool {
        let removed = self
            .topology
            .lock()
            .inputs
            .remove_where(|w| std::ptr::eq(w.as_ptr(), input))
            .is_some();
        if removed {
            g.context().mark_output_dirty(self);
        }
        removed
    }

    pub(crate) fn add_param(self: &Arc<Self>, g: &GraphLock<'_>, param: &Arc<AudioParam>) {
        self.topology
            .lock()
            .params
            .insert(param.id(), Arc::downgrade(param));
        g.context().mark_output_dirty(self);
    }

    pub(crate) fn remove_param(self: &Arc<Self>, g: &GraphLock<'_>, param: &AudioParam) -> bool {
        let removed = self.topology.lock().params.remove(&param.id()).is_some();
        if removed {
            g.context().mark_output_dirty(self);
        }
        removed
    }

    /// Stop rendering this output while keeping its connections.
    ///
    /// Used for nodes that finished their work but may be started again, such
    /// as a one-shot sound that reached its end. A disabled output is not
    /// counted as fan-out and consumers stop pulling it at the next quantum.
    pub fn disable(self: &Arc<Self>, g: &GraphLock<'_>) {
        self.set_enabled(g, false);
    }

    /// Undo [`disable`](Self::disable). Existing connections take part in
    /// rendering again from the next quantum.
    pub fn enable(self: &Arc<Self>, g: &GraphLock<'_>) {
        self.set_enabled(g, true);
    }

    fn set_enabled(self: &Arc<Self>, g: &GraphLock<'_>, enabled: bool) {
        let (inputs, params): (Vec<_>, Vec<_>) = {
            let mut topology = self.topology.lock();
            if topology.enabled == enabled {
                return;
            }
            topology.enabled = enabled;
            (topology.live_inputs().collect(), topology.live_params().collect())
        };

        let ctx = g.context();
        ctx.mark_output_dirty(self);
        for input in &inputs {
            ctx.mark_input_dirty(input);
        }
        for param in &params {
            ctx.mark_param_dirty(param);
        }
        debug!(
            output = self.index,
            enabled,
            inputs = inputs.len(),
            params = params.len(),
            "output enabled state changed"
        );
    }

    /// Remove every input and parameter connection of this output.
    pub fn disconnect_all(self: &Arc<Self>, g: &GraphLock<'_>) {
        let (inputs, params): (Vec<_>, Vec<_>) = {
            let topology = self.topology.lock();
            (topology.live_inputs().collect(), topology.live_params().collect())
        };

        for input in &inputs {
            input.remove_source(g, self);
        }
        for param in &params {
            param.remove_source(g, self);
        }

        let mut topology = self.topology.lock();
        topology.inputs.clear();
        topology.params.clear();
        drop(topology);

        g.context().mark_output_dirty(self);
        debug!(
            output = self.index,
            inputs = inputs.len(),
            params = params.len(),
            "output disconnected"
        );
    }
}
