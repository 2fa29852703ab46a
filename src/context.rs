//! The graph owner: node registry, connection API and the render loop.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::Mutex;
use petgraph::graph::{EdgeReference, Graph, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use rtrb::RingBuffer;
use tracing::{debug, trace, warn};

use crate::bus::{AudioBus, ChannelInterpretation, QUANTUM_FRAMES};
use crate::error::ConnectError;
use crate::input::AudioNodeInput;
use crate::lock::{ContextLocks, GraphLock, RenderLock};
use crate::node::{AudioNode, AudioProcessor, NodeId};
use crate::nodes::sink::Destination;
use crate::output::AudioNodeOutput;
use crate::param::AudioParam;

/// Maximum number of update passes per quantum boundary. Channel changes that
/// travel further than this settle over the following quanta.
const SETTLE_PASSES: usize = 16;

const DESTINATION_ID: NodeId = NodeId(0);

/// Consecutive quanta a finished node may wait for the graph lock before it is
/// reported.
const FINISH_WAIT_WARN: u32 = 256;

/// A handle to a node in a [`Context`].
///
/// Handles provide two capabilities:
/// 1. **Connections** - a handle derefs to the node's `Arc<AudioNode>`, so it can
///    be passed straight to [`Context::connect`] and friends
/// 2. **Messages** - send control updates via [`Handle::send`]
///
/// Dropping the handle does not remove the node: it keeps rendering for as long
/// as it feeds something.
///
/// # Example
///
/// ```
/// # use klangnetz::{Context, nodes::{Sine, SineMessage}};
/// let ctx = Context::new(48_000);
/// let mut sine = ctx.add(Sine::new(440.0));
///
/// // Change frequency (processed next quantum)
/// sine.send(SineMessage::SetFrequency(880.0)).ok();
/// ```
pub struct Handle<M: Send + 'static> {
    node: Arc<AudioNode>,
    sender: rtrb::Producer<M>,
}

impl<M: Send + 'static> Handle<M> {
    /// Send a message to the node.
    ///
    /// The message will be processed at the start of the node's next quantum.
    /// This is lock-free and safe to call from any thread.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the message was queued successfully
    /// - `Err(msg)` if the queue is full (message dropped)
    pub fn send(&mut self, msg: M) -> Result<(), M> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    pub fn node(&self) -> &Arc<AudioNode> {
        &self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }
}

impl<M: Send + 'static> Deref for Handle<M> {
    type Target = Arc<AudioNode>;

    fn deref(&self) -> &Arc<AudioNode> {
        &self.node
    }
}

#[derive(Default)]
struct Dirty {
    outputs: Vec<Arc<AudioNodeOutput>>,
    inputs: Vec<Arc<AudioNodeInput>>,
    params: Vec<Arc<AudioParam>>,
}

impl Dirty {
    fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.inputs.is_empty() && self.params.is_empty()
    }
}

fn push_unique<T>(list: &mut Vec<Arc<T>>, item: &Arc<T>) {
    if !list.iter().any(|x| Arc::ptr_eq(x, item)) {
        list.push(item.clone());
    }
}

// Only touched with the graph lock held.
#[derive(Default)]
struct AutomaticPull {
    nodes: Vec<Arc<AudioNode>>,
    changed: bool,
}

/// Owns an audio graph and renders it one quantum at a time.
///
/// A `Context` is shared between one render thread, which calls
/// [`render_quantum`](Self::render_quantum), and any number of control threads,
/// which add nodes and edit connections under the graph lock. Edits never block
/// the render thread; they take effect at the next quantum boundary.
///
/// # Example
///
/// ```
/// # use klangnetz::{AudioBus, Context, nodes::{Gain, Sine}};
/// let ctx = Context::new(48_000);
/// let sine = ctx.add(Sine::new(440.0));
/// let gain = ctx.add(Gain::new(0.5));
///
/// {
///     let g = ctx.lock_graph();
///     ctx.connect(&g, &sine, 0, &gain, 0).unwrap();
///     ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();
/// }
///
/// let mut out = AudioBus::new(ctx.channels());
/// ctx.render_quantum(&mut out);
/// ```
pub struct Context {
    locks: ContextLocks,
    sample_rate: u32,
    channels: usize,
    queue_size: usize,
    quantum: AtomicU64,
    next_node_id: AtomicU32,
    destination: Arc<AudioNode>,
    registry: Mutex<HashMap<NodeId, Weak<AudioNode>>>,
    automatic: Mutex<AutomaticPull>,
    /// Render thread's copy of the automatic pull list.
    automatic_render: Mutex<Vec<Arc<AudioNode>>>,
    dirty: Mutex<Dirty>,
    finished: Mutex<Vec<Arc<AudioNode>>>,
    finish_waits: AtomicU32,
    /// Delay nodes processed this quantum whose inputs are still to be pulled.
    captures: Mutex<Vec<Arc<AudioNode>>>,
}

impl Context {
    /// Create a stereo context at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        let channels = 2;
        let destination = Self::build_destination(sample_rate, channels);
        let mut registry = HashMap::new();
        registry.insert(DESTINATION_ID, Arc::downgrade(&destination));

        Self {
            locks: ContextLocks::default(),
            sample_rate,
            channels,
            queue_size: 64,
            quantum: AtomicU64::new(0),
            next_node_id: AtomicU32::new(DESTINATION_ID.0 + 1),
            destination,
            registry: Mutex::new(registry),
            automatic: Mutex::new(AutomaticPull::default()),
            automatic_render: Mutex::new(Vec::new()),
            dirty: Mutex::new(Dirty::default()),
            finished: Mutex::new(Vec::new()),
            finish_waits: AtomicU32::new(0),
            captures: Mutex::new(Vec::new()),
        }
    }

    /// Set the number of destination channels (builder pattern).
    ///
    /// Default is 2 (stereo).
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self.destination = Self::build_destination(self.sample_rate, channels);
        self.registry
            .get_mut()
            .insert(DESTINATION_ID, Arc::downgrade(&self.destination));
        self
    }

    /// Set the capacity of each node's message queue (builder pattern).
    ///
    /// Default is 64 messages.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    fn build_destination(sample_rate: u32, channels: usize) -> Arc<AudioNode> {
        let (_, receiver) = RingBuffer::new(1);
        AudioNode::new(DESTINATION_ID, Destination::new(channels), receiver, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the destination.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Index of the most recently started quantum; 0 before the first.
    pub fn current_quantum(&self) -> u64 {
        self.quantum.load(Ordering::Acquire)
    }

    pub(crate) fn advance_quantum(&self) -> u64 {
        self.quantum.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The node whose single input is rendered into the buffer handed to
    /// [`render_quantum`](Self::render_quantum).
    pub fn destination(&self) -> &Arc<AudioNode> {
        &self.destination
    }

    /// Take the graph lock, blocking until it is free.
    ///
    /// Must not be called while this thread holds the render lock.
    pub fn lock_graph(&self) -> GraphLock<'_> {
        self.locks.lock_graph(self)
    }

    /// Take the graph lock if it is free.
    pub fn try_lock_graph(&self) -> Option<GraphLock<'_>> {
        self.locks.try_lock_graph(self)
    }

    /// Take the render lock. The render thread holds it for a whole quantum.
    pub fn lock_render(&self) -> RenderLock<'_> {
        self.locks.lock_render(self)
    }

    /// Add a node and return a handle to it.
    ///
    /// The node is not connected to anything yet.
    pub fn add<P: AudioProcessor>(&self, processor: P) -> Handle<P::Message> {
        let id = NodeId(self.next_node_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = RingBuffer::new(self.queue_size);
        let node = AudioNode::new(id, processor, receiver, self.sample_rate);

        let mut registry = self.registry.lock();
        registry.retain(|_, node| node.strong_count() > 0);
        registry.insert(id, Arc::downgrade(&node));
        drop(registry);

        debug!(node = ?id, name = node.name(), "node added");
        Handle { node, sender }
    }

    /// Connect output `output` of `from` to input `input` of `to`.
    ///
    /// Connecting an existing pair again is a no-op. A connection that would
    /// close a loop not passing through a delay node is rejected with
    /// [`ConnectError::Cycle`]. On error the graph is unchanged.
    pub fn connect(
        &self,
        g: &GraphLock<'_>,
        from: &Arc<AudioNode>,
        output: usize,
        to: &Arc<AudioNode>,
        input: usize,
    ) -> Result<(), ConnectError> {
        let result = self.try_connect(g, from, output, to, input);
        match result {
            Ok(()) => debug!(from = ?from.id(), output, to = ?to.id(), input, "connected"),
            Err(err) => warn!(from = ?from.id(), output, to = ?to.id(), input, %err, "connect rejected"),
        }
        result
    }

    fn try_connect(
        &self,
        g: &GraphLock<'_>,
        from: &Arc<AudioNode>,
        output: usize,
        to: &Arc<AudioNode>,
        input: usize,
    ) -> Result<(), ConnectError> {
        let count = from.outputs().len();
        if output >= count {
            return Err(ConnectError::OutputIndex { index: output, count });
        }
        let count = to.inputs().len();
        let terminal = to
            .input(input)
            .ok_or(ConnectError::InputIndex { index: input, count })?;
        if self.topology(g).closes_undelayed_cycle(from.id(), to.id()) {
            return Err(ConnectError::Cycle);
        }
        terminal.connect(g, from, output)
    }

    /// Feed output `output` of `from` into `param`.
    pub fn connect_param(
        &self,
        g: &GraphLock<'_>,
        from: &Arc<AudioNode>,
        output: usize,
        param: &Arc<AudioParam>,
    ) -> Result<(), ConnectError> {
        let result = if self.topology(g).closes_undelayed_cycle(from.id(), param.owner()) {
            Err(ConnectError::Cycle)
        } else {
            param.connect(g, from, output)
        };
        match result {
            Ok(()) => debug!(from = ?from.id(), output, param = param.info().name, "param connected"),
            Err(err) => warn!(from = ?from.id(), output, param = param.info().name, %err, "param connect rejected"),
        }
        result
    }

    /// Remove the connection from output `output` of `from` to input `input`
    /// of `to`. Returns `false` if there was none.
    pub fn disconnect(
        &self,
        g: &GraphLock<'_>,
        from: &Arc<AudioNode>,
        output: usize,
        to: &Arc<AudioNode>,
        input: usize,
    ) -> bool {
        let removed = to
            .input(input)
            .map_or(false, |terminal| terminal.disconnect(g, from, output));
        if removed {
            debug!(from = ?from.id(), output, to = ?to.id(), input, "disconnected");
        }
        removed
    }

    pub fn disconnect_param(
        &self,
        g: &GraphLock<'_>,
        from: &Arc<AudioNode>,
        output: usize,
        param: &Arc<AudioParam>,
    ) -> bool {
        let removed = param.disconnect(g, from, output);
        if removed {
            debug!(from = ?from.id(), output, param = param.info().name, "param disconnected");
        }
        removed
    }

    /// Remove every connection leaving output `output` of `node`.
    pub fn disconnect_output(&self, g: &GraphLock<'_>, node: &Arc<AudioNode>, output: usize) {
        if let Some(terminal) = node.output(output) {
            terminal.disconnect_all(g);
        }
    }

    /// Cut `node` out of the graph: every connection into or out of it is
    /// removed and it stops being pulled automatically. The node itself lives
    /// on while handles to it exist.
    pub fn remove_node(&self, g: &GraphLock<'_>, node: &Arc<AudioNode>) {
        for input in node.inputs() {
            input.disconnect_all(g);
        }
        for param in node.params() {
            param.disconnect_all(g);
        }
        for output in node.outputs() {
            output.disconnect_all(g);
        }
        self.remove_automatic_pull_node(g, node);

        if node.id() != DESTINATION_ID {
            self.registry.lock().remove(&node.id());
        }
        debug!(node = ?node.id(), name = node.name(), "node removed");
    }

    /// Render `node` every quantum even if nothing pulls it.
    ///
    /// For sinks that are not connected to the destination, such as recorders
    /// and analysers.
    pub fn add_automatic_pull_node(&self, _g: &GraphLock<'_>, node: &Arc<AudioNode>) {
        let mut automatic = self.automatic.lock();
        if !automatic.nodes.iter().any(|n| Arc::ptr_eq(n, node)) {
            automatic.nodes.push(node.clone());
            automatic.changed = true;
            debug!(node = ?node.id(), "automatic pull added");
        }
    }

    pub fn remove_automatic_pull_node(&self, _g: &GraphLock<'_>, node: &Arc<AudioNode>) {
        let mut automatic = self.automatic.lock();
        let before = automatic.nodes.len();
        automatic.nodes.retain(|n| !Arc::ptr_eq(n, node));
        if automatic.nodes.len() != before {
            automatic.changed = true;
            debug!(node = ?node.id(), "automatic pull removed");
        }
    }

    /// A snapshot of the graph's nodes and connections.
    pub fn topology(&self, g: &GraphLock<'_>) -> Topology {
        let mut nodes: Vec<Arc<AudioNode>> = {
            let mut registry = self.registry.lock();
            registry.retain(|_, node| node.strong_count() > 0);
            registry.values().filter_map(Weak::upgrade).collect()
        };
        nodes.sort_by_key(|node| node.id());

        let mut topology = Topology::default();
        for node in &nodes {
            let index = topology.graph.add_node(TopologyNode {
                id: node.id(),
                name: node.name(),
                is_delay: node.is_delay(),
            });
            topology.indices.insert(node.id(), index);
        }

        for node in &nodes {
            let to = topology.indices[&node.id()];
            for input in node.inputs() {
                for (source, output) in input.sources(g) {
                    if let Some(&from) = topology.indices.get(&source) {
                        let edge = TopologyEdge::Audio { output, input: input.index() };
                        topology.graph.add_edge(from, to, edge);
                    }
                }
            }
            for param in node.params() {
                for (source, output) in param.sources(g) {
                    if let Some(&from) = topology.indices.get(&source) {
                        let edge = TopologyEdge::Param { output, param: param.info().name };
                        topology.graph.add_edge(from, to, edge);
                    }
                }
            }
        }
        topology
    }

    /// Render one quantum of the destination into `out`.
    ///
    /// Called by the render thread. Pending graph edits are applied first if
    /// the graph lock is free; otherwise they wait for a later quantum.
    pub fn render_quantum(&self, out: &mut AudioBus) {
        let mut r = self.lock_render();
        r.begin_quantum();
        trace!(quantum = r.quantum(), "render quantum");

        self.pre_render(&r);

        self.destination.process_if_necessary(&r, QUANTUM_FRAMES);
        match self.destination.input(0) {
            Some(input) => out.copy_from(&input.bus(&r), ChannelInterpretation::Speakers),
            None => out.silence(),
        }

        for node in self.automatic_render.lock().iter() {
            node.process_if_necessary(&r, QUANTUM_FRAMES);
        }

        // Capturing can process further delays, which queue themselves here.
        loop {
            let next = self.captures.lock().pop();
            match next {
                Some(node) => node.capture_inputs(&r, QUANTUM_FRAMES),
                None => break,
            }
        }

        self.post_render(&r);
    }

    fn pre_render(&self, r: &RenderLock<'_>) {
        let Some(g) = self.try_lock_graph() else {
            trace!(quantum = r.quantum(), "graph busy, deferring updates");
            return;
        };

        for _ in 0..SETTLE_PASSES {
            let dirty = std::mem::take(&mut *self.dirty.lock());
            if dirty.is_empty() {
                break;
            }
            for output in &dirty.outputs {
                output.update_rendering_state(r, &g);
            }
            for input in &dirty.inputs {
                input.update_rendering_state(r, &g);
            }
            for param in &dirty.params {
                param.update_rendering_state(r, &g);
            }
        }

        let mut automatic = self.automatic.lock();
        if automatic.changed {
            automatic.changed = false;
            let mut render = self.automatic_render.lock();
            render.clear();
            render.extend(automatic.nodes.iter().cloned());
        }
    }

    fn post_render(&self, r: &RenderLock<'_>) {
        if self.finished.lock().is_empty() {
            return;
        }
        let Some(g) = self.try_lock_graph() else {
            let waits = self.finish_waits.fetch_add(1, Ordering::Relaxed) + 1;
            if waits == FINISH_WAIT_WARN {
                warn!(quanta = waits, "graph lock contended, finished nodes still enabled");
            }
            return;
        };
        self.finish_waits.store(0, Ordering::Relaxed);
        let finished = std::mem::take(&mut *self.finished.lock());
        for node in &finished {
            // Re-enabled by a control thread since it finished.
            if node.is_finished() {
                trace!(quantum = r.quantum(), node = ?node.id(), "disabling finished node");
                node.disable_outputs(&g);
            }
        }
    }

    pub(crate) fn mark_output_dirty(&self, output: &Arc<AudioNodeOutput>) {
        push_unique(&mut self.dirty.lock().outputs, output);
    }

    pub(crate) fn mark_input_dirty(&self, input: &Arc<AudioNodeInput>) {
        push_unique(&mut self.dirty.lock().inputs, input);
    }

    pub(crate) fn mark_param_dirty(&self, param: &Arc<AudioParam>) {
        push_unique(&mut self.dirty.lock().params, param);
    }

    pub(crate) fn defer_capture(&self, node: &Arc<AudioNode>) {
        self.captures.lock().push(node.clone());
    }

    pub(crate) fn notify_finished(&self, node: &Arc<AudioNode>) {
        push_unique(&mut *self.finished.lock(), node);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("quantum", &self.current_quantum())
            .finish_non_exhaustive()
    }
}

/// A node in a [`Topology`] snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyNode {
    pub id: NodeId,
    pub name: &'static str,
    pub is_delay: bool,
}

/// A connection in a [`Topology`] snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyEdge {
    Audio { output: usize, input: usize },
    Param { output: usize, param: &'static str },
}

/// Snapshot of a context's graph, taken under the graph lock.
#[derive(Default)]
pub struct Topology {
    graph: Graph<TopologyNode, TopologyEdge>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl Topology {
    pub fn graph(&self) -> &Graph<TopologyNode, TopologyEdge> {
        &self.graph
    }

    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.indices.get(&id).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// `true` if an edge `from -> to` would close a loop in which no node
    /// delays its input.
    pub fn closes_undelayed_cycle(&self, from: NodeId, to: NodeId) -> bool {
        let (Some(from), Some(to)) = (self.index_of(from), self.index_of(to)) else {
            return false;
        };
        if self.graph[from].is_delay || self.graph[to].is_delay {
            return false;
        }
        if from == to {
            return true;
        }
        let undelayed = EdgeFiltered::from_fn(&self.graph, |edge: EdgeReference<'_, TopologyEdge>| {
            !self.graph[edge.source()].is_delay
        });
        petgraph::algo::has_path_connecting(&undelayed, to, from, None)
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}
