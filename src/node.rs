//! Audio nodes and the processor trait.
//!
//! An [`AudioNode`] wraps a user-supplied [`AudioProcessor`] together with its
//! terminals: inputs, outputs and parameters. The node is what the graph sees;
//! the processor only ever sees its own buses through [`NodeIo`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rtrb::Consumer;

use crate::bus::{AudioBus, ChannelInterpretation, QUANTUM_FRAMES};
use crate::input::{AudioNodeInput, ChannelConfig};
use crate::lock::{GraphLock, RenderLock, View, ViewMut};
use crate::output::AudioNodeOutput;
use crate::param::{AudioParam, ParamInfo};

/// Information available during audio processing.
///
/// Passed to every [`AudioProcessor::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of frames to render this quantum (at most [`QUANTUM_FRAMES`])
    pub frames: usize,
    /// Index of the quantum being rendered, starting at 1
    pub quantum: u64,
}

/// Unique identifier for a node within a context.
///
/// You typically don't interact with this directly - use [`Handle`](crate::Handle) instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

/// How an input picks its channel count from the outputs connected to it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelCountMode {
    /// The widest connected output.
    #[default]
    Max,
    /// The widest connected output, but no more than the node's channel count.
    ClampedMax,
    /// Always the node's channel count.
    Explicit,
}

/// Channel count of an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputChannels {
    /// A fixed count. The processor may still change it later with
    /// [`NodeIo::set_output_channels`].
    Fixed(usize),
    /// Whatever the given input resolves to, updated at quantum boundaries.
    FollowsInput(usize),
}

/// What a processor reports after rendering a quantum.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Keep rendering.
    #[default]
    Continue,
    /// The node has nothing more to play. Its outputs are disabled at the end
    /// of the quantum; connections stay in place so it can be started again
    /// with [`AudioNode::enable_outputs`].
    Finished,
}

/// The core trait for audio processing nodes.
///
/// Implement this trait to create custom nodes. Nodes can be:
/// - **Sources**: Generate audio (0 inputs, 1+ outputs) - oscillators, sample players
/// - **Effects**: Process audio (1+ inputs, 1+ outputs) - gain, filters, delays
/// - **Sinks**: Consume audio (1+ inputs, 0 outputs) - recorders, analysers
///
/// # Message-Based Parameters
///
/// Besides audio-rate [`params`](Self::params), nodes receive control updates
/// via messages. Define your message type and handle it at the start of
/// `process()`:
///
/// ```
/// use klangnetz::{AudioProcessor, NodeIo, ProcessContext, ProcessStatus};
///
/// enum MyMessage {
///     SetFrequency(f32),
///     SetVolume(f32),
/// }
///
/// struct MyOscillator {
///     frequency: f32,
///     volume: f32,
///     phase: f32,
/// }
///
/// impl AudioProcessor for MyOscillator {
///     type Message = MyMessage;
///
///     fn process(
///         &mut self,
///         ctx: &ProcessContext,
///         messages: impl Iterator<Item = MyMessage>,
///         io: &NodeIo<'_, '_>,
///     ) -> ProcessStatus {
///         // Handle parameter updates first
///         for msg in messages {
///             match msg {
///                 MyMessage::SetFrequency(f) => self.frequency = f,
///                 MyMessage::SetVolume(v) => self.volume = v,
///             }
///         }
///
///         // Generate audio
///         let mut out = io.output(0);
///         for sample in out.channel_mut(0)[..ctx.frames].iter_mut() {
///             *sample = (self.phase * std::f32::consts::TAU).sin() * self.volume;
///             self.phase = (self.phase + self.frequency / ctx.sample_rate as f32) % 1.0;
///         }
///         ProcessStatus::Continue
///     }
/// }
/// ```
///
/// # No Messages Needed?
///
/// If your node doesn't need runtime updates, use `()` as the message type.
pub trait AudioProcessor: Send + 'static {
    /// Message type for control updates.
    ///
    /// Use a custom enum for nodes with parameters, or `()` for nodes without.
    type Message: Send + 'static;

    /// Process one quantum.
    ///
    /// Called at most once per quantum, after every input has been summed and
    /// every parameter calculated. Outputs start out silent. Your
    /// implementation should:
    /// 1. Drain and handle all pending messages
    /// 2. Read from `io.input(..)` and `io.param(..)` (if any)
    /// 3. Write to `io.output(..)`
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus;

    /// Number of inputs (0 for sources).
    fn num_inputs(&self) -> usize {
        0
    }

    /// Number of outputs (0 for sinks).
    fn num_outputs(&self) -> usize {
        1
    }

    /// Initial channel count of output `index`.
    ///
    /// Defaults to following input 0 when the node has inputs, mono otherwise.
    fn output_channels(&self, _index: usize) -> OutputChannels {
        if self.num_inputs() > 0 {
            OutputChannels::FollowsInput(0)
        } else {
            OutputChannels::Fixed(1)
        }
    }

    /// The node's channel count, used by [`ChannelCountMode`] and by inputs
    /// with nothing connected.
    fn channel_count(&self) -> usize {
        2
    }

    fn channel_count_mode(&self) -> ChannelCountMode {
        ChannelCountMode::Max
    }

    fn channel_interpretation(&self) -> ChannelInterpretation {
        ChannelInterpretation::Speakers
    }

    /// Audio-rate parameters, in the order [`NodeIo::param`] indexes them.
    fn params(&self) -> &[ParamInfo] {
        &[]
    }

    /// `true` if this node delays its input by at least one quantum and so may
    /// close a feedback loop.
    ///
    /// A delay node is processed in two steps. [`process`](Self::process) runs
    /// first, before its inputs are pulled, and must write its outputs from
    /// state stored in earlier quanta only. [`capture`](Self::capture) runs at
    /// the end of the quantum with the inputs summed.
    fn is_delay(&self) -> bool {
        false
    }

    /// Store this quantum's inputs. Only called on nodes whose
    /// [`is_delay`](Self::is_delay) is `true`.
    fn capture(&mut self, _ctx: &ProcessContext, _io: &NodeIo<'_, '_>) {}

    /// Name used in logs and topology snapshots.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A node's view of its own terminals while processing.
///
/// # Panics
///
/// Every accessor panics if the index is out of range for the node.
pub struct NodeIo<'a, 'r> {
    node: &'a Arc<AudioNode>,
    render: &'a RenderLock<'r>,
    frames: usize,
}

impl<'a, 'r> NodeIo<'a, 'r> {
    /// Frames to render this quantum.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.node.inputs.len()
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.node.outputs.len()
    }

    /// The summed bus of input `index`.
    pub fn input(&self, index: usize) -> View<'a, AudioBus> {
        self.node.inputs[index].bus(self.render)
    }

    /// The bus of output `index`. Silent when processing starts.
    pub fn output(&self, index: usize) -> ViewMut<'a, AudioBus> {
        self.node.outputs[index].bus_mut(self.render)
    }

    /// Per-sample values of parameter `index` for this quantum.
    pub fn param(&self, index: usize) -> View<'a, [f32]> {
        self.node.params[index].values(self.render)
    }

    /// Current channel count of output `index`.
    pub fn output_channels(&self, index: usize) -> usize {
        self.node.outputs[index].number_of_channels()
    }

    /// Request a new channel count for output `index`.
    ///
    /// Takes effect at the next quantum; the bus returned by
    /// [`output`](Self::output) keeps its size for the rest of this one.
    pub fn set_output_channels(&self, index: usize, channels: usize) {
        self.node.outputs[index].set_number_of_channels(self.render, channels);
    }
}

// Type-erased wrapper so we can store heterogeneous processors
trait ErasedProcessor: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, io: &NodeIo<'_, '_>) -> ProcessStatus;
    fn capture_erased(&mut self, ctx: &ProcessContext, io: &NodeIo<'_, '_>);
}

struct ProcessorWrapper<P: AudioProcessor> {
    processor: P,
    receiver: Consumer<P::Message>,
}

impl<P: AudioProcessor> ErasedProcessor for ProcessorWrapper<P> {
    fn process_erased(&mut self, ctx: &ProcessContext, io: &NodeIo<'_, '_>) -> ProcessStatus {
        // Split borrow to avoid conflict between receiver and processor
        let receiver = &mut self.receiver;
        let processor = &mut self.processor;

        let messages = core::iter::from_fn(|| receiver.pop().ok());
        processor.process(ctx, messages, io)
    }

    fn capture_erased(&mut self, ctx: &ProcessContext, io: &NodeIo<'_, '_>) {
        self.processor.capture(ctx, io);
    }
}

/// A node in the audio graph: a processor plus its terminals.
///
/// Nodes are created by [`Context::add`](crate::Context::add) and shared through
/// `Arc`. A node stays alive while a [`Handle`](crate::Handle) to it exists or
/// while one of its outputs feeds a live input or parameter.
pub struct AudioNode {
    id: NodeId,
    name: &'static str,
    sample_rate: u32,
    is_delay: bool,
    inputs: Vec<Arc<AudioNodeInput>>,
    outputs: Vec<Arc<AudioNodeOutput>>,
    params: Vec<Arc<AudioParam>>,
    output_channels: Vec<OutputChannels>,
    processor: Mutex<Box<dyn ErasedProcessor>>,
    /// Quantum of the last process call; 0 before the first.
    last_quantum: AtomicU64,
    finished: AtomicBool,
}

impl AudioNode {
    pub(crate) fn new<P: AudioProcessor>(
        id: NodeId,
        processor: P,
        receiver: Consumer<P::Message>,
        sample_rate: u32,
    ) -> Arc<Self> {
        let config = ChannelConfig {
            count: processor.channel_count(),
            mode: processor.channel_count_mode(),
            interpretation: processor.channel_interpretation(),
        };
        let num_inputs = processor.num_inputs();
        let output_channels: Vec<OutputChannels> = (0..processor.num_outputs())
            .map(|i| processor.output_channels(i))
            .collect();
        let param_infos: Vec<ParamInfo> = processor.params().to_vec();
        let name = processor.name();
        let is_delay = processor.is_delay();

        Arc::new_cyclic(|node| {
            let inputs = (0..num_inputs)
                .map(|i| Arc::new(AudioNodeInput::new(node.clone(), i, config)))
                .collect();
            let outputs = output_channels
                .iter()
                .enumerate()
                .map(|(i, channels)| {
                    let initial = match *channels {
                        OutputChannels::Fixed(n) => n,
                        // Unconnected inputs resolve to the node's channel count.
                        OutputChannels::FollowsInput(_) => config.count,
                    };
                    Arc::new(AudioNodeOutput::new(node.clone(), i, initial))
                })
                .collect();
            let params = param_infos
                .into_iter()
                .map(|info| Arc::new(AudioParam::new(id, info)))
                .collect();

            Self {
                id,
                name,
                sample_rate,
                is_delay,
                inputs,
                outputs,
                params,
                output_channels,
                processor: Mutex::new(Box::new(ProcessorWrapper { processor, receiver })),
                last_quantum: AtomicU64::new(0),
                finished: AtomicBool::new(false),
            }
        })
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn is_delay(&self) -> bool {
        self.is_delay
    }

    pub fn inputs(&self) -> &[Arc<AudioNodeInput>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Arc<AudioNodeOutput>] {
        &self.outputs
    }

    pub fn params(&self) -> &[Arc<AudioParam>] {
        &self.params
    }

    pub fn input(&self, index: usize) -> Option<&Arc<AudioNodeInput>> {
        self.inputs.get(index)
    }

    pub fn output(&self, index: usize) -> Option<&Arc<AudioNodeOutput>> {
        self.outputs.get(index)
    }

    pub fn param(&self, index: usize) -> Option<&Arc<AudioParam>> {
        self.params.get(index)
    }

    /// Look up a parameter by its [`ParamInfo::name`].
    pub fn param_named(&self, name: &str) -> Option<&Arc<AudioParam>> {
        self.params.iter().find(|p| p.info().name == name)
    }

    /// `true` once the processor reported [`ProcessStatus::Finished`], until
    /// [`enable_outputs`](Self::enable_outputs) is called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Quantum this node was last processed in; 0 if never.
    pub fn last_processed_quantum(&self) -> u64 {
        self.last_quantum.load(Ordering::Acquire)
    }

    /// Enable every output and clear the finished flag.
    pub fn enable_outputs(&self, g: &GraphLock<'_>) {
        self.finished.store(false, Ordering::Release);
        for output in &self.outputs {
            output.enable(g);
        }
    }

    /// Disable every output. Connections are kept.
    pub fn disable_outputs(&self, g: &GraphLock<'_>) {
        for output in &self.outputs {
            output.disable(g);
        }
    }

    /// Render this node for the current quantum unless it already was.
    ///
    /// Inputs are summed and parameters calculated first, which pulls every
    /// upstream node. Delay nodes are the exception: their inputs are pulled
    /// after the rest of the quantum has rendered (see
    /// [`AudioProcessor::is_delay`]), so a loop through a delay of N quanta
    /// takes exactly N quanta per round trip.
    pub fn process_if_necessary(self: &Arc<Self>, r: &RenderLock<'_>, frames: usize) {
        let quantum = r.quantum();
        if self.last_quantum.swap(quantum, Ordering::AcqRel) == quantum {
            return;
        }
        let frames = frames.min(QUANTUM_FRAMES);

        if self.is_delay {
            r.context().defer_capture(self);
        } else {
            for input in &self.inputs {
                input.render(r, frames);
            }
        }
        for param in &self.params {
            param.calculate(r, frames);
        }
        for output in &self.outputs {
            output.bus_mut(r).silence();
        }

        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            frames,
            quantum,
        };
        let io = NodeIo {
            node: self,
            render: r,
            frames,
        };
        let status = self.processor.lock().process_erased(&ctx, &io);

        if status == ProcessStatus::Finished && !self.finished.swap(true, Ordering::AcqRel) {
            r.context().notify_finished(self);
        }
    }

    /// Second step of a delay node: pull its inputs and hand them to
    /// [`AudioProcessor::capture`].
    pub(crate) fn capture_inputs(self: &Arc<Self>, r: &RenderLock<'_>, frames: usize) {
        let frames = frames.min(QUANTUM_FRAMES);
        for input in &self.inputs {
            input.render(r, frames);
        }

        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            frames,
            quantum: r.quantum(),
        };
        let io = NodeIo {
            node: self,
            render: r,
            frames,
        };
        self.processor.lock().capture_erased(&ctx, &io);
    }

    /// Called when input `index` resolved a new channel count. Outputs that
    /// follow that input request the same count.
    pub(crate) fn check_number_of_channels_for_input(
        &self,
        r: &RenderLock<'_>,
        index: usize,
        channels: usize,
    ) {
        for (output, follows) in self.outputs.iter().zip(&self.output_channels) {
            if *follows == OutputChannels::FollowsInput(index) {
                output.set_number_of_channels(r, channels);
            }
        }
    }
}

impl fmt::Debug for AudioNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

/// A strong reference from a consumer to one output of an upstream node.
#[derive(Clone)]
pub(crate) struct Connection {
    node: Arc<AudioNode>,
    output: usize,
}

impl Connection {
    /// `output` must be a valid output index of `node`.
    pub(crate) fn new(node: Arc<AudioNode>, output: usize) -> Self {
        debug_assert!(output < node.outputs.len());
        Self { node, output }
    }

    #[inline]
    pub(crate) fn terminal(&self) -> &Arc<AudioNodeOutput> {
        &self.node.outputs[self.output]
    }

    #[inline]
    pub(crate) fn is(&self, node: &AudioNode, output: usize) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.node), node) && self.output == output
    }

    pub(crate) fn key(&self) -> (NodeId, usize) {
        (self.node.id, self.output)
    }
}
