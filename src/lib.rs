//! Klangnetz - pull-based audio graph with explicit graph/render locking
//!
//! Design principles:
//! - Nodes are rendered on demand: the destination pulls its inputs, which pull
//!   theirs, and every node is processed at most once per quantum
//! - Outputs can feed several inputs (fan-out) and inputs can sum several
//!   outputs (fan-in), with channel counts negotiated at quantum boundaries
//! - Topology edits happen under a graph lock that the render thread only ever
//!   *tries* to take, so editing never stalls the audio
//! - Nodes receive control updates via message ring buffers, and audio-rate
//!   parameters via connections
//!
//! # Example
//!
//! ```
//! use klangnetz::{AudioBus, Context};
//! use klangnetz::nodes::{Constant, Gain};
//!
//! let ctx = Context::new(48_000);
//! let source = ctx.add(Constant::new(1.0));
//! let gain = ctx.add(Gain::new(0.5));
//!
//! {
//!     let g = ctx.lock_graph();
//!     ctx.connect(&g, &source, 0, &gain, 0).unwrap();
//!     ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();
//! }
//!
//! let mut out = AudioBus::new(2);
//! ctx.render_quantum(&mut out);
//! assert!(out.channel(0).iter().all(|s| *s == 0.5));
//! ```

mod bus;
mod context;
mod error;
mod fan;
mod input;
mod lock;
mod node;
mod output;
mod param;
pub mod nodes;

pub use bus::{AudioBus, ChannelInterpretation, QUANTUM_FRAMES};
pub use context::{Context, Handle, Topology, TopologyEdge, TopologyNode};
pub use error::ConnectError;
pub use fan::{FanSet, MAX_FAN_IN, MAX_FAN_OUT};
pub use input::AudioNodeInput;
pub use lock::{GraphLock, RenderLock, View, ViewMut};
pub use node::{
    AudioNode, AudioProcessor, ChannelCountMode, NodeId, NodeIo, OutputChannels, ProcessContext,
    ProcessStatus,
};
pub use output::{AudioNodeOutput, Pulled};
pub use param::{AudioParam, ParamId, ParamInfo};
