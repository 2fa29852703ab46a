//! Built-in audio nodes.
//!
//! Nodes are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! Generate audio with no audio inputs:
//! - [`Constant`] - A constant signal, optionally for a fixed number of frames
//! - [`Sine`] - Sine wave oscillator with frequency/amplitude control
//!
//! ## Effects ([`effect`])
//!
//! Process audio (inputs → outputs):
//! - [`Gain`] - Volume control with an audio-rate `gain` parameter
//! - [`Delay`] - Whole-quantum delay line, allowed inside feedback loops
//!
//! ## Sinks ([`sink`])
//!
//! Consume audio with no audio outputs:
//! - [`Recorder`] - Write interleaved samples to a ring buffer
//! - [`Destination`] - The context's final input (internal use)
//!
//! # Message Types
//!
//! Nodes with control updates have associated message types:
//! - [`ConstantMessage`] - Change the value of a [`Constant`] or restart it
//! - [`SineMessage`] - Control [`Sine`] frequency and amplitude
//!
//! Nodes without them (like [`Gain`], whose level is a parameter) use `()`.

pub mod source;
pub mod effect;
pub mod sink;

// Re-export common types at the top level for convenience
pub use source::{Constant, ConstantMessage, Sine, SineMessage};
pub use effect::{Delay, Gain};
pub use sink::{Destination, Recorder, RecordingReader};
