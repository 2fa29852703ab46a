use thiserror::Error;

use crate::fan::{MAX_FAN_IN, MAX_FAN_OUT};

/// Why a connection did not take effect.
///
/// A failed connect never changes the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("output {index} does not exist (node has {count} outputs)")]
    OutputIndex { index: usize, count: usize },

    #[error("input {index} does not exist (node has {count} inputs)")]
    InputIndex { index: usize, count: usize },

    #[error("output already feeds {} inputs", MAX_FAN_OUT)]
    FanOutExceeded,

    #[error("input already has {} sources", MAX_FAN_IN)]
    FanInExceeded,

    #[error("connection would close a feedback loop without a delay")]
    Cycle,
}
