//! Whole-quantum delay line

use std::collections::VecDeque;

use crate::bus::{AudioBus, ChannelInterpretation};
use crate::node::{AudioProcessor, NodeIo, ProcessContext, ProcessStatus};

/// Delays its input by a whole number of quanta.
///
/// Its output is written from the line before the current input is pulled, so a
/// delay may sit inside a feedback loop: connections that close a loop are
/// accepted as long as the loop passes through one, and the round trip takes
/// exactly the delay's length.
///
/// Graphs with such loops hold strong references in a circle. Break the loop
/// with [`Context::disconnect`](crate::Context::disconnect) or
/// [`Context::remove_node`](crate::Context::remove_node) before dropping it.
pub struct Delay {
    line: VecDeque<AudioBus>,
}

impl Delay {
    /// Delay by `quanta` quanta (at least one).
    pub fn new(quanta: usize) -> Self {
        let quanta = quanta.max(1);
        Self {
            line: (0..quanta).map(|_| AudioBus::new(1)).collect(),
        }
    }

    /// Delay in quanta.
    #[inline]
    pub fn quanta(&self) -> usize {
        self.line.len()
    }
}

impl AudioProcessor for Delay {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        if let Some(oldest) = self.line.front() {
            io.output(0).copy_from(oldest, ChannelInterpretation::Discrete);
        }
        ProcessStatus::Continue
    }

    fn capture(&mut self, _ctx: &ProcessContext, io: &NodeIo<'_, '_>) {
        let Some(mut oldest) = self.line.pop_front() else {
            return;
        };
        let input = io.input(0);
        if oldest.channels() != input.channels() {
            oldest.set_channels(input.channels());
        }
        oldest.copy_from(&input, ChannelInterpretation::Discrete);
        self.line.push_back(oldest);
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn is_delay(&self) -> bool {
        true
    }
}
