use crate::node::{AudioProcessor, ChannelCountMode, NodeIo, ProcessContext, ProcessStatus};

/// The final input of a [`Context`](crate::Context).
///
/// Mixes everything connected to it down or up to the context's channel count.
/// The context reads its summed input after each quantum.
pub struct Destination {
    channels: usize,
}

impl Destination {
    pub(crate) fn new(channels: usize) -> Self {
        Self { channels }
    }
}

impl AudioProcessor for Destination {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        ProcessStatus::Continue
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn channel_count_mode(&self) -> ChannelCountMode {
        ChannelCountMode::Explicit
    }

    fn name(&self) -> &'static str {
        "destination"
    }
}
