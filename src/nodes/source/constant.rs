//! Constant signal source

use crate::node::{AudioProcessor, NodeIo, OutputChannels, ProcessContext, ProcessStatus};

/// Messages to control a [`Constant`]
#[derive(Clone, Copy, Debug)]
pub enum ConstantMessage {
    SetValue(f32),
    /// Play a one-shot constant again from the start.
    ///
    /// A finished node also needs [`AudioNode::enable_outputs`](crate::AudioNode::enable_outputs)
    /// before consumers pull it again.
    Restart,
}

/// Outputs the same value on every channel and frame.
///
/// With [`one_shot`](Self::one_shot) the signal lasts a fixed number of frames,
/// after which the node reports [`ProcessStatus::Finished`] and is disabled by
/// its context.
pub struct Constant {
    value: f32,
    channels: usize,
    length: Option<usize>,
    played: usize,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            channels: 1,
            length: None,
            played: 0,
        }
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Stop after `frames` frames.
    pub fn one_shot(mut self, frames: usize) -> Self {
        self.length = Some(frames);
        self
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }
}

impl AudioProcessor for Constant {
    type Message = ConstantMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = ConstantMessage>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        for msg in messages {
            match msg {
                ConstantMessage::SetValue(v) => self.value = v,
                ConstantMessage::Restart => self.played = 0,
            }
        }

        let frames = match self.length {
            Some(length) => length.saturating_sub(self.played).min(ctx.frames),
            None => ctx.frames,
        };

        let mut out = io.output(0);
        for channel in out.iter_mut() {
            channel[..frames].fill(self.value);
        }

        match self.length {
            Some(length) => {
                self.played += frames;
                if self.played >= length {
                    ProcessStatus::Finished
                } else {
                    ProcessStatus::Continue
                }
            }
            None => ProcessStatus::Continue,
        }
    }

    #[inline]
    fn output_channels(&self, _index: usize) -> OutputChannels {
        OutputChannels::Fixed(self.channels)
    }

    #[inline]
    fn channel_count(&self) -> usize {
        self.channels
    }
}
