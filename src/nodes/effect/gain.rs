//! Gain/volume control effect

use crate::node::{AudioProcessor, NodeIo, ProcessContext, ProcessStatus};
use crate::param::ParamInfo;

/// A gain (volume) control that passes audio through with amplitude scaling.
///
/// The level is the audio-rate parameter `gain` (index 0): set its base value
/// with [`AudioParam::set_value`](crate::AudioParam::set_value) or connect an
/// output to it for tremolo and envelopes. The output has as many channels as
/// the input.
pub struct Gain {
    params: [ParamInfo; 1],
}

impl Gain {
    /// Index of the `gain` parameter.
    pub const GAIN: usize = 0;

    /// Create a new gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        Self {
            params: [ParamInfo::new("gain", gain)],
        }
    }

    /// The gain the node was created with. The live value is the base value of
    /// the node's `gain` parameter.
    #[inline]
    pub fn initial_gain(&self) -> f32 {
        self.params[Self::GAIN].default
    }
}

impl AudioProcessor for Gain {
    type Message = ();

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        let input = io.input(0);
        let gain = io.param(Self::GAIN);
        let mut out = io.output(0);

        for (out_channel, in_channel) in out.iter_mut().zip(input.iter()) {
            let samples = out_channel[..ctx.frames].iter_mut().zip(in_channel).zip(gain.iter());
            for ((out_sample, &in_sample), &g) in samples {
                *out_sample = in_sample * g;
            }
        }

        ProcessStatus::Continue
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    fn params(&self) -> &[ParamInfo] {
        &self.params
    }
}
