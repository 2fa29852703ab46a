//! Sine wave oscillator

use crate::node::{AudioProcessor, NodeIo, OutputChannels, ProcessContext, ProcessStatus};

/// Messages to control a Sine oscillator
#[derive(Clone, Copy, Debug)]
pub enum SineMessage {
    SetFrequency(f32),
    SetAmplitude(f32),
}

/// A sine wave oscillator (mono source)
pub struct Sine {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            phase: 0.0,
            amplitude: 0.25, // -12dB, safe default
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl AudioProcessor for Sine {
    type Message = SineMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = SineMessage>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        // Handle messages first
        for msg in messages {
            match msg {
                SineMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                SineMessage::SetAmplitude(a) => self.amplitude = a.clamp(0.0, 1.0),
            }
        }

        let mut out = io.output(0);
        if out.channels() == 0 {
            return ProcessStatus::Continue;
        }

        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let amplitude = self.amplitude;

        for sample in out.channel_mut(0)[..ctx.frames].iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * amplitude;

            self.phase += phase_inc;
            // Branchless phase wrap (phase is always positive)
            self.phase -= (self.phase >= 1.0) as u32 as f32;
        }

        // Copy to remaining output channels (if any)
        out.spread_first_channel(ctx.frames);

        ProcessStatus::Continue
    }

    #[inline]
    fn output_channels(&self, _index: usize) -> OutputChannels {
        OutputChannels::Fixed(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amplitude_is_clamped() {
        assert_eq!(Sine::new(440.0).with_amplitude(3.0).amplitude(), 1.0);
        assert_eq!(Sine::new(440.0).with_amplitude(-1.0).amplitude(), 0.0);
    }
}
