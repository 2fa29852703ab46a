//! Fixed-size multichannel audio buffers for a single render quantum.
//!
//! Each channel is a [`dasp_graph::Buffer`], so a quantum is always
//! [`QUANTUM_FRAMES`] frames long. Nodes that render fewer frames only touch
//! the leading part of each channel.

use dasp_graph::Buffer;

/// Number of frames in one render quantum.
pub const QUANTUM_FRAMES: usize = Buffer::LEN;

/// How channels are matched up when a bus is mixed into another bus with a
/// different channel count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelInterpretation {
    /// Mono is spread to both speakers and stereo is folded to mono by
    /// averaging. Any other combination falls back to [`Discrete`](Self::Discrete).
    #[default]
    Speakers,
    /// Channels are matched by index. Extra source channels are dropped and
    /// extra destination channels are left untouched.
    Discrete,
}

/// A bus of audio channels for one render quantum.
///
/// The channel count only changes at quantum boundaries, on the render thread.
/// A bus with zero channels is valid and mixes as silence.
#[derive(Clone, Debug, Default)]
pub struct AudioBus {
    channels: Vec<Buffer>,
}

impl AudioBus {
    /// Create a silent bus with `channels` channels.
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![Buffer::default(); channels],
        }
    }

    /// Number of channels in this bus.
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames per channel (always [`QUANTUM_FRAMES`]).
    #[inline]
    pub fn frames(&self) -> usize {
        QUANTUM_FRAMES
    }

    /// Samples of channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= channels()`.
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Mutable samples of channel `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= channels()`.
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.channels[index]
    }

    /// Iterate over the channels of this bus.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.channels.iter().map(|b| &b[..])
    }

    /// Iterate mutably over the channels of this bus.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.channels.iter_mut().map(|b| &mut b[..])
    }

    /// Change the channel count. Existing channels keep their content, new
    /// channels start silent.
    ///
    /// This allocates, so the graph only calls it at quantum boundaries.
    pub fn set_channels(&mut self, channels: usize) {
        self.channels.resize(channels, Buffer::default());
    }

    /// Copy the first `frames` frames of channel 0 into every other channel.
    pub fn spread_first_channel(&mut self, frames: usize) {
        let frames = frames.min(QUANTUM_FRAMES);
        if let Some((first, rest)) = self.channels.split_first_mut() {
            for buffer in rest.iter_mut() {
                buffer[..frames].copy_from_slice(&first[..frames]);
            }
        }
    }

    /// Zero every channel.
    pub fn silence(&mut self) {
        for buffer in self.channels.iter_mut() {
            buffer.silence();
        }
    }

    /// `true` if every sample of every channel is zero.
    pub fn is_silent(&self) -> bool {
        self.iter().all(|ch| ch.iter().all(|s| *s == 0.0))
    }

    /// Replace the contents of this bus with `src`, mixed to this bus's
    /// channel count.
    pub fn copy_from(&mut self, src: &AudioBus, interpretation: ChannelInterpretation) {
        self.silence();
        self.sum_from(src, interpretation);
    }

    /// Add `src` into this bus sample by sample, mixed to this bus's channel
    /// count.
    pub fn sum_from(&mut self, src: &AudioBus, interpretation: ChannelInterpretation) {
        let (dst_ch, src_ch) = (self.channels(), src.channels());
        if dst_ch == 0 || src_ch == 0 {
            return;
        }

        if interpretation == ChannelInterpretation::Speakers && dst_ch != src_ch {
            match (src_ch, dst_ch) {
                (1, 2) => {
                    let mono = &src.channels[0];
                    for out in self.channels.iter_mut() {
                        add_into(out, mono);
                    }
                    return;
                }
                (2, 1) => {
                    let (l, r) = (&src.channels[0], &src.channels[1]);
                    for ((out, l), r) in self.channels[0].iter_mut().zip(l.iter()).zip(r.iter()) {
                        *out += 0.5 * (l + r);
                    }
                    return;
                }
                _ => {}
            }
        }

        for (out, input) in self.channels.iter_mut().zip(src.channels.iter()) {
            add_into(out, input);
        }
    }

    /// Add the mono down-mix (mean of all channels) of this bus into `dst`.
    ///
    /// Used to feed audio-rate signals into parameters.
    pub fn sum_mono_into(&self, dst: &mut [f32]) {
        match self.channels() {
            0 => {}
            1 => add_into(dst, &self.channels[0]),
            n => {
                let scale = 1.0 / n as f32;
                for (i, out) in dst.iter_mut().take(QUANTUM_FRAMES).enumerate() {
                    let sum: f32 = self.channels.iter().map(|ch| ch[i]).sum();
                    *out += sum * scale;
                }
            }
        }
    }

    /// Write the first `frames` frames of this bus into `out`, interleaved.
    ///
    /// Returns the number of samples written.
    pub fn write_interleaved(&self, frames: usize, out: &mut [f32]) -> usize {
        let channels = self.channels();
        if channels == 0 {
            return 0;
        }
        let frames = frames.min(QUANTUM_FRAMES).min(out.len() / channels);
        for frame in 0..frames {
            for (ch, buffer) in self.channels.iter().enumerate() {
                out[frame * channels + ch] = buffer[frame];
            }
        }
        frames * channels
    }
}

#[inline]
fn add_into(dst: &mut [f32], src: &[f32]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d += *s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(channels: &[f32]) -> AudioBus {
        let mut bus = AudioBus::new(channels.len());
        for (ch, value) in channels.iter().enumerate() {
            bus.channel_mut(ch).fill(*value);
        }
        bus
    }

    #[test]
    fn new_bus_is_silent() {
        let bus = AudioBus::new(2);
        assert_eq!(bus.channels(), 2);
        assert_eq!(bus.frames(), QUANTUM_FRAMES);
        assert!(bus.is_silent());
    }

    #[test]
    fn speakers_upmix_copies_mono_to_both_sides() {
        let mut dst = AudioBus::new(2);
        dst.sum_from(&filled(&[0.5]), ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|s| *s == 0.5));
        assert!(dst.channel(1).iter().all(|s| *s == 0.5));
    }

    #[test]
    fn discrete_upmix_fills_only_matching_channels() {
        let mut dst = AudioBus::new(2);
        dst.sum_from(&filled(&[0.5]), ChannelInterpretation::Discrete);
        assert!(dst.channel(0).iter().all(|s| *s == 0.5));
        assert!(dst.channel(1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn speakers_downmix_averages() {
        let mut dst = AudioBus::new(1);
        dst.sum_from(&filled(&[1.0, 0.0]), ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|s| *s == 0.5));
    }

    #[test]
    fn sum_accumulates() {
        let mut dst = filled(&[0.25, 0.25]);
        dst.sum_from(&filled(&[0.5, 1.0]), ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|s| *s == 0.75));
        assert!(dst.channel(1).iter().all(|s| *s == 1.25));
    }

    #[test]
    fn zero_channel_source_is_silence() {
        let mut dst = filled(&[0.25]);
        dst.sum_from(&AudioBus::new(0), ChannelInterpretation::Speakers);
        assert!(dst.channel(0).iter().all(|s| *s == 0.25));
    }

    #[test]
    fn set_channels_keeps_existing_content() {
        let mut bus = filled(&[0.5]);
        bus.set_channels(2);
        assert!(bus.channel(0).iter().all(|s| *s == 0.5));
        assert!(bus.channel(1).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn spread_copies_leading_frames_only() {
        let mut bus = filled(&[1.0, 0.0, 0.0]);
        bus.spread_first_channel(4);
        for ch in 1..3 {
            assert!(bus.channel(ch)[..4].iter().all(|s| *s == 1.0));
            assert!(bus.channel(ch)[4..].iter().all(|s| *s == 0.0));
        }
    }

    #[test]
    fn interleaves_frames() {
        let bus = filled(&[1.0, 2.0]);
        let mut out = [0.0; 8];
        assert_eq!(bus.write_interleaved(4, &mut out), 8);
        assert_eq!(out, [1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }
}
