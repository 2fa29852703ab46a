//! Ring buffer sink for recording and analysis

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::bus::QUANTUM_FRAMES;
use crate::node::{AudioProcessor, ChannelCountMode, NodeIo, ProcessContext, ProcessStatus};

/// A sink that pushes its input into an rtrb ring buffer as interleaved samples.
///
/// Useful for:
/// - Recording to a file on another thread
/// - Offline rendering and tests
/// - Analysis
///
/// A recorder has no outputs, so nothing pulls it. Register it with
/// [`Context::add_automatic_pull_node`](crate::Context::add_automatic_pull_node)
/// to have it rendered every quantum.
pub struct Recorder {
    producer: Producer<f32>,
    channels: usize,
    dropped: Arc<AtomicU64>,
    /// One quantum of interleaved samples.
    scratch: Vec<f32>,
}

impl Recorder {
    /// Create a recorder with room for `capacity_frames` frames of
    /// `channels`-channel audio, and the reader for the other side.
    pub fn new(channels: usize, capacity_frames: usize) -> (Self, RecordingReader) {
        let channels = channels.max(1);
        let (producer, consumer) = RingBuffer::new(capacity_frames * channels);
        let dropped = Arc::new(AtomicU64::new(0));
        let recorder = Self {
            producer,
            channels,
            dropped: dropped.clone(),
            scratch: vec![0.0; QUANTUM_FRAMES * channels],
        };
        let reader = RecordingReader {
            consumer,
            channels,
            dropped,
        };
        (recorder, reader)
    }

    /// Returns how many sample slots are available
    #[inline]
    pub fn available(&self) -> usize {
        self.producer.slots()
    }
}

impl AudioProcessor for Recorder {
    type Message = (); // No control messages

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        let samples = ctx.frames * self.channels;
        let Ok(chunk) = self.producer.write_chunk_uninit(samples) else {
            // Skip if buffer is full
            self.dropped.fetch_add(ctx.frames as u64, Ordering::Relaxed);
            return ProcessStatus::Continue;
        };

        // The input is kept at `channels` channels by the explicit count mode.
        let written = io.input(0).write_interleaved(ctx.frames, &mut self.scratch).min(samples);
        self.scratch[written..samples].fill(0.0);
        chunk.fill_from_iter(self.scratch[..samples].iter().copied());

        ProcessStatus::Continue
    }

    #[inline]
    fn num_inputs(&self) -> usize {
        1
    }

    #[inline]
    fn num_outputs(&self) -> usize {
        0
    }

    fn channel_count(&self) -> usize {
        self.channels
    }

    fn channel_count_mode(&self) -> ChannelCountMode {
        ChannelCountMode::Explicit
    }
}

/// The reading side of a [`Recorder`].
pub struct RecordingReader {
    consumer: Consumer<f32>,
    channels: usize,
    dropped: Arc<AtomicU64>,
}

impl RecordingReader {
    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples ready to be read.
    #[inline]
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Frames the recorder had to skip because the ring buffer was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Read interleaved samples into `out`, returning how many were read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let mut read = 0;
        for slot in out.iter_mut() {
            match self.consumer.pop() {
                Ok(sample) => *slot = sample,
                Err(_) => break,
            }
            read += 1;
        }
        read
    }

    /// Take every sample currently available.
    pub fn drain(&mut self) -> Vec<f32> {
        core::iter::from_fn(|| self.consumer.pop().ok()).collect()
    }
}
