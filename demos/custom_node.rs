//! Example: Creating a custom audio processor
//!
//! This demonstrates how to implement the `AudioProcessor` trait to create
//! your own nodes with message-based control, and how to drive a parameter
//! with another node's output.
//!
//! Run with: cargo run --example custom_node

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use klangnetz::nodes::{Gain, Recorder, Sine};
use klangnetz::{AudioBus, AudioProcessor, Context, NodeIo, ProcessContext, ProcessStatus};

// =============================================================================
// Step 1: Define your message type for runtime parameter control
// =============================================================================

/// Messages to control our square wave oscillator
#[derive(Clone, Copy, Debug)]
pub enum SquareMessage {
    /// Set the frequency in Hz
    SetFrequency(f32),
    /// Set the pulse width (0.0 to 1.0, where 0.5 is a standard square wave)
    SetPulseWidth(f32),
}

// =============================================================================
// Step 2: Define your processor struct with internal state
// =============================================================================

/// A square wave oscillator with variable pulse width
pub struct Square {
    frequency: f32,
    pulse_width: f32,
    amplitude: f32,
    phase: f32,
}

impl Square {
    /// Create a new square wave oscillator at the given frequency
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency,
            pulse_width: 0.5, // Standard square wave
            amplitude: 0.25,  // -12dB, safe default
            phase: 0.0,
        }
    }

    /// Set initial pulse width (builder pattern)
    pub fn with_pulse_width(mut self, pw: f32) -> Self {
        self.pulse_width = pw.clamp(0.0, 1.0);
        self
    }
}

// =============================================================================
// Step 3: Implement AudioProcessor
// =============================================================================

impl AudioProcessor for Square {
    type Message = SquareMessage;

    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = SquareMessage>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        // 1. Handle any pending messages (parameter updates)
        for msg in messages {
            match msg {
                SquareMessage::SetFrequency(f) => self.frequency = f.max(0.0),
                SquareMessage::SetPulseWidth(pw) => self.pulse_width = pw.clamp(0.0, 1.0),
            }
        }

        // 2. Generate audio samples (outputs start out silent)
        let phase_inc = self.frequency / ctx.sample_rate as f32;
        let mut out = io.output(0);

        for sample in out.channel_mut(0)[..ctx.frames].iter_mut() {
            // Square wave: high when phase < pulse_width, low otherwise
            *sample = if self.phase < self.pulse_width {
                self.amplitude
            } else {
                -self.amplitude
            };

            // Advance and wrap phase
            self.phase += phase_inc;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }

        ProcessStatus::Continue
    }

    // This is a source node: no inputs and one mono output, the defaults
}

// =============================================================================
// Main: Use the custom node just like built-in nodes
// =============================================================================

fn main() {
    tracing_subscriber::fmt::init();

    let ctx = Arc::new(Context::new(48_000));

    // Create our custom square wave oscillator
    let mut square = ctx.add(Square::new(220.0).with_pulse_width(0.5));

    // A gain whose level wobbles with a slow sine (tremolo)
    let gain = ctx.add(Gain::new(0.5));
    let lfo = ctx.add(Sine::new(4.0).with_amplitude(0.25));

    let (recorder, mut reader) = Recorder::new(2, 48_000);
    let recorder = ctx.add(recorder);

    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &square, 0, &gain, 0).expect("square -> gain");
        ctx.connect_param(&g, &lfo, 0, gain.param(Gain::GAIN).expect("gain param"))
            .expect("lfo -> gain.gain");
        ctx.connect(&g, &gain, 0, ctx.destination(), 0).expect("gain -> destination");
        ctx.connect(&g, &gain, 0, &recorder, 0).expect("gain -> recorder");
        ctx.add_automatic_pull_node(&g, &recorder);
    }

    // Render on its own thread, as an audio callback would
    let renderer = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            let mut out = AudioBus::new(ctx.channels());
            for _ in 0..(48_000 / 64) {
                ctx.render_quantum(&mut out);
            }
        })
    };

    // Meanwhile, sweep the oscillator from the control thread
    for step in 0..20 {
        let t = step as f32 / 20.0;
        square.send(SquareMessage::SetPulseWidth(0.5 + 0.25 * (t * 6.0).sin())).ok();
        square.send(SquareMessage::SetFrequency(220.0 + 110.0 * t)).ok();
        thread::sleep(Duration::from_millis(5));
    }

    renderer.join().expect("render thread panicked");

    let samples = reader.drain();
    let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt();
    println!("recorded {} frames, rms {:.3}", samples.len() / reader.channels(), rms);
}
