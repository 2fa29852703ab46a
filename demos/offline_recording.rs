//! Example: Render a graph faster than real time and save it.
//!
//! A sine is split into a dry path and a delayed, quieter echo path, both
//! mixed at the destination. A recorder taps the mix and the result is written
//! as raw little-endian 32-bit floats (stereo, 48 kHz).
//!
//! Run with: cargo run --example offline_recording -- out.f32

use std::fs::File;
use std::io::{BufWriter, Write};

use klangnetz::nodes::{Delay, Gain, Recorder, Sine};
use klangnetz::{AudioBus, Context, QUANTUM_FRAMES};

const SAMPLE_RATE: u32 = 48_000;
const SECONDS: usize = 2;

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "recording.f32".to_string());

    let ctx = Context::new(SAMPLE_RATE);
    let sine = ctx.add(Sine::new(330.0).with_amplitude(0.5));
    let dry = ctx.add(Gain::new(0.7));
    let wet = ctx.add(Gain::new(0.3));
    // 250 ms echo
    let echo = ctx.add(Delay::new(SAMPLE_RATE as usize / 4 / QUANTUM_FRAMES));

    let frames = SAMPLE_RATE as usize * SECONDS;
    let (recorder, mut reader) = Recorder::new(2, frames);
    let recorder = ctx.add(recorder);

    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &sine, 0, &dry, 0).expect("sine -> dry");
        ctx.connect(&g, &sine, 0, &echo, 0).expect("sine -> echo");
        ctx.connect(&g, &echo, 0, &wet, 0).expect("echo -> wet");
        ctx.connect(&g, &dry, 0, ctx.destination(), 0).expect("dry -> destination");
        ctx.connect(&g, &wet, 0, ctx.destination(), 0).expect("wet -> destination");
        ctx.connect(&g, &dry, 0, &recorder, 0).expect("dry -> recorder");
        ctx.connect(&g, &wet, 0, &recorder, 0).expect("wet -> recorder");
        ctx.add_automatic_pull_node(&g, &recorder);

        let topology = ctx.topology(&g);
        println!("{} nodes, {} connections", topology.node_count(), topology.edge_count());
    }

    let mut out = AudioBus::new(ctx.channels());
    for _ in 0..frames / QUANTUM_FRAMES {
        ctx.render_quantum(&mut out);
    }

    let samples = reader.drain();
    let mut file = BufWriter::new(File::create(&path)?);
    for sample in &samples {
        file.write_all(&sample.to_le_bytes())?;
    }
    file.flush()?;

    println!(
        "wrote {} frames to {} ({} dropped)",
        samples.len() / reader.channels(),
        path,
        reader.dropped_frames()
    );
    Ok(())
}
