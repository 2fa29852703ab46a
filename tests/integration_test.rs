use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use klangnetz::nodes::{Constant, ConstantMessage, Delay, Gain, Recorder};
use klangnetz::{
    AudioBus, AudioProcessor, ConnectError, Context, NodeIo, ProcessContext, ProcessStatus,
    MAX_FAN_OUT, QUANTUM_FRAMES,
};

fn render(ctx: &Context) -> AudioBus {
    let mut out = AudioBus::new(ctx.channels());
    ctx.render_quantum(&mut out);
    out
}

fn all_eq(samples: &[f32], value: f32) -> bool {
    samples.iter().all(|s| (*s - value).abs() < 1e-6)
}

/// Mono source that counts how often it is processed.
struct Counting {
    calls: Arc<AtomicUsize>,
    value: f32,
}

impl AudioProcessor for Counting {
    type Message = ();

    fn process(
        &mut self,
        ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        self.calls.fetch_add(1, Ordering::SeqCst);
        io.output(0).channel_mut(0)[..ctx.frames].fill(self.value);
        ProcessStatus::Continue
    }
}

/// Records the size of its output bus each quantum and asks for a stereo
/// output during the first one.
struct Widening {
    seen: Arc<Mutex<Vec<usize>>>,
    requested: bool,
}

impl AudioProcessor for Widening {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        io: &NodeIo<'_, '_>,
    ) -> ProcessStatus {
        if !self.requested {
            io.set_output_channels(0, 2);
            self.requested = true;
        }
        let channels = io.output(0).channels();
        self.seen.lock().unwrap().push(channels);
        ProcessStatus::Continue
    }
}

#[test]
fn quantum_counter_starts_at_one() {
    let ctx = Context::new(48_000);
    assert_eq!(ctx.current_quantum(), 0);
    render(&ctx);
    render(&ctx);
    assert_eq!(ctx.current_quantum(), 2);
}

#[test]
fn constant_reaches_destination() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(0.25));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, ctx.destination(), 0).unwrap();
    }

    let out = render(&ctx);
    assert_eq!(out.channels(), 2);
    assert!(all_eq(out.channel(0), 0.25));
    assert!(all_eq(out.channel(1), 0.25));
}

#[test]
fn diamond_processes_shared_source_once() {
    let ctx = Context::new(48_000);
    let calls = Arc::new(AtomicUsize::new(0));
    let source = ctx.add(Counting {
        calls: calls.clone(),
        value: 0.25,
    });
    let left = ctx.add(Gain::new(1.0));
    let right = ctx.add(Gain::new(1.0));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &left, 0).unwrap();
        ctx.connect(&g, &source, 0, &right, 0).unwrap();
        ctx.connect(&g, &left, 0, ctx.destination(), 0).unwrap();
        ctx.connect(&g, &right, 0, ctx.destination(), 0).unwrap();
        assert_eq!(source.output(0).unwrap().fan_out_count(&g), 2);
        assert_eq!(ctx.destination().input(0).unwrap().fan_in_count(&g), 2);
    }

    for quantum in 1..=3 {
        let out = render(&ctx);
        assert_eq!(calls.load(Ordering::SeqCst), quantum);
        assert!(all_eq(out.channel(0), 0.5));
    }

    let r = ctx.lock_render();
    let left_bus = left.output(0).unwrap().bus(&r);
    let right_bus = right.output(0).unwrap().bus(&r);
    assert_eq!(left_bus.channel(0), right_bus.channel(0));
    assert!(all_eq(left_bus.channel(0), 0.25));
}

#[test]
fn disable_hides_connections_without_removing_them() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));
    let output = source.output(0).unwrap().clone();
    let input = ctx.destination().input(0).unwrap().clone();
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, ctx.destination(), 0).unwrap();
        assert_eq!(output.fan_out_count(&g), 1);

        output.disable(&g);
        assert!(!output.is_enabled(&g));
        assert_eq!(output.fan_out_count(&g), 0);
        assert!(!output.is_connected(&g));
        assert_eq!(input.fan_in_count(&g), 0);
        assert_eq!(input.sources(&g), vec![(source.id(), 0)]);
    }
    assert!(render(&ctx).is_silent());

    {
        let g = ctx.lock_graph();
        output.enable(&g);
        assert_eq!(output.fan_out_count(&g), 1);
        assert_eq!(input.fan_in_count(&g), 1);
    }
    assert!(all_eq(render(&ctx).channel(0), 1.0));
}

#[test]
fn connect_disconnect_round_trip() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));
    let a = ctx.add(Gain::new(1.0));
    let b = ctx.add(Gain::new(1.0));
    let g = ctx.lock_graph();
    ctx.connect(&g, &source, 0, &a, 0).unwrap();

    let output = source.output(0).unwrap();
    let before = output.fan_out_count(&g);
    ctx.connect(&g, &source, 0, &b, 0).unwrap();
    assert_eq!(output.fan_out_count(&g), before + 1);

    // connecting twice is a no-op
    ctx.connect(&g, &source, 0, &b, 0).unwrap();
    assert_eq!(output.fan_out_count(&g), before + 1);

    assert!(ctx.disconnect(&g, &source, 0, &b, 0));
    assert_eq!(output.fan_out_count(&g), before);
    assert!(!ctx.disconnect(&g, &source, 0, &b, 0));
    assert_eq!(b.input(0).unwrap().fan_in_count(&g), 0);
}

#[test]
fn channel_change_waits_for_next_quantum() {
    let ctx = Context::new(48_000);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = ctx.add(Widening {
        seen: seen.clone(),
        requested: false,
    });
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &probe, 0, ctx.destination(), 0).unwrap();
    }
    let output = probe.output(0).unwrap();

    render(&ctx);
    assert_eq!(output.number_of_channels(), 1);
    render(&ctx);
    assert_eq!(output.number_of_channels(), 2);
    render(&ctx);

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 2]);
}

#[test]
fn unconnected_input_is_silent_at_default_count() {
    let ctx = Context::new(48_000);
    let gain = ctx.add(Gain::new(1.0));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();
    }

    let out = render(&ctx);
    assert!(out.is_silent());

    let r = ctx.lock_render();
    let input = gain.input(0).unwrap();
    assert_eq!(input.number_of_channels(&r), 2);
    assert_eq!(input.rendering_fan_in_count(&r), 0);
    let bus = input.bus(&r);
    assert_eq!(bus.channels(), 2);
    assert!(bus.is_silent());
}

#[test]
fn fan_out_is_bounded() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));
    let sinks: Vec<_> = (0..=MAX_FAN_OUT).map(|_| ctx.add(Gain::new(1.0))).collect();
    let g = ctx.lock_graph();

    for sink in &sinks[..MAX_FAN_OUT] {
        ctx.connect(&g, &source, 0, sink, 0).unwrap();
    }
    let last = &sinks[MAX_FAN_OUT];
    assert_eq!(
        ctx.connect(&g, &source, 0, last, 0),
        Err(ConnectError::FanOutExceeded)
    );
    assert_eq!(source.output(0).unwrap().fan_out_count(&g), MAX_FAN_OUT);
    assert_eq!(last.input(0).unwrap().fan_in_count(&g), 0);
}

#[test]
fn bad_indices_are_rejected() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));
    let gain = ctx.add(Gain::new(1.0));
    let g = ctx.lock_graph();

    assert_eq!(
        ctx.connect(&g, &source, 3, &gain, 0),
        Err(ConnectError::OutputIndex { index: 3, count: 1 })
    );
    assert_eq!(
        ctx.connect(&g, &source, 0, &gain, 1),
        Err(ConnectError::InputIndex { index: 1, count: 1 })
    );
}

#[test]
fn param_adds_connected_signal_to_base_value() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));
    let modulator = ctx.add(Constant::new(0.5));
    let gain = ctx.add(Gain::new(1.0));
    let param = gain.param(Gain::GAIN).unwrap().clone();
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &gain, 0).unwrap();
        ctx.connect_param(&g, &modulator, 0, &param).unwrap();
        ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();
        assert_eq!(param.fan_in_count(&g), 1);
        assert_eq!(modulator.output(0).unwrap().param_fan_out_count(&g), 1);
    }

    let out = render(&ctx);
    assert!(all_eq(out.channel(0), 1.5));

    {
        let r = ctx.lock_render();
        assert!(all_eq(&param.values(&r), 1.5));
    }

    {
        let g = ctx.lock_graph();
        assert!(ctx.disconnect_param(&g, &modulator, 0, &param));
        assert_eq!(param.fan_in_count(&g), 0);
    }
    param.set_value(0.25);
    assert!(all_eq(render(&ctx).channel(0), 0.25));
}

#[test]
fn cycles_without_delay_are_rejected() {
    let ctx = Context::new(48_000);
    let a = ctx.add(Gain::new(1.0));
    let b = ctx.add(Gain::new(1.0));
    let g = ctx.lock_graph();

    ctx.connect(&g, &a, 0, &b, 0).unwrap();
    assert_eq!(ctx.connect(&g, &b, 0, &a, 0), Err(ConnectError::Cycle));
    assert_eq!(ctx.connect(&g, &a, 0, &a, 0), Err(ConnectError::Cycle));

    let param = a.param(Gain::GAIN).unwrap();
    assert_eq!(ctx.connect_param(&g, &b, 0, param), Err(ConnectError::Cycle));

    // a rejected connect leaves the graph as it was
    assert_eq!(b.output(0).unwrap().fan_out_count(&g), 0);
    assert_eq!(ctx.topology(&g).edge_count(), 1);
}

#[test]
fn delay_outside_a_loop_shifts_by_its_length() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0).one_shot(QUANTUM_FRAMES));
    let delay = ctx.add(Delay::new(2));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &delay, 0).unwrap();
        ctx.connect(&g, &delay, 0, ctx.destination(), 0).unwrap();
    }

    let firsts: Vec<f32> = (0..5).map(|_| render(&ctx).channel(0)[0]).collect();
    assert_eq!(firsts, [0.0, 0.0, 1.0, 0.0, 0.0]);
}

#[test]
fn feedback_through_delay_renders() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0).one_shot(QUANTUM_FRAMES));
    let gain = ctx.add(Gain::new(0.5));
    let delay = ctx.add(Delay::new(1));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &gain, 0).unwrap();
        ctx.connect(&g, &gain, 0, &delay, 0).unwrap();
        ctx.connect(&g, &delay, 0, &gain, 0).unwrap();
        ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();

        let topology = ctx.topology(&g);
        assert_eq!(topology.edge_count(), 4);
        assert!(!topology.closes_undelayed_cycle(gain.id(), delay.id()));
    }

    // One quantum per round trip: each quantum halves the previous one.
    let mut expected = 0.5;
    for _ in 0..6 {
        let out = render(&ctx);
        assert!(all_eq(out.channel(0), expected), "expected {expected}, got {}", out.channel(0)[0]);
        expected *= 0.5;
    }

    let g = ctx.lock_graph();
    ctx.remove_node(&g, &delay);
    assert_eq!(gain.input(0).unwrap().sources(&g), vec![(source.id(), 0)]);
}

#[test]
fn rendering_fan_out_snapshot_changes_at_the_next_quantum() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(0.25));
    let first = ctx.add(Gain::new(1.0));
    let second = ctx.add(Gain::new(1.0));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &first, 0).unwrap();
        ctx.connect(&g, &first, 0, ctx.destination(), 0).unwrap();
        ctx.connect(&g, &second, 0, ctx.destination(), 0).unwrap();
    }
    render(&ctx);

    let output = source.output(0).unwrap();
    let rendering = || {
        let r = ctx.lock_render();
        (
            output.rendering_fan_out_count(&r),
            output.rendering_param_fan_out_count(&r),
        )
    };
    assert_eq!(rendering(), (1, 0));

    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &second, 0).unwrap();
        assert_eq!(output.fan_out_count(&g), 2);
    }
    assert_eq!(rendering(), (1, 0));
    render(&ctx);
    assert_eq!(rendering(), (2, 0));

    {
        let g = ctx.lock_graph();
        let param = second.param(Gain::GAIN).unwrap();
        ctx.connect_param(&g, &source, 0, param).unwrap();
        assert_eq!(output.param_fan_out_count(&g), 1);
    }
    assert_eq!(rendering(), (2, 0));
    render(&ctx);
    assert_eq!(rendering(), (2, 1));

    {
        let g = ctx.lock_graph();
        assert!(ctx.disconnect(&g, &source, 0, &first, 0));
        assert_eq!(output.fan_out_count(&g), 1);
    }
    assert_eq!(rendering(), (2, 1));
    render(&ctx);
    assert_eq!(rendering(), (1, 1));
}

#[test]
fn finished_node_is_disabled_and_can_restart() {
    let ctx = Context::new(48_000);
    let mut source = ctx.add(Constant::new(1.0).one_shot(QUANTUM_FRAMES + 36));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, ctx.destination(), 0).unwrap();
    }

    assert!(all_eq(render(&ctx).channel(0), 1.0));
    assert!(!source.is_finished());

    let out = render(&ctx);
    assert!(all_eq(&out.channel(0)[..36], 1.0));
    assert!(all_eq(&out.channel(0)[36..], 0.0));
    assert!(source.is_finished());
    {
        let g = ctx.lock_graph();
        let output = source.output(0).unwrap();
        assert!(!output.is_enabled(&g));
        assert_eq!(output.fan_out_count(&g), 0);
        // still wired up, ready to be started again
        assert_eq!(ctx.destination().input(0).unwrap().sources(&g), vec![(source.id(), 0)]);
    }
    assert!(render(&ctx).is_silent());

    source.send(ConstantMessage::Restart).unwrap();
    {
        let g = ctx.lock_graph();
        source.enable_outputs(&g);
    }
    assert!(!source.is_finished());
    assert!(all_eq(render(&ctx).channel(0), 1.0));
}

#[test]
fn follower_output_takes_input_channel_count() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0).with_channels(3));
    let gain = ctx.add(Gain::new(1.0));
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &gain, 0).unwrap();
        ctx.connect(&g, &gain, 0, ctx.destination(), 0).unwrap();
    }
    let output = gain.output(0).unwrap();
    assert_eq!(output.number_of_channels(), 2);

    render(&ctx);
    assert_eq!(output.number_of_channels(), 3);

    let r = ctx.lock_render();
    assert_eq!(gain.input(0).unwrap().number_of_channels(&r), 3);
    assert_eq!(output.bus(&r).channels(), 3);
    // destination stays at its explicit count
    assert_eq!(ctx.destination().input(0).unwrap().number_of_channels(&r), 2);
}

#[test]
fn automatic_pull_renders_unconnected_recorder() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(0.25));
    let (recorder, mut reader) = Recorder::new(2, 1024);
    let recorder = ctx.add(recorder);
    {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, &recorder, 0).unwrap();
        ctx.add_automatic_pull_node(&g, &recorder);
    }

    assert!(render(&ctx).is_silent());
    render(&ctx);
    assert_eq!(reader.available(), 2 * QUANTUM_FRAMES * 2);
    let samples = reader.drain();
    assert!(all_eq(&samples, 0.25));

    {
        let g = ctx.lock_graph();
        ctx.remove_automatic_pull_node(&g, &recorder);
    }
    render(&ctx);
    assert_eq!(reader.available(), 0);
    assert_eq!(reader.dropped_frames(), 0);
}

#[test]
fn busy_graph_lock_defers_updates() {
    let ctx = Context::new(48_000);
    let source = ctx.add(Constant::new(1.0));

    let g = ctx.lock_graph();
    ctx.connect(&g, &source, 0, ctx.destination(), 0).unwrap();
    // the render thread cannot take the graph lock, so the new edge is not
    // rendered yet
    assert!(render(&ctx).is_silent());
    drop(g);

    assert!(all_eq(render(&ctx).channel(0), 1.0));
}

#[test]
fn renders_while_another_thread_edits() {
    let ctx = Arc::new(Context::new(48_000));
    let source = ctx.add(Constant::new(1.0));
    let done = Arc::new(AtomicBool::new(false));

    let renderer = {
        let ctx = ctx.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut out = AudioBus::new(ctx.channels());
            let mut quanta = 0;
            while !done.load(Ordering::Acquire) || quanta < 64 {
                ctx.render_quantum(&mut out);
                assert!(out.channel(0).iter().all(|s| *s == 0.0 || *s == 1.0));
                quanta += 1;
            }
            quanta
        })
    };

    for _ in 0..200 {
        let g = ctx.lock_graph();
        ctx.connect(&g, &source, 0, ctx.destination(), 0).unwrap();
        drop(g);
        let g = ctx.lock_graph();
        assert!(ctx.disconnect(&g, &source, 0, ctx.destination(), 0));
    }
    done.store(true, Ordering::Release);

    assert!(renderer.join().unwrap() >= 64);
    let g = ctx.lock_graph();
    assert_eq!(source.output(0).unwrap().fan_out_count(&g), 0);
}
