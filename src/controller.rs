//! The generate → filter → emit loop and its run/fade/stop state machine.

use crate::clock::{Clock, WallClock};
use crate::command::{Command, CommandChannel};
use crate::config::StreamSettings;
use crate::convolve::{convolve, SampleBlock, BLOCK_SIZE};
use crate::fade::FadeContext;
use crate::filter::FilterSpec;
use crate::noise::NoiseSource;
use crate::plot::FrequencyPlotter;
use crate::sink::Sink;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive failed sink writes after which the loop gives up.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 100;

/// Shared stop request. The only writer outside the loop is the interrupt
/// bridge, which does nothing but call [`CancellationToken::cancel`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Route Ctrl-C to `token`.
pub fn install_interrupt_handler(token: CancellationToken) -> anyhow::Result<()> {
    ctrlc::set_handler(move || token.cancel())?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Fading,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Run time (and fade, if any) ran out.
    Completed,
    /// A `q` command arrived.
    Quit,
    /// The cancellation token fired.
    Interrupted,
}

enum StreamState {
    Running,
    Fading(FadeContext),
    Stopped(StopReason),
}

/// Mutable timing and output parameters read every iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeState {
    pub sample_rate: u32,
    pub latency_ms: u32,
    pub run_time: Option<Duration>,
    /// Start of the current run-time measurement.
    pub started_at: Instant,
    pub fade_time: Option<Duration>,
}

impl RuntimeState {
    fn run_elapsed(&self, now: Instant) -> bool {
        self.run_time
            .is_some_and(|limit| now.saturating_duration_since(self.started_at) >= limit)
    }
}

pub struct StreamController<S: Sink, C: Clock = WallClock> {
    sink: S,
    clock: C,
    commands: Option<CommandChannel>,
    plotter: Option<Box<dyn FrequencyPlotter>>,
    cancel: CancellationToken,
    noise: NoiseSource,
    spec: FilterSpec,
    coeffs: Vec<f64>,
    block: SampleBlock,
    filtered: Vec<u8>,
    runtime: RuntimeState,
    state: StreamState,
    write_failures: u32,
    blocks_written: u64,
}

impl<S: Sink> StreamController<S, WallClock> {
    pub fn new(settings: &StreamSettings, sink: S, cancel: CancellationToken) -> Self {
        Self::with_clock(settings, sink, WallClock, cancel)
    }
}

impl<S: Sink, C: Clock> StreamController<S, C> {
    pub fn with_clock(
        settings: &StreamSettings,
        sink: S,
        clock: C,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_block_size(settings, sink, clock, cancel, BLOCK_SIZE)
    }

    pub fn with_block_size(
        settings: &StreamSettings,
        sink: S,
        clock: C,
        cancel: CancellationToken,
        block_size: usize,
    ) -> Self {
        let mut noise = NoiseSource::new(settings.seed);
        let mut block = SampleBlock::new(block_size);
        noise.fill(block.history_mut());

        let spec = settings.filter;
        log::info!("filter: {spec}");
        let runtime = RuntimeState {
            sample_rate: settings.sample_rate,
            latency_ms: settings.latency_ms,
            run_time: settings.run_time,
            started_at: clock.now(),
            fade_time: settings.fade_time,
        };
        Self {
            sink,
            clock,
            commands: None,
            plotter: None,
            cancel,
            noise,
            coeffs: spec.design(),
            spec,
            block,
            filtered: vec![0; block_size],
            runtime,
            state: StreamState::Running,
            write_failures: 0,
            blocks_written: 0,
        }
    }

    /// Accept live commands from `channel`.
    pub fn with_commands(mut self, channel: CommandChannel) -> Self {
        self.commands = Some(channel);
        self
    }

    pub fn with_plotter(mut self, plotter: Box<dyn FrequencyPlotter>) -> Self {
        self.plotter = Some(plotter);
        self
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            StreamState::Running => Phase::Running,
            StreamState::Fading(_) => Phase::Fading,
            StreamState::Stopped(_) => Phase::Stopped,
        }
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            StreamState::Stopped(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn filter_spec(&self) -> FilterSpec {
        self.spec
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coeffs
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Render the current response if a plotter is attached.
    pub fn plot(&mut self, width: u32) {
        let Some(plotter) = self.plotter.as_mut() else {
            log::warn!("frequency response plotting is not enabled");
            return;
        };
        if let Err(e) = plotter.render(&self.coeffs, self.runtime.sample_rate, width) {
            log::warn!("frequency response plot failed: {e:#}");
        }
    }

    /// Run until stopped, then close the sink.
    pub fn run(&mut self) -> anyhow::Result<StopReason> {
        if let Some(limit) = self.runtime.run_time {
            match self.runtime.fade_time {
                Some(fade) => log::info!(
                    "generating noise for {} minutes, then fading for {} seconds",
                    limit.as_secs() / 60,
                    fade.as_secs()
                ),
                None => log::info!("generating noise for {} minutes", limit.as_secs() / 60),
            }
        }

        let outcome = loop {
            match self.step() {
                Ok(Phase::Stopped) => break Ok(self.stop_reason().unwrap_or(StopReason::Completed)),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = self.sink.close() {
            log::warn!("closing audio output failed: {e:#}");
        }
        if let Ok(reason) = &outcome {
            log::info!("stream stopped ({reason:?}) after {} blocks", self.blocks_written);
        }
        outcome
    }

    /// One iteration: apply at most one command, produce and emit a block,
    /// then advance the state machine.
    pub fn step(&mut self) -> anyhow::Result<Phase> {
        if matches!(self.state, StreamState::Stopped(_)) {
            return Ok(Phase::Stopped);
        }
        if self.cancel.is_cancelled() {
            self.state = StreamState::Stopped(StopReason::Interrupted);
            return Ok(Phase::Stopped);
        }

        if let Some(command) = self.commands.as_mut().and_then(CommandChannel::poll) {
            self.apply(command);
            if matches!(self.state, StreamState::Stopped(_)) {
                return Ok(Phase::Stopped);
            }
        }

        self.noise.fill(self.block.fresh_mut());
        if let StreamState::Fading(fade) = &mut self.state {
            fade.apply(self.block.fresh_mut(), self.runtime.sample_rate);
        }
        convolve(&mut self.block, &self.coeffs, &mut self.filtered);
        self.emit()?;

        self.advance();
        Ok(self.phase())
    }

    /// Apply a live command to the running stream.
    pub fn apply(&mut self, command: Command) {
        log::debug!("command: {command:?}");
        match command {
            Command::SetCutoff(cutoff) => self.redesign(FilterSpec { cutoff, ..self.spec }),
            Command::SetWindow(window) => self.redesign(FilterSpec { window, ..self.spec }),
            Command::SetFilterLength(length) => self.redesign(FilterSpec { length, ..self.spec }),
            Command::SetSampleRate(rate) => {
                self.runtime.sample_rate = rate;
                if let Err(e) = self.sink.set_rate(rate) {
                    log::warn!("could not switch output to {rate} Hz: {e:#}");
                }
            }
            Command::SetLatency(latency_ms) => {
                self.runtime.latency_ms = latency_ms;
                if let Err(e) = self.sink.set_latency(latency_ms) {
                    log::warn!("could not set latency to {latency_ms} ms: {e:#}");
                }
            }
            Command::SetRunTime(run_time) => {
                self.runtime.run_time = run_time;
                self.runtime.started_at = self.clock.now();
            }
            Command::SetFadeTime(fade_time) => self.runtime.fade_time = fade_time,
            Command::Plot(width) => self.plot(width),
            Command::Quit => self.state = StreamState::Stopped(StopReason::Quit),
        }
    }

    fn redesign(&mut self, spec: FilterSpec) {
        self.spec = spec;
        self.coeffs = spec.design();
        log::info!("filter: {spec}");
    }

    fn emit(&mut self) -> anyhow::Result<()> {
        match self.sink.write(&self.filtered) {
            Ok(()) => {
                if self.write_failures > 0 {
                    log::info!("audio output recovered after {} failed writes", self.write_failures);
                }
                self.write_failures = 0;
            }
            Err(e) => {
                self.write_failures += 1;
                if self.write_failures == 1 || self.write_failures % 10 == 0 {
                    log::warn!("audio write failed ({} in a row): {e:#}", self.write_failures);
                }
                if self.write_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                    return Err(e.context(format!(
                        "giving up after {} consecutive audio write failures",
                        self.write_failures
                    )));
                }
            }
        }
        self.blocks_written += 1;
        self.clock.advance(self.filtered.len(), self.runtime.sample_rate);
        Ok(())
    }

    fn advance(&mut self) {
        if self.cancel.is_cancelled() {
            self.state = StreamState::Stopped(StopReason::Interrupted);
            return;
        }
        let now = self.clock.now();
        let next = match &self.state {
            StreamState::Running if self.runtime.run_elapsed(now) => {
                Some(match self.runtime.fade_time {
                    Some(fade) => {
                        log::info!("beginning fade");
                        StreamState::Fading(FadeContext::new(now, fade))
                    }
                    None => StreamState::Stopped(StopReason::Completed),
                })
            }
            StreamState::Fading(fade) if fade.is_finished(now) => {
                Some(StreamState::Stopped(StopReason::Completed))
            }
            _ => None,
        };
        if let Some(next) = next {
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SampleClock;
    use crate::filter::WindowKind;
    use crossbeam::channel::unbounded;

    #[derive(Default)]
    struct RecordingSink {
        written: Vec<u8>,
        rates: Vec<u32>,
        latencies: Vec<u32>,
        fail_writes: bool,
        closed: bool,
    }

    impl Sink for RecordingSink {
        fn write(&mut self, samples: &[u8]) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("device unplugged");
            }
            self.written.extend_from_slice(samples);
            Ok(())
        }

        fn set_rate(&mut self, sample_rate: u32) -> anyhow::Result<()> {
            self.rates.push(sample_rate);
            Ok(())
        }

        fn set_latency(&mut self, latency_ms: u32) -> anyhow::Result<()> {
            self.latencies.push(latency_ms);
            Ok(())
        }

        fn close(&mut self) -> anyhow::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            seed: Some(9),
            ..StreamSettings::default()
        }
    }

    fn controller(
        settings: &StreamSettings,
    ) -> StreamController<RecordingSink, SampleClock> {
        StreamController::with_block_size(
            settings,
            RecordingSink::default(),
            SampleClock::new(),
            CancellationToken::new(),
            256,
        )
    }

    fn send(tx: &crossbeam::channel::Sender<u8>, text: &str) {
        for b in text.bytes() {
            tx.send(b).expect("receiver alive");
        }
    }

    #[test]
    fn each_step_emits_one_block() {
        let mut c = controller(&settings());
        for _ in 0..3 {
            assert_eq!(c.step().expect("step"), Phase::Running);
        }
        assert_eq!(c.sink().written.len(), 3 * 256);
        assert_eq!(c.blocks_written(), 3);
    }

    #[test]
    fn commands_apply_one_per_iteration() {
        let (tx, rx) = unbounded();
        let mut c = controller(&settings()).with_commands(CommandChannel::new(rx));
        send(&tx, "c0.5\nF3\nl11\nr11025\nL400\nf7\n");

        c.step().expect("step");
        assert_eq!(c.filter_spec().cutoff, 0.5);
        assert_eq!(c.filter_spec().window, WindowKind::Blackman);

        c.step().expect("step");
        assert_eq!(c.filter_spec().window, WindowKind::Hamming);

        c.step().expect("step");
        assert_eq!(c.coefficients().len(), 11);
        assert_eq!(c.coefficients()[5], 0.5);

        c.step().expect("step");
        assert_eq!(c.runtime().sample_rate, 11_025);
        assert_eq!(c.sink().rates, vec![11_025]);

        c.step().expect("step");
        assert_eq!(c.sink().latencies, vec![400]);

        c.step().expect("step");
        assert_eq!(c.runtime().fade_time, Some(Duration::from_secs(7)));
        assert_eq!(c.sink().written.len(), 6 * 256);
    }

    #[test]
    fn quit_stops_without_emitting() {
        let (tx, rx) = unbounded();
        let mut c = controller(&settings()).with_commands(CommandChannel::new(rx));
        c.step().expect("step");
        send(&tx, "q\n");
        assert_eq!(c.step().expect("step"), Phase::Stopped);
        assert_eq!(c.stop_reason(), Some(StopReason::Quit));
        assert_eq!(c.sink().written.len(), 256);
    }

    #[test]
    fn cancellation_skips_the_fade() {
        let s = StreamSettings {
            run_time: Some(Duration::from_secs(60)),
            fade_time: Some(Duration::from_secs(5)),
            ..settings()
        };
        let cancel = CancellationToken::new();
        let mut c = StreamController::with_block_size(
            &s,
            RecordingSink::default(),
            SampleClock::new(),
            cancel.clone(),
            256,
        );
        c.step().expect("step");
        cancel.cancel();
        assert_eq!(c.step().expect("step"), Phase::Stopped);
        assert_eq!(c.stop_reason(), Some(StopReason::Interrupted));
        assert_eq!(c.sink().written.len(), 256);
    }

    #[test]
    fn run_time_without_fade_completes() {
        let s = StreamSettings {
            run_time: Some(Duration::from_secs(60)),
            sample_rate: 11_025,
            ..settings()
        };
        let mut c = controller(&s);
        let reason = c.run().expect("run");
        assert_eq!(reason, StopReason::Completed);
        assert!(c.sink().closed);
        let emitted = c.sink().written.len();
        let minute = 60 * 11_025;
        assert!(emitted >= minute && emitted < minute + 256, "{emitted}");
    }

    #[test]
    fn fade_runs_after_deadline_and_decays_to_silence() {
        let s = StreamSettings {
            run_time: Some(Duration::from_secs(60)),
            fade_time: Some(Duration::from_secs(2)),
            sample_rate: 11_025,
            ..settings()
        };
        let mut c = controller(&s);
        while c.phase() == Phase::Running {
            c.step().expect("step");
        }
        assert_eq!(c.phase(), Phase::Fading);
        let fade_start = c.sink().written.len();
        assert_eq!(c.run().expect("run"), StopReason::Completed);

        let fade = &c.sink().written[fade_start..];
        let fade_len = fade.len();
        assert!(fade_len >= 2 * 11_025 && fade_len < 2 * 11_025 + 256, "{fade_len}");

        let spread = |w: &[u8]| {
            let lo = *w.iter().min().expect("samples");
            let hi = *w.iter().max().expect("samples");
            hi - lo
        };
        let head = spread(&fade[256..2048]);
        // Output trails its newest input by about one block, so the last
        // samples reflect a multiplier below half a percent.
        let tail = spread(&fade[fade_len - 64..]);
        assert!(head > 100, "head spread {head}");
        assert!(tail <= 2, "tail spread {tail}");
    }

    #[test]
    fn rate_change_while_fading_still_decays_to_silence() {
        let s = StreamSettings {
            run_time: Some(Duration::from_secs(60)),
            fade_time: Some(Duration::from_secs(2)),
            sample_rate: 22_050,
            ..settings()
        };
        let (tx, rx) = unbounded();
        let mut c = controller(&s).with_commands(CommandChannel::new(rx));
        while c.phase() == Phase::Running {
            c.step().expect("step");
        }
        let fade_start = c.sink().written.len();
        send(&tx, "r11025\n");
        assert_eq!(c.run().expect("run"), StopReason::Completed);
        assert_eq!(c.runtime().sample_rate, 11_025);

        let fade = &c.sink().written[fade_start..];
        let fade_len = fade.len();
        assert!(fade_len >= 2 * 11_025 && fade_len < 2 * 11_025 + 256, "{fade_len}");
        let tail = &fade[fade_len - 64..];
        let lo = *tail.iter().min().expect("samples");
        let hi = *tail.iter().max().expect("samples");
        assert!(hi - lo <= 2, "tail spread {}", hi - lo);
    }

    #[test]
    fn cancellation_during_fade_stops_immediately() {
        let s = StreamSettings {
            run_time: Some(Duration::from_secs(1)),
            fade_time: Some(Duration::from_secs(30)),
            sample_rate: 11_025,
            ..settings()
        };
        let cancel = CancellationToken::new();
        let mut c = StreamController::with_block_size(
            &s,
            RecordingSink::default(),
            SampleClock::new(),
            cancel.clone(),
            256,
        );
        while c.phase() == Phase::Running {
            c.step().expect("step");
        }
        c.step().expect("step");
        assert_eq!(c.phase(), Phase::Fading);
        let emitted = c.sink().written.len();

        cancel.cancel();
        assert_eq!(c.step().expect("step"), Phase::Stopped);
        assert_eq!(c.stop_reason(), Some(StopReason::Interrupted));
        assert_eq!(c.sink().written.len(), emitted);
        assert_eq!(c.run().expect("run"), StopReason::Interrupted);
        assert_eq!(c.sink().written.len(), emitted);
    }

    #[test]
    fn run_time_command_restarts_the_clock() {
        let (tx, rx) = unbounded();
        let mut c = controller(&settings()).with_commands(CommandChannel::new(rx));
        for _ in 0..10 {
            c.step().expect("step");
        }
        send(&tx, "t1\n");
        c.step().expect("step");
        assert_eq!(c.runtime().run_time, Some(Duration::from_secs(60)));
        // The clock restarted before this block, so one block has elapsed.
        let elapsed = c.runtime().started_at;
        assert!(c.clock.now() > elapsed);
        assert_eq!(c.phase(), Phase::Running);
    }

    #[test]
    fn persistent_write_failures_surface() {
        let mut c = StreamController::with_block_size(
            &settings(),
            RecordingSink {
                fail_writes: true,
                ..RecordingSink::default()
            },
            SampleClock::new(),
            CancellationToken::new(),
            64,
        );
        for _ in 1..MAX_CONSECUTIVE_WRITE_FAILURES {
            assert_eq!(c.step().expect("tolerated"), Phase::Running);
        }
        assert!(c.step().is_err());
    }

    #[test]
    fn plot_without_plotter_is_harmless() {
        let (tx, rx) = unbounded();
        let mut c = controller(&settings()).with_commands(CommandChannel::new(rx));
        send(&tx, "p320\n");
        assert_eq!(c.step().expect("step"), Phase::Running);
    }
}
