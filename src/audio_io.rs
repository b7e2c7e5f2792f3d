use crate::sink::{Sink, SILENCE};
use anyhow::{anyhow, bail, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, SampleFormat, SizedSample, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WRITE_POLL: Duration = Duration::from_millis(2);

// A device that stops pulling samples for this long is treated as failed.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default output device fed through a ring buffer.
///
/// `write` blocks while the ring is full, which paces the stream loop to
/// the device. The device runs at the requested rate when it supports it;
/// otherwise the callback holds each sample for the right number of device
/// frames. The mono signal is copied into every device channel.
pub struct CpalSink {
    sample_rate: u32,
    latency_ms: u32,
    output: Option<DeviceOutput>,
    closed: bool,
}

struct DeviceOutput {
    stream: cpal::Stream,
    producer: HeapProd<u8>,
    health: StreamHealth,
}

/// Error latch shared with the stream's error callback.
///
/// cpal reports both fatal and recoverable stream errors through the same
/// callback, so each report is consumed once and answered with a reopen.
#[derive(Debug, Clone, Default)]
struct StreamHealth(Arc<AtomicBool>);

impl StreamHealth {
    fn report(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether an error was reported since the last call.
    fn take_error(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    fn has_error(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Callback-side state: pops source samples at the source rate.
struct DeviceFeed {
    consumer: HeapCons<u8>,
    step: f64,
    phase: f64,
    current: u8,
}

impl DeviceFeed {
    fn next_value(&mut self) -> f32 {
        self.phase += self.step;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            self.current = self.consumer.try_pop().unwrap_or(SILENCE);
        }
        (f32::from(self.current) - 128.0) / 128.0
    }
}

/// Device frames per period: half the latency, rounded down to a power of
/// two.
fn period_frames(latency_ms: u32, device_rate: u32) -> u32 {
    let frames = (u64::from(latency_ms) * u64::from(device_rate) / 2000).max(1);
    1 << (u64::BITS - 1 - frames.leading_zeros())
}

/// Ring capacity in source samples for the requested latency.
fn ring_capacity(latency_ms: u32, sample_rate: u32) -> usize {
    let samples = u64::from(latency_ms) * u64::from(sample_rate) / 1000;
    (samples as usize).max(256)
}

impl CpalSink {
    pub fn open(sample_rate: u32, latency_ms: u32) -> anyhow::Result<Self> {
        let output = open_output(sample_rate, latency_ms)?;
        Ok(Self {
            sample_rate,
            latency_ms,
            output: Some(output),
            closed: false,
        })
    }

    fn reopen(&mut self) -> anyhow::Result<()> {
        // Release the device before asking for it again.
        self.output = None;
        self.output = Some(open_output(self.sample_rate, self.latency_ms)?);
        Ok(())
    }
}

fn open_output(sample_rate: u32, latency_ms: u32) -> anyhow::Result<DeviceOutput> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device available"))?;
    let supported = device
        .default_output_config()
        .context("no default output config")?;
    let sample_format = supported.sample_format();
    let mut config: StreamConfig = supported.into();

    if sample_rate != config.sample_rate.0 {
        match device.supported_output_configs() {
            Ok(mut ranges) => {
                if let Some(range) = ranges.find(|r| {
                    r.channels() == config.channels
                        && r.sample_format() == sample_format
                        && r.min_sample_rate().0 <= sample_rate
                        && sample_rate <= r.max_sample_rate().0
                }) {
                    config = range.with_sample_rate(cpal::SampleRate(sample_rate)).config();
                } else {
                    log::warn!(
                        "device does not run at {sample_rate} Hz; adapting to {} Hz",
                        config.sample_rate.0
                    );
                }
            }
            Err(e) => log::warn!("could not query supported output configs ({e}); using default"),
        }
    }

    let health = StreamHealth::default();
    config.buffer_size = BufferSize::Fixed(period_frames(latency_ms, config.sample_rate.0));
    let (stream, producer) =
        match build_stream(&device, &config, sample_format, sample_rate, latency_ms, &health) {
            Ok(built) => built,
            Err(e) => {
                log::warn!("fixed buffer size rejected ({e}); using device default");
                config.buffer_size = BufferSize::Default;
                build_stream(&device, &config, sample_format, sample_rate, latency_ms, &health)?
            }
        };
    stream.play().context("failed to start output stream")?;

    log::info!(
        "audio output on {:?}: {} Hz source, {} Hz device, {} channel(s), {latency_ms} ms",
        device.name().unwrap_or_else(|_| "unknown device".to_string()),
        sample_rate,
        config.sample_rate.0,
        config.channels
    );
    Ok(DeviceOutput {
        stream,
        producer,
        health,
    })
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    sample_rate: u32,
    latency_ms: u32,
    health: &StreamHealth,
) -> anyhow::Result<(cpal::Stream, HeapProd<u8>)> {
    let (producer, consumer) = HeapRb::<u8>::new(ring_capacity(latency_ms, sample_rate)).split();
    let feed = DeviceFeed {
        consumer,
        step: f64::from(sample_rate) / f64::from(config.sample_rate.0),
        phase: 0.0,
        current: SILENCE,
    };
    let health = health.clone();
    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, config, feed, health),
        SampleFormat::I16 => build_typed::<i16>(device, config, feed, health),
        SampleFormat::U16 => build_typed::<u16>(device, config, feed, health),
        SampleFormat::U8 => build_typed::<u8>(device, config, feed, health),
        other => bail!("unsupported device sample format {other:?}"),
    }
    .context("failed to build output stream")?;
    Ok((stream, producer))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut feed: DeviceFeed,
    health: StreamHealth,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                frame.fill(T::from_sample(feed.next_value()));
            }
        },
        move |err| {
            log::warn!("audio stream error: {err}");
            health.report();
        },
        None,
    )
}

impl Sink for CpalSink {
    fn write(&mut self, samples: &[u8]) -> anyhow::Result<()> {
        if self.closed {
            bail!("audio output is closed");
        }
        let mut rest = samples;
        let mut last_progress = Instant::now();
        while !rest.is_empty() {
            let needs_reopen = self.output.as_ref().map_or(true, |o| o.health.take_error());
            if needs_reopen {
                log::info!("reopening audio output");
                self.reopen().context("could not reopen audio output")?;
                last_progress = Instant::now();
            }
            let Some(output) = self.output.as_mut() else {
                bail!("audio output is not open");
            };
            let pushed = output.producer.push_slice(rest);
            rest = &rest[pushed..];
            if pushed > 0 {
                last_progress = Instant::now();
            } else if last_progress.elapsed() > STALL_TIMEOUT {
                bail!("audio device stopped consuming samples");
            } else {
                thread::sleep(WRITE_POLL);
            }
        }
        Ok(())
    }

    fn set_rate(&mut self, sample_rate: u32) -> anyhow::Result<()> {
        self.sample_rate = sample_rate;
        self.reopen()
    }

    fn set_latency(&mut self, latency_ms: u32) -> anyhow::Result<()> {
        self.latency_ms = latency_ms;
        self.reopen()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        let Some(output) = self.output.take() else {
            return Ok(());
        };
        // Let queued audio play out before tearing the stream down.
        let deadline = Instant::now()
            + Duration::from_millis(u64::from(self.latency_ms))
            + STALL_TIMEOUT;
        while !output.producer.is_empty()
            && !output.health.has_error()
            && Instant::now() < deadline
        {
            thread::sleep(WRITE_POLL);
        }
        output.stream.pause().ok();
        Ok(())
    }
}
