use std::time::Duration;
use whitenoise::{
    convolve, design, CancellationToken, Config, NoiseSource, Phase, SampleBlock, SampleClock,
    Sink, StopReason, StreamController, StreamSettings, WavSink, WindowKind, BLOCK_SIZE,
};

#[derive(Default)]
struct MemorySink {
    samples: Vec<u8>,
}

impl Sink for MemorySink {
    fn write(&mut self, samples: &[u8]) -> anyhow::Result<()> {
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    fn set_rate(&mut self, _sample_rate: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_latency(&mut self, _latency_ms: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn seeded(seed: u64) -> StreamSettings {
    let mut config = Config::default();
    config.seed = Some(seed);
    config.resolve()
}

fn two_blocks(settings: &StreamSettings) -> Vec<u8> {
    let mut controller = StreamController::with_clock(
        settings,
        MemorySink::default(),
        SampleClock::new(),
        CancellationToken::new(),
    );
    controller.step().expect("first block");
    controller.step().expect("second block");
    controller.into_sink().samples
}

#[test]
fn seeded_stream_is_reproducible() {
    let settings = seeded(2024);
    assert_eq!(settings.filter.window, WindowKind::Blackman);
    assert_eq!(settings.filter.length, 25);
    assert_eq!(settings.filter.cutoff, 0.3);
    assert_eq!(settings.sample_rate, 22_050);

    let first = two_blocks(&settings);
    let second = two_blocks(&settings);
    assert_eq!(first.len(), 2 * BLOCK_SIZE);
    assert_eq!(first, second);
    assert_ne!(first, two_blocks(&seeded(2025)));
}

// First bytes of the seed-2024 noise stream (ChaCha12 `StdRng`, rand 0.8).
// `StdRng` output may change with a rand upgrade; regenerate these then.
const SEED_2024_HEAD: [u8; 32] = [
    139, 45, 17, 136, 112, 73, 83, 210, 57, 171, 94, 190, 17, 58, 158, 130, 228, 50, 94, 105, 6,
    218, 194, 154, 177, 30, 184, 142, 46, 147, 19, 61,
];

#[test]
fn seeded_noise_matches_pinned_bytes() {
    let mut head = [0u8; 32];
    NoiseSource::new(Some(2024)).fill(&mut head);
    assert_eq!(head, SEED_2024_HEAD);

    // The controller seeds its history from the same stream.
    let settings = seeded(2024);
    let mut controller = StreamController::with_block_size(
        &settings,
        MemorySink::default(),
        SampleClock::new(),
        CancellationToken::new(),
        32,
    );
    controller.step().expect("first block");
    let coeffs = design(WindowKind::Blackman, 25, 0.3);
    let m = coeffs.len();
    let first = controller.into_sink().samples[0];
    let sum: f64 = (0..m).map(|k| f64::from(SEED_2024_HEAD[m - 1 - k]) * coeffs[k]).sum();
    assert_eq!(first, sum.clamp(0.0, 255.0) as u8);
}

#[test]
fn stream_matches_direct_convolution_of_the_noise() {
    let settings = seeded(77);
    let emitted = two_blocks(&settings);

    // Replay the generator: history first, then one fresh half per block.
    let mut noise = NoiseSource::new(Some(77));
    let mut raw = vec![0u8; 3 * BLOCK_SIZE];
    noise.fill(&mut raw[..BLOCK_SIZE]);
    noise.fill(&mut raw[BLOCK_SIZE..2 * BLOCK_SIZE]);
    noise.fill(&mut raw[2 * BLOCK_SIZE..]);

    let coeffs = design(WindowKind::Blackman, 25, 0.3);
    let m = coeffs.len();
    let expected: Vec<u8> = (m - 1..m - 1 + 2 * BLOCK_SIZE)
        .map(|p| {
            let sum: f64 = (0..m).map(|k| f64::from(raw[p - k]) * coeffs[k]).sum();
            sum.clamp(0.0, 255.0) as u8
        })
        .collect();
    assert_eq!(emitted, expected);
}

#[test]
fn history_carries_across_many_blocks() {
    let n = 128;
    let coeffs = design(WindowKind::Hanning, 33, 0.2);
    let mut noise = NoiseSource::new(Some(5));
    let mut stream = vec![0u8; n * 9];
    noise.fill(&mut stream);

    let mut block = SampleBlock::new(n);
    block.history_mut().copy_from_slice(&stream[..n]);
    let mut out = vec![0u8; n];
    let mut blockwise = Vec::new();
    for chunk in stream[n..].chunks(n) {
        block.fresh_mut().copy_from_slice(chunk);
        convolve(&mut block, &coeffs, &mut out);
        blockwise.extend_from_slice(&out);
    }

    let mut whole = SampleBlock::new(stream.len() - n);
    whole.history_mut().copy_from_slice(&stream[..stream.len() - n]);
    whole.fresh_mut().copy_from_slice(&stream[n..]);
    let mut single = vec![0u8; stream.len() - n];
    convolve(&mut whole, &coeffs, &mut single);

    // The single pass is only contiguous while its window stays in history.
    let valid = stream.len() - n - (coeffs.len() - 1);
    assert_eq!(blockwise[..valid], single[..valid]);
}

#[test]
fn timed_render_with_fade_to_wav() {
    let dir = std::env::temp_dir().join(format!("whitenoise-it-{}", std::process::id()));
    let path = dir.join("fade.wav");
    let settings = StreamSettings {
        sample_rate: 11_025,
        run_time: Some(Duration::from_secs(60)),
        fade_time: Some(Duration::from_secs(3)),
        seed: Some(3),
        ..StreamSettings::default()
    };
    let sink = WavSink::create(&path, settings.sample_rate).expect("create wav");
    let mut controller =
        StreamController::with_clock(&settings, sink, SampleClock::new(), CancellationToken::new());
    assert_eq!(controller.phase(), Phase::Running);
    assert_eq!(controller.run().expect("run"), StopReason::Completed);

    let reader = hound::WavReader::open(&path).expect("open wav");
    assert_eq!(reader.spec().sample_rate, 11_025);
    let frames = reader.duration() as usize;
    let expected = 63 * 11_025;
    assert!(
        frames >= expected && frames <= expected + 2 * BLOCK_SIZE,
        "{frames} frames"
    );
    std::fs::remove_dir_all(&dir).ok();
}
