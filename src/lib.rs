//! Ambient noise generator: uniform noise through a windowed-sinc FIR
//! lowpass, streamed in fixed-size blocks with live reconfiguration and an
//! optional linear fade-out.

pub mod audio_io;
pub mod clock;
pub mod command;
pub mod config;
pub mod controller;
pub mod convolve;
pub mod fade;
pub mod filter;
pub mod logging;
pub mod noise;
pub mod plot;
pub mod sink;

pub use clock::{Clock, SampleClock, WallClock};
pub use command::{Command, CommandChannel, CommandParser};
pub use config::{Config, StreamSettings};
pub use controller::{CancellationToken, Phase, RuntimeState, StopReason, StreamController};
pub use convolve::{convolve, SampleBlock, BLOCK_SIZE};
pub use fade::{amplitude_at, FadeContext};
pub use filter::{design, FilterSpec, WindowKind};
pub use noise::NoiseSource;
pub use plot::{FrequencyPlotter, PngPlotter};
pub use sink::{CpalSink, Sink, WavSink};
