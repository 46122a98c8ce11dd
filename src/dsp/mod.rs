//! DSP Library
//!
//! Numeric building blocks shared by the orchestrator (transition
//! feasibility) and the renderer (execution): fade curves, band-split
//! filters, envelopes, loop extension, ducking, and the master bus.
//! Stateful processors implement the `Effect` trait.

mod compressor;
mod crossfade;
mod curves;
mod ducking;
mod effect;
mod envelope;
mod filter;
mod gain;
mod limiter;
mod loops;
mod master_bus;
mod primitives;

pub use compressor::{Compressor, CompressorParams};
pub use crossfade::{apply_fade, crossfade, BassSwap, FadeDirection};
pub use curves::{fade_position, CurveFamily};
pub use ducking::{duck_background, duck_gains, DuckingConfig};
pub use effect::Effect;
pub use envelope::{expand_envelope, mean_energy, rms_envelope};
pub use filter::{BiquadFilter, FilterType, BUTTERWORTH_Q};
pub use gain::{apply_gain_curve, apply_gains, normalize_rms};
pub use limiter::{Limiter, LimiterParams};
pub use loops::{extend, select_loop_region, LoopConfig, LoopExtension, LoopRegion};
pub use master_bus::{MasterBus, MasterBusConfig};
pub use primitives::{check_stretch, needs_alignment, stretch_ratio, DspPrimitives, OverlapAddPrimitives};
