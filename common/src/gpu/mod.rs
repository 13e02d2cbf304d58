pub mod probe;
pub mod tuning;

pub use probe::{classify_tier, probe, GpuProfile, GpuTier};
pub use tuning::{tune, TuningBundle, TuningOverrides};
