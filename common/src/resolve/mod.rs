pub mod config;
pub mod pipeline;

pub use config::{ResolvedConfiguration, ResolvedSlot, ServerContract};
pub use pipeline::{build_draft, check, resolve, Resolution};
