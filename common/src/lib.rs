pub mod deploy;
pub mod error;
pub mod gpu;
pub mod inputs;
pub mod launch;
pub mod models;
pub mod quant;
pub mod resolve;
pub mod tracing;
pub mod validate;

pub use error::{DeployError, Result, SoftWarning};
