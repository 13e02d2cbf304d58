pub mod policy;
pub mod push;
pub mod quantizer;
pub mod resolver;

pub use policy::{Quantization, QuantizationPolicy};
pub use push::{ArtifactPusher, HfCliPusher, PushRequest};
pub use quantizer::{has_sentinel, CommandQuantizer, Quantizer, QuantizerSettings, AWQ_SENTINEL};
pub use resolver::{plan, QuantError, QuantPlan, QuantizationResolver, SlotPolicy, SlotQuantization};
