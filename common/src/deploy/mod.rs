pub mod budget;
pub mod mode;
pub mod stack;

pub use budget::allocate;
pub use mode::{select_mode, DeploymentMode, EngineSlot, ModeSelection};
pub use stack::{Engine, Stack};
