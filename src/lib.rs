//! Stratus - declarative infrastructure stack runner

pub mod attrs;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod output;
pub mod stack;

pub use attrs::{AttrValue, Attrs};
pub use config::StackConfig;
pub use coordinator::{Deployment, RecordState, ResourceOutput};
pub use error::{FixSuggestion, StratusError};
pub use output::{Fault, Output, OutputHandle, Settled};
