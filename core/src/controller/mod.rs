//! Thin orchestration over the record store and the flag engine

mod context;
mod flags;
mod records;

pub use context::RequestContext;
pub use flags::{FlagController, FlagEvaluator};
pub use records::RecordController;
