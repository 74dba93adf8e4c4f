//! Event aggregation: raw events in, one batch per collection window out.

mod batch;
mod engine;

pub use batch::{Batch, OpenBatch};
pub use engine::{Aggregator, DeliveryPolicy, EngineState, EngineStats};
