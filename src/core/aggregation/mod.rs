pub mod aggregation_engine;
pub mod pipeline;
pub mod solar;
