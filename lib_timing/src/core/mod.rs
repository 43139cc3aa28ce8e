//! # Core Services
//!
//! The distribution half of the pipeline: the event bus everything
//! publishes on, the relay router multiplexing car↔pit conversations, the
//! event model they exchange, and the supervisor that owns feed-pipeline
//! lifecycles.

pub mod bus;
pub mod events;
pub mod relay;
pub mod supervisor;
