//! Storage seams for flow state and client registrations.

pub mod client;
pub mod flow_state;

pub use client::{ClientRegistry, InMemoryClientRegistry};
pub use flow_state::{
    FlowPredicate, FlowStateStore, InMemoryFlowStateStore, TakeOutcome, spawn_flow_sweeper,
};
