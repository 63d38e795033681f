//! Graph execution: the fan-out group, the quality gate, and the executor
//! that wires stages into the bounded reflection loop.

pub mod executor;
pub mod gate;
pub mod group;

pub use executor::{GraphExecutor, PipelinePhase};
pub use gate::{score, Dimension, GateDecision, QualityBreakdown, QualityGate, QualityWeights};
pub use group::FanOutGroup;
