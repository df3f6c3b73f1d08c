//! Safety pipeline: command-risk classification, whitelist/policy engine,
//! secret redaction, and the pipeline that composes them (C1, C2, C7).

pub mod pipeline;
pub mod policy;
pub mod redact;
pub mod risk;

pub use pipeline::{Mode, SafetyDecision, SafetyPipeline};
pub use policy::{PolicyDecision, Whitelist, WhitelistRule};
pub use risk::{Risk, RiskVerdict};
