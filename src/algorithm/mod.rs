/// Per-level single-flight registry of provisioned indices
pub mod cache;
/// Block-by-block tile replacement
pub mod composer;
/// Request orchestration across frames
pub mod executor;
