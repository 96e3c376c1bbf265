//! stackwright: typed cloud stack composition.
//!
//! One YAML declaration composes storage, identity, compute, schedule and
//! gateway stacks into a resource graph that is synthesized, planned against
//! BLAKE3 lock state and deployed phase by phase. The `portal` module holds the
//! browser page controllers that front the deployed backend.

pub mod cli;
pub mod core;
pub mod portal;
pub mod stacks;
pub mod tripwire;
