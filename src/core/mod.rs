//! Core stack logic: types, parsing, composition, resolution, planning, execution.

pub mod codegen;
pub mod compose;
pub mod executor;
pub mod graph;
pub mod naming;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
