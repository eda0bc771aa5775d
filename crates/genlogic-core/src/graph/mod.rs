//! Data-flow graph validators: foreign-key cycle detection and per-table
//! calculated-column dependency analysis.

pub mod calc;
pub mod fk;
