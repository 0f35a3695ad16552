//! Playtime goals: per-scope registries and the scope handlers that decide
//! what playtime figure each registry is measured against.

mod registry;
mod scope;

pub use registry::{Goal, GoalRegistry};
pub use scope::{GoalScope, ScopeModule, ScopeSet};
