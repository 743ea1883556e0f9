//! File routing
//!
//! Turns each remote listing entry into a [`RoutingDecision`] using an
//! ordered, declarative rule table. Classification is a pure function of
//! the entry, so it can be tested and previewed without any network I/O.

mod classifier;
mod rules;

pub use classifier::*;
pub use rules::*;
