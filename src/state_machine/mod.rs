//! Coarse-grained state machines.
//!
//! * [`session_sm`] — session lifecycle (starting → serving → closing).

pub mod session_sm;
