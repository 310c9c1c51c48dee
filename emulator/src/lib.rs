//! Multi-node emulator for the loss-test engine.
//!
//! Every node runs a real [`losstest_core::engine::LossTest`] on its own
//! thread against a simulated radio. Radios share one [`medium::Medium`] and
//! one virtual [`clock::SimTime`], so a round that takes minutes on air runs
//! in well under a second.

pub mod clock;
pub mod medium;
pub mod node;
pub mod radio;
pub mod session;
