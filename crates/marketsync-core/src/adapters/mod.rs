//! Provider adapters.
//!
//! | Adapter | Use |
//! |---------|-----|
//! | [`BridgeAdapter`] | JSON-over-HTTP bridge in front of the broker terminal session |
//! | [`SimulatedProvider`] | Deterministic in-memory provider for `--mock` and tests |

pub mod bridge;
pub mod simulated;

pub use bridge::BridgeAdapter;
pub use simulated::SimulatedProvider;
