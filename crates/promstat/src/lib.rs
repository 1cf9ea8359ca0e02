//! Top-level facade crate for promstat.
//!
//! Re-exports the core primitives and the server library so users can depend on a single crate.

pub mod core {
    pub use promstat_core::*;
}

pub mod server {
    pub use promstat_server::*;
}
