//! # Architecture Backends
//!
//! Bare-metal implementations of the hypervisor call boundary and the
//! early mapping window. Only compiled for freestanding targets; host
//! builds use the scripted doubles that live with the tests instead.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::{PvHypervisor, PvWindow};
