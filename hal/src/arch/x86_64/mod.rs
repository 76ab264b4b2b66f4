//! # x86_64 Paravirtual Backend
//!
//! Hypercall plumbing for x86_64 guests that run paravirtualized, without
//! hardware virtualization assists.
//!
//! ## Module Organization
//!
//! - [`hypercall`]: Raw hypercall wrappers and wire structures
//! - [`pv`]: [`PvHypervisor`] and [`PvWindow`], the bare-metal
//!   implementations of the service traits in this crate

pub mod hypercall;
pub mod pv;

pub use pv::{PvHypervisor, PvWindow};
