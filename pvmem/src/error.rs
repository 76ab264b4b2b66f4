//! Failure conditions of early memory setup.
//!
//! Almost everything here is boot-fatal: the map under construction cannot
//! be rolled back, so callers report the error and halt. The only tolerated
//! failure is a declined single-frame release, which is logged at the call
//! site and never surfaces as a [`SetupError`].

use core::fmt;

use argon_hal::{HvError, Mfn, Pfn};
use argon_memmap::MapError;

/// Result alias for memory setup paths.
pub type SetupResult<T> = Result<T, SetupError>;

/// Why memory setup cannot continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    /// The hypervisor failed the region map request outright.
    MapFetch(HvError),
    /// The machine map call is unimplemented for the initial domain.
    MapFallbackPrivileged,
    /// The hypervisor returned a region map with no entries.
    EmptyMap,
    /// A bounded region or reservation table ran out of slots.
    TableFull,
    /// The extra-memory tracker ran out of slots.
    ExtraTableFull,
    /// The relocation record table ran out of slots.
    SwapTableFull,
    /// A relocated range would change its offset within a page.
    SwapOffsetMismatch,
    /// No RAM entry can donate space for a reserved-range relocation.
    NoSwapDonor,
    /// A fixed boot allocation is not covered by RAM in the map.
    NotUsable(&'static str),
    /// No unreserved RAM span of the needed size exists.
    NoFreeArea(&'static str),
    /// A translation-table store was rejected.
    TranslationUpdate { pfn: Pfn, mfn: Mfn },
    /// The hypervisor refused a machine-to-guest table update.
    MachineUpdate { mfn: Mfn, pfn: Pfn },
    /// The hypervisor refused a linear-mapping update.
    LinearUpdate { pfn: Pfn },
    /// A remap node does not record its own frame first.
    ChainCorrupt,
    /// The scratch window could not be re-aimed.
    Window(HvError),
}

impl From<MapError> for SetupError {
    fn from(_: MapError) -> Self {
        SetupError::TableFull
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::MapFetch(err) => write!(f, "region map fetch failed: {}", err),
            SetupError::MapFallbackPrivileged => {
                write!(f, "hypervisor offered no machine map to the initial domain")
            }
            SetupError::EmptyMap => write!(f, "hypervisor returned an empty region map"),
            SetupError::TableFull => write!(f, "region table capacity exceeded"),
            SetupError::ExtraTableFull => write!(f, "extra memory tracker capacity exceeded"),
            SetupError::SwapTableFull => write!(f, "relocation record capacity exceeded"),
            SetupError::SwapOffsetMismatch => {
                write!(f, "relocated range changes its page offset")
            }
            SetupError::NoSwapDonor => write!(f, "no RAM donor for a reserved-range relocation"),
            SetupError::NotUsable(component) => {
                write!(f, "{} conflicts with the region map", component)
            }
            SetupError::NoFreeArea(component) => write!(f, "no free area for {}", component),
            SetupError::TranslationUpdate { pfn, mfn } => {
                write!(f, "failed to set translation {} -> {}", pfn, mfn)
            }
            SetupError::MachineUpdate { mfn, pfn } => {
                write!(f, "failed to set machine mapping {} -> {}", mfn, pfn)
            }
            SetupError::LinearUpdate { pfn } => {
                write!(f, "failed to update linear mapping for {}", pfn)
            }
            SetupError::ChainCorrupt => {
                write!(f, "remap chain node does not record its own frame")
            }
            SetupError::Window(err) => write!(f, "scratch window: {}", err),
        }
    }
}
