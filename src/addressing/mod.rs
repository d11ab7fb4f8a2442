//! KNX addressing.
//!
//! A KNX address is 16 bits; whether it names a physical device or a group
//! is decided by the address-type bit of the enclosing cEMI frame, not by
//! the value itself:
//! - [`IndividualAddress`] — physical device, rendered "Area.Line.Device"
//! - [`GroupAddress`] — logical group, rendered "Main/Middle/Sub" (3-level)
//!   or "Main/Sub" (2-level)

pub mod group;
pub mod individual;

#[doc(inline)]
pub use group::GroupAddress;
#[doc(inline)]
pub use individual::IndividualAddress;
