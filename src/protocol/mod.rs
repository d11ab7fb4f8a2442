//! KNXnet/IP protocol layer.
//!
//! Wire structures for every service the transports use, the frame
//! envelope, and the sans-io state machines the async connections drive.

pub mod constants;
pub mod describe;
pub mod frame;
pub mod routing;
pub mod services;
pub mod tunnel;

pub use constants::*;
pub use frame::{FrameAssembler, FrameBuilder, Hpai, KnxnetIpFrame, KnxnetIpHeader, RawFrame};
pub use services::{ConnectionHeader, Cri, FeatureId};
pub use tunnel::{InboundSeq, SessionState, TunnelSession};
