#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

//! # knx-link
//!
//! KNXnet/IP client library: tunneling (unicast, UDP or TCP) and routing
//! (multicast) transports, with the cEMI frame codec they carry.
//!
//! - [`cemi`] — cEMI / TPDU / APDU encoding and decoding, group and
//!   individual address packing
//! - [`tunneling`] — connection-oriented sessions: connect handshake,
//!   heartbeat, sequence-numbered sends with acknowledge and
//!   retransmission, TCP stream reassembly
//! - [`routing`] — connectionless multicast: send pacing, `ROUTING_BUSY`
//!   flow control, lost-message notification, discovery responder
//! - [`discovery`] — gateway search and description queries
//!
//! The crate is `no_std`-first; network I/O goes through the
//! [`net::transport::AsyncTransport`] seam, with embassy-net adapters
//! behind the `embassy` feature and a scripted mock for tests. Datapoint
//! type (DPT) encoding is out of scope: group values enter and leave as
//! opaque bytes via [`cemi::GroupValue`].
//!
//! ## Example
//!
//! ```rust,no_run
//! # async fn demo<T: knx_link::net::transport::AsyncTransport>(transport: T) -> knx_link::Result<()> {
//! use knx_link::{ga, cemi::GroupValue, config::TunnelConfig, tunneling::TunnelConnection};
//!
//! let mut conn = TunnelConnection::new(transport, TunnelConfig::new(([192, 168, 0, 10], 3671).into()));
//! conn.connect().await?;
//! conn.write(ga!(1/1/1), &GroupValue::bit(true)).await?;
//! # Ok(())
//! # }
//! ```

// Macro modules (must be declared before use)
#[macro_use]
pub mod logging;
#[macro_use]
pub mod macros;

pub mod addressing;
pub mod cemi;
pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod tunneling;

// Re-export commonly used types
pub use addressing::{GroupAddress, IndividualAddress};
pub use cemi::{CemiFrame, GroupValue};
pub use config::{RoutingConfig, TunnelConfig};
pub use error::{KnxError, Result};
pub use event::Event;
pub use routing::RoutingConnection;
pub use tunneling::TunnelConnection;
