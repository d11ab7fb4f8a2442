//! Transport abstraction for the protocol engines.
//!
//! [`AsyncTransport`] is the datagram seam every connection talks through:
//! embassy-net UDP sockets, the TCP adapter (which re-slices the stream
//! into frames before handing them up), and the scripted mock for tests
//! all implement it. [`MulticastTransport`] adds the group-membership
//! operations the routing engine needs.

use crate::error::Result;
use crate::net::{IpEndpoint, Ipv4Addr};

/// Asynchronous frame-oriented transport.
///
/// One `recv_from` result must be exactly one KNXnet/IP frame; stream
/// transports perform their own reassembly below this trait.
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    /// Bind to a local port (0 = any). No-op for transports that bind at
    /// construction.
    fn bind(&mut self, _port: u16) -> Result<()> {
        Ok(())
    }

    /// Send one frame to `addr`.
    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()>;

    /// Receive one frame, returning its length and source.
    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)>;

    /// The bound local endpoint, when known. Used to fill HPAIs; the
    /// route-back form is used when this returns `None`.
    fn local_endpoint(&self) -> Option<IpEndpoint> {
        None
    }

    /// Whether the transport is usable.
    fn is_ready(&self) -> bool {
        true
    }

    /// Close and release resources.
    fn close(&mut self) {}
}

/// Group-membership operations for multicast transports.
#[allow(async_fn_in_trait)]
pub trait MulticastTransport: AsyncTransport {
    /// Join `group`, with address reuse, broadcast permitted, TTL and
    /// loopback per the implementation's configuration.
    async fn join_group(&mut self, group: Ipv4Addr) -> Result<()>;

    /// Leave `group`.
    async fn leave_group(&mut self, group: Ipv4Addr) -> Result<()>;
}
