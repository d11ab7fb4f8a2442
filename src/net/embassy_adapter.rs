//! embassy-net socket adapters.
//!
//! [`EmbassyUdpTransport`] wraps `embassy_net::udp::UdpSocket` for
//! tunneling, discovery and (with [`MulticastTransport`]) routing.
//! [`EmbassyTcpTransport`] wraps a TCP socket and re-slices the byte
//! stream into KNXnet/IP frames with a [`FrameAssembler`], so the
//! connections above see one frame per `recv_from` on both transports.

use crate::error::{KnxError, Result};
use crate::net::transport::{AsyncTransport, MulticastTransport};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::ROUTING_MULTICAST_TTL;
use crate::protocol::frame::FrameAssembler;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint as NetEndpoint, Stack};

fn to_net_endpoint(endpoint: IpEndpoint) -> NetEndpoint {
    let [a, b, c, d] = endpoint.addr.octets();
    NetEndpoint::new(IpAddress::v4(a, b, c, d), endpoint.port)
}

fn from_net_endpoint(endpoint: NetEndpoint) -> IpEndpoint {
    match endpoint.addr {
        IpAddress::Ipv4(addr) => {
            IpEndpoint::new(Ipv4Addr::from(addr.octets()), endpoint.port)
        }
        // KNXnet/IP is IPv4 only
        _ => IpEndpoint::UNSPECIFIED,
    }
}

/// UDP adapter over an embassy-net stack.
pub struct EmbassyUdpTransport<'a> {
    stack: Stack<'a>,
    socket: UdpSocket<'a>,
    bound: bool,
}

impl<'a> EmbassyUdpTransport<'a> {
    /// Wrap a socket built from caller-owned buffers.
    pub fn new(
        stack: Stack<'a>,
        rx_meta: &'a mut [PacketMetadata],
        rx_buffer: &'a mut [u8],
        tx_meta: &'a mut [PacketMetadata],
        tx_buffer: &'a mut [u8],
    ) -> Self {
        let socket = UdpSocket::new(stack, rx_meta, rx_buffer, tx_meta, tx_buffer);
        Self {
            stack,
            socket,
            bound: false,
        }
    }
}

impl AsyncTransport for EmbassyUdpTransport<'_> {
    fn bind(&mut self, port: u16) -> Result<()> {
        if self.bound {
            return Ok(());
        }
        self.socket.bind(port).map_err(|_| KnxError::bind_failed())?;
        self.bound = true;
        Ok(())
    }

    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        self.socket
            .send_to(data, to_net_endpoint(addr))
            .await
            .map_err(|_| KnxError::send_failed())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        let (n, meta) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|_| KnxError::receive_failed())?;
        Ok((n, from_net_endpoint(meta.endpoint)))
    }

    fn local_endpoint(&self) -> Option<IpEndpoint> {
        let config = self.stack.config_v4()?;
        let endpoint = self.socket.endpoint();
        Some(IpEndpoint::new(
            Ipv4Addr::from(config.address.address().octets()),
            endpoint.port,
        ))
    }

    fn is_ready(&self) -> bool {
        self.bound
    }

    fn close(&mut self) {
        self.socket.close();
        self.bound = false;
    }
}

impl MulticastTransport for EmbassyUdpTransport<'_> {
    async fn join_group(&mut self, group: Ipv4Addr) -> Result<()> {
        let [a, b, c, d] = group.octets();
        self.socket.set_hop_limit(Some(ROUTING_MULTICAST_TTL));
        self.stack
            .join_multicast_group(embassy_net::Ipv4Address::new(a, b, c, d))
            .map_err(|_| KnxError::multicast_join_failed())
    }

    async fn leave_group(&mut self, group: Ipv4Addr) -> Result<()> {
        let [a, b, c, d] = group.octets();
        self.stack
            .leave_multicast_group(embassy_net::Ipv4Address::new(a, b, c, d))
            .map_err(|_| KnxError::multicast_join_failed())
    }
}

/// TCP adapter over an embassy-net stack.
///
/// The KNXnet/IP gateway is the single peer; `send_to`/`recv_from`
/// addresses are checked against it, and received bytes pass through a
/// [`FrameAssembler`] so every `recv_from` yields exactly one frame.
pub struct EmbassyTcpTransport<'a> {
    socket: embassy_net::tcp::TcpSocket<'a>,
    assembler: FrameAssembler,
    peer: Option<IpEndpoint>,
}

impl<'a> EmbassyTcpTransport<'a> {
    /// Wrap a socket built from caller-owned buffers.
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let socket = embassy_net::tcp::TcpSocket::new(stack, rx_buffer, tx_buffer);
        Self {
            socket,
            assembler: FrameAssembler::new(),
            peer: None,
        }
    }

    /// Connect the stream to the gateway.
    pub async fn connect(&mut self, gateway: IpEndpoint) -> Result<()> {
        self.socket
            .connect(to_net_endpoint(gateway))
            .await
            .map_err(|_| KnxError::bind_failed())?;
        self.peer = Some(gateway);
        Ok(())
    }
}

impl AsyncTransport for EmbassyTcpTransport<'_> {
    async fn send_to(&mut self, data: &[u8], _addr: IpEndpoint) -> Result<()> {
        if self.peer.is_none() {
            return Err(KnxError::transport_closed());
        }
        let mut written = 0;
        while written < data.len() {
            let n = self
                .socket
                .write(&data[written..])
                .await
                .map_err(|_| KnxError::send_failed())?;
            if n == 0 {
                return Err(KnxError::transport_closed());
            }
            written += n;
        }
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        let peer = self.peer.ok_or_else(KnxError::transport_closed)?;
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                return Ok((len, peer));
            }
            let mut chunk = [0u8; 512];
            let n = self
                .socket
                .read(&mut chunk)
                .await
                .map_err(|_| KnxError::receive_failed())?;
            if n == 0 {
                return Err(KnxError::transport_closed());
            }
            self.assembler.push(&chunk[..n])?;
        }
    }

    fn is_ready(&self) -> bool {
        self.peer.is_some()
    }

    fn close(&mut self) {
        self.socket.close();
        self.assembler.clear();
        self.peer = None;
    }
}
