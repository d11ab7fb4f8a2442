//! Scripted transport for protocol tests.
//!
//! Responses queued with [`MockTransport::push_frame`] are returned by
//! `recv_from` in FIFO order; everything passed to `send_to` is recorded
//! for inspection. With the queue empty, `recv_from` blocks forever by
//! default so that timeout paths fire exactly as they would on a silent
//! network.

use crate::error::{KnxError, Result};
use crate::net::transport::{AsyncTransport, MulticastTransport};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::frame::RawFrame;

/// Endpoint the mock reports as the source of queued frames.
pub const MOCK_PEER: IpEndpoint = IpEndpoint::new(Ipv4Addr::new(192, 168, 0, 10), 3671);

/// What `recv_from` does when no response is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnEmpty {
    /// Never resolve, letting caller-side timeouts fire
    #[default]
    Block,
    /// Fail with a receive error
    Error,
}

/// Scripted [`AsyncTransport`] double.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: heapless::Deque<(RawFrame, IpEndpoint), 16>,
    sent: heapless::Vec<(RawFrame, IpEndpoint), 32>,
    joined: heapless::Vec<Ipv4Addr, 4>,
    on_empty: OnEmpty,
    ready: bool,
}

impl MockTransport {
    /// An empty, ready transport that blocks on an empty queue.
    pub fn new() -> Self {
        Self {
            responses: heapless::Deque::new(),
            sent: heapless::Vec::new(),
            joined: heapless::Vec::new(),
            on_empty: OnEmpty::Block,
            ready: true,
        }
    }

    /// Change the empty-queue behavior.
    pub fn on_empty(mut self, on_empty: OnEmpty) -> Self {
        self.on_empty = on_empty;
        self
    }

    /// Queue a frame to be returned by the next `recv_from`, reported as
    /// coming from [`MOCK_PEER`].
    pub fn push_frame(&mut self, bytes: &[u8]) {
        self.push_frame_from(bytes, MOCK_PEER);
    }

    /// Queue a frame with an explicit source endpoint.
    pub fn push_frame_from(&mut self, bytes: &[u8], from: IpEndpoint) {
        let frame = RawFrame::from_slice(bytes).expect("mock frame exceeds MAX_FRAME_SIZE");
        self.responses
            .push_back((frame, from))
            .expect("mock response queue full");
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> &[(RawFrame, IpEndpoint)] {
        &self.sent
    }

    /// The most recent sent frame.
    pub fn last_sent(&self) -> Option<&(RawFrame, IpEndpoint)> {
        self.sent.last()
    }

    /// Forget the sent history (keeps queued responses).
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }

    /// Groups currently joined.
    pub fn joined_groups(&self) -> &[Ipv4Addr] {
        &self.joined
    }

    /// Whether any response is still queued.
    pub fn has_responses(&self) -> bool {
        !self.responses.is_empty()
    }
}

impl AsyncTransport for MockTransport {
    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        let frame = RawFrame::from_slice(data).map_err(|_| KnxError::send_failed())?;
        self.sent
            .push((frame, addr))
            .map_err(|_| KnxError::send_failed())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        match self.responses.pop_front() {
            Some((frame, from)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok((len, from))
            }
            None => match self.on_empty {
                OnEmpty::Block => {
                    core::future::pending::<()>().await;
                    unreachable!()
                }
                OnEmpty::Error => Err(KnxError::receive_failed()),
            },
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn close(&mut self) {
        self.ready = false;
        self.responses.clear();
    }
}

impl MulticastTransport for MockTransport {
    async fn join_group(&mut self, group: Ipv4Addr) -> Result<()> {
        self.joined
            .push(group)
            .map_err(|_| KnxError::multicast_join_failed())
    }

    async fn leave_group(&mut self, group: Ipv4Addr) -> Result<()> {
        self.joined.retain(|&g| g != group);
        Ok(())
    }
}
