//! Tunneling session state machine.
//!
//! [`TunnelSession`] tracks the connection lifecycle, the channel id and
//! both sequence counters, free of any I/O:
//!
//! ```text
//! Closed → Connecting → Connected → Disconnecting → Closed
//!            ↓ (refused/timeout)      ↑ disconnect()
//!            Closed  ←──────── fatal error from any state
//! ```
//!
//! The async connection drives it with parsed frames and timer verdicts;
//! tests drive it directly.

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::protocol::services::{ConnectResponse, Cri, TunnelingAck};

/// Consecutive unanswered heartbeats that kill a session.
pub const HEARTBEAT_MAX_FAILURES: u8 = 3;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// No channel open
    Closed,
    /// CONNECT_REQUEST sent, awaiting the response
    Connecting,
    /// Channel established
    Connected,
    /// DISCONNECT_REQUEST sent, awaiting the response
    Disconnecting,
}

/// How an inbound data request's sequence number relates to the expected
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InboundSeq {
    /// The expected sequence: acknowledge, deliver, advance
    New,
    /// The previous sequence: acknowledge again, do not redeliver
    Duplicate,
    /// Anything else: drop without acknowledging
    OutOfOrder,
}

/// Protocol state of one tunneling (or device management) session.
#[derive(Debug)]
pub struct TunnelSession {
    cri: Cri,
    state: SessionState,
    channel_id: u8,
    tx_seq: u8,
    rx_seq: u8,
    assigned_address: Option<IndividualAddress>,
    heartbeat_failures: u8,
}

impl TunnelSession {
    /// A closed session for the given connection kind.
    pub const fn new(cri: Cri) -> Self {
        Self {
            cri,
            state: SessionState::Closed,
            channel_id: 0,
            tx_seq: 0,
            rx_seq: 0,
            assigned_address: None,
            heartbeat_failures: 0,
        }
    }

    /// The connection kind this session was created for.
    pub const fn cri(&self) -> Cri {
        self.cri
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a channel is established.
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected)
    }

    /// The gateway-assigned channel id (0 while closed).
    pub const fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// The individual address the gateway assigned, when it sent one.
    pub const fn assigned_address(&self) -> Option<IndividualAddress> {
        self.assigned_address
    }

    /// The sequence number the next outbound request will carry.
    pub const fn tx_seq(&self) -> u8 {
        self.tx_seq
    }

    /// The sequence number the next inbound request must carry.
    pub const fn rx_seq(&self) -> u8 {
        self.rx_seq
    }

    /// Mark the CONNECT_REQUEST as sent.
    pub fn start_connecting(&mut self) {
        self.state = SessionState::Connecting;
    }

    /// Apply a CONNECT_RESPONSE.
    ///
    /// On success the channel id is captured, both sequence counters reset
    /// and the state becomes `Connected`. A non-zero status closes the
    /// session and surfaces the gateway's code.
    pub fn on_connect_response(&mut self, response: &ConnectResponse) -> Result<()> {
        if !response.is_ok() {
            self.reset();
            return Err(KnxError::connect_rejected(response.status));
        }
        self.channel_id = response.channel_id;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.heartbeat_failures = 0;
        self.assigned_address = response.crd.and_then(|crd| crd.assigned_address);
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Whether a connection header belongs to this session.
    pub const fn is_own_channel(&self, channel_id: u8) -> bool {
        self.channel_id == channel_id
    }

    /// Classify an inbound data request's sequence number.
    pub fn classify_inbound(&self, sequence: u8) -> InboundSeq {
        if sequence == self.rx_seq {
            InboundSeq::New
        } else if sequence == self.rx_seq.wrapping_sub(1) {
            InboundSeq::Duplicate
        } else {
            InboundSeq::OutOfOrder
        }
    }

    /// Advance the receive counter after delivering a new request.
    pub fn accept_inbound(&mut self) {
        self.rx_seq = self.rx_seq.wrapping_add(1);
    }

    /// Apply an acknowledge frame to the in-flight request.
    ///
    /// Returns `true` when it matches the pending sequence on this
    /// channel, advancing the transmit counter. A matching ack with a
    /// non-zero status is the peer failing the request.
    pub fn on_ack(&mut self, ack: &TunnelingAck) -> Result<bool> {
        if !self.is_own_channel(ack.header.channel_id) || ack.header.sequence != self.tx_seq {
            return Ok(false);
        }
        if !ack.is_ok() {
            return Err(KnxError::ack_status(ack.status));
        }
        self.tx_seq = self.tx_seq.wrapping_add(1);
        Ok(true)
    }

    /// Advance the transmit counter for an exchange resolved without an
    /// acknowledge frame (feature get/response).
    pub(crate) fn advance_tx(&mut self) {
        self.tx_seq = self.tx_seq.wrapping_add(1);
    }

    /// Record an unanswered heartbeat; returns the failure count so far.
    pub fn heartbeat_missed(&mut self) -> u8 {
        self.heartbeat_failures += 1;
        self.heartbeat_failures
    }

    /// A heartbeat response arrived in time.
    pub fn heartbeat_answered(&mut self) {
        self.heartbeat_failures = 0;
    }

    /// Whether heartbeat failures have exhausted the session.
    pub const fn heartbeat_exhausted(&self) -> bool {
        self.heartbeat_failures >= HEARTBEAT_MAX_FAILURES
    }

    /// Mark the DISCONNECT_REQUEST as sent.
    pub fn start_disconnecting(&mut self) {
        self.state = SessionState::Disconnecting;
    }

    /// Drop to `Closed`, clearing channel state.
    pub fn reset(&mut self) {
        self.state = SessionState::Closed;
        self.channel_id = 0;
        self.tx_seq = 0;
        self.rx_seq = 0;
        self.assigned_address = None;
        self.heartbeat_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{ServiceType, E_NO_MORE_CONNECTIONS};
    use crate::protocol::services::ConnectionHeader;

    fn connected_session() -> TunnelSession {
        let mut session = TunnelSession::new(Cri::tunnel());
        session.start_connecting();
        let body = [
            0x42, 0x00, 0x08, 0x01, 192, 168, 0, 10, 0x0E, 0x57, 0x04, 0x04, 0x11, 0x05,
        ];
        session
            .on_connect_response(&ConnectResponse::parse(&body).unwrap())
            .unwrap();
        session
    }

    fn ack(channel: u8, seq: u8, status: u8) -> TunnelingAck {
        TunnelingAck {
            service: ServiceType::TunnelingAck,
            header: ConnectionHeader::new(channel, seq),
            status,
        }
    }

    #[test]
    fn lifecycle_reaches_connected() {
        let session = connected_session();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.channel_id(), 0x42);
        assert_eq!(session.tx_seq(), 0);
        assert_eq!(session.rx_seq(), 0);
        assert_eq!(
            session.assigned_address().unwrap(),
            IndividualAddress::new(1, 1, 5).unwrap()
        );
    }

    #[test]
    fn rejected_connect_closes_with_status() {
        let mut session = TunnelSession::new(Cri::tunnel());
        session.start_connecting();
        let body = [0x00, E_NO_MORE_CONNECTIONS];
        let err = session
            .on_connect_response(&ConnectResponse::parse(&body).unwrap())
            .unwrap_err();
        assert_eq!(session.state(), SessionState::Closed);
        match err {
            KnxError::Protocol(e) => assert_eq!(e.status(), E_NO_MORE_CONNECTIONS),
            _ => panic!("wrong category"),
        }
    }

    #[test]
    fn ack_advances_tx_seq_by_one() {
        let mut session = connected_session();
        assert!(session.on_ack(&ack(0x42, 0, 0)).unwrap());
        assert_eq!(session.tx_seq(), 1);
        assert!(session.on_ack(&ack(0x42, 1, 0)).unwrap());
        assert_eq!(session.tx_seq(), 2);
    }

    #[test]
    fn ack_for_other_sequence_or_channel_is_ignored() {
        let mut session = connected_session();
        assert!(!session.on_ack(&ack(0x42, 5, 0)).unwrap());
        assert!(!session.on_ack(&ack(0x13, 0, 0)).unwrap());
        assert_eq!(session.tx_seq(), 0);
    }

    #[test]
    fn ack_with_error_status_fails() {
        let mut session = connected_session();
        assert!(session.on_ack(&ack(0x42, 0, 0x29)).is_err());
    }

    #[test]
    fn tx_seq_wraps_mod_256() {
        let mut session = connected_session();
        for i in 0..=255u16 {
            assert!(session.on_ack(&ack(0x42, i as u8, 0)).unwrap());
        }
        assert_eq!(session.tx_seq(), 0);
    }

    #[test]
    fn inbound_classification_follows_rx_seq() {
        let mut session = connected_session();
        session.rx_seq = 5;
        assert_eq!(session.classify_inbound(5), InboundSeq::New);
        assert_eq!(session.classify_inbound(4), InboundSeq::Duplicate);
        assert_eq!(session.classify_inbound(6), InboundSeq::OutOfOrder);
        assert_eq!(session.classify_inbound(200), InboundSeq::OutOfOrder);
        session.accept_inbound();
        assert_eq!(session.rx_seq(), 6);
        assert_eq!(session.classify_inbound(5), InboundSeq::Duplicate);
    }

    #[test]
    fn inbound_classification_wraps() {
        let mut session = connected_session();
        session.rx_seq = 0;
        assert_eq!(session.classify_inbound(255), InboundSeq::Duplicate);
        session.rx_seq = 255;
        session.accept_inbound();
        assert_eq!(session.rx_seq(), 0);
    }

    #[test]
    fn heartbeat_strikes_accumulate_and_reset() {
        let mut session = connected_session();
        assert_eq!(session.heartbeat_missed(), 1);
        assert_eq!(session.heartbeat_missed(), 2);
        assert!(!session.heartbeat_exhausted());
        session.heartbeat_answered();
        assert_eq!(session.heartbeat_missed(), 1);
        session.heartbeat_missed();
        session.heartbeat_missed();
        assert!(session.heartbeat_exhausted());
    }

    #[test]
    fn reset_clears_channel_state() {
        let mut session = connected_session();
        session.accept_inbound();
        session.reset();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.channel_id(), 0);
        assert_eq!(session.rx_seq(), 0);
        assert!(session.assigned_address().is_none());
    }
}
