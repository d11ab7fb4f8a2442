//! Async tunneling connection.
//!
//! [`TunnelConnection`] drives a [`TunnelSession`] over any
//! [`AsyncTransport`]: it performs the connect handshake, serializes sends
//! with the at-most-one-in-flight acknowledge pipeline (1 s timer, one
//! retransmission with the same sequence number), answers and verifies
//! heartbeats, and surfaces inbound traffic as typed [`Event`]s from
//! [`TunnelConnection::poll`].
//!
//! All state transitions happen on the caller's task; the connection owns
//! its transport exclusively.
//!
//! ```rust,no_run
//! # async fn demo<T: knx_link::net::transport::AsyncTransport>(transport: T) -> knx_link::Result<()> {
//! use knx_link::{ga, cemi::GroupValue, config::TunnelConfig, tunneling::TunnelConnection};
//!
//! let config = TunnelConfig::new(([192, 168, 0, 10], 3671).into());
//! let mut conn = TunnelConnection::new(transport, config);
//! conn.connect().await?;
//! conn.write(ga!(1/1/1), &GroupValue::bit(true)).await?;
//! conn.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use crate::addressing::GroupAddress;
use crate::cemi::{CemiFrame, GroupValue, LData, RawCemi};
use crate::config::TunnelConfig;
use crate::error::{KnxError, Result};
use crate::event::Event;
use crate::net::transport::AsyncTransport;
use crate::protocol::constants::{ServiceType, E_NO_ERROR, IPV4_UDP, MAX_FRAME_SIZE};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionHeader, ConnectionStateRequest,
    ConnectionStateResponse, Cri, DisconnectRequest, DisconnectResponse, FeatureGet, FeatureId,
    FeatureValue, TunnelingAck, TunnelingRequest, FEATURE_VALUE_MAX,
};
use crate::protocol::tunnel::{InboundSeq, SessionState, TunnelSession};
use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration, Instant, Timer};

/// Time left until `deadline`, zero when it has passed.
fn until(deadline: Instant) -> Duration {
    Duration::from_ticks(
        deadline
            .as_ticks()
            .saturating_sub(Instant::now().as_ticks()),
    )
}

/// Counters a session keeps about itself.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TunnelStats {
    /// Data requests transmitted, retransmissions included
    pub frames_sent: u32,
    /// Retransmissions after a missed acknowledge
    pub retransmissions: u32,
    /// Indications delivered to the consumer
    pub indications: u32,
    /// Duplicate requests re-acknowledged without redelivery
    pub duplicates: u32,
    /// Heartbeat probes sent
    pub heartbeats_sent: u32,
    /// Heartbeat probes that timed out
    pub heartbeats_missed: u32,
}

/// What handling one inbound frame produced.
enum Inbound {
    /// Nothing for the current caller (an event may have been queued)
    Nothing,
    /// The pending send was acknowledged
    AckMatched,
    /// A feature response arrived
    Feature(FeatureValue),
}

/// A tunneling (or device-management) connection to one gateway.
pub struct TunnelConnection<T: AsyncTransport> {
    transport: T,
    config: TunnelConfig,
    session: TunnelSession,
    pending: heapless::Deque<Event, 8>,
    next_heartbeat: Instant,
    heartbeat_deadline: Option<Instant>,
    stats: TunnelStats,
}

impl<T: AsyncTransport> TunnelConnection<T> {
    /// Wrap a transport with the given configuration. The connection
    /// starts closed; call [`Self::connect`].
    pub fn new(transport: T, config: TunnelConfig) -> Self {
        let session = TunnelSession::new(config.connection);
        Self {
            transport,
            config,
            session,
            pending: heapless::Deque::new(),
            next_heartbeat: Instant::now(),
            heartbeat_deadline: None,
            stats: TunnelStats::default(),
        }
    }

    /// Protocol state, for diagnostics.
    pub const fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Whether a channel is established.
    pub const fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// The individual address the gateway assigned, when it sent one.
    pub const fn assigned_address(&self) -> Option<crate::addressing::IndividualAddress> {
        self.session.assigned_address()
    }

    /// Session counters.
    pub const fn stats(&self) -> TunnelStats {
        self.stats
    }

    fn local_hpai(&self) -> Hpai {
        let endpoint = self.config.local_endpoint.or(self.transport.local_endpoint());
        match endpoint {
            Some(ep) => Hpai {
                protocol: IPV4_UDP,
                ip: ep.addr.octets(),
                port: ep.port,
            },
            None => Hpai::route_back(IPV4_UDP),
        }
    }

    fn push_event(&mut self, event: Event) {
        if self.pending.is_full() {
            let _ = self.pending.pop_front();
        }
        let _ = self.pending.push_back(event);
    }

    async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.send_to(frame, self.config.gateway).await
    }

    /// Open the transport and perform the connect handshake.
    ///
    /// Resolves with the `Connected` event data once a CONNECT_RESPONSE
    /// with status 0x00 arrives; fails with the gateway's status or with
    /// a connect timeout.
    pub async fn connect(&mut self) -> Result<Event> {
        self.transport.bind(0)?;
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let request = ConnectRequest::new(self.local_hpai(), self.config.connection);
        let n = request.build(&mut buf)?;
        self.session.start_connecting();
        self.send_frame(&buf[..n]).await?;

        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            let mut rx = [0u8; MAX_FRAME_SIZE];
            let received =
                with_timeout(until(deadline), self.transport.recv_from(&mut rx)).await;
            let Ok(received) = received else {
                self.session.reset();
                return Err(KnxError::connect_timeout());
            };
            let (len, _) = match received {
                Ok(r) => r,
                Err(err) => {
                    self.session.reset();
                    return Err(err);
                }
            };
            let Ok(frame) = KnxnetIpFrame::parse(&rx[..len]) else {
                continue;
            };
            if frame.service_type() != ServiceType::ConnectResponse {
                continue;
            }
            let Ok(response) = ConnectResponse::parse(frame.body()) else {
                continue;
            };
            self.session.on_connect_response(&response)?;
            let now = Instant::now();
            self.next_heartbeat = now + self.config.heartbeat_interval;
            self.heartbeat_deadline = None;
            knx_log!(
                info,
                "tunnel connected, channel {}",
                self.session.channel_id()
            );
            return Ok(Event::Connected {
                channel_id: self.session.channel_id(),
                assigned_address: self.session.assigned_address(),
            });
        }
    }

    /// [`Self::connect`] with the configured backoff between attempts.
    pub async fn connect_with_backoff(&mut self, attempts: u32) -> Result<Event> {
        let mut remaining = attempts.max(1);
        loop {
            match self.connect().await {
                Ok(event) => return Ok(event),
                Err(err) => {
                    remaining -= 1;
                    if remaining == 0 {
                        return Err(err);
                    }
                    knx_log!(warn, "connect failed, retrying after backoff");
                    Timer::after(self.config.connect_backoff).await;
                }
            }
        }
    }

    /// Send an encoded cEMI body through the tunnel.
    ///
    /// Resolves once the matching acknowledge arrives. One retransmission
    /// with the same sequence number is attempted after the acknowledge
    /// timeout; a second timeout fails with `AckTimeout` and forces the
    /// session closed.
    pub async fn send_cemi(&mut self, cemi: &[u8]) -> Result<()> {
        if !self.session.is_connected() {
            return Err(KnxError::NotConnected);
        }
        let header = ConnectionHeader::new(self.session.channel_id(), self.session.tx_seq());
        let request = match self.config.connection {
            Cri::Tunnel { .. } => TunnelingRequest::tunnel(header, cemi),
            Cri::DeviceManagement => TunnelingRequest::device_config(header, cemi),
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = request.build(&mut buf)?;

        for attempt in 0..2 {
            if attempt > 0 {
                self.stats.retransmissions += 1;
                knx_log!(warn, "ack missed, retransmitting seq {}", header.sequence);
            }
            self.send_frame(&buf[..n]).await?;
            self.stats.frames_sent += 1;

            let deadline = Instant::now() + self.config.ack_timeout;
            loop {
                let mut rx = [0u8; MAX_FRAME_SIZE];
                let received =
                    with_timeout(until(deadline), self.transport.recv_from(&mut rx)).await;
                let Ok(received) = received else {
                    break; // ack timer expired, retransmit or give up
                };
                let (len, _) = match received {
                    Ok(r) => r,
                    Err(err) => {
                        self.close();
                        return Err(err);
                    }
                };
                let raw = match heapless::Vec::<u8, MAX_FRAME_SIZE>::from_slice(&rx[..len]) {
                    Ok(raw) => raw,
                    Err(_) => continue,
                };
                match self.handle_inbound(&raw).await {
                    Ok(Inbound::AckMatched) => return Ok(()),
                    Ok(_) => {}
                    Err(err) if err.is_format() => {
                        knx_log!(debug, "dropping malformed frame");
                    }
                    Err(err) => {
                        self.close();
                        return Err(err);
                    }
                }
                if !self.session.is_connected() {
                    return Err(KnxError::transport_closed());
                }
            }
        }
        self.close();
        Err(KnxError::ack_timeout())
    }

    /// Send a constructed cEMI frame through the tunnel.
    pub async fn send(&mut self, frame: &CemiFrame) -> Result<()> {
        let bytes = frame.encode_vec()?;
        self.send_cemi(&bytes).await
    }

    /// Issue a `GroupValue_Write` to a group address.
    pub async fn write(&mut self, group: GroupAddress, value: &GroupValue) -> Result<()> {
        let frame = CemiFrame::DataRequest(LData::group_write(
            self.config.source_address,
            group,
            value,
        )?);
        self.send(&frame).await
    }

    /// Issue a `GroupValue_Read` to a group address. The answer arrives
    /// later as an indication event.
    pub async fn read(&mut self, group: GroupAddress) -> Result<()> {
        let frame = CemiFrame::DataRequest(LData::group_read(self.config.source_address, group)?);
        self.send(&frame).await
    }

    /// Read an interface feature value.
    pub async fn get_feature(
        &mut self,
        feature: FeatureId,
    ) -> Result<heapless::Vec<u8, FEATURE_VALUE_MAX>> {
        if !self.session.is_connected() {
            return Err(KnxError::NotConnected);
        }
        let sequence = self.session.tx_seq();
        let get = FeatureGet {
            header: ConnectionHeader::new(self.session.channel_id(), sequence),
            feature,
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = get.build(&mut buf)?;
        self.send_frame(&buf[..n]).await?;

        let deadline = Instant::now() + self.config.feature_timeout;
        loop {
            let mut rx = [0u8; MAX_FRAME_SIZE];
            let received =
                with_timeout(until(deadline), self.transport.recv_from(&mut rx)).await;
            let Ok(received) = received else {
                return Err(KnxError::feature_timeout());
            };
            let (len, _) = match received {
                Ok(r) => r,
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            };
            let raw = match heapless::Vec::<u8, MAX_FRAME_SIZE>::from_slice(&rx[..len]) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match self.handle_inbound(&raw).await {
                Ok(Inbound::Feature(value))
                    if value.feature == feature && value.header.sequence == sequence =>
                {
                    if !value.is_ok() {
                        return Err(KnxError::feature_status(value.status));
                    }
                    self.session.advance_tx();
                    return Ok(value.value);
                }
                Ok(_) => {}
                Err(err) if err.is_format() => {}
                Err(err) => {
                    self.close();
                    return Err(err);
                }
            }
        }
    }

    /// Tear the channel down. A missing DISCONNECT_RESPONSE is forced
    /// closed after the configured timeout.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Closed {
            return Ok(());
        }
        let request = DisconnectRequest {
            channel_id: self.session.channel_id(),
            control_endpoint: self.local_hpai(),
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = request.build(&mut buf)?;
        self.session.start_disconnecting();
        self.send_frame(&buf[..n]).await?;

        let deadline = Instant::now() + self.config.disconnect_timeout;
        loop {
            let mut rx = [0u8; MAX_FRAME_SIZE];
            let Ok(received) =
                with_timeout(until(deadline), self.transport.recv_from(&mut rx)).await
            else {
                break;
            };
            let Ok((len, _)) = received else {
                break;
            };
            if let Ok(frame) = KnxnetIpFrame::parse(&rx[..len]) {
                if frame.service_type() == ServiceType::DisconnectResponse {
                    break;
                }
            }
        }
        self.close();
        Ok(())
    }

    /// Wait for the next event: an indication, a confirmation, a feature
    /// info, or the session closing. Runs the heartbeat while idle.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if !self.session.is_connected() {
                return Err(KnxError::NotConnected);
            }

            // While a heartbeat response is outstanding its deadline is the
            // only timer; the periodic probe resumes afterwards.
            let deadline = self.heartbeat_deadline.unwrap_or(self.next_heartbeat);
            let mut rx = [0u8; MAX_FRAME_SIZE];
            match select(self.transport.recv_from(&mut rx), Timer::at(deadline)).await {
                Either::First(received) => {
                    let (len, _) = match received {
                        Ok(r) => r,
                        Err(err) => {
                            self.close();
                            self.push_event(Event::Disconnected);
                            return Err(err);
                        }
                    };
                    let raw = match heapless::Vec::<u8, MAX_FRAME_SIZE>::from_slice(&rx[..len]) {
                        Ok(raw) => raw,
                        Err(_) => continue,
                    };
                    match self.handle_inbound(&raw).await {
                        Ok(_) => {}
                        Err(err) if err.is_format() => {
                            knx_log!(debug, "dropping malformed frame");
                        }
                        Err(err) => {
                            self.close();
                            return Err(err);
                        }
                    }
                }
                Either::Second(()) => self.service_heartbeat().await?,
            }
        }
    }

    async fn service_heartbeat(&mut self) -> Result<()> {
        let now = Instant::now();
        if let Some(deadline) = self.heartbeat_deadline {
            if now >= deadline {
                let failures = self.session.heartbeat_missed();
                self.stats.heartbeats_missed += 1;
                knx_log!(warn, "heartbeat unanswered, strike {}", failures);
                if self.session.heartbeat_exhausted() {
                    self.close();
                    self.push_event(Event::Disconnected);
                    return Err(KnxError::heartbeat_timeout());
                }
                // Re-issue immediately, new response window
                self.send_heartbeat().await?;
            }
            return Ok(());
        }
        if now >= self.next_heartbeat {
            self.send_heartbeat().await?;
            self.next_heartbeat = now + self.config.heartbeat_interval;
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let request = ConnectionStateRequest {
            channel_id: self.session.channel_id(),
            control_endpoint: self.local_hpai(),
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = request.build(&mut buf)?;
        self.send_frame(&buf[..n]).await?;
        self.stats.heartbeats_sent += 1;
        self.heartbeat_deadline = Some(Instant::now() + self.config.heartbeat_timeout);
        Ok(())
    }

    /// Dispatch one received frame.
    async fn handle_inbound(&mut self, raw: &[u8]) -> Result<Inbound> {
        let frame = KnxnetIpFrame::parse(raw)?;
        let body = frame.body();
        match frame.service_type() {
            ServiceType::TunnelingRequest | ServiceType::DeviceConfigurationRequest => {
                let request = TunnelingRequest::parse(frame.service_type(), body)?;
                if !self.session.is_own_channel(request.header.channel_id) {
                    return Ok(Inbound::Nothing);
                }
                self.handle_data_request(&request).await?;
                Ok(Inbound::Nothing)
            }
            ServiceType::TunnelingAck | ServiceType::DeviceConfigurationAck => {
                let ack = TunnelingAck::parse(frame.service_type(), body)?;
                if self.session.on_ack(&ack)? {
                    Ok(Inbound::AckMatched)
                } else {
                    Ok(Inbound::Nothing)
                }
            }
            ServiceType::ConnectionStateRequest => {
                let request = ConnectionStateRequest::parse(body)?;
                let response = ConnectionStateResponse {
                    channel_id: request.channel_id,
                    status: E_NO_ERROR,
                };
                let mut buf = [0u8; MAX_FRAME_SIZE];
                let n = response.build(&mut buf)?;
                self.send_frame(&buf[..n]).await?;
                Ok(Inbound::Nothing)
            }
            ServiceType::ConnectionStateResponse => {
                let response = ConnectionStateResponse::parse(body)?;
                if self.session.is_own_channel(response.channel_id) && response.is_ok() {
                    self.session.heartbeat_answered();
                    self.heartbeat_deadline = None;
                }
                Ok(Inbound::Nothing)
            }
            ServiceType::DisconnectRequest => {
                let request = DisconnectRequest::parse(body)?;
                let response = DisconnectResponse {
                    channel_id: request.channel_id,
                    status: E_NO_ERROR,
                };
                let mut buf = [0u8; MAX_FRAME_SIZE];
                let n = response.build(&mut buf)?;
                self.send_frame(&buf[..n]).await?;
                self.close();
                self.push_event(Event::Disconnected);
                Ok(Inbound::Nothing)
            }
            ServiceType::DisconnectResponse => {
                self.close();
                self.push_event(Event::Disconnected);
                Ok(Inbound::Nothing)
            }
            ServiceType::TunnelingFeatureResponse => {
                Ok(Inbound::Feature(FeatureValue::parse(body)?))
            }
            ServiceType::TunnelingFeatureInfo => {
                let info = FeatureValue::parse(body)?;
                self.push_event(Event::FeatureInfo {
                    feature: info.feature,
                    value: info.value,
                });
                Ok(Inbound::Nothing)
            }
            _ => Ok(Inbound::Nothing),
        }
    }

    /// Acknowledge and deliver an inbound data request per the sequence
    /// rule: expected → ack + deliver + advance, previous → ack only,
    /// anything else → silent drop.
    async fn handle_data_request(&mut self, request: &TunnelingRequest<'_>) -> Result<()> {
        let ack_service = match request.service {
            ServiceType::DeviceConfigurationRequest => ServiceType::DeviceConfigurationAck,
            _ => ServiceType::TunnelingAck,
        };
        match self.session.classify_inbound(request.header.sequence) {
            InboundSeq::New => {
                self.send_ack(ack_service, request.header.sequence).await?;
                self.session.accept_inbound();
                self.deliver_cemi(request.cemi);
            }
            InboundSeq::Duplicate => {
                self.stats.duplicates += 1;
                self.send_ack(ack_service, request.header.sequence).await?;
            }
            InboundSeq::OutOfOrder => {
                knx_log!(
                    warn,
                    "dropping request with out-of-order seq {}",
                    request.header.sequence
                );
            }
        }
        Ok(())
    }

    async fn send_ack(&mut self, service: ServiceType, sequence: u8) -> Result<()> {
        let header = ConnectionHeader::new(self.session.channel_id(), sequence);
        let ack = match service {
            ServiceType::DeviceConfigurationAck => TunnelingAck::device_config(header, E_NO_ERROR),
            _ => TunnelingAck::tunnel(header, E_NO_ERROR),
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = ack.build(&mut buf)?;
        self.send_frame(&buf[..n]).await
    }

    fn deliver_cemi(&mut self, cemi: &[u8]) {
        let Ok(raw) = RawCemi::from_slice(cemi) else {
            knx_log!(warn, "oversize cEMI body dropped");
            return;
        };
        match CemiFrame::decode(cemi) {
            Ok(frame @ CemiFrame::DataConfirm(_)) => {
                self.push_event(Event::Confirmation { frame, raw });
            }
            Ok(frame) => {
                self.stats.indications += 1;
                self.push_event(Event::Indication { frame, raw });
            }
            Err(_) => {
                knx_log!(debug, "undecodable cEMI body passed through raw");
                self.push_event(Event::RawMessage(raw));
            }
        }
    }

    fn close(&mut self) {
        if self.session.state() != SessionState::Closed {
            knx_log!(info, "tunnel closed");
        }
        self.session.reset();
        self.heartbeat_deadline = None;
        self.transport.close();
    }

    /// Direct access to the transport, e.g. for scripted test doubles.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back, closing the session.
    pub fn into_transport(mut self) -> T {
        self.session.reset();
        self.transport
    }
}
