//! Async routing engine.
//!
//! [`RoutingConnection`] speaks connectionless KNXnet/IP routing on a
//! multicast group: outbound frames pass the hop-count rule, a bounded
//! send queue and the 20 ms pacing floor; `ROUTING_BUSY` pauses the pump
//! per the flow-control rules in [`crate::protocol::routing`]; queue
//! overflow multicasts a `ROUTING_LOST_MESSAGE` and drops the newest
//! frame. When configured with a device identity it also answers
//! SEARCH/DESCRIPTION requests like a router node.
//!
//! The consumer drives the engine by looping on [`RoutingConnection::poll`];
//! [`RoutingConnection::send`] itself pumps the queue whenever the engine
//! is not paused.

use crate::cemi::{CemiFrame, RawCemi};
use crate::config::RoutingConfig;
use crate::error::{KnxError, Result};
use crate::event::Event;
use crate::net::transport::MulticastTransport;
use crate::net::IpEndpoint;
use crate::protocol::constants::{ServiceType, MAX_FRAME_SIZE};
use crate::protocol::describe::{DescribeResponse, EndpointRequest};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::routing::{
    route_hop_count, RoutingBusy, RoutingFlow, RoutingIndication, RoutingLostMessage,
};
use embassy_futures::select::{select, Either};
use embassy_time::{Instant, Timer};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Capacity of the bounded outbound queue.
pub const ROUTING_QUEUE_CAPACITY: usize = 50;

/// Counters the engine keeps about itself.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingStats {
    /// Indications multicast by this endpoint
    pub sent: u32,
    /// Indications received from the group
    pub received: u32,
    /// Outbound frames dropped by the hop-count-zero rule
    pub dropped_hop_count: u32,
    /// Lost-message notifications sent after queue overflow
    pub lost_notifications: u32,
    /// Multicast send failures (never fatal)
    pub overflow_to_ip: u32,
    /// Busy pauses honored
    pub busy_pauses: u32,
}

/// One multicast routing endpoint.
pub struct RoutingConnection<T: MulticastTransport> {
    transport: T,
    config: RoutingConfig,
    flow: RoutingFlow,
    queue: heapless::Deque<RawCemi, ROUTING_QUEUE_CAPACITY>,
    pending: heapless::Deque<Event, 8>,
    rng: SmallRng,
    connected: bool,
    stats: RoutingStats,
}

impl<T: MulticastTransport> RoutingConnection<T> {
    /// Wrap a transport with the given configuration. Call
    /// [`Self::connect`] before sending.
    pub fn new(transport: T, config: RoutingConfig) -> Self {
        Self {
            transport,
            config,
            flow: RoutingFlow::new(),
            queue: heapless::Deque::new(),
            pending: heapless::Deque::new(),
            rng: SmallRng::seed_from_u64(Instant::now().as_ticks()),
            connected: false,
            stats: RoutingStats::default(),
        }
    }

    /// Engine counters.
    pub const fn stats(&self) -> RoutingStats {
        self.stats
    }

    /// The flow-control busy counter N, for diagnostics.
    pub const fn busy_count(&self) -> u16 {
        self.flow.busy_count()
    }

    /// Bind the routing port and join the multicast group.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.bind(self.config.port)?;
        self.transport
            .join_group(self.config.multicast_group)
            .await?;
        self.connected = true;
        knx_log!(info, "routing endpoint joined group");
        Ok(())
    }

    /// Leave the group and release the socket. Queued frames are dropped.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            let _ = self
                .transport
                .leave_group(self.config.multicast_group)
                .await;
        }
        self.transport.close();
        self.connected = false;
        self.queue.clear();
        self.flow = RoutingFlow::new();
        Ok(())
    }

    fn group_endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.config.multicast_group, self.config.port)
    }

    fn push_event(&mut self, event: Event) {
        if self.pending.is_full() {
            let _ = self.pending.pop_front();
        }
        let _ = self.pending.push_back(event);
    }

    /// Enqueue a cEMI frame for multicast, applying the hop-count rule.
    ///
    /// A hop count of zero drops the frame silently. With the engine
    /// paused by `ROUTING_BUSY` the frame stays queued; a full queue
    /// discards it, multicasts a lost-message notification and fails with
    /// `QueueFull`.
    pub async fn send(&mut self, frame: &CemiFrame) -> Result<()> {
        if !self.connected {
            return Err(KnxError::NotConnected);
        }
        let routed = match frame {
            CemiFrame::DataRequest(ldata)
            | CemiFrame::DataConfirm(ldata)
            | CemiFrame::DataIndication(ldata) => {
                let Some(ctrl2) = route_hop_count(ldata.ctrl2) else {
                    self.stats.dropped_hop_count += 1;
                    return Ok(());
                };
                let mut ldata = ldata.clone();
                ldata.ctrl2 = ctrl2;
                match frame {
                    CemiFrame::DataRequest(_) => CemiFrame::DataRequest(ldata),
                    CemiFrame::DataConfirm(_) => CemiFrame::DataConfirm(ldata),
                    _ => CemiFrame::DataIndication(ldata),
                }
                .encode_vec()?
            }
            other => other.encode_vec()?,
        };
        self.enqueue(routed).await?;
        self.pump(true).await
    }

    /// Enqueue an already-encoded cEMI body. Parseable `L_Data` frames go
    /// through the hop-count rule; opaque bytes are queued unchanged.
    pub async fn send_raw(&mut self, cemi: &[u8]) -> Result<()> {
        if let Ok(frame) = CemiFrame::decode(cemi) {
            return self.send(&frame).await;
        }
        if !self.connected {
            return Err(KnxError::NotConnected);
        }
        let raw = RawCemi::from_slice(cemi).map_err(|_| KnxError::payload_too_large())?;
        self.enqueue(raw).await?;
        self.pump(true).await
    }

    async fn enqueue(&mut self, raw: RawCemi) -> Result<()> {
        if self.queue.push_back(raw).is_err() {
            self.notify_lost(1).await;
            self.push_event(Event::QueueOverflow);
            return Err(KnxError::QueueFull);
        }
        Ok(())
    }

    async fn notify_lost(&mut self, count: u16) {
        let lost = RoutingLostMessage {
            device_state: 0,
            lost_count: count,
        };
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let Ok(n) = lost.build(&mut buf) else {
            return;
        };
        let group = self.group_endpoint();
        if self.transport.send_to(&buf[..n], group).await.is_err() {
            self.stats.overflow_to_ip += 1;
        } else {
            self.stats.lost_notifications += 1;
        }
        knx_log!(warn, "routing queue overflow, lost {}", count);
    }

    /// Transmit queued frames as pacing allows. With `wait` the pacing
    /// gaps are awaited; otherwise only frames already due go out.
    async fn pump(&mut self, wait: bool) -> Result<()> {
        loop {
            let now = Instant::now();
            if self.queue.is_empty() || self.flow.is_busy(now) {
                return Ok(());
            }
            let delay = self.flow.send_delay(now);
            if delay.as_ticks() > 0 {
                if !wait {
                    return Ok(());
                }
                Timer::after(delay).await;
                continue;
            }
            // Head-of-queue transmit; order is preserved
            let Some(raw) = self.queue.pop_front() else {
                return Ok(());
            };
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let frame = RoutingIndication::indication(&raw);
            let n = frame.build(&mut buf)?;
            let group = self.group_endpoint();
            if self.transport.send_to(&buf[..n], group).await.is_err() {
                self.stats.overflow_to_ip += 1;
            } else {
                self.stats.sent += 1;
            }
            self.flow.on_sent(Instant::now());
        }
    }

    /// Wait for the next event, servicing flow-control timers and the
    /// outbound queue while idle.
    pub async fn poll(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if !self.connected {
                return Err(KnxError::NotConnected);
            }

            if self.flow.poll(Instant::now()) {
                self.push_event(Event::RoutingReady);
                continue;
            }
            self.pump(false).await?;

            let now = Instant::now();
            let mut deadline = self.flow.next_deadline();
            if !self.queue.is_empty() && !self.flow.is_busy(now) {
                let ready = now + self.flow.send_delay(now);
                deadline = Some(deadline.map_or(ready, |d| d.min(ready)));
            }

            let mut rx = [0u8; MAX_FRAME_SIZE];
            match deadline {
                Some(deadline) => {
                    match select(self.transport.recv_from(&mut rx), Timer::at(deadline)).await {
                        Either::First(received) => {
                            let (len, source) = received?;
                            self.handle_inbound(&rx[..len], source).await;
                        }
                        Either::Second(()) => {}
                    }
                }
                None => {
                    let (len, source) = self.transport.recv_from(&mut rx).await?;
                    self.handle_inbound(&rx[..len], source).await;
                }
            }
        }
    }

    /// Dispatch one received frame. Malformed frames are logged and
    /// dropped; they never kill the endpoint.
    async fn handle_inbound(&mut self, raw: &[u8], source: IpEndpoint) {
        let Ok(frame) = KnxnetIpFrame::parse(raw) else {
            knx_log!(debug, "dropping malformed routing frame");
            return;
        };
        let body = frame.body();
        match frame.service_type() {
            ServiceType::RoutingIndication => {
                self.stats.received += 1;
                let Ok(raw_cemi) = RawCemi::from_slice(body) else {
                    return;
                };
                match CemiFrame::decode(body) {
                    Ok(cemi) => self.push_event(Event::Indication {
                        frame: cemi,
                        raw: raw_cemi,
                    }),
                    Err(_) => self.push_event(Event::RawMessage(raw_cemi)),
                }
            }
            ServiceType::RoutingBusy => {
                let Ok(busy) = RoutingBusy::parse(body) else {
                    return;
                };
                let jitter = self.rng.gen_range(0..1000u16);
                if self
                    .flow
                    .on_busy(Instant::now(), &busy, jitter)
                    .is_some()
                {
                    self.stats.busy_pauses += 1;
                }
                self.push_event(Event::RoutingBusy(busy));
            }
            ServiceType::RoutingLostMessage => {
                let Ok(lost) = RoutingLostMessage::parse(body) else {
                    return;
                };
                self.push_event(Event::RoutingLostMessage(lost));
            }
            ServiceType::RoutingSystemBroadcast => {
                let Ok(raw_cemi) = RawCemi::from_slice(body) else {
                    return;
                };
                self.push_event(Event::SystemBroadcast(raw_cemi));
            }
            ServiceType::SearchRequest if self.config.answer_discovery => {
                self.answer_search(body, source).await;
            }
            ServiceType::DescriptionRequest if self.config.answer_discovery => {
                self.answer_description(body, source).await;
            }
            _ => {}
        }
    }

    fn reply_endpoint(request: &EndpointRequest, source: IpEndpoint) -> IpEndpoint {
        if request.endpoint.is_route_back() {
            source
        } else {
            IpEndpoint::from((request.endpoint.ip, request.endpoint.port))
        }
    }

    fn local_hpai(&self) -> Hpai {
        match self.transport.local_endpoint() {
            Some(ep) => Hpai::udp(ep.addr.octets(), ep.port),
            None => Hpai::udp([0, 0, 0, 0], self.config.port),
        }
    }

    async fn answer_search(&mut self, body: &[u8], source: IpEndpoint) {
        let Ok(request) = EndpointRequest::parse(ServiceType::SearchRequest, body) else {
            return;
        };
        let response = DescribeResponse::search(
            self.local_hpai(),
            self.config.device.clone(),
            self.config.families.clone(),
        );
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let Ok(n) = response.build(&mut buf) else {
            return;
        };
        let to = Self::reply_endpoint(&request, source);
        if self.transport.send_to(&buf[..n], to).await.is_err() {
            self.stats.overflow_to_ip += 1;
        }
    }

    async fn answer_description(&mut self, body: &[u8], source: IpEndpoint) {
        let Ok(request) = EndpointRequest::parse(ServiceType::DescriptionRequest, body) else {
            return;
        };
        let response =
            DescribeResponse::description(self.config.device.clone(), self.config.families.clone());
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let Ok(n) = response.build(&mut buf) else {
            return;
        };
        let to = Self::reply_endpoint(&request, source);
        if self.transport.send_to(&buf[..n], to).await.is_err() {
            self.stats.overflow_to_ip += 1;
        }
    }

    /// Direct access to the transport, e.g. for scripted test doubles.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give the transport back.
    pub fn into_transport(self) -> T {
        self.transport
    }
}
