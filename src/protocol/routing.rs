//! Routing service frames and the multicast flow-control state.
//!
//! Routing is connectionless: cEMI frames ride in `ROUTING_INDICATION`
//! multicasts, and congested routers push back with `ROUTING_BUSY` (pause
//! sending) and `ROUTING_LOST_MESSAGE` (frames were dropped). The
//! [`RoutingFlow`] struct keeps the flow-control bookkeeping free of I/O:
//! callers feed it the clock and received busy frames, and ask it when the
//! next send may go out.

use crate::cemi::ControlField2;
use crate::error::{KnxError, Result};
use crate::protocol::constants::ServiceType;
use crate::protocol::frame::FrameBuilder;
use embassy_time::{Duration, Instant};

/// Minimum gap between two multicast sends (50 telegrams/s ceiling).
pub const PACING_INTERVAL: Duration = Duration::from_millis(20);

/// Busy frames closer together than this bump the counter only once.
pub const BUSY_COUNT_GUARD: Duration = Duration::from_millis(10);

/// Per-count delay before the busy counter starts decaying.
pub const DECAY_SLOW_STEP: Duration = Duration::from_millis(100);

/// Tick interval of the decay chain once it has started.
pub const DECAY_TICK: Duration = Duration::from_millis(5);

/// Per-count random backoff span after a busy frame.
pub const BUSY_RANDOM_SPAN: Duration = Duration::from_millis(50);

/// `ROUTING_INDICATION` (0x0530) or `ROUTING_SYSTEM_BROADCAST` (0x0533):
/// a bare cEMI frame behind the header.
#[derive(Debug, Clone, Copy)]
pub struct RoutingIndication<'a> {
    /// Which of the two multicast data services this frame is
    pub service: ServiceType,
    /// Encoded cEMI frame
    pub cemi: &'a [u8],
}

impl<'a> RoutingIndication<'a> {
    /// A routing indication.
    pub const fn indication(cemi: &'a [u8]) -> Self {
        Self {
            service: ServiceType::RoutingIndication,
            cemi,
        }
    }

    /// A system broadcast.
    pub const fn system_broadcast(cemi: &'a [u8]) -> Self {
        Self {
            service: ServiceType::RoutingSystemBroadcast,
            cemi,
        }
    }

    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        FrameBuilder::new(self.service, self.cemi).build(buf)
    }
}

/// `ROUTING_LOST_MESSAGE` (0x0531).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingLostMessage {
    /// Router device state
    pub device_state: u8,
    /// Number of frames dropped since the last notification
    pub lost_count: u16,
}

impl RoutingLostMessage {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; 4];
        body[0] = 4;
        body[1] = self.device_state;
        body[2..4].copy_from_slice(&self.lost_count.to_be_bytes());
        FrameBuilder::new(ServiceType::RoutingLostMessage, &body).build(buf)
    }

    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            device_state: body[1],
            lost_count: u16::from_be_bytes([body[2], body[3]]),
        })
    }
}

/// `ROUTING_BUSY` (0x0532).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingBusy {
    /// Router device state
    pub device_state: u8,
    /// Requested pause in milliseconds
    pub wait_time_ms: u16,
    /// Busy control field; 0 addresses every sender
    pub control: u16,
}

impl RoutingBusy {
    /// Build the complete frame.
    pub fn build(&self, buf: &mut [u8]) -> Result<usize> {
        let mut body = [0u8; 6];
        body[0] = 6;
        body[1] = self.device_state;
        body[2..4].copy_from_slice(&self.wait_time_ms.to_be_bytes());
        body[4..6].copy_from_slice(&self.control.to_be_bytes());
        FrameBuilder::new(ServiceType::RoutingBusy, &body).build(buf)
    }

    /// Parse from the frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 6 {
            return Err(KnxError::truncated_frame());
        }
        Ok(Self {
            device_state: body[1],
            wait_time_ms: u16::from_be_bytes([body[2], body[3]]),
            control: u16::from_be_bytes([body[4], body[5]]),
        })
    }
}

/// Hop-count rule applied to every frame a router forwards: drop at zero,
/// decrement 1..=6, pass 7 unchanged.
///
/// Returns `None` when the frame must be dropped silently.
pub fn route_hop_count(ctrl2: ControlField2) -> Option<ControlField2> {
    match ctrl2.hop_count() {
        0 => None,
        h @ 1..=6 => Some(ctrl2.with_hop_count(h - 1)),
        _ => Some(ctrl2),
    }
}

/// Elapsed time between two instants, zero when `earlier` is ahead.
fn elapsed(now: Instant, earlier: Instant) -> Duration {
    Duration::from_ticks(now.as_ticks().saturating_sub(earlier.as_ticks()))
}

/// Flow-control state of one routing endpoint.
///
/// Tracks the busy counter N, the current pause window, the decay chain
/// and the send pacing clock. All methods take `now` so the state can be
/// driven by tests as readily as by a socket loop.
#[derive(Debug, Default)]
pub struct RoutingFlow {
    busy_count: u16,
    last_busy: Option<Instant>,
    busy_until: Option<Instant>,
    decay_at: Option<Instant>,
    last_send: Option<Instant>,
}

impl RoutingFlow {
    /// Fresh state: not busy, counter zero.
    pub const fn new() -> Self {
        Self {
            busy_count: 0,
            last_busy: None,
            busy_until: None,
            decay_at: None,
            last_send: None,
        }
    }

    /// The busy counter N.
    pub const fn busy_count(&self) -> u16 {
        self.busy_count
    }

    /// Whether sending is paused.
    pub fn is_busy(&self, now: Instant) -> bool {
        self.busy_until.is_some_and(|until| now < until)
    }

    /// Feed a received `ROUTING_BUSY`.
    ///
    /// `jitter_permille` is the random factor in [0, 1000) that scales the
    /// per-count backoff; the caller draws it so this state stays
    /// deterministic. Returns the total pause applied, when one was.
    pub fn on_busy(
        &mut self,
        now: Instant,
        busy: &RoutingBusy,
        jitter_permille: u16,
    ) -> Option<Duration> {
        let count_it = self
            .last_busy
            .is_none_or(|last| elapsed(now, last) > BUSY_COUNT_GUARD);
        if count_it {
            self.busy_count = self.busy_count.saturating_add(1);
        }
        self.last_busy = Some(now);

        // Any new busy restarts the decay schedule.
        self.decay_at = Some(now + DECAY_SLOW_STEP * u32::from(self.busy_count));

        if busy.control != 0 {
            return None;
        }
        let extra_ms = u64::from(self.busy_count)
            * BUSY_RANDOM_SPAN.as_millis()
            * u64::from(jitter_permille.min(999))
            / 1000;
        let total = Duration::from_millis(u64::from(busy.wait_time_ms) + extra_ms);
        self.busy_until = Some(now + total);
        Some(total)
    }

    /// Advance timers. Returns `true` when the busy pause ended on this
    /// call (the `routing_ready` transition).
    pub fn poll(&mut self, now: Instant) -> bool {
        let mut became_ready = false;
        if self.busy_until.is_some_and(|until| now >= until) {
            self.busy_until = None;
            became_ready = true;
        }
        while let Some(at) = self.decay_at {
            if now < at {
                break;
            }
            self.busy_count = self.busy_count.saturating_sub(1);
            self.decay_at = (self.busy_count > 0).then(|| at + DECAY_TICK);
        }
        became_ready
    }

    /// How long a dequeued frame must still wait before transmission:
    /// the rest of the busy pause, or the pacing gap.
    pub fn send_delay(&self, now: Instant) -> Duration {
        if let Some(until) = self.busy_until {
            if now < until {
                return elapsed(until, now);
            }
        }
        match self.last_send {
            Some(last) => {
                let since = elapsed(now, last);
                if since >= PACING_INTERVAL {
                    Duration::from_ticks(0)
                } else {
                    PACING_INTERVAL - since
                }
            }
            None => Duration::from_ticks(0),
        }
    }

    /// Record a transmission for the pacing clock.
    pub fn on_sent(&mut self, now: Instant) {
        self.last_send = Some(now);
    }

    /// The next instant at which [`Self::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.busy_until, self.decay_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
