//! Typed events surfaced by the connections.
//!
//! Both connection kinds hand events to the consumer as one sum type,
//! returned from their `poll()` futures. Errors are not an event variant:
//! fallible operations return `Result`, and a fatal inbound condition
//! surfaces as the `Err` of the `poll()` call that hit it.

use crate::addressing::IndividualAddress;
use crate::cemi::{CemiFrame, RawCemi};
use crate::protocol::routing::{RoutingBusy, RoutingLostMessage};
use crate::protocol::services::{FeatureId, FEATURE_VALUE_MAX};

/// One event from a tunneling or routing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A tunneling channel was established.
    Connected {
        /// Gateway-assigned channel id
        channel_id: u8,
        /// Individual address assigned via the CRD, when present
        assigned_address: Option<IndividualAddress>,
    },
    /// The session closed (gateway disconnect, heartbeat exhaustion or a
    /// local `disconnect()`).
    Disconnected,
    /// A cEMI indication arrived, decoded and raw.
    Indication {
        /// The decoded frame
        frame: CemiFrame,
        /// The bytes it was decoded from
        raw: RawCemi,
    },
    /// A cEMI confirmation (`L_Data.con`) arrived.
    Confirmation {
        /// The decoded frame
        frame: CemiFrame,
        /// The bytes it was decoded from
        raw: RawCemi,
    },
    /// A cEMI body arrived that did not decode; the bytes are passed
    /// through for consumers that want them.
    RawMessage(RawCemi),
    /// The interface announced a feature change.
    FeatureInfo {
        /// Feature identifier
        feature: FeatureId,
        /// Raw feature value
        value: heapless::Vec<u8, FEATURE_VALUE_MAX>,
    },
    /// A `ROUTING_BUSY` was received; sending pauses.
    RoutingBusy(RoutingBusy),
    /// A router reported dropped frames.
    RoutingLostMessage(RoutingLostMessage),
    /// The busy pause ended; sending resumes.
    RoutingReady,
    /// The local routing send queue overflowed; the newest frame was
    /// discarded and a lost-message notification multicast.
    QueueOverflow,
    /// A `ROUTING_SYSTEM_BROADCAST` body, passed through opaquely.
    SystemBroadcast(RawCemi),
}
