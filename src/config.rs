//! Connection configuration.
//!
//! Plain structs with the protocol's timer constants as defaults. There
//! are no environment variables and no persisted state; everything is set
//! in code.

use crate::addressing::IndividualAddress;
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::KNXNETIP_PORT;
use crate::protocol::describe::{DeviceInfoDib, ServiceFamiliesDib};
use crate::protocol::services::Cri;
use embassy_time::Duration;

/// Tunneling session configuration.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Gateway endpoint
    pub gateway: IpEndpoint,
    /// Local endpoint announced in HPAIs; `None` uses the route-back form
    pub local_endpoint: Option<IpEndpoint>,
    /// Connection kind (tunnel link-layer by default)
    pub connection: Cri,
    /// Source address stamped on client-built frames
    pub source_address: IndividualAddress,
    /// CONNECT_RESPONSE wait
    pub connect_timeout: Duration,
    /// Pause between connect attempts in `connect_with_backoff`
    pub connect_backoff: Duration,
    /// Acknowledge wait per attempt (one retransmission follows)
    pub ack_timeout: Duration,
    /// Heartbeat period
    pub heartbeat_interval: Duration,
    /// CONNECTIONSTATE_RESPONSE wait
    pub heartbeat_timeout: Duration,
    /// DISCONNECT_RESPONSE wait before the socket is forced closed
    pub disconnect_timeout: Duration,
    /// TUNNELLING_FEATURE_RESPONSE wait
    pub feature_timeout: Duration,
}

impl TunnelConfig {
    /// Defaults for a gateway endpoint.
    pub fn new(gateway: IpEndpoint) -> Self {
        Self {
            gateway,
            local_endpoint: None,
            connection: Cri::tunnel(),
            source_address: IndividualAddress::UNASSIGNED,
            connect_timeout: Duration::from_secs(5),
            connect_backoff: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(1),
            feature_timeout: Duration::from_secs(3),
        }
    }

    /// Switch to a device-management connection.
    pub fn device_management(mut self) -> Self {
        self.connection = Cri::DeviceManagement;
        self
    }
}

/// Routing engine configuration.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Multicast group to join
    pub multicast_group: Ipv4Addr,
    /// UDP port (3671)
    pub port: u16,
    /// Answer SEARCH/DESCRIPTION requests with the identity below
    pub answer_discovery: bool,
    /// Identity announced to discovery clients
    pub device: DeviceInfoDib,
    /// Service families announced to discovery clients
    pub families: ServiceFamiliesDib,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            multicast_group: Ipv4Addr::KNX_MULTICAST,
            port: KNXNETIP_PORT,
            answer_discovery: true,
            device: DeviceInfoDib::new(
                IndividualAddress::UNASSIGNED,
                Ipv4Addr::KNX_MULTICAST.octets(),
                "knx-link",
            ),
            families: ServiceFamiliesDib::router(),
        }
    }
}
