//! Gateway discovery.
//!
//! [`search`] multicasts a `SEARCH_REQUEST` and collects every
//! `SEARCH_RESPONSE` that arrives within the window; [`describe`] asks one
//! endpoint for its `DESCRIPTION_RESPONSE`. Both work over any
//! [`AsyncTransport`] and report gateways as [`GatewayInfo`].

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::{ServiceType, KNXNETIP_PORT, MAX_FRAME_SIZE};
use crate::protocol::describe::{DescribeResponse, DeviceInfoDib, EndpointRequest, ServiceFamiliesDib};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use embassy_time::{with_timeout, Duration, Instant};

/// Default collection window for [`search`].
pub const SEARCH_WINDOW: Duration = Duration::from_secs(3);

/// `DESCRIPTION_RESPONSE` wait in [`describe`].
pub const DESCRIPTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum number of gateways one search collects.
pub const SEARCH_RESULTS_MAX: usize = 8;

/// One discovered KNXnet/IP server.
#[derive(Debug, Clone)]
pub struct GatewayInfo {
    /// Control endpoint to connect to
    pub endpoint: IpEndpoint,
    /// Device information DIB
    pub device: DeviceInfoDib,
    /// Announced service families
    pub families: ServiceFamiliesDib,
}

fn local_hpai<T: AsyncTransport>(transport: &T) -> Hpai {
    match transport.local_endpoint() {
        Some(ep) => Hpai::udp(ep.addr.octets(), ep.port),
        None => Hpai::route_back(0x01),
    }
}

fn time_left(deadline: Instant) -> Duration {
    Duration::from_ticks(
        deadline
            .as_ticks()
            .saturating_sub(Instant::now().as_ticks()),
    )
}

/// Multicast a search and collect responders for `window`.
///
/// Returns the gateways heard from, in arrival order, without duplicates.
pub async fn search<T: AsyncTransport>(
    transport: &mut T,
    window: Duration,
) -> Result<heapless::Vec<GatewayInfo, SEARCH_RESULTS_MAX>> {
    transport.bind(0)?;
    let request = EndpointRequest::search(local_hpai(transport));
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = request.build(&mut buf)?;
    let group = IpEndpoint::new(Ipv4Addr::KNX_MULTICAST, KNXNETIP_PORT);
    transport.send_to(&buf[..n], group).await?;

    let mut found: heapless::Vec<GatewayInfo, SEARCH_RESULTS_MAX> = heapless::Vec::new();
    let deadline = Instant::now() + window;
    loop {
        let mut rx = [0u8; MAX_FRAME_SIZE];
        let Ok(received) = with_timeout(time_left(deadline), transport.recv_from(&mut rx)).await
        else {
            return Ok(found);
        };
        let Ok((len, source)) = received else {
            return Ok(found);
        };
        let Some(gateway) = parse_response(ServiceType::SearchResponse, &rx[..len], source) else {
            continue;
        };
        if found.iter().any(|g| g.endpoint == gateway.endpoint) {
            continue;
        }
        if found.push(gateway).is_err() {
            return Ok(found);
        }
    }
}

/// Ask `gateway` for its description.
pub async fn describe<T: AsyncTransport>(
    transport: &mut T,
    gateway: IpEndpoint,
) -> Result<GatewayInfo> {
    transport.bind(0)?;
    let request = EndpointRequest::description(local_hpai(transport));
    let mut buf = [0u8; MAX_FRAME_SIZE];
    let n = request.build(&mut buf)?;
    transport.send_to(&buf[..n], gateway).await?;

    let deadline = Instant::now() + DESCRIPTION_TIMEOUT;
    loop {
        let mut rx = [0u8; MAX_FRAME_SIZE];
        let Ok(received) = with_timeout(time_left(deadline), transport.recv_from(&mut rx)).await
        else {
            return Err(KnxError::description_timeout());
        };
        let (len, source) = received?;
        if let Some(info) = parse_response(ServiceType::DescriptionResponse, &rx[..len], source) {
            return Ok(info);
        }
    }
}

fn parse_response(
    expected: ServiceType,
    raw: &[u8],
    source: IpEndpoint,
) -> Option<GatewayInfo> {
    let frame = KnxnetIpFrame::parse(raw).ok()?;
    if frame.service_type() != expected {
        return None;
    }
    let response = DescribeResponse::parse(expected, frame.body()).ok()?;
    let endpoint = match response.control_endpoint {
        Some(hpai) if !hpai.is_route_back() => IpEndpoint::from((hpai.ip, hpai.port)),
        _ => source,
    };
    Some(GatewayInfo {
        endpoint,
        device: response.device,
        families: response.families,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::IndividualAddress;
    use crate::net::mock_transport::{MockTransport, MOCK_PEER};
    use embassy_futures::block_on;

    fn search_response_bytes() -> heapless::Vec<u8, MAX_FRAME_SIZE> {
        let response = DescribeResponse::search(
            Hpai::udp([192, 168, 0, 10], 3671),
            DeviceInfoDib::new(
                IndividualAddress::new(1, 0, 0).unwrap(),
                Ipv4Addr::KNX_MULTICAST.octets(),
                "gateway",
            ),
            ServiceFamiliesDib::router(),
        );
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = response.build(&mut buf).unwrap();
        heapless::Vec::from_slice(&buf[..n]).unwrap()
    }

    #[test]
    fn search_collects_and_dedupes() {
        block_on(async {
            let mut mock = MockTransport::new();
            let bytes = search_response_bytes();
            mock.push_frame(&bytes);
            mock.push_frame(&bytes); // duplicate announcement

            let found = search(&mut mock, Duration::from_millis(50)).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].endpoint, IpEndpoint::from(([192, 168, 0, 10], 3671)));
            assert_eq!(found[0].device.friendly_name.as_str(), "gateway");

            // The request went to the multicast group
            let (sent, to) = &mock.sent()[0];
            assert_eq!(*to, IpEndpoint::new(Ipv4Addr::KNX_MULTICAST, 3671));
            assert_eq!(&sent[2..4], &[0x02, 0x01]);
        });
    }

    #[test]
    fn describe_times_out_without_answer() {
        block_on(async {
            let mut mock = MockTransport::new();
            let err = describe(&mut mock, MOCK_PEER).await.unwrap_err();
            assert!(err.is_timeout());
        });
    }

    #[test]
    fn describe_parses_response() {
        block_on(async {
            let mut mock = MockTransport::new();
            let response = DescribeResponse::description(
                DeviceInfoDib::new(
                    IndividualAddress::new(1, 0, 0).unwrap(),
                    Ipv4Addr::KNX_MULTICAST.octets(),
                    "gateway",
                ),
                ServiceFamiliesDib::router(),
            );
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let n = response.build(&mut buf).unwrap();
            mock.push_frame(&buf[..n]);

            let info = describe(&mut mock, MOCK_PEER).await.unwrap();
            // Description responses carry no HPAI; the source answers
            assert_eq!(info.endpoint, MOCK_PEER);
            assert!(info.families.supports(0x05));
        });
    }
}
