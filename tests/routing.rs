//! Routing engine behavior against a scripted transport: hop-count
//! handling, pacing, busy pauses and queue overflow.

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};
use knx_link::addressing::IndividualAddress;
use knx_link::cemi::{
    AddInfoBlock, Apci, Apdu, CemiFrame, ControlField1, ControlField2, LData, Tpci,
};
use knx_link::config::RoutingConfig;
use knx_link::event::Event;
use knx_link::ga;
use knx_link::net::mock_transport::{MockTransport, MOCK_PEER};
use knx_link::net::{IpEndpoint, Ipv4Addr};
use knx_link::routing::RoutingConnection;

const GROUP_ENDPOINT: IpEndpoint = IpEndpoint::new(Ipv4Addr::KNX_MULTICAST, 3671);

fn ldata_with_hops(hops: u8) -> CemiFrame {
    CemiFrame::DataIndication(LData {
        add_info: AddInfoBlock::empty(),
        ctrl1: ControlField1::default(),
        ctrl2: ControlField2::new(true, hops, 0).unwrap(),
        source: IndividualAddress::new(1, 1, 1).unwrap(),
        destination: ga!(1 / 1 / 1).raw(),
        apdu: Apdu::new(Tpci::UnnumberedData, Apci::GroupValueWrite, &[0x01]).unwrap(),
    })
}

fn routing_busy_frame(wait_ms: u16, control: u16) -> [u8; 12] {
    let wait = wait_ms.to_be_bytes();
    let ctrl = control.to_be_bytes();
    [
        0x06, 0x10, 0x05, 0x32, 0x00, 0x0C, // header
        0x06, 0x00, wait[0], wait[1], ctrl[0], ctrl[1],
    ]
}

async fn connected() -> RoutingConnection<MockTransport> {
    let mut conn = RoutingConnection::new(MockTransport::new(), RoutingConfig::default());
    conn.connect().await.unwrap();
    conn
}

#[test]
fn connect_joins_the_multicast_group() {
    block_on(async {
        let mut conn = connected().await;
        assert_eq!(
            conn.transport_mut().joined_groups(),
            &[Ipv4Addr::KNX_MULTICAST]
        );
        conn.disconnect().await.unwrap();
        assert!(conn.transport_mut().joined_groups().is_empty());
    });
}

#[test]
fn hop_count_rule_on_emitted_frames() {
    block_on(async {
        let mut conn = connected().await;

        // 6 → 5, 1 → 0, 7 → 7; hop 0 never leaves the host
        for hops in [6u8, 1, 7] {
            conn.send(&ldata_with_hops(hops)).await.unwrap();
        }
        conn.send(&ldata_with_hops(0)).await.unwrap();

        let sent = conn.transport_mut().sent();
        assert_eq!(sent.len(), 3);
        // cEMI CF2 sits at offset 9: 6 header + mc + add-info-len + CF1
        let hop = |frame: &[u8]| (frame[9] >> 4) & 0x07;
        assert_eq!(hop(&sent[0].0), 5);
        assert_eq!(hop(&sent[1].0), 0);
        assert_eq!(hop(&sent[2].0), 7);
        for (frame, to) in sent {
            assert_eq!(&frame[2..4], &[0x05, 0x30]);
            assert_eq!(*to, GROUP_ENDPOINT);
        }
        assert_eq!(conn.stats().dropped_hop_count, 1);
        assert_eq!(conn.stats().sent, 3);
    });
}

#[test]
fn consecutive_sends_keep_the_pacing_floor() {
    block_on(async {
        let mut conn = connected().await;
        let started = Instant::now();
        for _ in 0..3 {
            conn.send(&ldata_with_hops(7)).await.unwrap();
        }
        // Two 20 ms gaps between three transmissions
        assert!(Instant::now() - started >= Duration::from_millis(40));
        assert_eq!(conn.stats().sent, 3);
    });
}

#[test]
fn busy_pauses_then_routing_ready() {
    block_on(async {
        let mut conn = connected().await;
        conn.transport_mut().push_frame(&routing_busy_frame(30, 0));

        let event = conn.poll().await.unwrap();
        let Event::RoutingBusy(busy) = event else {
            panic!("expected busy event");
        };
        assert_eq!(busy.wait_time_ms, 30);
        assert_eq!(conn.busy_count(), 1);

        // The pause is 30 ms plus jitter in [0, 50) ms
        let started = Instant::now();
        let event = conn.poll().await.unwrap();
        assert_eq!(event, Event::RoutingReady);
        let waited = Instant::now() - started;
        assert!(waited >= Duration::from_millis(25), "waited {waited:?}");
        assert!(waited < Duration::from_millis(100), "waited {waited:?}");
    });
}

#[test]
fn busy_with_nonzero_control_does_not_pause() {
    block_on(async {
        let mut conn = connected().await;
        conn.transport_mut()
            .push_frame(&routing_busy_frame(5000, 0x0001));
        let Event::RoutingBusy(_) = conn.poll().await.unwrap() else {
            panic!("expected busy event");
        };
        assert_eq!(conn.busy_count(), 1);

        // Sends keep flowing
        conn.send(&ldata_with_hops(7)).await.unwrap();
        assert_eq!(conn.stats().sent, 1);
    });
}

#[test]
fn queue_overflow_drops_newest_and_notifies() {
    block_on(async {
        let mut conn = connected().await;
        // Park the engine with a long busy pause
        conn.transport_mut()
            .push_frame(&routing_busy_frame(60_000, 0));
        let Event::RoutingBusy(_) = conn.poll().await.unwrap() else {
            panic!("expected busy event");
        };
        conn.transport_mut().clear_sent();

        // The queue holds exactly 50 frames
        for _ in 0..50 {
            conn.send(&ldata_with_hops(7)).await.unwrap();
        }
        assert!(conn.transport_mut().sent().is_empty());

        // The 51st is discarded, a lost-message notification multicast
        let err = conn.send(&ldata_with_hops(7)).await.unwrap_err();
        assert!(matches!(err, knx_link::KnxError::QueueFull));

        let sent = conn.transport_mut().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].0.as_slice(),
            &[0x06, 0x10, 0x05, 0x31, 0x00, 0x0A, 0x04, 0x00, 0x00, 0x01]
        );
        assert_eq!(sent[0].1, GROUP_ENDPOINT);

        let event = conn.poll().await.unwrap();
        assert_eq!(event, Event::QueueOverflow);
        assert_eq!(conn.stats().lost_notifications, 1);
    });
}

#[test]
fn inbound_indication_is_decoded() {
    block_on(async {
        let mut conn = connected().await;
        let cemi = ldata_with_hops(6).encode_vec().unwrap();
        let mut frame = vec![0x06, 0x10, 0x05, 0x30, 0x00, 0x00];
        frame.extend_from_slice(&cemi);
        let total = frame.len() as u16;
        frame[4..6].copy_from_slice(&total.to_be_bytes());
        conn.transport_mut().push_frame(&frame);

        let Event::Indication { frame, raw } = conn.poll().await.unwrap() else {
            panic!("expected indication");
        };
        assert_eq!(raw.as_slice(), cemi.as_slice());
        let ldata = frame.as_ldata().unwrap();
        assert_eq!(ldata.destination_group().unwrap(), ga!(1 / 1 / 1));
        assert_eq!(conn.stats().received, 1);
    });
}

#[test]
fn lost_message_and_system_broadcast_events() {
    block_on(async {
        let mut conn = connected().await;
        conn.transport_mut().push_frame(&[
            0x06, 0x10, 0x05, 0x31, 0x00, 0x0A, 0x04, 0x00, 0x00, 0x05,
        ]);
        conn.transport_mut()
            .push_frame(&[0x06, 0x10, 0x05, 0x33, 0x00, 0x09, 0xAA, 0xBB, 0xCC]);

        let Event::RoutingLostMessage(lost) = conn.poll().await.unwrap() else {
            panic!("expected lost-message event");
        };
        assert_eq!(lost.lost_count, 5);

        let Event::SystemBroadcast(body) = conn.poll().await.unwrap() else {
            panic!("expected system broadcast");
        };
        assert_eq!(body.as_slice(), &[0xAA, 0xBB, 0xCC]);
    });
}

#[test]
fn search_request_is_answered_unicast() {
    block_on(async {
        let mut conn = connected().await;
        // SEARCH_REQUEST with an explicit response endpoint
        conn.transport_mut().push_frame(&[
            0x06, 0x10, 0x02, 0x01, 0x00, 0x0E, //
            0x08, 0x01, 192, 168, 1, 29, 0x30, 0x39,
        ]);
        // Give poll an event to return afterwards
        let cemi = ldata_with_hops(6).encode_vec().unwrap();
        let mut frame = vec![0x06, 0x10, 0x05, 0x30, 0x00, 0x00];
        frame.extend_from_slice(&cemi);
        let total = frame.len() as u16;
        frame[4..6].copy_from_slice(&total.to_be_bytes());
        conn.transport_mut().push_frame(&frame);

        let _ = conn.poll().await.unwrap();

        let sent = conn.transport_mut().sent();
        let (response, to) = &sent[0];
        assert_eq!(&response[2..4], &[0x02, 0x02]); // SEARCH_RESPONSE
        assert_eq!(*to, IpEndpoint::from(([192, 168, 1, 29], 12345)));
        // HPAI, then the device DIB with the IP medium code
        assert_eq!(response[14], 54);
        assert_eq!(response[15], 0x01);
        assert_eq!(response[16], 0x20);
    });
}

#[test]
fn route_back_search_answers_to_the_source() {
    block_on(async {
        let mut conn = connected().await;
        conn.transport_mut().push_frame(&[
            0x06, 0x10, 0x02, 0x03, 0x00, 0x0E, //
            0x08, 0x01, 0, 0, 0, 0, 0, 0,
        ]);
        let cemi = ldata_with_hops(6).encode_vec().unwrap();
        let mut frame = vec![0x06, 0x10, 0x05, 0x30, 0x00, 0x00];
        frame.extend_from_slice(&cemi);
        let total = frame.len() as u16;
        frame[4..6].copy_from_slice(&total.to_be_bytes());
        conn.transport_mut().push_frame(&frame);

        let _ = conn.poll().await.unwrap();

        let sent = conn.transport_mut().sent();
        let (response, to) = &sent[0];
        assert_eq!(&response[2..4], &[0x02, 0x04]); // DESCRIPTION_RESPONSE
        assert_eq!(*to, MOCK_PEER);
    });
}

#[test]
fn send_before_connect_is_rejected() {
    block_on(async {
        let mut conn = RoutingConnection::new(MockTransport::new(), RoutingConfig::default());
        let err = conn.send(&ldata_with_hops(6)).await.unwrap_err();
        assert!(matches!(err, knx_link::KnxError::NotConnected));
    });
}
