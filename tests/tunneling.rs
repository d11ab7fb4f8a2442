//! Tunneling session exchanges against a scripted transport.
//!
//! These tests replay the gateway side byte-for-byte: the connect
//! handshake, the acknowledged write, the retransmission path and the
//! duplicate-suppression rule.

use embassy_futures::block_on;
use embassy_time::{Duration, Instant};
use knx_link::addressing::IndividualAddress;
use knx_link::cemi::GroupValue;
use knx_link::config::TunnelConfig;
use knx_link::event::Event;
use knx_link::ga;
use knx_link::net::mock_transport::MockTransport;
use knx_link::net::IpEndpoint;
use knx_link::protocol::services::FeatureId;
use knx_link::protocol::SessionState;
use knx_link::tunneling::TunnelConnection;

const GATEWAY: ([u8; 4], u16) = ([192, 168, 0, 10], 3671);

/// CONNECT_RESPONSE: channel 0x42, status ok, CRD without a useful
/// address (0.0.0).
const CONNECT_RESPONSE: [u8; 20] = [
    0x06, 0x10, 0x02, 0x06, 0x00, 0x14, // header
    0x42, 0x00, // channel, status
    0x08, 0x01, 192, 168, 0, 10, 0x0E, 0x57, // data endpoint
    0x04, 0x04, 0x00, 0x00, // CRD
];

/// TUNNELLING_ACK for channel 0x42, sequence 0.
const ACK_SEQ_0: [u8; 10] = [0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x42, 0x00, 0x00];

fn config() -> TunnelConfig {
    let mut config = TunnelConfig::new(IpEndpoint::from(GATEWAY));
    // Announce a fixed local endpoint so the request bytes are stable
    config.local_endpoint = Some(IpEndpoint::from(([192, 168, 0, 5], 0xC350)));
    config
}

async fn connected(mut mock: MockTransport) -> TunnelConnection<MockTransport> {
    mock.push_frame(&CONNECT_RESPONSE);
    let mut conn = TunnelConnection::new(mock, config());
    conn.connect().await.unwrap();
    conn
}

/// An L_Data.ind for group 1/1/1 from 1.1.1 carrying `value`.
fn indication_request(seq: u8, value: u8) -> [u8; 21] {
    [
        0x06, 0x10, 0x04, 0x20, 0x00, 0x15, // header
        0x04, 0x42, seq, 0x00, // connection header
        0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x09, 0x01, 0x01, 0x00, 0x80 | value,
    ]
}

#[test]
fn connect_then_write_reference_bytes() {
    block_on(async {
        let mut mock = MockTransport::new();
        mock.push_frame(&CONNECT_RESPONSE);
        let mut conn = TunnelConnection::new(mock, config());

        let event = conn.connect().await.unwrap();
        assert_eq!(
            event,
            Event::Connected {
                channel_id: 0x42,
                assigned_address: Some(IndividualAddress::UNASSIGNED),
            }
        );
        assert_eq!(conn.state(), SessionState::Connected);

        // CONNECT_REQUEST: both HPAIs 192.168.0.5:50000, tunnel CRI
        let expected_connect: &[u8] = &[
            0x06, 0x10, 0x02, 0x05, 0x00, 0x1A, //
            0x08, 0x01, 0xC0, 0xA8, 0x00, 0x05, 0xC3, 0x50, //
            0x08, 0x01, 0xC0, 0xA8, 0x00, 0x05, 0xC3, 0x50, //
            0x04, 0x04, 0x02, 0x00,
        ];

        // write 1/1/1 := true, sequence 0
        let expected_write: &[u8] = &[
            0x06, 0x10, 0x04, 0x20, 0x00, 0x15, // header, total 21
            0x04, 0x42, 0x00, 0x00, // connection header
            0x11, 0x00, 0xBC, 0xE0, 0x00, 0x00, 0x09, 0x01, 0x01, 0x00, 0x81,
        ];

        conn_transport(&mut conn).push_frame(&ACK_SEQ_0);
        conn.write(ga!(1 / 1 / 1), &GroupValue::bit(true))
            .await
            .unwrap();

        let sent = conn_transport(&mut conn).sent();
        assert_eq!(sent[0].0.as_slice(), expected_connect);
        assert_eq!(sent[0].1, IpEndpoint::from(GATEWAY));
        assert_eq!(sent[1].0.as_slice(), expected_write);
        assert_eq!(conn.stats().frames_sent, 1);
        assert_eq!(conn.stats().retransmissions, 0);
    });
}

#[test]
fn missing_ack_retransmits_once_then_fails() {
    block_on(async {
        let mut config = config();
        config.ack_timeout = Duration::from_millis(40);
        let mut mock = MockTransport::new();
        mock.push_frame(&CONNECT_RESPONSE);
        let mut conn = TunnelConnection::new(mock, config);
        conn.connect().await.unwrap();
        conn_transport(&mut conn).clear_sent();

        let started = Instant::now();
        let err = conn
            .write(ga!(1 / 1 / 1), &GroupValue::bit(true))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(Instant::now() - started >= Duration::from_millis(80));

        // Both attempts carry the identical bytes, same sequence 0
        let sent = conn_transport(&mut conn).sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, sent[1].0);
        assert_eq!(sent[0].0[8], 0x00);

        // The session is forced closed
        assert_eq!(conn.state(), SessionState::Closed);
        assert_eq!(conn.stats().retransmissions, 1);
    });
}

#[test]
fn duplicate_request_is_reacked_but_not_redelivered() {
    block_on(async {
        let mut conn = connected(MockTransport::new()).await;
        {
            let mock = conn_transport(&mut conn);
            mock.clear_sent();
            mock.push_frame(&indication_request(0, 1));
            mock.push_frame(&indication_request(0, 1)); // replay
            mock.push_frame(&indication_request(1, 0));
        }

        // First poll: the new request, delivered
        let Event::Indication { frame, .. } = conn.poll().await.unwrap() else {
            panic!("expected indication");
        };
        let ldata = frame.as_ldata().unwrap();
        assert_eq!(ldata.destination_group().unwrap(), ga!(1 / 1 / 1));
        assert_eq!(ldata.apdu.data(), &[0x01]);

        // Second poll skips the duplicate and delivers sequence 1
        let Event::Indication { frame, .. } = conn.poll().await.unwrap() else {
            panic!("expected indication");
        };
        assert_eq!(frame.as_ldata().unwrap().apdu.data(), &[0x00]);

        // Three acks went out: seq 0, seq 0 again, seq 1
        let sent = conn_transport(&mut conn).sent();
        let acks: Vec<(u8, u8)> = sent
            .iter()
            .filter(|(f, _)| f[2..4] == [0x04, 0x21])
            .map(|(f, _)| (f[8], f[9]))
            .collect();
        assert_eq!(acks, vec![(0, 0), (0, 0), (1, 0)]);
        assert_eq!(conn.stats().duplicates, 1);
        assert_eq!(conn.stats().indications, 2);
    });
}

#[test]
fn out_of_order_request_is_dropped_without_ack() {
    block_on(async {
        let mut conn = connected(MockTransport::new()).await;
        {
            let mock = conn_transport(&mut conn);
            mock.clear_sent();
            mock.push_frame(&indication_request(7, 1)); // far ahead: dropped
            mock.push_frame(&indication_request(0, 1)); // expected
        }

        let Event::Indication { .. } = conn.poll().await.unwrap() else {
            panic!("expected indication");
        };
        let sent = conn_transport(&mut conn).sent();
        let acks: Vec<u8> = sent
            .iter()
            .filter(|(f, _)| f[2..4] == [0x04, 0x21])
            .map(|(f, _)| f[8])
            .collect();
        assert_eq!(acks, vec![0]);
    });
}

#[test]
fn heartbeat_exhaustion_closes_the_session() {
    block_on(async {
        let mut config = config();
        config.heartbeat_interval = Duration::from_millis(100);
        config.heartbeat_timeout = Duration::from_millis(20);
        let mut mock = MockTransport::new();
        mock.push_frame(&CONNECT_RESPONSE);
        let mut conn = TunnelConnection::new(mock, config);
        conn.connect().await.unwrap();
        conn_transport(&mut conn).clear_sent();

        // Nothing answers: probe at 100 ms, strikes at 120/140/160 ms
        let err = conn.poll().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(conn.state(), SessionState::Closed);
        // The close is also surfaced as an event
        let event = conn.poll().await.unwrap();
        assert_eq!(event, Event::Disconnected);

        let sent = conn_transport(&mut conn).sent();
        let probes = sent
            .iter()
            .filter(|(f, _)| f[2..4] == [0x02, 0x07])
            .count();
        assert_eq!(probes, 3);
        assert_eq!(conn.stats().heartbeats_missed, 3);
    });
}

#[test]
fn unsolicited_connectionstate_response_is_harmless() {
    block_on(async {
        let mut mock = MockTransport::new();
        mock.push_frame(&CONNECT_RESPONSE);
        mock.push_frame(&[0x06, 0x10, 0x02, 0x08, 0x00, 0x08, 0x42, 0x00]);
        let mut conn = TunnelConnection::new(mock, config());
        conn.connect().await.unwrap();

        conn_transport(&mut conn).push_frame(&indication_request(0, 1));
        let event = conn.poll().await.unwrap();
        assert!(matches!(event, Event::Indication { .. }));
        assert_eq!(conn.stats().heartbeats_missed, 0);
    });
}

#[test]
fn peer_disconnect_request_is_answered_and_closes() {
    block_on(async {
        let mut conn = connected(MockTransport::new()).await;
        {
            let mock = conn_transport(&mut conn);
            mock.clear_sent();
            // DISCONNECT_REQUEST for our channel
            mock.push_frame(&[
                0x06, 0x10, 0x02, 0x09, 0x00, 0x10, 0x42, 0x00, //
                0x08, 0x01, 192, 168, 0, 10, 0x0E, 0x57,
            ]);
        }
        let event = conn.poll().await.unwrap();
        assert_eq!(event, Event::Disconnected);
        assert_eq!(conn.state(), SessionState::Closed);

        let sent = conn_transport(&mut conn).sent();
        assert_eq!(&sent[0].0[2..4], &[0x02, 0x0A]); // DISCONNECT_RESPONSE
        assert_eq!(sent[0].0[6], 0x42);
    });
}

#[test]
fn disconnect_resolves_on_response() {
    block_on(async {
        let mut conn = connected(MockTransport::new()).await;
        {
            let mock = conn_transport(&mut conn);
            mock.clear_sent();
            mock.push_frame(&[0x06, 0x10, 0x02, 0x0A, 0x00, 0x08, 0x42, 0x00]);
        }
        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), SessionState::Closed);
        let sent = conn_transport(&mut conn).sent();
        assert_eq!(&sent[0].0[2..4], &[0x02, 0x09]); // DISCONNECT_REQUEST
    });
}

#[test]
fn rejected_connect_reports_gateway_status() {
    block_on(async {
        let mut mock = MockTransport::new();
        // E_NO_MORE_CONNECTIONS
        mock.push_frame(&[0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x00, 0x24]);
        let mut conn = TunnelConnection::new(mock, config());
        let err = conn.connect().await.unwrap_err();
        match err {
            knx_link::KnxError::Protocol(e) => assert_eq!(e.status(), 0x24),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(conn.state(), SessionState::Closed);
    });
}

#[test]
fn connect_times_out_on_silence() {
    block_on(async {
        let mut config = config();
        config.connect_timeout = Duration::from_millis(50);
        let mock = MockTransport::new();
        let mut conn = TunnelConnection::new(mock, config);
        let started = Instant::now();
        let err = conn.connect().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(Instant::now() - started >= Duration::from_millis(50));
        assert_eq!(conn.state(), SessionState::Closed);
    });
}

#[test]
fn feature_get_resolves_with_value() {
    block_on(async {
        let mut conn = connected(MockTransport::new()).await;
        {
            let mock = conn_transport(&mut conn);
            mock.clear_sent();
            // FEATURE_RESPONSE: seq 0, MaxApduLength, ok, value 0x00F0
            mock.push_frame(&[
                0x06, 0x10, 0x04, 0x23, 0x00, 0x0E, //
                0x04, 0x42, 0x00, 0x00, 0x06, 0x00, 0x00, 0xF0,
            ]);
        }
        let value = conn.get_feature(FeatureId::MaxApduLength).await.unwrap();
        assert_eq!(value.as_slice(), &[0x00, 0xF0]);

        let sent = conn_transport(&mut conn).sent();
        assert_eq!(&sent[0].0[2..4], &[0x04, 0x22]); // FEATURE_GET
        assert_eq!(sent[0].0[10], 0x06); // feature id
    });
}

/// Test-only access to the scripted transport inside a connection.
fn conn_transport(conn: &mut TunnelConnection<MockTransport>) -> &mut MockTransport {
    conn.transport_mut()
}
