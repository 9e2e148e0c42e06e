//! End-to-end tests driving a real `DeviceSession` over TCP against the
//! fake device server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use libresense_core::fakedevice::FakeDeviceServer;
use libresense_core::protocol::{
    DeviceSession, Frame, ProtocolError, SessionConfig, SessionState,
};

/// A server seeded with the handshake answers every session needs.
fn seeded_server() -> FakeDeviceServer {
    let mut server = FakeDeviceServer::bind("127.0.0.1:0").unwrap();
    // channel list: device announces channel 100
    server.add_sample(
        Frame::from_cmd_and_payload(0x31, &[0x16]),
        Frame::from_cmd_and_payload(0x31, &[0x00, 0x16, 0x01, 0x64, 0x00]),
    );
    // device status: id 0019FF014203
    server.add_sample(
        Frame::from_cmd_and_payload(0x31, &[0x60]),
        Frame::from_cmd_and_payload(
            0x31,
            &[0x00, 0x60, 0x00, 0x19, 0xFF, 0x01, 0x42, 0x03, 0x00, 0x00],
        ),
    );
    server
}

fn config_for(server: &FakeDeviceServer) -> SessionConfig {
    let addr = server.local_addr().unwrap();
    let mut config = SessionConfig::new(addr.ip().to_string());
    config.port = addr.port();
    config.timeout_ms = 2000;
    config
}

#[test]
fn test_session_handshake_and_channel_value() {
    let mut server = seeded_server();
    // channel 100 currently reads 23.59375
    server.add_sample(
        Frame::from_cmd_and_payload(0x23, &[0x64, 0x00]),
        Frame::from_cmd_and_payload(0x23, &[0x00, 0x64, 0x00, 0x16, 0x00, 0xC0, 0xBC, 0x41]),
    );
    let config = config_for(&server);
    let handle = thread::spawn(move || server.serve_one());

    let mut session = DeviceSession::open(config).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.available_channels(), &[100]);
    assert_eq!(session.device_id(), Some("0019FF014203"));

    let value = session.channel_value(100).unwrap();
    assert_eq!(value, 23.59375);

    drop(session);
    handle.join().unwrap().unwrap();
}

#[test]
fn test_unrecorded_command_surfaces_device_status() {
    let server = seeded_server();
    let config = config_for(&server);
    let handle = thread::spawn(move || server.serve_one());

    let mut session = DeviceSession::open(config).unwrap();
    // the server has no recording for this, so it answers UNKNOWN_CMD
    let err = session.get_logging_state().unwrap_err();
    match err {
        ProtocolError::DeviceStatus { code, name } => {
            assert_eq!(code, 0x10);
            assert_eq!(name, "UNKNOWN_CMD");
        }
        other => panic!("expected DeviceStatus, got {other:?}"),
    }

    drop(session);
    handle.join().unwrap().unwrap();
}

#[test]
fn test_download_logs_pages_sequentially() {
    let mut server = seeded_server();
    // initiate with epoch 0 -> two pages follow
    server.add_sample(
        Frame::from_cmd_and_payload(
            0x24,
            &[0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        ),
        Frame::from_cmd_and_payload(
            0x24,
            &[0x00, 0x10, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        ),
    );
    // each data page: one row at epoch 1000000, channel 100 = 20.5
    let mut page = vec![0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00];
    page.extend_from_slice(&1_000_000i32.to_le_bytes());
    page.extend_from_slice(&1_000_000i32.to_le_bytes());
    page.extend_from_slice(&60u32.to_le_bytes());
    page.extend_from_slice(&1u16.to_le_bytes());
    page.push(1);
    page.extend_from_slice(&[0x08, 0x00, 0x64, 0x00, 0x16, 0x00, 0x00, 0xA4, 0x41]);
    server.add_sample(
        Frame::from_cmd_and_payload(0x24, &[0x20, 0x01]),
        Frame::from_cmd_and_payload(0x24, &page),
    );
    let config = config_for(&server);
    let handle = thread::spawn(move || server.serve_one());

    let mut session = DeviceSession::open(config).unwrap();
    let records = session.download_logs(None).unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.timestamp.timestamp(), 1_000_000);
        assert_eq!(record.values.get(&100), Some(&20.5));
    }

    drop(session);
    handle.join().unwrap().unwrap();
}

#[test]
fn test_query_fails_after_three_corrupted_answers() {
    // a hostile peer that answers every request with a frame whose checksum
    // does not match
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut corrupted = Frame::from_cmd_and_payload(0x31, &[0x00, 0x16, 0x01, 0x64, 0x00])
            .bytes()
            .to_vec();
        let checksum_offset = corrupted.len() - 3;
        corrupted[checksum_offset] ^= 0xFF;

        let mut requests = 0u32;
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap_or(0);
            if n == 0 {
                return requests;
            }
            requests += 1;
            if stream.write_all(&corrupted).is_err() {
                return requests;
            }
        }
    });

    let mut config = SessionConfig::new(addr.ip().to_string());
    config.port = addr.port();
    config.timeout_ms = 2000;

    let mut session = DeviceSession::new(config);
    let err = session.connect().unwrap_err();
    assert!(matches!(err, ProtocolError::QueryFailed { attempts: 3 }));
    assert_eq!(session.state(), SessionState::Error);

    drop(session);
    let requests = handle.join().unwrap();
    assert_eq!(requests, 3);
}
