//! End-to-end exercises of `Client` driving the worker thread over a loopback
//! transport, with a hand-rolled "server" thread on the other end standing in for
//! the cloud platform (spec §8 seed scenarios).

use orbit_core::client::Client;
use orbit_core::coap::{Code, MessageType, Packet};
use orbit_core::config::ClientConfig;
use orbit_core::credential::Credential;
use orbit_core::error::{CoapCode, Error};
use orbit_core::transport::LoopbackTransport;
use orbit_core::ClientEvent;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn test_config() -> ClientConfig {
    ClientConfig {
        // Each `Connecting` attempt asks the transport factory for a fresh
        // transport (spec §4.F) and our loopback factory only has one to give, so
        // the handshake must land within the first try -- generous here to give
        // the server thread time to get scheduled.
        ack_timeout_s: 0.5,
        keepalive_interval_s: 0,
        response_timeout_s: 2,
        ..ClientConfig::default()
    }
}

/// Acks whatever confirmable message comes in with an empty ACK -- enough to
/// satisfy the handshake kick and any keepalive probe.
fn ack_empty(server: &mut LoopbackTransport, request: &Packet) {
    let ack = Packet::empty(MessageType::Acknowledgement, request.message_id);
    server.send(&ack.encode()).unwrap();
}

#[test]
fn get_sync_round_trips_a_value() {
    let (client_side, mut server_side) = LoopbackTransport::pair();
    let mut transport_slot = Some(client_side);

    let mut client = Client::create(test_config(), Credential::psk("device@project", b"secret".to_vec())).unwrap();
    let (connected_tx, connected_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let handshake = Packet::decode(&bytes).unwrap();
        ack_empty(&mut server_side, &handshake);

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let request = Packet::decode(&bytes).unwrap();
        assert_eq!(request.uri_path(), ".d/my_int");

        let mut response = Packet::new(
            MessageType::Acknowledgement,
            Code::Response(CoapCode::new(2, 5)),
            request.message_id,
            request.token,
        );
        response.set_payload(b"42".to_vec());
        server_side.send(&response.encode()).unwrap();
        server_side
    });

    client
        .start(
            move || {
                transport_slot
                    .take()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "already connected"))
            },
            move |event| {
                let _ = connected_tx.send(event);
            },
        )
        .unwrap();

    assert_eq!(connected_rx.recv_timeout(Duration::from_secs(2)).unwrap(), ClientEvent::Connected);

    let response = client.get_sync(".d/", "my_int", 50, Duration::from_secs(2)).unwrap();
    assert!(response.is_success());
    assert_eq!(response.payload, b"42");

    server.join().unwrap();
    client.stop();
}

#[test]
fn observation_delivers_repeated_notifications() {
    let (client_side, mut server_side) = LoopbackTransport::pair();
    let mut transport_slot = Some(client_side);

    let mut client = Client::create(test_config(), Credential::psk("device@project", b"secret".to_vec())).unwrap();
    let (connected_tx, connected_rx) = mpsc::channel();

    let notifications = Arc::new(Mutex::new(Vec::new()));
    let notifications_for_callback = Arc::clone(&notifications);

    let server = thread::spawn(move || {
        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let handshake = Packet::decode(&bytes).unwrap();
        ack_empty(&mut server_side, &handshake);

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let register = Packet::decode(&bytes).unwrap();
        assert_eq!(register.uri_path(), ".c/desired");
        assert_eq!(register.observe_value(), Some(0));

        for value in [1u8, 2u8] {
            let mut notify = Packet::new(
                MessageType::Confirmable,
                Code::Response(CoapCode::new(2, 5)),
                register.message_id.wrapping_add(value as u16),
                register.token,
            );
            notify.set_payload(vec![value]);
            server_side.send(&notify.encode()).unwrap();

            let ack_bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
            let ack = Packet::decode(&ack_bytes).unwrap();
            assert_eq!(ack.mtype, MessageType::Acknowledgement);
        }
        server_side
    });

    client
        .start(
            move || {
                transport_slot
                    .take()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "already connected"))
            },
            move |event| {
                let _ = connected_tx.send(event);
            },
        )
        .unwrap();

    assert_eq!(connected_rx.recv_timeout(Duration::from_secs(2)).unwrap(), ClientEvent::Connected);

    client
        .observe(
            ".c/",
            "desired",
            60,
            Box::new(move |outcome| {
                if let Ok(response) = outcome {
                    notifications_for_callback.lock().unwrap().push(response.payload);
                }
            }),
        )
        .unwrap();

    // Poll for both notifications to land; the worker thread delivers them
    // asynchronously on its own schedule.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while notifications.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    let seen = notifications.lock().unwrap().clone();
    assert_eq!(seen, vec![vec![1u8], vec![2u8]]);

    server.join().unwrap();
    client.stop();
}

/// A second `observe` on the same (path_prefix, path) still gets a successful CoAP
/// reply, but `ObservationRegistry::register` must reject it with `NotAllowed` once
/// the engine tries to add it -- and that rejection must reach the second
/// callback, not vanish silently (the caller already received its `Ok` for the
/// first reply and would otherwise believe the subscription is live forever).
#[test]
fn duplicate_observe_surfaces_registration_error() {
    let (client_side, mut server_side) = LoopbackTransport::pair();
    let mut transport_slot = Some(client_side);

    let mut client = Client::create(test_config(), Credential::psk("device@project", b"secret".to_vec())).unwrap();
    let (connected_tx, connected_rx) = mpsc::channel();

    let server = thread::spawn(move || {
        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let handshake = Packet::decode(&bytes).unwrap();
        ack_empty(&mut server_side, &handshake);

        for _ in 0..2 {
            let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
            let register = Packet::decode(&bytes).unwrap();
            assert_eq!(register.uri_path(), ".c/desired");
            assert_eq!(register.observe_value(), Some(0));

            let mut response = Packet::new(
                MessageType::Acknowledgement,
                Code::Response(CoapCode::new(2, 5)),
                register.message_id,
                register.token,
            );
            response.set_payload(vec![0]);
            server_side.send(&response.encode()).unwrap();
        }
        server_side
    });

    client
        .start(
            move || {
                transport_slot
                    .take()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "already connected"))
            },
            move |event| {
                let _ = connected_tx.send(event);
            },
        )
        .unwrap();

    assert_eq!(connected_rx.recv_timeout(Duration::from_secs(2)).unwrap(), ClientEvent::Connected);

    let (first_tx, first_rx) = mpsc::channel();
    client
        .observe(
            ".c/",
            "desired",
            60,
            Box::new(move |outcome| {
                let _ = first_tx.send(outcome.is_ok());
            }),
        )
        .unwrap();
    assert!(first_rx.recv_timeout(Duration::from_secs(2)).unwrap());

    let (second_tx, second_rx) = mpsc::channel();
    client
        .observe(
            ".c/",
            "desired",
            60,
            Box::new(move |outcome| {
                let _ = second_tx.send(outcome);
            }),
        )
        .unwrap();

    // The second observe's CoAP round trip itself succeeds (the server replies
    // 2.05 to both registers), so the callback first sees that `Ok`, then a second
    // time the `NotAllowed` the engine surfaces once it fails to add the
    // duplicate (path_prefix, path) to the registry.
    let second_first = second_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(second_first.is_ok());
    let second_followup = second_rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(second_followup, Err(Error::NotAllowed)));

    server.join().unwrap();
    client.stop();
}
