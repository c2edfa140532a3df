//! End-to-end exercises of the feature APIs over a loopback transport, with a
//! hand-rolled "server" thread standing in for the cloud platform (spec §8 seed
//! scenarios 1-3).

use ciborium::value::Value;
use orbit_core::client::Client;
use orbit_core::coap::{Code, MessageType, Packet};
use orbit_core::config::ClientConfig;
use orbit_core::credential::Credential;
use orbit_core::error::CoapCode;
use orbit_core::transport::LoopbackTransport;
use orbit_features::{LightDb, RpcRegistry};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn test_config() -> ClientConfig {
    ClientConfig {
        ack_timeout_s: 0.5,
        keepalive_interval_s: 0,
        response_timeout_s: 2,
        ..ClientConfig::default()
    }
}

fn ack_empty(server: &mut LoopbackTransport, request: &Packet) {
    let ack = Packet::empty(MessageType::Acknowledgement, request.message_id);
    server.send(&ack.encode()).unwrap();
}

fn connect(config: ClientConfig) -> (Client, LoopbackTransport) {
    let (client_side, server_side) = LoopbackTransport::pair();
    let mut transport_slot = Some(client_side);
    let mut client = Client::create(config, Credential::psk("device@project", b"secret".to_vec())).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    client
        .start(
            move || {
                transport_slot
                    .take()
                    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "already connected"))
            },
            move |event| {
                let _ = tx.send(event);
            },
        )
        .unwrap();
    (client, server_side)
}

fn handshake(server: &mut LoopbackTransport) {
    let bytes = server.recv(Duration::from_secs(2)).unwrap().unwrap();
    let handshake = Packet::decode(&bytes).unwrap();
    ack_empty(server, &handshake);
}

/// RPC happy path: the server invokes a registered method and reads back its
/// result on `.rpc/status` (spec §8 seed scenario 1).
#[test]
fn rpc_registered_method_replies_with_doubled_value() {
    let (client, mut server_side) = connect(test_config());
    let client = Arc::new(client);

    let server = thread::spawn(move || {
        handshake(&mut server_side);

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let register = Packet::decode(&bytes).unwrap();
        assert_eq!(register.uri_path(), ".rpc");
        assert_eq!(register.observe_value(), Some(0));

        let request = Value::Map(vec![
            (Value::Text("method".into()), Value::Text("double".into())),
            (Value::Text("id".into()), Value::Text("call-1".into())),
            (Value::Text("params".into()), Value::Array(vec![Value::Integer(21.into())])),
        ]);
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&request, &mut payload).unwrap();

        let mut notify = Packet::new(
            MessageType::Confirmable,
            Code::Response(CoapCode::new(2, 5)),
            register.message_id.wrapping_add(1),
            register.token,
        );
        notify.set_payload(payload);
        server_side.send(&notify.encode()).unwrap();

        let ack_bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let ack = Packet::decode(&ack_bytes).unwrap();
        assert_eq!(ack.mtype, MessageType::Acknowledgement);

        let status_bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let status = Packet::decode(&status_bytes).unwrap();
        assert_eq!(status.uri_path(), ".rpc/status");
        let response: Value = ciborium::de::from_reader(status.payload.as_slice()).unwrap();
        let map = response.as_map().unwrap();
        let status_code = map.iter().find(|(k, _)| k.as_text() == Some("statusCode")).unwrap().1.as_integer();
        assert_eq!(status_code.and_then(|i| i64::try_from(i).ok()), Some(0));
        let detail = map.iter().find(|(k, _)| k.as_text() == Some("detail")).unwrap().1.as_map().unwrap();
        let value = detail.iter().find(|(k, _)| k.as_text() == Some("value")).unwrap().1.as_integer();
        assert_eq!(value.and_then(|i| i64::try_from(i).ok()), Some(42));

        server_side
    });

    let mut rpc = RpcRegistry::new();
    rpc.register(
        "double",
        Box::new(|params: &[Value]| {
            let n = params.first().and_then(Value::as_integer).and_then(|i| i64::try_from(i).ok()).unwrap_or(0);
            Ok(Value::Map(vec![(Value::Text("value".into()), Value::Integer((n * 2).into()))]))
        }),
    );
    rpc.start(Arc::clone(&client)).unwrap();

    server.join().unwrap();
}

/// RPC with no matching handler answers `STATUS_UNAVAILABLE` (spec §8 seed
/// scenario 2).
#[test]
fn rpc_unregistered_method_replies_with_unavailable_status() {
    let (client, mut server_side) = connect(test_config());
    let client = Arc::new(client);

    let server = thread::spawn(move || {
        handshake(&mut server_side);

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let register = Packet::decode(&bytes).unwrap();

        let request = Value::Map(vec![
            (Value::Text("method".into()), Value::Text("reboot".into())),
            (Value::Text("id".into()), Value::Text("call-2".into())),
        ]);
        let mut payload = Vec::new();
        ciborium::ser::into_writer(&request, &mut payload).unwrap();

        let mut notify = Packet::new(
            MessageType::Confirmable,
            Code::Response(CoapCode::new(2, 5)),
            register.message_id.wrapping_add(1),
            register.token,
        );
        notify.set_payload(payload);
        server_side.send(&notify.encode()).unwrap();

        let ack_bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        Packet::decode(&ack_bytes).unwrap();

        let status_bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let status = Packet::decode(&status_bytes).unwrap();
        let response: Value = ciborium::de::from_reader(status.payload.as_slice()).unwrap();
        let map = response.as_map().unwrap();
        let status_code = map.iter().find(|(k, _)| k.as_text() == Some("statusCode")).unwrap().1.as_integer();
        assert_eq!(status_code.and_then(|i| i64::try_from(i).ok()), Some(14));

        server_side
    });

    let rpc = RpcRegistry::new();
    rpc.start(Arc::clone(&client)).unwrap();

    server.join().unwrap();
}

/// LightDB State `set`/`get` round trip for a single integer value (spec §8 seed
/// scenario 3).
#[test]
fn lightdb_int_round_trips_through_set_and_get() {
    let (mut client, mut server_side) = connect(test_config());

    let server = thread::spawn(move || {
        handshake(&mut server_side);

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let set_request = Packet::decode(&bytes).unwrap();
        assert_eq!(set_request.uri_path(), ".d/my_counter");
        assert_eq!(set_request.payload, b"7");
        let ack = Packet::new(
            MessageType::Acknowledgement,
            Code::Response(CoapCode::new(2, 4)),
            set_request.message_id,
            set_request.token,
        );
        server_side.send(&ack.encode()).unwrap();

        let bytes = server_side.recv(Duration::from_secs(2)).unwrap().unwrap();
        let get_request = Packet::decode(&bytes).unwrap();
        assert_eq!(get_request.uri_path(), ".d/my_counter");
        let mut response = Packet::new(
            MessageType::Acknowledgement,
            Code::Response(CoapCode::new(2, 5)),
            get_request.message_id,
            get_request.token,
        );
        response.set_payload(b"7".to_vec());
        server_side.send(&response.encode()).unwrap();

        server_side
    });

    let lightdb = LightDb::new(&client);
    lightdb.set_int("my_counter", 7, Duration::from_secs(2)).unwrap();
    let value = lightdb.get_int_sync("my_counter", Duration::from_secs(2)).unwrap();
    assert_eq!(value, Some(7));

    server.join().unwrap();
    client.stop();
}
