//! End-to-end client/server scenarios over real loopback sockets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use mbtcp::frame::{MeiResponse, Request, Response};
use mbtcp::{
    ClientConfig, ClientEvent, DataBuffer, DeviceIdCategory, DeviceIdObject, ExceptionCode,
    Mei, ModbusObject, ModbusTcpClient, ModbusTcpServer, RequestHandler, ServerConfig,
    WriteEvent,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

async fn start_server() -> ModbusTcpServer {
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        read_timeout_ms: 200,
        ..Default::default()
    };
    ModbusTcpServer::start(config).await.unwrap()
}

fn client_for(server: &ModbusTcpServer) -> ModbusTcpClient {
    let mut config = ClientConfig::new("127.0.0.1", server.local_addr().port());
    config.receive_timeout_ms = 500;
    config.reconnect_deadline_ms = Some(5_000);
    ModbusTcpClient::new(config)
}

#[tokio::test]
async fn test_read_holding_registers_scenario() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);
    server.set_holding_register(1, 100, 10).unwrap();
    server.set_holding_register(1, 101, 20).unwrap();
    server.set_holding_register(1, 102, 30).unwrap();

    let client = client_for(&server);
    client.open().await.unwrap();

    let registers = client
        .read_holding_registers(1, 100, 3)
        .await
        .unwrap()
        .unwrap();
    let values: Vec<u16> = registers.iter().map(|r| r.value()).collect();
    assert_eq!(values, vec![10, 20, 30]);
    assert_eq!(registers[0].address(), 100);
    assert_eq!(registers[2].address(), 102);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_write_then_read_coils() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);
    let mut events = server.subscribe();

    let client = client_for(&server);
    client.open().await.unwrap();

    let coils = vec![
        ModbusObject::coil(10, true),
        ModbusObject::coil(11, false),
        ModbusObject::coil(12, true),
    ];
    assert!(client.write_coils(1, &coils).await.unwrap());

    // Observer notification carries the full written list
    match events.recv().await.unwrap() {
        WriteEvent::Coils { device_id, coils } => {
            assert_eq!(device_id, 1);
            assert_eq!(coils.len(), 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    assert!(server.get_coil(1, 10).unwrap().as_bool());
    assert!(!server.get_coil(1, 11).unwrap().as_bool());

    let read = client.read_coils(1, 10, 3).await.unwrap().unwrap();
    assert!(read[0].as_bool());
    assert!(!read[1].as_bool());
    assert!(read[2].as_bool());

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_single_writes() {
    init_tracing();
    let server = start_server().await;
    server.add_device(5);

    let client = client_for(&server);
    client.open().await.unwrap();

    assert!(client
        .write_single_coil(5, &ModbusObject::coil(7, true))
        .await
        .unwrap());
    assert!(client
        .write_single_register(5, &ModbusObject::holding_register(8, 4660))
        .await
        .unwrap());

    assert!(server.get_coil(5, 7).unwrap().as_bool());
    assert_eq!(server.get_holding_register(5, 8).unwrap().value(), 4660);

    let inputs = client.read_discrete_inputs(5, 7, 1).await.unwrap().unwrap();
    assert!(!inputs[0].as_bool());

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_device_gets_no_answer() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);
    server.set_input_register(1, 0, 9).unwrap();

    let client = client_for(&server);
    client.open().await.unwrap();

    // Device 9 does not exist: the server stays silent and the read
    // resolves as a timeout, not an error
    assert_eq!(client.read_input_registers(9, 0, 1).await.unwrap(), None);

    // The connection is still usable afterwards
    let values = client.read_input_registers(1, 0, 1).await.unwrap().unwrap();
    assert_eq!(values[0].value(), 9);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_write_multiple_coils_bad_byte_count_rejected_on_wire() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

    // Write Multiple Coils, count 10, but declare 3 payload bytes
    let frame: Vec<u8> = vec![
        0x00, 0x01, // transaction id
        0x00, 0x00, // protocol id
        0x00, 0x0A, // length
        0x01, // unit id
        0x0F, // function
        0x00, 0x00, // address
        0x00, 0x0A, // count
        0x03, // declared byte count (should be 2)
        0xFF, 0x03, 0x00, // payload
    ];
    stream.write_all(&frame).await.unwrap();

    let mut reply = [0u8; 9];
    timeout(Duration::from_secs(2), stream.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply[7], 0x0F | 0x80);
    assert_eq!(reply[8], ExceptionCode::IllegalDataValue as u8);

    // Nothing was written
    assert!(!server.get_coil(1, 0).unwrap().as_bool());
    assert!(!server.get_coil(1, 1).unwrap().as_bool());

    server.shutdown().await;
}

/// Echoes fixed register data under a deliberately wrong transaction id
struct MangledTidHandler;

#[async_trait::async_trait]
impl RequestHandler for MangledTidHandler {
    async fn handle(&self, request: Request) -> Option<Response> {
        let mut response = Response::for_request(&request);
        response.transaction_id = request.transaction_id.wrapping_add(0x4000);
        let mut data = DataBuffer::new();
        for _ in 0..request.count {
            data.add_u16(7);
        }
        response.data = data;
        Some(response)
    }
}

#[tokio::test]
async fn test_fifo_fallback_matches_oldest_pending() {
    init_tracing();
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        read_timeout_ms: 200,
        ..Default::default()
    };
    let server = ModbusTcpServer::start_with_handler(config, Arc::new(MangledTidHandler))
        .await
        .unwrap();

    // With transaction-id matching disabled the mangled id is ignored
    let mut config = ClientConfig::new("127.0.0.1", server.local_addr().port());
    config.receive_timeout_ms = 500;
    config.reconnect_deadline_ms = Some(5_000);
    config.enable_transaction_id = false;
    let client = ModbusTcpClient::new(config);
    client.open().await.unwrap();

    let values = client.read_holding_registers(1, 0, 2).await.unwrap().unwrap();
    assert_eq!(values[0].value(), 7);
    client.close().await;

    // With matching enabled the same response is discarded as unmatched
    let mut config = ClientConfig::new("127.0.0.1", server.local_addr().port());
    config.receive_timeout_ms = 400;
    config.reconnect_deadline_ms = Some(5_000);
    let client = ModbusTcpClient::new(config);
    client.open().await.unwrap();
    assert_eq!(client.read_holding_registers(1, 0, 2).await.unwrap(), None);
    client.close().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_request_releases_its_pending_slot() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);
    server.set_holding_register(1, 0, 42).unwrap();

    for enable_transaction_id in [false, true] {
        let mut config = ClientConfig::new("127.0.0.1", server.local_addr().port());
        config.receive_timeout_ms = 2_000;
        config.reconnect_deadline_ms = Some(5_000);
        config.enable_transaction_id = enable_transaction_id;
        let client = ModbusTcpClient::new(config);
        client.open().await.unwrap();

        // Device 9 never answers; abandon the operation before its own
        // deadline by dropping the future
        let cancelled = timeout(
            Duration::from_millis(200),
            client.read_holding_registers(9, 0, 1),
        )
        .await;
        assert!(cancelled.is_err());

        // The next response must reach the request that owns it, not the
        // abandoned registry slot
        let values = client
            .read_holding_registers(1, 0, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(values[0].value(), 42);

        client.close().await;
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_fires_once_and_reconnects() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = ClientConfig::new("127.0.0.1", port);
    config.connect_timeout_ms = 500;
    config.reconnect_deadline_ms = Some(10_000);
    let client = ModbusTcpClient::new(config);
    let mut events = client.subscribe();

    client.open().await.unwrap();
    let (first_conn, _) = listener.accept().await.unwrap();
    assert_eq!(events.recv().await.unwrap(), ClientEvent::Connected);

    // Force-close the peer side; the client must notice, notify once,
    // and reconnect on its own
    drop(first_conn);

    assert_eq!(events.recv().await.unwrap(), ClientEvent::Disconnected);
    let (_second_conn, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap(),
        ClientEvent::Connected
    );

    // No duplicate disconnect notifications trail behind
    sleep(Duration::from_millis(200)).await;
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));

    client.close().await;
}

#[tokio::test]
async fn test_device_identification_end_to_end() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);

    let client = client_for(&server);
    client.open().await.unwrap();

    let info = client
        .read_device_information(1, DeviceIdCategory::Basic)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.len(), 3);
    assert_eq!(info[&DeviceIdObject::VendorName], "MBTCP");
    assert_eq!(
        info[&DeviceIdObject::MajorMinorRevision],
        env!("CARGO_PKG_VERSION")
    );

    let regular = client
        .read_device_information(1, DeviceIdCategory::Regular)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(regular.len(), 7);
    assert_eq!(regular[&DeviceIdObject::ModelName], "TCP Server");

    client.close().await;
    server.shutdown().await;
}

/// Serves the identification objects across two pages to exercise the
/// client-side pagination
struct PagedIdentityHandler;

#[async_trait::async_trait]
impl RequestHandler for PagedIdentityHandler {
    async fn handle(&self, request: Request) -> Option<Response> {
        let mei = request.mei?;
        let mut response = Response::for_request(&request);

        let (objects, more, next): (Vec<(u8, &str)>, bool, u8) = if mei.object_id < 2 {
            (vec![(0, "ACME"), (1, "ACME-MB")], true, 2)
        } else {
            (vec![(2, "1.2.3")], false, 0)
        };

        response.mei = Some(MeiResponse {
            mei: Mei::ReadDeviceInformation,
            category: DeviceIdCategory::Basic,
            conformity_level: 0x01,
            more_requests_needed: more,
            next_object_id: next,
            object_count: objects.len() as u8,
        });
        let mut data = DataBuffer::new();
        for (id, text) in objects {
            data.add_u8(id);
            data.add_u8(text.len() as u8);
            data.add_string(text);
        }
        response.data = data;
        Some(response)
    }
}

#[tokio::test]
async fn test_device_identification_pagination_merges_pages() {
    init_tracing();
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        read_timeout_ms: 200,
        ..Default::default()
    };
    let server = ModbusTcpServer::start_with_handler(config, Arc::new(PagedIdentityHandler))
        .await
        .unwrap();

    let client = client_for(&server);
    client.open().await.unwrap();

    let raw = client
        .read_device_information_raw(1, DeviceIdCategory::Basic, 0)
        .await
        .unwrap()
        .unwrap();
    let expected: BTreeMap<u8, Vec<u8>> = [
        (0u8, b"ACME".to_vec()),
        (1u8, b"ACME-MB".to_vec()),
        (2u8, b"1.2.3".to_vec()),
    ]
    .into_iter()
    .collect();
    assert_eq!(raw, expected);

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_ends_connections() {
    init_tracing();
    let server = start_server().await;
    server.add_device(1);

    let client = client_for(&server);
    client.open().await.unwrap();
    assert!(client.read_coils(1, 0, 1).await.unwrap().is_some());

    server.shutdown().await;

    // The dropped connection resolves to a null result, not an error
    let result = client.read_coils(1, 0, 1).await.unwrap();
    assert_eq!(result, None);

    client.close().await;
}
