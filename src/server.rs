//! Modbus TCP server: listener, per-connection handling loops, and the
//! built-in function-code dispatch table over the device register store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::DataBuffer;
use crate::device::ModbusDevice;
use crate::error::{ModbusError, Result};
use crate::frame::{MeiResponse, Request, Response, FRAME_PREFIX_LEN};
use crate::object::ModbusObject;
use crate::types::{
    DeviceIdCategory, DeviceIdObject, ExceptionCode, FunctionCode, Mei, COIL_OFF, COIL_ON,
    MAX_ADDRESS, MAX_COIL_READ_COUNT, MAX_COIL_WRITE_COUNT, MAX_REGISTER_READ_COUNT,
    MAX_REGISTER_WRITE_COUNT, MIN_COUNT,
};

/// Strings served by the device identification handler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerIdentity {
    pub vendor_name: String,
    pub product_code: String,
    pub revision: String,
    pub vendor_url: String,
    pub product_name: String,
    pub model_name: String,
    pub user_application_name: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        ServerIdentity {
            vendor_name: "MBTCP".to_string(),
            product_code: "MBTCP.MODBUS-TCP".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
            vendor_url: "https://crates.io/crates/mbtcp".to_string(),
            product_name: "mbtcp".to_string(),
            model_name: "TCP Server".to_string(),
            user_application_name: "Modbus TCP Server".to_string(),
        }
    }
}

impl ServerIdentity {
    fn object(&self, object: DeviceIdObject) -> &str {
        match object {
            DeviceIdObject::VendorName => &self.vendor_name,
            DeviceIdObject::ProductCode => &self.product_code,
            DeviceIdObject::MajorMinorRevision => &self.revision,
            DeviceIdObject::VendorUrl => &self.vendor_url,
            DeviceIdObject::ProductName => &self.product_name,
            DeviceIdObject::ModelName => &self.model_name,
            DeviceIdObject::UserApplicationName => &self.user_application_name,
        }
    }
}

/// Server configuration; all durations are milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// 0 probes an ephemeral port; see [`ModbusTcpServer::local_addr`]
    pub port: u16,
    /// Per-read timeout of a connection loop; elapsing is not fatal, the
    /// read is simply retried
    pub read_timeout_ms: u64,
    pub identity: ServerIdentity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 502,
            read_timeout_ms: 1_000,
            identity: ServerIdentity::default(),
        }
    }
}

/// Notification raised after every successful write, carrying the full
/// list of written objects
#[derive(Debug, Clone)]
pub enum WriteEvent {
    Coils {
        device_id: u8,
        coils: Vec<ModbusObject>,
    },
    Registers {
        device_id: u8,
        registers: Vec<ModbusObject>,
    },
}

/// Pluggable request dispatch. `None` means no response is written back
/// (the silently unresponsive slave).
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Option<Response>;
}

type DeviceMap = Arc<DashMap<u8, Arc<ModbusDevice>>>;

/// Built-in function-code dispatch table
pub struct DefaultHandler {
    devices: DeviceMap,
    identity: ServerIdentity,
    events: broadcast::Sender<WriteEvent>,
}

#[async_trait]
impl RequestHandler for DefaultHandler {
    async fn handle(&self, request: Request) -> Option<Response> {
        // The device is not known => no response to send
        let device = self.devices.get(&request.device_id)?.value().clone();

        match request.function {
            FunctionCode::ReadCoils => Some(self.read_bits(&request, |addr| {
                device.get_coil(addr).as_bool()
            })),
            FunctionCode::ReadDiscreteInputs => Some(self.read_bits(&request, |addr| {
                device.get_discrete_input(addr).as_bool()
            })),
            FunctionCode::ReadHoldingRegisters => Some(self.read_registers(&request, |addr| {
                device.get_holding_register(addr).value()
            })),
            FunctionCode::ReadInputRegisters => Some(self.read_registers(&request, |addr| {
                device.get_input_register(addr).value()
            })),
            FunctionCode::WriteSingleCoil => Some(self.write_single_coil(&request, &device)),
            FunctionCode::WriteSingleRegister => {
                Some(self.write_single_register(&request, &device))
            }
            FunctionCode::WriteMultipleCoils => Some(self.write_multiple_coils(&request, &device)),
            FunctionCode::WriteMultipleRegisters => {
                Some(self.write_multiple_registers(&request, &device))
            }
            FunctionCode::EncapsulatedInterface => Some(self.device_identification(&request)),
        }
    }
}

impl DefaultHandler {
    fn read_bits(&self, request: &Request, get: impl Fn(u16) -> bool) -> Response {
        let mut response = Response::for_request(request);

        if request.count < MIN_COUNT || request.count > MAX_COIL_READ_COUNT {
            response.error = Some(ExceptionCode::IllegalDataValue);
        } else if request.address as u32 + request.count as u32 > MAX_ADDRESS as u32 {
            response.error = Some(ExceptionCode::IllegalDataAddress);
        } else {
            let mut bits = vec![0u8; (request.count as usize + 7) / 8];
            for i in 0..request.count as usize {
                if get(request.address + i as u16) {
                    bits[i / 8] |= 1 << (i % 8);
                }
            }
            response.data = DataBuffer::from(bits);
        }

        response
    }

    fn read_registers(&self, request: &Request, get: impl Fn(u16) -> u16) -> Response {
        let mut response = Response::for_request(request);

        if request.count < MIN_COUNT || request.count > MAX_REGISTER_READ_COUNT {
            response.error = Some(ExceptionCode::IllegalDataValue);
        } else if request.address as u32 + request.count as u32 > MAX_ADDRESS as u32 {
            response.error = Some(ExceptionCode::IllegalDataAddress);
        } else {
            let mut data = DataBuffer::new();
            for i in 0..request.count as usize {
                data.add_u16(get(request.address + i as u16));
            }
            response.data = data;
        }

        response
    }

    fn write_single_coil(&self, request: &Request, device: &ModbusDevice) -> Response {
        let mut response = Response::for_request(request);

        match request.data.get_u16(0) {
            Ok(value) if value == COIL_ON || value == COIL_OFF => {
                let coil = ModbusObject::coil(request.address, value == COIL_ON);
                device.set_coil(request.address, coil.as_bool());
                response.data = request.data.clone();
                let _ = self.events.send(WriteEvent::Coils {
                    device_id: request.device_id,
                    coils: vec![coil],
                });
            }
            Ok(_) => response.error = Some(ExceptionCode::IllegalDataValue),
            Err(_) => response.error = Some(ExceptionCode::IllegalDataValue),
        }

        response
    }

    fn write_single_register(&self, request: &Request, device: &ModbusDevice) -> Response {
        let mut response = Response::for_request(request);

        match request.data.get_u16(0) {
            Ok(value) => {
                let register = ModbusObject::holding_register(request.address, value);
                device.set_holding_register(request.address, value);
                response.data = request.data.clone();
                let _ = self.events.send(WriteEvent::Registers {
                    device_id: request.device_id,
                    registers: vec![register],
                });
            }
            Err(_) => response.error = Some(ExceptionCode::IllegalDataValue),
        }

        response
    }

    fn write_multiple_coils(&self, request: &Request, device: &ModbusDevice) -> Response {
        let mut response = Response::for_request(request);

        let expected_bytes = (request.count as usize + 7) / 8;
        if request.count < MIN_COUNT
            || request.count > MAX_COIL_WRITE_COUNT
            || request.byte_count as usize != expected_bytes
            || request.data.len() != expected_bytes
        {
            response.error = Some(ExceptionCode::IllegalDataValue);
        } else if request.address as u32 + request.count as u32 > MAX_ADDRESS as u32 {
            response.error = Some(ExceptionCode::IllegalDataAddress);
        } else {
            let mut coils = Vec::with_capacity(request.count as usize);
            for i in 0..request.count as usize {
                let address = request.address + i as u16;
                let set = match request.data.get_u8(i / 8) {
                    Ok(byte) => byte & (1 << (i % 8)) != 0,
                    Err(_) => {
                        response.error = Some(ExceptionCode::SlaveDeviceFailure);
                        return response;
                    }
                };
                device.set_coil(address, set);
                coils.push(ModbusObject::coil(address, set));
            }
            let _ = self.events.send(WriteEvent::Coils {
                device_id: request.device_id,
                coils,
            });
        }

        response
    }

    fn write_multiple_registers(&self, request: &Request, device: &ModbusDevice) -> Response {
        let mut response = Response::for_request(request);

        let expected_bytes = request.count as usize * 2;
        if request.count < MIN_COUNT
            || request.count > MAX_REGISTER_WRITE_COUNT
            || request.byte_count as usize != expected_bytes
            || request.data.len() != expected_bytes
        {
            response.error = Some(ExceptionCode::IllegalDataValue);
        } else if request.address as u32 + request.count as u32 > MAX_ADDRESS as u32 {
            response.error = Some(ExceptionCode::IllegalDataAddress);
        } else {
            let mut registers = Vec::with_capacity(request.count as usize);
            for i in 0..request.count as usize {
                let address = request.address + i as u16;
                let value = match request.data.get_u16(i * 2) {
                    Ok(value) => value,
                    Err(_) => {
                        response.error = Some(ExceptionCode::SlaveDeviceFailure);
                        return response;
                    }
                };
                device.set_holding_register(address, value);
                registers.push(ModbusObject::holding_register(address, value));
            }
            let _ = self.events.send(WriteEvent::Registers {
                device_id: request.device_id,
                registers,
            });
        }

        response
    }

    /// Read device identification (function 43 / MEI 14).
    ///
    /// Individual reads of an unknown object id at or above 0x80 answer a
    /// synthesized placeholder instead of an address error; ids strictly
    /// between the named set and 0x80 are an address error.
    fn device_identification(&self, request: &Request) -> Response {
        let mut response = Response::for_request(request);
        let Some(mei) = request.mei else {
            response.error = Some(ExceptionCode::IllegalFunction);
            return response;
        };

        if mei.mei != Mei::ReadDeviceInformation {
            response.error = Some(ExceptionCode::IllegalFunction);
            return response;
        }
        if mei.object_id > 0x06 && mei.object_id < 0x80 {
            response.error = Some(ExceptionCode::IllegalDataAddress);
            return response;
        }
        let Ok(category) = DeviceIdCategory::try_from(mei.category) else {
            response.error = Some(ExceptionCode::IllegalDataValue);
            return response;
        };

        let named = |last: DeviceIdObject| {
            let mut list = Vec::new();
            for id in 0..=last as u8 {
                if let Ok(object) = DeviceIdObject::try_from(id) {
                    list.push((id, self.identity.object(object).to_string()));
                }
            }
            list
        };

        let (conformity_level, objects) = match category {
            DeviceIdCategory::Basic => (0x01, named(DeviceIdObject::MajorMinorRevision)),
            DeviceIdCategory::Regular => (0x02, named(DeviceIdObject::UserApplicationName)),
            DeviceIdCategory::Extended => (0x03, named(DeviceIdObject::UserApplicationName)),
            DeviceIdCategory::Individual => match DeviceIdObject::try_from(mei.object_id) {
                Ok(object) => {
                    let level = if object <= DeviceIdObject::MajorMinorRevision {
                        0x81
                    } else {
                        0x82
                    };
                    (level, vec![(mei.object_id, self.identity.object(object).to_string())])
                }
                Err(_) => (
                    0x83,
                    vec![(
                        mei.object_id,
                        format!("Custom Data for 0x{:02X}", mei.object_id),
                    )],
                ),
            },
        };

        response.mei = Some(MeiResponse {
            mei: Mei::ReadDeviceInformation,
            category,
            conformity_level,
            more_requests_needed: false,
            next_object_id: 0x00,
            object_count: objects.len() as u8,
        });

        let mut data = DataBuffer::new();
        for (id, text) in objects {
            // One length byte on the wire caps each object at 255 bytes
            let bytes = text.as_bytes();
            let len = bytes.len().min(u8::MAX as usize);
            data.add_u8(id);
            data.add_u8(len as u8);
            data.add_bytes(&bytes[..len]);
        }
        response.data = data;

        response
    }
}

struct ServerShared {
    config: ServerConfig,
    devices: DeviceMap,
    events: broadcast::Sender<WriteEvent>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

/// Modbus TCP server (slave)
pub struct ModbusTcpServer {
    shared: Arc<ServerShared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<JoinSet<()>>>,
}

impl ModbusTcpServer {
    /// Binds the listen socket and starts accepting with the built-in
    /// dispatch table
    pub async fn start(config: ServerConfig) -> Result<Self> {
        Self::start_inner(config, None).await
    }

    /// Binds and starts accepting with a custom dispatch function
    pub async fn start_with_handler(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Self> {
        Self::start_inner(config, Some(handler)).await
    }

    async fn start_inner(
        config: ServerConfig,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port))
            .await
            .map_err(|e| {
                ModbusError::transport(format!(
                    "bind to {}:{} failed: {e}",
                    config.bind_address, config.port
                ))
            })?;
        let local_addr = listener.local_addr()?;

        let devices: DeviceMap = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(64);

        let shared = Arc::new(ServerShared {
            devices: devices.clone(),
            events: events.clone(),
            local_addr,
            shutdown: CancellationToken::new(),
            config,
        });

        let handler = handler.unwrap_or_else(|| {
            Arc::new(DefaultHandler {
                devices,
                identity: shared.config.identity.clone(),
                events,
            })
        });

        let connections = Arc::new(Mutex::new(JoinSet::new()));
        let accept_task = tokio::spawn(accept_loop(
            shared.clone(),
            handler,
            listener,
            connections.clone(),
        ));
        info!(%local_addr, "server listening");

        Ok(ModbusTcpServer {
            shared,
            accept_task: Mutex::new(Some(accept_task)),
            connections,
        })
    }

    /// Actual bound address; useful when the configured port was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Write notifications fired by the built-in dispatch table
    pub fn subscribe(&self) -> broadcast::Receiver<WriteEvent> {
        self.shared.events.subscribe()
    }

    /// Registers a device; returns false when the id already exists
    pub fn add_device(&self, device_id: u8) -> bool {
        match self.shared.devices.entry(device_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(ModbusDevice::new(device_id)));
                true
            }
        }
    }

    pub fn remove_device(&self, device_id: u8) -> bool {
        self.shared.devices.remove(&device_id).is_some()
    }

    pub fn device(&self, device_id: u8) -> Option<Arc<ModbusDevice>> {
        self.shared.devices.get(&device_id).map(|d| d.value().clone())
    }

    fn known_device(&self, device_id: u8) -> Result<Arc<ModbusDevice>> {
        self.device(device_id)
            .ok_or_else(|| ModbusError::invalid_argument(format!("unknown device {device_id}")))
    }

    pub fn get_coil(&self, device_id: u8, address: u16) -> Result<ModbusObject> {
        Ok(self.known_device(device_id)?.get_coil(address))
    }

    pub fn set_coil(&self, device_id: u8, address: u16, value: bool) -> Result<()> {
        self.known_device(device_id)?.set_coil(address, value);
        Ok(())
    }

    pub fn get_discrete_input(&self, device_id: u8, address: u16) -> Result<ModbusObject> {
        Ok(self.known_device(device_id)?.get_discrete_input(address))
    }

    pub fn set_discrete_input(&self, device_id: u8, address: u16, value: bool) -> Result<()> {
        self.known_device(device_id)?.set_discrete_input(address, value);
        Ok(())
    }

    pub fn get_holding_register(&self, device_id: u8, address: u16) -> Result<ModbusObject> {
        Ok(self.known_device(device_id)?.get_holding_register(address))
    }

    pub fn set_holding_register(&self, device_id: u8, address: u16, value: u16) -> Result<()> {
        self.known_device(device_id)?.set_holding_register(address, value);
        Ok(())
    }

    pub fn get_input_register(&self, device_id: u8, address: u16) -> Result<ModbusObject> {
        Ok(self.known_device(device_id)?.get_input_register(address))
    }

    pub fn set_input_register(&self, device_id: u8, address: u16, value: u16) -> Result<()> {
        self.known_device(device_id)?.set_input_register(address, value);
        Ok(())
    }

    /// Stops the listener, cancels every connection loop, and waits for
    /// all of them. Idempotent.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        if let Some(handle) = self.accept_task.lock().await.take() {
            let _ = handle.await;
        }
        let mut connections = self.connections.lock().await;
        while connections.join_next().await.is_some() {}
    }
}

impl Drop for ModbusTcpServer {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn accept_loop(
    shared: Arc<ServerShared>,
    handler: Arc<dyn RequestHandler>,
    listener: TcpListener,
    connections: Arc<Mutex<JoinSet<()>>>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "client connected");
                let shared = shared.clone();
                let handler = handler.clone();
                connections
                    .lock()
                    .await
                    .spawn(connection_loop(shared, handler, stream, peer));
            }
            Err(e) => {
                warn!("accept failed: {}", e);
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// One loop per accepted peer. A header-read timeout retries; stream
/// errors end this loop only.
async fn connection_loop(
    shared: Arc<ServerShared>,
    handler: Arc<dyn RequestHandler>,
    mut stream: TcpStream,
    peer: SocketAddr,
) {
    let read_timeout = Duration::from_millis(shared.config.read_timeout_ms.max(1));
    let mut header = [0u8; FRAME_PREFIX_LEN];

    loop {
        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            read = timeout(read_timeout, stream.read_exact(&mut header)) => read,
        };
        let read = match read {
            // Quiet peer: retry the header read
            Err(_) => continue,
            Ok(read) => read,
        };
        if let Err(e) = read {
            debug!(%peer, "connection closed: {}", e);
            break;
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut frame = vec![0u8; FRAME_PREFIX_LEN + length];
        frame[..FRAME_PREFIX_LEN].copy_from_slice(&header);

        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            read = timeout(read_timeout, stream.read_exact(&mut frame[FRAME_PREFIX_LEN..])) => read,
        };
        match read {
            Err(_) => {
                // A half-delivered frame leaves the stream position unknown
                warn!(%peer, "timed out mid-frame, dropping connection");
                break;
            }
            Ok(Err(e)) => {
                debug!(%peer, "connection closed mid-frame: {}", e);
                break;
            }
            Ok(Ok(_)) => {}
        }

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                // Framing errors are fatal to the frame, not the connection
                warn!(%peer, "invalid request discarded: {}", e);
                continue;
            }
        };
        debug!(%peer, request = %request, "request received");

        if let Some(response) = handler.handle(request).await {
            match response.encode() {
                Ok(bytes) => {
                    if let Err(e) = stream.write_all(&bytes).await {
                        warn!(%peer, "response write failed: {}", e);
                        break;
                    }
                }
                Err(e) => warn!(%peer, "response not encodable: {}", e),
            }
        }
    }

    debug!(%peer, "client disconnected");
}
