//! Modbus TCP client: connection lifecycle, reconnection, and
//! request/response correlation over one socket.
//!
//! A single background actor owns every link-state transition. Transport
//! failures resolve the affected operation as "no result" and hand the
//! link to the actor; they never surface as panics or retries.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::DataBuffer;
use crate::error::{ModbusError, Result};
use crate::frame::{Request, Response, FRAME_PREFIX_LEN};
use crate::object::{ModbusObject, ModbusObjectKind};
use crate::types::{
    DeviceIdCategory, DeviceIdObject, FunctionCode, COIL_OFF, COIL_ON, MAX_ADDRESS,
    MAX_COIL_READ_COUNT, MAX_COIL_WRITE_COUNT, MAX_REGISTER_READ_COUNT,
    MAX_REGISTER_WRITE_COUNT, MIN_COUNT,
};

/// Pause between consecutive connect attempts
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Client configuration; all durations are milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Timeout of the first connect attempt; doubles per retry
    pub connect_timeout_ms: u64,
    /// Upper bound for the growing connect timeout
    pub max_connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    /// Overall deadline of one reconnect cycle; `None` retries forever
    pub reconnect_deadline_ms: Option<u64>,
    /// Match responses by transaction id; disable for servers that do
    /// not echo distinct ids (oldest-pending-first is used instead)
    pub enable_transaction_id: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 502,
            connect_timeout_ms: 2_000,
            max_connect_timeout_ms: 30_000,
            send_timeout_ms: 1_000,
            receive_timeout_ms: 2_000,
            reconnect_deadline_ms: None,
            enable_transaction_id: true,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ClientConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }
}

/// Connection state published by the reconnect actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Lifecycle notifications delivered through [`ModbusTcpClient::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
}

struct PendingRequest {
    transaction_id: u16,
    tx: oneshot::Sender<Response>,
}

/// Removes its registry entry when dropped, so an operation abandoned
/// before resolution (caller cancellation included) cannot capture a
/// response that belongs to a later request.
struct PendingGuard<'a> {
    shared: &'a ClientShared,
    transaction_id: u16,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.remove_pending(self.transaction_id);
    }
}

struct ClientShared {
    config: ClientConfig,
    next_transaction: AtomicU16,
    /// Short-held registry lock; never held across socket I/O
    pending: SyncMutex<VecDeque<PendingRequest>>,
    /// Serializes physical writes (one writer at a time)
    writer: Mutex<Option<OwnedWriteHalf>>,
    link: watch::Sender<LinkState>,
    events: broadcast::Sender<ClientEvent>,
    reconnect_tx: mpsc::Sender<()>,
    /// Invalidates receive loops left over from a previous connection
    generation: AtomicU64,
    shutdown: CancellationToken,
}

impl ClientShared {
    fn request_reconnect(&self) {
        // Capacity 1: a full channel means an attempt is already queued
        // or running, which keeps reconnects single-flight.
        let _ = self.reconnect_tx.try_send(());
    }

    async fn mark_disconnected(&self) {
        *self.writer.lock().await = None;
        let was = self.link.send_replace(LinkState::Disconnected);
        if was == LinkState::Connected {
            let _ = self.events.send(ClientEvent::Disconnected);
        }
    }

    fn drain_pending(&self) {
        // Dropping the senders resolves every waiter as a transport loss
        self.pending.lock().clear();
    }

    fn remove_pending(&self, transaction_id: u16) {
        let mut pending = self.pending.lock();
        if let Some(index) = pending
            .iter()
            .position(|p| p.transaction_id == transaction_id)
        {
            pending.remove(index);
        }
    }

    /// Hands a decoded response to its waiting operation
    fn resolve(&self, response: Response) {
        let entry = {
            let mut pending = self.pending.lock();
            if self.config.enable_transaction_id {
                pending
                    .iter()
                    .position(|p| p.transaction_id == response.transaction_id)
                    .and_then(|index| pending.remove(index))
            } else {
                pending.pop_front()
            }
        };
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(response);
            }
            None => warn!(
                transaction_id = response.transaction_id,
                "response without a pending request, discarding"
            ),
        }
    }

    async fn connection_lost(self: &Arc<Self>, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.mark_disconnected().await;
        self.drain_pending();
        self.request_reconnect();
    }

    async fn send_request(&self, mut request: Request) -> Result<Response> {
        if self.shutdown.is_cancelled() {
            return Err(ModbusError::Closed);
        }
        if *self.link.borrow() != LinkState::Connected {
            return Err(ModbusError::NotConnected);
        }

        request.transaction_id = self.next_transaction.fetch_add(1, Ordering::Relaxed);
        let transaction_id = request.transaction_id;
        let frame = request.encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().push_back(PendingRequest { transaction_id, tx });
        // Every exit below drops the guard, which takes the entry back out
        // of the registry. That covers error returns, the receive timeout,
        // and the caller abandoning this future before a response arrives.
        let _guard = PendingGuard {
            shared: self,
            transaction_id,
        };

        {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(ModbusError::NotConnected);
            };
            let send_timeout = Duration::from_millis(self.config.send_timeout_ms);
            match timeout(send_timeout, writer.write_all(&frame)).await {
                Ok(Ok(())) => {
                    debug!(transaction_id, function = %request.function, "request sent");
                }
                Ok(Err(e)) => {
                    return Err(ModbusError::transport(format!("socket write failed: {e}")));
                }
                Err(_) => {
                    return Err(ModbusError::timeout("socket write timed out"));
                }
            }
        }

        let receive_timeout = Duration::from_millis(self.config.receive_timeout_ms);
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ModbusError::Closed),
            result = timeout(receive_timeout, rx) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(ModbusError::transport(
                    "connection lost while awaiting response",
                )),
                Err(_) => Err(ModbusError::timeout(format!(
                    "no response for transaction {transaction_id} within {}ms",
                    self.config.receive_timeout_ms
                ))),
            }
        }
    }

    /// One full reconnect cycle: resolve, connect with growing timeout,
    /// retry until success, deadline, or shutdown.
    async fn reconnect(self: &Arc<Self>) {
        self.link.send_replace(LinkState::Connecting);

        let address = format!("{}:{}", self.config.host, self.config.port);
        let started = Instant::now();
        let deadline = self.config.reconnect_deadline_ms.map(Duration::from_millis);
        let max_timeout = Duration::from_millis(
            self.config
                .max_connect_timeout_ms
                .max(self.config.connect_timeout_ms)
                .max(1),
        );
        let mut connect_timeout =
            Duration::from_millis(self.config.connect_timeout_ms.max(1)).min(max_timeout);
        let mut attempt = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                self.link.send_replace(LinkState::Disconnected);
                return;
            }
            if let Some(deadline) = deadline {
                if started.elapsed() >= deadline {
                    error!("reconnect to {} abandoned after {:?}", address, deadline);
                    self.link.send_replace(LinkState::Disconnected);
                    return;
                }
            }

            attempt += 1;
            debug!(attempt, %address, "connecting");
            match timeout(connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let (reader, writer) = stream.into_split();
                    *self.writer.lock().await = Some(writer);
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    self.link.send_replace(LinkState::Connected);
                    let _ = self.events.send(ClientEvent::Connected);
                    info!(%address, "connected");
                    let shared = self.clone();
                    tokio::spawn(async move {
                        receive_loop(shared, reader, generation).await;
                    });
                    return;
                }
                Ok(Err(e)) => warn!(attempt, %address, "connect failed: {}", e),
                Err(_) => warn!(
                    attempt,
                    %address,
                    "connect timed out after {:?}",
                    connect_timeout
                ),
            }

            connect_timeout = (connect_timeout * 2).min(max_timeout);
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.link.send_replace(LinkState::Disconnected);
                    return;
                }
                _ = sleep(RECONNECT_PAUSE) => {}
            }
        }
    }
}

/// All link-state transitions run here, serialized on one task
async fn reconnect_actor(shared: Arc<ClientShared>, mut rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            request = rx.recv() => {
                if request.is_none() {
                    break;
                }
                // Stale trigger: a previous cycle already restored the link
                if *shared.link.borrow() == LinkState::Connected {
                    continue;
                }
                shared.reconnect().await;
                while rx.try_recv().is_ok() {}
            }
        }
    }
}

/// Reads frames off the socket and resolves pending requests until the
/// stream ends or the client shuts down
async fn receive_loop(shared: Arc<ClientShared>, mut reader: OwnedReadHalf, generation: u64) {
    let mut header = [0u8; FRAME_PREFIX_LEN];
    loop {
        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => {
                shared.drain_pending();
                return;
            }
            result = reader.read_exact(&mut header) => result,
        };
        if let Err(e) = read {
            debug!("receive stream ended: {}", e);
            shared.connection_lost(generation).await;
            return;
        }

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut frame = vec![0u8; FRAME_PREFIX_LEN + length];
        frame[..FRAME_PREFIX_LEN].copy_from_slice(&header);

        let read = tokio::select! {
            _ = shared.shutdown.cancelled() => {
                shared.drain_pending();
                return;
            }
            result = reader.read_exact(&mut frame[FRAME_PREFIX_LEN..]) => result,
        };
        if let Err(e) = read {
            debug!("receive stream ended mid-frame: {}", e);
            shared.connection_lost(generation).await;
            return;
        }

        match Response::decode(&frame) {
            Ok(response) => shared.resolve(response),
            Err(e) => {
                // A frame we cannot decode leaves the stream position
                // unknown; drop the connection to resynchronize.
                warn!("undecodable response, resynchronizing: {}", e);
                shared.connection_lost(generation).await;
                return;
            }
        }
    }
}

/// Modbus TCP client (master)
pub struct ModbusTcpClient {
    shared: Arc<ClientShared>,
    reconnect_rx: SyncMutex<Option<mpsc::Receiver<()>>>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ModbusTcpClient {
    pub fn new(config: ClientConfig) -> Self {
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (link, _) = watch::channel(LinkState::Disconnected);
        let (events, _) = broadcast::channel(16);
        ModbusTcpClient {
            shared: Arc::new(ClientShared {
                config,
                next_transaction: AtomicU16::new(0),
                pending: SyncMutex::new(VecDeque::new()),
                writer: Mutex::new(None),
                link,
                events,
                reconnect_tx,
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
            reconnect_rx: SyncMutex::new(Some(reconnect_rx)),
            actor: Mutex::new(None),
        }
    }

    /// Starts (or joins) the reconnect actor and waits for the link.
    ///
    /// Idempotent. Returns once connected, or with a timeout error when
    /// the configured reconnect deadline elapses first.
    pub async fn open(&self) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(ModbusError::Closed);
        }

        {
            let mut actor = self.actor.lock().await;
            if actor.is_none() {
                let rx = self.reconnect_rx.lock().take();
                if let Some(rx) = rx {
                    let shared = self.shared.clone();
                    *actor = Some(tokio::spawn(async move {
                        reconnect_actor(shared, rx).await;
                    }));
                }
            }
        }
        self.shared.request_reconnect();

        let mut link = self.shared.link.subscribe();
        let connected = async {
            loop {
                if *link.borrow_and_update() == LinkState::Connected {
                    return Ok(());
                }
                if link.changed().await.is_err() {
                    return Err(ModbusError::Closed);
                }
            }
        };

        match self.shared.config.reconnect_deadline_ms {
            Some(deadline_ms) => {
                timeout(Duration::from_millis(deadline_ms), connected)
                    .await
                    .map_err(|_| {
                        ModbusError::timeout(format!("not connected within {deadline_ms}ms"))
                    })?
            }
            None => tokio::select! {
                _ = self.shared.shutdown.cancelled() => Err(ModbusError::Closed),
                result = connected => result,
            },
        }
    }

    /// Cancels all in-flight work, closes the socket, and waits for the
    /// background tasks. Idempotent; later operations fail with `Closed`.
    pub async fn close(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        self.shared.mark_disconnected().await;
        self.shared.drain_pending();
        if let Some(handle) = self.actor.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.link.borrow() == LinkState::Connected
    }

    /// Connected/disconnected notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub async fn read_coils(
        &self,
        device_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<ModbusObject>>> {
        check_read_range(address, count, MAX_COIL_READ_COUNT)?;
        let request = Request::read(FunctionCode::ReadCoils, device_id, address, count);
        let Some(response) = self.submit(request).await? else {
            return Ok(None);
        };
        Ok(Some(unpack_bits(
            &response,
            address,
            count,
            ModbusObjectKind::Coil,
        )?))
    }

    pub async fn read_discrete_inputs(
        &self,
        device_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<ModbusObject>>> {
        check_read_range(address, count, MAX_COIL_READ_COUNT)?;
        let request = Request::read(FunctionCode::ReadDiscreteInputs, device_id, address, count);
        let Some(response) = self.submit(request).await? else {
            return Ok(None);
        };
        Ok(Some(unpack_bits(
            &response,
            address,
            count,
            ModbusObjectKind::DiscreteInput,
        )?))
    }

    pub async fn read_holding_registers(
        &self,
        device_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<ModbusObject>>> {
        check_read_range(address, count, MAX_REGISTER_READ_COUNT)?;
        let request = Request::read(FunctionCode::ReadHoldingRegisters, device_id, address, count);
        let Some(response) = self.submit(request).await? else {
            return Ok(None);
        };
        Ok(Some(unpack_registers(
            &response,
            address,
            count,
            ModbusObjectKind::HoldingRegister,
        )?))
    }

    pub async fn read_input_registers(
        &self,
        device_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Option<Vec<ModbusObject>>> {
        check_read_range(address, count, MAX_REGISTER_READ_COUNT)?;
        let request = Request::read(FunctionCode::ReadInputRegisters, device_id, address, count);
        let Some(response) = self.submit(request).await? else {
            return Ok(None);
        };
        Ok(Some(unpack_registers(
            &response,
            address,
            count,
            ModbusObjectKind::InputRegister,
        )?))
    }

    /// Writes one coil. Returns false when the transport failed.
    pub async fn write_single_coil(&self, device_id: u8, coil: &ModbusObject) -> Result<bool> {
        if coil.kind() != ModbusObjectKind::Coil {
            return Err(ModbusError::invalid_argument(format!(
                "expected a coil, got {}",
                coil.kind()
            )));
        }
        let value = coil.value();
        if value != COIL_ON && value != COIL_OFF {
            return Err(ModbusError::invalid_argument(format!(
                "coil wire value must be 0xFF00 or 0x0000, got 0x{value:04X}"
            )));
        }
        let request =
            Request::write_single(FunctionCode::WriteSingleCoil, device_id, coil.address(), value);
        Ok(self.submit(request).await?.is_some())
    }

    /// Writes one holding register. Returns false when the transport failed.
    pub async fn write_single_register(
        &self,
        device_id: u8,
        register: &ModbusObject,
    ) -> Result<bool> {
        if register.kind() != ModbusObjectKind::HoldingRegister {
            return Err(ModbusError::invalid_argument(format!(
                "expected a holding register, got {}",
                register.kind()
            )));
        }
        let request = Request::write_single(
            FunctionCode::WriteSingleRegister,
            device_id,
            register.address(),
            register.value(),
        );
        Ok(self.submit(request).await?.is_some())
    }

    /// Writes a contiguous run of coils (function 15)
    pub async fn write_coils(&self, device_id: u8, coils: &[ModbusObject]) -> Result<bool> {
        let sorted = sort_contiguous(coils, ModbusObjectKind::Coil, MAX_COIL_WRITE_COUNT)?;
        let count = sorted.len() as u16;
        let first = sorted[0].address();

        let mut bits = vec![0u8; (sorted.len() + 7) / 8];
        for (i, coil) in sorted.iter().enumerate() {
            if coil.as_bool() {
                bits[i / 8] |= 1 << (i % 8);
            }
        }

        let request = Request::write_multiple(
            FunctionCode::WriteMultipleCoils,
            device_id,
            first,
            count,
            DataBuffer::from(bits),
        );
        Ok(self.submit(request).await?.is_some())
    }

    /// Writes a contiguous run of holding registers (function 16)
    pub async fn write_registers(
        &self,
        device_id: u8,
        registers: &[ModbusObject],
    ) -> Result<bool> {
        let sorted = sort_contiguous(
            registers,
            ModbusObjectKind::HoldingRegister,
            MAX_REGISTER_WRITE_COUNT,
        )?;
        let count = sorted.len() as u16;
        let first = sorted[0].address();

        let mut data = DataBuffer::new();
        for register in &sorted {
            data.add_u16(register.value());
        }

        let request = Request::write_multiple(
            FunctionCode::WriteMultipleRegisters,
            device_id,
            first,
            count,
            data,
        );
        Ok(self.submit(request).await?.is_some())
    }

    /// Reads the well-known device identification objects of `category`
    pub async fn read_device_information(
        &self,
        device_id: u8,
        category: DeviceIdCategory,
    ) -> Result<Option<BTreeMap<DeviceIdObject, String>>> {
        let Some(raw) = self.read_device_information_raw(device_id, category, 0).await? else {
            return Ok(None);
        };
        let mut objects = BTreeMap::new();
        for (id, bytes) in raw {
            if let Ok(object) = DeviceIdObject::try_from(id) {
                objects.insert(object, String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        Ok(Some(objects))
    }

    /// Reads device identification starting at `object_id`, following the
    /// protocol's pagination: while the server reports more requests are
    /// needed, the read is re-issued from `next_object_id` and the pages
    /// are merged.
    pub async fn read_device_information_raw(
        &self,
        device_id: u8,
        category: DeviceIdCategory,
        object_id: u8,
    ) -> Result<Option<BTreeMap<u8, Vec<u8>>>> {
        let mut merged = BTreeMap::new();
        let mut next = object_id;

        for _ in 0..=u8::MAX {
            let request = Request::read_device_identification(device_id, category, next);
            let Some(response) = self.submit(request).await? else {
                return Ok(None);
            };
            let mei = response.mei.ok_or_else(|| {
                ModbusError::framing("device identification response without MEI fields")
            })?;

            let truncated =
                |e: ModbusError| ModbusError::framing(format!("truncated object list: {e}"));
            let mut offset = 0usize;
            for _ in 0..mei.object_count {
                let id = response.data.get_u8(offset).map_err(truncated)?;
                let len = response.data.get_u8(offset + 1).map_err(truncated)? as usize;
                let bytes = response.data.get_bytes(offset + 2, len).map_err(truncated)?;
                merged.insert(id, bytes.to_vec());
                offset += 2 + len;
            }

            if !mei.more_requests_needed {
                return Ok(Some(merged));
            }
            next = mei.next_object_id;
        }

        Err(ModbusError::framing(
            "device identification pagination did not terminate",
        ))
    }

    /// Sends one request and classifies the outcome: `None` for transport
    /// failures and timeouts (logged, reconnect triggered), an error for
    /// protocol exceptions, `Some` for a real response.
    async fn submit(&self, request: Request) -> Result<Option<Response>> {
        let device_id = request.device_id;
        let function = request.function;

        match self.shared.send_request(request).await {
            Ok(response) => {
                if response.is_timeout() {
                    warn!(device_id, %function, "device did not answer");
                    return Ok(None);
                }
                if let Some(exception) = response.error {
                    return Err(ModbusError::Exception {
                        device_id,
                        function,
                        exception,
                    });
                }
                Ok(Some(response))
            }
            Err(e) if e.is_transport() => {
                warn!(device_id, %function, "transport failure: {}", e);
                self.shared.request_reconnect();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for ModbusTcpClient {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

fn check_read_range(address: u16, count: u16, max_count: u16) -> Result<()> {
    if count < MIN_COUNT || count > max_count {
        return Err(ModbusError::invalid_argument(format!(
            "count {count} outside {MIN_COUNT}..={max_count}"
        )));
    }
    if address as u32 + count as u32 > MAX_ADDRESS as u32 {
        return Err(ModbusError::invalid_argument(format!(
            "address {address} + count {count} exceeds {MAX_ADDRESS}"
        )));
    }
    Ok(())
}

/// Validates a multi-write object list: uniform kind, legal count, and one
/// contiguous address run. Returns the objects sorted by address.
fn sort_contiguous(
    objects: &[ModbusObject],
    kind: ModbusObjectKind,
    max_count: u16,
) -> Result<Vec<ModbusObject>> {
    if objects.is_empty() {
        return Err(ModbusError::invalid_argument("no objects to write"));
    }
    if objects.len() > max_count as usize {
        return Err(ModbusError::invalid_argument(format!(
            "{} objects exceed the per-request limit of {max_count}",
            objects.len()
        )));
    }
    for object in objects {
        if object.kind() != kind {
            return Err(ModbusError::invalid_argument(format!(
                "expected {kind}, got {}",
                object.kind()
            )));
        }
    }

    let mut sorted = objects.to_vec();
    sorted.sort_by_key(|o| o.address());

    let first = sorted[0].address() as u32;
    let last = sorted[sorted.len() - 1].address() as u32;
    if first + sorted.len() as u32 - 1 != last {
        return Err(ModbusError::invalid_argument(
            "target addresses must form one contiguous run",
        ));
    }
    check_read_range(sorted[0].address(), sorted.len() as u16, max_count)?;

    Ok(sorted)
}

/// LSB-first bit unpacking for coil/discrete-input read responses
fn unpack_bits(
    response: &Response,
    address: u16,
    count: u16,
    kind: ModbusObjectKind,
) -> Result<Vec<ModbusObject>> {
    let mut objects = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let byte = response
            .data
            .get_u8(i / 8)
            .map_err(|_| ModbusError::framing("coil payload shorter than requested count"))?;
        let value = (byte >> (i % 8)) & 1 == 1;
        objects.push(ModbusObject::from_raw(
            kind,
            address + i as u16,
            if value { 0xFF } else { 0x00 },
            0x00,
        ));
    }
    Ok(objects)
}

fn unpack_registers(
    response: &Response,
    address: u16,
    count: u16,
    kind: ModbusObjectKind,
) -> Result<Vec<ModbusObject>> {
    let mut objects = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let hi = response
            .data
            .get_u8(i * 2)
            .map_err(|_| ModbusError::framing("register payload shorter than requested count"))?;
        let lo = response
            .data
            .get_u8(i * 2 + 1)
            .map_err(|_| ModbusError::framing("register payload shorter than requested count"))?;
        objects.push(ModbusObject::from_raw(kind, address + i as u16, hi, lo));
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 502);
        assert!(config.enable_transaction_id);
        assert!(config.reconnect_deadline_ms.is_none());
        assert_eq!(config.connect_timeout_ms, 2_000);
    }

    #[tokio::test]
    async fn test_read_count_validation_is_synchronous() {
        let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 50200));

        let err = client.read_coils(1, 0, 0).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        let err = client.read_coils(1, 0, 2001).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        let err = client.read_holding_registers(1, 0, 126).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        let err = client.read_holding_registers(1, 65500, 100).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_noncontiguous_write_rejected() {
        let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 50201));

        let coils = vec![
            ModbusObject::coil(1, true),
            ModbusObject::coil(3, false),
        ];
        let err = client.write_coils(1, &coils).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        // Out-of-order but contiguous input is accepted down to the
        // transport layer (where it fails as not connected => Ok(false))
        let coils = vec![
            ModbusObject::coil(2, true),
            ModbusObject::coil(1, false),
            ModbusObject::coil(3, true),
        ];
        assert!(!client.write_coils(1, &coils).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_object_kind_rejected() {
        let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 50202));

        let register = ModbusObject::holding_register(1, 42);
        let err = client.write_single_coil(1, &register).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        let coil = ModbusObject::coil(1, true);
        let err = client.write_single_register(1, &coil).await.unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));

        let err = client
            .write_registers(1, &[coil])
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_operations_without_link_return_none() {
        let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 50203));
        assert!(!client.is_connected());
        assert_eq!(client.read_coils(1, 0, 8).await.unwrap(), None);
        assert!(!client
            .write_single_coil(1, &ModbusObject::coil(0, true))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 50204));
        client.close().await;
        client.close().await;

        let err = client.open().await.unwrap_err();
        assert_eq!(err, ModbusError::Closed);
        let err = client.read_coils(1, 0, 1).await.unwrap_err();
        assert_eq!(err, ModbusError::Closed);
    }

    #[test]
    fn test_sort_contiguous_detects_duplicates() {
        let coils = vec![
            ModbusObject::coil(1, true),
            ModbusObject::coil(1, false),
            ModbusObject::coil(2, true),
        ];
        assert!(sort_contiguous(&coils, ModbusObjectKind::Coil, MAX_COIL_WRITE_COUNT).is_err());
    }
}
