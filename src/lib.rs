//! Modbus TCP protocol engine.
//!
//! An async client (master) and server (slave) exchanging binary-framed
//! requests and responses to read and write coils, discrete inputs, and
//! 16-bit registers on addressable devices, plus the device-identification
//! sub-protocol (function 43 / MEI 14).
//!
//! # Example
//!
//! ```no_run
//! use mbtcp::{ClientConfig, ModbusTcpClient, ModbusTcpServer, ServerConfig};
//!
//! # async fn example() -> mbtcp::Result<()> {
//! let server = ModbusTcpServer::start(ServerConfig::default()).await?;
//! server.add_device(1);
//! server.set_holding_register(1, 100, 42)?;
//!
//! let client = ModbusTcpClient::new(ClientConfig::new("127.0.0.1", 502));
//! client.open().await?;
//! let registers = client.read_holding_registers(1, 100, 1).await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod device;
pub mod error;
pub mod frame;
pub mod object;
pub mod server;
pub mod types;

pub use buffer::DataBuffer;
pub use client::{ClientConfig, ClientEvent, LinkState, ModbusTcpClient};
pub use device::ModbusDevice;
pub use error::{ModbusError, Result};
pub use frame::{MeiRequest, MeiResponse, Request, Response};
pub use object::{ModbusObject, ModbusObjectKind};
pub use server::{
    ModbusTcpServer, RequestHandler, ServerConfig, ServerIdentity, WriteEvent,
};
pub use types::{DeviceIdCategory, DeviceIdObject, ExceptionCode, FunctionCode, Mei};
