//! Wire-level data points: coils, discrete inputs, and registers.

use serde::{Deserialize, Serialize};

/// Register space a [`ModbusObject`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModbusObjectKind {
    /// Read/write boolean output point
    Coil,
    /// Read-only boolean input point
    DiscreteInput,
    /// 16-bit read/write data point
    HoldingRegister,
    /// 16-bit read-only data point
    InputRegister,
}

impl std::fmt::Display for ModbusObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModbusObjectKind::Coil => "Coil",
            ModbusObjectKind::DiscreteInput => "Discrete Input",
            ModbusObjectKind::HoldingRegister => "Holding Register",
            ModbusObjectKind::InputRegister => "Input Register",
        };
        f.write_str(name)
    }
}

/// One addressed data point carrying its two raw wire bytes.
///
/// The raw bytes are interpreted as a big-endian 16-bit value for
/// registers and as "any nonzero byte means on" for boolean points.
/// Boolean constructors use the canonical single-coil wire encoding
/// (0xFF00 for on, 0x0000 for off).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModbusObject {
    kind: ModbusObjectKind,
    address: u16,
    raw: [u8; 2],
}

impl ModbusObject {
    pub fn coil(address: u16, value: bool) -> Self {
        ModbusObject {
            kind: ModbusObjectKind::Coil,
            address,
            raw: if value { [0xFF, 0x00] } else { [0x00, 0x00] },
        }
    }

    pub fn discrete_input(address: u16, value: bool) -> Self {
        ModbusObject {
            kind: ModbusObjectKind::DiscreteInput,
            address,
            raw: if value { [0xFF, 0x00] } else { [0x00, 0x00] },
        }
    }

    pub fn holding_register(address: u16, value: u16) -> Self {
        ModbusObject {
            kind: ModbusObjectKind::HoldingRegister,
            address,
            raw: value.to_be_bytes(),
        }
    }

    pub fn input_register(address: u16, value: u16) -> Self {
        ModbusObject {
            kind: ModbusObjectKind::InputRegister,
            address,
            raw: value.to_be_bytes(),
        }
    }

    /// Rebuilds an object from the two bytes read off the wire
    pub fn from_raw(kind: ModbusObjectKind, address: u16, hi: u8, lo: u8) -> Self {
        ModbusObject {
            kind,
            address,
            raw: [hi, lo],
        }
    }

    pub fn kind(&self) -> ModbusObjectKind {
        self.kind
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Big-endian 16-bit interpretation of the raw bytes
    pub fn value(&self) -> u16 {
        u16::from_be_bytes(self.raw)
    }

    /// Boolean interpretation: any nonzero byte is true
    pub fn as_bool(&self) -> bool {
        self.raw[0] != 0 || self.raw[1] != 0
    }

    pub fn high_byte(&self) -> u8 {
        self.raw[0]
    }

    pub fn low_byte(&self) -> u8 {
        self.raw[1]
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self.kind,
            ModbusObjectKind::Coil | ModbusObjectKind::DiscreteInput
        )
    }
}

impl std::fmt::Display for ModbusObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_boolean() {
            write!(f, "{}#{}: {}", self.kind, self.address, self.as_bool())
        } else {
            write!(f, "{}#{}: {}", self.kind, self.address, self.value())
        }
    }
}
