//! Protocol constants, function codes, and exception codes.

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, Result};

/// Bit OR-ed into the function code of an error response
pub const ERROR_MASK: u8 = 0x80;

/// Lowest addressable point
pub const MIN_ADDRESS: u16 = 0;
/// Highest addressable point
pub const MAX_ADDRESS: u16 = u16::MAX;
/// Smallest legal count for any read or write
pub const MIN_COUNT: u16 = 1;
/// Largest coil/discrete-input count for one read (function 1/2)
pub const MAX_COIL_READ_COUNT: u16 = 2000;
/// Largest coil count for one multiple write (function 15)
pub const MAX_COIL_WRITE_COUNT: u16 = 1968;
/// Largest register count for one read (function 3/4)
pub const MAX_REGISTER_READ_COUNT: u16 = 125;
/// Largest register count for one multiple write (function 16)
pub const MAX_REGISTER_WRITE_COUNT: u16 = 123;

/// Wire value of a single-coil write for "on"
pub const COIL_ON: u16 = 0xFF00;
/// Wire value of a single-coil write for "off"
pub const COIL_OFF: u16 = 0x0000;

/// Modbus function codes supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
    EncapsulatedInterface = 0x2B,
}

impl TryFrom<u8> for FunctionCode {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            0x2B => Ok(FunctionCode::EncapsulatedInterface),
            _ => Err(ModbusError::framing(format!(
                "Unknown function code: 0x{value:02X}"
            ))),
        }
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
            FunctionCode::EncapsulatedInterface => "Encapsulated Interface",
        };
        write!(f, "{name} (0x{:02X})", *self as u8)
    }
}

/// Exception codes carried in error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ExceptionCode {
    pub fn description(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal function",
            ExceptionCode::IllegalDataAddress => "Illegal data address",
            ExceptionCode::IllegalDataValue => "Illegal data value",
            ExceptionCode::SlaveDeviceFailure => "Slave device failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave device busy",
            ExceptionCode::NegativeAcknowledge => "Negative acknowledge",
            ExceptionCode::MemoryParityError => "Memory parity error",
            ExceptionCode::GatewayPathUnavailable => "Gateway path unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                "Gateway target device failed to respond"
            }
        }
    }
}

impl TryFrom<u8> for ExceptionCode {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(ExceptionCode::IllegalFunction),
            0x02 => Ok(ExceptionCode::IllegalDataAddress),
            0x03 => Ok(ExceptionCode::IllegalDataValue),
            0x04 => Ok(ExceptionCode::SlaveDeviceFailure),
            0x05 => Ok(ExceptionCode::Acknowledge),
            0x06 => Ok(ExceptionCode::SlaveDeviceBusy),
            0x07 => Ok(ExceptionCode::NegativeAcknowledge),
            0x08 => Ok(ExceptionCode::MemoryParityError),
            0x0A => Ok(ExceptionCode::GatewayPathUnavailable),
            0x0B => Ok(ExceptionCode::GatewayTargetDeviceFailedToRespond),
            _ => Err(ModbusError::framing(format!(
                "Unknown exception code: 0x{value:02X}"
            ))),
        }
    }
}

impl std::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), *self as u8)
    }
}

/// MEI sub-codes for function 43
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mei {
    CanOpenGeneralReference = 0x0D,
    ReadDeviceInformation = 0x0E,
}

impl TryFrom<u8> for Mei {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0D => Ok(Mei::CanOpenGeneralReference),
            0x0E => Ok(Mei::ReadDeviceInformation),
            _ => Err(ModbusError::framing(format!(
                "Unknown MEI sub-code: 0x{value:02X}"
            ))),
        }
    }
}

/// Device identification read categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceIdCategory {
    /// Mandatory objects: vendor name, product code, revision
    Basic = 0x01,
    /// Basic plus the optional named objects
    Regular = 0x02,
    /// Regular plus vendor-private objects
    Extended = 0x03,
    /// One specific object
    Individual = 0x04,
}

impl TryFrom<u8> for DeviceIdCategory {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(DeviceIdCategory::Basic),
            0x02 => Ok(DeviceIdCategory::Regular),
            0x03 => Ok(DeviceIdCategory::Extended),
            0x04 => Ok(DeviceIdCategory::Individual),
            _ => Err(ModbusError::framing(format!(
                "Unknown device id category: 0x{value:02X}"
            ))),
        }
    }
}

/// Well-known device identification object ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceIdObject {
    VendorName = 0x00,
    ProductCode = 0x01,
    MajorMinorRevision = 0x02,
    VendorUrl = 0x03,
    ProductName = 0x04,
    ModelName = 0x05,
    UserApplicationName = 0x06,
}

impl TryFrom<u8> for DeviceIdObject {
    type Error = ModbusError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(DeviceIdObject::VendorName),
            0x01 => Ok(DeviceIdObject::ProductCode),
            0x02 => Ok(DeviceIdObject::MajorMinorRevision),
            0x03 => Ok(DeviceIdObject::VendorUrl),
            0x04 => Ok(DeviceIdObject::ProductName),
            0x05 => Ok(DeviceIdObject::ModelName),
            0x06 => Ok(DeviceIdObject::UserApplicationName),
            _ => Err(ModbusError::framing(format!(
                "Unknown device id object: 0x{value:02X}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_code_roundtrip() {
        for code in [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10, 0x2B] {
            let fc = FunctionCode::try_from(code).unwrap();
            assert_eq!(fc as u8, code);
        }
    }

    #[test]
    fn test_invalid_function_code() {
        let err = FunctionCode::try_from(0x07).unwrap_err();
        assert!(matches!(err, ModbusError::Framing(_)));
        assert!(FunctionCode::try_from(0x00).is_err());
        assert!(FunctionCode::try_from(0x81).is_err());
    }

    #[test]
    fn test_exception_code_values() {
        assert_eq!(ExceptionCode::IllegalFunction as u8, 1);
        assert_eq!(ExceptionCode::GatewayPathUnavailable as u8, 10);
        assert_eq!(ExceptionCode::GatewayTargetDeviceFailedToRespond as u8, 11);
        assert!(ExceptionCode::try_from(9).is_err());
        assert!(ExceptionCode::try_from(0).is_err());
    }

    #[test]
    fn test_mei_and_category() {
        assert_eq!(Mei::try_from(14).unwrap(), Mei::ReadDeviceInformation);
        assert_eq!(Mei::try_from(13).unwrap(), Mei::CanOpenGeneralReference);
        assert!(Mei::try_from(15).is_err());

        assert_eq!(DeviceIdCategory::try_from(1).unwrap(), DeviceIdCategory::Basic);
        assert_eq!(DeviceIdCategory::try_from(4).unwrap(), DeviceIdCategory::Individual);
        assert!(DeviceIdCategory::try_from(5).is_err());
    }

    #[test]
    fn test_device_id_object_range() {
        assert_eq!(DeviceIdObject::try_from(0).unwrap(), DeviceIdObject::VendorName);
        assert_eq!(
            DeviceIdObject::try_from(6).unwrap(),
            DeviceIdObject::UserApplicationName
        );
        assert!(DeviceIdObject::try_from(7).is_err());
    }
}
