//! Endian-aware byte buffer used by the frame codec.
//!
//! Modbus frames are small (bounded by the 260-byte TCP ADU), so the
//! growable `add_*` operations simply extend a `Vec<u8>`.

use crate::error::{ModbusError, Result};

/// Growable byte sequence with typed indexed access.
///
/// Multi-byte values are stored big-endian unless the little-endian flag
/// is set. Modbus wire values are big-endian, which is the default.
#[derive(Debug, Clone, Default)]
pub struct DataBuffer {
    bytes: Vec<u8>,
    little_endian: bool,
}

macro_rules! numeric_accessors {
    ($set:ident, $get:ident, $add:ident, $ty:ty, $size:expr) => {
        pub fn $set(&mut self, index: usize, value: $ty) -> Result<()> {
            let bytes = if self.little_endian {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            self.set_bytes(index, &bytes)
        }

        pub fn $get(&self, index: usize) -> Result<$ty> {
            let slice = self.get_bytes(index, $size)?;
            let mut raw = [0u8; $size];
            raw.copy_from_slice(slice);
            Ok(if self.little_endian {
                <$ty>::from_le_bytes(raw)
            } else {
                <$ty>::from_be_bytes(raw)
            })
        }

        pub fn $add(&mut self, value: $ty) {
            let bytes = if self.little_endian {
                value.to_le_bytes()
            } else {
                value.to_be_bytes()
            };
            self.bytes.extend_from_slice(&bytes);
        }
    };
}

impl DataBuffer {
    /// Empty buffer in big-endian (wire) order
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-filled buffer of `len` bytes
    pub fn with_len(len: usize) -> Self {
        DataBuffer {
            bytes: vec![0; len],
            little_endian: false,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        DataBuffer {
            bytes: bytes.into(),
            little_endian: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn set_little_endian(&mut self, little_endian: bool) {
        self.little_endian = little_endian;
    }

    /// Truncates or zero-extends to `len` bytes
    pub fn resize_to(&mut self, len: usize) {
        self.bytes.resize(len, 0);
    }

    pub fn set_bytes(&mut self, index: usize, bytes: &[u8]) -> Result<()> {
        let end = index
            .checked_add(bytes.len())
            .ok_or_else(|| ModbusError::invalid_argument("byte range overflows"))?;
        if end > self.bytes.len() {
            return Err(ModbusError::invalid_argument(format!(
                "byte range {}..{} out of bounds for buffer of {} bytes",
                index,
                end,
                self.bytes.len()
            )));
        }
        self.bytes[index..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_bytes(&self, index: usize, count: usize) -> Result<&[u8]> {
        let end = index
            .checked_add(count)
            .ok_or_else(|| ModbusError::invalid_argument("byte range overflows"))?;
        if end > self.bytes.len() {
            return Err(ModbusError::invalid_argument(format!(
                "byte range {}..{} out of bounds for buffer of {} bytes",
                index,
                end,
                self.bytes.len()
            )));
        }
        Ok(&self.bytes[index..end])
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn set_u8(&mut self, index: usize, value: u8) -> Result<()> {
        self.set_bytes(index, &[value])
    }

    pub fn get_u8(&self, index: usize) -> Result<u8> {
        Ok(self.get_bytes(index, 1)?[0])
    }

    pub fn add_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn set_i8(&mut self, index: usize, value: i8) -> Result<()> {
        self.set_u8(index, value as u8)
    }

    pub fn get_i8(&self, index: usize) -> Result<i8> {
        Ok(self.get_u8(index)? as i8)
    }

    pub fn add_i8(&mut self, value: i8) {
        self.add_u8(value as u8);
    }

    pub fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        self.set_u8(index, u8::from(value))
    }

    /// Any nonzero byte reads as true
    pub fn get_bool(&self, index: usize) -> Result<bool> {
        Ok(self.get_u8(index)? > 0)
    }

    pub fn add_bool(&mut self, value: bool) {
        self.add_u8(u8::from(value));
    }

    numeric_accessors!(set_u16, get_u16, add_u16, u16, 2);
    numeric_accessors!(set_i16, get_i16, add_i16, i16, 2);
    numeric_accessors!(set_u32, get_u32, add_u32, u32, 4);
    numeric_accessors!(set_i32, get_i32, add_i32, i32, 4);
    numeric_accessors!(set_u64, get_u64, add_u64, u64, 8);
    numeric_accessors!(set_i64, get_i64, add_i64, i64, 8);

    pub fn set_f32(&mut self, index: usize, value: f32) -> Result<()> {
        self.set_u32(index, value.to_bits())
    }

    pub fn get_f32(&self, index: usize) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32(index)?))
    }

    pub fn add_f32(&mut self, value: f32) {
        self.add_u32(value.to_bits());
    }

    pub fn set_f64(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_u64(index, value.to_bits())
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64(index)?))
    }

    pub fn add_f64(&mut self, value: f64) {
        self.add_u64(value.to_bits());
    }

    /// Writes the UTF-8 bytes of `value` at `index`, returning the byte count
    pub fn set_string(&mut self, index: usize, value: &str) -> Result<usize> {
        self.set_bytes(index, value.as_bytes())?;
        Ok(value.len())
    }

    pub fn get_string(&self, index: usize, count: usize) -> Result<String> {
        let bytes = self.get_bytes(index, count)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ModbusError::invalid_argument(format!("invalid UTF-8 string: {e}")))
    }

    pub fn add_string(&mut self, value: &str) -> usize {
        self.bytes.extend_from_slice(value.as_bytes());
        value.len()
    }
}

impl PartialEq for DataBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.little_endian == other.little_endian && self.bytes == other.bytes
    }
}

impl Eq for DataBuffer {}

impl From<Vec<u8>> for DataBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        DataBuffer::from_bytes(bytes)
    }
}

impl From<&[u8]> for DataBuffer {
    fn from(bytes: &[u8]) -> Self {
        DataBuffer::from_bytes(bytes.to_vec())
    }
}

impl std::fmt::Display for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataBuffer ({} bytes", self.len())?;
        if self.little_endian {
            write!(f, ", little-endian")?;
        }
        write!(f, ")")?;
        for (i, byte) in self.bytes.iter().enumerate() {
            if i % 16 == 0 {
                write!(f, "\n0x{i:04X} ")?;
            }
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}
