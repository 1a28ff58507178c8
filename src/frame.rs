//! Frame codec: MBAP-framed Modbus TCP requests and responses.
//!
//! Layout: transactionId:u16, protocolId:u16 (always 0), length:u16 (byte
//! count following the two id fields), unitId:u8, functionCode:u8, then the
//! function-specific payload. All multi-byte wire integers are big-endian.

use crate::buffer::DataBuffer;
use crate::error::{ModbusError, Result};
use crate::types::{DeviceIdCategory, ExceptionCode, FunctionCode, Mei, ERROR_MASK};

/// Bytes preceding the unit id (transaction id, protocol id, length)
pub const FRAME_PREFIX_LEN: usize = 6;

/// MEI fields of an encapsulated-interface request.
///
/// Category and object id stay raw bytes so a server can answer out-of-range
/// values with the proper exception instead of dropping the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeiRequest {
    pub mei: Mei,
    pub category: u8,
    pub object_id: u8,
}

/// MEI fields of an encapsulated-interface response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeiResponse {
    pub mei: Mei,
    pub category: DeviceIdCategory,
    pub conformity_level: u8,
    pub more_requests_needed: bool,
    pub next_object_id: u8,
    pub object_count: u8,
}

/// One decoded (or to-be-encoded) Modbus TCP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub transaction_id: u16,
    pub device_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub count: u16,
    /// Declared payload byte count of a write-multiple request, preserved
    /// from the wire so handlers can validate it against `count`
    pub byte_count: u8,
    /// Packed payload values, without the byte-count byte
    pub data: DataBuffer,
    pub mei: Option<MeiRequest>,
}

impl Request {
    /// Read request for functions 1-4
    pub fn read(function: FunctionCode, device_id: u8, address: u16, count: u16) -> Self {
        Request {
            transaction_id: 0,
            device_id,
            function,
            address,
            count,
            byte_count: 0,
            data: DataBuffer::new(),
            mei: None,
        }
    }

    /// Write request for functions 5 and 6, carrying one 16-bit value
    pub fn write_single(function: FunctionCode, device_id: u8, address: u16, value: u16) -> Self {
        let mut data = DataBuffer::new();
        data.add_u16(value);
        Request {
            transaction_id: 0,
            device_id,
            function,
            address,
            count: 1,
            byte_count: 0,
            data,
            mei: None,
        }
    }

    /// Write request for functions 15 and 16 with pre-packed payload
    pub fn write_multiple(
        function: FunctionCode,
        device_id: u8,
        address: u16,
        count: u16,
        data: DataBuffer,
    ) -> Self {
        Request {
            transaction_id: 0,
            device_id,
            function,
            address,
            count,
            byte_count: data.len() as u8,
            data,
            mei: None,
        }
    }

    /// Device identification request (function 43, MEI sub-code 14)
    pub fn read_device_identification(
        device_id: u8,
        category: DeviceIdCategory,
        object_id: u8,
    ) -> Self {
        Request {
            transaction_id: 0,
            device_id,
            function: FunctionCode::EncapsulatedInterface,
            address: 0,
            count: 0,
            byte_count: 0,
            data: DataBuffer::new(),
            mei: Some(MeiRequest {
                mei: Mei::ReadDeviceInformation,
                category: category as u8,
                object_id,
            }),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = new_frame_header(self.transaction_id, self.device_id, self.function as u8)?;

        match self.function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                buffer.add_u16(self.address);
                buffer.add_u16(self.count);
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                buffer.add_u16(self.address);
                buffer.add_u16(self.count);
                buffer.add_u8(self.byte_count);
                buffer.add_bytes(self.data.as_slice());
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                buffer.add_u16(self.address);
                buffer.add_bytes(self.data.as_slice());
            }
            FunctionCode::EncapsulatedInterface => {
                let mei = self.mei.ok_or_else(|| {
                    ModbusError::invalid_argument("encapsulated interface request without MEI fields")
                })?;
                buffer.add_u8(mei.mei as u8);
                match mei.mei {
                    Mei::CanOpenGeneralReference => buffer.add_bytes(self.data.as_slice()),
                    Mei::ReadDeviceInformation => {
                        buffer.add_u8(mei.category);
                        buffer.add_u8(mei.object_id);
                    }
                }
            }
        }

        finish_frame(buffer)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_frame(bytes).map_err(as_framing)
    }

    fn decode_frame(bytes: &[u8]) -> Result<Self> {
        let buffer = validate_frame(bytes)?;

        let transaction_id = buffer.get_u16(0)?;
        let device_id = buffer.get_u8(6)?;
        let function = FunctionCode::try_from(buffer.get_u8(7)?)?;

        let mut request = Request {
            transaction_id,
            device_id,
            function,
            address: 0,
            count: 0,
            byte_count: 0,
            data: DataBuffer::new(),
            mei: None,
        };

        match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                request.address = buffer.get_u16(8)?;
                request.count = buffer.get_u16(10)?;
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                request.address = buffer.get_u16(8)?;
                request.count = buffer.get_u16(10)?;
                request.byte_count = buffer.get_u8(12)?;
                request.data = frame_tail(&buffer, 13)?;
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                request.address = buffer.get_u16(8)?;
                request.data = frame_tail(&buffer, 10)?;
            }
            FunctionCode::EncapsulatedInterface => {
                let mei = Mei::try_from(buffer.get_u8(8)?)?;
                match mei {
                    Mei::CanOpenGeneralReference => {
                        request.data = frame_tail(&buffer, 9)?;
                        request.mei = Some(MeiRequest {
                            mei,
                            category: 0,
                            object_id: 0,
                        });
                    }
                    Mei::ReadDeviceInformation => {
                        request.mei = Some(MeiRequest {
                            mei,
                            category: buffer.get_u8(9)?,
                            object_id: buffer.get_u8(10)?,
                        });
                    }
                }
            }
        }

        Ok(request)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Request#{} (##{}, @{}, {}[{}])",
            self.transaction_id, self.device_id, self.function, self.address, self.count
        )?;
        for byte in self.data.as_slice() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

/// One decoded (or to-be-encoded) Modbus TCP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub transaction_id: u16,
    pub device_id: u8,
    pub function: FunctionCode,
    pub address: u16,
    pub count: u16,
    /// Exception code of an error response; `None` means success
    pub error: Option<ExceptionCode>,
    pub data: DataBuffer,
    pub mei: Option<MeiResponse>,
    is_timeout: bool,
}

impl Response {
    /// Success response skeleton echoing the request's identity fields
    pub fn for_request(request: &Request) -> Self {
        Response {
            transaction_id: request.transaction_id,
            device_id: request.device_id,
            function: request.function,
            address: request.address,
            count: request.count,
            error: None,
            data: DataBuffer::new(),
            mei: None,
            is_timeout: false,
        }
    }

    /// Error response for the given request
    pub fn exception_for(request: &Request, exception: ExceptionCode) -> Self {
        let mut response = Response::for_request(request);
        response.error = Some(exception);
        response
    }

    /// True when this value was decoded from an all-zero buffer, the
    /// locally synthesized "no response" sentinel. Its other fields carry
    /// no information.
    pub fn is_timeout(&self) -> bool {
        self.is_timeout
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut fn_byte = self.function as u8;
        let mut buffer = new_frame_header(self.transaction_id, self.device_id, fn_byte)?;

        if let Some(exception) = self.error {
            fn_byte |= ERROR_MASK;
            buffer.set_u8(7, fn_byte)?;
            buffer.add_u8(exception as u8);
            return finish_frame(buffer);
        }

        match self.function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                buffer.add_u8(self.data.len() as u8);
                buffer.add_bytes(self.data.as_slice());
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                buffer.add_u16(self.address);
                buffer.add_u16(self.count);
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                buffer.add_u16(self.address);
                buffer.add_bytes(self.data.as_slice());
            }
            FunctionCode::EncapsulatedInterface => {
                let mei = self.mei.ok_or_else(|| {
                    ModbusError::invalid_argument(
                        "encapsulated interface response without MEI fields",
                    )
                })?;
                buffer.add_u8(mei.mei as u8);
                match mei.mei {
                    Mei::CanOpenGeneralReference => buffer.add_bytes(self.data.as_slice()),
                    Mei::ReadDeviceInformation => {
                        buffer.add_u8(mei.category as u8);
                        buffer.add_u8(mei.conformity_level);
                        buffer.add_u8(if mei.more_requests_needed { 0xFF } else { 0x00 });
                        buffer.add_u8(mei.next_object_id);
                        buffer.add_u8(mei.object_count);
                        buffer.add_bytes(self.data.as_slice());
                    }
                }
            }
        }

        finish_frame(buffer)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_frame(bytes).map_err(as_framing)
    }

    fn decode_frame(bytes: &[u8]) -> Result<Self> {
        // An all-zero buffer is the locally synthesized timeout sentinel,
        // not a wire frame.
        if bytes.iter().all(|b| *b == 0) {
            return Ok(Response {
                transaction_id: 0,
                device_id: 0,
                function: FunctionCode::ReadCoils,
                address: 0,
                count: 0,
                error: None,
                data: DataBuffer::new(),
                mei: None,
                is_timeout: true,
            });
        }

        let buffer = validate_frame(bytes)?;

        let transaction_id = buffer.get_u16(0)?;
        let device_id = buffer.get_u8(6)?;

        let fn_byte = buffer.get_u8(7)?;
        let mut response = Response {
            transaction_id,
            device_id,
            function: FunctionCode::try_from(fn_byte & !ERROR_MASK)?,
            address: 0,
            count: 0,
            error: None,
            data: DataBuffer::new(),
            mei: None,
            is_timeout: false,
        };

        if fn_byte & ERROR_MASK != 0 {
            response.error = Some(ExceptionCode::try_from(buffer.get_u8(8)?)?);
            return Ok(response);
        }

        match response.function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let byte_count = buffer.get_u8(8)? as usize;
                if buffer.len() != byte_count + 9 {
                    return Err(ModbusError::framing(format!(
                        "read response declares {} payload bytes but carries {}",
                        byte_count,
                        buffer.len().saturating_sub(9)
                    )));
                }
                response.data = DataBuffer::from(buffer.get_bytes(9, byte_count)?);
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                response.address = buffer.get_u16(8)?;
                response.count = buffer.get_u16(10)?;
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                response.address = buffer.get_u16(8)?;
                response.data = frame_tail(&buffer, 10)?;
            }
            FunctionCode::EncapsulatedInterface => {
                let mei = Mei::try_from(buffer.get_u8(8)?)?;
                match mei {
                    Mei::CanOpenGeneralReference => {
                        response.data = frame_tail(&buffer, 9)?;
                        response.mei = Some(MeiResponse {
                            mei,
                            category: DeviceIdCategory::Basic,
                            conformity_level: 0,
                            more_requests_needed: false,
                            next_object_id: 0,
                            object_count: 0,
                        });
                    }
                    Mei::ReadDeviceInformation => {
                        response.mei = Some(MeiResponse {
                            mei,
                            category: DeviceIdCategory::try_from(buffer.get_u8(9)?)?,
                            conformity_level: buffer.get_u8(10)?,
                            more_requests_needed: buffer.get_u8(11)? > 0,
                            next_object_id: buffer.get_u8(12)?,
                            object_count: buffer.get_u8(13)?,
                        });
                        response.data = frame_tail(&buffer, 14)?;
                    }
                }
            }
        }

        Ok(response)
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_timeout {
            return write!(f, "Response (timeout)");
        }
        write!(
            f,
            "Response#{} (##{}, @{}, E:{}, {}[{}])",
            self.transaction_id,
            self.device_id,
            self.function,
            self.is_error(),
            self.address,
            self.count
        )?;
        for byte in self.data.as_slice() {
            write!(f, " {byte:02X}")?;
        }
        Ok(())
    }
}

/// 8-byte frame header with the length field left for [`finish_frame`]
fn new_frame_header(transaction_id: u16, device_id: u8, fn_byte: u8) -> Result<DataBuffer> {
    let mut buffer = DataBuffer::with_len(8);
    buffer.set_u16(0, transaction_id)?;
    buffer.set_u16(2, 0x0000)?;
    buffer.set_u8(6, device_id)?;
    buffer.set_u8(7, fn_byte)?;
    Ok(buffer)
}

/// Backfills the length field once the payload is complete
fn finish_frame(mut buffer: DataBuffer) -> Result<Vec<u8>> {
    let len = (buffer.len() - FRAME_PREFIX_LEN) as u16;
    buffer.set_u16(4, len)?;
    Ok(buffer.into_vec())
}

/// Field reads past the end of a validated frame are faults of the frame,
/// not of the caller
fn as_framing(err: ModbusError) -> ModbusError {
    match err {
        ModbusError::InvalidArgument(msg) => ModbusError::Framing(msg),
        other => other,
    }
}

/// Payload bytes from `start` to the end of the frame
fn frame_tail(buffer: &DataBuffer, start: usize) -> Result<DataBuffer> {
    let len = buffer.len().checked_sub(start).ok_or_else(|| {
        ModbusError::framing(format!(
            "frame of {} bytes too short for payload at offset {start}",
            buffer.len()
        ))
    })?;
    Ok(DataBuffer::from(buffer.get_bytes(start, len)?))
}

/// Shared header validation: protocol id, declared length, zero padding.
/// Returns the frame truncated to its declared length.
fn validate_frame(bytes: &[u8]) -> Result<DataBuffer> {
    let buffer = DataBuffer::from(bytes);
    if buffer.len() < 8 {
        return Err(ModbusError::framing(format!(
            "frame too short: {} bytes",
            buffer.len()
        )));
    }

    let protocol_id = buffer.get_u16(2)?;
    if protocol_id != 0 {
        return Err(ModbusError::framing(format!(
            "invalid protocol identifier: 0x{protocol_id:04X}"
        )));
    }

    let total = buffer.get_u16(4)? as usize + FRAME_PREFIX_LEN;
    if total < 8 {
        return Err(ModbusError::framing("declared length below minimum"));
    }
    if buffer.len() < total {
        return Err(ModbusError::framing(format!(
            "declared length {} exceeds available {} bytes",
            total,
            buffer.len()
        )));
    }
    if buffer.len() > total {
        if bytes[total..].iter().any(|b| *b != 0) {
            return Err(ModbusError::framing("nonzero bytes beyond declared length"));
        }
        return Ok(DataBuffer::from(&bytes[..total]));
    }

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_request_encode() {
        let mut request = Request::read(FunctionCode::ReadHoldingRegisters, 1, 100, 3);
        request.transaction_id = 0x1234;
        let bytes = request.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x64, 0x00, 0x03]
        );
    }

    #[test]
    fn test_read_request_roundtrip() {
        for function in [
            FunctionCode::ReadCoils,
            FunctionCode::ReadDiscreteInputs,
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::ReadInputRegisters,
        ] {
            let mut request = Request::read(function, 7, 0x0102, 25);
            request.transaction_id = 0xBEEF;
            let decoded = Request::decode(&request.encode().unwrap()).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_write_single_roundtrip() {
        let mut request = Request::write_single(FunctionCode::WriteSingleCoil, 3, 20, 0xFF00);
        request.transaction_id = 42;
        let bytes = request.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x2A, 0x00, 0x00, 0x00, 0x06, 0x03, 0x05, 0x00, 0x14, 0xFF, 0x00]
        );
        let decoded = Request::decode(&bytes).unwrap();
        assert_eq!(decoded.address, 20);
        assert_eq!(decoded.data.get_u16(0).unwrap(), 0xFF00);
    }

    #[test]
    fn test_write_multiple_roundtrip() {
        let mut data = DataBuffer::new();
        data.add_u16(10);
        data.add_u16(20);
        let mut request = Request::write_multiple(
            FunctionCode::WriteMultipleRegisters,
            1,
            200,
            2,
            data,
        );
        request.transaction_id = 9;
        assert_eq!(request.byte_count, 4);

        let decoded = Request::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
        assert_eq!(decoded.byte_count, 4);
        assert_eq!(decoded.data.get_u16(2).unwrap(), 20);
    }

    #[test]
    fn test_device_identification_request_roundtrip() {
        let mut request = Request::read_device_identification(5, DeviceIdCategory::Regular, 0);
        request.transaction_id = 77;
        let bytes = request.encode().unwrap();
        assert_eq!(
            bytes,
            vec![0x00, 0x4D, 0x00, 0x00, 0x00, 0x05, 0x05, 0x2B, 0x0E, 0x02, 0x00]
        );
        let decoded = Request::decode(&bytes).unwrap();
        assert_eq!(decoded.mei.unwrap().mei, Mei::ReadDeviceInformation);
        assert_eq!(decoded.mei.unwrap().category, 2);
    }

    #[test]
    fn test_invalid_protocol_id_rejected() {
        let mut request = Request::read(FunctionCode::ReadCoils, 1, 0, 1);
        request.transaction_id = 1;
        let mut bytes = request.encode().unwrap();
        bytes[2] = 0x01;
        let err = Request::decode(&bytes).unwrap_err();
        assert!(matches!(err, ModbusError::Framing(_)));
    }

    #[test]
    fn test_zero_padding_accepted_nonzero_rejected() {
        let mut request = Request::read(FunctionCode::ReadCoils, 1, 0, 1);
        request.transaction_id = 1;
        let mut bytes = request.encode().unwrap();

        bytes.extend_from_slice(&[0x00, 0x00]);
        assert!(Request::decode(&bytes).is_ok());

        bytes.push(0x01);
        assert!(matches!(
            Request::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let mut request = Request::read(FunctionCode::ReadCoils, 1, 0, 1);
        request.transaction_id = 1;
        let bytes = request.encode().unwrap();
        assert!(Request::decode(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn test_read_response_roundtrip() {
        let request = Request::read(FunctionCode::ReadHoldingRegisters, 1, 100, 3);
        let mut response = Response::for_request(&request);
        response.data.add_u16(10);
        response.data.add_u16(20);
        response.data.add_u16(30);

        let bytes = response.encode().unwrap();
        // byte-count 6 then the three values
        assert_eq!(bytes[8], 6);
        assert_eq!(&bytes[9..], &[0, 10, 0, 20, 0, 30]);

        let decoded = Response::decode(&bytes).unwrap();
        assert_eq!(decoded, response);
        assert!(!decoded.is_timeout());
    }

    #[test]
    fn test_read_response_length_mismatch() {
        let request = Request::read(FunctionCode::ReadCoils, 1, 0, 8);
        let mut response = Response::for_request(&request);
        response.data.add_u8(0xAA);

        let mut bytes = response.encode().unwrap();
        bytes[8] = 3; // lie about the payload size
        assert!(matches!(
            Response::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));
    }

    #[test]
    fn test_error_response_roundtrip() {
        let request = Request::read(FunctionCode::ReadInputRegisters, 2, 0, 1);
        let response = Response::exception_for(&request, ExceptionCode::IllegalDataAddress);
        let bytes = response.encode().unwrap();
        assert_eq!(bytes[7], 0x04 | ERROR_MASK);
        assert_eq!(bytes[8], 0x02);

        let decoded = Response::decode(&bytes).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.error, Some(ExceptionCode::IllegalDataAddress));
        assert_eq!(decoded.function, FunctionCode::ReadInputRegisters);
    }

    #[test]
    fn test_write_multiple_response_roundtrip() {
        let mut data = DataBuffer::new();
        data.add_u8(0x03);
        let request = Request::write_multiple(FunctionCode::WriteMultipleCoils, 1, 16, 2, data);
        let response = Response::for_request(&request);
        let decoded = Response::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.address, 16);
        assert_eq!(decoded.count, 2);
    }

    #[test]
    fn test_device_identification_response_roundtrip() {
        let request = Request::read_device_identification(1, DeviceIdCategory::Basic, 0);
        let mut response = Response::for_request(&request);
        response.mei = Some(MeiResponse {
            mei: Mei::ReadDeviceInformation,
            category: DeviceIdCategory::Basic,
            conformity_level: 0x01,
            more_requests_needed: true,
            next_object_id: 0x02,
            object_count: 1,
        });
        response.data.add_u8(0x00);
        response.data.add_u8(0x04);
        response.data.add_string("ACME");

        let bytes = response.encode().unwrap();
        let decoded = Response::decode(&bytes).unwrap();
        let mei = decoded.mei.unwrap();
        assert!(mei.more_requests_needed);
        assert_eq!(mei.next_object_id, 0x02);
        assert_eq!(mei.object_count, 1);
        assert_eq!(decoded.data.get_string(2, 4).unwrap(), "ACME");
    }

    #[test]
    fn test_all_zero_buffer_is_timeout_sentinel() {
        let decoded = Response::decode(&[0u8; 12]).unwrap();
        assert!(decoded.is_timeout());
        assert!(!decoded.is_error());
    }

    #[test]
    fn test_fields_beyond_declared_length_are_framing_errors() {
        // Header-valid frame whose declared length ends before the
        // address field of the function it names
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x03];
        assert!(matches!(
            Request::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));

        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x05];
        assert!(matches!(
            Response::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));
    }

    #[test]
    fn test_unknown_function_code_is_framing_error() {
        let mut request = Request::read(FunctionCode::ReadCoils, 1, 0, 1);
        request.transaction_id = 1;
        let mut bytes = request.encode().unwrap();
        bytes[7] = 0x63;
        assert!(matches!(
            Request::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));
    }

    #[test]
    fn test_unknown_mei_is_framing_error() {
        let mut request = Request::read_device_identification(1, DeviceIdCategory::Basic, 0);
        request.transaction_id = 1;
        let mut bytes = request.encode().unwrap();
        bytes[8] = 0x42;
        assert!(matches!(
            Request::decode(&bytes).unwrap_err(),
            ModbusError::Framing(_)
        ));
    }
}
