use super::*;
use crate::modbus_tcp::{MBAP_HEADER_LEN, MbapHeader};

/// Client-side request codec: builds framed requests for one register range
/// and decodes the server's replies.
pub struct ModbusRequest {
    start_addr: u16,
    length: u16,
    register_type: RegisterType,
    read_cmd: Option<u8>,
    write_cmd: Option<u8>,
    multi_write_cmd: Option<u8>,
    unit_id: u8,
    transaction_id: u16,
    last_function: Option<u8>,
}

pub struct ModbusRequestBuilder {
    start_addr: Option<u16>,
    length: Option<u16>,
    register_type: Option<RegisterType>,
    custom_read_cmd: Option<u8>,
    custom_write_cmd: Option<u8>,
    custom_multi_write_cmd: Option<u8>,
    unit_id: u8,
}

impl ModbusRequestBuilder {
    pub fn address(mut self, addr: u16) -> Self {
        self.start_addr = Some(addr);
        self
    }

    pub fn length(mut self, length: u16) -> Self {
        self.length = Some(length);
        self
    }

    pub fn register_type(mut self, register_type: RegisterType) -> Self {
        self.register_type = Some(register_type);
        self
    }

    pub fn with_read_cmd(mut self, custom_read_cmd: u8) -> Self {
        self.custom_read_cmd = Some(custom_read_cmd);
        self
    }

    pub fn with_write_cmd(mut self, custom_write_cmd: u8) -> Self {
        self.custom_write_cmd = Some(custom_write_cmd);
        self
    }

    pub fn with_multi_write_cmd(mut self, multi_write_cmd: u8) -> Self {
        self.custom_multi_write_cmd = Some(multi_write_cmd);
        self
    }

    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn build(self) -> Result<ModbusRequest, ModbusUnitError> {
        let start_addr = self.start_addr.ok_or(ModbusUnitError::AddressIsEmpty)?;
        let register_type = self.register_type.ok_or(ModbusUnitError::InvalidRegisterType)?;
        let length = self.length.unwrap_or(1);
        if length == 0 {
            return Err(ModbusUnitError::InvalidLength(length));
        }
        let end_addr = start_addr as u32 + length as u32;
        if end_addr > 65536 {
            return Err(ModbusUnitError::RangeToMatch(start_addr, length, end_addr));
        }

        Ok(ModbusRequest {
            start_addr,
            length,
            register_type,
            read_cmd: self.custom_read_cmd,
            write_cmd: self.custom_write_cmd,
            multi_write_cmd: self.custom_multi_write_cmd,
            unit_id: self.unit_id,
            transaction_id: 0,
            last_function: None,
        })
    }
}

impl ModbusRequest {
    pub fn builder() -> ModbusRequestBuilder {
        ModbusRequestBuilder {
            start_addr: None,
            length: None,
            register_type: None,
            custom_read_cmd: None,
            custom_write_cmd: None,
            custom_multi_write_cmd: None,
            unit_id: WILDCARD_UNIT_ID,
        }
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Generate complete TCP frame for read request
    pub fn create_read_request(&mut self) -> Vec<u8> {
        let command = self.read_cmd.unwrap_or_else(|| self.register_type.read_command());
        let pdu = vec![
            command,
            (self.start_addr >> 8) as u8,
            self.start_addr as u8,
            (self.length >> 8) as u8,
            self.length as u8,
        ];
        self.wrap_tcp(pdu)
    }

    /// Generate complete TCP frame writing `data` from the start address.
    /// Coil values must be 0 or 1.
    pub fn create_write_request(&mut self, data: &[u16]) -> Result<Vec<u8>, ModbusUnitError> {
        if data.is_empty() || data.len() > self.length as usize {
            return Err(ModbusUnitError::DataLengthMismatch {
                expected: self.length as usize,
                actual: data.len(),
            });
        }

        let cmd = match data.len() {
            1 => self.get_single_write_command()?,
            _ => self.get_multi_write_command()?,
        };

        let pdu = match self.register_type {
            RegisterType::CoilRegister => self.get_body_for_coils_write(data, cmd)?,
            RegisterType::HoldingRegister => self.get_body_for_holding_write(data, cmd),
            _ => return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type)),
        };
        Ok(self.wrap_tcp(pdu))
    }

    fn get_single_write_command(&self) -> Result<u8, ModbusUnitError> {
        let cmd = match self.write_cmd {
            Some(cmd) => cmd,
            None => match self.register_type {
                RegisterType::CoilRegister => 0x05,
                RegisterType::HoldingRegister => 0x06,
                _ => return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type))
            }
        };
        Ok(cmd)
    }

    fn get_multi_write_command(&self) -> Result<u8, ModbusUnitError> {
        let cmd = match self.multi_write_cmd {
            Some(cmd) => cmd,
            None => match self.register_type {
                RegisterType::CoilRegister => 0x0F,
                RegisterType::HoldingRegister => 0x10,
                _ => return Err(ModbusUnitError::InvalidRegisterTypeForWriteCommand(self.register_type))
            }
        };
        Ok(cmd)
    }

    fn is_multi_write(cmd: u8) -> bool {
        matches!(cmd, 0x0F | 0x10)
    }

    fn get_body_for_holding_write(&self, data: &[u16], cmd: u8) -> Vec<u8> {
        let mut result: Vec<u8> = Vec::with_capacity(6 + data.len() * 2);
        result.push(cmd);
        result.push((self.start_addr >> 8) as u8);
        result.push(self.start_addr as u8);

        if Self::is_multi_write(cmd) {
            result.push((data.len() >> 8) as u8);
            result.push(data.len() as u8);
            result.push((data.len() * 2) as u8);
        }

        for &val in data {
            result.push((val >> 8) as u8);
            result.push(val as u8);
        }
        result
    }

    fn get_body_for_coils_write(&self, data: &[u16], cmd: u8) -> Result<Vec<u8>, ModbusUnitError> {
        for (i, &val) in data.iter().enumerate() {
            if val > 1 {
                return Err(ModbusUnitError::InvalidCoilValue(val, i));
            }
        }

        let mut result: Vec<u8> = Vec::with_capacity(6 + data.len().div_ceil(8));
        result.push(cmd);
        result.push((self.start_addr >> 8) as u8);
        result.push(self.start_addr as u8);

        if !Self::is_multi_write(cmd) {
            // Single coil: 0xFF00 for true, 0x0000 for false
            result.push(if data[0] != 0 { 0xFF } else { 0x00 });
            result.push(0x00);
        } else {
            result.push((data.len() >> 8) as u8);
            result.push(data.len() as u8);

            let byte_count = data.len().div_ceil(8);
            result.push(byte_count as u8);

            let mut bytes = vec![0u8; byte_count];
            for (i, &bit) in data.iter().enumerate() {
                if bit != 0 {
                    bytes[i / 8] |= 1 << (i % 8);
                }
            }
            result.extend(bytes);
        }
        Ok(result)
    }

    /// Parse TCP response and extract values. Write acknowledgements yield
    /// an empty vector.
    pub fn parse_response(&self, frame: &[u8]) -> Result<Vec<u16>, ModbusTransportError> {
        let pdu = self.unwrap_tcp(frame)?;
        if pdu.is_empty() {
            return Err(ModbusUnitError::EmptyResponse.into());
        }

        let function_code = pdu[0];
        if (function_code & 0x80) != 0 {
            let exception_code = if pdu.len() > 1 { pdu[1] } else { 0 };
            return Err(ModbusTransportError::Exception(function_code & 0x7F, exception_code));
        }

        let expected_fc = self.last_function.unwrap_or_else(|| self.register_type.read_command());
        if function_code != expected_fc {
            return Err(ModbusUnitError::UnexpectedFunctionCode(expected_fc, function_code).into());
        }

        match function_code {
            0x05 | 0x06 | 0x0F | 0x10 => Ok(Vec::new()),
            _ if self.register_type.is_bit() => Ok(self.parse_coils(pdu)?),
            _ => Ok(self.parse_holding_registers(pdu)?),
        }
    }

    fn parse_holding_registers(&self, pdu: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        if pdu.len() < 2 {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let byte_count = pdu[1] as usize;
        let expected_bytes = self.length as usize * 2;

        if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let mut result: Vec<u16> = Vec::with_capacity(self.length as usize);
        for i in 0..self.length as usize {
            let offset = 2 + i * 2;
            result.push(((pdu[offset] as u16) << 8) | (pdu[offset + 1] as u16));
        }
        Ok(result)
    }

    fn parse_coils(&self, pdu: &[u8]) -> Result<Vec<u16>, ModbusUnitError> {
        if pdu.len() < 2 {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let byte_count = pdu[1] as usize;
        let expected_bytes = (self.length as usize).div_ceil(8);

        if byte_count != expected_bytes || pdu.len() < 2 + byte_count {
            return Err(ModbusUnitError::InvalidResponseLength);
        }

        let mut result = Vec::with_capacity(self.length as usize);
        for i in 0..self.length as usize {
            let bit_value = (pdu[2 + i / 8] >> (i % 8)) & 0x01;
            result.push(bit_value as u16);
        }
        Ok(result)
    }

    fn wrap_tcp(&mut self, pdu: Vec<u8>) -> Vec<u8> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.last_function = pdu.first().copied();

        let header = MbapHeader {
            transaction_id: self.transaction_id,
            protocol_id: 0,
            length: (pdu.len() + 1) as u16,
            unit_id: self.unit_id,
        };
        header.wrap(&pdu)
    }

    fn unwrap_tcp<'a>(&self, frame: &'a [u8]) -> Result<&'a [u8], ModbusTransportError> {
        let header = MbapHeader::parse(frame).ok_or(ModbusTransportError::FrameTooShort)?;

        if header.protocol_id != 0 {
            return Err(ModbusTransportError::InvalidProtocolId(header.protocol_id));
        }
        if header.unit_id != self.unit_id {
            return Err(ModbusTransportError::UnitIdMismatch {
                expected: self.unit_id,
                received: header.unit_id,
            });
        }
        if header.transaction_id != self.transaction_id {
            return Err(ModbusTransportError::TransactionIdMismatch {
                expected: self.transaction_id,
                received: header.transaction_id,
            });
        }

        let expected_len = 6 + header.length as usize;
        if header.length < 1 || frame.len() < expected_len {
            return Err(ModbusTransportError::FrameTooShort);
        }
        Ok(&frame[MBAP_HEADER_LEN..expected_len])
    }
}
