use super::*;

const MAX_READ_BITS: u16 = 2000;
const MAX_READ_WORDS: u16 = 125;
const MAX_WRITE_BITS: u16 = 1968;
const MAX_WRITE_WORDS: u16 = 123;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

fn be_u16(data: &[u8], offset: usize) -> u16 {
    ((data[offset] as u16) << 8) | (data[offset + 1] as u16)
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.push((value >> 8) as u8);
    out.push(value as u8);
}

/// Exception reply PDU for a request with function code `function_code`.
pub fn exception_pdu(function_code: u8, code: ExceptionCode) -> Vec<u8> {
    vec![function_code | 0x80, code as u8]
}

/// Executes one request PDU against `store` and builds the reply PDU.
///
/// Errors carry the exception to report. Nothing in `store` changes when an
/// error is returned.
pub fn execute(store: &mut RegisterStore, pdu: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let Some(&function_code) = pdu.first() else {
        return Err(ExceptionCode::IllegalDataValue);
    };
    let data = &pdu[1..];

    match function_code {
        0x01 => read_bits(store, RegisterType::CoilRegister, data),
        0x02 => read_bits(store, RegisterType::DiscreteRegister, data),
        0x03 => read_words(store, RegisterType::HoldingRegister, data),
        0x04 => read_words(store, RegisterType::InputRegister, data),
        0x05 => write_single_coil(store, data),
        0x06 => write_single_register(store, data),
        0x0F => write_multiple_coils(store, data),
        0x10 => write_multiple_registers(store, data),
        _ => Err(ExceptionCode::IllegalFunction),
    }
}

fn read_bits(
    store: &RegisterStore,
    register_type: RegisterType,
    data: &[u8],
) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = be_u16(data, 0);
    let quantity = be_u16(data, 2);
    if quantity == 0 || quantity > MAX_READ_BITS {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let bits = store.read_bits(register_type, start, quantity)?;
    let byte_count = bits.len().div_ceil(8);
    let mut response = Vec::with_capacity(2 + byte_count);
    response.push(register_type.read_command());
    response.push(byte_count as u8);

    let mut packed = vec![0u8; byte_count];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    response.extend(packed);
    Ok(response)
}

fn read_words(
    store: &RegisterStore,
    register_type: RegisterType,
    data: &[u8],
) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = be_u16(data, 0);
    let quantity = be_u16(data, 2);
    if quantity == 0 || quantity > MAX_READ_WORDS {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let words = store.read_words(register_type, start, quantity)?;
    let mut response = Vec::with_capacity(2 + words.len() * 2);
    response.push(register_type.read_command());
    response.push((words.len() * 2) as u8);
    for &word in words {
        push_u16(&mut response, word);
    }
    Ok(response)
}

fn write_single_coil(store: &mut RegisterStore, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = be_u16(data, 0);
    let value = match be_u16(data, 2) {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };

    store.set_coil(address, value)?;
    let mut response = vec![0x05];
    response.extend_from_slice(data);
    Ok(response)
}

fn write_single_register(store: &mut RegisterStore, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = be_u16(data, 0);
    let value = be_u16(data, 2);

    store.set_holding_register(address, value)?;
    let mut response = vec![0x06];
    response.extend_from_slice(data);
    Ok(response)
}

fn write_multiple_coils(store: &mut RegisterStore, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = be_u16(data, 0);
    let quantity = be_u16(data, 2);
    let byte_count = data[4] as usize;
    if quantity == 0
        || quantity > MAX_WRITE_BITS
        || byte_count != (quantity as usize).div_ceil(8)
        || data.len() != 5 + byte_count
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let packed = &data[5..];
    let values: Vec<bool> = (0..quantity as usize)
        .map(|i| (packed[i / 8] >> (i % 8)) & 0x01 != 0)
        .collect();
    store.write_coils(start, &values)?;

    let mut response = vec![0x0F];
    push_u16(&mut response, start);
    push_u16(&mut response, quantity);
    Ok(response)
}

fn write_multiple_registers(
    store: &mut RegisterStore,
    data: &[u8],
) -> Result<Vec<u8>, ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let start = be_u16(data, 0);
    let quantity = be_u16(data, 2);
    let byte_count = data[4] as usize;
    if quantity == 0
        || quantity > MAX_WRITE_WORDS
        || byte_count != quantity as usize * 2
        || data.len() != 5 + byte_count
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let values: Vec<u16> = (0..quantity as usize).map(|i| be_u16(data, 5 + i * 2)).collect();
    store.write_holding_registers(start, &values)?;

    let mut response = vec![0x10];
    push_u16(&mut response, start);
    push_u16(&mut response, quantity);
    Ok(response)
}
