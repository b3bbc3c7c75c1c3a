use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Address range {start}+{quantity} outside {register_type:?} table of {size}")]
    OutOfRange {
        register_type: RegisterType,
        start: u16,
        quantity: usize,
        size: usize,
    },

    #[error("Type {0:?} doesn't hold this kind of value")]
    TypeMismatch(RegisterType),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterType {
    CoilRegister,
    DiscreteRegister,
    HoldingRegister,
    InputRegister,
}

impl RegisterType {
    pub fn read_command(&self) -> u8 {
        match self {
            RegisterType::CoilRegister => 0x01,
            RegisterType::DiscreteRegister => 0x02,
            RegisterType::HoldingRegister => 0x03,
            RegisterType::InputRegister => 0x04,
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::CoilRegister | RegisterType::DiscreteRegister)
    }
}

/// Modbus exception codes a server may answer with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    GatewayTargetFailedToRespond = 0x0B,
}

impl From<StoreError> for ExceptionCode {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OutOfRange { .. } => ExceptionCode::IllegalDataAddress,
            StoreError::TypeMismatch(_) => ExceptionCode::IllegalFunction,
        }
    }
}

/// The simulated address space: four fixed-size tables, all zero at creation.
///
/// Table sizes never change after construction. Every accessor checks the
/// requested range against the table length and reports `StoreError`
/// instead of panicking.
#[derive(Debug, Clone)]
pub struct RegisterStore {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl RegisterStore {
    pub fn new(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        RegisterStore {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding_registers: vec![0; holding],
            input_registers: vec![0; input],
        }
    }

    pub fn size(&self, register_type: RegisterType) -> usize {
        match register_type {
            RegisterType::CoilRegister => self.coils.len(),
            RegisterType::DiscreteRegister => self.discrete_inputs.len(),
            RegisterType::HoldingRegister => self.holding_registers.len(),
            RegisterType::InputRegister => self.input_registers.len(),
        }
    }

    fn check_range(
        &self,
        register_type: RegisterType,
        start: u16,
        quantity: usize,
    ) -> Result<std::ops::Range<usize>, StoreError> {
        let size = self.size(register_type);
        let end = start as usize + quantity;
        if end > size {
            return Err(StoreError::OutOfRange { register_type, start, quantity, size });
        }
        Ok(start as usize..end)
    }

    pub fn read_bits(
        &self,
        register_type: RegisterType,
        start: u16,
        quantity: u16,
    ) -> Result<&[bool], StoreError> {
        let range = self.check_range(register_type, start, quantity as usize)?;
        match register_type {
            RegisterType::CoilRegister => Ok(&self.coils[range]),
            RegisterType::DiscreteRegister => Ok(&self.discrete_inputs[range]),
            _ => Err(StoreError::TypeMismatch(register_type)),
        }
    }

    pub fn read_words(
        &self,
        register_type: RegisterType,
        start: u16,
        quantity: u16,
    ) -> Result<&[u16], StoreError> {
        let range = self.check_range(register_type, start, quantity as usize)?;
        match register_type {
            RegisterType::HoldingRegister => Ok(&self.holding_registers[range]),
            RegisterType::InputRegister => Ok(&self.input_registers[range]),
            _ => Err(StoreError::TypeMismatch(register_type)),
        }
    }

    /// Writes coils. The whole range is validated before any value changes.
    pub fn write_coils(&mut self, start: u16, values: &[bool]) -> Result<(), StoreError> {
        let range = self.check_range(RegisterType::CoilRegister, start, values.len())?;
        self.coils[range].copy_from_slice(values);
        Ok(())
    }

    /// Writes holding registers. The whole range is validated before any value changes.
    pub fn write_holding_registers(&mut self, start: u16, values: &[u16]) -> Result<(), StoreError> {
        let range = self.check_range(RegisterType::HoldingRegister, start, values.len())?;
        self.holding_registers[range].copy_from_slice(values);
        Ok(())
    }

    pub fn coil(&self, index: u16) -> Result<bool, StoreError> {
        Ok(self.read_bits(RegisterType::CoilRegister, index, 1)?[0])
    }

    pub fn set_coil(&mut self, index: u16, value: bool) -> Result<(), StoreError> {
        self.write_coils(index, &[value])
    }

    pub fn discrete_input(&self, index: u16) -> Result<bool, StoreError> {
        Ok(self.read_bits(RegisterType::DiscreteRegister, index, 1)?[0])
    }

    /// Local (non-protocol) write to the read-only discrete input table.
    pub fn set_discrete_input(&mut self, index: u16, value: bool) -> Result<(), StoreError> {
        let range = self.check_range(RegisterType::DiscreteRegister, index, 1)?;
        self.discrete_inputs[range.start] = value;
        Ok(())
    }

    pub fn holding_register(&self, index: u16) -> Result<u16, StoreError> {
        Ok(self.read_words(RegisterType::HoldingRegister, index, 1)?[0])
    }

    pub fn set_holding_register(&mut self, index: u16, value: u16) -> Result<(), StoreError> {
        self.write_holding_registers(index, &[value])
    }

    pub fn input_register(&self, index: u16) -> Result<u16, StoreError> {
        Ok(self.read_words(RegisterType::InputRegister, index, 1)?[0])
    }

    /// Local (non-protocol) write to the read-only input register table.
    pub fn set_input_register(&mut self, index: u16, value: u16) -> Result<(), StoreError> {
        let range = self.check_range(RegisterType::InputRegister, index, 1)?;
        self.input_registers[range.start] = value;
        Ok(())
    }
}
