// lib.rs

mod config;
mod core;
mod modbus_tcp;
mod net;
mod output;
mod pdu;
mod request;
mod server;
mod slots;

pub use config::{
    ConfigError, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_CLIENTS, DEFAULT_PORT, DEFAULT_TABLE_SIZE,
    ServerConfig, ServerConfigBuilder, TableSizes, UnitMismatchPolicy, WILDCARD_UNIT_ID,
};
pub use crate::core::{ExceptionCode, RegisterStore, RegisterType, StoreError};
pub use modbus_tcp::{FrameStatus, MAX_ADU_LEN, MBAP_HEADER_LEN, MbapHeader, ProtocolEngine, frame_ready, take_frame};
pub use net::{Acceptor, Connection, TcpAcceptor, TcpConnection};
pub use output::{FilePin, Level, LogPin, MemoryPin, OutputMirror, OutputPin};
pub use pdu::{exception_pdu, execute};
pub use request::{ModbusRequest, ModbusRequestBuilder};
pub use server::{Clock, ModbusServer, MonotonicClock, PollReport, ServerError, bind};
pub use slots::{Admission, ConnectionSlotTable, EvictReason, LiveSlot, RX_CAPACITY, Slot};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModbusUnitError {
    #[error("Start address is empty")]
    AddressIsEmpty,

    #[error("Invalid length: {0} == 0")]
    InvalidLength(u16),

    #[error("Invalid range: {0} + {1} = {2} > 65536")]
    RangeToMatch(u16, u16, u32),

    #[error("Register type is empty")]
    InvalidRegisterType,

    #[error("Type {0:?} haven't write command")]
    InvalidRegisterTypeForWriteCommand(RegisterType),

    #[error("Invalid coil value {0} at index {1}, expected 0 or 1")]
    InvalidCoilValue(u16, usize),

    #[error("Empty response received")]
    EmptyResponse,

    #[error("Unexpected function code: expected {0:#x}, got {1:#x}")]
    UnexpectedFunctionCode(u8, u8),

    #[error("Invalid response length")]
    InvalidResponseLength,

    #[error("Data length mismatch: expected max {expected}, got {actual}")]
    DataLengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModbusTransportError {
    #[error("Frame too short")]
    FrameTooShort,

    #[error("Invalid protocol ID: {0}")]
    InvalidProtocolId(u16),

    #[error("Invalid MBAP length: {0}")]
    InvalidLength(u16),

    #[error("Unit ID mismatch: expected {expected}, received {received}")]
    UnitIdMismatch { expected: u8, received: u8 },

    #[error("Transaction ID mismatch: expected {expected}, received {received}")]
    TransactionIdMismatch { expected: u16, received: u16 },

    #[error("Modbus exception: function code {0:#x}, exception code {1:#x}")]
    Exception(u8, u8),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ModbusUnitError),
}
