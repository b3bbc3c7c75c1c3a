use thiserror::Error;

pub const DEFAULT_PORT: u16 = 502;
/// Unit id 0xFF answers requests for every unit id.
pub const WILDCARD_UNIT_ID: u8 = 0xFF;
pub const DEFAULT_MAX_CLIENTS: usize = 3;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 50_000;
pub const DEFAULT_TABLE_SIZE: usize = 10;

const MAX_TABLE_SIZE: usize = 65_536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Max clients must be at least 1")]
    NoClientSlots,

    #[error("Idle timeout must be at least 1 ms")]
    ZeroIdleTimeout,

    #[error("Table size {0} > 65536")]
    TableTooLarge(usize),

    #[error("Frame budget per poll must be at least 1")]
    ZeroFrameBudget,
}

/// What to do with a frame addressed to another unit id.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnitMismatchPolicy {
    Drop,
    Exception,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableSizes {
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
}

impl TableSizes {
    /// The same size for all four tables.
    pub fn uniform(size: usize) -> Self {
        TableSizes {
            coils: size,
            discrete_inputs: size,
            holding_registers: size,
            input_registers: size,
        }
    }
}

impl Default for TableSizes {
    fn default() -> Self {
        TableSizes::uniform(DEFAULT_TABLE_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub unit_id: u8,
    pub max_clients: usize,
    pub idle_timeout_ms: u64,
    pub tables: TableSizes,
    pub unit_mismatch: UnitMismatchPolicy,
    /// `None` drains every available frame of a slot in one pass.
    pub max_frames_per_poll: Option<usize>,
    /// Toggle coil 0 and bump holding register 0 after every frame.
    pub test_mutation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            unit_id: WILDCARD_UNIT_ID,
            max_clients: DEFAULT_MAX_CLIENTS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            tables: TableSizes::default(),
            unit_mismatch: UnitMismatchPolicy::Drop,
            max_frames_per_poll: None,
            test_mutation: true,
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder { config: ServerConfig::default() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::NoClientSlots);
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        let tables = &self.tables;
        for size in [
            tables.coils,
            tables.discrete_inputs,
            tables.holding_registers,
            tables.input_registers,
        ] {
            if size > MAX_TABLE_SIZE {
                return Err(ConfigError::TableTooLarge(size));
            }
        }
        if self.max_frames_per_poll == Some(0) {
            return Err(ConfigError::ZeroFrameBudget);
        }
        Ok(())
    }
}

pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.config.unit_id = unit_id;
        self
    }

    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.config.max_clients = max_clients;
        self
    }

    pub fn idle_timeout_ms(mut self, idle_timeout_ms: u64) -> Self {
        self.config.idle_timeout_ms = idle_timeout_ms;
        self
    }

    /// Sets all four tables to the same size.
    pub fn table_size(mut self, size: usize) -> Self {
        self.config.tables = TableSizes::uniform(size);
        self
    }

    pub fn tables(mut self, tables: TableSizes) -> Self {
        self.config.tables = tables;
        self
    }

    pub fn unit_mismatch(mut self, policy: UnitMismatchPolicy) -> Self {
        self.config.unit_mismatch = policy;
        self
    }

    pub fn max_frames_per_poll(mut self, limit: Option<usize>) -> Self {
        self.config.max_frames_per_poll = limit;
        self
    }

    pub fn test_mutation(mut self, enabled: bool) -> Self {
        self.config.test_mutation = enabled;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
