use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use modbus_slot_server::{
    FilePin, LogPin, ModbusServer, MonotonicClock, OutputPin, ServerConfig, ServerError,
    TableSizes, UnitMismatchPolicy, bind,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about = "Modbus TCP server with bounded client slots")]
struct Args {
    /// TCP port to listen on
    #[clap(long, env = "MODBUS_PORT", default_value_t = 502)]
    port: u16,

    /// Unit id to answer; 255 answers every unit id
    #[clap(long, env = "MODBUS_UNIT_ID", default_value_t = 0xFF)]
    unit_id: u8,

    /// Maximum number of concurrent clients
    #[clap(long, env = "MODBUS_MAX_CLIENTS", default_value_t = 3)]
    max_clients: usize,

    /// Close clients that send nothing for this long
    #[clap(long, env = "MODBUS_IDLE_TIMEOUT_MS", default_value_t = 50_000)]
    idle_timeout_ms: u64,

    /// Entries in each of the four tables
    #[clap(long, env = "MODBUS_TABLE_SIZE", default_value_t = 10)]
    table_size: usize,

    /// Coil table size, overriding --table-size
    #[clap(long, env = "MODBUS_COILS")]
    coils: Option<usize>,

    /// Discrete input table size, overriding --table-size
    #[clap(long, env = "MODBUS_DISCRETE_INPUTS")]
    discrete_inputs: Option<usize>,

    /// Holding register table size, overriding --table-size
    #[clap(long, env = "MODBUS_HOLDING_REGISTERS")]
    holding_registers: Option<usize>,

    /// Input register table size, overriding --table-size
    #[clap(long, env = "MODBUS_INPUT_REGISTERS")]
    input_registers: Option<usize>,

    /// Answer frames for other unit ids with exception 0x0B instead of dropping them
    #[clap(long)]
    reply_unit_mismatch: bool,

    /// Cap on frames handled per client per loop pass
    #[clap(long, env = "MODBUS_MAX_FRAMES_PER_POLL")]
    max_frames_per_poll: Option<usize>,

    /// Disable the coil 0 toggle / holding register 0 increment after each frame
    #[clap(long)]
    no_test_mutation: bool,

    /// GPIO value file driven from coil 0; the output is only logged when absent
    #[clap(long, env = "MODBUS_PIN_PATH")]
    pin_path: Option<PathBuf>,

    /// Sleep between loop passes that had nothing to do
    #[clap(long, default_value_t = 5)]
    idle_sleep_ms: u64,

    /// Delay before setting up again after a startup failure
    #[clap(long, default_value_t = 1000)]
    restart_delay_ms: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let unit_mismatch = if args.reply_unit_mismatch {
        UnitMismatchPolicy::Exception
    } else {
        UnitMismatchPolicy::Drop
    };
    let tables = TableSizes {
        coils: args.coils.unwrap_or(args.table_size),
        discrete_inputs: args.discrete_inputs.unwrap_or(args.table_size),
        holding_registers: args.holding_registers.unwrap_or(args.table_size),
        input_registers: args.input_registers.unwrap_or(args.table_size),
    };
    let config = ServerConfig::builder()
        .port(args.port)
        .unit_id(args.unit_id)
        .max_clients(args.max_clients)
        .idle_timeout_ms(args.idle_timeout_ms)
        .tables(tables)
        .unit_mismatch(unit_mismatch)
        .max_frames_per_poll(args.max_frames_per_poll)
        .test_mutation(!args.no_test_mutation)
        .build()?;

    loop {
        let result = match &args.pin_path {
            Some(path) => serve(&config, FilePin::new(path), &args),
            None => serve(&config, LogPin::default(), &args),
        };
        if let Err(e) = result {
            error!("Failed to start Modbus TCP server: {}", e);
            info!("Restarting in {} ms", args.restart_delay_ms);
            thread::sleep(Duration::from_millis(args.restart_delay_ms));
        }
    }
}

/// Sets everything up and serves until startup fails.
fn serve<P: OutputPin>(config: &ServerConfig, pin: P, args: &Args) -> Result<(), ServerError> {
    let acceptor = bind(config)?;
    info!("Modbus TCP server start on port {}", config.port);

    let mut server = ModbusServer::new(config.clone(), acceptor, pin, MonotonicClock::new())?;
    server.run(Duration::from_millis(args.idle_sleep_ms))
}
