use std::io;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use super::*;
use crate::modbus_tcp::{FrameStatus, frame_ready};
use crate::net::{Acceptor, Connection, TcpAcceptor};
use crate::output::{OutputMirror, OutputPin};
use crate::slots::{Admission, ConnectionSlotTable, EvictReason};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Millisecond time source for idle tracking.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Opens the listening socket on every interface at the configured port.
pub fn bind(config: &ServerConfig) -> Result<TcpAcceptor, ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    TcpAcceptor::bind(addr).map_err(|source| ServerError::Bind { port: config.port, source })
}

/// What one `ModbusServer::poll` iteration did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub admitted: Option<usize>,
    pub rejected: bool,
    pub evicted: Vec<(usize, EvictReason)>,
    pub frames: usize,
}

impl PollReport {
    pub fn is_idle(&self) -> bool {
        self.admitted.is_none() && !self.rejected && self.evicted.is_empty() && self.frames == 0
    }
}

/// Single-threaded Modbus TCP server: one `poll` call admits at most one
/// pending connection, then services every slot in index order.
pub struct ModbusServer<A: Acceptor, P, K> {
    config: ServerConfig,
    engine: ProtocolEngine,
    acceptor: A,
    slots: ConnectionSlotTable<A::Conn>,
    store: RegisterStore,
    mirror: OutputMirror<P>,
    clock: K,
}

impl<A: Acceptor, P: OutputPin, K: Clock> ModbusServer<A, P, K> {
    pub fn new(config: ServerConfig, acceptor: A, pin: P, clock: K) -> Result<Self, ServerError> {
        config.validate()?;
        let tables = config.tables;
        Ok(ModbusServer {
            engine: ProtocolEngine::from_config(&config),
            acceptor,
            slots: ConnectionSlotTable::new(config.max_clients),
            store: RegisterStore::new(
                tables.coils,
                tables.discrete_inputs,
                tables.holding_registers,
                tables.input_registers,
            ),
            mirror: OutputMirror::new(pin),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    pub fn slots(&self) -> &ConnectionSlotTable<A::Conn> {
        &self.slots
    }

    pub fn pin(&self) -> &P {
        self.mirror.pin()
    }

    /// Runs one iteration. Never blocks on a socket.
    pub fn poll(&mut self) -> PollReport {
        let mut report = PollReport::default();
        self.admit(&mut report);
        for index in 0..self.slots.capacity() {
            self.service(index, &mut report);
        }
        report
    }

    /// Polls forever, sleeping `idle_sleep` after iterations that did nothing.
    pub fn run(&mut self, idle_sleep: Duration) -> ! {
        info!("Modbus TCP server running with {} client slots", self.slots.capacity());
        loop {
            if self.poll().is_idle() {
                thread::sleep(idle_sleep);
            }
        }
    }

    fn admit(&mut self, report: &mut PollReport) {
        let conn = match self.acceptor.poll_accept() {
            Ok(Some(conn)) => conn,
            Ok(None) => return,
            Err(e) => {
                warn!("Accept failed: {}", e);
                return;
            }
        };

        match self.slots.try_admit(conn, self.clock.now_ms()) {
            Admission::Admitted(index) => report.admitted = Some(index),
            Admission::Rejected(mut conn) => {
                conn.close();
                info!("No free client slot, rejected {}", conn.peer());
                report.rejected = true;
            }
        }
    }

    fn service(&mut self, index: usize, report: &mut PollReport) {
        let now = self.clock.now_ms();
        let Some(live) = self.slots.get_mut(index) else {
            return;
        };

        if !live.conn.is_alive() {
            self.slots.evict(index, EvictReason::Dead);
            report.evicted.push((index, EvictReason::Dead));
            return;
        }
        if self.slots.is_stale(index, now, self.config.idle_timeout_ms) {
            self.slots.evict(index, EvictReason::Idle);
            report.evicted.push((index, EvictReason::Idle));
            return;
        }

        let Some(live) = self.slots.get_mut(index) else {
            return;
        };
        let pending = live.conn.has_pending();
        if !pending && !frame_ready(&live.rx) {
            return;
        }
        if pending {
            live.last_activity_ms = now;
        }

        let engine = self.engine;
        let budget = self.config.max_frames_per_poll;
        let mut frames = 0;
        let mut reply_failed = false;
        'drain: loop {
            // leftover whole frames are served before the socket is read again
            if !frame_ready(&live.rx) {
                let room = live.rx_room();
                if let Err(e) = live.conn.read_available(&mut live.rx, room) {
                    warn!("Read from client {} failed: {}", index, e);
                    break;
                }
            }
            loop {
                if budget.is_some_and(|max| frames >= max) {
                    break 'drain;
                }
                let status = engine.poll(&mut live.conn, &mut live.rx, &mut self.store);
                if status == FrameStatus::Incomplete {
                    break;
                }
                if !status.consumed_frame() {
                    continue;
                }
                frames += 1;
                finish_frame(&mut self.store, &mut self.mirror, self.config.test_mutation);
                if status == FrameStatus::ReplyFailed {
                    reply_failed = true;
                    break 'drain;
                }
            }
            if !live.conn.has_pending() {
                break;
            }
        }
        report.frames += frames;

        if reply_failed {
            self.slots.evict(index, EvictReason::Dead);
            report.evicted.push((index, EvictReason::Dead));
        }
    }
}

/// Per-frame side effects: the coil 0 / holding register 0 test mutation,
/// then the output mirror.
fn finish_frame<P: OutputPin>(store: &mut RegisterStore, mirror: &mut OutputMirror<P>, mutate: bool) {
    if mutate {
        if let Ok(coil) = store.coil(0) {
            let _ = store.set_coil(0, !coil);
        }
        if let Ok(value) = store.holding_register(0) {
            let _ = store.set_holding_register(0, value.wrapping_add(1));
        }
    }
    debug!(
        "coil 0 = {:?}, holding 0 = {:?}",
        store.coil(0).ok(),
        store.holding_register(0).ok()
    );
    mirror.update(store);
}
