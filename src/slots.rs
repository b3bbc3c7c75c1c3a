use log::info;

use crate::modbus_tcp::MAX_ADU_LEN;
use crate::net::Connection;

/// Most bytes a slot buffers before the socket is left to TCP flow control.
pub const RX_CAPACITY: usize = 4 * MAX_ADU_LEN;

/// Why a slot was emptied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvictReason {
    /// The peer closed or the link failed.
    Dead,
    /// No inbound bytes within the idle timeout.
    Idle,
}

pub struct LiveSlot<C> {
    pub(crate) conn: C,
    pub(crate) last_activity_ms: u64,
    /// Bytes received but not yet consumed as a whole frame.
    pub(crate) rx: Vec<u8>,
}

impl<C: Connection> LiveSlot<C> {
    pub fn peer(&self) -> &str {
        self.conn.peer()
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn rx_room(&self) -> usize {
        RX_CAPACITY.saturating_sub(self.rx.len())
    }
}

pub enum Slot<C> {
    Empty,
    Live(LiveSlot<C>),
}

/// Result of offering a new connection to the table.
pub enum Admission<C> {
    Admitted(usize),
    /// Every slot holds a live connection. The caller owns the rejected
    /// connection again and must close it.
    Rejected(C),
}

/// Fixed-capacity arena of client slots, addressed only by index.
pub struct ConnectionSlotTable<C> {
    slots: Vec<Slot<C>>,
}

impl<C: Connection> ConnectionSlotTable<C> {
    pub fn new(capacity: usize) -> Self {
        ConnectionSlotTable { slots: (0..capacity).map(|_| Slot::Empty).collect() }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| matches!(slot, Slot::Live(_))).count()
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Live(_)))
    }

    pub fn get(&self, index: usize) -> Option<&LiveSlot<C>> {
        match self.slots.get(index) {
            Some(Slot::Live(live)) => Some(live),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut LiveSlot<C>> {
        match self.slots.get_mut(index) {
            Some(Slot::Live(live)) => Some(live),
            _ => None,
        }
    }

    /// Places `conn` into the lowest-indexed slot that is empty or whose
    /// occupant is no longer alive. A dead occupant is closed first.
    pub fn try_admit(&mut self, conn: C, now_ms: u64) -> Admission<C> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let reusable = match slot {
                Slot::Empty => true,
                Slot::Live(live) => !live.conn.is_alive(),
            };
            if !reusable {
                continue;
            }

            if let Slot::Live(mut old) = std::mem::replace(slot, Slot::Empty) {
                old.conn.close();
                info!("Break client {} ({})", index, old.conn.peer());
            }
            info!("New client {} ({})", index, conn.peer());
            *slot = Slot::Live(LiveSlot { conn, last_activity_ms: now_ms, rx: Vec::new() });
            return Admission::Admitted(index);
        }
        Admission::Rejected(conn)
    }

    /// True iff the slot is occupied and has been quiet for at least `timeout_ms`.
    pub fn is_stale(&self, index: usize, now_ms: u64, timeout_ms: u64) -> bool {
        match self.get(index) {
            Some(live) => now_ms.saturating_sub(live.last_activity_ms) >= timeout_ms,
            None => false,
        }
    }

    pub(crate) fn touch(&mut self, index: usize, now_ms: u64) {
        if let Some(live) = self.get_mut(index) {
            live.last_activity_ms = now_ms;
        }
    }

    /// Closes the connection in `index` and empties the slot, dropping any
    /// partially received frame. Returns false if the slot was already empty.
    pub fn evict(&mut self, index: usize, reason: EvictReason) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        match std::mem::replace(slot, Slot::Empty) {
            Slot::Live(mut live) => {
                live.conn.close();
                match reason {
                    EvictReason::Dead => info!("Break client {} ({})", index, live.conn.peer()),
                    EvictReason::Idle => info!("Stop client {} ({})", index, live.conn.peer()),
                }
                true
            }
            Slot::Empty => false,
        }
    }
}
