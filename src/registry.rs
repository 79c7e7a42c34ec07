use crate::error::{Error, Result};
use crate::network::Connection;
use std::fmt;
use tracing::{debug, info};

/// Handle to one registered connection
///
/// Pairs the slot index with a generation stamp so that a descriptor kept
/// around after `close` is rejected even if its slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    index: usize,
    generation: u64,
}

impl Descriptor {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u64,
    conn: Option<Connection>,
}

/// Growable table of connection slots
///
/// Capacity is always a power of two and only ever doubles; the table is
/// released entirely once the last connection closes. The first empty slot
/// scanning from index 0 is always the one reused.
pub(crate) struct ConnectionRegistry {
    slots: Vec<Slot>,
    valid: usize,
    next_generation: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            valid: 0,
            next_generation: 0,
        }
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.valid
    }

    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    /// Current slot capacity (power of two, 0 when released)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Check whether any live connection already targets host:port
    pub fn contains_endpoint(&self, host: &str, port: u16) -> bool {
        self.slots.iter().filter_map(|s| s.conn.as_ref()).any(|c| {
            c.port() == port && c.host().eq_ignore_ascii_case(host)
        })
    }

    /// Store a connection in the first free slot, growing if necessary
    pub fn insert(&mut self, conn: Connection) -> Descriptor {
        if self.valid == self.slots.len() {
            let new_len = if self.slots.is_empty() {
                1
            } else {
                self.slots.len() * 2
            };
            debug!(
                "growing registry from {} to {} slots",
                self.slots.len(),
                new_len
            );
            self.slots.resize_with(new_len, || Slot {
                generation: 0,
                conn: None,
            });
        }

        let index = self
            .slots
            .iter()
            .position(|s| s.conn.is_none())
            .expect("doubling guarantees a free slot");

        let generation = self.next_generation;
        self.next_generation += 1;

        let slot = &mut self.slots[index];
        slot.generation = generation;
        slot.conn = Some(conn);
        self.valid += 1;

        Descriptor { index, generation }
    }

    /// Take a connection out of the table, releasing it when it empties
    pub fn remove(&mut self, d: Descriptor) -> Result<Connection> {
        self.validate(d)?;
        let conn = self.slots[d.index]
            .conn
            .take()
            .ok_or(Error::StaleDescriptor(d))?;
        self.valid -= 1;

        if self.valid == 0 {
            info!("last connection closed, releasing registry");
            self.slots = Vec::new();
        }

        Ok(conn)
    }

    pub fn get(&self, d: Descriptor) -> Result<&Connection> {
        self.validate(d)?;
        self.slots[d.index]
            .conn
            .as_ref()
            .ok_or(Error::StaleDescriptor(d))
    }

    pub fn get_mut(&mut self, d: Descriptor) -> Result<&mut Connection> {
        self.validate(d)?;
        self.slots[d.index]
            .conn
            .as_mut()
            .ok_or(Error::StaleDescriptor(d))
    }

    /// Indices of every occupied slot, for the tick engine
    pub fn occupied(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.conn.is_some())
            .map(|(i, _)| i)
            .collect()
    }

    /// Direct slot access by index (tick engine token lookup)
    pub fn conn_mut_at(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots.get_mut(index).and_then(|s| s.conn.as_mut())
    }

    fn validate(&self, d: Descriptor) -> Result<()> {
        let slot = self
            .slots
            .get(d.index)
            .ok_or(Error::InvalidDescriptor(d))?;
        if slot.conn.is_none() || slot.generation != d.generation {
            return Err(Error::StaleDescriptor(d));
        }
        Ok(())
    }
}
