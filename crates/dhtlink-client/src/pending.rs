//! Commands waiting for a broker acknowledgment.
//!
//! Every SUBSCRIBE and QoS 1 PUBLISH gets a packet identifier that is not
//! used by any other in-flight command, and stays in the table until its
//! SUBACK/PUBACK arrives, its deadline passes, or the connection drops.

use std::collections::HashSet;
use std::time::Instant;

use dhtlink_core::packet::{Publish, QoS};

/// What an in-flight command is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Waiting for SUBACK.
    Subscribe { filter: String, qos: QoS },
    /// Waiting for PUBACK. `attempts` counts transmissions so far.
    Publish { publish: Publish, attempts: u32 },
}

/// An in-flight command.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub packet_id: u16,
    pub kind: CommandKind,
    pub issued_at: Instant,
    pub timeout_at: Instant,
    /// A caller is blocked on the outcome. Resubscribes are not awaited.
    pub awaited: bool,
}

/// In-flight commands in issue order.
#[derive(Debug)]
pub struct PendingCommands {
    next_id: u16,
    commands: Vec<PendingCommand>,
    in_use: HashSet<u16>,
}

impl Default for PendingCommands {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingCommands {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            commands: Vec::new(),
            in_use: HashSet::new(),
        }
    }

    /// Allocate a packet identifier not held by any pending command.
    ///
    /// Returns `None` if all 65535 identifiers are in flight.
    pub fn allocate_id(&mut self) -> Option<u16> {
        let start = self.next_id;
        loop {
            let id = self.next_id;
            self.next_id = if self.next_id == u16::MAX { 1 } else { self.next_id + 1 };
            if !self.contains(id) {
                return Some(id);
            }
            if self.next_id == start {
                return None;
            }
        }
    }

    /// Track a command. Its identifier must come from `allocate_id`.
    pub fn insert(&mut self, command: PendingCommand) {
        debug_assert!(!self.contains(command.packet_id));
        self.in_use.insert(command.packet_id);
        self.commands.push(command);
    }

    /// Remove and return the command acknowledged by `packet_id`.
    pub fn complete(&mut self, packet_id: u16) -> Option<PendingCommand> {
        if !self.in_use.remove(&packet_id) {
            return None;
        }
        let index = self.commands.iter().position(|c| c.packet_id == packet_id)?;
        Some(self.commands.remove(index))
    }

    /// Remove and return every command whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Vec<PendingCommand> {
        let (expired, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.commands)
            .into_iter()
            .partition(|c| c.timeout_at <= now);
        self.commands = live;
        for command in &expired {
            self.in_use.remove(&command.packet_id);
        }
        expired
    }

    /// Remove and return everything.
    pub fn drain(&mut self) -> Vec<PendingCommand> {
        self.in_use.clear();
        std::mem::take(&mut self.commands)
    }

    /// Earliest deadline among pending commands.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.commands.iter().map(|c| c.timeout_at).min()
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.in_use.contains(&packet_id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
