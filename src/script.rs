//! Timed pin commands, and scripts built from them.
//!
//! A script is assembled once, with all loops and byte-to-bit expansion paid for at build time,
//! and then replayed by an [`Engine`](crate::Engine) as a flat sequence. Commands carry no
//! protocol knowledge. Results are written to caller-owned slots, see [`Slot`].

use core::num::NonZeroU8;

use heapless::Vec;

use crate::error::ConfigError;
use crate::pin::{Edge, Mode, Pin};
use crate::tick::Tick;

/// Index into the caller-owned `&mut [Tick]` buffer a script runs against. A slot holds a tick,
/// a level word or a flag, depending on the command that writes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot(u16);

impl Slot {
    #[inline(always)]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Outputs of a [`Command::WaitFor`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Seen {
    /// Tick of the poll that decided the wait, hit or timeout.
    pub at: Slot,
    /// Tick of the poll before that one, or the reference tick if the first poll decided.
    pub before: Slot,
    /// Number of polls up to the hit, 0 on timeout.
    pub polls: Slot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// The level of `pin` equals `high`.
    Level { pin: Pin, high: bool },
    /// An armed edge latch in `mask` fired.
    Edge { mask: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relation {
    #[inline(always)]
    pub fn holds(self, lhs: Tick, rhs: Tick) -> bool {
        match self {
            Relation::Eq => lhs == rhs,
            Relation::Ne => lhs != rhs,
            Relation::Lt => lhs < rhs,
            Relation::Le => lhs <= rhs,
            Relation::Gt => lhs > rhs,
            Relation::Ge => lhs >= rhs,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Const(Tick),
    Slot(Slot),
}

impl From<Tick> for Operand {
    fn from(value: Tick) -> Self {
        Operand::Const(value)
    }
}

impl From<Slot> for Operand {
    fn from(slot: Slot) -> Self {
        Operand::Slot(slot)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Reads the counter into `into`, and remembers it as the recent tick.
    Time { into: Slot },
    /// Copies the recent tick into `into`.
    Recent { into: Slot },
    /// Polls until `span` ticks passed since the recent tick.
    Sleep { span: Tick },
    /// Polls until `span` ticks passed since the tick in `since`.
    Wait { since: Slot, span: Tick },
    /// Polls until `until` holds, or more than `span` ticks passed since the tick in `since`.
    WaitFor {
        since: Slot,
        span: Tick,
        until: Condition,
        seen: Seen,
    },
    Mode { pin: Pin, mode: Mode },
    High { pin: Pin },
    Low { pin: Pin },
    /// Samples the whole levels word.
    Levels { into: Slot },
    /// Samples one pin, as 0 or 1.
    Level { pin: Pin, into: Slot },
    Arm { pin: Pin, edge: Option<Edge> },
    /// Ticks from `from` to `to`, wrap-safe.
    Duration { from: Slot, to: Slot, into: Slot },
    /// Ends the script with `code` unless `lhs relation rhs`.
    Assume {
        lhs: Slot,
        relation: Relation,
        rhs: Operand,
        code: NonZeroU8,
    },
    /// Stores `lhs relation rhs` as 0 or 1.
    Compare {
        lhs: Slot,
        relation: Relation,
        rhs: Operand,
        into: Slot,
    },
}

/// An immutable command sequence holding up to `N` commands.
#[derive(Clone, Debug)]
pub struct Script<const N: usize> {
    commands: Vec<Command, N>,
    slots: u16,
}

impl<const N: usize> Script<N> {
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Length of the slot buffer this script needs.
    pub fn slots(&self) -> usize {
        self.slots as usize
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Builder for a [`Script`], one method per command.
///
/// Running out of commands or slots doesn't fail the individual call; it is reported once by
/// [`Enqueue::finish`].
#[derive(Debug)]
pub struct Enqueue<const N: usize> {
    commands: Vec<Command, N>,
    slots: u16,
    overflow: bool,
}

impl<const N: usize> Default for Enqueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Enqueue<N> {
    pub fn new() -> Enqueue<N> {
        Enqueue {
            commands: Vec::new(),
            slots: 0,
            overflow: false,
        }
    }

    /// Allocates a fresh output slot.
    pub fn slot(&mut self) -> Slot {
        let slot = Slot(self.slots);
        match self.slots.checked_add(1) {
            Some(next) => self.slots = next,
            None => self.overflow = true,
        }
        slot
    }

    pub fn seen(&mut self) -> Seen {
        Seen {
            at: self.slot(),
            before: self.slot(),
            polls: self.slot(),
        }
    }

    fn push(&mut self, command: Command) -> &mut Self {
        if self.commands.push(command).is_err() {
            self.overflow = true;
        }
        self
    }

    pub fn time(&mut self, into: Slot) -> &mut Self {
        self.push(Command::Time { into })
    }

    pub fn recent(&mut self, into: Slot) -> &mut Self {
        self.push(Command::Recent { into })
    }

    pub fn sleep(&mut self, span: Tick) -> &mut Self {
        self.push(Command::Sleep { span })
    }

    pub fn wait(&mut self, since: Slot, span: Tick) -> &mut Self {
        self.push(Command::Wait { since, span })
    }

    pub fn wait_for(&mut self, since: Slot, span: Tick, until: Condition, seen: Seen) -> &mut Self {
        self.push(Command::WaitFor {
            since,
            span,
            until,
            seen,
        })
    }

    pub fn mode(&mut self, pin: Pin, mode: Mode) -> &mut Self {
        self.push(Command::Mode { pin, mode })
    }

    pub fn set(&mut self, pin: Pin) -> &mut Self {
        self.push(Command::High { pin })
    }

    pub fn reset(&mut self, pin: Pin) -> &mut Self {
        self.push(Command::Low { pin })
    }

    /// `set` or `reset`, by `high`.
    pub fn drive(&mut self, pin: Pin, high: bool) -> &mut Self {
        if high {
            self.set(pin)
        } else {
            self.reset(pin)
        }
    }

    pub fn levels(&mut self, into: Slot) -> &mut Self {
        self.push(Command::Levels { into })
    }

    pub fn level(&mut self, pin: Pin, into: Slot) -> &mut Self {
        self.push(Command::Level { pin, into })
    }

    pub fn arm(&mut self, pin: Pin, edge: Option<Edge>) -> &mut Self {
        self.push(Command::Arm { pin, edge })
    }

    pub fn duration(&mut self, from: Slot, to: Slot, into: Slot) -> &mut Self {
        self.push(Command::Duration { from, to, into })
    }

    pub fn assume(
        &mut self,
        lhs: Slot,
        relation: Relation,
        rhs: impl Into<Operand>,
        code: NonZeroU8,
    ) -> &mut Self {
        self.push(Command::Assume {
            lhs,
            relation,
            rhs: rhs.into(),
            code,
        })
    }

    pub fn compare(
        &mut self,
        lhs: Slot,
        relation: Relation,
        rhs: impl Into<Operand>,
        into: Slot,
    ) -> &mut Self {
        self.push(Command::Compare {
            lhs,
            relation,
            rhs: rhs.into(),
            into,
        })
    }

    /// Number of slots allocated so far.
    pub fn slots(&self) -> usize {
        self.slots as usize
    }

    pub fn finish(self) -> Result<Script<N>, ConfigError> {
        if self.overflow {
            return Err(ConfigError::ScriptFull);
        }
        Ok(Script {
            commands: self.commands,
            slots: self.slots,
        })
    }
}
