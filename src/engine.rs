use core::num::NonZeroU8;

use crate::pin::{Mode, PinLine};
use crate::script::{Command, Condition, Operand, Script};
use crate::tick::{elapsed, Clock, Tick};

/// Why a script run stopped early.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault<E> {
    /// An `assume` failed.
    Abort(NonZeroU8),
    /// The slot buffer is shorter than the script needs.
    Slots { needed: usize, given: usize },
    Pin(E),
}

impl<E> From<E> for Fault<E> {
    fn from(err: E) -> Self {
        Fault::Pin(err)
    }
}

/// Replays scripts against a clock and a pin line.
///
/// The only state kept between commands is the recent tick and the last sampled levels word.
/// Every wait is a busy loop on the counter: yielding to a scheduler would only add the jitter
/// the protocols are trying to detect.
pub struct Engine<C, P> {
    clock: C,
    pins: P,
    recent: Tick,
    levels: u32,
}

impl<C, P> Engine<C, P>
where
    C: Clock,
    P: PinLine,
{
    pub fn new(clock: C, pins: P) -> Engine<C, P> {
        let recent = clock.now();
        Engine {
            clock,
            pins,
            recent,
            levels: 0,
        }
    }

    pub fn into_inner(self) -> (C, P) {
        (self.clock, self.pins)
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn pins_mut(&mut self) -> &mut P {
        &mut self.pins
    }

    /// The tick last recorded by `Time`, or by the end of a `WaitFor`.
    pub fn recent(&self) -> Tick {
        self.recent
    }

    /// The levels word last sampled.
    pub fn levels(&self) -> u32 {
        self.levels
    }

    /// Runs `script` in program order. Stops at the first failed `assume`.
    pub fn run<const N: usize>(
        &mut self,
        script: &Script<N>,
        slots: &mut [Tick],
    ) -> Result<(), Fault<P::Error>> {
        if slots.len() < script.slots() {
            return Err(Fault::Slots {
                needed: script.slots(),
                given: slots.len(),
            });
        }
        for command in script.commands() {
            self.execute(command, slots)?;
        }
        Ok(())
    }

    /// Busy-waits for `span` ticks from now.
    pub fn idle(&mut self, span: Tick) {
        let t0 = self.clock.now();
        while elapsed(t0, self.clock.now()) < span {}
        self.recent = t0;
    }

    /// Executes a single command.
    ///
    /// Panics if the command refers to a slot beyond `slots`; [`Engine::run`] checks this once
    /// for a whole script.
    #[inline]
    pub fn execute(&mut self, command: &Command, slots: &mut [Tick]) -> Result<(), Fault<P::Error>> {
        match *command {
            Command::Time { into } => {
                self.recent = self.clock.now();
                slots[into.index()] = self.recent;
            }
            Command::Recent { into } => slots[into.index()] = self.recent,
            Command::Sleep { span } => {
                while elapsed(self.recent, self.clock.now()) < span {}
            }
            Command::Wait { since, span } => {
                let t0 = slots[since.index()];
                while elapsed(t0, self.clock.now()) < span {}
            }
            Command::WaitFor {
                since,
                span,
                until,
                seen,
            } => {
                let t0 = slots[since.index()];
                let mut before = t0;
                let mut polls: Tick = 0;
                let (at, hit) = loop {
                    let holds = match until {
                        Condition::Level { pin, high } => {
                            self.levels = self.pins.sample_levels()?;
                            (self.levels & pin.mask() != 0) == high
                        }
                        Condition::Edge { mask } => self.pins.read_and_clear_edges(mask)? != 0,
                    };
                    let now = self.clock.now();
                    polls = polls.saturating_add(1);
                    // the deadline wins over a late hit
                    if elapsed(t0, now) > span {
                        break (now, false);
                    }
                    if holds {
                        break (now, true);
                    }
                    before = now;
                };
                self.recent = at;
                slots[seen.at.index()] = at;
                slots[seen.before.index()] = before;
                slots[seen.polls.index()] = if hit { polls } else { 0 };
            }
            Command::Mode { pin, mode } => self.pins.set_mode(pin, mode)?,
            Command::High { pin } => self.pins.drive_high(pin)?,
            Command::Low { pin } => self.pins.drive_low(pin)?,
            Command::Levels { into } => {
                self.levels = self.pins.sample_levels()?;
                slots[into.index()] = self.levels;
            }
            Command::Level { pin, into } => {
                self.levels = self.pins.sample_levels()?;
                slots[into.index()] = (self.levels & pin.mask() != 0) as Tick;
            }
            Command::Arm { pin, edge } => self.pins.arm_edge(pin, edge)?,
            Command::Duration { from, to, into } => {
                slots[into.index()] = elapsed(slots[from.index()], slots[to.index()]);
            }
            Command::Assume {
                lhs,
                relation,
                rhs,
                code,
            } => {
                let rhs = Self::operand(rhs, slots);
                if !relation.holds(slots[lhs.index()], rhs) {
                    return Err(Fault::Abort(code));
                }
            }
            Command::Compare {
                lhs,
                relation,
                rhs,
                into,
            } => {
                let rhs = Self::operand(rhs, slots);
                slots[into.index()] = relation.holds(slots[lhs.index()], rhs) as Tick;
            }
        }
        Ok(())
    }

    #[inline(always)]
    fn operand(operand: Operand, slots: &[Tick]) -> Tick {
        match operand {
            Operand::Const(value) => value,
            Operand::Slot(slot) => slots[slot.index()],
        }
    }

    /// Puts `pin` in open-drain idle: output latch low, line released.
    pub(crate) fn open_drain(&mut self, pin: crate::Pin) -> Result<(), P::Error> {
        self.pins.set_mode(pin, Mode::In)?;
        self.pins.drive_low(pin)
    }
}
