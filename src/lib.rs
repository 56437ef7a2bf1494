#![cfg_attr(not(feature = "std"), no_std)]

//! Wire-level protocols driven from user space through general purpose I/O lines, using a free
//! running tick counter as the only time reference.
//!
//! Protocols are expressed as [`Script`]s of timed pin commands, built once and replayed by an
//! [`Engine`]. The host may preempt the process at any point; the protocol layers don't prevent
//! that, they detect it and fail with [`Error::Retry`] so the transaction can be restarted.

use core::time::Duration;

use log::{debug, trace};

mod address;
pub mod ads1115;
mod bus;
pub mod commands;
pub mod crc;
pub mod ds18x20;
mod engine;
mod error;
pub mod i2c;
pub mod max7219;
mod pin;
pub mod script;
pub mod search;
mod tick;
pub mod timing;

pub use address::Address;
pub use bus::BitBus;
pub use engine::{Engine, Fault};
pub use error::{retry, BusResult, ConfigError, Error, NACK, RETRY, TIMING};
pub use pin::{Edge, HalLine, Mode, Pin, PinLine};
pub use script::{Command, Condition, Enqueue, Operand, Relation, Script, Seen, Slot};
pub use search::{Devices, Discovery, SearchKind};
#[cfg(feature = "std")]
pub use tick::StdClock;
pub use tick::{elapsed, Clock, Tick};
pub use timing::{Converter, OneWireTiming, Ticks, Window};

/// How long a reset waits for the pull-up to bring an idle bus high.
const IDLE_TIMEOUT: Duration = Duration::from_micros(250);

const IDLE_SCRIPT: usize = 2;
const RESET_SCRIPT: usize = 12;
const BIT_SCRIPT: usize = 16;

/// Bytes compiled into one script by `read_bytes`/`write_bytes`.
const BATCH_BYTES: usize = 2;
const BATCH_SCRIPT: usize = 256;
const BATCH_SLOTS: usize = 5 + 2 * 8 * BATCH_BYTES;

#[derive(Copy, Clone, Debug)]
struct Scratch {
    ta: Slot,
    t0: Slot,
    tr: Slot,
    t1: Slot,
    d: Slot,
}

impl Scratch {
    fn new<const N: usize>(q: &mut Enqueue<N>) -> Scratch {
        Scratch {
            ta: q.slot(),
            t0: q.slot(),
            tr: q.slot(),
            t1: q.slot(),
            d: q.slot(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct IdleSlots {
    t0: Slot,
    high: Seen,
}

#[derive(Copy, Clone, Debug)]
struct ResetSlots {
    tb: Slot,
    t1: Slot,
    fall: Seen,
    rise: Seen,
}

/// Appends one write slot. The low time is bounded above by `t1 - ta`, which must stay within
/// the datasheet maximum.
fn write_bit_into<const N: usize>(
    q: &mut Enqueue<N>,
    pin: Pin,
    t: &OneWireTiming<Ticks>,
    s: &Scratch,
    bit: bool,
) {
    let low = if bit { t.low1 } else { t.low0 };
    q.time(s.ta)
        .mode(pin, Mode::Out)
        .time(s.t0)
        .sleep(low.min)
        .mode(pin, Mode::In)
        .time(s.t1)
        .wait(s.t0, t.slot.min.saturating_add(t.rec))
        .duration(s.ta, s.t1, s.d)
        .assume(s.d, Relation::Le, low.max, RETRY);
}

/// Appends one read slot; the bit ends up in `a`. Both samples have to agree, and the first one
/// must be taken before the data valid deadline.
fn read_bit_into<const N: usize>(
    q: &mut Enqueue<N>,
    pin: Pin,
    t: &OneWireTiming<Ticks>,
    s: &Scratch,
    a: Slot,
    b: Slot,
) {
    q.time(s.ta)
        .mode(pin, Mode::Out)
        .time(s.t0)
        .sleep(t.rinit)
        .mode(pin, Mode::In)
        .time(s.tr)
        .sleep(t.rrc)
        .level(pin, a)
        .time(s.t1)
        .wait(s.ta, t.rdv)
        .level(pin, b)
        .wait(s.t0, t.slot.min.saturating_add(t.rec))
        .duration(s.ta, s.t1, s.d)
        .assume(s.d, Relation::Le, t.rdv, RETRY)
        .assume(a, Relation::Eq, b, RETRY);
}

/// Implementation of the 1-Wire protocol.
/// https://www.maximintegrated.com/en/design/technical-documents/app-notes/1/126.html
///
/// Reset and single bit slots run from scripts built once at construction; byte sequences are
/// compiled into batch scripts on the fly.
pub struct OneWire<C, P> {
    engine: Engine<C, P>,
    pin: Pin,
    timing: OneWireTiming<Ticks>,
    converter: Converter,
    idle: Script<IDLE_SCRIPT>,
    idle_slots: IdleSlots,
    reset: Script<RESET_SCRIPT>,
    reset_slots: ResetSlots,
    write: [Script<BIT_SCRIPT>; 2],
    read: Script<BIT_SCRIPT>,
    read_slot: Slot,
}

impl<C, P, E> OneWire<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    pub fn new(
        engine: Engine<C, P>,
        pin: Pin,
        timing: &OneWireTiming<Duration>,
    ) -> BusResult<OneWire<C, P>, E> {
        let ticks = timing.to_ticks(engine.clock().frequency())?;
        Self::with_ticks(engine, pin, ticks)
    }

    /// Like [`OneWire::new`], with a timing table already converted to ticks.
    pub fn with_ticks(
        mut engine: Engine<C, P>,
        pin: Pin,
        timing: OneWireTiming<Ticks>,
    ) -> BusResult<OneWire<C, P>, E> {
        timing.validate()?;
        if !engine.pins().contains(pin) {
            return Err(ConfigError::Pin(pin.index()).into());
        }
        let converter = Converter::new(engine.clock().frequency())?;

        let mut q = Enqueue::<IDLE_SCRIPT>::new();
        let idle_slots = IdleSlots {
            t0: q.slot(),
            high: q.seen(),
        };
        q.time(idle_slots.t0).wait_for(
            idle_slots.t0,
            converter.round(IDLE_TIMEOUT, "idle")?,
            Condition::Level { pin, high: true },
            idle_slots.high,
        );
        let idle = q.finish()?;

        let mut q = Enqueue::<RESET_SCRIPT>::new();
        let t0 = q.slot();
        let reset_slots = ResetSlots {
            tb: q.slot(),
            t1: q.slot(),
            fall: q.seen(),
            rise: q.seen(),
        };
        q.mode(pin, Mode::Out)
            .time(t0)
            .sleep(timing.rstl)
            .time(reset_slots.tb)
            .mode(pin, Mode::In)
            .time(reset_slots.t1)
            .wait_for(
                reset_slots.t1,
                timing.pdhigh.max,
                Condition::Level { pin, high: false },
                reset_slots.fall,
            )
            .wait_for(
                reset_slots.fall.at,
                timing.pdlow.max,
                Condition::Level { pin, high: true },
                reset_slots.rise,
            )
            .wait(reset_slots.t1, timing.rsth);
        let reset = q.finish()?;

        let write = [false, true].map(|bit| {
            let mut q = Enqueue::<BIT_SCRIPT>::new();
            let scratch = Scratch::new(&mut q);
            write_bit_into(&mut q, pin, &timing, &scratch, bit);
            q.finish()
        });
        let [write0, write1] = write;

        let mut q = Enqueue::<BIT_SCRIPT>::new();
        let scratch = Scratch::new(&mut q);
        let read_slot = q.slot();
        let check = q.slot();
        read_bit_into(&mut q, pin, &timing, &scratch, read_slot, check);
        let read = q.finish()?;

        // Pin should be released during idle.
        engine.open_drain(pin).map_err(Error::Pin)?;

        Ok(OneWire {
            engine,
            pin,
            timing,
            converter,
            idle,
            idle_slots,
            reset,
            reset_slots,
            write: [write0?, write1?],
            read,
            read_slot,
        })
    }

    pub fn into_inner(self) -> Engine<C, P> {
        self.engine
    }

    pub fn pin(&self) -> Pin {
        self.pin
    }

    pub fn timing(&self) -> &OneWireTiming<Ticks> {
        &self.timing
    }

    /// Whether the polls around `seen.at` were too far apart to trust where the edge fell.
    fn gap(&self, slots: &[Tick], seen: Seen) -> bool {
        elapsed(slots[seen.before.index()], slots[seen.at.index()]) > self.timing.latency
    }

    fn await_idle(&mut self) -> BusResult<(), E> {
        let mut slots = [0; 4];
        self.engine.run(&self.idle, &mut slots)?;
        let high = self.idle_slots.high;
        if slots[high.polls.index()] != 0 {
            Ok(())
        } else if self.gap(&slots, high) {
            trace!("idle wait interrupted");
            Err(Error::Retry)
        } else {
            debug!("bus held low before reset");
            Err(Error::Timing)
        }
    }

    fn classify_reset(&self, slots: &[Tick]) -> BusResult<bool, E> {
        let s = self.reset_slots;
        let t = &self.timing;
        let at = |slot: Slot| slots[slot.index()];

        if elapsed(at(s.tb), at(s.t1)) > t.latency {
            trace!("reset: preempted around release");
            return Err(Error::Retry);
        }
        if at(s.fall.polls) == 0 {
            if self.gap(slots, s.fall) {
                trace!("reset: presence window interrupted");
                return Err(Error::Retry);
            }
            return Ok(false);
        }
        if at(s.fall.polls) == 1 {
            // the pulse started before we could look
            trace!("reset: presence already low at first poll");
            return Err(Error::Retry);
        }
        if self.gap(slots, s.fall) {
            trace!("reset: presence edge not resolved");
            return Err(Error::Retry);
        }
        let high = elapsed(at(s.t1), at(s.fall.at));
        if high < t.pdhigh.min {
            debug!("reset: presence after {} ticks, below {}", high, t.pdhigh.min);
            return Err(Error::Timing);
        }
        if at(s.rise.polls) == 0 {
            if self.gap(slots, s.rise) {
                trace!("reset: presence pulse end interrupted");
                return Err(Error::Retry);
            }
            debug!("reset: presence pulse longer than {}", t.pdlow.max);
            return Err(Error::Timing);
        }
        if self.gap(slots, s.rise) {
            trace!("reset: presence pulse end not resolved");
            return Err(Error::Retry);
        }
        let low = elapsed(at(s.fall.at), at(s.rise.at));
        if low < t.pdlow.min {
            debug!("reset: presence pulse of {} ticks, below {}", low, t.pdlow.min);
            return Err(Error::Timing);
        }
        Ok(true)
    }

    fn write_batch(&mut self, bytes: &[u8]) -> BusResult<(), E> {
        let mut q = Enqueue::<BATCH_SCRIPT>::new();
        let scratch = Scratch::new(&mut q);
        for byte in bytes.iter().take(BATCH_BYTES) {
            for n in 0..8 {
                write_bit_into(&mut q, self.pin, &self.timing, &scratch, byte & (1 << n) != 0);
            }
        }
        let script = q.finish()?;
        let mut slots = [0; BATCH_SLOTS];
        self.engine.run(&script, &mut slots)?;
        Ok(())
    }

    fn read_batch(&mut self, output: &mut [u8]) -> BusResult<(), E> {
        let mut q = Enqueue::<BATCH_SCRIPT>::new();
        let scratch = Scratch::new(&mut q);
        let mut bits: heapless::Vec<Slot, { 8 * BATCH_BYTES }> = heapless::Vec::new();
        for _ in 0..output.len().min(BATCH_BYTES) * 8 {
            let bit = q.slot();
            let check = q.slot();
            read_bit_into(&mut q, self.pin, &self.timing, &scratch, bit, check);
            bits.push(bit).map_err(|_| ConfigError::ScriptFull)?;
        }
        let script = q.finish()?;
        let mut slots = [0; BATCH_SLOTS];
        self.engine.run(&script, &mut slots)?;
        for (value, byte) in output.iter_mut().zip(bits.chunks(8)) {
            *value = byte
                .iter()
                .enumerate()
                .fold(0, |acc, (n, bit)| acc | (((slots[bit.index()] != 0) as u8) << n));
        }
        Ok(())
    }

    /// Returns an iterator that iterates over all device addresses on the bus
    /// They can be filtered to only alarming devices if needed
    /// Device addresses will always be returned in the same order, see [`Discovery`].
    pub fn devices(&mut self, only_alarming: bool) -> Devices<&mut Self> {
        let kind = if only_alarming {
            SearchKind::Alarm
        } else {
            SearchKind::Normal
        };
        Discovery::new(self, kind).devices()
    }
}

impl<C, P, E> BitBus for OneWire<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    type PinError = E;

    /// Waits for the bus to idle high, sends a reset pulse, and checks the presence pulse against
    /// the timing table. Returns `false` if nobody answered. The reset recovery time is always
    /// waited out before returning.
    fn reset(&mut self) -> BusResult<bool, E> {
        self.await_idle()?;
        let mut slots = [0; 10];
        self.engine.run(&self.reset, &mut slots)?;
        self.classify_reset(&slots)
    }

    fn read_bit(&mut self) -> BusResult<bool, E> {
        let mut slots = [0; 7];
        self.engine.run(&self.read, &mut slots)?;
        Ok(slots[self.read_slot.index()] != 0)
    }

    fn write_bit(&mut self, bit: bool) -> BusResult<(), E> {
        let mut slots = [0; 5];
        self.engine.run(&self.write[bit as usize], &mut slots)?;
        Ok(())
    }

    fn delay(&mut self, duration: Duration) -> BusResult<(), E> {
        let span = self.converter.ceil(duration, "delay")?;
        self.engine.idle(span);
        Ok(())
    }

    fn read_bytes(&mut self, output: &mut [u8]) -> BusResult<(), E> {
        for chunk in output.chunks_mut(BATCH_BYTES) {
            self.read_batch(chunk)?;
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> BusResult<(), E> {
        for chunk in bytes.chunks(BATCH_BYTES) {
            self.write_batch(chunk)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> BusResult<u8, E> {
        let mut byte = [0];
        self.read_bytes(&mut byte)?;
        Ok(byte[0])
    }

    fn write_byte(&mut self, value: u8) -> BusResult<(), E> {
        self.write_bytes(&[value])
    }
}
