//! Bit-banged I2C master over two open-drain lines.
//!
//! START and STOP are retained scripts; every byte is compiled into a script of its own. SCL
//! stays low between scripts. Each script takes its own start as the last SCL fall and waits out
//! the full low time from there, so splitting a transaction this way only stretches the low
//! phase. Every SCL release waits for slaves that stretch the clock.

use core::time::Duration;

use embedded_hal::blocking::i2c::{Read, Write, WriteRead};
use log::debug;

use crate::engine::Engine;
use crate::error::{BusResult, ConfigError, Error, NACK, TIMING};
use crate::pin::{Mode, Pin, PinLine};
use crate::script::{Condition, Enqueue, Relation, Script, Seen, Slot};
use crate::tick::Clock;
use crate::timing::{Converter, Ticks};

const EDGE_SCRIPT: usize = 24;
const BYTE_SCRIPT: usize = 128;
const BYTE_SLOTS: usize = 16;

/// I2C bus timing, names after the NXP UM10204 table. All fields are minimums except `stretch`,
/// the longest a slave may hold SCL low.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cTiming<T> {
    /// Hold time of a (repeated) START.
    pub hd_sta: T,
    /// SCL low.
    pub low: T,
    /// SCL high.
    pub high: T,
    /// Setup of a repeated START.
    pub su_sta: T,
    pub su_dat: T,
    /// Setup of a STOP.
    pub su_sto: T,
    /// Bus free between a STOP and the next START.
    pub buf: T,
    pub stretch: T,
}

impl I2cTiming<Duration> {
    /// Standard mode, 100 kHz.
    pub const STANDARD: I2cTiming<Duration> = I2cTiming {
        hd_sta: Duration::from_nanos(4_000),
        low: Duration::from_nanos(4_700),
        high: Duration::from_nanos(4_000),
        su_sta: Duration::from_nanos(4_700),
        su_dat: Duration::from_nanos(250),
        su_sto: Duration::from_nanos(4_000),
        buf: Duration::from_nanos(4_700),
        stretch: Duration::from_millis(25),
    };

    /// Fast mode, 400 kHz.
    pub const FAST: I2cTiming<Duration> = I2cTiming {
        hd_sta: Duration::from_nanos(600),
        low: Duration::from_nanos(1_300),
        high: Duration::from_nanos(600),
        su_sta: Duration::from_nanos(600),
        su_dat: Duration::from_nanos(100),
        su_sto: Duration::from_nanos(600),
        buf: Duration::from_nanos(1_300),
        stretch: Duration::from_millis(25),
    };

    pub fn to_ticks(&self, frequency: u32) -> Result<I2cTiming<Ticks>, ConfigError> {
        let c = Converter::new(frequency)?;
        Ok(I2cTiming {
            hd_sta: c.ceil(self.hd_sta, "hd_sta")?,
            low: c.ceil(self.low, "low")?,
            high: c.ceil(self.high, "high")?,
            su_sta: c.ceil(self.su_sta, "su_sta")?,
            su_dat: c.ceil(self.su_dat, "su_dat")?,
            su_sto: c.ceil(self.su_sto, "su_sto")?,
            buf: c.ceil(self.buf, "buf")?,
            stretch: c.floor(self.stretch, "stretch")?,
        })
    }
}

impl I2cTiming<Ticks> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stretch == 0 {
            return Err(ConfigError::OutOfRange("stretch"));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug)]
struct Lines {
    scl: Pin,
    sda: Pin,
}

/// Slots shared by the clocking fragments of one script.
#[derive(Copy, Clone, Debug)]
struct Clocking {
    /// When SCL was last pulled low.
    fell: Slot,
    released: Slot,
    /// Reference for a `sleep` after a line change.
    mark: Slot,
    seen: Seen,
}

impl Clocking {
    fn new<const N: usize>(q: &mut Enqueue<N>) -> Clocking {
        Clocking {
            fell: q.slot(),
            released: q.slot(),
            mark: q.slot(),
            seen: q.seen(),
        }
    }
}

struct Fragments<'a, const N: usize> {
    q: &'a mut Enqueue<N>,
    lines: Lines,
    t: &'a I2cTiming<Ticks>,
    c: Clocking,
}

impl<const N: usize> Fragments<'_, N> {
    /// Releases SCL and waits for it to actually rise.
    fn scl_high(&mut self) -> &mut Self {
        let scl = self.lines.scl;
        self.q
            .mode(scl, Mode::In)
            .time(self.c.released)
            .wait_for(
                self.c.released,
                self.t.stretch,
                Condition::Level { pin: scl, high: true },
                self.c.seen,
            )
            .assume(self.c.seen.polls, Relation::Ne, 0, TIMING);
        self
    }

    fn scl_low(&mut self) -> &mut Self {
        self.q.mode(self.lines.scl, Mode::Out).time(self.c.fell);
        self
    }

    fn sda(&mut self, high: bool) -> &mut Self {
        let mode = if high { Mode::In } else { Mode::Out };
        self.q.mode(self.lines.sda, mode);
        self
    }

    /// Holds the current levels for at least `span`.
    fn hold(&mut self, span: Ticks) -> &mut Self {
        self.q.time(self.c.mark).sleep(span);
        self
    }

    fn send_bit(&mut self, bit: bool) -> &mut Self {
        let (su_dat, low) = (self.t.su_dat, self.t.low);
        self.sda(bit).hold(su_dat);
        self.q.wait(self.c.fell, low);
        self.scl_high();
        self.q.sleep(self.t.high);
        self.scl_low()
    }

    /// SDA must already be released.
    fn receive_bit(&mut self, into: Slot) -> &mut Self {
        self.q.wait(self.c.fell, self.t.low);
        self.scl_high();
        self.q.level(self.lines.sda, into).sleep(self.t.high);
        self.scl_low()
    }
}

/// I2C Bitbanging Driver
pub struct I2c<C, P> {
    engine: Engine<C, P>,
    lines: Lines,
    timing: I2cTiming<Ticks>,
    converter: Converter,
    start: Script<EDGE_SCRIPT>,
    stop: Script<EDGE_SCRIPT>,
}

impl<C, P, E> I2c<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    pub fn new(
        engine: Engine<C, P>,
        scl: Pin,
        sda: Pin,
        timing: &I2cTiming<Duration>,
    ) -> BusResult<I2c<C, P>, E> {
        let ticks = timing.to_ticks(engine.clock().frequency())?;
        Self::with_ticks(engine, scl, sda, ticks)
    }

    pub fn with_ticks(
        mut engine: Engine<C, P>,
        scl: Pin,
        sda: Pin,
        timing: I2cTiming<Ticks>,
    ) -> BusResult<I2c<C, P>, E> {
        timing.validate()?;
        for pin in [scl, sda] {
            if !engine.pins().contains(pin) {
                return Err(ConfigError::Pin(pin.index()).into());
            }
        }
        let converter = Converter::new(engine.clock().frequency())?;
        let lines = Lines { scl, sda };

        // works both from idle and as a repeated START with SCL low, which may have fallen just
        // before the script started
        let mut q = Enqueue::<EDGE_SCRIPT>::new();
        let c = Clocking::new(&mut q);
        let free = q.slot();
        q.time(c.fell);
        let mut f = Fragments {
            q: &mut q,
            lines,
            t: &timing,
            c,
        };
        f.sda(true).hold(timing.su_dat);
        f.q.wait(c.fell, timing.low);
        f.scl_high();
        f.q.sleep(timing.su_sta)
            .level(sda, free)
            .assume(free, Relation::Eq, 1, TIMING);
        f.sda(false).hold(timing.hd_sta).scl_low();
        let start = q.finish()?;

        let mut q = Enqueue::<EDGE_SCRIPT>::new();
        let c = Clocking::new(&mut q);
        let mut f = Fragments {
            q: &mut q,
            lines,
            t: &timing,
            c,
        };
        f.scl_low().sda(false);
        f.q.wait(c.fell, timing.low);
        f.scl_high();
        f.q.sleep(timing.su_sto);
        f.sda(true).hold(timing.buf);
        let stop = q.finish()?;

        engine.open_drain(scl).map_err(Error::Pin)?;
        engine.open_drain(sda).map_err(Error::Pin)?;

        Ok(I2c {
            engine,
            lines,
            timing,
            converter,
            start,
            stop,
        })
    }

    pub fn into_inner(self) -> Engine<C, P> {
        self.engine
    }

    pub fn timing(&self) -> &I2cTiming<Ticks> {
        &self.timing
    }

    /// Keeps the bus idle for at least `duration`.
    pub fn delay(&mut self, duration: Duration) -> BusResult<(), E> {
        let span = self.converter.ceil(duration, "delay")?;
        self.engine.idle(span);
        Ok(())
    }

    fn start(&mut self) -> BusResult<(), E> {
        let mut slots = [0; 8];
        self.engine.run(&self.start, &mut slots)?;
        Ok(())
    }

    fn stop(&mut self) -> BusResult<(), E> {
        let mut slots = [0; 8];
        self.engine.run(&self.stop, &mut slots)?;
        Ok(())
    }

    fn send_byte(&mut self, byte: u8) -> BusResult<(), E> {
        let mut q = Enqueue::<BYTE_SCRIPT>::new();
        let c = Clocking::new(&mut q);
        let ack = q.slot();
        q.time(c.fell);
        let mut f = Fragments {
            q: &mut q,
            lines: self.lines,
            t: &self.timing,
            c,
        };
        // MSB first
        for bit in (0..8).rev() {
            f.send_bit(byte & (1 << bit) != 0);
        }
        f.sda(true).receive_bit(ack);
        q.assume(ack, Relation::Eq, 0, NACK);
        let script = q.finish()?;
        let mut slots = [0; BYTE_SLOTS];
        self.engine.run(&script, &mut slots)?;
        Ok(())
    }

    /// Receives one byte, then acknowledges it if `ack`.
    fn recv_byte(&mut self, ack: bool) -> BusResult<u8, E> {
        let mut q = Enqueue::<BYTE_SCRIPT>::new();
        let c = Clocking::new(&mut q);
        let bits = [(); 8].map(|_| q.slot());
        q.time(c.fell);
        let mut f = Fragments {
            q: &mut q,
            lines: self.lines,
            t: &self.timing,
            c,
        };
        f.sda(true);
        for bit in bits {
            f.receive_bit(bit);
        }
        f.send_bit(!ack);
        let script = q.finish()?;
        let mut slots = [0; BYTE_SLOTS];
        self.engine.run(&script, &mut slots)?;
        Ok(bits
            .iter()
            .fold(0, |byte, bit| (byte << 1) | (slots[bit.index()] != 0) as u8))
    }

    /// Checks a 7-bit address before anything goes out on the bus.
    fn check_address(address: u8) -> BusResult<(), E> {
        if address > 0x7F {
            return Err(ConfigError::OutOfRange("address").into());
        }
        Ok(())
    }

    /// Initiate START (can be repeated START), send bytes, and returns.
    fn write_bytes(&mut self, address: u8, bytes: &[u8]) -> BusResult<(), E> {
        self.start()?;
        self.send_byte(address << 1)?;
        for byte in bytes {
            self.send_byte(*byte)?;
        }
        Ok(())
    }

    /// Initiate START (can be repeated START), receive as many bytes as the buffer can
    /// accommodate. The final byte is not acknowledged.
    fn read_bytes(&mut self, address: u8, buffer: &mut [u8]) -> BusResult<(), E> {
        self.start()?;
        self.send_byte((address << 1) | 1)?;
        if let Some((last, buffer)) = buffer.split_last_mut() {
            for byte in buffer {
                *byte = self.recv_byte(true)?;
            }
            *last = self.recv_byte(false)?;
        }
        Ok(())
    }

    /// Ends `result` with a STOP. A failed transaction keeps its own error.
    fn finish(&mut self, result: BusResult<(), E>) -> BusResult<(), E> {
        let stop = self.stop();
        match result {
            Ok(()) => stop,
            Err(err) => {
                match stop {
                    Ok(()) => {}
                    Err(Error::Timing) => debug!("i2c: bus stuck while recovering"),
                    Err(stop) => debug!("i2c: STOP after a failed transaction: {}", stop),
                }
                Err(err)
            }
        }
    }
}

impl<C, P, E> Write for I2c<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    type Error = Error<E>;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        Self::check_address(address)?;
        let result = self.write_bytes(address, bytes);
        self.finish(result)
    }
}

impl<C, P, E> Read for I2c<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    type Error = Error<E>;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        Self::check_address(address)?;
        let result = self.read_bytes(address, buffer);
        self.finish(result)
    }
}

impl<C, P, E> WriteRead for I2c<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    type Error = Error<E>;

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        Self::check_address(address)?;
        let result = self
            .write_bytes(address, bytes)
            .and_then(|()| self.read_bytes(address, buffer));
        self.finish(result)
    }
}
