//! MAX7219 LED display drivers, daisy chained on push-pull LOAD, CLK and DIN lines.
//!
//! A frame is LOAD low, one 16-bit word per device shifted MSB first, then LOAD high, which
//! latches each device's word. Every constraint of the interface is a minimum, so a frame is run
//! as several scripts, one per device word.

use core::time::Duration;

use crate::engine::Engine;
use crate::error::{BusResult, ConfigError, Error};
use crate::pin::{Mode, Pin, PinLine};
use crate::script::{Enqueue, Script};
use crate::tick::Clock;
use crate::timing::{Converter, Ticks};

const EDGE_SCRIPT: usize = 8;
const WORD_SCRIPT: usize = 160;

/// Longest supported chain.
pub const MAX_DEVICES: usize = 8;

/// Interface timing, all minimums. Names follow the datasheet's `tCH`, `tCL` ...
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Max7219Timing<T> {
    /// CLK high.
    pub ch: T,
    /// CLK low.
    pub cl: T,
    /// DIN setup before the rising CLK edge.
    pub ds: T,
    /// LOAD falling to CLK rising.
    pub css: T,
    /// CLK rising to LOAD rising.
    pub csh: T,
    /// LOAD high between frames.
    pub csw: T,
}

impl Max7219Timing<Duration> {
    pub const DATASHEET: Max7219Timing<Duration> = Max7219Timing {
        ch: Duration::from_nanos(50),
        cl: Duration::from_nanos(50),
        ds: Duration::from_nanos(25),
        css: Duration::from_nanos(25),
        csh: Duration::from_nanos(0),
        csw: Duration::from_nanos(50),
    };

    pub fn to_ticks(&self, frequency: u32) -> Result<Max7219Timing<Ticks>, ConfigError> {
        let c = Converter::new(frequency)?;
        Ok(Max7219Timing {
            ch: c.ceil(self.ch, "ch")?,
            cl: c.ceil(self.cl, "cl")?,
            ds: c.ceil(self.ds, "ds")?,
            css: c.ceil(self.css, "css")?,
            csh: c.ceil(self.csh, "csh")?,
            csw: c.ceil(self.csw, "csw")?,
        })
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    NoOp = 0x0,
    Digit0 = 0x1,
    Digit1 = 0x2,
    Digit2 = 0x3,
    Digit3 = 0x4,
    Digit4 = 0x5,
    Digit5 = 0x6,
    Digit6 = 0x7,
    Digit7 = 0x8,
    DecodeMode = 0x9,
    Intensity = 0xA,
    ScanLimit = 0xB,
    Shutdown = 0xC,
    DisplayTest = 0xF,
}

impl Register {
    pub const DIGITS: [Register; 8] = [
        Register::Digit0,
        Register::Digit1,
        Register::Digit2,
        Register::Digit3,
        Register::Digit4,
        Register::Digit5,
        Register::Digit6,
        Register::Digit7,
    ];

    pub fn word(self, data: u8) -> u16 {
        u16::from_be_bytes([self as u8, data])
    }
}

#[derive(Copy, Clone, Debug)]
struct Lines {
    load: Pin,
    clk: Pin,
    din: Pin,
}

pub struct Max7219<C, P> {
    engine: Engine<C, P>,
    lines: Lines,
    timing: Max7219Timing<Ticks>,
    devices: usize,
    begin: Script<EDGE_SCRIPT>,
    end: Script<EDGE_SCRIPT>,
}

impl<C, P, E> Max7219<C, P>
where
    C: Clock,
    P: PinLine<Error = E>,
{
    pub fn new(
        engine: Engine<C, P>,
        load: Pin,
        clk: Pin,
        din: Pin,
        devices: usize,
        timing: &Max7219Timing<Duration>,
    ) -> BusResult<Max7219<C, P>, E> {
        let ticks = timing.to_ticks(engine.clock().frequency())?;
        Self::with_ticks(engine, load, clk, din, devices, ticks)
    }

    pub fn with_ticks(
        mut engine: Engine<C, P>,
        load: Pin,
        clk: Pin,
        din: Pin,
        devices: usize,
        timing: Max7219Timing<Ticks>,
    ) -> BusResult<Max7219<C, P>, E> {
        if devices == 0 || devices > MAX_DEVICES {
            return Err(ConfigError::OutOfRange("devices").into());
        }
        for pin in [load, clk, din] {
            if !engine.pins().contains(pin) {
                return Err(ConfigError::Pin(pin.index()).into());
            }
        }
        let lines = Lines { load, clk, din };

        let mut q = Enqueue::<EDGE_SCRIPT>::new();
        let mark = q.slot();
        q.reset(load).time(mark).sleep(timing.css);
        let begin = q.finish()?;

        let mut q = Enqueue::<EDGE_SCRIPT>::new();
        let mark = q.slot();
        q.time(mark)
            .sleep(timing.csh)
            .set(load)
            .time(mark)
            .sleep(timing.csw);
        let end = q.finish()?;

        // idle: LOAD high, CLK low
        let pins = engine.pins_mut();
        pins.drive_high(load).map_err(Error::Pin)?;
        pins.drive_low(clk).map_err(Error::Pin)?;
        pins.drive_low(din).map_err(Error::Pin)?;
        for pin in [load, clk, din] {
            pins.set_mode(pin, Mode::Out).map_err(Error::Pin)?;
        }

        Ok(Max7219 {
            engine,
            lines,
            timing,
            devices,
            begin,
            end,
        })
    }

    pub fn into_inner(self) -> Engine<C, P> {
        self.engine
    }

    /// Number of devices in the chain.
    pub fn devices(&self) -> usize {
        self.devices
    }

    fn word_script(&self, word: u16) -> Result<Script<WORD_SCRIPT>, ConfigError> {
        let Lines { clk, din, .. } = self.lines;
        let t = &self.timing;
        let mut q = Enqueue::<WORD_SCRIPT>::new();
        let mark = q.slot();
        for bit in (0..16).rev() {
            q.drive(din, word & (1 << bit) != 0)
                .time(mark)
                .sleep(t.ds)
                .set(clk)
                .time(mark)
                .sleep(t.ch)
                .reset(clk)
                .time(mark)
                .sleep(t.cl);
        }
        q.finish()
    }

    /// Shifts one frame: `words[0]` ends up in the device nearest to DIN. Words beyond the chain
    /// length are pushed out of its far end.
    pub fn write(&mut self, words: &[u16]) -> BusResult<(), E> {
        let mut slots = [0; 1];
        self.engine.run(&self.begin, &mut slots)?;
        for word in words.iter().rev() {
            let script = self.word_script(*word)?;
            self.engine.run(&script, &mut slots)?;
        }
        self.engine.run(&self.end, &mut slots)?;
        Ok(())
    }

    /// Writes `register` of a single device; the others get a no-op.
    pub fn write_register(&mut self, device: usize, register: Register, data: u8) -> BusResult<(), E> {
        if device >= self.devices {
            return Err(ConfigError::OutOfRange("device").into());
        }
        let mut frame = [Register::NoOp.word(0); MAX_DEVICES];
        frame[device] = register.word(data);
        self.write(&frame[..self.devices])
    }

    /// Writes the same register of every device in one frame.
    pub fn broadcast(&mut self, register: Register, data: u8) -> BusResult<(), E> {
        let frame = [register.word(data); MAX_DEVICES];
        self.write(&frame[..self.devices])
    }

    /// Leaves display test, shows all 8 digits without decoding at `intensity`, clears them and
    /// turns the displays on.
    pub fn init(&mut self, intensity: u8) -> BusResult<(), E> {
        self.broadcast(Register::DisplayTest, 0)?;
        self.broadcast(Register::ScanLimit, 7)?;
        self.broadcast(Register::DecodeMode, 0)?;
        self.broadcast(Register::Intensity, intensity & 0x0F)?;
        self.clear()?;
        self.broadcast(Register::Shutdown, 1)
    }

    pub fn clear(&mut self) -> BusResult<(), E> {
        for digit in Register::DIGITS {
            self.broadcast(digit, 0)?;
        }
        Ok(())
    }
}
