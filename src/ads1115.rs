//! ADS1115 16-bit ADC over the bit-banged [`I2c`] master.

use core::time::Duration;

use embedded_hal::blocking::i2c::{Write, WriteRead};
use log::debug;

use crate::error::{BusResult, Error};
use crate::i2c::I2c;
use crate::pin::PinLine;
use crate::tick::Clock;

/// Address with ADDR tied to GND.
pub const DEFAULT_ADDRESS: u8 = 0x48;

/// Status polls after the nominal conversion time, before giving up.
const SINGLE_SHOT_POLLS: u32 = 8;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    Conversion = 0,
    Config = 1,
    LoThresh = 2,
    HiThresh = 3,
}

/// Input multiplexer, differential pairs first.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mux {
    Ain0Ain1,
    Ain0Ain3,
    Ain1Ain3,
    Ain2Ain3,
    Ain0,
    Ain1,
    Ain2,
    Ain3,
}

impl Mux {
    const ALL: [Mux; 8] = [
        Mux::Ain0Ain1,
        Mux::Ain0Ain3,
        Mux::Ain1Ain3,
        Mux::Ain2Ain3,
        Mux::Ain0,
        Mux::Ain1,
        Mux::Ain2,
        Mux::Ain3,
    ];
}

/// Programmable gain, named by full scale range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Gain {
    Fsr6_144,
    Fsr4_096,
    Fsr2_048,
    Fsr1_024,
    Fsr0_512,
    Fsr0_256,
}

impl Gain {
    pub fn full_scale_microvolts(self) -> i32 {
        match self {
            Gain::Fsr6_144 => 6_144_000,
            Gain::Fsr4_096 => 4_096_000,
            Gain::Fsr2_048 => 2_048_000,
            Gain::Fsr1_024 => 1_024_000,
            Gain::Fsr0_512 => 512_000,
            Gain::Fsr0_256 => 256_000,
        }
    }

    /// Converts a conversion register value into microvolts.
    pub fn microvolts(self, raw: i16) -> i32 {
        (raw as i64 * self.full_scale_microvolts() as i64 / 32_768) as i32
    }

    fn bits(self) -> u16 {
        self as u16
    }

    fn from_bits(bits: u16) -> Gain {
        match bits {
            0 => Gain::Fsr6_144,
            1 => Gain::Fsr4_096,
            2 => Gain::Fsr2_048,
            3 => Gain::Fsr1_024,
            4 => Gain::Fsr0_512,
            // 5 to 7 all select 0.256V
            _ => Gain::Fsr0_256,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConversionMode {
    Continuous,
    SingleShot,
}

/// Samples per second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataRate {
    Sps8,
    Sps16,
    Sps32,
    Sps64,
    Sps128,
    Sps250,
    Sps475,
    Sps860,
}

impl DataRate {
    const ALL: [DataRate; 8] = [
        DataRate::Sps8,
        DataRate::Sps16,
        DataRate::Sps32,
        DataRate::Sps64,
        DataRate::Sps128,
        DataRate::Sps250,
        DataRate::Sps475,
        DataRate::Sps860,
    ];

    pub fn samples_per_second(self) -> u32 {
        match self {
            DataRate::Sps8 => 8,
            DataRate::Sps16 => 16,
            DataRate::Sps32 => 32,
            DataRate::Sps64 => 64,
            DataRate::Sps128 => 128,
            DataRate::Sps250 => 250,
            DataRate::Sps475 => 475,
            DataRate::Sps860 => 860,
        }
    }

    /// Nominal time of one conversion, rounded up.
    pub fn conversion_time(self) -> Duration {
        let sps = self.samples_per_second() as u64;
        Duration::from_micros((1_000_000 + sps - 1) / sps)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComparatorQueue {
    One,
    Two,
    Four,
    Disabled,
}

/// The config register. `start` is the OS bit: writing it begins a single conversion, reading
/// it back as set means no conversion is in progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub start: bool,
    pub mux: Mux,
    pub gain: Gain,
    pub mode: ConversionMode,
    pub rate: DataRate,
    /// Window comparator instead of the traditional one.
    pub window: bool,
    pub active_high: bool,
    pub latching: bool,
    pub queue: ComparatorQueue,
}

impl Default for Config {
    /// Power on reset value, 0x8583.
    fn default() -> Config {
        Config {
            start: true,
            mux: Mux::Ain0Ain1,
            gain: Gain::Fsr2_048,
            mode: ConversionMode::SingleShot,
            rate: DataRate::Sps128,
            window: false,
            active_high: false,
            latching: false,
            queue: ComparatorQueue::Disabled,
        }
    }
}

impl Config {
    pub fn to_bits(&self) -> u16 {
        (self.start as u16) << 15
            | (self.mux as u16) << 12
            | self.gain.bits() << 9
            | ((self.mode == ConversionMode::SingleShot) as u16) << 8
            | (self.rate as u16) << 5
            | (self.window as u16) << 4
            | (self.active_high as u16) << 3
            | (self.latching as u16) << 2
            | self.queue as u16
    }

    pub fn from_bits(bits: u16) -> Config {
        let field = |shift: u16, mask: u16| ((bits >> shift) & mask) as usize;
        Config {
            start: bits & 0x8000 != 0,
            mux: Mux::ALL[field(12, 0b111)],
            gain: Gain::from_bits((bits >> 9) & 0b111),
            mode: if bits & 0x0100 != 0 {
                ConversionMode::SingleShot
            } else {
                ConversionMode::Continuous
            },
            rate: DataRate::ALL[field(5, 0b111)],
            window: bits & 0x0010 != 0,
            active_high: bits & 0x0008 != 0,
            latching: bits & 0x0004 != 0,
            queue: match bits & 0b11 {
                0 => ComparatorQueue::One,
                1 => ComparatorQueue::Two,
                2 => ComparatorQueue::Four,
                _ => ComparatorQueue::Disabled,
            },
        }
    }
}

pub struct Ads1115 {
    address: u8,
    config: Config,
}

impl Ads1115 {
    /// Assumes the device is at its power on configuration.
    pub fn new(address: u8) -> Ads1115 {
        Ads1115 {
            address,
            config: Config::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// The configuration last written.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn write_register<C, P, E>(
        &self,
        i2c: &mut I2c<C, P>,
        register: Register,
        value: u16,
    ) -> BusResult<(), E>
    where
        C: Clock,
        P: PinLine<Error = E>,
    {
        let [high, low] = value.to_be_bytes();
        i2c.write(self.address, &[register as u8, high, low])
    }

    pub fn read_register<C, P, E>(
        &self,
        i2c: &mut I2c<C, P>,
        register: Register,
    ) -> BusResult<u16, E>
    where
        C: Clock,
        P: PinLine<Error = E>,
    {
        let mut value = [0; 2];
        i2c.write_read(self.address, &[register as u8], &mut value)?;
        Ok(u16::from_be_bytes(value))
    }

    /// Writes `config`. The OS bit is only written as given, so this starts a conversion only if
    /// `config.start` is set.
    pub fn configure<C, P, E>(&mut self, i2c: &mut I2c<C, P>, config: Config) -> BusResult<(), E>
    where
        C: Clock,
        P: PinLine<Error = E>,
    {
        self.write_register(i2c, Register::Config, config.to_bits())?;
        self.config = Config {
            start: false,
            ..config
        };
        Ok(())
    }

    pub fn read_conversion<C, P, E>(&self, i2c: &mut I2c<C, P>) -> BusResult<i16, E>
    where
        C: Clock,
        P: PinLine<Error = E>,
    {
        let raw = self.read_register(i2c, Register::Conversion)?;
        Ok(raw as i16)
    }

    /// Runs one conversion on `mux` with the configured gain and rate.
    pub fn single_shot<C, P, E>(&mut self, i2c: &mut I2c<C, P>, mux: Mux) -> BusResult<i16, E>
    where
        C: Clock,
        P: PinLine<Error = E>,
    {
        let config = Config {
            start: true,
            mux,
            mode: ConversionMode::SingleShot,
            ..self.config
        };
        self.configure(i2c, config)?;
        let period = config.rate.conversion_time();
        i2c.delay(period)?;
        for _ in 0..SINGLE_SHOT_POLLS {
            let status = self.read_register(i2c, Register::Config)?;
            if status & 0x8000 != 0 {
                return self.read_conversion(i2c);
            }
            i2c.delay(period / SINGLE_SHOT_POLLS)?;
        }
        debug!("ads1115 at {:#04X}: conversion did not complete", self.address);
        Err(Error::Timeout)
    }
}
