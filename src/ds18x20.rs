//! DS18B20, DS1822 and DS18S20 temperature sensors.

use core::time::Duration;

use log::debug;

use crate::address::Address;
use crate::bus::BitBus;
use crate::crc::check_crc8;
use crate::error::{BusResult, Error};

pub mod commands {
    pub const CONVERT_TEMP: u8 = 0x44;
    pub const WRITE_SCRATCHPAD: u8 = 0x4E;
    pub const READ_SCRATCHPAD: u8 = 0xBE;
    pub const COPY_SCRATCHPAD: u8 = 0x48;
    pub const RECALL_EEPROM: u8 = 0xB8;
    pub const READ_POWER_SUPPLY: u8 = 0xB4;
}

/// Read slots polled while waiting for an EEPROM recall, enough for 10ms of 70us slots.
const RECALL_POLLS: u32 = 10_000 / 70 + 1;

/// Time the EEPROM needs after a copy.
const COPY_TIME: Duration = Duration::from_millis(10);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    Ds18s20,
    Ds1822,
    Ds18b20,
}

impl Family {
    pub fn from_code(code: u8) -> Option<Family> {
        match code {
            0x10 => Some(Family::Ds18s20),
            0x22 => Some(Family::Ds1822),
            0x28 => Some(Family::Ds18b20),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Family::Ds18s20 => 0x10,
            Family::Ds1822 => 0x22,
            Family::Ds18b20 => 0x28,
        }
    }

    /// Whether the resolution can be configured. The DS18S20 has no configuration register.
    pub fn configurable(self) -> bool {
        self != Family::Ds18s20
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Bits9 = 0b0001_1111,
    Bits10 = 0b0011_1111,
    Bits11 = 0b0101_1111,
    Bits12 = 0b0111_1111,
}

impl Resolution {
    /// Worst case conversion time from the datasheet.
    pub fn max_measurement_time(&self) -> Duration {
        match self {
            Resolution::Bits9 => Duration::from_micros(93_750),
            Resolution::Bits10 => Duration::from_micros(187_500),
            Resolution::Bits11 => Duration::from_millis(375),
            Resolution::Bits12 => Duration::from_millis(750),
        }
    }

    pub fn from_config_register(config: u8) -> Option<Resolution> {
        match config {
            0b0001_1111 => Some(Resolution::Bits9),
            0b0011_1111 => Some(Resolution::Bits10),
            0b0101_1111 => Some(Resolution::Bits11),
            0b0111_1111 => Some(Resolution::Bits12),
            _ => None,
        }
    }

    pub fn to_config_register(&self) -> u8 {
        *self as u8
    }

    /// Low bits of the temperature register that are undefined at this resolution.
    fn undefined_bits(&self) -> i16 {
        match self {
            Resolution::Bits9 => 0b111,
            Resolution::Bits10 => 0b11,
            Resolution::Bits11 => 0b1,
            Resolution::Bits12 => 0,
        }
    }
}

/// All of the data that can be read from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    /// Temperature in degrees Celsius. Defaults to 85 on startup
    pub temperature: f32,

    /// The current resolution configuration
    pub resolution: Resolution,

    /// If the last recorded temperature is lower than this, the sensor is put in an alarm state
    pub alarm_temp_low: i8,

    /// If the last recorded temperature is higher than this, the sensor is put in an alarm state
    pub alarm_temp_high: i8,

    /// Temperature register as read, in 1/16 degrees (1/2 for a DS18S20)
    pub raw_temp: i16,

    pub scratchpad: [u8; 9],
}

pub struct Ds18x20 {
    address: Address,
    family: Family,
}

impl Ds18x20 {
    /// Checks that the given address belongs to a supported family
    pub fn new<E>(address: Address) -> BusResult<Ds18x20, E> {
        match Family::from_code(address.family_code()) {
            Some(family) => Ok(Ds18x20 { address, family }),
            None => Err(Error::FamilyCodeMismatch),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn family(&self) -> Family {
        self.family
    }

    /// Starts a temperature measurement for just this device
    /// You should wait for the measurement to finish before reading the measurement.
    /// The amount of time you need to wait depends on the current resolution configuration
    pub fn start_temp_measurement<B: BitBus>(&self, bus: &mut B) -> BusResult<(), B::PinError> {
        bus.send_command(commands::CONVERT_TEMP, Some(&self.address))
    }

    pub fn read_scratchpad<B: BitBus>(&self, bus: &mut B) -> BusResult<[u8; 9], B::PinError> {
        read_scratchpad(&self.address, bus)
    }

    pub fn read_data<B: BitBus>(&self, bus: &mut B) -> BusResult<SensorData, B::PinError> {
        let scratchpad = self.read_scratchpad(bus)?;
        let data = decode(self.family, scratchpad)?;
        debug!(
            "{}: {} C at {:?} (raw {:#06X})",
            self.address, data.temperature, data.resolution, data.raw_temp
        );
        Ok(data)
    }

    /// Starts a conversion, waits out the worst case conversion time of the configured
    /// resolution, and reads the result.
    pub fn measure<B: BitBus>(&self, bus: &mut B) -> BusResult<SensorData, B::PinError> {
        let resolution = self.read_data(bus)?.resolution;
        self.start_temp_measurement(bus)?;
        bus.delay(resolution.max_measurement_time())?;
        self.read_data(bus)
    }

    /// Writes the alarm limits and resolution to the scratchpad. A DS18S20 only takes the
    /// alarm limits.
    pub fn set_config<B: BitBus>(
        &self,
        alarm_temp_low: i8,
        alarm_temp_high: i8,
        resolution: Resolution,
        bus: &mut B,
    ) -> BusResult<(), B::PinError> {
        bus.send_command(commands::WRITE_SCRATCHPAD, Some(&self.address))?;
        let config = [
            alarm_temp_high.to_le_bytes()[0],
            alarm_temp_low.to_le_bytes()[0],
            resolution.to_config_register(),
        ];
        if self.family.configurable() {
            bus.write_bytes(&config)
        } else {
            bus.write_bytes(&config[..2])
        }
    }

    pub fn save_to_eeprom<B: BitBus>(&self, bus: &mut B) -> BusResult<(), B::PinError> {
        save_to_eeprom(Some(&self.address), bus)
    }

    pub fn recall_from_eeprom<B: BitBus>(&self, bus: &mut B) -> BusResult<(), B::PinError> {
        recall_from_eeprom(Some(&self.address), bus)
    }

    /// Returns true if the device runs from parasite power.
    pub fn is_parasite_powered<B: BitBus>(&self, bus: &mut B) -> BusResult<bool, B::PinError> {
        read_power_supply(Some(&self.address), bus)
    }
}

/// Starts a temperature measurement for all devices on this one-wire bus, simultaneously
pub fn start_simultaneous_temp_measurement<B: BitBus>(
    bus: &mut B,
) -> BusResult<(), B::PinError> {
    bus.send_command(commands::CONVERT_TEMP, None)
}

/// Read the contents of the EEPROM config to the scratchpad for all devices simultaneously.
pub fn simultaneous_recall_from_eeprom<B: BitBus>(bus: &mut B) -> BusResult<(), B::PinError> {
    recall_from_eeprom(None, bus)
}

/// Read the config contents of the scratchpad memory to the EEPROM for all devices simultaneously.
pub fn simultaneous_save_to_eeprom<B: BitBus>(bus: &mut B) -> BusResult<(), B::PinError> {
    save_to_eeprom(None, bus)
}

/// Returns true if any device on the bus runs from parasite power.
pub fn any_parasite_powered<B: BitBus>(bus: &mut B) -> BusResult<bool, B::PinError> {
    read_power_supply(None, bus)
}

pub fn read_scratchpad<B: BitBus>(
    address: &Address,
    bus: &mut B,
) -> BusResult<[u8; 9], B::PinError> {
    bus.send_command(commands::READ_SCRATCHPAD, Some(address))?;
    let mut scratchpad = [0; 9];
    bus.read_bytes(&mut scratchpad)?;
    check_crc8::<B::PinError>(&scratchpad)?;
    Ok(scratchpad)
}

/// Decodes a scratchpad that already passed its crc check.
pub fn decode<E>(family: Family, scratchpad: [u8; 9]) -> BusResult<SensorData, E> {
    let raw_temp = i16::from_le_bytes([scratchpad[0], scratchpad[1]]);
    let (resolution, temperature) = match family {
        Family::Ds18s20 => {
            // extended resolution from the counter registers
            let count_per_c = scratchpad[7];
            if count_per_c == 0 {
                return Err(Error::InvalidData);
            }
            let count_remain = scratchpad[6];
            let whole = (raw_temp >> 1) as f32;
            let fraction = (count_per_c as f32 - count_remain as f32) / count_per_c as f32;
            (Resolution::Bits9, whole - 0.25 + fraction)
        }
        Family::Ds1822 | Family::Ds18b20 => {
            let Some(resolution) = Resolution::from_config_register(scratchpad[4]) else {
                return Err(Error::InvalidData);
            };
            let defined = raw_temp & !resolution.undefined_bits();
            (resolution, defined as f32 / 16.0)
        }
    };
    Ok(SensorData {
        temperature,
        resolution,
        alarm_temp_high: i8::from_le_bytes([scratchpad[2]]),
        alarm_temp_low: i8::from_le_bytes([scratchpad[3]]),
        raw_temp,
        scratchpad,
    })
}

fn recall_from_eeprom<B: BitBus>(
    address: Option<&Address>,
    bus: &mut B,
) -> BusResult<(), B::PinError> {
    bus.send_command(commands::RECALL_EEPROM, address)?;

    // wait for the recall to finish (up to 10ms)
    for _ in 0..RECALL_POLLS {
        if bus.read_bit()? {
            return Ok(());
        }
    }
    debug!("eeprom recall did not finish");
    Err(Error::Timeout)
}

fn save_to_eeprom<B: BitBus>(address: Option<&Address>, bus: &mut B) -> BusResult<(), B::PinError> {
    bus.send_command(commands::COPY_SCRATCHPAD, address)?;
    bus.delay(COPY_TIME)
}

fn read_power_supply<B: BitBus>(
    address: Option<&Address>,
    bus: &mut B,
) -> BusResult<bool, B::PinError> {
    bus.send_command(commands::READ_POWER_SUPPLY, address)?;
    // parasite powered devices pull the slot low
    Ok(!bus.read_bit()?)
}
