use core::time::Duration;

use crate::address::Address;
use crate::commands;
use crate::crc::check_crc8;
use crate::error::{BusResult, Error};

/// Bit-level access to a 1-Wire bus. Everything above the time slots is composed from these
/// primitives, least significant bit first.
pub trait BitBus {
    type PinError;

    /// Sends a reset pulse, then returns true if a device is present
    fn reset(&mut self) -> BusResult<bool, Self::PinError>;

    fn read_bit(&mut self) -> BusResult<bool, Self::PinError>;

    fn write_bit(&mut self, bit: bool) -> BusResult<(), Self::PinError>;

    /// Keeps the bus idle for at least `duration`.
    fn delay(&mut self, duration: Duration) -> BusResult<(), Self::PinError>;

    fn read_byte(&mut self) -> BusResult<u8, Self::PinError> {
        let mut output: u8 = 0;
        for _ in 0..8 {
            output >>= 1;
            if self.read_bit()? {
                output |= 0x80;
            }
        }
        Ok(output)
    }

    fn read_bytes(&mut self, output: &mut [u8]) -> BusResult<(), Self::PinError> {
        for byte in output.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }

    fn write_byte(&mut self, mut value: u8) -> BusResult<(), Self::PinError> {
        for _ in 0..8 {
            self.write_bit(value & 0x01 == 0x01)?;
            value >>= 1;
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> BusResult<(), Self::PinError> {
        for byte in bytes {
            self.write_byte(*byte)?;
        }
        Ok(())
    }

    /// Resets the bus, failing with [`Error::NotPresent`] if nobody answers.
    fn reset_present(&mut self) -> BusResult<(), Self::PinError> {
        if self.reset()? {
            Ok(())
        } else {
            Err(Error::NotPresent)
        }
    }

    /// Address a specific device. All others will wait for a reset pulse.
    /// This should only be called after a reset, and should be immediately followed by another command
    fn match_address(&mut self, address: &Address) -> BusResult<(), Self::PinError> {
        self.write_byte(commands::MATCH_ROM)?;
        self.write_bytes(&address.0.to_le_bytes())?;
        Ok(())
    }

    /// Address all devices on the bus simultaneously.
    /// This should only be called after a reset, and should be immediately followed by another command
    fn skip_address(&mut self) -> BusResult<(), Self::PinError> {
        self.write_byte(commands::SKIP_ROM)
    }

    /// Sends a reset, followed with either a SKIP_ROM or MATCH_ROM (with an address), and then the supplied command
    /// This should be followed by any reading/writing, if needed by the command used
    fn send_command(
        &mut self,
        command: u8,
        address: Option<&Address>,
    ) -> BusResult<(), Self::PinError> {
        self.reset_present()?;
        if let Some(address) = address {
            self.match_address(address)?;
        } else {
            self.skip_address()?;
        }
        self.write_byte(command)?;
        Ok(())
    }

    /// Reads the address of the only device on the bus. With several devices the answers collide
    /// and the crc check fails.
    fn read_address(&mut self) -> BusResult<Address, Self::PinError> {
        self.reset_present()?;
        self.write_byte(commands::READ_ROM)?;
        let mut rom = [0; 8];
        self.read_bytes(&mut rom)?;
        check_crc8::<Self::PinError>(&rom)?;
        Ok(Address(u64::from_le_bytes(rom)))
    }
}

impl<B: BitBus + ?Sized> BitBus for &mut B {
    type PinError = B::PinError;

    fn reset(&mut self) -> BusResult<bool, B::PinError> {
        (**self).reset()
    }

    fn read_bit(&mut self) -> BusResult<bool, B::PinError> {
        (**self).read_bit()
    }

    fn write_bit(&mut self, bit: bool) -> BusResult<(), B::PinError> {
        (**self).write_bit(bit)
    }

    fn delay(&mut self, duration: Duration) -> BusResult<(), B::PinError> {
        (**self).delay(duration)
    }

    fn read_byte(&mut self) -> BusResult<u8, B::PinError> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, value: u8) -> BusResult<(), B::PinError> {
        (**self).write_byte(value)
    }

    fn read_bytes(&mut self, output: &mut [u8]) -> BusResult<(), B::PinError> {
        (**self).read_bytes(output)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> BusResult<(), B::PinError> {
        (**self).write_bytes(bytes)
    }
}
