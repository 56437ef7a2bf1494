use core::fmt::{Display, Error, Formatter};

use crate::crc::crc8;

/// A 64-bit address of a device. These are globally unique, and used to single out a single device on
/// a potentially crowded bus
///
/// On the wire, and in the search, the family code comes first and the crc last (LSB first).
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Address(pub u64);

impl Address {
    /// Builds an address from a family code and 48-bit serial number, with a matching crc.
    pub fn from_parts(family_code: u8, serial: u64) -> Address {
        let value = (family_code as u64) | ((serial & 0xFFFF_FFFF_FFFF) << 8);
        let crc = crc8(&value.to_le_bytes()[..7]);
        Address(value | ((crc as u64) << 56))
    }

    pub fn family_code(&self) -> u8 {
        self.0.to_le_bytes()[0]
    }

    pub fn serial(&self) -> u64 {
        (self.0 >> 8) & 0xFFFF_FFFF_FFFF
    }

    pub fn crc(&self) -> u8 {
        self.0.to_le_bytes()[7]
    }

    /// Bit `index` (0 = first on the wire).
    #[inline]
    pub fn bit(&self, index: u8) -> bool {
        self.0 & (1_u64 << index) != 0
    }
}

impl core::fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{:016X?}", self.0)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{:016X}", self.0)
    }
}
