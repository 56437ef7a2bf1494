//! Dallas/Maxim CRC-8 (x^8 + x^5 + x^4 + 1, reflected), as used for ROM codes and scratchpads.

use crate::error::{BusResult, Error};

const POLYNOMIAL: u8 = 0x8C;

const TABLE: [u8; 256] = {
    let mut table = [0; 256];
    let mut n = 0;
    while n < 256 {
        let mut crc = n as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLYNOMIAL } else { crc >> 1 };
            bit += 1;
        }
        table[n] = crc;
        n += 1;
    }
    table
};

pub fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, byte| TABLE[(crc ^ byte) as usize])
}

/// Checks data that ends with its own crc byte. Over such data the crc comes out as 0.
pub fn check_crc8<E>(data: &[u8]) -> BusResult<(), E> {
    match crc8(data) {
        0 => Ok(()),
        _ => Err(Error::CrcMismatch),
    }
}
