//! ROM search: enumerating the addresses of every device on a bus.
//!
//! Each search pass walks the 64 address bits from the least significant one. At every bit the
//! master reads the AND of all participating devices' bits, then the AND of their complements,
//! and writes the direction it takes; devices that disagree drop out until the next reset. On a
//! conflict the 0 branch is taken first, so addresses come out in ascending order of their
//! bit-reversed value.

use log::{debug, trace};

use crate::address::Address;
use crate::bus::BitBus;
use crate::commands;
use crate::crc::check_crc8;
use crate::error::{BusResult, Error};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SearchKind {
    /// Every device takes part.
    Normal,
    /// Only devices with an alarm condition take part.
    Alarm,
}

impl SearchKind {
    pub fn command(self) -> u8 {
        match self {
            SearchKind::Normal => commands::SEARCH_NORMAL,
            SearchKind::Alarm => commands::SEARCH_ALARM,
        }
    }
}

/// Result of one pass: the address taken, and the last bit where a conflict was resolved to 0.
type Pass = (u64, Option<u8>);

pub struct Discovery<B> {
    bus: B,
    kind: SearchKind,
}

impl<B: BitBus> Discovery<B> {
    pub fn new(bus: B, kind: SearchKind) -> Discovery<B> {
        Discovery { bus, kind }
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Finds the lowest address. `None` if no device answered, or none matched the search kind.
    pub fn first(&mut self) -> BusResult<Option<Address>, B::PinError> {
        Ok(self.first_pass()?.map(|(address, _)| address))
    }

    /// Finds the address following `previous`, which must still be on the bus. `None` once
    /// `previous` was the last one.
    pub fn next(&mut self, previous: &Address) -> BusResult<Option<Address>, B::PinError> {
        // retrace `previous` to learn where its path branched
        let (_, last_zero) = self.pass(previous.0, 64, false)?.ok_or(Error::Vanished)?;
        Ok(self.branch(previous, last_zero)?.map(|(address, _)| address))
    }

    pub fn devices(self) -> Devices<B> {
        Devices {
            discovery: self,
            state: State::Start,
        }
    }

    fn first_pass(&mut self) -> BusResult<Option<(Address, Option<u8>)>, B::PinError> {
        match self.pass(0, 0, true)? {
            Some(pass) => Ok(Some(self.found(pass)?)),
            None => Ok(None),
        }
    }

    /// Takes the 1 branch at `last_zero`, following `previous` below it.
    fn branch(
        &mut self,
        previous: &Address,
        last_zero: Option<u8>,
    ) -> BusResult<Option<(Address, Option<u8>)>, B::PinError> {
        let Some(j) = last_zero else {
            return Ok(None);
        };
        let below = (1u64 << j) - 1;
        let path = (previous.0 & below) | (1 << j);
        let pass = self.pass(path, j + 1, false)?.ok_or(Error::Vanished)?;
        Ok(Some(self.found(pass)?))
    }

    fn found(&self, (address, last_zero): Pass) -> BusResult<(Address, Option<u8>), B::PinError> {
        check_crc8::<B::PinError>(&address.to_le_bytes())?;
        let address = Address(address);
        debug!("found device {}", address);
        Ok((address, last_zero))
    }

    /// One search pass. Bits below `forced` must follow `path`; above it, conflicts go to 0.
    /// Returns `None` only on a first pass that finds nobody.
    fn pass(
        &mut self,
        path: u64,
        forced: u8,
        first: bool,
    ) -> BusResult<Option<Pass>, B::PinError> {
        if !self.bus.reset()? {
            return if first {
                Ok(None)
            } else {
                Err(Error::Vanished)
            };
        }
        self.bus.write_byte(self.kind.command())?;

        let mut address = 0u64;
        let mut last_zero = None;
        for index in 0..64u8 {
            let has0 = !self.bus.read_bit()?;
            let has1 = !self.bus.read_bit()?;
            let follow = index < forced;
            let wanted = path & (1 << index) != 0;
            let bit = match (has0, has1) {
                (false, false) if first && index == 0 => {
                    // presence, but nobody matches the search kind
                    return Ok(None);
                }
                (false, false) => {
                    trace!("no device answered bit {}", index);
                    return Err(Error::Vanished);
                }
                (true, true) => {
                    let bit = follow && wanted;
                    if !bit {
                        last_zero = Some(index);
                    }
                    bit
                }
                (true, false) if follow && wanted => return Err(Error::Vanished),
                (false, true) if follow && !wanted => return Err(Error::Vanished),
                (true, false) => false,
                (false, true) => true,
            };
            self.bus.write_bit(bit)?;
            if bit {
                address |= 1 << index;
            }
        }
        Ok(Some((address, last_zero)))
    }
}

enum State {
    Start,
    After(Address, Option<u8>),
    Done,
}

/// Iterates over a whole search. Stops after the first error.
pub struct Devices<B> {
    discovery: Discovery<B>,
    state: State,
}

impl<B: BitBus> Devices<B> {
    pub fn into_inner(self) -> Discovery<B> {
        self.discovery
    }
}

impl<B: BitBus> Iterator for Devices<B> {
    type Item = BusResult<Address, B::PinError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match self.state {
            State::Start => self.discovery.first_pass(),
            State::After(previous, last_zero) => self.discovery.branch(&previous, last_zero),
            State::Done => return None,
        };
        match result {
            Ok(Some((address, last_zero))) => {
                self.state = State::After(address, last_zero);
                Some(Ok(address))
            }
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(err) => {
                self.state = State::Done;
                Some(Err(err))
            }
        }
    }
}
