use embedded_hal::digital::v2::{InputPin, OutputPin};

use crate::error::ConfigError;

/// Index of one line of a [`PinLine`]. Its level is bit `1 << n` of a levels word.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pin(u8);

impl Pin {
    pub const fn new(n: u8) -> Result<Pin, ConfigError> {
        if n < 32 {
            Ok(Pin(n))
        } else {
            Err(ConfigError::Pin(n))
        }
    }

    pub const fn index(&self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn mask(&self) -> u32 {
        1 << self.0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    In,
    Out,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
    Both,
}

/// A set of general purpose I/O lines, addressed by [`Pin`].
///
/// Drivers own their pin line exclusively for the duration of a transaction.
pub trait PinLine {
    type Error;

    fn set_mode(&mut self, pin: Pin, mode: Mode) -> Result<(), Self::Error>;

    /// Sets the output latch high. Only visible on the line in [`Mode::Out`].
    fn drive_high(&mut self, pin: Pin) -> Result<(), Self::Error>;

    /// Sets the output latch low. Only visible on the line in [`Mode::Out`].
    fn drive_low(&mut self, pin: Pin) -> Result<(), Self::Error>;

    /// Samples all lines at once, one bit per [`Pin`].
    fn sample_levels(&mut self) -> Result<u32, Self::Error>;

    /// Arms (or with `None`, disarms) the edge latch of `pin`.
    fn arm_edge(&mut self, pin: Pin, edge: Option<Edge>) -> Result<(), Self::Error>;

    /// Returns the latched edges in `mask` and clears them.
    fn read_and_clear_edges(&mut self, mask: u32) -> Result<u32, Self::Error>;

    /// Whether `pin` exists on this line. Checked once when a driver is built.
    fn contains(&self, _pin: Pin) -> bool {
        true
    }
}

/// [`PinLine`] over `N` open-drain `embedded-hal` pins; pin `n` is `pins[n]`.
///
/// [`Mode::In`] releases the pin (`set_high`), [`Mode::Out`] drives the latched level. Edge
/// latches are emulated from consecutive samples, so an edge is only seen if both levels were
/// sampled.
pub struct HalLine<T, const N: usize> {
    pins: [T; N],
    outputs: u32,
    latches: u32,
    rising: u32,
    falling: u32,
    last: u32,
    events: u32,
}

impl<T, E, const N: usize> HalLine<T, N>
where
    T: InputPin<Error = E>,
    T: OutputPin<Error = E>,
{
    /// Fails for more than 32 pins, which don't fit a levels word.
    pub fn new(pins: [T; N]) -> Result<HalLine<T, N>, ConfigError> {
        if N > 32 {
            return Err(ConfigError::OutOfRange("pins"));
        }
        Ok(HalLine {
            pins,
            outputs: 0,
            latches: 0,
            rising: 0,
            falling: 0,
            last: 0,
            events: 0,
        })
    }

    pub fn into_inner(self) -> [T; N] {
        self.pins
    }

    fn apply(&mut self, pin: Pin) -> Result<(), E> {
        let mask = pin.mask();
        let Some(io) = self.pins.get_mut(pin.index() as usize) else {
            return Ok(());
        };
        if self.outputs & mask != 0 && self.latches & mask == 0 {
            io.set_low()
        } else {
            io.set_high()
        }
    }
}

impl<T, E, const N: usize> PinLine for HalLine<T, N>
where
    T: InputPin<Error = E>,
    T: OutputPin<Error = E>,
{
    type Error = E;

    fn set_mode(&mut self, pin: Pin, mode: Mode) -> Result<(), E> {
        match mode {
            Mode::In => self.outputs &= !pin.mask(),
            Mode::Out => self.outputs |= pin.mask(),
        }
        self.apply(pin)
    }

    fn drive_high(&mut self, pin: Pin) -> Result<(), E> {
        self.latches |= pin.mask();
        self.apply(pin)
    }

    fn drive_low(&mut self, pin: Pin) -> Result<(), E> {
        self.latches &= !pin.mask();
        self.apply(pin)
    }

    fn sample_levels(&mut self) -> Result<u32, E> {
        let mut levels = 0;
        for (n, io) in self.pins.iter().enumerate() {
            if io.is_high()? {
                levels |= 1 << n;
            }
        }
        let rose = levels & !self.last;
        let fell = !levels & self.last;
        self.events |= (rose & self.rising) | (fell & self.falling);
        self.last = levels;
        Ok(levels)
    }

    fn arm_edge(&mut self, pin: Pin, edge: Option<Edge>) -> Result<(), E> {
        let mask = pin.mask();
        self.rising &= !mask;
        self.falling &= !mask;
        match edge {
            Some(Edge::Rising) => self.rising |= mask,
            Some(Edge::Falling) => self.falling |= mask,
            Some(Edge::Both) => {
                self.rising |= mask;
                self.falling |= mask;
            }
            None => {}
        }
        // baseline, so that the current level doesn't count as an edge
        self.sample_levels()?;
        self.events &= !mask;
        Ok(())
    }

    fn read_and_clear_edges(&mut self, mask: u32) -> Result<u32, E> {
        self.sample_levels()?;
        let events = self.events & mask;
        self.events &= !mask;
        Ok(events)
    }

    fn contains(&self, pin: Pin) -> bool {
        (pin.index() as usize) < N
    }
}
