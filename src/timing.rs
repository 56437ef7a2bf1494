//! Datasheet timing constraints, and their conversion into counter ticks.
//!
//! Every table is generic over its unit: `Duration` for the seconds form a datasheet gives, and
//! [`Ticks`] for the form a script uses at a particular counter frequency. Conversion never widens
//! a legal interval: minimums round up, maximums round down.

use core::time::Duration;

use crate::error::ConfigError;

pub type Ticks = u32;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A `(min, max)` pair of a timing table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window<T> {
    pub min: T,
    pub max: T,
}

impl<T> Window<T> {
    pub const fn new(min: T, max: T) -> Window<T> {
        Window { min, max }
    }
}

impl Window<Ticks> {
    pub fn check(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.min <= self.max {
            Ok(())
        } else {
            Err(ConfigError::Inverted(field))
        }
    }
}

/// Converts durations into ticks of a counter running at `frequency` Hz.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Converter {
    frequency: u32,
}

impl Converter {
    pub fn new(frequency: u32) -> Result<Converter, ConfigError> {
        if frequency == 0 {
            return Err(ConfigError::ZeroFrequency);
        }
        Ok(Converter { frequency })
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    fn scaled(&self, duration: Duration) -> u128 {
        duration.as_nanos() * self.frequency as u128
    }

    // elapsed() is only meaningful below half the counter range
    fn fit(ticks: u128, field: &'static str) -> Result<Ticks, ConfigError> {
        if ticks > i32::MAX as u128 {
            Err(ConfigError::OutOfRange(field))
        } else {
            Ok(ticks as Ticks)
        }
    }

    /// For minimums.
    pub fn ceil(&self, duration: Duration, field: &'static str) -> Result<Ticks, ConfigError> {
        Self::fit(
            (self.scaled(duration) + NANOS_PER_SEC - 1) / NANOS_PER_SEC,
            field,
        )
    }

    /// For maximums.
    pub fn floor(&self, duration: Duration, field: &'static str) -> Result<Ticks, ConfigError> {
        Self::fit(self.scaled(duration) / NANOS_PER_SEC, field)
    }

    /// For nominal values that are neither a lower nor an upper bound.
    pub fn round(&self, duration: Duration, field: &'static str) -> Result<Ticks, ConfigError> {
        Self::fit(
            (self.scaled(duration) + NANOS_PER_SEC / 2) / NANOS_PER_SEC,
            field,
        )
    }

    pub fn window(
        &self,
        window: Window<Duration>,
        field: &'static str,
    ) -> Result<Window<Ticks>, ConfigError> {
        let ticks = Window {
            min: self.ceil(window.min, field)?,
            max: self.floor(window.max, field)?,
        };
        ticks.check(field)?;
        Ok(ticks)
    }
}

/// 1-Wire master timing. Field names follow the Maxim datasheets (`tRSTL`, `tPDHIGH`, ...).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OneWireTiming<T> {
    /// Reset pulse, low.
    pub rstl: T,
    /// Reset recovery, measured from the release of the reset pulse.
    pub rsth: T,
    /// Release to the start of the presence pulse.
    pub pdhigh: Window<T>,
    /// Length of the presence pulse.
    pub pdlow: Window<T>,
    pub slot: Window<T>,
    /// Recovery between slots.
    pub rec: T,
    pub low0: Window<T>,
    pub low1: Window<T>,
    /// Low pulse that starts a read slot.
    pub rinit: T,
    /// Pull-up recovery before the first read sample.
    pub rrc: T,
    /// Deadline for sampling a read slot, from its falling edge.
    pub rdv: T,
    /// Largest gap tolerated between two counter reads that bracket a bus event. Anything longer
    /// means the host was preempted.
    pub latency: T,
}

impl OneWireTiming<Duration> {
    pub const DS18B20: OneWireTiming<Duration> = OneWireTiming {
        rstl: Duration::from_micros(480),
        rsth: Duration::from_micros(480),
        pdhigh: Window::new(Duration::from_micros(15), Duration::from_micros(60)),
        pdlow: Window::new(Duration::from_micros(60), Duration::from_micros(240)),
        slot: Window::new(Duration::from_micros(60), Duration::from_micros(120)),
        rec: Duration::from_micros(1),
        low0: Window::new(Duration::from_micros(60), Duration::from_micros(120)),
        low1: Window::new(Duration::from_micros(1), Duration::from_micros(15)),
        rinit: Duration::from_micros(1),
        rrc: Duration::from_micros(1),
        rdv: Duration::from_micros(15),
        latency: Duration::from_micros(2),
    };

    pub fn to_ticks(&self, frequency: u32) -> Result<OneWireTiming<Ticks>, ConfigError> {
        let c = Converter::new(frequency)?;
        Ok(OneWireTiming {
            rstl: c.ceil(self.rstl, "rstl")?,
            rsth: c.ceil(self.rsth, "rsth")?,
            pdhigh: c.window(self.pdhigh, "pdhigh")?,
            pdlow: c.window(self.pdlow, "pdlow")?,
            slot: c.window(self.slot, "slot")?,
            rec: c.ceil(self.rec, "rec")?,
            low0: c.window(self.low0, "low0")?,
            low1: c.window(self.low1, "low1")?,
            rinit: c.ceil(self.rinit, "rinit")?,
            rrc: c.ceil(self.rrc, "rrc")?,
            rdv: c.floor(self.rdv, "rdv")?,
            latency: c.floor(self.latency, "latency")?,
        })
    }
}

impl OneWireTiming<Ticks> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pdhigh.check("pdhigh")?;
        self.pdlow.check("pdlow")?;
        self.slot.check("slot")?;
        self.low0.check("low0")?;
        self.low1.check("low1")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn datasheet_at_one_megahertz() {
        let t = OneWireTiming::DS18B20.to_ticks(1_000_000).unwrap();
        assert_eq!(t.rstl, 480);
        assert_eq!(t.pdhigh, Window::new(15, 60));
        assert_eq!(t.low1, Window::new(1, 15));
        assert_eq!(t.rdv, 15);
    }

    #[test]
    fn rounding_direction() {
        let c = Converter::new(1_000_000).unwrap();
        let d = Duration::from_nanos(1_500);
        assert_eq!(c.ceil(d, "x"), Ok(2));
        assert_eq!(c.floor(d, "x"), Ok(1));
        assert_eq!(c.round(d, "x"), Ok(2));
        assert_eq!(c.round(Duration::from_nanos(1_499), "x"), Ok(1));
    }

    #[test]
    fn window_collapsing_below_one_tick_is_rejected() {
        let c = Converter::new(1_000_000).unwrap();
        let narrow = Window::new(Duration::from_nanos(1_200), Duration::from_nanos(1_800));
        assert_eq!(c.window(narrow, "narrow"), Err(ConfigError::Inverted("narrow")));

        // the same window is representable with a finer counter
        let fine = Converter::new(10_000_000).unwrap();
        assert_eq!(fine.window(narrow, "narrow"), Ok(Window::new(12, 18)));
    }

    #[test]
    fn zero_frequency() {
        assert_eq!(
            OneWireTiming::DS18B20.to_ticks(0),
            Err(ConfigError::ZeroFrequency)
        );
    }

    #[test]
    fn beyond_half_range() {
        let c = Converter::new(250_000_000).unwrap();
        assert_eq!(
            c.ceil(Duration::from_secs(9), "long"),
            Err(ConfigError::OutOfRange("long"))
        );
        assert!(c.ceil(Duration::from_secs(8), "long").is_ok());
    }

    #[test]
    fn ticks_table_validation() {
        let mut t = OneWireTiming::DS18B20.to_ticks(1_000_000).unwrap();
        assert_eq!(t.validate(), Ok(()));
        t.pdlow = Window::new(241, 240);
        assert_eq!(t.validate(), Err(ConfigError::Inverted("pdlow")));
    }

    proptest! {
        #[test]
        fn conversion_never_inverts(
            min in 0u64..10_000_000,
            extra in 0u64..10_000_000,
            frequency in 1u32..=250_000_000,
        ) {
            let window = Window::new(Duration::from_nanos(min), Duration::from_nanos(min + extra));
            let c = Converter::new(frequency).unwrap();
            match c.window(window, "w") {
                Ok(ticks) => {
                    prop_assert!(ticks.min <= ticks.max);
                    // never tighter than the datasheet on either side
                    let f = frequency as u128;
                    prop_assert!(ticks.min as u128 * NANOS_PER_SEC >= min as u128 * f);
                    prop_assert!(ticks.max as u128 * NANOS_PER_SEC <= (min + extra) as u128 * f);
                }
                Err(err) => prop_assert_eq!(err, ConfigError::Inverted("w")),
            }
        }
    }
}
