/// A reading of the free running hardware counter. Wraps modulo 2^32.
pub type Tick = u32;

/// Ticks from `t0` to `t1`. Correct across a counter wrap, as long as the real distance is below
/// half the counter range.
#[inline(always)]
pub fn elapsed(t0: Tick, t1: Tick) -> Tick {
    t1.wrapping_sub(t0)
}

/// A free running counter, the only time reference a script has.
pub trait Clock {
    /// Reads the counter. Must not block.
    fn now(&self) -> Tick;

    /// Counter increments per second.
    fn frequency(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Tick {
        (**self).now()
    }

    fn frequency(&self) -> u32 {
        (**self).frequency()
    }
}

/// A counter derived from [`std::time::Instant`], for hosts without a mapped hardware timer.
#[cfg(feature = "std")]
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: std::time::Instant,
    frequency: u32,
}

#[cfg(feature = "std")]
impl StdClock {
    pub fn new(frequency: u32) -> Result<StdClock, crate::ConfigError> {
        if frequency == 0 {
            return Err(crate::ConfigError::ZeroFrequency);
        }
        Ok(StdClock {
            origin: std::time::Instant::now(),
            frequency,
        })
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Tick {
        let nanos = self.origin.elapsed().as_nanos();
        // truncation is the wrap
        (nanos * self.frequency as u128 / 1_000_000_000) as Tick
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }
}
