use core::fmt::Debug;
use core::num::NonZeroU8;

use log::debug;

use crate::engine::Fault;

pub type BusResult<T, E> = Result<T, Error<E>>;

/// Abort code for an `assume` that failed because the host was too slow.
pub const RETRY: NonZeroU8 = match NonZeroU8::new(1) {
    Some(code) => code,
    None => unreachable!(),
};

/// Abort code for an `assume` that failed because the device broke its timing.
pub const TIMING: NonZeroU8 = match NonZeroU8::new(2) {
    Some(code) => code,
    None => unreachable!(),
};

/// Abort code for a missing I2C acknowledge.
pub const NACK: NonZeroU8 = match NonZeroU8::new(3) {
    Some(code) => code,
    None => unreachable!(),
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    /// No device answered a bus reset with a presence pulse.
    #[error("no device present on the bus")]
    NotPresent,

    /// The host was preempted inside a timing-critical window, so the bus dialogue can't be
    /// trusted. Restart the whole transaction.
    #[error("host timing was disturbed, retry the transaction")]
    Retry,

    /// The remote device answered outside of its datasheet timing. Most likely a wiring or
    /// device fault.
    #[error("device violated the bus timing")]
    Timing,

    /// A device stopped answering in the middle of a search. This generally happens when a sensor
    /// is added or removed from the bus during a device search.
    #[error("device vanished during the search")]
    Vanished,

    #[error("crc mismatch")]
    CrcMismatch,

    #[error("family code mismatch")]
    FamilyCodeMismatch,

    /// Data passed its crc check but holds a value the device can't produce.
    #[error("device returned invalid data")]
    InvalidData,

    /// The device never signalled completion.
    #[error("timed out waiting for the device")]
    Timeout,

    /// An address or data byte was not acknowledged.
    #[error("device did not acknowledge")]
    Nack,

    /// A script `assume` fired with a code no protocol layer claims.
    #[error("script aborted with code {0}")]
    Aborted(NonZeroU8),

    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("pin error")]
    Pin(E),
}

/// Raised while building timing tables or scripts, never during a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick frequency must not be zero")]
    ZeroFrequency,

    #[error("timing window `{0}` has min > max in ticks")]
    Inverted(&'static str),

    #[error("timing field `{0}` exceeds half the tick counter range")]
    OutOfRange(&'static str),

    #[error("script capacity exceeded")]
    ScriptFull,

    #[error("script needs {needed} slots but only {given} were given")]
    Slots { needed: usize, given: usize },

    #[error("pin {0} is not handled by the pin line")]
    Pin(u8),
}

impl<E> From<Fault<E>> for Error<E> {
    fn from(fault: Fault<E>) -> Self {
        match fault {
            Fault::Abort(code) if code == RETRY => Error::Retry,
            Fault::Abort(code) if code == TIMING => Error::Timing,
            Fault::Abort(code) if code == NACK => Error::Nack,
            Fault::Abort(code) => Error::Aborted(code),
            Fault::Slots { needed, given } => Error::Config(ConfigError::Slots { needed, given }),
            Fault::Pin(err) => Error::Pin(err),
        }
    }
}

/// Runs `op` up to `attempts` times for as long as it fails with [`Error::Retry`].
///
/// `op` must be a whole transaction, starting from its defined initial state (a bus reset for
/// 1-Wire), since a retry says nothing about how far the previous attempt got.
pub fn retry<T, E: Debug>(
    attempts: usize,
    mut op: impl FnMut() -> BusResult<T, E>,
) -> BusResult<T, E> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(Error::Retry) if attempt < attempts => {
                debug!("transaction disturbed, attempt {} of {}", attempt, attempts);
                attempt += 1;
            }
            result => return result,
        }
    }
}
