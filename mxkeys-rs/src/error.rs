/* Error types shared by the transport, protocol, cache and session layers. */

use std::io;
use std::time::Duration;

use thiserror::Error;

/* Failures of a HID++ exchange or of the backlight session built on top of it. */
#[derive(Debug, Error)]
pub enum Error {
    /* The platform device manager could not be queried at all. */
    #[error("HID transport initialisation failed: {0}")]
    TransportInit(#[source] io::Error),

    /* No enumerated path exposes BACKLIGHT2 on any device slot. */
    #[error("could not open receiver {vendor_id:04x}:{product_id:04x} or find BACKLIGHT2")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /* The cached target no longer answers. Recovered internally by rediscovery. */
    #[error("cached target is stale")]
    CacheInvalid,

    /* Rediscovery after a stale cache or a failed command found nothing. */
    #[error("device cache invalid and re-discovery failed")]
    RediscoveryFailed,

    #[error("write failed on {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },

    /* The device answered with a HID++ 2.0 error reply. */
    #[error("device returned HID++ error 0x{code:02X}")]
    Protocol { code: u8 },

    #[error("no matching reply within {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("reply too short: expected {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },

    /* The write was accepted but the read-back shows a different state. */
    #[error("command did not take effect")]
    VerificationFailed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/* Why a cache record could not be used. Both variants count as a miss. */
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cache record")]
    Missing,

    #[error("corrupt cache record: {0}")]
    Corrupt(String),

    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
}
