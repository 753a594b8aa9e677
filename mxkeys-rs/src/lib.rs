/* mxkeys: switch a Logitech keyboard backlight through its wireless */
/* receiver with HID++ 2.0 BACKLIGHT2 requests. */

pub mod backlight;
pub mod cache;
pub mod config;
pub mod device;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod session;

#[cfg(any(test, feature = "dev-hooks"))]
pub mod test_device;

pub use config::Config;
pub use device::{Action, TargetDescriptor};
pub use discovery::HidrawBackend;
pub use error::{Error, Result};
pub use session::{Session, execute};
