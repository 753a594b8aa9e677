/* One command from start to finish: cache fast path, discovery fallback, */
/* the backlight action, and a single rediscover-and-retry on failure. */
/*  */
/* The session owns at most one device handle at a time. Handles are */
/* dropped (and so closed) before any rediscovery and on every return. */

use std::io::Write;

use tracing::{debug, info, warn};

use crate::backlight::Backlight2;
use crate::cache::TargetCache;
use crate::config::Config;
use crate::device::{Action, TargetDescriptor};
use crate::discovery::{self, OpenTarget};
use crate::driver::HidBackend;
use crate::driver::hidpp::PAGE_BACKLIGHT2;
use crate::driver::hidpp20::Hidpp20Driver;
use crate::error::{CacheError, Error, Result};

pub struct Session<'a> {
    backend: &'a dyn HidBackend,
    cache: TargetCache,
    vendor_id: u16,
    product_id: u16,
}

impl<'a> Session<'a> {
    pub fn new(backend: &'a dyn HidBackend, config: &Config) -> Self {
        Self {
            backend,
            cache: TargetCache::new(&config.state_dir),
            vendor_id: config.vendor_id,
            product_id: config.product_id,
        }
    }

    /* Reopen the cached target and re-resolve BACKLIGHT2 at its slot. */
    /*  */
    /* Any miss returns `CacheInvalid`. Records that can no longer be used */
    /* are removed; a shifted feature index is written back at once. */
    async fn from_cache(&self) -> Result<OpenTarget> {
        let mut target = match self.cache.load() {
            Ok(target) => target,
            Err(CacheError::Missing) => {
                debug!("No cached target");
                return Err(Error::CacheInvalid);
            }
            Err(CacheError::Corrupt(reason)) => {
                info!("Discarding cache {}: {reason}", self.cache.path().display());
                self.cache.clear();
                return Err(Error::CacheInvalid);
            }
            Err(e) => {
                info!("Ignoring cache {}: {e}", self.cache.path().display());
                return Err(Error::CacheInvalid);
            }
        };

        let mut io = match self.backend.open(&target.hid_path).await {
            Ok(io) => io,
            Err(e) => {
                debug!("Cached path {} unavailable: {e}", target.hid_path);
                self.cache.clear();
                return Err(Error::CacheInvalid);
            }
        };

        let Some(feature_index) = Hidpp20Driver::new(target.device_index)
            .get_feature_index(io.as_mut(), PAGE_BACKLIGHT2)
            .await
        else {
            debug!("Cached {target} no longer exposes BACKLIGHT2");
            self.cache.clear();
            return Err(Error::CacheInvalid);
        };

        if feature_index != target.feature_index {
            info!(
                "BACKLIGHT2 moved from index 0x{:02X} to 0x{feature_index:02X}",
                target.feature_index
            );
            target.feature_index = feature_index;
            self.cache.store(&target);
        }

        debug!("Using cached {target}");
        Ok(OpenTarget { io, target })
    }

    async fn discover(&self) -> Result<OpenTarget> {
        discovery::discover(self.backend, self.vendor_id, self.product_id).await
    }

    /* Discovery after a cached or resolved target went bad. */
    async fn rediscover(&self) -> Result<OpenTarget> {
        self.discover().await.map_err(|e| match e {
            Error::DeviceNotFound { .. } => Error::RediscoveryFailed,
            other => other,
        })
    }

    /* A usable handle plus whether it came from a fresh discovery. */
    async fn acquire(&self) -> Result<(OpenTarget, bool)> {
        let Ok(mut open) = self.from_cache().await else {
            return Ok((self.discover().await?, true));
        };

        let probe = Backlight2::new(open.target.device_index, open.target.feature_index);
        match probe.read_state(open.io.as_mut()).await {
            Ok(_) => Ok((open, false)),
            Err(e) => {
                info!("Cached {} does not answer: {e}", open.target);
                self.cache.clear();
                drop(open);
                Ok((self.rediscover().await?, true))
            }
        }
    }

    /* Run `action`, retrying once against a freshly discovered target. */
    pub async fn run(&self, action: Action) -> Result<TargetDescriptor> {
        let (mut open, fresh) = self.acquire().await?;

        let first = Backlight2::new(open.target.device_index, open.target.feature_index)
            .apply(open.io.as_mut(), action)
            .await;
        match first {
            Ok(()) => {
                if fresh {
                    self.cache.store(&open.target);
                }
                return Ok(open.target);
            }
            Err(e) => info!("{action:?} failed on {}: {e}, retrying", open.target),
        }

        self.cache.clear();
        drop(open);
        let mut open = self.rediscover().await?;

        let mut backlight = Backlight2::new(open.target.device_index, open.target.feature_index);
        match backlight.apply(open.io.as_mut(), action).await {
            Ok(()) => {
                self.cache.store(&open.target);
                Ok(open.target)
            }
            Err(e) => {
                debug!("{action:?} failed again on {}: {e}", open.target);
                Err(Error::VerificationFailed)
            }
        }
    }
}

/* Run one command and report it the way the CLI does: the success line on */
/* `out`, or a single `Error: ...` line on `err`. Returns the exit status. */
pub async fn execute(
    backend: &dyn HidBackend,
    config: &Config,
    action: Action,
    out: &mut impl Write,
    err: &mut impl Write,
) -> u8 {
    match Session::new(backend, config).run(action).await {
        Ok(target) => {
            info!("{action:?} applied to {target}");
            match writeln!(out, "{}", action.success_message()) {
                Ok(()) => 0,
                Err(io_err) => {
                    if let Err(e) = writeln!(err, "Error: could not write to stdout: {io_err}.") {
                        warn!("Failed to write to stderr: {e}");
                    }
                    1
                }
            }
        }
        Err(e) => {
            if let Err(io_err) = writeln!(err, "Error: {e}.") {
                warn!("Failed to write to stderr: {io_err}");
            }
            1
        }
    }
}
