/* BACKLIGHT2 (0x1982) read-modify-write-verify cycles. */
/*  */
/* Every action reads the current state first so the timing delays and */
/* reserved option bits are written back exactly as the device reported */
/* them. Retry policy belongs to the session, not here: any failed step */
/* ends the action with an error. */

use tracing::debug;

use crate::device::{Action, BACKLIGHT_STATE_LEN, BacklightConfig, BacklightState};
use crate::driver::ReportIo;
use crate::driver::hidpp20::Hidpp20Driver;
use crate::error::{Error, Result};

/* BACKLIGHT2 function IDs */
const FN_GET_BACKLIGHT_CONFIG: u8 = 0x00;
const FN_SET_BACKLIGHT_CONFIG: u8 = 0x01;
const FN_GET_BACKLIGHT_LEVEL_RANGE: u8 = 0x02;

/* Level used when the device cannot report its level range */
pub const FALLBACK_LEVEL: u8 = 0x0F;

/* Progress of one action, for tracing. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Reading,
    Computing,
    Writing,
    Verifying,
    Done,
    Failed,
}

/* The BACKLIGHT2 feature at a known slot and feature index. */
#[derive(Debug, Clone, Copy)]
pub struct Backlight2 {
    driver: Hidpp20Driver,
    feature_index: u8,
    phase: Phase,
}

impl Backlight2 {
    pub fn new(device_index: u8, feature_index: u8) -> Self {
        Self {
            driver: Hidpp20Driver::new(device_index),
            feature_index,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(
            "BACKLIGHT2 slot {}: {:?} -> {:?}",
            self.driver.device_index(),
            self.phase,
            phase
        );
        self.phase = phase;
    }

    /* getBacklightConfig: the 12-byte state block at reply offset 4. */
    pub async fn read_state(&self, io: &mut dyn ReportIo) -> Result<BacklightState> {
        let reply = self
            .driver
            .feature_request(io, self.feature_index, FN_GET_BACKLIGHT_CONFIG, &[])
            .await?;

        let Some(raw) = reply
            .get(4..4 + BACKLIGHT_STATE_LEN)
            .and_then(|s| <&[u8; BACKLIGHT_STATE_LEN]>::try_from(s).ok())
        else {
            return Err(Error::ShortReply {
                expected: 4 + BACKLIGHT_STATE_LEN,
                got: reply.len(),
            });
        };

        let state = BacklightState::from_bytes(raw);
        debug!("BACKLIGHT2 state: {state:?}");
        Ok(state)
    }

    /* setBacklightConfig. The reply content is not inspected. */
    pub async fn write_config(&self, io: &mut dyn ReportIo, config: &BacklightConfig) -> Result<()> {
        debug!("BACKLIGHT2 write: {config:?}");
        self.driver
            .feature_request(
                io,
                self.feature_index,
                FN_SET_BACKLIGHT_CONFIG,
                &config.to_payload(),
            )
            .await
            .map(|_| ())
    }

    /* getBacklightLevelRange: number of levels the device supports. */
    pub async fn level_count(&self, io: &mut dyn ReportIo) -> Result<u8> {
        let reply = self
            .driver
            .feature_request(io, self.feature_index, FN_GET_BACKLIGHT_LEVEL_RANGE, &[])
            .await?;
        reply.get(4).copied().ok_or(Error::ShortReply {
            expected: 5,
            got: reply.len(),
        })
    }

    /* Highest usable level, or `FALLBACK_LEVEL` if the range is unavailable. */
    async fn on_level(&self, io: &mut dyn ReportIo) -> u8 {
        match self.level_count(io).await {
            Ok(count) if count > 0 => count - 1,
            Ok(_) => FALLBACK_LEVEL,
            Err(e) => {
                debug!("Level range unavailable ({e}), using 0x{FALLBACK_LEVEL:02X}");
                FALLBACK_LEVEL
            }
        }
    }

    /* Run one action and record whether it ended in `Done` or `Failed`. */
    pub async fn apply(&mut self, io: &mut dyn ReportIo, action: Action) -> Result<()> {
        let result = match action {
            Action::On => self.apply_on(io).await,
            Action::Off => self.apply_off(io).await,
            Action::ForceOn => self.apply_force_on(io).await,
        };
        self.enter(if result.is_ok() { Phase::Done } else { Phase::Failed });
        result
    }

    /* Enable in basic/auto mode at the highest level, then read back. */
    async fn apply_on(&mut self, io: &mut dyn ReportIo) -> Result<()> {
        self.enter(Phase::Reading);
        let state = self.read_state(io).await?;

        self.enter(Phase::Computing);
        let level = self.on_level(io).await;
        let config = BacklightConfig::on(&state, level);

        self.enter(Phase::Writing);
        self.write_config(io, &config).await?;

        self.enter(Phase::Verifying);
        let verify = self.read_state(io).await?;
        if !verify.is_enabled() {
            return Err(Error::VerificationFailed);
        }
        Ok(())
    }

    /* Disable at level 0, then read back. */
    async fn apply_off(&mut self, io: &mut dyn ReportIo) -> Result<()> {
        self.enter(Phase::Reading);
        let state = self.read_state(io).await?;

        self.enter(Phase::Computing);
        let config = BacklightConfig::off(&state);

        self.enter(Phase::Writing);
        self.write_config(io, &config).await?;

        self.enter(Phase::Verifying);
        let verify = self.read_state(io).await?;
        if verify.is_enabled() {
            return Err(Error::VerificationFailed);
        }
        Ok(())
    }

    /* OFF pulse then ON, to restart the device's auto-off timer. */
    /*  */
    /* The OFF write may fail without consequence. Success is the ON write */
    /* being acknowledged; there is no read-back. */
    async fn apply_force_on(&mut self, io: &mut dyn ReportIo) -> Result<()> {
        self.enter(Phase::Reading);
        let state = self.read_state(io).await?;

        self.enter(Phase::Computing);
        let level = self.on_level(io).await;
        let off = BacklightConfig::off(&state);
        let on = BacklightConfig::on(&state, level);

        self.enter(Phase::Writing);
        if let Err(e) = self.write_config(io, &off).await {
            debug!("OFF pulse before force-on was not acknowledged: {e}");
        }
        self.write_config(io, &on).await
    }
}
