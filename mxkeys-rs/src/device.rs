/* Where BACKLIGHT2 lives: a receiver path plus slot and feature index. */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub hid_path: String,
    /* Device slot behind the receiver, 1..=6 */
    pub device_index: u8,
    pub feature_index: u8,
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} slot {} feature index 0x{:02X}",
            self.hid_path, self.device_index, self.feature_index
        )
    }
}

/* The three things the CLI can ask for. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    On,
    Off,
    /* OFF pulse immediately followed by ON, to restart the auto-off timer. */
    ForceOn,
}

impl Action {
    /* The single stdout line printed when the action succeeds. */
    pub fn success_message(self) -> &'static str {
        match self {
            Self::On => "Backlight enabled.",
            Self::Off => "Backlight disabled.",
            Self::ForceOn => "Backlight forced on.",
        }
    }
}

/* Size of the getBacklightConfig state block */
pub const BACKLIGHT_STATE_LEN: usize = 12;

/* Size of the setBacklightConfig payload */
pub const BACKLIGHT_CONFIG_LEN: usize = 10;

/* Options bits 0..2 are reserved and must be written back untouched. */
pub const OPTIONS_RESERVED_MASK: u8 = 0x07;
pub const OPTIONS_MODE_SHIFT: u8 = 3;
pub const OPTIONS_MODE_MASK: u8 = 0x03 << OPTIONS_MODE_SHIFT;

/* Backlight modes stored in options bits 3..4 */
pub const MODE_BASIC_AUTO: u8 = 0x00;

/* Effect value meaning "leave the current effect alone" */
pub const EFFECT_NO_CHANGE: u8 = 0xFF;

/* BACKLIGHT2 state as returned by getBacklightConfig (function 0). */
/*  */
/* Wire layout (12 bytes): enabled, options, supported, effects (LE16), */
/* level, delay-hold-off (LE16), delay-hold-in (LE16), delay-power (LE16). */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BacklightState {
    pub enabled: u8,
    pub options: u8,
    pub supported: u8,
    pub effects: u16,
    pub level: u8,
    pub dho: u16,
    pub dhi: u16,
    pub dpow: u16,
}

impl BacklightState {
    pub fn from_bytes(b: &[u8; BACKLIGHT_STATE_LEN]) -> Self {
        Self {
            enabled: b[0],
            options: b[1],
            supported: b[2],
            effects: u16::from_le_bytes([b[3], b[4]]),
            level: b[5],
            dho: u16::from_le_bytes([b[6], b[7]]),
            dhi: u16::from_le_bytes([b[8], b[9]]),
            dpow: u16::from_le_bytes([b[10], b[11]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; BACKLIGHT_STATE_LEN] {
        let [eff_lo, eff_hi] = self.effects.to_le_bytes();
        let [dho_lo, dho_hi] = self.dho.to_le_bytes();
        let [dhi_lo, dhi_hi] = self.dhi.to_le_bytes();
        let [dpow_lo, dpow_hi] = self.dpow.to_le_bytes();
        [
            self.enabled,
            self.options,
            self.supported,
            eff_lo,
            eff_hi,
            self.level,
            dho_lo,
            dho_hi,
            dhi_lo,
            dhi_hi,
            dpow_lo,
            dpow_hi,
        ]
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }

    /* Backlight mode from options bits 3..4. */
    pub fn mode(&self) -> u8 {
        (self.options & OPTIONS_MODE_MASK) >> OPTIONS_MODE_SHIFT
    }
}

/* Payload of setBacklightConfig (function 1). */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklightConfig {
    pub enabled: u8,
    pub options: u8,
    pub effect: u8,
    /* Only honoured by the device in manual mode */
    pub level: u8,
    pub dho: u16,
    pub dhi: u16,
    pub dpow: u16,
}

impl BacklightConfig {
    /* Backlight on in basic/auto mode at `level`, timing delays kept. */
    pub fn on(current: &BacklightState, level: u8) -> Self {
        Self {
            enabled: 0x01,
            options: (current.options & OPTIONS_RESERVED_MASK) | (MODE_BASIC_AUTO << OPTIONS_MODE_SHIFT),
            effect: EFFECT_NO_CHANGE,
            level,
            dho: current.dho,
            dhi: current.dhi,
            dpow: current.dpow,
        }
    }

    /* Backlight off at level 0; options and timing delays kept. */
    pub fn off(current: &BacklightState) -> Self {
        Self {
            enabled: 0x00,
            options: current.options,
            effect: EFFECT_NO_CHANGE,
            level: 0x00,
            dho: current.dho,
            dhi: current.dhi,
            dpow: current.dpow,
        }
    }

    pub fn to_payload(&self) -> [u8; BACKLIGHT_CONFIG_LEN] {
        let [dho_lo, dho_hi] = self.dho.to_le_bytes();
        let [dhi_lo, dhi_hi] = self.dhi.to_le_bytes();
        let [dpow_lo, dpow_hi] = self.dpow.to_le_bytes();
        [
            self.enabled,
            self.options,
            self.effect,
            self.level,
            dho_lo,
            dho_hi,
            dhi_lo,
            dhi_hi,
            dpow_lo,
            dpow_hi,
        ]
    }

    pub fn from_payload(p: &[u8; BACKLIGHT_CONFIG_LEN]) -> Self {
        Self {
            enabled: p[0],
            options: p[1],
            effect: p[2],
            level: p[3],
            dho: u16::from_le_bytes([p[4], p[5]]),
            dhi: u16::from_le_bytes([p[6], p[7]]),
            dpow: u16::from_le_bytes([p[8], p[9]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_STATE: [u8; BACKLIGHT_STATE_LEN] = [
        0x01, 0x1D, 0x3F, 0x34, 0x12, 0x08, 0x2C, 0x01, 0x05, 0x00, 0x10, 0x0E,
    ];

    #[test]
    fn state_fields_are_little_endian() {
        let state = BacklightState::from_bytes(&RAW_STATE);
        assert_eq!(state.enabled, 0x01);
        assert_eq!(state.options, 0x1D);
        assert_eq!(state.supported, 0x3F);
        assert_eq!(state.effects, 0x1234);
        assert_eq!(state.level, 0x08);
        assert_eq!(state.dho, 300);
        assert_eq!(state.dhi, 5);
        assert_eq!(state.dpow, 0x0E10);
        assert_eq!(state.mode(), 0x03);
        assert_eq!(state.to_bytes(), RAW_STATE);
    }

    #[test]
    fn on_config_clears_mode_and_keeps_reserved_bits() {
        let state = BacklightState::from_bytes(&RAW_STATE);
        let cfg = BacklightConfig::on(&state, 0x0E);
        assert_eq!(cfg.enabled, 0x01);
        assert_eq!(cfg.options, 0x05);
        assert_eq!(cfg.effect, EFFECT_NO_CHANGE);
        assert_eq!(cfg.level, 0x0E);
        assert_eq!((cfg.dho, cfg.dhi, cfg.dpow), (state.dho, state.dhi, state.dpow));
    }

    #[test]
    fn off_config_keeps_options_and_delays() {
        let state = BacklightState::from_bytes(&RAW_STATE);
        let cfg = BacklightConfig::off(&state);
        assert_eq!(cfg.enabled, 0x00);
        assert_eq!(cfg.options, 0x1D);
        assert_eq!(cfg.level, 0x00);
        assert_eq!(
            cfg.to_payload(),
            [0x00, 0x1D, 0xFF, 0x00, 0x2C, 0x01, 0x05, 0x00, 0x10, 0x0E]
        );
    }

    #[test]
    fn action_messages() {
        assert_eq!(Action::On.success_message(), "Backlight enabled.");
        assert_eq!(Action::Off.success_message(), "Backlight disabled.");
        assert_eq!(Action::ForceOn.success_message(), "Backlight forced on.");
    }

    #[test]
    fn target_display() {
        let target = TargetDescriptor {
            hid_path: "/dev/hidraw2".into(),
            device_index: 3,
            feature_index: 7,
        };
        assert_eq!(target.to_string(), "/dev/hidraw2 slot 3 feature index 0x07");
    }
}
