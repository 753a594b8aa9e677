/* Runtime configuration: receiver identity and the per-user state directory. */
/*  */
/* Sources, lowest to highest precedence: built-in defaults, the optional */
/* `config.ini` in the state directory, then environment variables. */
/* Invalid values are ignored and the lower-precedence value is kept. */

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use tracing::{debug, warn};

/* Logitech Unifying receiver */
pub const DEFAULT_RECEIVER_VID: u16 = 0x046D;
pub const DEFAULT_RECEIVER_PID: u16 = 0xC52B;

pub const ENV_RECEIVER_VID: &str = "MX_KEYS_RECEIVER_VID";
pub const ENV_RECEIVER_PID: &str = "MX_KEYS_RECEIVER_PID";

const APP_DIR_NAME: &str = ".mx-keys-cli";
const CONFIG_FILE_NAME: &str = "config.ini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub vendor_id: u16,
    pub product_id: u16,
    /* Holds the target cache and `config.ini` */
    pub state_dir: PathBuf,
}

impl Config {
    /* Resolve the configuration for the current user and process environment. */
    pub fn load() -> Self {
        let state_dir = state_dir(std::env::var_os("HOME"));
        Self::resolve(state_dir, |key| std::env::var(key).ok())
    }

    /* Resolve against an explicit state directory and environment lookup. */
    pub fn resolve(state_dir: PathBuf, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self {
            vendor_id: DEFAULT_RECEIVER_VID,
            product_id: DEFAULT_RECEIVER_PID,
            state_dir,
        };

        let ini_path = config.state_dir.join(CONFIG_FILE_NAME);
        if ini_path.is_file() {
            config.apply_ini(&ini_path);
        }

        override_id(&mut config.vendor_id, env(ENV_RECEIVER_VID), ENV_RECEIVER_VID);
        override_id(&mut config.product_id, env(ENV_RECEIVER_PID), ENV_RECEIVER_PID);

        debug!(
            "Receiver {:04x}:{:04x}, state in {}",
            config.vendor_id,
            config.product_id,
            config.state_dir.display()
        );
        config
    }

    /* Apply the `[Receiver]` section of an INI file. */
    fn apply_ini(&mut self, path: &Path) {
        let mut ini = Ini::new();
        if let Err(e) = ini.load(path) {
            warn!("Failed to parse {}: {}", path.display(), e);
            return;
        }

        /* configparser lowercases section and key names */
        override_id(&mut self.vendor_id, ini.get("receiver", "vendorid"), "VendorId");
        override_id(&mut self.product_id, ini.get("receiver", "productid"), "ProductId");
    }
}

/* `$HOME/.mx-keys-cli`, or `./.mx-keys-cli` without a home directory. */
pub fn state_dir(home: Option<OsString>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn override_id(slot: &mut u16, raw: Option<String>, source: &str) {
    let Some(raw) = raw else {
        return;
    };
    if raw.trim().is_empty() {
        return;
    }
    match parse_id(&raw) {
        Some(value) => *slot = value,
        None => warn!("Ignoring invalid {source} value '{raw}'"),
    }
}

/* Parse a 16-bit USB identifier. */
/*  */
/* `0x046D`/`0X046D` is hexadecimal, all-decimal-digit text such as `1133` */
/* is decimal, and other hexadecimal text such as `046d` or `C52B` is */
/* hexadecimal. Anything else, or a value above 0xFFFF, is rejected. */
pub fn parse_id(s: &str) -> Option<u16> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16).ok();
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return u16::from_str_radix(s, 16).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_parse_id_formats() {
        assert_eq!(parse_id("0x046D"), Some(0x046D));
        assert_eq!(parse_id("0Xc52b"), Some(0xC52B));
        assert_eq!(parse_id("1133"), Some(0x046D));
        assert_eq!(parse_id("C52B"), Some(0xC52B));
        assert_eq!(parse_id("046d"), Some(0x046D));
        assert_eq!(parse_id(" 50475 "), Some(0xC52B));
    }

    #[test]
    fn test_parse_id_rejects_bad_values() {
        assert_eq!(parse_id(""), None);
        assert_eq!(parse_id("0x"), None);
        assert_eq!(parse_id("receiver"), None);
        assert_eq!(parse_id("-1"), None);
        assert_eq!(parse_id("65536"), None);
        assert_eq!(parse_id("0x10000"), None);
        assert_eq!(parse_id("12 34"), None);
    }

    #[test]
    fn test_defaults_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(dir.path().to_path_buf(), env_from(&[]));
        assert_eq!(config.vendor_id, DEFAULT_RECEIVER_VID);
        assert_eq!(config.product_id, DEFAULT_RECEIVER_PID);
        assert_eq!(config.state_dir, dir.path());
    }

    #[test]
    fn test_env_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(
            dir.path().to_path_buf(),
            env_from(&[(ENV_RECEIVER_VID, "1133"), (ENV_RECEIVER_PID, "0xC534")]),
        );
        assert_eq!(config.vendor_id, 0x046D);
        assert_eq!(config.product_id, 0xC534);
    }

    #[test]
    fn test_malformed_env_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::resolve(
            dir.path().to_path_buf(),
            env_from(&[(ENV_RECEIVER_VID, "logitech"), (ENV_RECEIVER_PID, "99999")]),
        );
        assert_eq!(config.vendor_id, DEFAULT_RECEIVER_VID);
        assert_eq!(config.product_id, DEFAULT_RECEIVER_PID);
    }

    #[test]
    fn test_ini_file_then_env_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[Receiver]\nVendorId=0x1234\nProductId=0xC548\n",
        )
        .unwrap();

        let from_file = Config::resolve(dir.path().to_path_buf(), env_from(&[]));
        assert_eq!(from_file.vendor_id, 0x1234);
        assert_eq!(from_file.product_id, 0xC548);

        let with_env = Config::resolve(
            dir.path().to_path_buf(),
            env_from(&[(ENV_RECEIVER_PID, "0xC52B")]),
        );
        assert_eq!(with_env.vendor_id, 0x1234);
        assert_eq!(with_env.product_id, 0xC52B);
    }

    #[test]
    fn test_invalid_ini_value_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[Receiver]\nVendorId=not-a-number\n",
        )
        .unwrap();

        let config = Config::resolve(dir.path().to_path_buf(), env_from(&[]));
        assert_eq!(config.vendor_id, DEFAULT_RECEIVER_VID);
    }

    #[test]
    fn test_state_dir_under_home() {
        assert_eq!(
            state_dir(Some(OsString::from("/home/user"))),
            PathBuf::from("/home/user/.mx-keys-cli")
        );
        assert_eq!(state_dir(None), PathBuf::from("./.mx-keys-cli"));
    }
}
