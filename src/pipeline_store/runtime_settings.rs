//! Typed lookups of the tunables kept in the settings table.

use super::trait_def::SettingsStore;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// A setting read from the settings table, identified by category and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingKey {
    pub category: &'static str,
    pub key: &'static str,
}

pub const RETENTION_DAYS: SettingKey = SettingKey {
    category: "storage",
    key: "retention_days",
};

pub const DOWNLOAD_MAX_CONCURRENT: SettingKey = SettingKey {
    category: "download_queue",
    key: "max_concurrent",
};

pub const POST_MAX_CONCURRENT: SettingKey = SettingKey {
    category: "post_scheduler",
    key: "max_concurrent",
};

impl Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.category, self.key)
    }
}

/// Parses the stored value of `setting`, or returns `fallback` when it is
/// missing, unreadable or rejected by `valid`.
pub fn setting_or<S, T>(store: &S, setting: SettingKey, fallback: T, valid: fn(&T) -> bool) -> T
where
    S: SettingsStore + ?Sized,
    T: FromStr + Display,
{
    let stored = match store.get_setting(setting.category, setting.key) {
        Ok(Some(stored)) => stored,
        Ok(None) => return fallback,
        Err(e) => {
            warn!("Failed to read setting {}: {:#}, using {}", setting, e, fallback);
            return fallback;
        }
    };
    match stored.value.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            warn!(
                "Ignoring invalid value '{}' for setting {}, using {}",
                stored.value, setting, fallback
            );
            fallback
        }
    }
}
