//! Typed feed configuration.
//!
//! The hosting layer hands settings over as strings; they are parsed into
//! this record exactly once at startup. Unknown keys fall back to defaults,
//! unparseable values are configuration errors.

use crate::error::{ErrorKind, Result};

/// Everything that changes the engine's behaviour.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Remove flips the hidden attribute instead of deleting bytes.
    pub enable_delisting: bool,
    /// Search applies the target-framework compatibility filter.
    pub enable_framework_filtering: bool,
    /// Reject symbols archives on add and drop-folder ingest.
    pub ignore_symbols_packages: bool,
    /// When `false`, pushing an existing (id, version) fails.
    pub allow_override_existing_package_on_push: bool,
    /// Watch the package root for external mutations.
    pub enable_file_system_monitoring: bool,
    /// Cache filename under the root; `None` uses the machine-derived default.
    pub cache_file_name: Option<String>,
    /// Delay before the first background rebuild, in seconds.
    pub initial_cache_rebuild_after_seconds: u32,
    /// Period between background rebuilds, in minutes.
    pub cache_rebuild_frequency_in_minutes: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enable_delisting: false,
            enable_framework_filtering: false,
            ignore_symbols_packages: false,
            allow_override_existing_package_on_push: true,
            enable_file_system_monitoring: true,
            cache_file_name: None,
            initial_cache_rebuild_after_seconds: 15,
            cache_rebuild_frequency_in_minutes: 60,
        }
    }
}

impl FeedConfig {
    /// Build a config from a string→string settings provider.
    ///
    /// Absent keys default; present-but-unparseable values are
    /// [`InvalidConfiguration`](ErrorKind::InvalidConfiguration).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.enable_delisting = parse_bool(&lookup, "enableDelisting", config.enable_delisting)?;
        config.enable_framework_filtering =
            parse_bool(&lookup, "enableFrameworkFiltering", config.enable_framework_filtering)?;
        config.ignore_symbols_packages =
            parse_bool(&lookup, "ignoreSymbolsPackages", config.ignore_symbols_packages)?;
        config.allow_override_existing_package_on_push = parse_bool(
            &lookup,
            "allowOverrideExistingPackageOnPush",
            config.allow_override_existing_package_on_push,
        )?;
        config.enable_file_system_monitoring =
            parse_bool(&lookup, "enableFileSystemMonitoring", config.enable_file_system_monitoring)?;
        config.cache_file_name = lookup("cacheFileName").filter(|name| !name.trim().is_empty());
        config.initial_cache_rebuild_after_seconds = parse_int(
            &lookup,
            "initialCacheRebuildAfterSeconds",
            config.initial_cache_rebuild_after_seconds,
        )?;
        config.cache_rebuild_frequency_in_minutes = parse_int(
            &lookup,
            "cacheRebuildFrequencyInMinutes",
            config.cache_rebuild_frequency_in_minutes,
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no engine could run with.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.initial_cache_rebuild_after_seconds == 0 {
            exn::bail!(ErrorKind::InvalidConfiguration(
                "initialCacheRebuildAfterSeconds must be positive".to_string()
            ));
        }
        if self.cache_rebuild_frequency_in_minutes == 0 {
            exn::bail!(ErrorKind::InvalidConfiguration(
                "cacheRebuildFrequencyInMinutes must be positive".to_string()
            ));
        }
        Ok(())
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => exn::bail!(ErrorKind::InvalidConfiguration(format!("{key}={raw:?} is not a boolean"))),
        },
    }
}

fn parse_int<F>(lookup: &F, key: &str, default: u32) -> Result<u32>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(value) if value > 0 => Ok(value),
            _ => exn::bail!(ErrorKind::InvalidConfiguration(format!("{key}={raw:?} is not a positive integer"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FeedConfig::default();
        assert!(!config.enable_delisting);
        assert!(config.allow_override_existing_package_on_push);
        assert!(config.enable_file_system_monitoring);
        assert_eq!(config.initial_cache_rebuild_after_seconds, 15);
        assert_eq!(config.cache_rebuild_frequency_in_minutes, 60);
    }

    #[test]
    fn test_from_lookup_parses_known_keys() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("enableDelisting", "true"),
            ("allowOverrideExistingPackageOnPush", "false"),
            ("cacheFileName", "myfeed"),
            ("initialCacheRebuildAfterSeconds", "1"),
        ]))
        .unwrap();
        assert!(config.enable_delisting);
        assert!(!config.allow_override_existing_package_on_push);
        assert_eq!(config.cache_file_name.as_deref(), Some("myfeed"));
        assert_eq!(config.initial_cache_rebuild_after_seconds, 1);
        // Untouched keys keep their defaults.
        assert!(config.enable_file_system_monitoring);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let config = FeedConfig::from_lookup(lookup_from(&[("someFutureSetting", "whatever")])).unwrap();
        assert_eq!(config.cache_rebuild_frequency_in_minutes, 60);
    }

    #[test]
    fn test_bad_values_are_configuration_errors() {
        for (key, value) in [
            ("enableDelisting", "yes please"),
            ("initialCacheRebuildAfterSeconds", "0"),
            ("initialCacheRebuildAfterSeconds", "-5"),
            ("cacheRebuildFrequencyInMinutes", "sixty"),
        ] {
            let err = FeedConfig::from_lookup(lookup_from(&[(key, value)])).unwrap_err();
            assert!(matches!(err.current_value(), ErrorKind::InvalidConfiguration(_)), "{key}={value}");
        }
    }
}
