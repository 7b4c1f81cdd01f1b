//! Upload configuration, read from the host's string-keyed configuration store

use crate::{classify::UploadTier, errors::ConfigError};
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_SUBMIT_URL: &str = "http://crash.limetech.org/submit";
pub const DEFAULT_SYMBOL_URL: &str = "http://crash.limetech.org/symbols/submit";
pub const DEFAULT_BINARY_URL: &str = "http://crash.limetech.org/binary/submit";

const KEYS: [&str; 7] = [
    "MinidumpAccount",
    "MinidumpPresubmit",
    "MinidumpUrl",
    "MinidumpSymbolUrl",
    "MinidumpBinaryUrl",
    "MinidumpSymbolUpload",
    "MinidumpBinaryUpload",
];

/// Read access to the host's key/value configuration
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

impl<S: std::hash::BuildHasher> ConfigSource for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl ConfigSource for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// Sent as `UserID` when set
    #[serde(rename = "MinidumpAccount", deserialize_with = "non_empty")]
    pub account: Option<String>,
    /// Whether to negotiate with the presubmit endpoint before uploading
    #[serde(rename = "MinidumpPresubmit", deserialize_with = "flag")]
    pub presubmit: bool,
    #[serde(rename = "MinidumpUrl")]
    pub submit_url: String,
    #[serde(rename = "MinidumpSymbolUrl")]
    pub symbol_url: String,
    #[serde(rename = "MinidumpBinaryUrl")]
    pub binary_url: String,
    /// Highest module class symbols and binaries may be submitted for
    #[serde(rename = "MinidumpSymbolUpload", deserialize_with = "tier")]
    pub upload_tier: UploadTier,
    #[serde(rename = "MinidumpBinaryUpload", deserialize_with = "flag")]
    pub binary_upload: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            account: None,
            presubmit: true,
            submit_url: DEFAULT_SUBMIT_URL.to_owned(),
            symbol_url: DEFAULT_SYMBOL_URL.to_owned(),
            binary_url: DEFAULT_BINARY_URL.to_owned(),
            upload_tier: UploadTier::default(),
            binary_upload: true,
        }
    }
}

impl UploadConfig {
    /// Builds the configuration from the keys the host knows about, defaulting the rest
    pub fn from_source<S: ConfigSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        let values: serde_json::Map<String, serde_json::Value> = KEYS
            .iter()
            .filter_map(|key| {
                source
                    .get(key)
                    .map(|value| ((*key).to_owned(), serde_json::Value::String(value)))
            })
            .collect();

        Ok(serde_json::from_value(serde_json::Value::Object(values))?)
    }
}

/// `y`, `Y` or `1` as the first character enables a flag; anything else disables it
pub fn parse_flag(value: &str) -> bool {
    matches!(value.as_bytes().first(), Some(b'y' | b'Y' | b'1'))
}

/// Parses leading decimal digits the way the host's `atoi` does, returning 0 for garbage
pub fn parse_level(value: &str) -> i64 {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });
    if negative { -magnitude } else { magnitude }
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    String::deserialize(deserializer).map(|value| parse_flag(&value))
}

fn tier<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UploadTier, D::Error> {
    String::deserialize(deserializer).map(|value| UploadTier::new(parse_level(&value)))
}

fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    String::deserialize(deserializer).map(|value| (!value.is_empty()).then_some(value))
}

#[cfg(test)]
mod test {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn absent_keys_use_defaults() {
        let config = UploadConfig::from_source(&source(&[])).unwrap();
        assert_eq!(config, UploadConfig::default());
        assert!(config.presubmit);
        assert!(config.binary_upload);
        assert_eq!(config.upload_tier, UploadTier::ALL);
        assert_eq!(config.submit_url, DEFAULT_SUBMIT_URL);
    }

    #[test]
    fn host_values_override_defaults() {
        let config = UploadConfig::from_source(&source(&[
            ("MinidumpAccount", "76561197987819599"),
            ("MinidumpPresubmit", "no"),
            ("MinidumpUrl", "http://localhost/submit"),
            ("MinidumpSymbolUpload", "2"),
            ("MinidumpBinaryUpload", "0"),
            ("SomethingElse", "ignored"),
        ]))
        .unwrap();

        assert_eq!(config.account.as_deref(), Some("76561197987819599"));
        assert!(!config.presubmit);
        assert_eq!(config.submit_url, "http://localhost/submit");
        assert_eq!(config.symbol_url, DEFAULT_SYMBOL_URL);
        assert_eq!(config.upload_tier.level(), 2);
        assert!(!config.binary_upload);
    }

    #[test]
    fn empty_account_is_absent() {
        let config = UploadConfig::from_source(&source(&[("MinidumpAccount", "")])).unwrap();
        assert_eq!(config.account, None);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("yes"));
        assert!(parse_flag("Y"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
        assert!(!parse_flag("true"));
    }

    #[test]
    fn levels() {
        assert_eq!(parse_level("3"), 3);
        assert_eq!(parse_level("  2abc"), 2);
        assert_eq!(parse_level("abc"), 0);
        assert_eq!(parse_level("-1"), -1);
        assert_eq!(parse_level(""), 0);
    }
}
