use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{CHANNEL_BLOCK_ID, CHUNK_SIZE, DEFAULT_REGION_SIZE, SALT_SIZE};
use crate::error::{ApkmarkError, ApkmarkResult};

/// Top-level configuration (loaded from apkmark.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApkmarkConfig {
    pub log: LogConfig,
    pub verity: VerityConfig,
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerityConfig {
    /// Salt as 16 hex digits (default: all zero)
    pub salt: String,
    /// Digest content regions on the rayon pool
    pub parallel: bool,
    /// Bytes handed to each digest worker; a positive multiple of 4096
    pub region_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Signing block entry id used for channel numbers
    pub block_id: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl Default for VerityConfig {
    fn default() -> Self {
        Self {
            salt: "0".repeat(SALT_SIZE * 2),
            parallel: true,
            region_size: DEFAULT_REGION_SIZE,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            block_id: CHANNEL_BLOCK_ID,
        }
    }
}

impl ApkmarkConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> ApkmarkResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ApkmarkError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ApkmarkResult<()> {
        self.verity.salt_bytes()?;
        let size = self.verity.region_size;
        if size == 0 || size % CHUNK_SIZE != 0 {
            return Err(ApkmarkError::Config(format!(
                "verity.region_size must be a positive multiple of {CHUNK_SIZE}, got {size}"
            )));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ApkmarkError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

impl VerityConfig {
    /// Decode the configured salt.
    pub fn salt_bytes(&self) -> ApkmarkResult<[u8; SALT_SIZE]> {
        parse_salt(&self.salt)
    }
}

/// Parse exactly `SALT_SIZE` bytes from a hex string.
pub fn parse_salt(digits: &str) -> ApkmarkResult<[u8; SALT_SIZE]> {
    let digits = digits.trim();
    let mut salt = [0u8; SALT_SIZE];
    hex::decode_to_slice(digits, &mut salt).map_err(|e| {
        ApkmarkError::Config(format!(
            "salt must be {} hex digits, got {digits:?}: {e}",
            SALT_SIZE * 2
        ))
    })?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[verity]
salt = "0102030405060708"
parallel = false
region_size = 65536

[channel]
block_id = 2271560481
"#;
        let config: ApkmarkConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.verity.salt_bytes().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(!config.verity.parallel);
        assert_eq!(config.verity.region_size, 65536);
        assert_eq!(config.channel.block_id, 0x8765_4321);
    }

    #[test]
    fn test_parse_defaults() {
        let config: ApkmarkConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.verity.salt_bytes().unwrap(), [0u8; SALT_SIZE]);
        assert!(config.verity.parallel);
        assert_eq!(config.verity.region_size, DEFAULT_REGION_SIZE);
        assert_eq!(config.channel.block_id, CHANNEL_BLOCK_ID);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ApkmarkConfig::default();
        config.verity.region_size = 5000;
        assert!(matches!(config.validate(), Err(ApkmarkError::Config(_))));

        let mut config = ApkmarkConfig::default();
        config.verity.salt = "abc".into();
        assert!(config.validate().is_err());

        let mut config = ApkmarkConfig::default();
        config.verity.salt = "zz02030405060708".into();
        assert!(config.validate().is_err());

        let mut config = ApkmarkConfig::default();
        config.log.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_salt_accepts_only_hex_digits() {
        assert_eq!(
            parse_salt(" 0A0b0C0d0E0f1011 ").unwrap(),
            [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10, 0x11]
        );
        assert!(matches!(
            parse_salt("+1+2+3+4+5+6+7+8"),
            Err(ApkmarkError::Config(_))
        ));
        assert!(parse_salt("-1-2-3-4-5-6-7-8").is_err());
        assert!(parse_salt("010203040506070809").is_err());
        assert!(parse_salt("01020304050607").is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApkmarkConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.channel.block_id, CHANNEL_BLOCK_ID);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apkmark.toml");
        std::fs::write(&path, "[verity\nsalt = 1").unwrap();
        assert!(matches!(
            ApkmarkConfig::load(&path),
            Err(ApkmarkError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ApkmarkConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ApkmarkConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.verity.salt, parsed.verity.salt);
        assert_eq!(config.channel.block_id, parsed.channel.block_id);
        assert_eq!(config.log.level, parsed.log.level);
    }
}
