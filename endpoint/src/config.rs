//! The declarative endpoint configuration and its validation.
//!
//! Validation is the one-time normalization step between deserialization
//! and role activation: it trims the address, resolves the combined PEM
//! path to absolute form, and fills in defaults for the tuning knobs.
//! Field-level problems are collected and reported together, not
//! first-error-wins.

use std::{path::PathBuf, sync::atomic::AtomicU64, time::Duration};

use serde::{de, Deserialize, Deserializer};
use tokio::sync::Mutex;

use crate::error::EndpointError;
use crate::lifecycle::RoleState;
use rpclink_common::DEFAULT_MAX_PACKET_SIZE;

/// Timeout applied when the configuration leaves `timeout` unset.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One RPC endpoint configuration. Deserialized from declarative settings
/// (kebab-case field names), validated exactly once, then activated as a
/// client or a server through the lifecycle operations.
///
/// The same shape serves both roles: `use_ssl` and `skip_tls_verification`
/// are interpreted per role by the credential builder, which is the whole
/// point of keeping one configuration for the pair.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EndpointConfig {
    /// Network address, `host:port`
    pub addr: String,

    /// Secure the transport with TLS
    pub use_ssl: bool,

    /// Combined key+certificate PEM file; the one file supplies both.
    /// Only consulted when `use_ssl` is true.
    pub ssl_combined_pem: Option<PathBuf>,

    /// Server side: do not demand a client certificate.
    /// Client side: do not verify the server certificate.
    pub skip_tls_verification: bool,

    /// Maximum size of one wire frame in bytes; 0 means the default
    pub max_packet_size: usize,

    /// Dial timeout; an integer number of seconds or a string with an
    /// `ms`/`s`/`m`/`h` suffix. Zero means the default.
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,

    #[serde(skip)]
    pub(crate) state: Mutex<RoleState>,

    /// Counts server activations, so a finished serve loop only clears the
    /// activation it belongs to.
    #[serde(skip)]
    pub(crate) server_generation: AtomicU64,
}

impl EndpointConfig {
    /// Normalize the configuration: trim the address, resolve the PEM path
    /// to absolute form, apply defaults for non-positive tuning fields.
    ///
    /// Called exactly once before any role activation. Every field-level
    /// failure is reported in the aggregate error.
    pub fn validate(&mut self) -> Result<(), EndpointError> {
        let mut problems = Vec::new();

        self.addr = self.addr.trim().to_string();

        if let Some(path) = self.ssl_combined_pem.take() {
            match std::path::absolute(&path) {
                Ok(abs) => self.ssl_combined_pem = Some(abs),
                Err(source) => problems.push(format!(
                    "ssl-combined-pem: {}",
                    EndpointError::PathResolution { path, source }
                )),
            }
        }

        if self.max_packet_size == 0 {
            self.max_packet_size = DEFAULT_MAX_PACKET_SIZE;
        }

        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EndpointError::Validation(problems))
        }
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> de::Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("an integer number of seconds or a string like \"30s\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            // Non-positive values fall back to the default in validate().
            Ok(Duration::from_secs(v.max(0) as u64))
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Duration, E> {
            parse_duration(s).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let unit_start = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("invalid duration {s:?}"))?;
    let (number, unit) = s.split_at(unit_start);
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;

    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        "h" => Ok(Duration::from_secs(number * 3600)),
        _ => Err(format!("invalid duration unit {unit:?} in {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_to_unset_tuning_fields() {
        let mut cfg = EndpointConfig::default();
        cfg.addr = "127.0.0.1:35819".to_string();
        cfg.validate().unwrap();

        assert_eq!(cfg.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(cfg.timeout, DEFAULT_TIMEOUT);
        assert!(cfg.max_packet_size > 0);
        assert!(!cfg.timeout.is_zero());
    }

    #[test]
    fn explicit_tuning_fields_survive_validation() {
        let mut cfg = EndpointConfig::default();
        cfg.addr = "127.0.0.1:35819".to_string();
        cfg.max_packet_size = 4096;
        cfg.timeout = Duration::from_secs(5);
        cfg.validate().unwrap();

        assert_eq!(cfg.max_packet_size, 4096);
        assert_eq!(cfg.timeout, Duration::from_secs(5));
    }

    #[test]
    fn address_is_trimmed() {
        let mut cfg = EndpointConfig::default();
        cfg.addr = "  127.0.0.1:35819\t".to_string();
        cfg.validate().unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:35819");
    }

    #[test]
    fn pem_path_resolved_to_absolute() {
        let mut cfg = EndpointConfig::default();
        cfg.addr = "127.0.0.1:35819".to_string();
        cfg.ssl_combined_pem = Some(PathBuf::from("certs/server.pem"));
        cfg.validate().unwrap();

        assert!(cfg.ssl_combined_pem.unwrap().is_absolute());
    }

    #[test]
    fn unresolvable_pem_path_reported_in_aggregate() {
        let mut cfg = EndpointConfig::default();
        cfg.addr = "127.0.0.1:35819".to_string();
        cfg.ssl_combined_pem = Some(PathBuf::new());

        match cfg.validate().unwrap_err() {
            EndpointError::Validation(problems) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].starts_with("ssl-combined-pem:"));
            }
            other => panic!("expected Validation, got {other}"),
        }
    }

    #[test]
    fn deserializes_from_kebab_case_toml() {
        let mut cfg: EndpointConfig = toml::from_str(
            r#"
            addr = " 127.0.0.1:35819 "
            use-ssl = true
            ssl-combined-pem = "certs/server.pem"
            skip-tls-verification = true
            max-packet-size = 4194304
            timeout = "90s"
            "#,
        )
        .unwrap();

        assert!(cfg.use_ssl);
        assert!(cfg.skip_tls_verification);
        assert_eq!(cfg.max_packet_size, 4 * 1024 * 1024);
        assert_eq!(cfg.timeout, Duration::from_secs(90));

        cfg.validate().unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:35819");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: EndpointConfig = toml::from_str(r#"addr = "127.0.0.1:1""#).unwrap();
        assert!(!cfg.use_ssl);
        assert!(!cfg.skip_tls_verification);
        assert!(cfg.ssl_combined_pem.is_none());
        assert_eq!(cfg.max_packet_size, 0);
        assert!(cfg.timeout.is_zero());
    }

    #[test]
    fn duration_strings_parse() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10y").is_err());
    }
}
