//! Runtime configuration.
//!
//! `Settings` covers every tunable the rest of the crate consults: CLDAP
//! probe timing, locator limits and cache lifetime, search paging, the
//! optional site override, and the encryption types offered during
//! credential acquisition. Everything has a default so a caller can start
//! from `Settings::default()` and override only what matters to them.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for the Netlogon/CLDAP prober (component A).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CldapSettings {
    /// Per-wave socket timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Number of retry waves before giving up on a candidate.
    pub retries: u32,
}

impl Default for CldapSettings {
    fn default() -> CldapSettings {
        CldapSettings {
            timeout_ms: 500,
            retries: 3,
        }
    }
}

impl CldapSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Tunables for the DC locator (component C).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocateSettings {
    /// Maximum number of validated servers to return from a single locate.
    pub max_servers: usize,
    /// How long a locate result is cached for, in seconds.
    pub cache_ttl_secs: u64,
    /// Force a specific AD site rather than auto-detecting one.
    pub site_override: Option<String>,
}

impl Default for LocateSettings {
    fn default() -> LocateSettings {
        LocateSettings {
            max_servers: 3,
            cache_ttl_secs: 300,
            site_override: None,
        }
    }
}

impl LocateSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Tunables for the directory client (component E).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Page size requested via the paged-results control.
    pub page_size: i32,
}

impl Default for SearchSettings {
    fn default() -> SearchSettings {
        SearchSettings { page_size: 500 }
    }
}

/// Tunables for the credential sandbox (component D).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Kerberos encryption types to offer, in preference order, as the
    /// `default_tgs_enctypes`/`default_tkt_enctypes` krb5.conf values.
    pub enctypes: Vec<String>,
    /// Use the system's own krb5.conf/default ccache instead of generating
    /// an isolated sandbox. When true, `Sandbox::activate` is a no-op.
    pub use_system_config: bool,
}

impl Default for SandboxSettings {
    fn default() -> SandboxSettings {
        SandboxSettings {
            enctypes: vec![
                "aes256-cts-hmac-sha1-96".to_string(),
                "aes128-cts-hmac-sha1-96".to_string(),
                "rc4-hmac".to_string(),
            ],
            use_system_config: false,
        }
    }
}

/// The complete, serializable configuration for every component in this
/// crate. Deserializes from YAML via `serde_yaml`; every field has a
/// default so a partial document is accepted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cldap: CldapSettings,
    pub locate: LocateSettings,
    pub search: SearchSettings,
    pub sandbox: SandboxSettings,
}

impl Settings {
    /// Parse settings from a YAML document. Missing keys fall back to their
    /// defaults; unknown keys are ignored rather than rejected, so older
    /// configs keep working against a crate that has grown new knobs.
    pub fn from_yaml(doc: &str) -> Result<Settings> {
        let settings = serde_yaml::from_str(doc)
            .context("parsing YAML settings document")
            .map_err(|e| Error::config(e.to_string()))?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.cldap.retries, 3);
        assert_eq!(s.locate.max_servers, 3);
        assert_eq!(s.search.page_size, 500);
        assert!(!s.sandbox.enctypes.is_empty());
        assert!(!s.sandbox.use_system_config);
    }

    #[test]
    fn partial_yaml_document_fills_in_defaults() {
        let s = Settings::from_yaml("locate:\n  max_servers: 5\n").expect("valid yaml");
        assert_eq!(s.locate.max_servers, 5);
        assert_eq!(s.locate.cache_ttl_secs, 300);
        assert_eq!(s.cldap.retries, 3);
    }

    #[test]
    fn site_override_round_trips() {
        let s = Settings::from_yaml("locate:\n  site_override: HQ\n").expect("valid yaml");
        assert_eq!(s.locate.site_override.as_deref(), Some("HQ"));
    }
}
