use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::sanitize::mask_key;

pub const SETTINGS_VERSION: &str = "1.0";
pub const MAX_PARALLEL_JOBS_LIMIT: usize = 10;

/// A translation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Provider {
    DeepL,
    Azure,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::DeepL, Provider::Azure, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DeepL => "DeepL",
            Provider::Azure => "Azure",
            Provider::Gemini => "Gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a credential timestamp. RFC 3339 values keep their offset; naive
/// ISO 8601 values (no offset) are read as local time.
fn parse_lenient_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_lenient_timestamp(s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
    }
}

/// One API key for one provider, with rotation bookkeeping.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub value: String,
    #[serde(default)]
    pub active: bool,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_usage: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_error_at: Option<DateTime<Utc>>,
    /// WireGuard config file name under `mullvad_vpn_config_dir`; calls with
    /// this key are routed through that tunnel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_config: Option<String>,
}

impl ProviderCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            active: false,
            last_usage: None,
            last_error: None,
            last_error_at: None,
            vpn_config: None,
        }
    }

    pub fn secret(&self) -> SecretString {
        SecretString::from(self.value.clone())
    }

    pub fn masked(&self) -> String {
        mask_key(&self.value)
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("value", &self.masked())
            .field("active", &self.active)
            .field("last_usage", &self.last_usage)
            .field("last_error", &self.last_error)
            .field("last_error_at", &self.last_error_at)
            .field("vpn_config", &self.vpn_config)
            .finish()
    }
}

/// Failover knobs for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailoverPolicy {
    pub auto_change_key_on_error: bool,
    pub auto_switch_provider_on_error: bool,
    pub retry_after_days: u32,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleProviderConfig {
    pub enabled: bool,
    pub username: String,
    pub password: String,
}

impl SubtitleProviderConfig {
    /// Enabled with both username and password present.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for SubtitleProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtitleProviderConfig")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// The flat configuration record shared by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
    pub max_parallel_jobs: usize,
    pub provider: Provider,
    pub translation_target_language: String,
    pub ocr_source_language: String,
    pub extraction_source_language: String,
    pub subtitle_search_languages: Vec<String>,
    pub subtitle_max_downloads: u32,
    pub subtitle_providers: BTreeMap<String, SubtitleProviderConfig>,
    pub publish_provider: String,
    pub sync_similarity_threshold: f64,
    pub auto_switch_on_error: bool,
    pub auto_change_key_on_error: BTreeMap<Provider, bool>,
    pub retry_after_days: BTreeMap<Provider, u32>,
    pub wait_ms: BTreeMap<Provider, u64>,
    pub azure_endpoint: String,
    pub azure_region: String,
    /// Kept in the settings file; the translator container reads its own.
    pub deepl_endpoint: String,
    pub gemini_model: String,
    /// Directory holding per-key WireGuard configs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mullvad_vpn_config_dir: Option<PathBuf>,
    pub provider_keys: BTreeMap<Provider, Vec<ProviderCredential>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            root_dir: None,
            max_parallel_jobs: 1,
            provider: Provider::DeepL,
            translation_target_language: String::new(),
            ocr_source_language: "eng".to_string(),
            extraction_source_language: "eng".to_string(),
            subtitle_search_languages: vec!["en".to_string()],
            subtitle_max_downloads: 1,
            subtitle_providers: ["opensubtitles", "addic7ed"]
                .into_iter()
                .map(|name| (name.to_string(), SubtitleProviderConfig::default()))
                .collect(),
            publish_provider: "opensubtitles".to_string(),
            sync_similarity_threshold: 0.6,
            auto_switch_on_error: false,
            auto_change_key_on_error: per_provider(false),
            retry_after_days: per_provider(0),
            wait_ms: per_provider(0),
            azure_endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
            azure_region: "eastus".to_string(),
            deepl_endpoint: "https://api-free.deepl.com/v2/translate".to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            mullvad_vpn_config_dir: None,
            provider_keys: Provider::ALL.iter().map(|p| (*p, Vec::new())).collect(),
        }
    }
}

impl Settings {
    /// Repairs a freshly loaded record: clamps ranges, drops blank keys and
    /// enforces exactly one active credential per non-empty provider list.
    pub fn normalize(&mut self) {
        self.max_parallel_jobs = self.max_parallel_jobs.clamp(1, MAX_PARALLEL_JOBS_LIMIT);
        self.subtitle_max_downloads = self.subtitle_max_downloads.max(1);
        self.sync_similarity_threshold = self.sync_similarity_threshold.clamp(0.0, 1.0);

        self.subtitle_search_languages = self
            .subtitle_search_languages
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if self.subtitle_search_languages.is_empty() {
            self.subtitle_search_languages = vec!["en".to_string()];
        }

        if self
            .mullvad_vpn_config_dir
            .as_ref()
            .is_some_and(|d| d.as_os_str().is_empty())
        {
            self.mullvad_vpn_config_dir = None;
        }

        for provider in Provider::ALL {
            let keys = self.provider_keys.entry(provider).or_default();
            keys.retain(|k| !k.value.trim().is_empty());
            for key in keys.iter_mut() {
                key.value = key.value.trim().to_string();
                if key.vpn_config.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    key.vpn_config = None;
                }
            }
            normalize_active_flags(keys);
        }
    }

    pub fn policy_for(&self, provider: Provider) -> FailoverPolicy {
        FailoverPolicy {
            auto_change_key_on_error: self
                .auto_change_key_on_error
                .get(&provider)
                .copied()
                .unwrap_or(false),
            auto_switch_provider_on_error: self.auto_switch_on_error,
            retry_after_days: self.retry_after_days.get(&provider).copied().unwrap_or(0),
        }
    }

    pub fn credentials(&self, provider: Provider) -> &[ProviderCredential] {
        self.provider_keys
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn credentials_mut(&mut self, provider: Provider) -> &mut Vec<ProviderCredential> {
        self.provider_keys.entry(provider).or_default()
    }

    pub fn wait_ms_for(&self, provider: Provider) -> u64 {
        self.wait_ms.get(&provider).copied().unwrap_or(0)
    }

    /// Host path of the VPN config assigned to `credential`. `None` unless
    /// the config directory is set and holds a file by that name.
    pub fn vpn_config_path(&self, credential: &ProviderCredential) -> Option<PathBuf> {
        let dir = self.mullvad_vpn_config_dir.as_deref()?;
        let name = credential.vpn_config.as_deref()?;
        // Bare file names only; anything else could leave the directory.
        if Path::new(name).file_name() != Some(std::ffi::OsStr::new(name)) {
            log::warn!("Ignoring VPN config '{}': not a plain file name", name);
            return None;
        }
        let path = dir.join(name);
        if !path.is_file() {
            log::warn!("VPN config {} not found; translating without VPN", path.display());
            return None;
        }
        Some(path)
    }

    /// Subtitle providers that are enabled and carry credentials.
    pub fn usable_subtitle_providers(&self) -> Vec<(&str, &SubtitleProviderConfig)> {
        self.subtitle_providers
            .iter()
            .filter(|(_, cfg)| cfg.is_usable())
            .map(|(name, cfg)| (name.as_str(), cfg))
            .collect()
    }
}

fn per_provider<T: Copy>(value: T) -> BTreeMap<Provider, T> {
    Provider::ALL.iter().map(|p| (*p, value)).collect()
}

/// Keeps the first active flag, clears the rest, and promotes the first
/// credential when none is active.
fn normalize_active_flags(keys: &mut [ProviderCredential]) {
    let mut seen_active = false;
    for key in keys.iter_mut() {
        if key.active && !seen_active {
            seen_active = true;
        } else {
            key.active = false;
        }
    }
    if !seen_active {
        if let Some(first) = keys.first_mut() {
            first.active = true;
        }
    }
}
