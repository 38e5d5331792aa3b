//! Credential and provider failover for translation jobs.
//!
//! The decision functions are pure: they look only at the credential list,
//! the policy and the supplied clock value. [`run_translation_with_failover`]
//! drives them across attempts, re-reading the settings at the start of each
//! attempt and writing them back after every mutation.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info_span;

use crate::error::ConfigError;
use crate::jobs::CancellationToken;
use crate::settings::{FailoverPolicy, Provider, ProviderCredential, SettingsStore};
use crate::tools::{ToolError, TranslationRequest, Translator};

/// Attempts per translation job: the current provider, then one fallback.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Returns the credential flagged active, with its index.
///
/// A non-empty list with no active flag yields `None`; repairing that is the
/// settings loader's job.
pub fn select_active_credential(
    credentials: &[ProviderCredential],
) -> Option<(usize, &ProviderCredential)> {
    credentials.iter().enumerate().find(|(_, c)| c.active)
}

fn in_cooldown(credential: &ProviderCredential, policy: &FailoverPolicy, now: DateTime<Utc>) -> bool {
    if policy.retry_after_days == 0 {
        return false;
    }
    match credential.last_error_at {
        Some(failed_at) => (now - failed_at).num_days() < i64::from(policy.retry_after_days),
        None => false,
    }
}

/// Moves the active flag to the next eligible credential.
///
/// Scans cyclically from the slot after the active one (slot 0 counts as
/// active when none is flagged), skipping credentials still in cooldown.
/// Returns `false` and leaves the list untouched when there are fewer than
/// two credentials or every other candidate is cooling down.
pub fn advance_to_next_credential(
    credentials: &mut [ProviderCredential],
    policy: &FailoverPolicy,
    now: DateTime<Utc>,
) -> bool {
    let len = credentials.len();
    if len < 2 {
        return false;
    }

    let current = select_active_credential(credentials)
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let next = (1..len)
        .map(|offset| (current + offset) % len)
        .find(|&idx| !in_cooldown(&credentials[idx], policy, now));

    match next {
        Some(next) => {
            for (idx, credential) in credentials.iter_mut().enumerate() {
                credential.active = idx == next;
            }
            true
        }
        None => false,
    }
}

/// Fixed rotation order: DeepL → Azure → Gemini → DeepL.
pub fn next_provider(current: Provider) -> Provider {
    match current {
        Provider::DeepL => Provider::Azure,
        Provider::Azure => Provider::Gemini,
        Provider::Gemini => Provider::DeepL,
    }
}

/// Files involved in one translation job.
#[derive(Debug, Clone, Copy)]
pub struct TranslationTarget<'a> {
    pub root: &'a Path,
    pub input: &'a Path,
    pub output: &'a Path,
    pub target_lang: &'a str,
}

/// How a failover run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverOutcome {
    pub success: bool,
    pub message: String,
    /// Provider used by the last attempt.
    pub provider: Provider,
    pub attempts: u32,
}

impl FailoverOutcome {
    fn failed(message: impl Into<String>, provider: Provider, attempts: u32) -> Self {
        Self {
            success: false,
            message: message.into(),
            provider,
            attempts,
        }
    }
}

/// Translates `target`, rotating keys and providers on failure.
///
/// Each failed attempt records `last_error`/`last_error_at` on the key used.
/// Key rotation is tried first when the provider's policy allows it; a
/// provider switch is only considered when rotation changed nothing and
/// attempts remain. Configuration defects (no keys, no active key) end the
/// run immediately. Errors from the settings store are returned as `Err`.
pub fn run_translation_with_failover(
    settings_store: &dyn SettingsStore,
    translator: &dyn Translator,
    target: &TranslationTarget<'_>,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<FailoverOutcome, ConfigError> {
    let max_attempts = max_attempts.max(1);
    let mut last_error = String::from("Translation failed after all attempts");
    let mut provider = Provider::DeepL;

    for attempt in 0..max_attempts {
        let mut settings = settings_store.load()?;
        provider = settings.provider;

        let (idx, credential) = {
            let credentials = settings.credentials(provider);
            if credentials.is_empty() {
                return Ok(FailoverOutcome::failed(
                    format!("No API keys configured for {}", provider),
                    provider,
                    attempt,
                ));
            }
            match select_active_credential(credentials) {
                Some((idx, c)) => (idx, c.clone()),
                None => {
                    return Ok(FailoverOutcome::failed(
                        format!("No active API key for {}", provider),
                        provider,
                        attempt,
                    ))
                }
            }
        };

        let _span = info_span!("attempt",
            attempt = attempt + 1,
            provider = %provider,
            key = %credential.masked(),
        )
        .entered();

        let request = TranslationRequest {
            root: target.root,
            input: target.input,
            output: target.output,
            target_lang: target.target_lang,
            provider,
            api_key: credential.secret(),
            wait_ms: settings.wait_ms_for(provider),
            azure_endpoint: &settings.azure_endpoint,
            azure_region: &settings.azure_region,
            vpn_config: settings.vpn_config_path(&credential),
        };
        let result = translator.translate(&request, cancel);
        drop(request);
        let now = Utc::now();

        let error = match result {
            Ok(()) => {
                settings.credentials_mut(provider)[idx].last_usage = Some(now);
                settings_store.save(&settings)?;
                log::info!(
                    "Translation completed with {} key {}",
                    provider,
                    credential.masked()
                );
                return Ok(FailoverOutcome {
                    success: true,
                    message: format!("Translation completed using {}", provider),
                    provider,
                    attempts: attempt + 1,
                });
            }
            Err(ToolError::Cancelled) => {
                return Ok(FailoverOutcome::failed("Translation cancelled", provider, attempt + 1));
            }
            Err(e) => e.to_string(),
        };

        log::warn!(
            "Translation failed with {} key {}: {}",
            provider,
            credential.masked(),
            error
        );
        {
            let failed = &mut settings.credentials_mut(provider)[idx];
            failed.last_error = Some(error.clone());
            failed.last_error_at = Some(now);
        }

        let policy = settings.policy_for(provider);
        let mut switched = false;

        if policy.auto_change_key_on_error
            && advance_to_next_credential(settings.credentials_mut(provider), &policy, now)
        {
            if let Some((_, next)) = select_active_credential(settings.credentials(provider)) {
                log::info!("Switched {} to key {}", provider, next.masked());
            }
            switched = true;
        }

        if !switched && policy.auto_switch_provider_on_error && attempt + 1 < max_attempts {
            let next = next_provider(provider);
            log::info!("Switching translation provider from {} to {}", provider, next);
            settings.provider = next;
            switched = true;
        }

        settings_store.save(&settings)?;

        if !switched {
            return Ok(FailoverOutcome::failed(error, provider, attempt + 1));
        }
        last_error = error;
    }

    Ok(FailoverOutcome::failed(last_error, provider, max_attempts))
}
