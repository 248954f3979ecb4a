//! Typed, file-backed store of per-provider credentials (C1).

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// How a provider's credential was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Key,
    Oauth,
}

/// One provider's credential record.
///
/// `project_id` is overloaded by provider: GCP project for `vertex`/Code-Assist
/// providers, resource name for `azure`, region for `bedrock`'s secret slot. See the
/// provider registry's binding-policy table for the exact meaning per provider id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
    #[serde(
        default,
        rename = "expires",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at_epoch_ms: Option<i64>,
    #[serde(default, rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<CredentialKind>,
    #[serde(default, rename = "enabledModels")]
    pub enabled_models: Vec<String>,
}

impl CredentialRecord {
    #[must_use]
    pub fn is_oauth(&self) -> bool {
        matches!(self.kind, Some(CredentialKind::Oauth))
    }

    /// True when the token expires within `margin_ms` of now, or has no known
    /// expiry (treated as expired so a refresh is attempted).
    #[must_use]
    pub fn expiring_within(&self, now_epoch_ms: i64, margin_ms: i64) -> bool {
        match self.expires_at_epoch_ms {
            Some(exp) => exp - now_epoch_ms < margin_ms,
            None => self.is_oauth(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(flatten)]
    providers: FxHashMap<String, CredentialRecord>,
}

/// Resolves `${XDG_CONFIG_HOME:-$HOME/.config}/ai-gateway/auth.json`.
#[must_use]
pub fn default_credentials_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    base.join("ai-gateway").join("auth.json")
}

/// Legacy read-only fallback location, consulted only when the primary store has no
/// entry for a requested provider.
#[must_use]
pub fn legacy_fallback_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/pi/auth.json"))
}

/// In-memory, write-through credential store (C1).
///
/// Holds one lock per provider so a refresh for `openai` never blocks a concurrent
/// read of `anthropic`, while still serializing concurrent writers to the same
/// provider entry.
pub struct CredentialStore {
    path: PathBuf,
    records: Mutex<FxHashMap<String, Arc<Mutex<CredentialRecord>>>>,
}

impl CredentialStore {
    /// Load the store from `path`. Never fails: a missing file, unreadable file, or
    /// malformed JSON yields an empty store and a single warning log.
    #[must_use]
    pub fn load(path: PathBuf) -> Self {
        let records = read_credential_file(&path)
            .or_else(|| {
                legacy_fallback_path()
                    .filter(|fallback| fallback != &path)
                    .and_then(|fallback| read_credential_file(&fallback))
            })
            .unwrap_or_default();

        let records = records
            .into_iter()
            .map(|(id, record)| (id, Arc::new(Mutex::new(record))))
            .collect();

        Self {
            path,
            records: Mutex::new(records),
        }
    }

    #[must_use]
    pub fn load_default() -> Self {
        Self::load(default_credentials_path())
    }

    /// Fetch a provider's credential record, cloned.
    #[must_use]
    pub fn get(&self, provider_id: &str) -> Option<CredentialRecord> {
        self.records
            .lock()
            .get(provider_id)
            .map(|slot| slot.lock().clone())
    }

    /// Replace a provider's credential record and write the store through to disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the atomic replace of the backing file fails.
    pub fn put(&self, provider_id: &str, record: CredentialRecord) -> std::io::Result<()> {
        let slot = {
            let mut records = self.records.lock();
            records
                .entry(provider_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CredentialRecord::default())))
                .clone()
        };
        *slot.lock() = record;
        self.flush()
    }

    /// Returns a per-provider lock, for callers (the registry's refresh path) that
    /// need to read-then-conditionally-write without a second store-wide lock.
    #[must_use]
    pub fn provider_lock(&self, provider_id: &str) -> Arc<Mutex<CredentialRecord>> {
        self.records
            .lock()
            .entry(provider_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CredentialRecord::default())))
            .clone()
    }

    /// Snapshot of every provider's current record.
    #[must_use]
    pub fn list(&self) -> FxHashMap<String, CredentialRecord> {
        self.records
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.lock().clone()))
            .collect()
    }

    fn flush(&self) -> std::io::Result<()> {
        let snapshot: FxHashMap<String, CredentialRecord> = self
            .records
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.lock().clone()))
            .collect();
        write_credential_file(&self.path, &snapshot)
    }
}

fn read_credential_file(path: &Path) -> Option<FxHashMap<String, CredentialRecord>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read credential file");
            return None;
        }
    };
    match serde_json::from_str::<CredentialFile>(&contents) {
        Ok(file) => Some(file.providers),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "malformed credential file, ignoring");
            None
        }
    }
}

/// Atomically replace the credential file: write to a sibling temp path, then
/// rename over the target (rename is atomic on the same filesystem on Unix).
fn write_credential_file(
    path: &Path,
    providers: &FxHashMap<String, CredentialRecord>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = CredentialFile {
        providers: providers.clone(),
    };
    let body = serde_json::to_vec_pretty(&file)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ai-gateway-credtest-{name}-{}", std::process::id()))
    }

    #[test]
    fn missing_file_yields_empty_store() {
        let store = CredentialStore::load(tmp_path("missing"));
        assert!(store.get("openai").is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn malformed_json_yields_empty_store_not_fatal() {
        let path = tmp_path("malformed");
        std::fs::write(&path, b"not json at all").unwrap();
        let store = CredentialStore::load(path.clone());
        assert!(store.list().is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn put_then_get_roundtrips_and_persists() {
        let path = tmp_path("roundtrip");
        let store = CredentialStore::load(path.clone());
        let record = CredentialRecord {
            api_key: Some("sk-test".to_string()),
            kind: Some(CredentialKind::Key),
            ..Default::default()
        };
        store.put("openai", record).unwrap();

        let fetched = store.get("openai").expect("just-written record");
        assert_eq!(fetched.api_key.as_deref(), Some("sk-test"));

        let reloaded = CredentialStore::load(path.clone());
        let fetched = reloaded.get("openai").expect("persisted record");
        assert_eq!(fetched.api_key.as_deref(), Some("sk-test"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn expiring_within_margin_is_true_for_oauth_without_expiry() {
        let record = CredentialRecord {
            kind: Some(CredentialKind::Oauth),
            ..Default::default()
        };
        assert!(record.expiring_within(1_000_000, 300_000));
    }

    #[test]
    fn wire_field_names_match_the_documented_credential_file_shape() {
        let record = CredentialRecord {
            api_key: Some("sk-test".to_string()),
            refresh: Some("rtok".to_string()),
            expires_at_epoch_ms: Some(42),
            project_id: Some("proj-1".to_string()),
            kind: Some(CredentialKind::Oauth),
            enabled_models: vec!["gpt-4o-mini".to_string()],
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["apiKey"], "sk-test");
        assert_eq!(value["refresh"], "rtok");
        assert_eq!(value["expires"], 42);
        assert_eq!(value["projectId"], "proj-1");
        assert_eq!(value["type"], "oauth");
        assert_eq!(value["enabledModels"][0], "gpt-4o-mini");

        let roundtripped: CredentialRecord = serde_json::from_value(value).unwrap();
        assert_eq!(roundtripped.api_key.as_deref(), Some("sk-test"));
        assert_eq!(roundtripped.expires_at_epoch_ms, Some(42));
    }

    #[test]
    fn expiring_within_margin_respects_explicit_expiry() {
        let record = CredentialRecord {
            kind: Some(CredentialKind::Oauth),
            expires_at_epoch_ms: Some(1_000_000),
            ..Default::default()
        };
        assert!(!record.expiring_within(0, 300_000));
        assert!(record.expiring_within(900_000, 300_000));
    }
}
