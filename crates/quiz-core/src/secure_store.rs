//! Envelope store with TTL expiry, optional encryption and optional
//! validation on read.
//!
//! Every persisted entry is an [`Envelope`]:
//!
//! ```json
//! { "value": <json or ciphertext string>, "expiresAt": 1712000000000, "encrypted": true }
//! ```
//!
//! The read path never fails: expired, unparsable, undecryptable or invalid
//! entries are evicted and reported as absent. Only writes surface errors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::clock::Clock;
use crate::crypto::CryptoKeyManager;
use crate::error::{CryptoError, StoreError, ValidationError};

/// `expiresAt` of an entry written without a TTL.
pub const NEVER_EXPIRES: i64 = i64::MAX;
pub const DEFAULT_NAMESPACE: &str = "quiz-keep-";
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Common TTLs, in milliseconds.
pub mod ttl {
    pub const ONE_HOUR: i64 = 60 * 60 * 1000;
    pub const ONE_DAY: i64 = 24 * ONE_HOUR;
    pub const ONE_WEEK: i64 = 7 * ONE_DAY;
    pub const ONE_MONTH: i64 = 30 * ONE_DAY;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub value: Value,
    pub expires_at: i64,
    #[serde(default)]
    pub encrypted: bool,
}

impl Envelope {
    /// Live while `now < expiresAt`; a zero TTL is therefore already stale.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at != NEVER_EXPIRES && now_ms >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Relative to the time of the write; `None` never expires.
    pub ttl_ms: Option<i64>,
    pub encrypt: bool,
}

impl SetOptions {
    pub fn with_ttl(ttl_ms: i64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            encrypt: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }
}

/// Structural check applied to a decoded value before it is handed out.
pub trait Validator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), ValidationError>,
{
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self(value)
    }
}

/// Accepts exactly the values that deserialize into `T`.
pub struct Shape<T>(PhantomData<fn() -> T>);

impl<T> Shape<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Shape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Validator for Shape<T> {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        T::deserialize(value)
            .map(|_| ())
            .map_err(|e| ValidationError::new(e.to_string()))
    }
}

#[derive(Default)]
pub struct GetOptions<'a> {
    pub decrypt: bool,
    pub validate: Option<&'a dyn Validator>,
}

impl<'a> GetOptions<'a> {
    pub fn decrypted() -> Self {
        Self {
            decrypt: true,
            validate: None,
        }
    }

    pub fn validated(mut self, validator: &'a dyn Validator) -> Self {
        self.validate = Some(validator);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub used: usize,
    pub limit: usize,
}

/// Why a read came back empty.
#[derive(Debug)]
enum Miss {
    Absent,
    Expired,
    Parse(serde_json::Error),
    Decryption(CryptoError),
    Validation(ValidationError),
}

impl fmt::Display for Miss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Miss::Absent => f.write_str("absent"),
            Miss::Expired => f.write_str("expired"),
            Miss::Parse(e) => write!(f, "parse failure: {e}"),
            Miss::Decryption(e) => write!(f, "decryption failure: {e}"),
            Miss::Validation(e) => write!(f, "validation failure: {e}"),
        }
    }
}

pub struct SecureStore {
    durable: Arc<dyn StorageBackend>,
    keys: CryptoKeyManager,
    clock: Arc<dyn Clock>,
    namespace: String,
    quota_bytes: usize,
}

impl SecureStore {
    pub fn new(
        durable: Arc<dyn StorageBackend>,
        keys: CryptoKeyManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            durable,
            keys,
            clock,
            namespace: DEFAULT_NAMESPACE.to_string(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn keys(&self) -> &CryptoKeyManager {
        &self.keys
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let value = if options.encrypt {
            let plaintext = serde_json::to_string(value)?;
            Value::String(self.keys.seal(&plaintext)?)
        } else {
            serde_json::to_value(value)?
        };
        let envelope = Envelope {
            value,
            expires_at: options
                .ttl_ms
                .map_or(NEVER_EXPIRES, |ttl| now.saturating_add(ttl)),
            encrypted: options.encrypt,
        };
        // Fully serialized before the single backend write.
        let serialized = serde_json::to_string(&envelope)?;
        self.durable
            .set_item(key, &serialized)
            .map_err(|source| StoreError::QuotaExceeded {
                key: key.to_string(),
                source,
            })?;
        debug!(key, encrypted = envelope.encrypted, expires_at = envelope.expires_at, "stored entry");
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, options: GetOptions<'_>) -> Option<T> {
        match self.read(key, &options) {
            Ok(value) => Some(value),
            Err(Miss::Absent) => None,
            Err(Miss::Expired) => {
                info!(key, "entry expired, removing");
                self.evict(key);
                None
            }
            Err(miss) => {
                warn!(key, reason = %miss, "discarding unreadable entry");
                self.evict(key);
                None
            }
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str, options: &GetOptions<'_>) -> Result<T, Miss> {
        let raw = match self.durable.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(Miss::Absent),
            Err(err) => {
                warn!(key, error = %err, "durable read failed");
                return Err(Miss::Absent);
            }
        };
        let envelope: Envelope = serde_json::from_str(&raw).map_err(Miss::Parse)?;
        if envelope.is_expired(self.clock.now_ms()) {
            return Err(Miss::Expired);
        }

        let mut value = envelope.value;
        if options.decrypt && envelope.encrypted {
            let Value::String(blob) = &value else {
                return Err(Miss::Decryption(CryptoError::Decryption));
            };
            let plaintext = self.keys.open(blob).map_err(Miss::Decryption)?;
            value = serde_json::from_str(&plaintext).map_err(Miss::Parse)?;
        }

        if let Some(validator) = options.validate {
            validator.validate(&value).map_err(Miss::Validation)?;
        }
        serde_json::from_value(value).map_err(|e| Miss::Validation(ValidationError::new(e.to_string())))
    }

    fn evict(&self, key: &str) {
        if let Err(err) = self.durable.remove_item(key) {
            warn!(key, error = %err, "failed to evict entry");
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.durable.remove_item(key)?;
        Ok(())
    }

    /// Evict every expired entry under this store's namespace. Entries that
    /// do not parse as envelopes are left alone.
    pub fn sweep_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for key in self.durable.keys()? {
            if !key.starts_with(&self.namespace) {
                continue;
            }
            let Some(raw) = self.durable.get_item(&key)? else {
                continue;
            };
            let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) else {
                continue;
            };
            if envelope.is_expired(now) {
                info!(key = %key, "removing expired entry");
                self.durable.remove_item(&key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up expired entries");
        }
        Ok(removed)
    }

    pub fn clear_namespace(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self.durable.keys()? {
            if key.starts_with(prefix) {
                self.durable.remove_item(&key)?;
                removed += 1;
            }
        }
        info!(prefix, removed, "cleared namespace");
        Ok(removed)
    }

    /// Rough footprint, counted the way browsers bill local storage
    /// (two bytes per character).
    pub fn usage(&self) -> Result<StorageUsage, StoreError> {
        let mut used = 0;
        for key in self.durable.keys()? {
            if let Some(value) = self.durable.get_item(&key)? {
                used += (key.encode_utf16().count() + value.encode_utf16().count()) * 2;
            }
        }
        Ok(StorageUsage {
            used,
            limit: self.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use crate::crypto::DEFAULT_KEY_SLOT;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        durable: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        store: SecureStore,
    }

    fn fixture() -> Fixture {
        let durable = Arc::new(MemoryBackend::new());
        let volatile = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let store = SecureStore::new(
            durable.clone(),
            CryptoKeyManager::new(volatile, DEFAULT_KEY_SLOT),
            clock.clone(),
        );
        Fixture {
            durable,
            clock,
            store,
        }
    }

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct NumericAge {
        age: f64,
    }

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct TextAge {
        age: String,
    }

    #[test]
    fn plain_value_roundtrip_without_ttl() {
        let f = fixture();
        f.store
            .set("quiz-keep-a", &json!({"x": 1}), SetOptions::default())
            .unwrap();
        let raw = f.durable.get_item("quiz-keep-a").unwrap().unwrap();
        let envelope: Envelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope.expires_at, NEVER_EXPIRES);
        assert!(!envelope.encrypted);

        f.clock.advance(ttl::ONE_MONTH * 100);
        let value: Value = f.store.get("quiz-keep-a", GetOptions::default()).unwrap();
        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn negative_ttl_is_expired_on_next_read() {
        let f = fixture();
        f.store
            .set("quiz-keep-k", "v", SetOptions::with_ttl(-1000))
            .unwrap();
        assert_eq!(f.store.get::<String>("quiz-keep-k", GetOptions::default()), None);
        assert!(f.durable.get_item("quiz-keep-k").unwrap().is_none());
    }

    #[test]
    fn zero_ttl_is_expired_on_next_read() {
        let f = fixture();
        f.store.set("quiz-keep-k", "v", SetOptions::with_ttl(0)).unwrap();
        assert_eq!(f.store.get::<String>("quiz-keep-k", GetOptions::default()), None);
    }

    #[test]
    fn ttl_is_not_renewed_on_read() {
        let f = fixture();
        f.store
            .set("quiz-keep-k", "v", SetOptions::with_ttl(ttl::ONE_HOUR))
            .unwrap();
        f.clock.advance(ttl::ONE_HOUR - 1);
        assert_eq!(
            f.store.get::<String>("quiz-keep-k", GetOptions::default()).as_deref(),
            Some("v")
        );
        f.clock.advance(1);
        assert_eq!(f.store.get::<String>("quiz-keep-k", GetOptions::default()), None);
    }

    #[test]
    fn encrypted_roundtrip_hides_plaintext() {
        let f = fixture();
        f.store
            .set(
                "quiz-keep-email",
                "user@example.com",
                SetOptions::with_ttl(ttl::ONE_DAY).encrypted(),
            )
            .unwrap();
        let raw = f.durable.get_item("quiz-keep-email").unwrap().unwrap();
        assert!(!raw.contains("user@example.com"));
        let value: String = f
            .store
            .get("quiz-keep-email", GetOptions::decrypted())
            .unwrap();
        assert_eq!(value, "user@example.com");
    }

    #[test]
    fn undecryptable_entry_is_evicted() {
        let f = fixture();
        f.store
            .set("quiz-keep-email", "user@example.com", SetOptions::default().encrypted())
            .unwrap();
        f.store.keys().clear();
        assert_eq!(
            f.store.get::<String>("quiz-keep-email", GetOptions::decrypted()),
            None
        );
        assert!(f.durable.get_item("quiz-keep-email").unwrap().is_none());
    }

    #[test]
    fn corrupt_envelope_is_evicted() {
        let f = fixture();
        f.durable.set_item("quiz-keep-bad", "{not json").unwrap();
        assert_eq!(f.store.get::<Value>("quiz-keep-bad", GetOptions::default()), None);
        assert!(f.durable.get_item("quiz-keep-bad").unwrap().is_none());
    }

    #[test]
    fn validator_accepts_matching_shape() {
        let f = fixture();
        f.store
            .set("quiz-keep-user", &json!({"age": 25}), SetOptions::default())
            .unwrap();
        let numeric = Shape::<NumericAge>::new();
        let value: Value = f
            .store
            .get("quiz-keep-user", GetOptions::default().validated(&numeric))
            .unwrap();
        assert_eq!(value, json!({"age": 25}));
    }

    #[test]
    fn validator_rejection_evicts() {
        let f = fixture();
        f.store
            .set("quiz-keep-user", &json!({"age": 25}), SetOptions::default())
            .unwrap();
        let textual = Shape::<TextAge>::new();
        assert_eq!(
            f.store
                .get::<Value>("quiz-keep-user", GetOptions::default().validated(&textual)),
            None
        );
        assert!(f.durable.get_item("quiz-keep-user").unwrap().is_none());
    }

    #[test]
    fn closure_validator() {
        let f = fixture();
        f.store
            .set("quiz-keep-n", &json!(7), SetOptions::default())
            .unwrap();
        let even = |v: &Value| match v.as_i64() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err(ValidationError::new("expected an even number")),
        };
        assert_eq!(
            f.store.get::<i64>("quiz-keep-n", GetOptions::default().validated(&even)),
            None
        );
    }

    #[test]
    fn type_mismatch_is_treated_as_invalid() {
        let f = fixture();
        f.store
            .set("quiz-keep-n", &json!({"a": 1}), SetOptions::default())
            .unwrap();
        assert_eq!(f.store.get::<Vec<u32>>("quiz-keep-n", GetOptions::default()), None);
        assert!(f.durable.is_empty());
    }

    #[test]
    fn quota_exceeded_propagates() {
        let durable = Arc::new(MemoryBackend::with_quota(32));
        let store = SecureStore::new(
            durable,
            CryptoKeyManager::new(Arc::new(MemoryBackend::new()), DEFAULT_KEY_SLOT),
            Arc::new(ManualClock::new(NOW)),
        );
        let err = store
            .set("quiz-keep-big", &"x".repeat(256), SetOptions::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));
    }

    #[test]
    fn sweep_only_touches_expired_entries_in_namespace() {
        let f = fixture();
        f.store.set("quiz-keep-old", "a", SetOptions::with_ttl(10)).unwrap();
        f.store
            .set("quiz-keep-fresh", "b", SetOptions::with_ttl(ttl::ONE_WEEK))
            .unwrap();
        f.store.set("quiz-keep-forever", "c", SetOptions::default()).unwrap();
        f.store.set("foreign-old", "d", SetOptions::with_ttl(10)).unwrap();
        f.durable.set_item("quiz-keep-junk", "???").unwrap();

        f.clock.advance(ttl::ONE_HOUR);
        assert_eq!(f.store.sweep_expired().unwrap(), 1);
        let keys = f.durable.keys().unwrap();
        assert!(!keys.contains(&"quiz-keep-old".to_string()));
        assert!(keys.contains(&"quiz-keep-fresh".to_string()));
        assert!(keys.contains(&"quiz-keep-forever".to_string()));
        assert!(keys.contains(&"foreign-old".to_string()));
        assert!(keys.contains(&"quiz-keep-junk".to_string()));
    }

    #[test]
    fn clear_namespace_removes_prefixed_keys() {
        let f = fixture();
        f.store.set("quiz-keep-a", "a", SetOptions::default()).unwrap();
        f.store.set("quiz-keep-b", "b", SetOptions::default()).unwrap();
        f.store.set("other", "c", SetOptions::default()).unwrap();
        assert_eq!(f.store.clear_namespace("quiz-keep-").unwrap(), 2);
        assert_eq!(f.durable.keys().unwrap(), vec!["other".to_string()]);
    }

    #[test]
    fn usage_counts_two_bytes_per_char() {
        let f = fixture();
        f.durable.set_item("k", "vv").unwrap();
        let usage = f.store.usage().unwrap();
        assert_eq!(usage.used, 6);
        // counted in UTF-16 units, not UTF-8 bytes
        f.durable.set_item("k2", "é").unwrap();
        assert_eq!(f.store.usage().unwrap().used, 12);
        assert_eq!(usage.limit, DEFAULT_QUOTA_BYTES);
    }
}
