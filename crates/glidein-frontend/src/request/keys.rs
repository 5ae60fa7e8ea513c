use std::sync::Arc;
use std::time::Instant;

use crate::Map;
use crate::common::config::ProtocolConfig;
use crate::common::error::FrontendError;
use crate::common::timeutils::now_monotonic;
use crate::crypto::{PublicKey, SessionKey, SymmetricKey, X25519PublicKey};
use crate::directory::{AttrValue, DirectoryRecord};

/// Session key bound to one target factory key.
pub struct FactoryKeys {
    /// Identity of the requester, echoed encrypted so the factory can detect spoofed records
    pub identity: String,
    pub pub_key_id: String,
    pub pub_key: Arc<dyn PublicKey>,
    session_key: Arc<dyn SymmetricKey>,
}

impl FactoryKeys {
    pub fn new(
        identity: &str,
        pub_key_id: &str,
        pub_key: Arc<dyn PublicKey>,
        session_key: Option<Arc<dyn SymmetricKey>>,
    ) -> Self {
        Self {
            identity: identity.to_string(),
            pub_key_id: pub_key_id.to_string(),
            pub_key,
            session_key: session_key.unwrap_or_else(|| Arc::new(SessionKey::generate())),
        }
    }

    pub fn session_key(&self) -> &Arc<dyn SymmetricKey> {
        &self.session_key
    }

    /// Appends the key id, the wrapped session key and the encrypted identity.
    pub fn push_key_attrs(
        &self,
        record: &mut DirectoryRecord,
        config: &ProtocolConfig,
    ) -> crate::Result<()> {
        let prefix = &config.request_prefix;
        record.push(format!("{prefix}PubKeyID"), self.pub_key_id.as_str());
        record.push(
            format!("{prefix}EncKeyCode"),
            self.pub_key.encrypt_hex(self.session_key.code())?,
        );
        record.push(
            format!("{prefix}EncIdentity"),
            self.encrypt_hex(self.identity.as_bytes())?,
        );
        Ok(())
    }

    pub fn encrypt_hex(&self, data: &[u8]) -> crate::Result<String> {
        self.session_key.encrypt_hex(data)
    }
}

struct CacheEntry {
    keys: Arc<FactoryKeys>,
    created_at: Instant,
    last_used_at: Instant,
}

/// Reuses session keys across requests sent to the same factory key.
#[derive(Default)]
pub struct KeyCache {
    entries: Map<String, CacheEntry>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the keys for `pub_key`.
    ///
    /// An explicit session key is always returned as given. It is cached only when there is
    /// no entry for the fingerprint yet, so it never replaces a key handed out before.
    pub fn get_or_create(
        &mut self,
        identity: &str,
        pub_key_id: &str,
        pub_key: Arc<dyn PublicKey>,
        explicit_key: Option<Arc<dyn SymmetricKey>>,
    ) -> Arc<FactoryKeys> {
        let fingerprint = pub_key.fingerprint();
        let now = now_monotonic();

        if let Some(explicit_key) = explicit_key {
            let keys = Arc::new(FactoryKeys::new(
                identity,
                pub_key_id,
                pub_key,
                Some(explicit_key),
            ));
            self.entries
                .entry(fingerprint)
                .or_insert_with(|| CacheEntry {
                    keys: keys.clone(),
                    created_at: now,
                    last_used_at: now,
                });
            return keys;
        }

        let entry = self.entries.entry(fingerprint).or_insert_with(|| {
            log::debug!("Generating a new session key for factory key {pub_key_id}");
            CacheEntry {
                keys: Arc::new(FactoryKeys::new(identity, pub_key_id, pub_key, None)),
                created_at: now,
                last_used_at: now,
            }
        });
        entry.last_used_at = now;
        entry.keys.clone()
    }

    /// Without thresholds, removes everything. Otherwise an entry survives only if it was
    /// created at or after `created_before` and used at or after `accessed_before`.
    pub fn prune(&mut self, created_before: Option<Instant>, accessed_before: Option<Instant>) {
        if created_before.is_none() && accessed_before.is_none() {
            self.entries.clear();
            return;
        }
        self.entries.retain(|_, entry| {
            let too_old = created_before.is_some_and(|limit| entry.created_at < limit);
            let unused = accessed_before.is_some_and(|limit| entry.last_used_at < limit);
            !(too_old || unused)
        });
    }
}

/// Reads the public key published in a factory record.
///
/// Returns `None` when the factory does not publish a key of the required type.
pub fn factory_public_key(
    attrs: &Map<String, AttrValue>,
    config: &ProtocolConfig,
) -> crate::Result<Option<(String, Arc<dyn PublicKey>)>> {
    let key_type = attrs.get("PubKeyType").and_then(|value| value.as_str());
    if key_type != Some(config.pub_key_type.as_str()) {
        return Ok(None);
    }
    let key_id = match attrs.get("PubKeyID") {
        Some(AttrValue::Str(id)) => id.clone(),
        Some(AttrValue::Int(id)) => id.to_string(),
        _ => return Ok(None),
    };
    let value = attrs
        .get("PubKeyValue")
        .and_then(|value| value.as_str())
        .ok_or_else(|| {
            FrontendError::CryptoError(format!("Factory key {key_id} has no PubKeyValue"))
        })?;
    let key: Arc<dyn PublicKey> = Arc::new(X25519PublicKey::from_hex(value)?);
    Ok(Some((key_id, key)))
}

#[cfg(test)]
mod tests {
    use super::{KeyCache, factory_public_key};
    use crate::Map;
    use crate::common::config::ProtocolConfig;
    use crate::common::timeutils::mock_time::MockTime;
    use crate::crypto::{PrivateKey, PublicKey, SessionKey, SymmetricKey, X25519PrivateKey};
    use crate::directory::{AttrValue, DirectoryRecord};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn public_key() -> Arc<dyn PublicKey> {
        Arc::new(X25519PrivateKey::generate().public_key().unwrap())
    }

    #[test]
    fn test_reuse_key() {
        let mut cache = KeyCache::new();
        let key = public_key();
        let a = cache.get_or_create("fe@host", "1", key.clone(), None);
        let b = cache.get_or_create("fe@host", "1", key, None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        let c = cache.get_or_create("fe@host", "2", public_key(), None);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_explicit_key_keeps_other_entries() {
        let mut cache = KeyCache::new();
        let first_key = public_key();
        let first = cache.get_or_create("fe@host", "1", first_key.clone(), None);

        let explicit: Arc<dyn SymmetricKey> = Arc::new(SessionKey::generate());
        let explicit_keys =
            cache.get_or_create("fe@host", "2", public_key(), Some(explicit.clone()));
        assert_eq!(explicit_keys.session_key().code(), explicit.code());
        assert_eq!(cache.len(), 2);

        let again = cache.get_or_create("fe@host", "1", first_key, None);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_explicit_key_does_not_replace() {
        let mut cache = KeyCache::new();
        let key = public_key();
        let cached = cache.get_or_create("fe@host", "1", key.clone(), None);

        let explicit: Arc<dyn SymmetricKey> = Arc::new(SessionKey::generate());
        let given = cache.get_or_create("fe@host", "1", key.clone(), Some(explicit));
        assert!(!Arc::ptr_eq(&cached, &given));

        let again = cache.get_or_create("fe@host", "1", key, None);
        assert!(Arc::ptr_eq(&cached, &again));
    }

    #[test]
    fn test_explicit_key_seeds_empty_slot() {
        let mut cache = KeyCache::new();
        let key = public_key();
        let explicit: Arc<dyn SymmetricKey> = Arc::new(SessionKey::generate());
        let given = cache.get_or_create("fe@host", "1", key.clone(), Some(explicit));
        let reused = cache.get_or_create("other@host", "1", key, None);
        assert!(Arc::ptr_eq(&given, &reused));
    }

    #[test]
    fn test_prune_by_creation() {
        let mut cache = KeyCache::new();
        let base = Instant::now();
        let old_key = public_key();
        {
            let _mock = MockTime::mock(base);
            cache.get_or_create("fe", "1", old_key.clone(), None);
        }
        let threshold = base + Duration::from_secs(10);
        {
            let _mock = MockTime::mock(threshold);
            cache.get_or_create("fe", "2", public_key(), None);
        }
        {
            // Accessing the old entry later must not save it
            let _mock = MockTime::mock(base + Duration::from_secs(20));
            cache.get_or_create("fe", "1", old_key, None);
        }
        cache.prune(Some(threshold), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_prune_by_access() {
        let mut cache = KeyCache::new();
        let base = Instant::now();
        let used_key = public_key();
        {
            let _mock = MockTime::mock(base);
            cache.get_or_create("fe", "1", used_key.clone(), None);
            cache.get_or_create("fe", "2", public_key(), None);
        }
        {
            let _mock = MockTime::mock(base + Duration::from_secs(30));
            cache.get_or_create("fe", "1", used_key.clone(), None);
        }
        cache.prune(None, Some(base + Duration::from_secs(10)));
        assert_eq!(cache.len(), 1);

        // Both thresholds must be satisfied to survive
        cache.prune(
            Some(base + Duration::from_secs(5)),
            Some(base + Duration::from_secs(10)),
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_prune_all() {
        let mut cache = KeyCache::new();
        cache.get_or_create("fe", "1", public_key(), None);
        cache.get_or_create("fe", "2", public_key(), None);
        cache.prune(None, None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_attrs_decryptable() {
        let config = ProtocolConfig::default();
        let private = X25519PrivateKey::generate();
        let public: Arc<dyn PublicKey> = Arc::new(private.public_key().unwrap());
        let mut cache = KeyCache::new();
        let keys = cache.get_or_create("fe@host", "7", public, None);

        let mut record = DirectoryRecord::new();
        keys.push_key_attrs(&mut record, &config).unwrap();
        assert_eq!(record.get_str("ReqPubKeyID"), Some("7"));

        let wrapped = hex::decode(record.get_str("ReqEncKeyCode").unwrap()).unwrap();
        let session = SessionKey::from_bytes(&private.decrypt(&wrapped).unwrap()).unwrap();
        let identity = hex::decode(record.get_str("ReqEncIdentity").unwrap()).unwrap();
        assert_eq!(session.decrypt(&identity).unwrap(), b"fe@host");
    }

    #[test]
    fn test_factory_public_key() {
        let config = ProtocolConfig::default();
        let public = X25519PrivateKey::generate().public_key().unwrap();
        let mut attrs = Map::new();
        attrs.insert("PubKeyType".to_string(), AttrValue::from("X25519"));
        attrs.insert("PubKeyID".to_string(), AttrValue::Int(12));
        attrs.insert("PubKeyValue".to_string(), AttrValue::from(public.to_hex()));

        let (id, key) = factory_public_key(&attrs, &config).unwrap().unwrap();
        assert_eq!(id, "12");
        assert_eq!(key.fingerprint(), public.fingerprint());

        attrs.insert("PubKeyType".to_string(), AttrValue::from("RSA"));
        assert!(factory_public_key(&attrs, &config).unwrap().is_none());

        attrs.insert("PubKeyType".to_string(), AttrValue::from("X25519"));
        attrs.insert("PubKeyValue".to_string(), AttrValue::from("zz"));
        assert!(factory_public_key(&attrs, &config).is_err());
    }
}
