use {
    anyhow::{Result, bail},
    filecrypt_protocol::{KeyId, UploadKey},
    std::collections::{HashMap, hash_map::Entry},
};

/// Upload keys accepted by the server, indexed by their public id.
#[derive(Debug, Default)]
pub struct UploadKeys(HashMap<KeyId, UploadKey>);

impl UploadKeys {
    pub fn new(keys: impl IntoIterator<Item = UploadKey>) -> Result<Self> {
        let mut map = HashMap::new();
        for key in keys {
            match map.entry(key.key_id()) {
                Entry::Occupied(entry) => bail!("duplicate upload key {:?}", entry.key()),
                Entry::Vacant(entry) => {
                    entry.insert(key);
                }
            }
        }
        Ok(Self(map))
    }

    #[must_use]
    pub fn get(&self, key_id: &KeyId) -> Option<&UploadKey> {
        self.0.get(key_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
