use {
    crate::ids::KeyId,
    anyhow::{Error, ensure},
    rand::{
        distr::{Alphanumeric, SampleString},
        rand_core,
        rngs::OsRng,
    },
    serde::{Deserialize, Serialize},
    sha3::{Digest, Sha3_256},
    std::{
        fmt::{self, Debug},
        str::FromStr,
    },
};

/// Domain separation prefix for key ids.
const KEY_ID_PREFIX: &[u8] = b"FILECRYPT_KEY_ID";

const GENERATED_KEY_LENGTH: usize = 64;

/// Shared secret authorizing chunk uploads.
///
/// The secret itself is never sent to the server; requests name it by its
/// [`KeyId`] and prove possession with a MAC.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadKey(String);

impl UploadKey {
    #[must_use]
    #[inline]
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut rand_core::UnwrapErr(OsRng), GENERATED_KEY_LENGTH))
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[must_use]
    #[inline]
    pub fn as_unmasked_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn key_id(&self) -> KeyId {
        let mut hasher = Sha3_256::new();
        hasher.update(KEY_ID_PREFIX);
        hasher.update(self.as_bytes());
        KeyId::from_bytes(hasher.finalize().into())
    }
}

impl FromStr for UploadKey {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(!s.is_empty(), "upload key cannot be empty");
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for UploadKey {
    type Error = Error;

    #[inline]
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ensure!(!value.is_empty(), "upload key cannot be empty");
        Ok(Self(value))
    }
}

impl From<UploadKey> for String {
    #[inline]
    fn from(value: UploadKey) -> Self {
        value.0
    }
}

impl Debug for UploadKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}
