use {
    crate::encoding::{
        FILE_ID_BASE64, TOKEN_BASE64, decode_token_bytes, encoded_len, is_file_id_char,
    },
    anyhow::{Error, Result, bail, ensure},
    base64::Engine,
    derive_more::Display,
    rand::{TryRngCore, rngs::OsRng},
    sha3::{Digest, Sha3_256},
    std::{
        fmt::{self, Debug, Display},
        str::FromStr,
    },
    subtle::ConstantTimeEq,
};

/// Number of random bytes behind a file id.
pub const FILE_ID_BYTES: usize = 16;
/// Length of a file id in the URL.
pub const FILE_ID_LENGTH: usize = encoded_len(FILE_ID_BYTES);
/// Number of bytes of an encrypted data key.
pub const TOKEN_BYTES: usize = 16;
/// Length of a token in the URL.
pub const TOKEN_LENGTH: usize = encoded_len(TOKEN_BYTES);
/// Length of SHA3-256 based values (key ids, MACs, chunk hashes).
pub const DIGEST_BYTES: usize = 32;

/// Public identifier of an encrypted file. Also names the file in storage.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(String);

impl FileId {
    #[inline]
    pub fn generate() -> Result<Self> {
        let mut bytes = [0_u8; FILE_ID_BYTES];
        OsRng.try_fill_bytes(&mut bytes)?;
        Ok(Self(FILE_ID_BASE64.encode(bytes)))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for FileId {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(
            s.len() == FILE_ID_LENGTH,
            "invalid file id length; got {}, expected {FILE_ID_LENGTH}",
            s.len(),
        );
        if let Some(c) = s.chars().find(|c| !is_file_id_char(*c)) {
            bail!("file id contains invalid character `{c}`");
        }
        Ok(Self(s.to_owned()))
    }
}

/// Capability token: the data key encrypted under the file's auth secret.
///
/// Whoever holds the token (and the matching filename) can download the file,
/// so it's never printed in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Token([u8; TOKEN_BYTES]);

impl Token {
    #[must_use]
    #[inline]
    pub fn from_ciphertext(ciphertext: [u8; TOKEN_BYTES]) -> Self {
        Self(ciphertext)
    }

    #[must_use]
    #[inline]
    pub fn ciphertext(&self) -> &[u8; TOKEN_BYTES] {
        &self.0
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        base64::display::Base64Display::new(&self.0, &TOKEN_BASE64)
    }
}

impl FromStr for Token {
    type Err = Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_token_bytes(s).map_err(|err| err.context("invalid token"))?))
    }
}

impl Debug for Token {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").finish()
    }
}

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; DIGEST_BYTES]);

        impl $name {
            #[must_use]
            #[inline]
            pub fn from_bytes(bytes: [u8; DIGEST_BYTES]) -> Self {
                Self(bytes)
            }

            #[must_use]
            #[inline]
            pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(
                    decode_token_bytes(s).map_err(|err| err.context(concat!("invalid ", $what)))?,
                ))
            }
        }

        impl Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&TOKEN_BASE64.encode(self.0))
            }
        }

        impl Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }
    };
}

digest_id!(
    /// Public identifier of an upload key: a one-way hash of the shared secret.
    KeyId,
    "key id"
);

digest_id!(
    /// SHA3-256 digest of an uploaded chunk.
    ChunkHash,
    "chunk hash"
);

digest_id!(
    /// HMAC-SHA3-256 authenticating an uploaded chunk.
    Mac,
    "mac"
);

impl ChunkHash {
    #[must_use]
    #[inline]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha3_256::digest(data).into())
    }

    /// Constant-time comparison with the digest of `data`.
    #[must_use]
    #[inline]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data).0[..].ct_eq(&self.0[..]).into()
    }
}
