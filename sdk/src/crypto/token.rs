use {
    super::header::{DATA_NONCE_LENGTH, FileHeader, SECRET_LENGTH},
    aes_gcm::{
        AesGcm, KeyInit,
        aead::{self, AeadInPlace, consts::U16},
        aes::Aes128,
    },
    anyhow::{Result, format_err},
    derive_more::{Display, Error},
    filecrypt_protocol::{FileId, Token},
    rand::{TryRngCore, rngs::OsRng},
    std::fmt::{self, Debug},
};

/// AES-128-GCM with a 128-bit nonce.
type TokenCipher = AesGcm<Aes128, U16>;

/// The token doesn't match the file header or the filename.
///
/// This is the only signal of an invalid, forged or misdirected token.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("token authentication failed")]
pub struct AuthenticationError;

/// Key and nonce of the payload stream cipher.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey {
    pub(crate) key: [u8; SECRET_LENGTH],
    pub(crate) nonce: [u8; DATA_NONCE_LENGTH],
}

impl Debug for DataKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataKey").finish()
    }
}

/// Everything needed to write one encrypted file.
///
/// Returned by [`generate`]; consumed by [`FileKey::encrypt`] and [`FileKey::encrypt_file`].
#[derive(Debug, Clone)]
pub struct FileKey {
    pub(crate) file_id: FileId,
    pub(crate) header: FileHeader,
    pub(crate) data_key: DataKey,
}

impl FileKey {
    #[must_use]
    #[inline]
    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    #[must_use]
    #[inline]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0_u8; N];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

/// Creates key material for a new file that will be downloaded as `filename`.
///
/// The token is only valid together with this exact filename.
#[inline]
pub fn generate(filename: &str) -> Result<(FileId, Token, FileKey)> {
    let file_id = FileId::generate()?;
    let auth_secret = random_bytes::<SECRET_LENGTH>()?;
    let token_nonce = random_bytes::<SECRET_LENGTH>()?;
    let data_key = DataKey {
        key: random_bytes()?,
        nonce: random_bytes()?,
    };

    let mut ciphertext = data_key.key;
    let tag = TokenCipher::new(&auth_secret.into())
        .encrypt_in_place_detached(&token_nonce.into(), filename.as_bytes(), &mut ciphertext)
        .map_err(|err| format_err!("token encryption failed: {err}"))?;

    let header = FileHeader {
        token_nonce,
        token_tag: tag.into(),
        auth_secret,
        data_nonce: data_key.nonce,
    };
    let key = FileKey {
        file_id: file_id.clone(),
        header,
        data_key,
    };
    Ok((file_id, Token::from_ciphertext(ciphertext), key))
}

/// Recovers the data key of a file from its header, a token and the requested filename.
#[inline]
pub fn recover(
    header: &FileHeader,
    token: &Token,
    filename: &str,
) -> Result<DataKey, AuthenticationError> {
    let mut key = *token.ciphertext();
    TokenCipher::new(&header.auth_secret.into())
        .decrypt_in_place_detached(
            &header.token_nonce.into(),
            filename.as_bytes(),
            &mut key,
            &header.token_tag.into(),
        )
        .map_err(|aead::Error| AuthenticationError)?;
    Ok(DataKey {
        key,
        nonce: header.data_nonce,
    })
}
