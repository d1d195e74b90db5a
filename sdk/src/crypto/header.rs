use std::{
    fmt::{self, Debug},
    io::{self, Read, Write},
};

pub(crate) const SECRET_LENGTH: usize = 16;
pub(crate) const DATA_NONCE_LENGTH: usize = 8;

/// Public part of the per-file key material, stored in front of the ciphertext.
#[derive(Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub token_nonce: [u8; SECRET_LENGTH],
    pub token_tag: [u8; SECRET_LENGTH],
    pub auth_secret: [u8; SECRET_LENGTH],
    pub data_nonce: [u8; DATA_NONCE_LENGTH],
}

impl FileHeader {
    /// Reads exactly [`HEADER_LENGTH`](filecrypt_protocol::HEADER_LENGTH) bytes.
    /// Fails with `UnexpectedEof` on a short file.
    #[inline]
    pub fn read_from(mut reader: impl Read) -> io::Result<Self> {
        let mut header = Self {
            token_nonce: [0; SECRET_LENGTH],
            token_tag: [0; SECRET_LENGTH],
            auth_secret: [0; SECRET_LENGTH],
            data_nonce: [0; DATA_NONCE_LENGTH],
        };
        reader.read_exact(&mut header.token_nonce)?;
        reader.read_exact(&mut header.token_tag)?;
        reader.read_exact(&mut header.auth_secret)?;
        reader.read_exact(&mut header.data_nonce)?;
        Ok(header)
    }

    #[inline]
    pub fn write_to(&self, mut writer: impl Write) -> io::Result<()> {
        writer.write_all(&self.token_nonce)?;
        writer.write_all(&self.token_tag)?;
        writer.write_all(&self.auth_secret)?;
        writer.write_all(&self.data_nonce)?;
        Ok(())
    }

    /// Parses the first [`HEADER_LENGTH`](filecrypt_protocol::HEADER_LENGTH) bytes of `bytes`.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        Self::read_from(bytes)
    }

    #[must_use]
    #[inline]
    pub fn to_bytes(&self) -> Vec<u8> {
        [
            &self.token_nonce[..],
            &self.token_tag[..],
            &self.auth_secret[..],
            &self.data_nonce[..],
        ]
        .concat()
    }
}

impl Debug for FileHeader {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHeader").finish_non_exhaustive()
    }
}
