//! Wire-level types shared by the filecrypt server, SDK and command-line tool.

pub mod credentials;
pub mod encoding;
pub mod ids;
pub mod mac;
pub mod range;
pub mod util;

pub use crate::{
    credentials::UploadKey,
    ids::{ChunkHash, FileId, KeyId, Mac, Token},
    range::ContentRange,
};

/// Size of the header that precedes the ciphertext in an encrypted file:
/// `token_nonce (16) || token_tag (16) || auth_secret (16) || data_nonce (8)`.
pub const HEADER_LENGTH: usize = 56;
