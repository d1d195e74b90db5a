//! Per-file encryption.
//!
//! Every file gets fresh random material: an auth secret, a data key and a data nonce.
//!
//! The file content is encrypted with AES-128 in counter mode. The 16-byte counter
//! block is the 8-byte data nonce followed by a 64-bit big-endian block counter that
//! starts at zero. Counter mode keeps the ciphertext exactly as long as the plaintext
//! and allows decryption to start at any block, which is what makes range requests
//! cheap: to read from plaintext offset `seek`, the cipher is started at block
//! `seek / 16` and the first `seek % 16` bytes of output are dropped.
//!
//! The data key is never stored. Instead it's encrypted with AES-128-GCM under the
//! auth secret, with the download filename as associated data. The resulting 16 bytes
//! of ciphertext are the capability token handed out in the download link. The GCM
//! tag, the nonce and the auth secret are stored in the file header:
//!
//! - token nonce (16 bytes)
//! - token tag (16 bytes)
//! - auth secret (16 bytes)
//! - data nonce (8 bytes)
//!
//! The header is followed by the ciphertext. Recovering the data key requires the
//! token and the exact filename the link was generated for; a wrong token, a wrong
//! filename or a modified header all fail the GCM tag check.

mod header;
mod stream;
mod token;

pub use {
    header::FileHeader,
    stream::{
        BLOCK_SIZE, DEFAULT_CHUNK_SIZE, DecryptingChunks, EncryptedFile, output_size,
        payload_size,
    },
    token::{AuthenticationError, DataKey, FileKey, generate, recover},
};

pub(crate) use stream::read_chunk;
