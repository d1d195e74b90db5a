//! Authentication of upload requests.
//!
//! The MAC covers the file id, the chunk digest and the `Content-Range` header,
//! so a captured chunk cannot be replayed for another file or at another offset.

use {
    crate::{
        credentials::UploadKey,
        ids::{ChunkHash, DIGEST_BYTES, FileId, Mac},
    },
    hmac::{Hmac, Mac as _},
    sha3::Sha3_256,
};

type HmacSha3 = Hmac<Sha3_256>;

/// Authenticated in place of the `Content-Range` value when the header is absent.
pub const NO_CONTENT_RANGE: &str = "none";

fn upload_hmac(
    key: &UploadKey,
    file_id: &FileId,
    chunk_hash: &ChunkHash,
    content_range: Option<&str>,
) -> HmacSha3 {
    let mut mac =
        HmacSha3::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(file_id.as_str().as_bytes());
    mac.update(chunk_hash.as_bytes());
    mac.update(content_range.unwrap_or(NO_CONTENT_RANGE).as_bytes());
    mac
}

#[must_use]
#[inline]
pub fn upload_mac(
    key: &UploadKey,
    file_id: &FileId,
    chunk_hash: &ChunkHash,
    content_range: Option<&str>,
) -> Mac {
    let bytes: [u8; DIGEST_BYTES] = upload_hmac(key, file_id, chunk_hash, content_range)
        .finalize()
        .into_bytes()
        .into();
    Mac::from_bytes(bytes)
}

/// Constant-time check of a MAC claimed by an upload request.
#[must_use]
#[inline]
pub fn verify_upload_mac(
    key: &UploadKey,
    file_id: &FileId,
    chunk_hash: &ChunkHash,
    content_range: Option<&str>,
    mac: &Mac,
) -> bool {
    upload_hmac(key, file_id, chunk_hash, content_range)
        .verify_slice(mac.as_bytes())
        .is_ok()
}
