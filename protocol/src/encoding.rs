use {
    anyhow::{Result, bail, ensure},
    base64::{
        Engine,
        alphabet::Alphabet,
        engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    },
};

/// Standard base64 alphabet with `-` in place of `/`, so that encoded values
/// can be used as URL path segments.
const TOKEN_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("invalid token alphabet"),
    };

/// Encoding of tokens, MACs, chunk hashes and key ids. Never padded.
pub const TOKEN_BASE64: GeneralPurpose = GeneralPurpose::new(
    &TOKEN_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// Encoding of file ids (URL-safe alphabet, no padding).
pub use base64::prelude::BASE64_URL_SAFE_NO_PAD as FILE_ID_BASE64;

/// Length of the unpadded base64 encoding of `bytes` bytes.
#[must_use]
#[inline]
pub const fn encoded_len(bytes: usize) -> usize {
    (bytes * 4).div_ceil(3)
}

#[inline]
pub(crate) fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '-'
}

#[inline]
pub(crate) fn is_file_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Checks the length and character set of `s`, then decodes it as exactly `N` bytes
/// in the token alphabet.
pub(crate) fn decode_token_bytes<const N: usize>(s: &str) -> Result<[u8; N]> {
    let expected_len = encoded_len(N);
    ensure!(
        s.len() == expected_len,
        "invalid length; got {}, expected {expected_len}",
        s.len(),
    );
    if let Some(c) = s.chars().find(|c| !is_token_char(*c)) {
        bail!("contains invalid character `{c}`");
    }
    let bytes = TOKEN_BASE64.decode(s)?;
    <[u8; N]>::try_from(bytes)
        .map_err(|bytes| anyhow::format_err!("invalid decoded length: {}", bytes.len()))
}
