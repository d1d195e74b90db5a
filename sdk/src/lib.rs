//! Encryption engine and upload client of filecrypt.

pub mod client;
pub mod crypto;
