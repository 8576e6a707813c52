//! Token encryption for Tandem.
//!
//! OAuth access and refresh tokens are sealed with AES-256-GCM before they
//! reach persistence. Each ciphertext is bound to a scope string (for example
//! `user-1:spotify:access`) through the AEAD associated data, so a blob copied
//! to another user's row fails to decrypt.
//!
//! Ciphertext layout is `nonce || sealed_output`, where the sealed output
//! carries the 16-byte authentication tag at its end.

mod cipher;
mod error;
mod key;

pub use cipher::{TokenCipher, NONCE_SIZE, TAG_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{TokenKey, KEY_SIZE};
