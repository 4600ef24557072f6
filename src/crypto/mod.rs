//! Device signatures over proposed configs.
//!
//! - `verifier`: server-side Ed25519 verification of vote signatures
//! - `signing`: device-side key generation and config signing

pub mod signing;
pub mod verifier;

pub use signing::{DeviceKey, KeyError};
pub use verifier::{Ed25519Verifier, SignatureVerifier, VerifyError, ED25519_PUBLIC_KEY_LEN};
