//! Identifier generation
//!
//! Produces short, hard-to-guess identifiers from an alphabet without
//! visually ambiguous characters.

use anyhow::Result;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, error, trace, warn};

use crate::error::RendezvousError;

/// Characters an identifier may contain. `0 O o 1 I l` are left out.
pub const UID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz";

/// Default identifier length
pub const DEFAULT_UID_LENGTH: usize = 8;

/// Shortest identifier length accepted by configuration
pub const MIN_UID_LENGTH: usize = 4;

/// Longest identifier length accepted by configuration
pub const MAX_UID_LENGTH: usize = 32;

/// Consecutive collisions tolerated before giving up
const MAX_ATTEMPTS: usize = 64;

/// Generates identifiers from the operating system CSPRNG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidGenerator {
    length: usize,
}

impl UidGenerator {
    /// Create a generator for identifiers of `length` characters
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Length of the identifiers this generator produces
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a single identifier.
    ///
    /// Random bytes that would bias the distribution are rejected and
    /// redrawn. A failing random source is an error; there is no fallback.
    pub fn generate(&self) -> Result<String> {
        let alphabet_len = UID_ALPHABET.len();
        // Largest multiple of the alphabet size that fits in a byte
        let zone = (256 / alphabet_len) * alphabet_len;

        let mut uid = String::with_capacity(self.length);
        let mut bytes = [0u8; 32];

        while uid.len() < self.length {
            OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
                error!("Secure random source failed: {}", e);
                RendezvousError::identifier_error_with_source("Secure random source failed", e.to_string())
            })?;

            for &byte in bytes.iter() {
                if uid.len() == self.length {
                    break;
                }
                if (byte as usize) < zone {
                    uid.push(UID_ALPHABET[byte as usize % alphabet_len] as char);
                }
            }
        }

        trace!("Generated candidate uid");
        Ok(uid)
    }

    /// Generate an identifier for which `exists` returns false.
    ///
    /// Callers that need uniqueness against a shared set must hold that
    /// set's lock across this call and the subsequent insert.
    pub fn generate_unique<F>(&self, exists: F) -> Result<String>
    where
        F: Fn(&str) -> bool,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let uid = self.generate()?;
            if !exists(&uid) {
                debug!("Generated unique uid after {} attempt(s)", attempt);
                return Ok(uid);
            }
            warn!("Generated uid collided with a pending one, retrying");
        }

        error!("Identifier space exhausted after {} attempts", MAX_ATTEMPTS);
        Err(RendezvousError::identifier_error_with_source(
            "Identifier space exhausted",
            format!("{} consecutive collisions", MAX_ATTEMPTS)
        ).into())
    }

    /// Check that `uid` has the expected length
    pub fn is_valid_length(&self, uid: &str) -> bool {
        uid.len() == self.length
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_UID_LENGTH)
    }
}
