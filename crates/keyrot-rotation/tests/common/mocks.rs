//! Failure-injecting crypto primitive
//!
//! Wraps [`AgeCrypto`] and counts calls. Keypair generation can be made to
//! fail, any encrypt or decrypt call can be configured to fail by its 1-based
//! position, and a decrypt call can trip an abort handle.

#![allow(dead_code)]

use keyrot_rotation::AbortHandle;
use keyrot_secrets::{AgeCrypto, CryptoError, CryptoPrimitive, Identity, KeyPair, Recipient};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use zeroize::Zeroizing;

#[derive(Default)]
pub struct FaultyCrypto {
    inner: AgeCrypto,
    generates: AtomicUsize,
    encrypts: AtomicUsize,
    decrypts: AtomicUsize,
    fail_generate: bool,
    fail_encrypt_on: Option<usize>,
    fail_decrypt_on: Option<usize>,
    abort_on_decrypt: Mutex<Option<(usize, AbortHandle)>>,
}

impl FaultyCrypto {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }

    pub fn fail_encrypt_on(mut self, call: usize) -> Self {
        self.fail_encrypt_on = Some(call);
        self
    }

    pub fn fail_decrypt_on(mut self, call: usize) -> Self {
        self.fail_decrypt_on = Some(call);
        self
    }

    /// Trip `handle` when the `call`th decrypt happens
    pub fn abort_on_decrypt(&self, call: usize, handle: AbortHandle) {
        *self.abort_on_decrypt.lock().unwrap() = Some((call, handle));
    }

    pub fn generate_calls(&self) -> usize {
        self.generates.load(Ordering::SeqCst)
    }

    pub fn encrypt_calls(&self) -> usize {
        self.encrypts.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypts.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.generate_calls() + self.encrypt_calls() + self.decrypt_calls()
    }
}

impl CryptoPrimitive for FaultyCrypto {
    fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
        let call = self.generates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_generate {
            return Err(CryptoError::Encrypt(format!(
                "injected keypair failure on call {}",
                call
            )));
        }
        self.inner.generate_keypair()
    }

    fn encrypt(&self, plaintext: &[u8], recipients: &[Recipient]) -> Result<Vec<u8>, CryptoError> {
        let call = self.encrypts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_encrypt_on == Some(call) {
            return Err(CryptoError::Encrypt(format!("injected failure on call {}", call)));
        }
        self.inner.encrypt(plaintext, recipients)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        identity: &Identity,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let call = self.decrypts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, handle)) = self.abort_on_decrypt.lock().unwrap().as_ref() {
            if *at == call {
                handle.abort();
            }
        }
        if self.fail_decrypt_on == Some(call) {
            return Err(CryptoError::Decrypt(format!("injected failure on call {}", call)));
        }
        self.inner.decrypt(ciphertext, identity)
    }
}
