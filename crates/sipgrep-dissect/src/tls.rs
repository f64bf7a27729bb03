//! TLS record-layer framing. Decryption is pluggable via [`TlsDecryptor`]:
//! this crate ships only a `NullDecryptor` (passthrough, for captures of
//! already-plaintext traffic wrapped for test purposes) since a real
//! AES-GCM/ChaCha20-Poly1305 implementation keyed off a keylog file is a
//! project of its own; production deployments plug in a decryptor backed
//! by `rustls`'s key-logging support. Without a configured decryptor, the
//! dissector yields `None`, exactly as the distilled spec requires
//! ("Without keys, yield none").

use sipgrep_core::Packet;

use crate::dissector::Dissector;

const CONTENT_TYPE_APPLICATION_DATA: u8 = 23;

/// Decrypts a TLS `ApplicationData` record's ciphertext given the 4-tuple
/// it arrived on. Implementations key themselves off whatever secret
/// material a `tls.keyfile` config entry pointed at.
pub trait TlsDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// Passthrough decryptor: treats the "ciphertext" as already-plaintext.
/// Exists so the dissector chain and its tests have a concrete decryptor
/// to exercise without depending on a real TLS stack.
pub struct NullDecryptor;

impl TlsDecryptor for NullDecryptor {
    fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
        Some(ciphertext.to_vec())
    }
}

pub struct TlsDissector<'d> {
    pub decryptor: Option<&'d dyn TlsDecryptor>,
}

impl<'d> Dissector for TlsDissector<'d> {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn dissect(&self, _packet: &mut Packet, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.len() < 5 {
            return None;
        }
        let content_type = bytes[0];
        let record_len = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        if bytes.len() < 5 + record_len {
            return None;
        }
        if content_type != CONTENT_TYPE_APPLICATION_DATA {
            return None;
        }
        let ciphertext = &bytes[5..5 + record_len];
        let decryptor = self.decryptor?;
        decryptor.decrypt(ciphertext)
    }
}
