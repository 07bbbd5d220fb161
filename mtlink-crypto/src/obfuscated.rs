//! [Obfuscated2] stream cipher setup.
//!
//! The client opens the connection with a random 64-byte header. Bytes
//! `8..56` of it seed two AES-256-CTR streams, one per direction; the
//! protocol tag hidden at `56..60` tells the server which framing follows.
//!
//! [Obfuscated2]: https://core.telegram.org/mtproto/mtproto-transports#transport-obfuscation

use std::io;

use aes::cipher::generic_array::GenericArray;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::sha256;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// First words a header must never start with, or the server would read the
/// connection as plain HTTP or as an unobfuscated transport.
const RESERVED_PREFIXES: [[u8; 4]; 6] = [
    *b"HEAD",
    *b"POST",
    *b"GET ",
    *b"OPTI",
    [0xdd; 4],
    [0xee; 4],
];

/// One direction of an obfuscated connection.
pub struct CtrStream(Aes256Ctr);

impl CtrStream {
    fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self(Aes256Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)))
    }

    /// XOR `data` in place with the next bytes of the keystream.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

impl std::fmt::Debug for CtrStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CtrStream(..)")
    }
}

/// Keys for one obfuscated connection, as seen from the side that built it.
#[derive(Debug)]
pub struct Obfuscation {
    /// The header to send before anything else.
    pub header: [u8; 64],
    /// Outgoing keystream.
    pub encryptor: CtrStream,
    /// Incoming keystream.
    pub decryptor: CtrStream,
}

fn derive(material: &[u8], secret: Option<&[u8; 16]>) -> ([u8; 32], [u8; 16]) {
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&material[..32]);
    iv.copy_from_slice(&material[32..48]);
    if let Some(secret) = secret {
        key = sha256(&[&key, secret]);
    }
    (key, iv)
}

/// `(forward, backward)` streams for the nonce bytes `8..56`.
fn streams(nonce: &[u8; 64], secret: Option<&[u8; 16]>) -> (CtrStream, CtrStream) {
    let (key, iv) = derive(&nonce[8..56], secret);
    let mut reversed = [0u8; 48];
    reversed.copy_from_slice(&nonce[8..56]);
    reversed.reverse();
    let (rkey, riv) = derive(&reversed, secret);
    (CtrStream::new(&key, &iv), CtrStream::new(&rkey, &riv))
}

/// Whether a random 64-byte nonce may be used as a header.
pub fn is_valid_nonce(nonce: &[u8; 64]) -> bool {
    nonce[0] != 0xef
        && !RESERVED_PREFIXES.iter().any(|p| nonce[..4] == p[..])
        && nonce[4..8] != [0u8; 4]
}

impl Obfuscation {
    /// Build a fresh client header for `protocol_tag` (e.g. `[0xef; 4]` for
    /// abridged framing).
    ///
    /// With an MTProxy `secret`, both keys are mixed with it and `dc_id` is
    /// embedded so the proxy knows where to forward.
    pub fn new(protocol_tag: [u8; 4], secret: Option<&[u8; 16]>, dc_id: i16) -> io::Result<Self> {
        let mut nonce = [0u8; 64];
        loop {
            getrandom::getrandom(&mut nonce).map_err(|e| io::Error::other(e.to_string()))?;
            if is_valid_nonce(&nonce) {
                break;
            }
        }
        Ok(Self::from_nonce(nonce, protocol_tag, secret, dc_id))
    }

    /// Deterministic variant of [`Obfuscation::new`] over a caller-chosen nonce.
    pub fn from_nonce(mut nonce: [u8; 64], protocol_tag: [u8; 4], secret: Option<&[u8; 16]>, dc_id: i16) -> Self {
        nonce[56..60].copy_from_slice(&protocol_tag);
        if secret.is_some() {
            nonce[60..62].copy_from_slice(&dc_id.to_le_bytes());
        }
        let (mut encryptor, decryptor) = streams(&nonce, secret);

        let mut encrypted = nonce;
        encryptor.apply(&mut encrypted);
        let mut header = nonce;
        header[56..].copy_from_slice(&encrypted[56..]);

        Self { header, encryptor, decryptor }
    }

    /// Accept a header on the receiving end of a connection.
    ///
    /// Returns the protocol tag together with the streams for that side:
    /// `encryptor` for data sent back, `decryptor` for the client's data.
    pub fn accept(header: &[u8; 64], secret: Option<&[u8; 16]>) -> ([u8; 4], Self) {
        let (mut decryptor, encryptor) = streams(header, secret);
        let mut plain = *header;
        decryptor.apply(&mut plain);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&plain[56..60]);
        (tag, Self { header: *header, encryptor, decryptor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nonce() -> [u8; 64] {
        let mut nonce = [0u8; 64];
        for (i, b) in nonce.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37).wrapping_add(11);
        }
        nonce
    }

    #[test]
    fn header_keeps_nonce_prefix_and_hides_tag() {
        let nonce = sample_nonce();
        let obf = Obfuscation::from_nonce(nonce, [0xef; 4], None, 2);
        assert_eq!(obf.header[..56], nonce[..56]);
        assert_ne!(obf.header[56..60], [0xef; 4]);
    }

    #[test]
    fn server_recovers_tag_and_streams() {
        for secret in [None, Some([5u8; 16])] {
            let mut client = Obfuscation::from_nonce(sample_nonce(), [0xee; 4], secret.as_ref(), 4);
            let (tag, mut server) = Obfuscation::accept(&client.header, secret.as_ref());
            assert_eq!(tag, [0xee; 4]);

            let mut upstream = b"client to server".to_vec();
            client.encryptor.apply(&mut upstream);
            server.decryptor.apply(&mut upstream);
            assert_eq!(upstream, b"client to server");

            let mut downstream = b"server to client".to_vec();
            server.encryptor.apply(&mut downstream);
            client.decryptor.apply(&mut downstream);
            assert_eq!(downstream, b"server to client");
        }
    }

    #[test]
    fn reserved_nonces_are_refused() {
        let mut nonce = sample_nonce();
        assert!(is_valid_nonce(&nonce));

        nonce[0] = 0xef;
        assert!(!is_valid_nonce(&nonce));

        let mut nonce = sample_nonce();
        nonce[..4].copy_from_slice(b"POST");
        assert!(!is_valid_nonce(&nonce));

        let mut nonce = sample_nonce();
        nonce[4..8].fill(0);
        assert!(!is_valid_nonce(&nonce));
    }

    #[test]
    fn fresh_headers_are_valid() {
        let obf = Obfuscation::new([0xef; 4], None, 1).unwrap();
        let mut nonce = obf.header;
        nonce[56..].fill(0x11);
        assert!(is_valid_nonce(&nonce));
    }
}
