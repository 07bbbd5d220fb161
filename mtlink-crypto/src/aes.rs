//! AES-256 in Infinite Garble Extension mode, as used by MTProto 2.0.
//!
//! `iv` is 32 bytes: the first half seeds the "previous ciphertext" block,
//! the second half the "previous plaintext" block.

use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

const BLOCK: usize = 16;

fn xor_into(dst: &mut [u8; BLOCK], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

fn split_iv(iv: &[u8; 32]) -> ([u8; BLOCK], [u8; BLOCK]) {
    let mut prev_cipher = [0u8; BLOCK];
    let mut prev_plain = [0u8; BLOCK];
    prev_cipher.copy_from_slice(&iv[..BLOCK]);
    prev_plain.copy_from_slice(&iv[BLOCK..]);
    (prev_cipher, prev_plain)
}

/// Encrypt `buffer` in place. Its length must be a multiple of 16.
pub fn ige_encrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK) {
        let mut plain = [0u8; BLOCK];
        plain.copy_from_slice(chunk);

        let mut block = plain;
        xor_into(&mut block, &prev_cipher);
        let ga = GenericArray::from_mut_slice(&mut block);
        cipher.encrypt_block(ga);
        xor_into(&mut block, &prev_plain);

        chunk.copy_from_slice(&block);
        prev_cipher = block;
        prev_plain = plain;
    }
}

/// Decrypt `buffer` in place. Its length must be a multiple of 16.
pub fn ige_decrypt(buffer: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    debug_assert_eq!(buffer.len() % BLOCK, 0);
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let (mut prev_cipher, mut prev_plain) = split_iv(iv);

    for chunk in buffer.chunks_exact_mut(BLOCK) {
        let mut encrypted = [0u8; BLOCK];
        encrypted.copy_from_slice(chunk);

        let mut block = encrypted;
        xor_into(&mut block, &prev_plain);
        let ga = GenericArray::from_mut_slice(&mut block);
        cipher.decrypt_block(ga);
        xor_into(&mut block, &prev_cipher);

        chunk.copy_from_slice(&block);
        prev_cipher = encrypted;
        prev_plain = block;
    }
}
