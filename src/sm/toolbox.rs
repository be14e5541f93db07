//! The Cryptographic Toolbox
//!
//! These are the functions of LE legacy pairing as defined in the Bluetooth Specification v5.0 |
//! Vol 3, Part H, section 2.2: *Cryptographic Toolbox*.
//!
//! # Note
//! Every value is a `u128` converted from the little endian bytes of the PDUs. The functions mask
//! their inputs down to the size of the field.

/// The functions used by the security manager
///
/// The security manager only uses the toolbox through this trait, [`AesToolbox`] is the
/// implementation for real pairing.
pub trait Toolbox {
    /// The confirm value function
    #[allow(clippy::too_many_arguments)]
    fn c1(&self, k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128;

    /// The short term key function
    fn s1(&self, k: u128, r1: u128, r2: u128) -> u128;

    /// Generate a random 128 bit value
    fn rand(&mut self) -> u128;
}

/// The toolbox built on the AES-128 block cipher and the random source of the OS
#[derive(Debug, Default, Clone, Copy)]
pub struct AesToolbox;

impl Toolbox for AesToolbox {
    fn c1(&self, k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128 {
        c1(k, r, pres, preq, iat, ia, rat, ra)
    }

    fn s1(&self, k: u128, r1: u128, r2: u128) -> u128 {
        s1(k, r1, r2)
    }

    fn rand(&mut self) -> u128 {
        rand_u128()
    }
}

/// Security function *e*
///
/// This is the encrypted data generator for LE legacy pairing. It generates 128-bit data from a
/// 128-bit key using the AES-128 bit block cypher.
pub fn e(key: u128, plain_text: u128) -> u128 {
    use aes::cipher::generic_array::GenericArray;
    use aes::cipher::{BlockEncrypt, KeyInit};

    let key_bytes = key.to_be_bytes();

    let cipher = aes::Aes128::new(GenericArray::from_slice(&key_bytes));

    let mut block = plain_text.to_be_bytes();

    cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));

    <u128>::from_be_bytes(block)
}

/// Phase 2 (LE legacy) confirm value function
///
/// # Inputs
/// - K: AES key
/// - r: plain text
/// - pres: 7 bytes
/// - preq: 7 bytes
/// - iat: 1 bit, mapped to a boolean
/// - ia: 6 bytes
/// - rat: 1 bit, mapped to a boolean
/// - ra: 6 bytes
#[allow(clippy::too_many_arguments)]
pub fn c1(k: u128, r: u128, pres: u128, preq: u128, iat: bool, ia: u128, rat: bool, ra: u128) -> u128 {
    let p1 = c1_p1(pres, preq, iat, rat);

    let p2 = c1_p2(ia, ra);

    e(k, e(k, r ^ p1) ^ p2)
}

fn c1_p1(pres: u128, preq: u128, iat: bool, rat: bool) -> u128 {
    let iat_p = u128::from(iat);
    let rat_p = u128::from(rat) << 8;

    let pres_m = (0xFF_FFFF_FFFF_FFFF & pres) << (9 * 8);
    let preq_m = (0xFF_FFFF_FFFF_FFFF & preq) << (2 * 8);

    pres_m | preq_m | rat_p | iat_p
}

fn c1_p2(ia: u128, ra: u128) -> u128 {
    let ia_p = (0xFFFF_FFFF_FFFF & ia) << (6 * 8);
    let ra_p = 0xFFFF_FFFF_FFFF & ra;

    ia_p | ra_p
}

/// Phase 2 (LE legacy) short term key (STK) function
pub fn s1(k: u128, r1: u128, r2: u128) -> u128 {
    let r1_p = (0xFFFF_FFFF_FFFF_FFFF & r1) << 64;
    let r2_p = 0xFFFF_FFFF_FFFF_FFFF & r2;

    e(k, r1_p | r2_p)
}

pub fn rand_u128() -> u128 {
    use rand_core::{OsRng, RngCore};

    let mut bytes = [0u8; 16];

    OsRng.fill_bytes(&mut bytes);

    <u128>::from_ne_bytes(bytes)
}

/// Convert little endian bytes, shorter than 16, into a `u128`
pub fn u128_from_le_slice(bytes: &[u8]) -> u128 {
    let mut buffer = [0u8; 16];

    let len = bytes.len().min(16);

    buffer[..len].copy_from_slice(&bytes[..len]);

    <u128>::from_le_bytes(buffer)
}
