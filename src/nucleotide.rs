//! Two-bit nucleotide alphabet shared by references, mutation codes and
//! coverage matrices.

use crate::{UmivarError, UmivarResult};

/// Number of nucleotide codes
pub const ALPHABET_SIZE: usize = 4;

pub const A: u8 = 0;
pub const C: u8 = 1;
pub const G: u8 = 2;
pub const T: u8 = 3;

const SYMBOLS: [char; ALPHABET_SIZE] = ['A', 'C', 'G', 'T'];

/// Convert an ASCII nucleotide symbol (case-insensitive) to its code
pub fn code_from_symbol(symbol: u8) -> Option<u8> {
    match symbol.to_ascii_uppercase() {
        b'A' => Some(A),
        b'C' => Some(C),
        b'G' => Some(G),
        b'T' => Some(T),
        _ => None,
    }
}

/// Convert a nucleotide code to its symbol
pub fn symbol_from_code(code: u8) -> char {
    SYMBOLS[(code & 0b11) as usize]
}

/// Encode a nucleotide string into codes
pub fn encode(sequence: &str) -> UmivarResult<Vec<u8>> {
    sequence
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            code_from_symbol(b).ok_or_else(|| {
                UmivarError::InvalidSequence(format!(
                    "Unsupported nucleotide '{}' at position {}",
                    b as char, i
                ))
            })
        })
        .collect()
}

/// Decode nucleotide codes into a string
pub fn decode(codes: &[u8]) -> String {
    codes.iter().map(|&c| symbol_from_code(c)).collect()
}
