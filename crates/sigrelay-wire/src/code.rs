//! Receiver code helpers.
//!
//! Codes are short strings a person types on the initiator side. Lookup on the
//! relay is case-insensitive, so [`normalize`] is applied on every path that
//! stores or compares a code.

use rand::Rng;

/// Uppercase alphabet without the easily confused `I`, `O`, `0` and `1`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Code length used by the CLI when none is given.
pub const DEFAULT_CODE_LEN: usize = 4;

/// Generate a random code of `len` characters from [`ALPHABET`].
pub fn generate(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a code: surrounding whitespace removed, uppercased.
pub fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        for len in [1, DEFAULT_CODE_LEN, 12] {
            let code = generate(len);
            assert_eq!(code.len(), len);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)), "{code}");
        }
    }

    #[test]
    fn generated_codes_are_already_normalized() {
        let code = generate(DEFAULT_CODE_LEN);
        assert_eq!(normalize(&code), code);
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize(" abCd\n"), "ABCD");
        assert_eq!(normalize("ABCD"), "ABCD");
    }
}
