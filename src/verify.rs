//! Algorithmic validators used by the Verify section of detection rules

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

const ID_CARD_LEN: usize = 18;
const ID_CARD_WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
const ID_CARD_CHECK: &[u8; 11] = b"10X98765432";

/// Chinese resident ID card: weighted checksum over the first 17 digits
/// must select the 18th character.
pub fn verify_id_card(text: &str) -> bool {
    let bytes = text.as_bytes();
    if bytes.len() != ID_CARD_LEN {
        return false;
    }
    let mut sum = 0u32;
    for (i, &w) in ID_CARD_WEIGHTS.iter().enumerate() {
        if !bytes[i].is_ascii_digit() {
            return false;
        }
        sum += w * u32::from(bytes[i] - b'0');
    }
    ID_CARD_CHECK[(sum % 11) as usize] == bytes[ID_CARD_LEN - 1]
}

/// ABA routing number: exactly 9 digits after stripping dashes, weighted
/// 3-7-1 sum divisible by 10.
pub fn verify_aba_routing(text: &str) -> bool {
    let digits: Vec<u8> = text.bytes().filter(|&b| b != b'-').collect();
    if digits.len() != 9 || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let weights = [3u32, 7, 1];
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &b)| u32::from(b - b'0') * weights[i % 3])
        .sum();
    sum % 10 == 0
}

/// Credit card: 13 to 19 digits after stripping dashes, Luhn checksum.
pub fn verify_credit_card(text: &str) -> bool {
    let digits: Vec<u8> = text.bytes().filter(|&b| b != b'-').collect();
    if digits.len() < 13 || digits.len() > 19 || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let mut sum = 0u32;
    let mut alternate = false;
    for &b in digits.iter().rev() {
        let mut d = u32::from(b - b'0');
        if alternate {
            d *= 2;
            if d > 9 {
                d = d % 10 + 1;
            }
        }
        alternate = !alternate;
        sum += d;
    }
    sum % 10 == 0
}

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Decode a base58 string into a fixed 25-byte address buffer.
/// Fails on characters outside the alphabet and on overflow.
fn base58_decode_25(text: &str) -> Option<[u8; 25]> {
    let mut addr = [0u8; 25];
    for &b in text.as_bytes() {
        let mut carry = BASE58_ALPHABET.iter().position(|&a| a == b)?;
        for slot in addr.iter_mut().rev() {
            carry += 58 * usize::from(*slot);
            *slot = (carry % 256) as u8;
            carry /= 256;
        }
        if carry > 0 {
            return None; // value does not fit in 25 bytes
        }
    }
    Some(addr)
}

/// Bitcoin address: decodes to 25 bytes, version byte 0, and the embedded
/// checksum equals the first four bytes of double-SHA256 over the payload.
pub fn verify_bitcoin(text: &str) -> bool {
    let Some(addr) = base58_decode_25(text) else {
        return false;
    };
    if addr[0] != 0 {
        return false;
    }
    let first = Sha256::digest(&addr[..21]);
    let second = Sha256::digest(first);
    second[..4] == addr[21..25]
}

// ICANN top-level domains, pipe separated. Kept in the same encoded form
// the rule catalog ships in.
const TLD_TABLE_B64: &str = "LmJpenwuY29tfC5vcmd8Lm5ldHwuZWR1fC5nb3Z8LmludHwubWlsfC5hcnBhfC5pbmZvfC5wcm98LmNvb3B8LmFlcm98Lm5hbWV8LmlkdnwuY2N8LnR2fC50ZWNofC5tb2JpfC5hY3wuYWR8LmFlfC5hZnwuYWd8LmFpfC5hbHwuYW18LmFvfC5hcXwuYXJ8LmFzfC5hdHwuYXV8LmF3fC5heHwuYXp8LmJhfC5iYnwuYmR8LmJlfC5iZnwuYmd8LmJofC5iaXwuYmp8LmJtfC5ibnwuYm98LmJxfC5icnwuYnN8LmJ0fC5id3wuYnl8LmJ6fC5jYXwuY2R8LmNmfC5jZ3wuY2h8LmNpfC5ja3wuY2x8LmNtfC5jbnwuY298LmNyfC5jdXwuY3d8LmN4fC5jeXwuY3p8LmRlfC5kanwuZGt8LmRtfC5kb3wuZHp8LmVjfC5lZXwuZWd8LmVofC5lcnwuZXN8LmV0fC5ldXwuZml8LmZqfC5ma3wuZm18LmZvfC5mcnwuZ2F8LmdkfC5nZXwuZ2Z8LmdnfC5naHwuZ2l8Z2x8LmdtfC5nbnwuZ3B8LmdxfC5ncnwuZ3N8Lmd0fC5ndXwuZ3d8LmhrfC5obXwuaG58LmhyfC5odHwuaHV8LmlkfC5pZXwuaWx8LmltfC5pbnwuaW98LmlxfC5pcnwuaXN8Lml0fC5qZXwuam18LmpvfC5qcHwua2V8LmtnfC5raHwua3J8Lmt3fC5reXwua3p8LmxhfC5sYnwubGN8LmxpfC5sa3wubHJ8LmxzfC5sdHwubHV8Lmx2fC5seXwubWF8Lm1jfC5tZHwubWV8Lm1nfC5taHwubWt8Lm1sfC5tbXwubW58Lm1vfC5tcHwubXF8Lm1yfC5tc3wubXR8Lm11fC5tdnwubXd8Lm14fC5teXwubXp8Lm5hfC5uY3wubmV8Lm5mfC5uZ3wubml8Lm5sfC5ub3wubnB8Lm5yfC5udXwubnp8Lm9tfC5wYXwucGV8LnBmfC5wZ3wucGh8LnBrfC5wbHwucG18LnBufC5wcnwucHN8LnB0fC5wd3wucHl8LnFhfC5yZXwucm98LnJzfC5ydXwucnd8LnNhfC5zYnwuc2N8LnNkfC5zZXwuc2d8LnNofC5zaXwuc2t8LnNsfC5zbXwuc258LnNvfC5zcnwuc3Z8LnN4fC5zeXwuc3p8LnRjfC50ZHwudGZ8LnRnfC50aHwudGp8LnRrfC50bHwudG18LnRufC50b3wudHZ8LnR3fC50enx1YXwudWd8LnVrfC51c3wudXl8LnV6fC52YXwudmN8LnZlfC52Z3wudml8LnZufC52dXwud2Z8LndzfC55ZXwueXR8LnphfC56bXwuenc=";

static TLD_SUFFIXES: LazyLock<Vec<String>> = LazyLock::new(|| {
    let decoded = STANDARD.decode(TLD_TABLE_B64).unwrap_or_default();
    String::from_utf8_lossy(&decoded)
        .trim()
        .split('|')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
});

/// Domain: the text must end in a known top-level domain.
pub fn verify_domain(text: &str) -> bool {
    TLD_SUFFIXES.iter().any(|tld| text.ends_with(tld))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_card_checksum() {
        assert!(verify_id_card("110225196403026127"));
        assert!(!verify_id_card("110225196403026128"));
        assert!(!verify_id_card("12345"));
        assert!(!verify_id_card("11022519640302612X"));
    }

    #[test]
    fn test_aba_routing() {
        assert!(verify_aba_routing("123123123"));
        assert!(verify_aba_routing("123-123-123"));
        assert!(!verify_aba_routing("123123124"));
        assert!(!verify_aba_routing("12312312"));
    }

    #[test]
    fn test_credit_card_luhn() {
        assert!(verify_credit_card("4111111111111111"));
        assert!(verify_credit_card("4111-1111-1111-1111"));
        assert!(verify_credit_card("6212345678901232"));
        assert!(!verify_credit_card("4111111111111112"));
        assert!(!verify_credit_card("411111")); // too short
    }

    #[test]
    fn test_bitcoin_address() {
        // the genesis block address
        assert!(verify_bitcoin("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        // flipped last char breaks the checksum
        assert!(!verify_bitcoin("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNb"));
        // 'l' is not in the base58 alphabet
        assert!(!verify_bitcoin("l111111111111111111111111"));
        // P2SH addresses carry version 5
        assert!(!verify_bitcoin("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"));
    }

    #[test]
    fn test_domain_suffix() {
        assert!(verify_domain("www.google.com"));
        assert!(verify_domain("example.org"));
        assert!(!verify_domain("10.2.3.4"));
        assert!(!verify_domain("localhost"));
    }
}
