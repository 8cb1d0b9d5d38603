//! ADDRESS mask algorithm: keep the administrative prefix, blind the rest

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::LazyLock;

// Token tables ship base64 encoded, pipe separated, like the TLD table.
// enter = administrative prefixes (street/road/village tier),
// mid = mid-granularity markers (community/building/unit/room tier).
const ENTER_TOKENS_B64: &str = "6KGX6YGTfOi3r3zooZd86YeMfOadkXzplYd85bGvfOe7hAo=";
const MID_TOKENS_B64: &str =
    "56S+5Yy6fOWwj+WMunzlpKfljqZ85bm/5Zy6fOWPt+alvHzljZXlhYN85Y+3fOWxgnzlrqR85oi3Cg==";

static ENTER_TOKENS: LazyLock<Vec<String>> = LazyLock::new(|| load_token_list(ENTER_TOKENS_B64));
static MID_TOKENS: LazyLock<Vec<String>> = LazyLock::new(|| load_token_list(MID_TOKENS_B64));

fn load_token_list(encoded: &str) -> Vec<String> {
    let decoded = STANDARD.decode(encoded).unwrap_or_default();
    String::from_utf8_lossy(&decoded)
        .trim()
        .split('|')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Mask an address string.
///
/// Everything up to and including the last administrative-prefix token is
/// preserved; the text between successive mid-granularity tokens is blinded
/// with `*`; digits in the remainder are blinded. When nothing matched at
/// all, the last three runes are replaced by `*` repeated to their byte
/// width, so the output always differs from the input.
pub fn mask_address(input: &str) -> String {
    let mut start = 0;
    if let Some((pos, id)) = find_token(input, 0, &ENTER_TOKENS, true) {
        start = pos + ENTER_TOKENS[id].len();
    }
    let mut out = String::with_capacity(input.len());
    out.push_str(&input[..start]);
    while start < input.len() {
        let Some((pos, id)) = find_token(input, start, &MID_TOKENS, false) else {
            break;
        };
        out.push_str(&"*".repeat(pos - start));
        out.push_str(&MID_TOKENS[id]);
        start = pos + MID_TOKENS[id].len();
    }
    out.push_str(&input[start..]);
    out = mask_digits(&out);
    if out == input {
        out = mask_last_runes(&out, 3);
    }
    out
}

/// Replace every ASCII digit with `*`.
pub fn mask_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_ascii_digit() { '*' } else { c })
        .collect()
}

/// Locate a token from `list` in `input[start..]`.
///
/// With `last` set, the first occurrence of each token is compared and the
/// right-most wins; otherwise the first token in list order that occurs at
/// all is returned. Returns the absolute byte position and the token index.
fn find_token(input: &str, start: usize, list: &[String], last: bool) -> Option<(usize, usize)> {
    let tail = &input[start..];
    let mut best: Option<(usize, usize)> = None;
    for (id, token) in list.iter().enumerate() {
        if let Some(pos) = tail.find(token.as_str()) {
            let loc = start + pos;
            if !last {
                return Some((loc, id));
            }
            match best {
                Some((best_loc, _)) if loc < best_loc => {}
                _ => best = Some((loc, id)),
            }
        }
    }
    best
}

/// Replace the trailing `count` runes with `*` repeated to their byte width.
fn mask_last_runes(input: &str, count: usize) -> String {
    let mut cut = input.len();
    for (i, _) in input.char_indices().rev().take(count) {
        cut = i;
    }
    let masked = input.len() - cut;
    let mut out = input[..cut].to_string();
    out.push_str(&"*".repeat(masked));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_tables_load() {
        assert!(ENTER_TOKENS.iter().any(|t| t == "路"));
        assert!(MID_TOKENS.iter().any(|t| t == "号"));
    }

    #[test]
    fn test_address_keeps_admin_prefix() {
        let out = mask_address("北京市海淀区北三环西路43号");
        assert_eq!(out, "北京市海淀区北三环西路**号");
    }

    #[test]
    fn test_address_masks_between_mid_tokens() {
        let out = mask_address("幸福路阳光小区8号楼1单元302室");
        // prefix up to 路 kept, spans before mid tokens blinded, digits blinded
        assert!(out.starts_with("幸福路"));
        assert!(!out.contains("阳光"));
        assert!(!out.contains('3'));
        assert!(out.contains("小区"));
        assert!(out.contains("单元"));
    }

    #[test]
    fn test_address_without_tokens_masks_digits() {
        assert_eq!(mask_address("flat 12"), "flat **");
    }

    #[test]
    fn test_address_fallback_masks_last_runes() {
        assert_eq!(mask_address("Nowhere"), "Nowh***");
        // multi-byte runes blind to their byte width
        assert_eq!(mask_address("深圳福田"), "深*********");
    }

    #[test]
    fn test_mask_digits() {
        assert_eq!(mask_digits("a1b2"), "a*b*");
    }
}
