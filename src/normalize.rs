//! Canonical filename form used as the ARC directory's map key, and the
//! glob-to-regex translation used by listing filters.

use regex::RegexBuilder;

/// Canonicalizes a filename for use as a directory-map key:
/// 1. ASCII-only byte-wise lowercase (bytes 0x41-0x5A get +0x20; bytes
///    `>= 0x80` pass through unchanged — legacy names are multibyte and a
///    "proper" Unicode fold would corrupt trail bytes).
/// 2. `/` becomes `\`.
/// 3. A single leading `\` is stripped.
pub fn normalize(name: &str) -> String {
    let mut bytes: Vec<u8> = name
        .bytes()
        .map(|b| if b.is_ascii_uppercase() { b + 0x20 } else { b })
        .map(|b| if b == b'/' { b'\\' } else { b })
        .collect();
    if bytes.first() == Some(&b'\\') {
        bytes.remove(0);
    }
    // SAFETY-free: legacy names may not be valid UTF-8 after swapping
    // separators, but since we only ever touch ASCII bytes here the
    // original encoding of any multibyte trail byte is preserved
    // untouched, so re-interpreting as a lossless String is sound for any
    // input that started out as one.
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Translates a GRF-style glob into an anchored, case-insensitive regex.
/// `*` -> `.*`, `?` -> `.`, `.` -> `\.`, `/` -> `\`. A pattern that fails
/// to compile yields a matcher that never matches, rather than an error.
pub fn glob_to_matcher(filter: &str) -> Box<dyn Fn(&str) -> bool> {
    let mut pattern = String::from("^");
    for c in filter.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '.' => pattern.push_str("\\."),
            '/' => pattern.push('\\'),
            '\\' => pattern.push_str("\\\\"),
            other => {
                if matches!(
                    other,
                    '+' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
                ) {
                    pattern.push('\\');
                }
                pattern.push(other);
            }
        }
    }
    pattern.push('$');

    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => Box::new(move |s: &str| re.is_match(s)),
        Err(_) => Box::new(|_: &str| false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_ascii_only() {
        assert_eq!(normalize("DATA\\SPRITE\\A.SPR"), "data\\sprite\\a.spr");
    }

    #[test]
    fn converts_forward_slashes() {
        assert_eq!(normalize("data/sprite/a.spr"), "data\\sprite\\a.spr");
    }

    #[test]
    fn strips_single_leading_backslash() {
        assert_eq!(normalize("\\data\\a.txt"), normalize("data\\a.txt"));
    }

    #[test]
    fn is_idempotent() {
        let once = normalize("DATA/Sprite/A.spr");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn high_bytes_pass_through() {
        // 0xB1 is a Shift-JIS trail byte; must not be folded.
        let raw = unsafe { String::from_utf8_unchecked(vec![0x41, 0xB1]) };
        let normalized = normalize(&raw);
        assert_eq!(normalized.as_bytes(), &[0x61, 0xB1]);
    }

    #[test]
    fn glob_matches_only_intended_names() {
        let matcher = glob_to_matcher("data\\sprite\\*.spr");
        assert!(matcher("data\\sprite\\a.spr"));
        assert!(!matcher("data\\sprite\\sub\\b.spr"));
        assert!(!matcher("data\\other\\a.spr"));
    }

    #[test]
    fn malformed_glob_matches_nothing() {
        let matcher = glob_to_matcher("[");
        assert!(!matcher("["));
        assert!(!matcher("anything"));
    }
}
