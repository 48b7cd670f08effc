//! Cross-reference detection between pull requests and tickets

/// Find ticket keys such as `PAY-142` in free text.
///
/// A key is an uppercase project prefix of at least two characters
/// (letters and digits, starting with a letter), a dash, and a number.
/// When `projects` is non-empty only keys with one of those prefixes are
/// returned. Keys are returned once each, in order of first appearance.
pub fn extract_ticket_keys(text: &str, projects: &[String]) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut keys: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let at_boundary = i == 0 || !is_word_byte(bytes[i - 1]);
        if !at_boundary || !bytes[i].is_ascii_uppercase() {
            i += 1;
            continue;
        }

        let start = i;
        let mut j = i + 1;
        while j < bytes.len() && (bytes[j].is_ascii_uppercase() || bytes[j].is_ascii_digit()) {
            j += 1;
        }
        let prefix_len = j - start;

        if prefix_len < 2 || j >= bytes.len() || bytes[j] != b'-' {
            i = j;
            continue;
        }

        let digits_start = j + 1;
        let mut k = digits_start;
        while k < bytes.len() && bytes[k].is_ascii_digit() {
            k += 1;
        }

        let has_digits = k > digits_start;
        let at_end = k == bytes.len() || !is_word_byte(bytes[k]);
        if has_digits && at_end {
            let prefix = &text[start..j];
            let key = &text[start..k];
            let allowed = projects.is_empty() || projects.iter().any(|p| p == prefix);
            if allowed && !keys.iter().any(|existing| existing == key) {
                keys.push(key.to_string());
            }
        }

        i = k.max(j + 1);
    }

    keys
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
