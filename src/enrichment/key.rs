use compact_str::CompactString;
use core::fmt::{Display, Formatter, Result as FmtResult};
use serde::{Deserialize, Serialize};

/// A normalized identifier for the entity being enriched.
///
/// Equality is exact-string. Normalization happens once, at the boundary, through
/// [`Key::from_isbn`] or another normalizer handed to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(CompactString);

impl Key {
    /// Wrap an already-normalized identifier.
    #[must_use]
    pub fn new(normalized: impl Into<CompactString>) -> Self {
        Self(normalized.into())
    }

    /// Normalize a raw ISBN-10, ISBN-13 or SBN into a canonical ISBN-13 key.
    ///
    /// Everything other than digits and `X` is discarded first, so hyphenated and
    /// space-separated input is accepted. Returns `None` when the input cannot be
    /// coerced into an ISBN-13.
    #[must_use]
    pub fn from_isbn(raw: &str) -> Option<Self> {
        let cleaned: CompactString = raw
            .chars()
            .filter_map(|c| match c {
                '0'..='9' => Some(c),
                'x' | 'X' => Some('X'),
                _ => None,
            })
            .collect();

        if cleaned.is_empty() {
            return None;
        }

        coerce_isbn13(&cleaned).map(Self)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn coerce_isbn13(cleaned: &str) -> Option<CompactString> {
    let len = cleaned.len();

    if len == 13 && all_digits(cleaned) {
        let (prefix, _) = cleaned.split_at(12);
        let mut isbn = CompactString::from(prefix);
        isbn.push(isbn13_check_digit(prefix)?);
        return Some(isbn);
    }

    if len == 12 && all_digits(cleaned) {
        let mut isbn = CompactString::from(cleaned);
        isbn.push(isbn13_check_digit(cleaned)?);
        return Some(isbn);
    }

    if len == 9 {
        let (body, last) = cleaned.split_at(8);
        if all_digits(body) {
            // Nine characters ending in a valid check digit is an SBN: an ISBN-10 without the leading zero
            let mut sbn_core = CompactString::from("0");
            sbn_core.push_str(body);
            if let Some(check) = isbn10_check_digit(&sbn_core)
                && last.starts_with(check)
            {
                return isbn10_core_to_isbn13(&sbn_core);
            }
        }

        // Otherwise nine digits is an ISBN-10 missing its check digit
        if all_digits(cleaned) {
            return isbn10_core_to_isbn13(cleaned);
        }

        return None;
    }

    if len == 10 {
        let (core, _) = cleaned.split_at(9);
        return isbn10_core_to_isbn13(core);
    }

    None
}

/// Convert the nine-digit body of an ISBN-10 into an ISBN-13.
fn isbn10_core_to_isbn13(core: &str) -> Option<CompactString> {
    if core.len() != 9 || !all_digits(core) {
        return None;
    }

    let mut isbn = CompactString::from("978");
    isbn.push_str(core);
    let check = isbn13_check_digit(&isbn)?;
    isbn.push(check);
    Some(isbn)
}

fn isbn13_check_digit(prefix: &str) -> Option<char> {
    if prefix.len() != 12 || !all_digits(prefix) {
        return None;
    }

    let total: u32 = prefix
        .bytes()
        .enumerate()
        .map(|(idx, b)| {
            let digit = u32::from(b - b'0');
            if idx % 2 == 1 { digit * 3 } else { digit }
        })
        .sum();

    char::from_digit((10 - total % 10) % 10, 10)
}

fn isbn10_check_digit(prefix: &str) -> Option<char> {
    if prefix.len() != 9 || !all_digits(prefix) {
        return None;
    }

    let total: u32 = prefix
        .bytes()
        .zip((2..=10).rev())
        .map(|(b, weight)| u32::from(b - b'0') * weight)
        .sum();

    match (11 - total % 11) % 11 {
        10 => Some('X'),
        check => char::from_digit(check, 10),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_isbn13_is_kept() {
        assert_eq!(Key::from_isbn("9780399127212").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_hyphens_and_spaces_are_stripped() {
        assert_eq!(Key::from_isbn("978-0-399-12721-2").unwrap().as_str(), "9780399127212");
        assert_eq!(Key::from_isbn(" 978 0399 127212 ").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_bad_isbn13_check_digit_is_repaired() {
        assert_eq!(Key::from_isbn("9780399127219").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_twelve_digits_get_a_check_digit() {
        assert_eq!(Key::from_isbn("978039912721").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_isbn10_is_converted() {
        assert_eq!(Key::from_isbn("0399127216").unwrap().as_str(), "9780399127212");
        assert_eq!(Key::from_isbn("0-306-40615-2").unwrap().as_str(), "9780306406157");
    }

    #[test]
    fn test_isbn10_with_x_check_digit_is_converted() {
        assert_eq!(Key::from_isbn("080442957x").unwrap().as_str(), "9780804429573");
    }

    #[test]
    fn test_nine_digits_are_treated_as_isbn10_body() {
        assert_eq!(Key::from_isbn("039912721").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_sbn_is_converted() {
        // SBN 399127216 is ISBN-10 0399127216
        assert_eq!(Key::from_isbn("399127216").unwrap().as_str(), "9780399127212");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Key::from_isbn("").is_none());
        assert!(Key::from_isbn("not an isbn").is_none());
        assert!(Key::from_isbn("12345").is_none());
        assert!(Key::from_isbn("12345678901234").is_none());
        assert!(Key::from_isbn("K1").is_none());
    }

    #[test]
    fn test_display_matches_as_str() {
        let key = Key::new("K1");
        assert_eq!(key.to_string(), "K1");
        assert_eq!(key.as_ref(), "K1");
    }
}
