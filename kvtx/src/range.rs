use crate::errors::{ErrorKind, KvError, KvResult};

/// Half-open key interval `[begin, end)` on the ascending axis.
///
/// An empty `begin` or `end` is unbounded on that side. The interval is the
/// same for ascending and descending iteration; only the visiting order
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyRange {
    begin: String,
    end: String,
}

impl KeyRange {
    /// Builds a range, rejecting `begin > end` when `end` is bounded.
    pub fn new(begin: &str, end: &str) -> KvResult<Self> {
        if !end.is_empty() && begin > end {
            log::error!("Invalid key range, begin {:?} is after end {:?}", begin, end);
            return Err(KvError::new(
                &format!("invalid range, begin {:?} is after end {:?}", begin, end),
                ErrorKind::InvalidArgument,
            ));
        }
        Ok(KeyRange {
            begin: begin.to_string(),
            end: end.to_string(),
        })
    }

    /// The unbounded range.
    pub fn full() -> Self {
        KeyRange::default()
    }

    pub fn begin(&self) -> &str {
        &self.begin
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn is_full(&self) -> bool {
        self.begin.is_empty() && self.end.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        (self.begin.is_empty() || key >= self.begin.as_str())
            && (self.end.is_empty() || key < self.end.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_after_end_is_rejected() {
        let err = KeyRange::new("d", "b").unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_begin_after_unbounded_end_is_allowed() {
        let range = KeyRange::new("d", "").unwrap();
        assert!(range.contains("d"));
        assert!(range.contains("zzz"));
        assert!(!range.contains("c"));
    }

    #[test]
    fn test_equal_bounds_are_empty() {
        let range = KeyRange::new("b", "b").unwrap();
        assert!(!range.contains("a"));
        assert!(!range.contains("b"));
        assert!(!range.contains("c"));
    }

    #[test]
    fn test_half_open() {
        let range = KeyRange::new("b", "d").unwrap();
        assert!(!range.contains("a"));
        assert!(range.contains("b"));
        assert!(range.contains("c"));
        assert!(range.contains("cz"));
        assert!(!range.contains("d"));
        assert!(!range.contains("da"));
    }

    #[test]
    fn test_full_range() {
        let range = KeyRange::full();
        assert!(range.is_full());
        assert!(range.contains("a"));
        assert!(range.contains("\u{10ffff}"));
        assert_eq!(range, KeyRange::new("", "").unwrap());
    }

    #[test]
    fn test_unbounded_begin() {
        let range = KeyRange::new("", "c").unwrap();
        assert!(range.contains("a"));
        assert!(!range.contains("c"));
        assert_eq!(range.begin(), "");
        assert_eq!(range.end(), "c");
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let range = KeyRange::new("a", "b").unwrap();
        assert!(range.contains("a\u{00e9}"));
        assert!(!range.contains("B"));
    }
}
