//! Location builder for validation errors.

use std::fmt;
use std::fmt::Write as _;

/// A reusable builder for locations like `body.items[3].tags`.
///
/// ```rust
/// use apiforge_schema::PathBuffer;
///
/// let mut pb = PathBuffer::new();
/// pb.push("foo");      // foo
/// pb.push_index(1);    // foo[1]
/// pb.push("bar");      // foo[1].bar
/// assert_eq!(pb.as_str(), "foo[1].bar");
/// pb.pop();            // foo[1]
/// pb.pop();            // foo
/// assert_eq!(pb.as_str(), "foo");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBuffer {
    buf: String,
}

impl PathBuffer {
    /// Create an empty path buffer.
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    /// Create an empty path buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
        }
    }

    /// Push a named segment, adding a `.` separator as needed.
    pub fn push(&mut self, segment: &str) {
        if !self.buf.is_empty() {
            self.buf.push('.');
        }
        self.buf.push_str(segment);
    }

    /// Push an index segment surrounded by `[` and `]`.
    pub fn push_index(&mut self, index: usize) {
        let _ = write!(self.buf, "[{}]", index);
    }

    /// Pop the latest segment off the path.
    pub fn pop(&mut self) {
        match self.buf.rfind(['.', '[']) {
            Some(pos) => self.buf.truncate(pos),
            None => self.buf.clear(),
        }
    }

    /// Push, render and pop in one go.
    pub fn with(&mut self, segment: &str) -> String {
        self.push(segment);
        let out = self.buf.clone();
        self.pop();
        out
    }

    /// Push an index, render and pop in one go.
    pub fn with_index(&mut self, index: usize) -> String {
        self.push_index(index);
        let out = self.buf.clone();
        self.pop();
        out
    }

    /// Length of the current path in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the path is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The current path.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Reset to empty, keeping the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl fmt::Display for PathBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn push_and_pop_segments() {
        let mut pb = PathBuffer::new();
        pb.push("body");
        pb.push("items");
        pb.push_index(3);
        pb.push("tags");
        assert_eq!(pb.as_str(), "body.items[3].tags");

        pb.pop();
        assert_eq!(pb.as_str(), "body.items[3]");
        pb.pop();
        assert_eq!(pb.as_str(), "body.items");
        pb.pop();
        pb.pop();
        assert!(pb.is_empty());

        // Popping an empty buffer is a no-op.
        pb.pop();
        assert!(pb.is_empty());
    }

    #[test]
    fn with_does_not_mutate() {
        let mut pb = PathBuffer::new();
        pb.push("query");
        assert_eq!(pb.with("num"), "query.num");
        assert_eq!(pb.with_index(2), "query[2]");
        assert_eq!(pb.as_str(), "query");
    }

    #[test]
    fn index_at_root() {
        let mut pb = PathBuffer::new();
        pb.push_index(0);
        assert_eq!(pb.as_str(), "[0]");
        pb.push("name");
        assert_eq!(pb.as_str(), "[0].name");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn push_then_pop_restores(
            prefix in proptest::collection::vec("[a-z]{1,8}", 0..5),
            segment in "[a-z]{1,8}",
            index in 0usize..1000,
        ) {
            let mut pb = PathBuffer::new();
            for p in &prefix {
                pb.push(p);
            }
            let before = pb.as_str().to_string();

            pb.push(&segment);
            pb.pop();
            prop_assert_eq!(pb.as_str(), before.as_str());

            pb.push_index(index);
            pb.pop();
            prop_assert_eq!(pb.as_str(), before.as_str());
        }
    }
}
