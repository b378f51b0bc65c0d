//! Source position tracking for tokens, DOM nodes, and error messages,
//! heavily adapted from [codemap](https://crates.io/crates/codemap).

use peg::str::LineCol;
use serde::{Deserialize, Serialize};

/// A range of bytes within a source string.
///
/// This is the `tsr` of a token. It serialises as a two-element JSON array.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct SourceRange {
    /// The position of the first byte of the range.
    pub start: usize,

    /// The position after the last byte of the range.
    pub end: usize,
}

impl SourceRange {
    /// Creates a new range.
    #[inline]
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        SourceRange { start, end }
    }

    /// Returns true if this range is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.start >= self.end
    }

    /// The length of the range, in bytes.
    #[inline]
    #[must_use]
    pub fn len(self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Creates a range that encloses both `self` and `other`.
    #[inline]
    #[must_use]
    pub fn merge(self, other: SourceRange) -> SourceRange {
        SourceRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Moves the range by `offset` bytes.
    #[inline]
    #[must_use]
    pub fn offset(self, offset: usize) -> SourceRange {
        SourceRange {
            start: self.start + offset,
            end: self.end + offset,
        }
    }

    /// Returns the text of this range within `source`, or `None` if the
    /// range is inverted or not on character boundaries of `source`.
    #[must_use]
    pub fn substr(self, source: &str) -> Option<&str> {
        if self.end < self.start {
            None
        } else {
            source.get(self.into_range())
        }
    }

    #[inline]
    /// Converts the range into a range that can be used for string indexing.
    // This is not just using `From<core::ops::Range<usize>` because type
    // resolution fails in common use with `.into()` which eliminates any
    // benefit of using a standard conversion trait
    #[must_use]
    pub fn into_range(self) -> core::ops::Range<usize> {
        self.start..self.end
    }
}

impl From<(usize, usize)> for SourceRange {
    fn from((start, end): (usize, usize)) -> Self {
        Self { start, end }
    }
}

impl From<SourceRange> for (usize, usize) {
    fn from(value: SourceRange) -> Self {
        (value.start, value.end)
    }
}

/// The source ranges of the key and value of an attribute.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "(usize, usize, usize, usize)", into = "(usize, usize, usize, usize)")]
pub struct KvSourceRange {
    /// The range of the key.
    pub key: SourceRange,
    /// The range of the value.
    pub value: SourceRange,
}

impl From<(usize, usize, usize, usize)> for KvSourceRange {
    fn from((ks, ke, vs, ve): (usize, usize, usize, usize)) -> Self {
        Self {
            key: SourceRange::new(ks, ke),
            value: SourceRange::new(vs, ve),
        }
    }
}

impl From<KvSourceRange> for (usize, usize, usize, usize) {
    fn from(value: KvSourceRange) -> Self {
        (value.key.start, value.key.end, value.value.start, value.value.end)
    }
}

/// The source range of a DOM node, including the widths of its opening and
/// closing syntax.
///
/// This is the `dsr` of an element. It serialises as a four-element JSON
/// array.
///
/// ```wikitext
/// '''bold'''
/// ^^^    ^^^
/// open   close
/// ^^^^^^^^^^ start..end
/// ```
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "(usize, usize, usize, usize)", into = "(usize, usize, usize, usize)")]
pub struct DomSourceRange {
    /// The position of the first byte of the node.
    pub start: usize,
    /// The position after the last byte of the node.
    pub end: usize,
    /// The width of the opening syntax.
    pub open_width: usize,
    /// The width of the closing syntax.
    pub close_width: usize,
}

impl DomSourceRange {
    /// Creates a new range.
    #[must_use]
    pub fn new(start: usize, end: usize, open_width: usize, close_width: usize) -> Self {
        Self {
            start,
            end,
            open_width,
            close_width,
        }
    }

    /// Returns true if the range is usable for reusing source text: not
    /// inverted and wide enough to contain its own tag widths.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.end >= self.start && self.open_width + self.close_width <= self.end - self.start
    }

    /// The whole range of the node.
    #[must_use]
    pub fn outer(self) -> SourceRange {
        SourceRange::new(self.start, self.end)
    }

    /// The range of the opening syntax.
    #[must_use]
    pub fn open_range(self) -> SourceRange {
        SourceRange::new(self.start, self.start + self.open_width)
    }

    /// The range between the opening and closing syntax.
    #[must_use]
    pub fn inner_range(self) -> SourceRange {
        SourceRange::new(self.start + self.open_width, self.end - self.close_width)
    }

    /// The range of the closing syntax.
    #[must_use]
    pub fn close_range(self) -> SourceRange {
        SourceRange::new(self.end - self.close_width, self.end)
    }

    /// Moves the range by `offset` bytes.
    #[must_use]
    pub fn offset(self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            ..self
        }
    }
}

impl From<SourceRange> for DomSourceRange {
    fn from(value: SourceRange) -> Self {
        Self::new(value.start, value.end, 0, 0)
    }
}

impl From<(usize, usize, usize, usize)> for DomSourceRange {
    fn from((start, end, open_width, close_width): (usize, usize, usize, usize)) -> Self {
        Self::new(start, end, open_width, close_width)
    }
}

impl From<DomSourceRange> for (usize, usize, usize, usize) {
    fn from(value: DomSourceRange) -> Self {
        (value.start, value.end, value.open_width, value.close_width)
    }
}

/// Associate a range with a value of arbitrary type (e.g. a test file chunk).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Spanned<T> {
    /// The value.
    pub node: T,
    /// The range.
    pub span: SourceRange,
}

impl<T> Spanned<T> {
    /// Creates a new [`Spanned`].
    #[inline]
    pub fn new(node: T, start: usize, end: usize) -> Self {
        Self {
            node,
            span: SourceRange { start, end },
        }
    }

    /// Maps a `Spanned<T>` to `Spanned<U>` by applying the function to the node,
    /// leaving the range untouched.
    pub fn map_node<U, F: FnOnce(T) -> U>(self, op: F) -> Spanned<U> {
        Spanned {
            node: op(self.node),
            span: self.span,
        }
    }
}

impl<T> core::ops::Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.node
    }
}

/// A record of a source file’s lines.
#[derive(Clone)]
pub struct FileMap<'a> {
    /// The source file.
    source: &'a str,

    /// Byte positions of line beginnings.
    lines: Vec<usize>,
}

impl core::fmt::Debug for FileMap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut limit = 100.min(self.source.len());
        while !self.source.is_char_boundary(limit) {
            limit += 1;
        }

        f.debug_struct("FileMap")
            .field(
                "source",
                &format!(
                    "{}{}",
                    &self.source[..limit],
                    if self.source.len() > limit { "…" } else { "" }
                ),
            )
            .finish()
    }
}

impl<'a> FileMap<'a> {
    /// Creates a new line map for the given source.
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        let lines = core::iter::once(0)
            .chain(source.match_indices('\n').map(|(p, _)| p + 1))
            .collect();

        Self { source, lines }
    }

    /// Gets the line and column of a byte position. Positions past the end of
    /// the source are clamped to the end.
    #[must_use]
    pub fn find_line_col(&self, pos: usize) -> LineCol {
        let mut pos = pos.min(self.source.len());
        while !self.source.is_char_boundary(pos) {
            pos -= 1;
        }
        let line = match self.lines.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = self.source[self.lines[line]..pos].chars().count();
        LineCol {
            line: line + 1,
            column: column + 1,
            offset: pos,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsr_parts() {
        let src = "'''bold'''";
        let dsr = DomSourceRange::new(0, 10, 3, 3);
        assert!(dsr.is_valid());
        assert_eq!(dsr.open_range().substr(src), Some("'''"));
        assert_eq!(dsr.inner_range().substr(src), Some("bold"));
        assert_eq!(dsr.close_range().substr(src), Some("'''"));
        assert!(!DomSourceRange::new(0, 4, 3, 3).is_valid());
        assert!(!DomSourceRange::new(5, 4, 0, 0).is_valid());
    }

    #[test]
    fn substr_rejects_bad_ranges() {
        assert_eq!(SourceRange::new(3, 1).substr("hello"), None);
        assert_eq!(SourceRange::new(0, 10).substr("hello"), None);
        assert_eq!(SourceRange::new(1, 3).substr("hello"), Some("el"));
        assert_eq!(SourceRange::new(0, 1).substr("é"), None);
    }

    #[test]
    fn json_shape() {
        let dsr = DomSourceRange::new(1, 9, 2, 3);
        assert_eq!(serde_json::to_string(&dsr).unwrap(), "[1,9,2,3]");
        let tsr: SourceRange = serde_json::from_str("[4,7]").unwrap();
        assert_eq!(tsr, SourceRange::new(4, 7));
    }

    #[test]
    fn line_col() {
        let map = FileMap::new("ab\ncdé\nf");
        let lc = map.find_line_col(4);
        assert_eq!((lc.line, lc.column), (2, 2));
        let lc = map.find_line_col(100);
        assert_eq!((lc.line, lc.column), (3, 2));
    }
}
