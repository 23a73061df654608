//! Source locations for diagnostics.
//!
//! Every node carries a [`Location`]. Locations are value-typed and compose
//! associatively via [`Location::merge`], with [`Location::Unknown`] as the
//! identity. A [`Location::Stack`] records the chain of inlined call sites so
//! diagnostics can print the whole compilation stack.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A span within a single source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    /// Source file path or name.
    pub file: String,
    /// 1-based first line of the span.
    pub start_line: u32,
    /// 1-based first column of the span.
    pub start_column: u32,
    /// 1-based last line of the span.
    pub end_line: u32,
    /// 1-based last column of the span.
    pub end_column: u32,
}

impl FileLocation {
    /// Creates a span covering a single point.
    pub fn point(file: impl Into<String>, line: u32, column: u32) -> Self {
        FileLocation {
            file: file.into(),
            start_line: line,
            start_column: column,
            end_line: line,
            end_column: column,
        }
    }

    /// Returns the union span of two locations in the same file.
    fn union(&self, other: &FileLocation) -> FileLocation {
        let (start_line, start_column) =
            if (self.start_line, self.start_column) <= (other.start_line, other.start_column) {
                (self.start_line, self.start_column)
            } else {
                (other.start_line, other.start_column)
            };
        let (end_line, end_column) =
            if (self.end_line, self.end_column) >= (other.end_line, other.end_column) {
                (self.end_line, self.end_column)
            } else {
                (other.end_line, other.end_column)
            };
        FileLocation {
            file: self.file.clone(),
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.file, self.start_line, self.start_column, self.end_line, self.end_column
        )
    }
}

/// An opaque source location descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// No location information is available.
    Unknown,
    /// The node deliberately has no source counterpart (compiler-synthesized).
    Nowhere,
    /// A span within a source file.
    File(FileLocation),
    /// An ordered sequence of locations for inlining diagnostics.
    ///
    /// The first entry is the innermost frame; each following entry is an
    /// enclosing call site.
    Stack(Vec<Location>),
}

impl Location {
    /// Returns `true` if this location carries usable position information.
    pub fn is_known(&self) -> bool {
        !matches!(self, Location::Unknown)
    }

    /// Merges two locations.
    ///
    /// `Unknown` is the identity. Two file spans on the same file merge to
    /// their union span; otherwise the left operand wins.
    pub fn merge(self, other: Location) -> Location {
        match (self, other) {
            (Location::Unknown, other) => other,
            (this, Location::Unknown) => this,
            (Location::File(a), Location::File(b)) if a.file == b.file => {
                Location::File(a.union(&b))
            }
            (this, _) => this,
        }
    }

    /// Pushes an enclosing frame onto this location, forming a compilation
    /// stack. Used when a method body is inlined at a call site.
    pub fn push_frame(self, call_site: Location) -> Location {
        match self {
            Location::Stack(mut frames) => {
                frames.push(call_site);
                Location::Stack(frames)
            }
            inner => Location::Stack(vec![inner, call_site]),
        }
    }

    /// Formats an error message with this location's context.
    ///
    /// A compilation stack emits the message at the top frame followed by one
    /// line per enclosing frame.
    pub fn format_error_message(&self, message: &str) -> String {
        match self {
            Location::Unknown | Location::Nowhere => message.to_string(),
            Location::File(span) => format!("{span}: {message}"),
            Location::Stack(frames) => {
                let mut out = match frames.first() {
                    Some(inner) => inner.format_error_message(message),
                    None => message.to_string(),
                };
                for frame in frames.iter().skip(1) {
                    out.push_str("\n  inlined at ");
                    out.push_str(&frame.format_error_message("here"));
                }
                out
            }
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::Unknown
    }
}
