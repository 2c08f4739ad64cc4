//! Typed errors and non-fatal warnings produced by the parser and writer.

use std::fmt;

/// All errors that the parser and writer can report.
///
/// Every variant carries the byte offset at which the problem was detected, so that callers can
/// point a diagnostic at the source file without the crate needing to know about spans, lines, or
/// source maps. This enum is `#[non_exhaustive]`: new directive kinds and lexical forms may need
/// new variants without that being a breaking change for matchers that already have a wildcard arm.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The file did not begin with a recognized `(.nifNN)` version cookie.
    #[error("unrecognized or missing version cookie at offset {offset}")]
    UnrecognizedVersion {
        /// Byte offset at which the version cookie was expected.
        offset: usize,
    },

    /// Reached end-of-input with one or more `(` still unmatched.
    #[error("unterminated compound node opened at offset {offset}")]
    UnterminatedCompound {
        /// Byte offset of the unmatched `(`.
        offset: usize,
    },

    /// A `)` appeared with no matching `(`.
    #[error("unexpected ')' at offset {offset}")]
    UnexpectedClose {
        /// Byte offset of the stray `)`.
        offset: usize,
    },

    /// A `\` was not followed by exactly two uppercase hex digits.
    #[error("bad escape sequence at offset {offset}")]
    BadEscape {
        /// Byte offset of the `\`.
        offset: usize,
        /// The byte that followed `\`, if any was present before end-of-input.
        found: Option<u8>,
    },

    /// The digits following a `+`/`-` sign did not form a valid number.
    #[error("malformed number at offset {offset}")]
    BadNumber {
        /// Byte offset at which the number token began.
        offset: usize,
    },

    /// A line-info prefix did not follow the column[,line[,file]] grammar.
    #[error("malformed line-info at offset {offset}")]
    BadLineInfo {
        /// Byte offset at which the line-info token began.
        offset: usize,
    },

    /// A symbol violated the dot-count / digit-tail disambiguation rules.
    #[error("malformed symbol at offset {offset}")]
    MalformedSymbol {
        /// Byte offset at which the symbol token began.
        offset: usize,
    },

    /// A string literal's closing `"` was never found.
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString {
        /// Byte offset of the opening `"`.
        offset: usize,
    },

    /// A char literal's closing `'` was never found.
    #[error("unterminated char literal starting at offset {offset}")]
    UnterminatedChar {
        /// Byte offset of the opening `'`.
        offset: usize,
    },

    /// A comment's closing `#` was never found.
    #[error("unterminated comment starting at offset {offset}")]
    UnterminatedComment {
        /// Byte offset of the opening `#`.
        offset: usize,
    },

    /// In strict mode, `.indexat` disagreed with the actual byte offset of `.index`.
    #[error(
        "'.indexat' offset {expected} does not match actual '.index' location {found} (offset {offset})"
    )]
    IndexOffsetMismatch {
        /// Byte offset of the `.indexat` directive.
        offset: usize,
        /// The offset `.indexat` claimed.
        expected: u64,
        /// The offset the `.index` directive was actually found at.
        found: u64,
    },

    /// A trailing-dot symbol appeared in a file with no resolvable module suffix.
    #[error("trailing-dot symbol at offset {offset} has no module suffix to expand into")]
    TrailingDotWithoutSuffix {
        /// Byte offset of the symbol token.
        offset: usize,
    },

    /// In strict mode, a directive tag was not among the recognized set.
    #[error("unsupported directive '.{tag}' at offset {offset}")]
    UnsupportedDirective {
        /// Byte offset of the directive's opening `(`.
        offset: usize,
        /// The unrecognized directive tag, without its leading dot.
        tag: String,
    },

    /// The writer's reserved `.indexat` pad was too small for the actual offset.
    #[error("'.indexat' pad of {available} bytes cannot hold offset requiring {needed} bytes")]
    IndexPadInsufficient {
        /// Bytes reserved for the padded placeholder.
        available: usize,
        /// Bytes actually required to render the offset.
        needed: usize,
    },

    /// An index needed to be patched in place but the output sink cannot seek.
    #[error("writing a '.index' requires a seekable sink, but none was provided")]
    NonSeekableSinkWithIndex,

    /// Propagated I/O failure from the output sink.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The byte offset at which this error was detected, if the variant carries one.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::UnrecognizedVersion { offset }
            | Error::UnterminatedCompound { offset }
            | Error::UnexpectedClose { offset }
            | Error::BadEscape { offset, .. }
            | Error::BadNumber { offset }
            | Error::BadLineInfo { offset }
            | Error::MalformedSymbol { offset }
            | Error::UnterminatedString { offset }
            | Error::UnterminatedChar { offset }
            | Error::UnterminatedComment { offset }
            | Error::IndexOffsetMismatch { offset, .. }
            | Error::TrailingDotWithoutSuffix { offset }
            | Error::UnsupportedDirective { offset, .. } => Some(*offset),
            Error::IndexPadInsufficient { .. } | Error::NonSeekableSinkWithIndex | Error::Io(_) => {
                None
            }
        }
    }
}

/// A `Result` alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal issue observed while parsing, returned alongside the parsed [`crate::Module`]
/// rather than aborting the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Byte offset at which the condition was observed.
    pub offset: usize,
    /// What was wrong.
    pub kind: WarningKind,
}

/// The kinds of non-fatal issues a parse can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// `.indexat` disagreed with the actual `.index` location (non-strict mode only; in strict
    /// mode this becomes [`Error::IndexOffsetMismatch`] instead).
    IndexOffsetMismatch {
        /// The offset `.indexat` claimed.
        expected: u64,
        /// The offset `.index` was actually found at.
        found: u64,
    },
    /// A directive tag was not among the recognized set (non-strict mode only; in strict mode
    /// this becomes [`Error::UnsupportedDirective`] instead).
    UnsupportedDirective {
        /// The unrecognized directive tag, without its leading dot.
        tag: String,
    },
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::IndexOffsetMismatch { expected, found } => write!(
                f,
                "'.indexat' claims offset {expected} but '.index' is actually at {found}"
            ),
            WarningKind::UnsupportedDirective { tag } => {
                write!(f, "unrecognized directive '.{tag}' preserved as opaque")
            }
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (offset {})", self.kind, self.offset)
    }
}
