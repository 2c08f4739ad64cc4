//! The in-memory representation of a parsed (or programmatically built) NIF module: atoms,
//! compound nodes, their prefixes, and the arena that owns them all.
//!
//! Children are referenced by [`NodeId`], an index into the owning [`Arena`]'s storage, rather
//! than by pointer or `Rc`. This sidesteps lifetime and cycle issues entirely: a parent pointer,
//! if ever needed, would be a side table built after the fact, not a field on the node itself.

use std::ops::Range;

/// An index into an [`Arena`]. Only meaningful relative to the arena that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    fn new(index: usize) -> Self {
        Self(index.try_into().expect("arena index exceeds u32::MAX"))
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The sign of a numeric literal. NIF numbers always carry an explicit sign in source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    /// The byte this sign is written as: `+` or `-`.
    pub fn as_byte(self) -> u8 {
        match self {
            Sign::Plus => b'+',
            Sign::Minus => b'-',
        }
    }
}

/// The exponent part of a float literal, e.g. the `E+10` in `1.5E+10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatExp {
    /// Sign of the exponent, if one was written. Unlike the mantissa's sign, this is optional.
    pub sign: Option<Sign>,
    /// The exponent's decimal digits.
    pub digits: Box<[u8]>,
}

/// A leaf value in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// The missing/optional slot, written as a single `.`.
    Empty,
    /// A word with no dot: an open-namespace identifier, no semantic equality implied by
    /// like-spelled identifiers elsewhere in the tree.
    Identifier(Box<[u8]>),
    /// A dotted name. Already classified (see [`symbol_kind`]) and, if it was a trailing-dot
    /// form on disk, already expanded against the module suffix.
    Symbol(Box<[u8]>),
    /// A [`Atom::Symbol`] marked with a leading `:` as its definition site.
    SymbolDef(Box<[u8]>),
    /// A signed decimal integer.
    IntLit { sign: Sign, digits: Box<[u8]> },
    /// An unsigned decimal integer (trailing `u` in source). Still carries a sign, since the
    /// grammar requires one (`+5u`/`-5u`); "unsigned" describes the value's interpretation, not
    /// its written form.
    UIntLit { sign: Sign, digits: Box<[u8]> },
    /// A float literal; always contains a `.` or an `E` in its written form.
    FloatLit {
        sign: Sign,
        digits: Box<[u8]>,
        frac: Option<Box<[u8]>>,
        exp: Option<FloatExp>,
    },
    /// One byte, after escape decoding, from between single quotes.
    CharLit(u8),
    /// An arbitrary byte sequence, after escape decoding, from between double quotes. May
    /// contain any byte, including `0x00` and newlines.
    StringLit(Box<[u8]>),
}

/// Whether a [`Atom::Symbol`]/[`Atom::SymbolDef`] is local (one dot, digit tail) or global (two
/// or more dots).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Exactly one dot, with an all-digit tail, e.g. `foo.0`.
    Local,
    /// Two or more dots, e.g. `foo.0.mod`.
    Global,
}

/// Classifies already-expanded symbol bytes (no trailing dot) as [`SymbolKind::Local`] or
/// [`SymbolKind::Global`], or returns `None` if the bytes violate the dot/digit-tail rules.
///
/// `bytes` must be non-empty and must not begin with `.`; callers (the parser, principally) are
/// expected to have already confirmed that much via the lexical grammar before classifying.
pub fn symbol_kind(bytes: &[u8]) -> Option<SymbolKind> {
    let dot_count = bytes.iter().filter(|&&b| b == b'.').count();
    match dot_count {
        0 => None,
        1 => {
            let tail = bytes.rsplit(|&b| b == b'.').next().unwrap_or(b"");
            if !tail.is_empty() && tail.iter().all(u8::is_ascii_digit) {
                Some(SymbolKind::Local)
            } else {
                None
            }
        }
        _ => Some(SymbolKind::Global),
    }
}

/// `true` if `bytes` ends with a trailing `.`, the on-disk marker for a symbol awaiting
/// module-suffix expansion.
pub fn is_trailing_dot(bytes: &[u8]) -> bool {
    bytes.last() == Some(&b'.')
}

/// Computes a child's absolute `(col, line, file)` from its parent's absolute position and the
/// child's own [`LineInfo`] (or lack of one, which means "same as parent").
///
/// This is the inverse of what a producer does when choosing which [`LineInfo`] variant to
/// attach to a node in the first place; it exists so that consumers (and this crate's own tests,
/// which check the line-info composition invariant directly) can recover absolute source
/// positions without re-implementing delta arithmetic.
pub fn resolve_absolute(
    parent: (i32, i32, Option<&[u8]>),
    line_info: Option<&LineInfo>,
) -> (i32, i32, Option<Box<[u8]>>) {
    let (parent_col, parent_line, parent_file) = parent;
    match line_info {
        None => (parent_col, parent_line, parent_file.map(Box::from)),
        Some(LineInfo::Col(delta)) => (parent_col + delta, parent_line, parent_file.map(Box::from)),
        Some(LineInfo::ColLine { col, line }) => {
            (parent_col + col, parent_line + line, parent_file.map(Box::from))
        }
        Some(LineInfo::ColLineFile { col, line, file }) => (*col, *line, Some(file.clone())),
    }
}

/// Source-position metadata attached to a [`NodeId`], one of three forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineInfo {
    /// Column delta relative to the parent.
    Col(i32),
    /// Column and line delta relative to the parent.
    ColLine { col: i32, line: i32 },
    /// Absolute column, line, and filename. Mandatory on the module root; optional (and rare)
    /// elsewhere, where it resets the file scope for descendants.
    ColLineFile {
        col: i32,
        line: i32,
        file: Box<[u8]>,
    },
}

/// The optional line-info and comment attached to any non-root node.
///
/// Source form places line-info before comment; both are optional, independently. Atoms whose
/// concrete syntax cannot carry a prefix in a given position still carry this field (empty) in
/// memory, for uniformity with nodes that can.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix {
    pub line_info: Option<LineInfo>,
    pub comment: Option<Box<[u8]>>,
}

/// A tagged, ordered sequence of children. Arity is unbounded; tags are free identifiers from an
/// open namespace distinguished from source identifiers only by position (first child of a
/// compound).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compound {
    pub tag: Box<[u8]>,
    pub children: Vec<NodeId>,
}

/// Either an atom or a compound node; what a [`NodeId`] resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Atom(Atom),
    Compound(Compound),
}

impl NodeKind {
    pub fn as_atom(&self) -> Option<&Atom> {
        match self {
            NodeKind::Atom(a) => Some(a),
            NodeKind::Compound(_) => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            NodeKind::Compound(c) => Some(c),
            NodeKind::Atom(_) => None,
        }
    }
}

/// One slot in an [`Arena`]: a node's prefix, its atom-or-compound payload, and (if it came from
/// a parse rather than programmatic construction) the byte offset of its first source byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub prefix: Prefix,
    pub kind: NodeKind,
    /// Byte offset of the `(` (for a compound) or the first token byte (for an atom) in the
    /// source this node was parsed from. `None` for nodes built programmatically.
    pub source_offset: Option<usize>,
}

/// Owns every [`NodeRecord`] in a module. Freed only by dropping the arena itself; there is no
/// per-node reference counting or individual deallocation.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    nodes: Vec<NodeRecord>,
}

impl Arena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stores a new node and returns the id it can be referenced by.
    pub fn alloc(&mut self, prefix: Prefix, kind: NodeKind, source_offset: Option<usize>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(NodeRecord {
            prefix,
            kind,
            source_offset,
        });
        id
    }

    pub fn get(&self, id: NodeId) -> &NodeRecord {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        &mut self.nodes[id.index()]
    }
}

/// Where a directive came from in source, used by the writer to patch `.indexat` in place.
pub type SourceSpan = Range<usize>;

/// A recognized or opaque top-of-file directive. Unknown directives are preserved verbatim as
/// [`Directive::Unknown`] rather than rejected, so forward compatibility does not require this
/// enum to be exhaustive over every tag ever minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `(.nifNN)`, the required first directive.
    Version(u32),
    /// `(.indexat +offset)`. `source_span`, if this came from a parse, is the full byte range of
    /// the directive including its padding, so the writer can overwrite it in place.
    IndexAt {
        offset: u64,
        source_span: Option<SourceSpan>,
    },
    /// `(.unusedname sym)`: the first free temporary name.
    UnusedName(Box<[u8]>),
    Vendor(Box<[u8]>),
    Platform(Box<[u8]>),
    Config(Box<[u8]>),
    /// `(.lang "name" body...)`. Structural: the parser does not swap tag sets based on this,
    /// only records the scope. `node` is the full `.lang` compound, preserved verbatim so nested
    /// content round-trips exactly.
    Lang { name: Box<[u8]>, node: NodeId },
    /// `(.dialect "name")`, a deprecated alias for [`Directive::Lang`].
    Dialect { name: Box<[u8]>, node: NodeId },
    /// Any directive whose tag is not among the recognized set. Preserved as the raw compound
    /// node so a writer that doesn't understand it can still emit it unchanged.
    Unknown { tag: Box<[u8]>, node: NodeId },
}

/// Whether an indexed symbol is importable from outside its defining module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Exported,
    Hidden,
}

/// One entry of a `.index`: a global symbol and the absolute byte offset of the `(` that opens
/// the compound node defining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub visibility: Visibility,
    pub symbol: Box<[u8]>,
    pub offset: u64,
}

/// The trailing `.index`: an ordered list of exportable-symbol offsets. On disk each entry's
/// offset is stored as a delta from the previous entry (or from zero, for the first); in memory
/// offsets are always absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    pub entries: Vec<IndexEntry>,
}

/// A parsed (or programmatically constructed) NIF module: directives, a body of top-level
/// nodes, and an optional trailing index, all backed by one [`Arena`].
#[derive(Debug, Clone)]
pub struct Module {
    pub arena: Arena,
    pub directives: Vec<Directive>,
    pub body: Vec<NodeId>,
    pub index: Option<Index>,
}

impl Module {
    /// An empty module with no version directive yet: a starting point for programmatic
    /// construction, not a value [`crate::writer::write`] will accept as-is (a version
    /// directive is required).
    pub fn empty() -> Self {
        Self {
            arena: Arena::new(),
            directives: Vec::new(),
            body: Vec::new(),
            index: None,
        }
    }

    pub fn node(&self, id: NodeId) -> &NodeRecord {
        self.arena.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        self.arena.get_mut(id)
    }

    /// The declared version number, if a `(.nifNN)` directive is present.
    pub fn version(&self) -> Option<u32> {
        self.directives.iter().find_map(|d| match d {
            Directive::Version(n) => Some(*n),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_local_and_global_symbols() {
        assert_eq!(symbol_kind(b"foo.0"), Some(SymbolKind::Local));
        assert_eq!(symbol_kind(b"foo.0.mod"), Some(SymbolKind::Global));
        assert_eq!(symbol_kind(b"foo.0.inst.mod"), Some(SymbolKind::Global));
    }

    #[test]
    fn rejects_single_dot_with_non_digit_tail() {
        assert_eq!(symbol_kind(b"foo.bar"), None);
    }

    #[test]
    fn rejects_no_dot() {
        assert_eq!(symbol_kind(b"foo"), None);
    }

    #[test]
    fn detects_trailing_dot() {
        assert!(is_trailing_dot(b"foo.0."));
        assert!(!is_trailing_dot(b"foo.0"));
    }

    #[test]
    fn resolves_absolute_position_from_deltas() {
        let root = (1, 1, Some(b"f.nim".as_slice()));
        let child = resolve_absolute(root, Some(&LineInfo::Col(4)));
        assert_eq!(child, (5, 1, Some(b"f.nim".as_slice().into())));
    }

    #[test]
    fn absent_line_info_means_same_as_parent() {
        let root = (3, 7, Some(b"f.nim".as_slice()));
        assert_eq!(
            resolve_absolute(root, None),
            (3, 7, Some(b"f.nim".as_slice().into()))
        );
    }

    #[test]
    fn arena_round_trips_a_node() {
        let mut arena = Arena::new();
        let id = arena.alloc(Prefix::default(), NodeKind::Atom(Atom::Empty), Some(3));
        assert_eq!(arena.get(id).source_offset, Some(3));
        assert_eq!(arena.len(), 1);
    }
}
