//! Recursive-descent parsing of a byte stream into a [`Module`].

use std::ops::Range;

use tracing::trace;

use crate::ast::{
    Arena, Atom, Compound, Directive, FloatExp, Index, IndexEntry, LineInfo, Module, NodeId,
    NodeKind, Prefix, Sign, Visibility, is_trailing_dot, symbol_kind,
};
use crate::error::{Error, Result, Warning, WarningKind};
use crate::lexer::{self, TokenStart};
use crate::reader::Reader;

/// Options controlling how [`parse`] resolves ambiguous or non-fatal situations.
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// The filename this byte stream came from, if any. Used, absent an explicit
    /// [`ParseOptions::module_suffix`], to derive the module suffix for trailing-dot expansion:
    /// the leading dot-separated component of the filename's stem.
    pub filename: Option<String>,
    /// Overrides the module suffix derived from `filename`. Takes priority over it.
    pub module_suffix: Option<Box<[u8]>>,
    /// When `true`, conditions the spec calls warnings in permissive mode (an `.indexat` whose
    /// offset disagrees with where `.index` actually is, an unrecognized directive tag) become
    /// fatal errors instead.
    pub strict: bool,
}

impl ParseOptions {
    fn effective_suffix(&self) -> Option<Box<[u8]>> {
        if let Some(suffix) = &self.module_suffix {
            return Some(suffix.clone());
        }
        let filename = self.filename.as_deref()?;
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let stem = base.split('.').next().unwrap_or(base);
        Some(stem.as_bytes().into())
    }
}

/// The result of a successful parse: the module itself, plus any non-fatal [`Warning`]s observed
/// along the way.
#[derive(Debug)]
pub struct ParseOutput {
    pub module: Module,
    pub warnings: Vec<Warning>,
}

/// Parses one NIF module from `bytes`.
pub fn parse(bytes: &[u8], options: &ParseOptions) -> Result<ParseOutput> {
    let mut reader = Reader::new(bytes);
    let version = parse_version_cookie(&mut reader)?;
    trace!(version, "parsed version cookie");

    let mut state = State {
        reader,
        arena: Arena::new(),
        directives: vec![Directive::Version(version)],
        body: Vec::new(),
        index: None,
        index_offset: None,
        warnings: Vec::new(),
        options: options.clone(),
        suffix: options.effective_suffix(),
    };

    loop {
        state.reader.skip_whitespace();
        if state.reader.is_at_end() {
            break;
        }
        if state.reader.peek() == Some(b')') {
            return Err(Error::UnexpectedClose {
                offset: state.reader.offset(),
            });
        }
        let node_id = parse_node(&mut state)?;
        route_top_level_node(&mut state, node_id)?;
    }

    check_index_offset(&mut state)?;

    Ok(ParseOutput {
        module: Module {
            arena: state.arena,
            directives: state.directives,
            body: state.body,
            index: state.index,
        },
        warnings: state.warnings,
    })
}

fn check_index_offset(state: &mut State<'_>) -> Result<()> {
    let Some(actual) = state.index_offset else {
        return Ok(());
    };
    let claimed = state.directives.iter().find_map(|d| match d {
        Directive::IndexAt { offset, .. } => Some(*offset),
        _ => None,
    });
    let Some(claimed) = claimed else {
        return Ok(());
    };
    if claimed == actual as u64 {
        return Ok(());
    }
    if state.options.strict {
        return Err(Error::IndexOffsetMismatch {
            offset: actual,
            expected: claimed,
            found: actual as u64,
        });
    }
    state.warnings.push(Warning {
        offset: actual,
        kind: WarningKind::IndexOffsetMismatch {
            expected: claimed,
            found: actual as u64,
        },
    });
    Ok(())
}

struct State<'a> {
    reader: Reader<'a>,
    arena: Arena,
    directives: Vec<Directive>,
    body: Vec<NodeId>,
    index: Option<Index>,
    /// Byte offset of the `.index` directive's opening `(`, once one has been parsed. Compared
    /// against any `.indexat` directive's claimed offset after the top-level loop finishes,
    /// since `.index` may appear either among the leading directives or after the body.
    index_offset: Option<usize>,
    warnings: Vec<Warning>,
    options: ParseOptions,
    suffix: Option<Box<[u8]>>,
}

fn parse_version_cookie(reader: &mut Reader) -> Result<u32> {
    let offset = reader.offset();
    let fail = || Error::UnrecognizedVersion { offset };
    if reader.peek() != Some(b'(') {
        return Err(fail());
    }
    reader.advance(1);
    if reader.peek() != Some(b'.') {
        return Err(fail());
    }
    reader.advance(1);
    let tag_start = reader.offset();
    while reader.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
        reader.advance(1);
    }
    let tag = reader.source()[tag_start..reader.offset()].to_ascii_lowercase();
    if tag != b"nif" {
        return Err(fail());
    }
    let digits_start = reader.offset();
    while reader.peek().is_some_and(|b| b.is_ascii_digit()) {
        reader.advance(1);
    }
    if reader.offset() == digits_start {
        return Err(fail());
    }
    let version: u32 = std::str::from_utf8(&reader.source()[digits_start..reader.offset()])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(fail)?;
    if reader.peek() != Some(b')') {
        return Err(fail());
    }
    reader.advance(1);
    // 26 is current; 24 is accepted for back-compat, per the format's own versioning note.
    if version != 26 && version != 24 {
        return Err(fail());
    }
    Ok(version)
}

fn route_top_level_node(state: &mut State<'_>, node_id: NodeId) -> Result<()> {
    let is_directive = matches!(
        &state.arena.get(node_id).kind,
        NodeKind::Compound(c) if c.tag.first() == Some(&b'.')
    );
    if is_directive {
        dispatch_directive(state, node_id)
    } else {
        state.body.push(node_id);
        Ok(())
    }
}

fn dispatch_directive(state: &mut State<'_>, node_id: NodeId) -> Result<()> {
    let offset = state
        .arena
        .get(node_id)
        .source_offset
        .expect("parsed node always has a source offset");
    let (tag, children) = {
        let record = state.arena.get(node_id);
        let compound = record.kind.as_compound().expect("directive is a compound");
        (compound.tag[1..].to_vec(), compound.children.clone())
    };

    match tag.as_slice() {
        b"nif26" | b"nif24" => {
            // A second version cookie mid-file is not meaningful; preserve it opaquely rather
            // than rejecting the file over it.
            state.directives.push(Directive::Unknown {
                tag: tag.into(),
                node: node_id,
            });
        }
        b"indexat" => {
            let value = expect_single_int_child(state, &children, offset)?;
            let span: Range<usize> = offset..state.reader.offset();
            state.directives.push(Directive::IndexAt {
                offset: value,
                source_span: Some(span),
            });
        }
        b"index" => {
            let index = parse_index_children(state, &children)?;
            state.index = Some(index);
            state.index_offset = Some(offset);
        }
        b"unusedname" => {
            let sym = expect_single_symbol_child(state, &children, offset)?;
            state.directives.push(Directive::UnusedName(sym));
        }
        b"vendor" => {
            let s = expect_single_string_child(state, &children, offset)?;
            state.directives.push(Directive::Vendor(s));
        }
        b"platform" => {
            let s = expect_single_string_child(state, &children, offset)?;
            state.directives.push(Directive::Platform(s));
        }
        b"config" => {
            let s = expect_single_string_child(state, &children, offset)?;
            state.directives.push(Directive::Config(s));
        }
        b"lang" => {
            let name = expect_first_string_child(state, &children, offset)?;
            state.directives.push(Directive::Lang {
                name,
                node: node_id,
            });
        }
        b"dialect" => {
            let name = expect_first_string_child(state, &children, offset)?;
            state.directives.push(Directive::Dialect {
                name,
                node: node_id,
            });
        }
        _ => {
            if state.options.strict {
                return Err(Error::UnsupportedDirective {
                    offset,
                    tag: String::from_utf8_lossy(&tag).into_owned(),
                });
            }
            state.warnings.push(Warning {
                offset,
                kind: WarningKind::UnsupportedDirective {
                    tag: String::from_utf8_lossy(&tag).into_owned(),
                },
            });
            state.directives.push(Directive::Unknown {
                tag: tag.into(),
                node: node_id,
            });
        }
    }
    Ok(())
}

fn expect_single_int_child(state: &State<'_>, children: &[NodeId], offset: usize) -> Result<u64> {
    let id = *children.first().ok_or(Error::BadNumber { offset })?;
    match &state.arena.get(id).kind {
        NodeKind::Atom(Atom::IntLit { digits, .. }) | NodeKind::Atom(Atom::UIntLit { digits, .. }) => {
            digits_to_u64(digits).ok_or(Error::BadNumber { offset })
        }
        _ => Err(Error::BadNumber { offset }),
    }
}

fn expect_single_symbol_child(
    state: &State<'_>,
    children: &[NodeId],
    offset: usize,
) -> Result<Box<[u8]>> {
    let id = *children.first().ok_or(Error::MalformedSymbol { offset })?;
    match &state.arena.get(id).kind {
        NodeKind::Atom(Atom::Symbol(bytes)) => Ok(bytes.clone()),
        _ => Err(Error::MalformedSymbol { offset }),
    }
}

fn expect_single_string_child(
    state: &State<'_>,
    children: &[NodeId],
    offset: usize,
) -> Result<Box<[u8]>> {
    expect_first_string_child(state, children, offset)
}

fn expect_first_string_child(
    state: &State<'_>,
    children: &[NodeId],
    offset: usize,
) -> Result<Box<[u8]>> {
    let id = *children
        .first()
        .ok_or(Error::UnsupportedDirective {
            offset,
            tag: String::new(),
        })?;
    match &state.arena.get(id).kind {
        NodeKind::Atom(Atom::StringLit(bytes)) => Ok(bytes.clone()),
        _ => Err(Error::UnsupportedDirective {
            offset,
            tag: String::new(),
        }),
    }
}

fn parse_index_children(state: &State<'_>, children: &[NodeId]) -> Result<Index> {
    let mut entries = Vec::with_capacity(children.len());
    let mut cumulative: i64 = 0;
    for &id in children {
        let record = state.arena.get(id);
        let offset = record.source_offset.unwrap_or(0);
        let compound = record
            .kind
            .as_compound()
            .ok_or(Error::BadNumber { offset })?;
        let visibility = match compound.tag.as_ref() {
            b"x" => Visibility::Exported,
            b"h" => Visibility::Hidden,
            _ => return Err(Error::BadNumber { offset }),
        };
        let symbol_id = *compound.children.first().ok_or(Error::MalformedSymbol { offset })?;
        let symbol = match &state.arena.get(symbol_id).kind {
            NodeKind::Atom(Atom::Symbol(bytes)) => bytes.clone(),
            _ => return Err(Error::MalformedSymbol { offset }),
        };
        if symbol_kind(&symbol) != Some(crate::ast::SymbolKind::Global) {
            return Err(Error::MalformedSymbol { offset });
        }
        let delta_id = *compound.children.get(1).ok_or(Error::BadNumber { offset })?;
        let delta = match &state.arena.get(delta_id).kind {
            NodeKind::Atom(Atom::IntLit { sign, digits }) => {
                let magnitude = digits_to_i64(digits).ok_or(Error::BadNumber { offset })?;
                match sign {
                    Sign::Plus => magnitude,
                    Sign::Minus => -magnitude,
                }
            }
            _ => return Err(Error::BadNumber { offset }),
        };
        cumulative += delta;
        if cumulative < 0 {
            return Err(Error::BadNumber { offset });
        }
        entries.push(IndexEntry {
            visibility,
            symbol,
            offset: cumulative as u64,
        });
    }
    Ok(Index { entries })
}

fn digits_to_u64(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn digits_to_i64(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

fn parse_node(state: &mut State<'_>) -> Result<NodeId> {
    let prefix = parse_prefix(state)?;
    let offset = state.reader.offset();
    let lookahead = state.reader.peek_slice(2);
    match lexer::classify(lookahead) {
        TokenStart::Open => parse_compound(state, prefix, offset),
        TokenStart::Eof => Err(Error::UnterminatedCompound { offset }),
        _ => {
            let atom = parse_atom(state, offset)?;
            Ok(state.arena.alloc(prefix, NodeKind::Atom(atom), Some(offset)))
        }
    }
}

fn parse_prefix(state: &mut State<'_>) -> Result<Prefix> {
    state.reader.skip_whitespace();
    let line_info = if matches!(
        lexer::classify(state.reader.peek_slice(2)),
        TokenStart::LineInfo
    ) {
        Some(parse_line_info(state)?)
    } else {
        None
    };
    state.reader.skip_whitespace();
    let comment = if state.reader.peek() == Some(b'#') {
        Some(parse_comment(state)?)
    } else {
        None
    };
    Ok(Prefix { line_info, comment })
}

fn parse_compound(state: &mut State<'_>, outer_prefix: Prefix, offset: usize) -> Result<NodeId> {
    state.reader.advance(1); // '('

    // 2024 back-compat: a compound could carry its own prefix directly after '(', before the
    // tag. The 2026 grammar places prefixes on the surrounding node instead; fold either form
    // into one `Prefix` so the in-memory tree never distinguishes them.
    let inner_prefix = parse_prefix(state)?;
    let prefix = merge_prefix(outer_prefix, inner_prefix);

    let tag = scan_tag(state)?;
    let mut children = Vec::new();
    loop {
        state.reader.skip_whitespace();
        match state.reader.peek() {
            None => return Err(Error::UnterminatedCompound { offset }),
            Some(b')') => {
                state.reader.advance(1);
                break;
            }
            _ => children.push(parse_node(state)?),
        }
    }
    let compound = Compound {
        tag: tag.into(),
        children,
    };
    Ok(state.arena.alloc(prefix, NodeKind::Compound(compound), Some(offset)))
}

fn merge_prefix(outer: Prefix, inner: Prefix) -> Prefix {
    Prefix {
        line_info: outer.line_info.or(inner.line_info),
        comment: outer.comment.or(inner.comment),
    }
}

fn scan_tag(state: &mut State<'_>) -> Result<Vec<u8>> {
    let offset = state.reader.offset();
    let mut out = Vec::new();
    if state.reader.peek() == Some(b'.') {
        out.push(b'.');
        state.reader.advance(1);
    }
    if !state
        .reader
        .peek()
        .is_some_and(crate::escape::is_ident_start_byte)
    {
        return Err(Error::MalformedSymbol { offset });
    }
    scan_ident_chars(state, &mut out)?;
    Ok(out)
}

fn scan_ident_chars(state: &mut State<'_>, out: &mut Vec<u8>) -> Result<()> {
    loop {
        match state.reader.peek() {
            Some(b'\\') => {
                let esc_offset = state.reader.offset();
                state.reader.advance(1);
                let hi = state.reader.bump();
                let lo = state.reader.bump();
                out.push(crate::escape::decode_escape(esc_offset, hi, lo)?);
            }
            Some(b) if crate::escape::is_ident_continue_byte(b) => {
                out.push(b);
                state.reader.advance(1);
            }
            _ => break,
        }
    }
    Ok(())
}

/// Scans one identifier-or-symbol word. Returns the decoded bytes and whether a `.` was seen
/// (making this a [`Atom::Symbol`] rather than a plain [`Atom::Identifier`]).
fn scan_word(state: &mut State<'_>) -> Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    scan_ident_chars(state, &mut out)?;
    let mut is_symbol = false;
    while state.reader.peek() == Some(b'.') {
        is_symbol = true;
        out.push(b'.');
        state.reader.advance(1);
        scan_ident_chars(state, &mut out)?;
    }
    Ok((out, is_symbol))
}

fn finalize_symbol(state: &mut State<'_>, raw: Vec<u8>, offset: usize) -> Result<Box<[u8]>> {
    if is_trailing_dot(&raw) {
        match &state.suffix {
            Some(suffix) => {
                let mut expanded = raw;
                expanded.extend_from_slice(suffix);
                Ok(expanded.into())
            }
            None => Err(Error::TrailingDotWithoutSuffix { offset }),
        }
    } else if symbol_kind(&raw).is_some() {
        Ok(raw.into())
    } else {
        Err(Error::MalformedSymbol { offset })
    }
}

fn parse_atom(state: &mut State<'_>, offset: usize) -> Result<Atom> {
    match lexer::classify(state.reader.peek_slice(2)) {
        TokenStart::Dot => {
            state.reader.advance(1);
            Ok(Atom::Empty)
        }
        TokenStart::SymbolDefPrefix => {
            state.reader.advance(1);
            let sym_offset = state.reader.offset();
            let (raw, is_symbol) = scan_word(state)?;
            if !is_symbol {
                return Err(Error::MalformedSymbol { offset: sym_offset });
            }
            let bytes = finalize_symbol(state, raw, sym_offset)?;
            Ok(Atom::SymbolDef(bytes))
        }
        TokenStart::Number => scan_number(state, offset),
        TokenStart::CharLit => scan_char(state, offset),
        TokenStart::StringLit => scan_string(state, offset),
        TokenStart::IdentOrSymbol => {
            let (raw, is_symbol) = scan_word(state)?;
            if is_symbol {
                let bytes = finalize_symbol(state, raw, offset)?;
                Ok(Atom::Symbol(bytes))
            } else {
                Ok(Atom::Identifier(raw.into()))
            }
        }
        TokenStart::LineInfo => Err(Error::BadLineInfo { offset }),
        TokenStart::Open | TokenStart::Close | TokenStart::Whitespace | TokenStart::Eof
        | TokenStart::CommentOpen => Err(Error::UnterminatedCompound { offset }),
    }
}

fn scan_digits(state: &mut State<'_>) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(b) = state.reader.peek() {
        if b.is_ascii_digit() {
            out.push(b);
            state.reader.advance(1);
        } else {
            break;
        }
    }
    out
}

fn scan_number(state: &mut State<'_>, offset: usize) -> Result<Atom> {
    let sign = match state.reader.bump() {
        Some(b'+') => Sign::Plus,
        Some(b'-') => Sign::Minus,
        _ => return Err(Error::BadNumber { offset }),
    };
    let digits = scan_digits(state);
    if digits.is_empty() {
        return Err(Error::BadNumber { offset });
    }
    if state.reader.peek() == Some(b'u') {
        state.reader.advance(1);
        return Ok(Atom::UIntLit {
            sign,
            digits: digits.into(),
        });
    }

    let mut frac = None;
    let mut is_float = false;
    if state.reader.peek() == Some(b'.') {
        state.reader.advance(1);
        let frac_digits = scan_digits(state);
        if frac_digits.is_empty() {
            return Err(Error::BadNumber { offset });
        }
        frac = Some(frac_digits.into());
        is_float = true;
    }

    let mut exp = None;
    if state.reader.peek() == Some(b'E') {
        state.reader.advance(1);
        let exp_sign = match state.reader.peek() {
            Some(b'+') => {
                state.reader.advance(1);
                Some(Sign::Plus)
            }
            Some(b'-') => {
                state.reader.advance(1);
                Some(Sign::Minus)
            }
            _ => None,
        };
        let exp_digits = scan_digits(state);
        if exp_digits.is_empty() {
            return Err(Error::BadNumber { offset });
        }
        exp = Some(FloatExp {
            sign: exp_sign,
            digits: exp_digits.into(),
        });
        is_float = true;
    }

    if is_float {
        Ok(Atom::FloatLit {
            sign,
            digits: digits.into(),
            frac,
            exp,
        })
    } else {
        Ok(Atom::IntLit {
            sign,
            digits: digits.into(),
        })
    }
}

fn scan_char(state: &mut State<'_>, offset: usize) -> Result<Atom> {
    state.reader.advance(1); // opening '
    let byte = match state.reader.peek() {
        Some(b'\\') => {
            let esc_offset = state.reader.offset();
            state.reader.advance(1);
            let hi = state.reader.bump();
            let lo = state.reader.bump();
            crate::escape::decode_escape(esc_offset, hi, lo)?
        }
        Some(b) if b != b'\'' => {
            state.reader.advance(1);
            b
        }
        _ => return Err(Error::UnterminatedChar { offset }),
    };
    if state.reader.peek() != Some(b'\'') {
        return Err(Error::UnterminatedChar { offset });
    }
    state.reader.advance(1);
    Ok(Atom::CharLit(byte))
}

fn scan_string(state: &mut State<'_>, offset: usize) -> Result<Atom> {
    state.reader.advance(1); // opening "
    let mut out = Vec::new();
    loop {
        match state.reader.peek() {
            None => return Err(Error::UnterminatedString { offset }),
            Some(b'"') => {
                state.reader.advance(1);
                break;
            }
            Some(b'\\') => {
                let esc_offset = state.reader.offset();
                state.reader.advance(1);
                let hi = state.reader.bump();
                let lo = state.reader.bump();
                out.push(crate::escape::decode_escape(esc_offset, hi, lo)?);
            }
            Some(b) => {
                out.push(b);
                state.reader.advance(1);
            }
        }
    }
    Ok(Atom::StringLit(out.into()))
}

fn parse_comment(state: &mut State<'_>) -> Result<Box<[u8]>> {
    let offset = state.reader.offset();
    state.reader.advance(1); // opening #
    let mut out = Vec::new();
    loop {
        match state.reader.peek() {
            None => return Err(Error::UnterminatedComment { offset }),
            Some(b'#') => {
                state.reader.advance(1);
                break;
            }
            Some(b'\\') => {
                let esc_offset = state.reader.offset();
                state.reader.advance(1);
                let hi = state.reader.bump();
                let lo = state.reader.bump();
                out.push(crate::escape::decode_escape(esc_offset, hi, lo)?);
            }
            Some(b) => {
                out.push(b);
                state.reader.advance(1);
            }
        }
    }
    Ok(out.into())
}

fn parse_line_info(state: &mut State<'_>) -> Result<LineInfo> {
    let col = scan_delta(state)?;
    if state.reader.peek() != Some(b',') {
        return Ok(LineInfo::Col(col));
    }
    state.reader.advance(1);
    let line = scan_delta(state)?;
    if state.reader.peek() != Some(b',') {
        return Ok(LineInfo::ColLine { col, line });
    }
    state.reader.advance(1);
    let file = scan_line_info_file(state)?;
    Ok(LineInfo::ColLineFile { col, line, file: file.into() })
}

fn scan_delta(state: &mut State<'_>) -> Result<i32> {
    let offset = state.reader.offset();
    let negative = if state.reader.peek() == Some(b'~') {
        state.reader.advance(1);
        true
    } else {
        false
    };
    let digits = scan_digits(state);
    if digits.is_empty() {
        return Err(Error::BadLineInfo { offset });
    }
    let magnitude: i64 = std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(Error::BadLineInfo { offset })?;
    let signed = if negative { -magnitude } else { magnitude };
    i32::try_from(signed).map_err(|_| Error::BadLineInfo { offset })
}

fn scan_line_info_file(state: &mut State<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        match state.reader.peek() {
            None | Some(b'(') | Some(b')') => break,
            Some(b) if crate::reader::is_whitespace(b) => break,
            Some(b'\\') => {
                let esc_offset = state.reader.offset();
                state.reader.advance(1);
                let hi = state.reader.bump();
                let lo = state.reader.bump();
                out.push(crate::escape::decode_escape(esc_offset, hi, lo)?);
            }
            Some(b) => {
                out.push(b);
                state.reader.advance(1);
            }
        }
    }
    Ok(out)
}
