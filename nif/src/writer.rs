//! Formats a [`Module`] back to bytes, including in-place `.indexat` patching.

use std::io::{self, Seek, SeekFrom, Write};

use crate::ast::{
    Atom, Directive, Index, IndexEntry, LineInfo, Module, NodeId, NodeKind, Sign, Visibility,
};
use crate::error::{Error, Result};
use crate::escape::{Context, encode_bytes};
use crate::lexer::{self, TokenStart};

/// Minimum width, in bytes, reserved for a patched `.indexat` offset: `+` plus up to 11 digits,
/// which holds any offset up to ~10^11 without the file needing to shift.
const INDEXAT_PAD: usize = 12;

/// Per-symbol export visibility supplied by the caller when writing, keyed by [`NodeId`] of the
/// `SymbolDef` atom it was attached to. Symbols with no entry default to [`Visibility::Exported`].
#[derive(Debug, Clone, Default)]
pub struct VisibilityMap {
    overrides: Vec<(NodeId, Visibility)>,
}

impl VisibilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, def_node: NodeId, visibility: Visibility) {
        self.overrides.push((def_node, visibility));
    }

    fn lookup(&self, def_node: NodeId) -> Visibility {
        self.overrides
            .iter()
            .rev()
            .find(|(id, _)| *id == def_node)
            .map(|(_, v)| *v)
            .unwrap_or(Visibility::Exported)
    }
}

/// Options controlling [`write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Whether to build and emit a trailing `.index` over exportable global `SymbolDef`s found
    /// in the body. Requires a seekable sink (see [`Error::NonSeekableSinkWithIndex`]).
    pub emit_index: bool,
    pub visibility: VisibilityMap,
}

/// Writes `module` to `sink`, which must support seeking whenever [`WriteOptions::emit_index`]
/// is set (the `.indexat` placeholder is patched in place after the body and index are known).
pub fn write<W: Write + Seek>(sink: &mut W, module: &Module, options: &WriteOptions) -> Result<()> {
    let mut out = Vec::new();
    write_version(&mut out, module)?;

    let indexat_pad_pos = if options.emit_index {
        out.extend_from_slice(b"(.indexat ");
        let pad_pos = out.len();
        out.extend(std::iter::repeat(b' ').take(INDEXAT_PAD));
        out.extend_from_slice(b")\n");
        Some(pad_pos)
    } else {
        if let Some(Directive::IndexAt { offset, .. }) = module
            .directives
            .iter()
            .find(|d| matches!(d, Directive::IndexAt { .. }))
        {
            out.extend_from_slice(format!("(.indexat +{offset})\n").as_bytes());
        }
        None
    };

    let mut ordered_directives: Vec<&Directive> = module.directives.iter().collect();
    ordered_directives.sort_by_key(|d| directive_rank(d));
    for directive in ordered_directives {
        write_non_version_non_indexat_directive(&mut out, module, directive)?;
    }

    let mut registry = Vec::new();
    for &id in &module.body {
        out.push(b'\n');
        write_node(&mut out, module, id, &mut Some((&mut registry, &options.visibility)))?;
    }
    out.push(b'\n');

    if options.emit_index {
        let index = build_index(&registry);
        out.push(b'\n');
        let index_start = out.len();
        write_index(&mut out, &index)?;

        sink.write_all(&out)?;

        let digits = format_indexat(index_start)?;
        let pad_pos = indexat_pad_pos.expect("emit_index implies a reserved pad");
        sink.seek(SeekFrom::Start(pad_pos as u64))?;
        sink.write_all(&digits)?;
        return Ok(());
    }

    if let Some(existing) = &module.index {
        out.push(b'\n');
        write_index(&mut out, existing)?;
    }

    sink.write_all(&out)?;
    Ok(())
}

/// §4.5's fixed directive emission order: version and `.indexat` are handled separately by
/// [`write`] itself, so this only needs to rank the rest. Directives outside the named set (lang,
/// dialect, unknown) sort last, in their original relative order.
fn directive_rank(directive: &Directive) -> u8 {
    match directive {
        Directive::Version(_) | Directive::IndexAt { .. } => 0,
        Directive::UnusedName(_) => 1,
        Directive::Vendor(_) => 2,
        Directive::Platform(_) => 3,
        Directive::Config(_) => 4,
        Directive::Lang { .. } | Directive::Dialect { .. } | Directive::Unknown { .. } => 5,
    }
}

/// Writes `module` to an in-memory buffer. Convenience wrapper around [`write`] for callers that
/// do not need an external sink; always able to satisfy the seekability requirement.
pub fn write_to_vec(module: &Module, options: &WriteOptions) -> Result<Vec<u8>> {
    let mut cursor = io::Cursor::new(Vec::new());
    write(&mut cursor, module, options)?;
    Ok(cursor.into_inner())
}

fn write_version(out: &mut Vec<u8>, module: &Module) -> Result<()> {
    let version = module.version().unwrap_or(26);
    out.extend_from_slice(format!("(.nif{version})").as_bytes());
    Ok(())
}

fn write_non_version_non_indexat_directive(
    out: &mut Vec<u8>,
    module: &Module,
    directive: &Directive,
) -> Result<()> {
    match directive {
        Directive::Version(_) | Directive::IndexAt { .. } => {}
        Directive::UnusedName(sym) => {
            out.push(b'\n');
            out.extend_from_slice(b"(.unusedname ");
            out.extend(encode_bytes(sym, Context::Symbol));
            out.push(b')');
        }
        Directive::Vendor(s) => write_string_directive(out, b"vendor", s),
        Directive::Platform(s) => write_string_directive(out, b"platform", s),
        Directive::Config(s) => write_string_directive(out, b"config", s),
        Directive::Lang { node, .. } | Directive::Dialect { node, .. } => {
            out.push(b'\n');
            write_node(out, module, *node, &mut None)?;
        }
        Directive::Unknown { node, .. } => {
            out.push(b'\n');
            write_node(out, module, *node, &mut None)?;
        }
    }
    Ok(())
}

fn write_string_directive(out: &mut Vec<u8>, tag: &[u8], value: &[u8]) {
    out.push(b'\n');
    out.push(b'(');
    out.push(b'.');
    out.extend_from_slice(tag);
    out.push(b' ');
    out.push(b'"');
    out.extend(encode_bytes(value, Context::StringLit));
    out.push(b'"');
    out.push(b')');
}

type Registry<'a> = (&'a mut Vec<(Visibility, Box<[u8]>, u64)>, &'a VisibilityMap);

fn write_node(
    out: &mut Vec<u8>,
    module: &Module,
    id: NodeId,
    registry: &mut Option<Registry>,
) -> Result<()> {
    write_node_with_parent(out, module, id, (0, 0, None), registry)
}

fn write_node_with_parent(
    out: &mut Vec<u8>,
    module: &Module,
    id: NodeId,
    parent: (i32, i32, Option<&[u8]>),
    registry: &mut Option<Registry>,
) -> Result<()> {
    let record = module.node(id);
    write_prefix(out, &record.prefix, parent);
    let (col, line, file) = crate::ast::resolve_absolute(parent, record.prefix.line_info.as_ref());
    let child_parent = (col, line, file.as_deref());

    match &record.kind {
        NodeKind::Atom(atom) => write_atom(out, atom),
        NodeKind::Compound(compound) => {
            let start_offset = out.len() as u64;
            out.push(b'(');
            out.extend(encode_bytes(&compound.tag, Context::Identifier));
            maybe_register_export(module, compound.children.first().copied(), start_offset, registry);
            for &child in &compound.children {
                insert_adjacency_space(out, module, child);
                out.push(b' ');
                write_node_with_parent(out, module, child, child_parent, registry)?;
            }
            out.push(b')');
            Ok(())
        }
    }
}

fn maybe_register_export(
    module: &Module,
    first_child: Option<NodeId>,
    start_offset: u64,
    registry: &mut Option<Registry>,
) {
    let Some(registry) = registry else { return };
    let Some(first_child) = first_child else { return };
    let NodeKind::Atom(Atom::SymbolDef(symbol)) = &module.node(first_child).kind else {
        return;
    };
    if crate::ast::symbol_kind(symbol) != Some(crate::ast::SymbolKind::Global) {
        return;
    }
    let visibility = registry.1.lookup(first_child);
    registry.0.push((visibility, symbol.clone(), start_offset));
}

/// Per §4.5, the writer separates an emitted `.` (empty atom) from an immediately following
/// identifier-shaped token with a space, since otherwise the two would re-lex as one symbol on
/// the next parse.
fn insert_adjacency_space(out: &mut Vec<u8>, module: &Module, next: NodeId) {
    if out.last() != Some(&b'.') {
        return;
    }
    let NodeKind::Atom(atom) = &module.node(next).kind else {
        return;
    };
    let starts_ident = match atom {
        Atom::Identifier(bytes) | Atom::Symbol(bytes) => bytes
            .first()
            .is_some_and(|&b| crate::escape::is_ident_start_byte(b)),
        _ => false,
    };
    if starts_ident {
        out.push(b' ');
    }
}

fn write_prefix(out: &mut Vec<u8>, prefix: &crate::ast::Prefix, parent: (i32, i32, Option<&[u8]>)) {
    if let Some(line_info) = &prefix.line_info {
        write_line_info(out, line_info, parent);
    }
    if let Some(comment) = &prefix.comment {
        out.push(b'#');
        out.extend(encode_bytes(comment, Context::Comment));
        out.push(b'#');
    }
}

fn write_line_info(out: &mut Vec<u8>, line_info: &LineInfo, _parent: (i32, i32, Option<&[u8]>)) {
    match line_info {
        LineInfo::Col(delta) => write_delta(out, *delta),
        LineInfo::ColLine { col, line } => {
            write_delta(out, *col);
            out.push(b',');
            write_delta(out, *line);
        }
        LineInfo::ColLineFile { col, line, file } => {
            write_delta(out, *col);
            out.push(b',');
            write_delta(out, *line);
            out.push(b',');
            out.extend(encode_bytes(file, Context::LineInfoFile));
        }
    }
}

fn write_delta(out: &mut Vec<u8>, delta: i32) {
    if delta < 0 {
        out.push(b'~');
        out.extend_from_slice(delta.unsigned_abs().to_string().as_bytes());
    } else {
        out.extend_from_slice(delta.to_string().as_bytes());
    }
}

fn write_atom(out: &mut Vec<u8>, atom: &Atom) -> Result<()> {
    match atom {
        Atom::Empty => out.push(b'.'),
        Atom::Identifier(bytes) => out.extend(encode_bytes(bytes, Context::Identifier)),
        Atom::Symbol(bytes) => out.extend(encode_bytes(bytes, Context::Symbol)),
        Atom::SymbolDef(bytes) => {
            out.push(b':');
            out.extend(encode_bytes(bytes, Context::Symbol));
        }
        Atom::IntLit { sign, digits } => {
            out.push(sign.as_byte());
            out.extend_from_slice(digits);
        }
        Atom::UIntLit { sign, digits } => {
            out.push(sign.as_byte());
            out.extend_from_slice(digits);
            out.push(b'u');
        }
        Atom::FloatLit {
            sign,
            digits,
            frac,
            exp,
        } => {
            out.push(sign.as_byte());
            out.extend_from_slice(digits);
            if let Some(frac) = frac {
                out.push(b'.');
                out.extend_from_slice(frac);
            }
            if let Some(exp) = exp {
                out.push(b'E');
                if let Some(sign) = exp.sign {
                    out.push(sign.as_byte());
                }
                out.extend_from_slice(&exp.digits);
            }
        }
        Atom::CharLit(byte) => {
            out.push(b'\'');
            let mut buf = Vec::new();
            crate::escape::encode_byte(&mut buf, *byte, Context::CharLit);
            out.extend(buf);
            out.push(b'\'');
        }
        Atom::StringLit(bytes) => {
            out.push(b'"');
            out.extend(encode_bytes(bytes, Context::StringLit));
            out.push(b'"');
        }
    }
    Ok(())
}

fn build_index(registry: &[(Visibility, Box<[u8]>, u64)]) -> Index {
    let mut entries = Vec::with_capacity(registry.len());
    for (visibility, symbol, offset) in registry {
        entries.push(IndexEntry {
            visibility: *visibility,
            symbol: symbol.clone(),
            offset: *offset,
        });
    }
    Index { entries }
}

fn write_index(out: &mut Vec<u8>, index: &Index) -> Result<()> {
    out.extend_from_slice(b"(.index");
    let mut previous: i64 = 0;
    for entry in &index.entries {
        let delta = entry.offset as i64 - previous;
        previous = entry.offset as i64;
        out.push(b'\n');
        out.push(b'(');
        out.push(match entry.visibility {
            Visibility::Exported => b'x',
            Visibility::Hidden => b'h',
        });
        out.push(b' ');
        out.extend(encode_bytes(&entry.symbol, Context::Symbol));
        out.push(b' ');
        let sign = if delta < 0 { Sign::Minus } else { Sign::Plus };
        out.push(sign.as_byte());
        out.extend_from_slice(delta.unsigned_abs().to_string().as_bytes());
        out.push(b')');
    }
    out.push(b'\n');
    out.push(b')');
    Ok(())
}

fn format_indexat(offset: usize) -> Result<Vec<u8>> {
    let digits = format!("+{offset}");
    if digits.len() > INDEXAT_PAD {
        return Err(Error::IndexPadInsufficient {
            available: INDEXAT_PAD,
            needed: digits.len(),
        });
    }
    let mut out = digits.into_bytes();
    out.resize(INDEXAT_PAD, b' ');
    Ok(out)
}

/// Decides, for a given byte slice about to be emitted, whether [`lexer::classify`] would read it
/// back as the same token kind it started as. Exposed for the writer's own tests and for callers
/// assembling output manually outside of [`write`].
pub fn starts_identifier(bytes: &[u8]) -> bool {
    matches!(lexer::classify(bytes), TokenStart::IdentOrSymbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Arena, Compound, NodeKind, Prefix};
    use pretty_assertions::assert_eq;

    fn simple_module() -> Module {
        let mut arena = Arena::new();
        let sym = arena.alloc(Prefix::default(), NodeKind::Atom(Atom::Symbol(b"write.1.sys".as_slice().into())), None);
        let text = arena.alloc(
            Prefix::default(),
            NodeKind::Atom(Atom::StringLit(b"hi".as_slice().into())),
            None,
        );
        let call = arena.alloc(
            Prefix::default(),
            NodeKind::Compound(Compound {
                tag: b"call".as_slice().into(),
                children: vec![sym, text],
            }),
            None,
        );
        let stmts = arena.alloc(
            Prefix::default(),
            NodeKind::Compound(Compound {
                tag: b"stmts".as_slice().into(),
                children: vec![call],
            }),
            None,
        );
        Module {
            arena,
            directives: vec![Directive::Version(26)],
            body: vec![stmts],
            index: None,
        }
    }

    #[test]
    fn writes_version_cookie_first() {
        let module = simple_module();
        let bytes = write_to_vec(&module, &WriteOptions::default()).unwrap();
        assert!(bytes.starts_with(b"(.nif26)"));
    }

    #[test]
    fn writes_nested_compound_body() {
        let module = simple_module();
        let bytes = write_to_vec(&module, &WriteOptions::default()).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("(stmts (call write.1.sys \"hi\"))"));
    }

    #[test]
    fn empty_adjacent_to_identifier_gets_separating_space() {
        let mut out = vec![b'.'];
        let mut arena = Arena::new();
        let id = arena.alloc(
            Prefix::default(),
            NodeKind::Atom(Atom::Identifier(b"x".as_slice().into())),
            None,
        );
        let module = Module {
            arena,
            directives: vec![Directive::Version(26)],
            body: vec![],
            index: None,
        };
        insert_adjacency_space(&mut out, &module, id);
        assert_eq!(out, b". ");
    }

    #[test]
    fn empty_adjacent_to_number_needs_no_space() {
        let mut out = vec![b'.'];
        let mut arena = Arena::new();
        let id = arena.alloc(
            Prefix::default(),
            NodeKind::Atom(Atom::IntLit {
                sign: Sign::Plus,
                digits: b"1".as_slice().into(),
            }),
            None,
        );
        let module = Module {
            arena,
            directives: vec![Directive::Version(26)],
            body: vec![],
            index: None,
        };
        insert_adjacency_space(&mut out, &module, id);
        assert_eq!(out, b".");
    }

    #[test]
    fn format_indexat_left_justifies_and_pads() {
        let digits = format_indexat(42).unwrap();
        assert_eq!(&digits[..3], b"+42");
        assert_eq!(digits.len(), INDEXAT_PAD);
        assert!(digits[3..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn format_indexat_rejects_overflow() {
        let err = format_indexat(10_000_000_000_000).unwrap_err();
        assert!(matches!(err, Error::IndexPadInsufficient { .. }));
    }
}
