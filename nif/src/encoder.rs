//! The canonical tree-to-identifier encoder: a deterministic, lossy projection of a tree to a
//! single identifier-safe string, with back-reference compression.

use crate::ast::{Atom, Module, NodeId, NodeKind};

/// Bytes that the rewrite step maps structural punctuation onto, and which therefore must be
/// escaped (`X<HH>`) if they occur literally in source atom bytes.
const RESERVED: &[u8] = b"AZEOUXRK";

/// Encodes the tree rooted at `root` into one identifier-safe string.
///
/// Line-info and comments are dropped; node tags and atoms contribute their bytes (rewritten and
/// escaped per the character table), with repeated identifiers/symbols and repeated compound tags
/// compressed into back-references once a second occurrence would otherwise cost more bytes.
pub fn encode(module: &Module, root: NodeId) -> String {
    let mut ctx = EncodeCtx::default();
    let mut out = Vec::new();
    encode_node(module, root, &mut ctx, &mut out);
    strip_trailing_closes(&mut out);
    String::from_utf8(out).expect("encoder alphabet is always valid UTF-8")
}

/// Writes one child (or top-level body node), inserting the separator the minimal serialization
/// calls for: a space before an atom, but never before a compound's opening `(` — which, after
/// the rewrite pass, means never before an `A`. This single rule also covers the "omit the space
/// after `)` and before `(`" case, since two adjacent compounds never get a separator between
/// them either way.
fn write_child(module: &Module, id: NodeId, ctx: &mut EncodeCtx, out: &mut Vec<u8>) {
    if matches!(module.node(id).kind, NodeKind::Atom(_)) {
        out.push(b'_');
    }
    encode_node(module, id, ctx, out);
}

#[derive(Default)]
struct EncodeCtx {
    /// Identifier/symbol atoms, in first-occurrence order: the back-reference table for `R<n>`.
    idents: Vec<Vec<u8>>,
    /// Compound tags, in first-occurrence order: the back-reference table for `K<n>`.
    tags: Vec<Vec<u8>>,
}

impl EncodeCtx {
    fn intern_ident(&mut self, bytes: &[u8]) -> (usize, bool) {
        intern(&mut self.idents, bytes)
    }

    fn intern_tag(&mut self, bytes: &[u8]) -> (usize, bool) {
        intern(&mut self.tags, bytes)
    }
}

/// Records `bytes` in `table` if not already present; returns its index and whether this is a
/// repeat occurrence (back-reference eligible).
fn intern(table: &mut Vec<Vec<u8>>, bytes: &[u8]) -> (usize, bool) {
    if let Some(pos) = table.iter().position(|t| t == bytes) {
        (pos, true)
    } else {
        table.push(bytes.to_vec());
        (table.len() - 1, false)
    }
}

fn encode_node(module: &Module, id: NodeId, ctx: &mut EncodeCtx, out: &mut Vec<u8>) {
    match &module.node(id).kind {
        NodeKind::Atom(atom) => encode_atom(atom, ctx, out),
        NodeKind::Compound(compound) => {
            out.push(b'A');
            write_tag_or_backref(ctx, &compound.tag, out);
            for &child in &compound.children {
                write_child(module, child, ctx, out);
            }
            out.push(b'Z');
        }
    }
}

fn write_tag_or_backref(ctx: &mut EncodeCtx, tag: &[u8], out: &mut Vec<u8>) {
    let (index, repeat) = ctx.intern_tag(tag);
    write_token_or_backref(tag, index, repeat, b'K', out);
}

fn write_ident_or_backref(ctx: &mut EncodeCtx, bytes: &[u8], out: &mut Vec<u8>) {
    let (index, repeat) = ctx.intern_ident(bytes);
    write_token_or_backref(bytes, index, repeat, b'R', out);
}

fn write_token_or_backref(bytes: &[u8], index: usize, repeat: bool, marker: u8, out: &mut Vec<u8>) {
    let rewritten = rewrite_bytes(bytes);
    if repeat {
        let backref = format!("{}{}", marker as char, index);
        if backref.len() < rewritten.len() {
            out.extend_from_slice(backref.as_bytes());
            return;
        }
    }
    out.extend_from_slice(&rewritten);
}

fn encode_atom(atom: &Atom, ctx: &mut EncodeCtx, out: &mut Vec<u8>) {
    match atom {
        Atom::Empty => out.push(b'E'),
        Atom::Identifier(bytes) => write_ident_or_backref(ctx, bytes, out),
        Atom::Symbol(bytes) => write_ident_or_backref(ctx, bytes, out),
        Atom::SymbolDef(bytes) => {
            out.push(b'O');
            write_ident_or_backref(ctx, bytes, out);
        }
        Atom::IntLit { digits, .. } => out.extend_from_slice(digits),
        Atom::UIntLit { digits, .. } => {
            out.extend_from_slice(digits);
            out.push(b'u');
        }
        Atom::FloatLit {
            digits, frac, exp, ..
        } => {
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
        Atom::CharLit(byte) => out.extend(rewrite_bytes(&[*byte])),
        Atom::StringLit(bytes) => {
            out.push(b'U');
            out.extend(rewrite_bytes(bytes));
            out.push(b'U');
        }
    }
}

/// Applies the character rewrite/escape table to a raw atom byte string: structural punctuation
/// maps to its reserved letter, and any byte that is neither a valid identifier byte nor itself
/// one of the reserved letters is escaped as `X<HH>`.
///
/// Dots are deliberately left untouched (see the module's documented symbol/identifier collision
/// note in the crate's design records).
fn rewrite_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'.' => out.push(b'.'),
            _ if RESERVED.contains(&b) => {
                out.push(b'X');
                push_hex(&mut out, b);
            }
            _ if crate::escape::is_ident_continue_byte(b) => out.push(b),
            _ => {
                out.push(b'X');
                push_hex(&mut out, b);
            }
        }
    }
    out
}

fn push_hex(out: &mut Vec<u8>, byte: u8) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    out.push(HEX[(byte >> 4) as usize]);
    out.push(HEX[(byte & 0x0F) as usize]);
}

fn strip_trailing_closes(out: &mut Vec<u8>) {
    while out.last() == Some(&b'Z') {
        out.pop();
    }
}
