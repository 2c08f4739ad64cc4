//! NIF is a textual interchange format for compiler intermediate representations: each file
//! encodes one module as a tree built from atoms and tagged compound nodes, augmented with
//! source-position diffs, per-node comments, directives, and an optional trailing byte-offset
//! index over exported symbols.
//!
//! This crate is the format's parser and serializer: it has no opinion on what any particular
//! tag set means. Consumers that need to interpret `call`, `stmts`, or any other tag are built on
//! top of this crate, not inside it.
//!
//! # Layout
//!
//! - [`reader`] — the byte cursor shared by the parser and the writer's formatting helpers.
//! - [`escape`] — the bidirectional `\HH` escape codec.
//! - [`lexer`] — token classification, factored out of the parser so it can be tested and reused
//!   on its own.
//! - [`ast`] — the arena-backed tree representation.
//! - [`parser`] — turns bytes into a [`Module`].
//! - [`writer`] — turns a [`Module`] back into bytes, including in-place `.indexat` patching.
//! - [`encoder`] — the canonical tree-to-identifier encoder.
//! - [`error`] — the typed error and warning types shared by the parser and writer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod ast;
pub mod encoder;
pub mod error;
pub mod escape;
pub mod lexer;
pub mod parser;
pub mod reader;
pub mod writer;

pub use ast::{Arena, Atom, Directive, Index, IndexEntry, LineInfo, Module, NodeId, Visibility};
pub use encoder::encode;
pub use error::{Error, Result, Warning, WarningKind};
pub use parser::{ParseOptions, ParseOutput, parse};
pub use writer::{VisibilityMap, WriteOptions, write, write_to_vec};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// The format's own "hello world": a two-child `call` compound naming a global symbol and a
    /// string literal whose escapes decode to `Hello World\n`.
    #[test]
    fn parses_hello_world() {
        let source = b"(.nif26)\n(stmts (call write.1.sys \"Hello\\20World\\0A\"))";
        let output = parse(source, &ParseOptions::default()).unwrap();
        assert_eq!(output.module.version(), Some(26));
        assert_eq!(output.module.body.len(), 1);

        let stmts = output.module.node(output.module.body[0]);
        let stmts_compound = stmts.kind.as_compound().unwrap();
        assert_eq!(&*stmts_compound.tag, b"stmts");

        let call = output.module.node(stmts_compound.children[0]);
        let call_compound = call.kind.as_compound().unwrap();
        assert_eq!(&*call_compound.tag, b"call");

        let sym = output.module.node(call_compound.children[0]);
        assert_eq!(
            sym.kind.as_atom(),
            Some(&Atom::Symbol(b"write.1.sys".as_slice().into()))
        );

        let text = output.module.node(call_compound.children[1]);
        assert_eq!(
            text.kind.as_atom(),
            Some(&Atom::StringLit(b"Hello World\n".as_slice().into()))
        );
    }

    #[test]
    fn expands_trailing_dot_symbol_against_filename_suffix() {
        let source = b"(.nif26)\n(use foo.0.)";
        let options = ParseOptions {
            filename: Some("mod.nif".to_string()),
            ..Default::default()
        };
        let output = parse(source, &options).unwrap();
        let use_node = output.module.node(output.module.body[0]);
        let symbol = output.module.node(use_node.kind.as_compound().unwrap().children[0]);
        assert_eq!(
            symbol.kind.as_atom(),
            Some(&Atom::Symbol(b"foo.0.mod".as_slice().into()))
        );
    }

    #[test]
    fn rejects_unrecognized_version() {
        let err = parse(b"(.nif99)", &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedVersion { .. }));
    }

    #[test]
    fn accepts_legacy_version_24() {
        let output = parse(b"(.nif24)\n(stmts)", &ParseOptions::default()).unwrap();
        assert_eq!(output.module.version(), Some(24));
    }
}
