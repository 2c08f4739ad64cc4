//! End-to-end parse/write/encode scenarios exercising whole files rather than individual
//! components.

use nif::ast::{Arena, Atom, Compound, Directive, NodeKind, Prefix, Sign, Visibility};
use nif::{Module, ParseOptions, VisibilityMap, WriteOptions, encode, parse, write_to_vec};
use pretty_assertions::assert_eq;

#[test]
fn hello_world() {
    let source = b"(.nif26)\n(stmts (call write.1.sys \"Hello\\20World\\0A\"))";
    let output = parse(source, &ParseOptions::default()).unwrap();

    let stmts = output.module.node(output.module.body[0]);
    let call = output
        .module
        .node(stmts.kind.as_compound().unwrap().children[0]);
    let call_children = &call.kind.as_compound().unwrap().children;

    let symbol = output.module.node(call_children[0]);
    assert_eq!(
        symbol.kind.as_atom(),
        Some(&Atom::Symbol(b"write.1.sys".as_slice().into()))
    );

    let text = output.module.node(call_children[1]);
    assert_eq!(
        text.kind.as_atom(),
        Some(&Atom::StringLit(b"Hello World\n".as_slice().into()))
    );
}

#[test]
fn trailing_dot_expansion() {
    let output = parse(
        b"(.nif26)\n(use foo.0.)",
        &ParseOptions {
            filename: Some("mod.nif".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    let used = output.module.node(output.module.body[0]);
    let symbol = output
        .module
        .node(used.kind.as_compound().unwrap().children[0]);
    assert_eq!(
        symbol.kind.as_atom(),
        Some(&Atom::Symbol(b"foo.0.mod".as_slice().into()))
    );
}

#[test]
fn index_round_trip_via_write_then_parse() {
    let mut arena = Arena::new();
    let a_def = arena.alloc(
        Prefix::default(),
        NodeKind::Atom(Atom::SymbolDef(b"a.0.m".as_slice().into())),
        None,
    );
    let a_decl = arena.alloc(
        Prefix::default(),
        NodeKind::Compound(Compound {
            tag: b"def".as_slice().into(),
            children: vec![a_def],
        }),
        None,
    );
    let b_def = arena.alloc(
        Prefix::default(),
        NodeKind::Atom(Atom::SymbolDef(b"b.0.m".as_slice().into())),
        None,
    );
    let b_decl = arena.alloc(
        Prefix::default(),
        NodeKind::Compound(Compound {
            tag: b"def".as_slice().into(),
            children: vec![b_def],
        }),
        None,
    );

    let module = Module {
        arena,
        directives: vec![Directive::Version(26)],
        body: vec![a_decl, b_decl],
        index: None,
    };

    let bytes = write_to_vec(
        &module,
        &WriteOptions {
            emit_index: true,
            visibility: VisibilityMap::new(),
        },
    )
    .unwrap();

    let reparsed = parse(&bytes, &ParseOptions::default()).unwrap();
    let index = reparsed.module.index.expect("index was written");
    assert_eq!(index.entries.len(), 2);
    assert_eq!(&*index.entries[0].symbol, b"a.0.m");
    assert_eq!(index.entries[0].visibility, Visibility::Exported);
    assert_eq!(&*index.entries[1].symbol, b"b.0.m");
    assert!(index.entries[1].offset > index.entries[0].offset);
    assert!(reparsed.warnings.is_empty());
}

#[test]
fn line_info_deltas_compose_to_absolute_position() {
    let source = b"1,1,f.nim(stmts 4(x))";
    let mut bytes = Vec::from(*b"(.nif26)\n");
    bytes.extend_from_slice(source);
    let output = parse(&bytes, &ParseOptions::default()).unwrap();

    let stmts_id = output.module.body[0];
    let stmts = output.module.node(stmts_id);
    assert_eq!(
        stmts.prefix.line_info,
        Some(nif::LineInfo::ColLineFile {
            col: 1,
            line: 1,
            file: b"f.nim".as_slice().into(),
        })
    );

    let x_id = stmts.kind.as_compound().unwrap().children[0];
    let x_node = output.module.node(x_id);
    let (col, line, file) = nif::ast::resolve_absolute((1, 1, Some(b"f.nim")), stmts.prefix.line_info.as_ref());
    let (child_col, child_line, child_file) =
        nif::ast::resolve_absolute((col, line, file.as_deref()), x_node.prefix.line_info.as_ref());
    assert_eq!((child_col, child_line), (5, 1));
    assert_eq!(child_file.as_deref(), Some(b"f.nim".as_slice()));
}

#[test]
fn canonical_encoder_example() {
    let mut arena = Arena::new();
    let make_int = |arena: &mut Arena, digits: &str| {
        arena.alloc(
            Prefix::default(),
            NodeKind::Atom(Atom::IntLit {
                sign: Sign::Plus,
                digits: digits.as_bytes().into(),
            }),
            None,
        )
    };
    let make_compound = |arena: &mut Arena, tag: &str, children: Vec<nif::NodeId>| {
        arena.alloc(
            Prefix::default(),
            NodeKind::Compound(Compound {
                tag: tag.as_bytes().into(),
                children,
            }),
            None,
        )
    };

    let range_a = {
        let zero = make_int(&mut arena, "0");
        let nine = make_int(&mut arena, "9");
        make_compound(&mut arena, "range", vec![zero, nine])
    };
    let inner_array = {
        let range_b = {
            let zero = make_int(&mut arena, "0");
            let four = make_int(&mut arena, "4");
            make_compound(&mut arena, "range", vec![zero, four])
        };
        let i = {
            let eight = make_int(&mut arena, "8");
            make_compound(&mut arena, "i", vec![eight])
        };
        make_compound(&mut arena, "array", vec![range_b, i])
    };
    let outer = make_compound(&mut arena, "array", vec![range_a, inner_array]);

    let module = Module {
        arena,
        directives: vec![Directive::Version(26)],
        body: vec![outer],
        index: None,
    };

    assert_eq!(encode(&module, outer), "AarrayArange_0_9ZAK0AK1_0_4ZAi_8");
}

#[test]
fn escape_example() {
    let output = parse(
        b"(.nif26)\n(s \"H\\0A\\28\")",
        &ParseOptions::default(),
    )
    .unwrap();
    let s = output.module.node(output.module.body[0]);
    let text = output
        .module
        .node(s.kind.as_compound().unwrap().children[0]);
    assert_eq!(
        text.kind.as_atom(),
        Some(&Atom::StringLit(vec![0x48, 0x0A, 0x28].into()))
    );

    let written = write_to_vec(&output.module, &WriteOptions::default()).unwrap();
    assert!(String::from_utf8(written).unwrap().contains("\"H\\0A\\28\""));
}

#[test]
fn empty_atom_adjacency() {
    let output = parse(b"(.nif26)\n(seq ...)", &ParseOptions::default()).unwrap();
    let seq = output.module.node(output.module.body[0]);
    let children = &seq.kind.as_compound().unwrap().children;
    assert_eq!(children.len(), 3);
    for &id in children {
        assert_eq!(output.module.node(id).kind.as_atom(), Some(&Atom::Empty));
    }
}

#[test]
fn index_offset_mismatch_is_a_warning_unless_strict() {
    let source = b"(.nif26)\n(.indexat +999999)\n(stmts)\n(.index)";
    let lenient = parse(source, &ParseOptions::default()).unwrap();
    assert_eq!(lenient.warnings.len(), 1);

    let strict_options = ParseOptions {
        strict: true,
        ..Default::default()
    };
    let err = parse(source, &strict_options).unwrap_err();
    assert!(matches!(err, nif::Error::IndexOffsetMismatch { .. }));
}

#[test]
fn round_trips_a_tree_through_write_and_parse() {
    let source = b"(.nif26)\n(stmts (call write.1.sys \"Hello\\20World\\0A\"))";
    let output = parse(source, &ParseOptions::default()).unwrap();
    let written = write_to_vec(&output.module, &WriteOptions::default()).unwrap();
    let reparsed = parse(&written, &ParseOptions::default()).unwrap();

    let original_call = output.module.node(
        output
            .module
            .node(output.module.body[0])
            .kind
            .as_compound()
            .unwrap()
            .children[0],
    );
    let new_call = reparsed.module.node(
        reparsed
            .module
            .node(reparsed.module.body[0])
            .kind
            .as_compound()
            .unwrap()
            .children[0],
    );
    assert_eq!(
        original_call.kind.as_compound().unwrap().tag,
        new_call.kind.as_compound().unwrap().tag
    );
}

#[test]
fn index_entries_require_global_symbols() {
    let source = b"(.nif26)\n(.index (x foo.0 +0))";
    let err = parse(source, &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, nif::Error::MalformedSymbol { .. }));
}

#[test]
fn unknown_directive_is_preserved_not_rejected() {
    let output = parse(b"(.nif26)\n(.future_thing)\n(stmts)", &ParseOptions::default()).unwrap();
    assert_eq!(output.warnings.len(), 1);
    assert!(
        output
            .module
            .directives
            .iter()
            .any(|d| matches!(d, Directive::Unknown { tag, .. } if &**tag == b"future_thing"))
    );
}

#[test]
fn unknown_directive_is_fatal_in_strict_mode() {
    let options = ParseOptions {
        strict: true,
        ..Default::default()
    };
    let err = parse(b"(.nif26)\n(.future_thing)\n(stmts)", &options).unwrap_err();
    assert!(matches!(err, nif::Error::UnsupportedDirective { .. }));
}

#[test]
fn trailing_dot_without_suffix_is_an_error() {
    let err = parse(b"(.nif26)\n(use foo.0.)", &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, nif::Error::TrailingDotWithoutSuffix { .. }));
}
