//! Annotation round-trips: chain order, scalar payloads, sub-expression
//! slots, identity of instruction-valued sub-expressions, and the rewrite
//! hook.

use til::bytecode::{from_bytes, to_bytes, BitWriter};
use til::til::{AnnotData, ExprId, ExprKind, LitVal};
use til::{structural_eq, Arena, Builder};

fn roundtrip(arena: &Arena, root: ExprId) -> (Arena, ExprId) {
    let bytes = to_bytes(arena, root).expect("encode should succeed");
    let mut decoded_arena = Arena::new();
    let decoded = from_bytes(&mut decoded_arena, &bytes).expect("decode should succeed");
    assert!(
        structural_eq(arena, root, &decoded_arena, decoded),
        "decoded tree should equal the original\n  original: {}\n  decoded:  {}",
        til::til::expr_to_string(arena, root),
        til::til::expr_to_string(&decoded_arena, decoded),
    );
    (decoded_arena, decoded)
}

// ---------------------------------------------------------------------------
// 1. Two annotations keep their order and payloads
// ---------------------------------------------------------------------------
#[test]
fn test_chain_order_preserved() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_literal(LitVal::I32(5));
    b.attach_annot(root, AnnotData::SourceLoc { position: 1234 });
    let sub = b.new_literal(LitVal::Bool(true));
    b.attach_annot(root, AnnotData::Precondition { condition: sub });

    let (decoded_arena, decoded) = roundtrip(&arena, root);

    let chain: Vec<_> = decoded_arena.annot_chain(decoded).collect();
    assert_eq!(chain.len(), 2, "both annotations expected");
    match &decoded_arena.annot(chain[0]).data {
        AnnotData::SourceLoc { position } => assert_eq!(*position, 1234),
        other => panic!("expected a source location first, found {:?}", other),
    }
    match &decoded_arena.annot(chain[1]).data {
        AnnotData::Precondition { condition } => {
            match &decoded_arena.expr(*condition).kind {
                ExprKind::Literal { value } => assert_eq!(*value, LitVal::Bool(true)),
                other => panic!("expected the condition literal, found {:?}", other),
            }
        }
        other => panic!("expected a precondition second, found {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// 2. Annotations ride on instructions inside a CFG
// ---------------------------------------------------------------------------
#[test]
fn test_instruction_annotations() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    b.enter_cfg(&[0]).expect("enter cfg");
    b.enter_block(0).expect("enter block");
    let lit = b.new_literal(LitVal::I64(8));
    b.attach_annot(
        lit,
        AnnotData::InstrName {
            name: "the_answer_minus_34".to_owned(),
        },
    );
    b.add_instr(lit).expect("install literal");
    let ret = b.new_return(lit);
    // The precondition references the committed literal: on the wire this
    // must travel as a weak reference and resolve to the same node.
    b.attach_annot(ret, AnnotData::Precondition { condition: lit });
    b.add_instr(ret).expect("install return");
    b.end_block().expect("end block");
    let root = b.end_cfg().expect("end cfg");

    let (decoded_arena, decoded) = roundtrip(&arena, root);

    let blocks = match &decoded_arena.expr(decoded).kind {
        ExprKind::Cfg { blocks } => blocks.clone(),
        other => panic!("expected a cfg, found {:?}", other),
    };
    let instrs = decoded_arena.block(blocks[0]).instrs.clone();
    let (lit2, ret2) = (instrs[0], instrs[1]);
    let ret_chain: Vec<_> = decoded_arena.annot_chain(ret2).collect();
    assert_eq!(ret_chain.len(), 1);
    match &decoded_arena.annot(ret_chain[0]).data {
        AnnotData::Precondition { condition } => assert_eq!(
            *condition, lit2,
            "precondition must reference the committed instruction itself"
        ),
        other => panic!("expected a precondition, found {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// 3. The triplet exercises multiple sub-expression slots
// ---------------------------------------------------------------------------
#[test]
fn test_triplet_slots() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_identifier("annotated");
    let x = b.new_literal(LitVal::I32(1));
    let y = b.new_literal(LitVal::Str("two".to_owned()));
    let z = b.new_undefined();
    b.attach_annot(root, AnnotData::TestTriplet { exprs: [x, y, z] });

    let (decoded_arena, decoded) = roundtrip(&arena, root);

    let chain: Vec<_> = decoded_arena.annot_chain(decoded).collect();
    assert_eq!(chain.len(), 1);
    match &decoded_arena.annot(chain[0]).data {
        AnnotData::TestTriplet { exprs } => {
            assert!(matches!(
                decoded_arena.expr(exprs[0]).kind,
                ExprKind::Literal { .. }
            ));
            assert!(matches!(
                decoded_arena.expr(exprs[1]).kind,
                ExprKind::Literal { .. }
            ));
            assert!(matches!(decoded_arena.expr(exprs[2]).kind, ExprKind::Undefined));
        }
        other => panic!("expected a triplet, found {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// 4. The rewrite hook swaps sub-expression slots in place
// ---------------------------------------------------------------------------
#[test]
fn test_rewrite_replaces_slots() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let a = b.new_literal(LitVal::I32(1));
    let c = b.new_literal(LitVal::I32(2));
    let d = b.new_literal(LitVal::I32(3));
    let replacement = b.new_literal(LitVal::I32(9));

    let mut data = AnnotData::TestTriplet { exprs: [a, c, d] };
    assert_eq!(data.sub_exprs(), vec![a, c, d]);
    data.rewrite(&[replacement, replacement, replacement]);
    assert_eq!(data.sub_exprs(), vec![replacement; 3]);

    let mut pre = AnnotData::Precondition { condition: a };
    pre.rewrite(&[c]);
    assert_eq!(pre.sub_exprs(), vec![c]);
}

// ---------------------------------------------------------------------------
// 5. An unknown annotation kind fails to decode
// ---------------------------------------------------------------------------
#[test]
fn test_unknown_annotation_kind_rejected() {
    // A literal record followed by an annotation marker with kind 0xEE.
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let lit = b.new_literal(LitVal::Bool(false));
    let mut bytes = to_bytes(&arena, lit).expect("encode");

    let mut tail = Vec::new();
    let mut w = BitWriter::new(&mut tail);
    w.write_bits32(til::bytecode::PseudoOp::Annotation as u32, 6)
        .expect("opcode");
    w.write_bits32(0xEE, 8).expect("kind");
    w.end_atom().expect("atom");
    w.flush().expect("flush");
    drop(w);
    bytes.extend_from_slice(&tail);

    let mut decoded = Arena::new();
    let err = from_bytes(&mut decoded, &bytes).expect_err("unknown annotation kind must fail");
    assert!(
        matches!(
            err,
            til::BytecodeError::Unknown {
                what: "annotation kind",
                ..
            }
        ),
        "unexpected error: {}",
        err
    );
}
