//! Expression round-trips: scalar literals, scoped variables, aggregates,
//! and the exact wire image of the simplest stream.

use til::bytecode::{from_bytes, to_bytes};
use til::til::{
    AllocKind, ApplyKind, BaseType, BinOp, CallConv, CastOp, ExprKind, LitVal, SizeCode,
    TypeClass, UnaryOp, VarKind,
};
use til::{structural_eq, Arena, Builder};

/// Encodes `root`, decodes into a fresh arena, and asserts structural
/// equality. Returns the decoded arena and root for further inspection.
fn roundtrip(arena: &Arena, root: til::til::ExprId) -> (Arena, til::til::ExprId) {
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
// 1. Literal only: exact wire image
// ---------------------------------------------------------------------------
#[test]
fn test_literal_wire_image() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_literal(LitVal::I32(-7));

    // 6-bit literal opcode, 8-bit base type descriptor for i32, then the
    // value 0xFFFFFFF9 in 32 bits, padded to the atom boundary.
    let bytes = to_bytes(&arena, root).expect("encode");
    assert_eq!(bytes, vec![0xD3, 0x48, 0xFE, 0xFF, 0xFF, 0x3F]);

    roundtrip(&arena, root);
}

// ---------------------------------------------------------------------------
// 2. Determinism: same tree, same bytes
// ---------------------------------------------------------------------------
#[test]
fn test_encoding_is_deterministic() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let lhs = b.new_literal(LitVal::F64(3.5));
    let rhs = b.new_literal(LitVal::F64(-0.25));
    let root = b.new_binary_op(BinOp::Mul, lhs, rhs);

    let first = to_bytes(&arena, root).expect("encode");
    let second = to_bytes(&arena, root).expect("encode");
    assert_eq!(first, second, "encoding must be a pure function of the tree");
}

// ---------------------------------------------------------------------------
// 3. Every literal payload kind survives
// ---------------------------------------------------------------------------
#[test]
fn test_all_literal_kinds_roundtrip() {
    let values = vec![
        LitVal::Bool(true),
        LitVal::Bool(false),
        LitVal::I8(-128),
        LitVal::I16(-300),
        LitVal::I32(-7),
        LitVal::I64(i64::MIN),
        LitVal::U8(255),
        LitVal::U16(65_535),
        LitVal::U32(u32::MAX),
        LitVal::U64(u64::MAX),
        LitVal::F32(1.25),
        LitVal::F64(-6.02e23),
        LitVal::Str("hello".to_owned()),
        LitVal::Str(String::new()),
        LitVal::Ptr(0),
    ];
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let elems: Vec<_> = values.into_iter().map(|v| b.new_literal(v)).collect();
    let root = b.new_array(elems);
    roundtrip(&arena, root);
}

// ---------------------------------------------------------------------------
// 4. Non-null pointer literals are rejected at encode time
// ---------------------------------------------------------------------------
#[test]
fn test_non_null_pointer_literal_rejected() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_literal(LitVal::Ptr(0xDEAD));
    let err = to_bytes(&arena, root).expect_err("non-null pointer literal must be rejected");
    assert!(
        err.to_string().contains("pointer"),
        "unexpected error: {}",
        err
    );
}

// ---------------------------------------------------------------------------
// 5. Nested binary op under a one-variable scope
// ---------------------------------------------------------------------------
#[test]
fn test_scoped_binary_op() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let init = b.new_literal(LitVal::I32(1));
    let decl = b.new_var_decl(VarKind::Let, "x", Some(init));
    let var = b.new_variable(decl);
    let forty_two = b.new_literal(LitVal::I32(42));
    let add = b.new_binary_op(BinOp::Add, var, forty_two);
    let root = b.new_let(decl, add);

    let (decoded_arena, decoded) = roundtrip(&arena, root);

    // The decoded variable must resolve to the decoded declaration, not a
    // copy of it.
    let (decl2, body2) = match &decoded_arena.expr(decoded).kind {
        ExprKind::Let { vardecl, body } => (*vardecl, *body),
        other => panic!("expected a let, found {:?}", other),
    };
    let lhs2 = match &decoded_arena.expr(body2).kind {
        ExprKind::BinaryOp { op: BinOp::Add, lhs, .. } => *lhs,
        other => panic!("expected an add, found {:?}", other),
    };
    match &decoded_arena.expr(lhs2).kind {
        ExprKind::Variable { decl } => {
            assert_eq!(*decl, decl2, "variable must reference the scoped declaration")
        }
        other => panic!("expected a variable, found {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// 6. Nested scopes resolve by depth
// ---------------------------------------------------------------------------
#[test]
fn test_nested_scopes() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let int_ty = b.new_scalar_type(BaseType::scalar(TypeClass::Int, SizeCode::Bits32));
    let outer_decl = b.new_var_decl(VarKind::Fun, "x", Some(int_ty));
    let inner_ty = b.new_scalar_type(BaseType::scalar(TypeClass::Int, SizeCode::Bits32));
    let inner_decl = b.new_var_decl(VarKind::Fun, "y", Some(inner_ty));
    let x = b.new_variable(outer_decl);
    let y = b.new_variable(inner_decl);
    let sum = b.new_binary_op(BinOp::Add, x, y);
    let inner_fn = b.new_function(inner_decl, sum);
    let root = b.new_function(outer_decl, inner_fn);
    roundtrip(&arena, root);
}

// ---------------------------------------------------------------------------
// 7. Aggregates, applications, and memory operations
// ---------------------------------------------------------------------------
#[test]
fn test_broad_expression_surface() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);

    let int32 = b.new_scalar_type(BaseType::scalar(TypeClass::Int, SizeCode::Bits32));
    let vec4 = b.new_scalar_type(BaseType::vector(TypeClass::Float, SizeCode::Bits32, 4));
    let field_body = b.new_literal(LitVal::U32(9));
    let field = b.new_field(int32, field_body);
    let slot_a = b.new_slot("a", field);
    let slot_b_def = b.new_literal(LitVal::Str("payload".to_owned()));
    let slot_b = b.new_slot("b", slot_b_def);
    let record = b.new_record(vec![slot_a, slot_b]);

    let ptr = b.new_alloc(AllocKind::Heap, record);
    let loaded = b.new_load(ptr);
    let stored = b.new_store(ptr, loaded);

    let ident = b.new_identifier("lookup_me");
    let applied = b.new_apply(ApplyKind::Apply, ident, Some(stored));
    let self_applied = b.new_apply(ApplyKind::SApply, applied, None);
    let projected = b.new_project(self_applied, "b");
    let called = b.new_call(projected);

    let idx = b.new_literal(LitVal::U64(3));
    let indexed = b.new_array_index(called, idx);
    let bumped = b.new_array_add(indexed, vec4);

    let negated = b.new_unary_op(UnaryOp::Minus, bumped);
    let cast = b.new_cast(CastOp::ToInt, negated);
    let undef = b.new_undefined();
    let wild = b.new_wildcard();
    let cond = b.new_literal(LitVal::Bool(true));
    let ite = b.new_if_then_else(cond, cast, undef);

    let code_ret = b.new_scalar_type(BaseType::scalar(TypeClass::Void, SizeCode::None));
    let code = b.new_code(CallConv::C, code_ret, None);

    let root = b.new_array(vec![ite, wild, code]);
    roundtrip(&arena, root);
}

// ---------------------------------------------------------------------------
// 8. A string longer than one atom still round-trips
// ---------------------------------------------------------------------------
#[test]
fn test_oversized_string_literal() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_literal(LitVal::Str("z".repeat(100_000)));
    roundtrip(&arena, root);
}

// ---------------------------------------------------------------------------
// 9. Malformed streams fail without panicking
// ---------------------------------------------------------------------------
#[test]
fn test_truncated_stream_fails() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let big = b.new_literal(LitVal::Str("payload".repeat(50)));
    let bytes = to_bytes(&arena, big).expect("encode");

    let mut cut = Arena::new();
    let err = from_bytes(&mut cut, &bytes[..bytes.len() / 2])
        .expect_err("truncated stream must fail");
    assert!(
        matches!(err, til::BytecodeError::Truncated(_)),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_unknown_opcode_fails() {
    // 0x3F starts with the fused opcode 63, far beyond the defined range.
    let mut arena = Arena::new();
    let err = from_bytes(&mut arena, &[0x3F]).expect_err("unknown opcode must fail");
    assert!(
        matches!(err, til::BytecodeError::Unknown { .. }),
        "unexpected error: {}",
        err
    );
}

#[test]
fn test_trailing_expression_fails() {
    let mut arena = Arena::new();
    let mut b = Builder::new(&mut arena);
    let root = b.new_literal(LitVal::I32(5));
    let mut bytes = to_bytes(&arena, root).expect("encode");
    let second = to_bytes(&arena, root).expect("encode");
    bytes.extend_from_slice(&second);

    let mut decoded = Arena::new();
    let err = from_bytes(&mut decoded, &bytes)
        .expect_err("two top-level expressions in one stream must fail");
    assert!(
        err.to_string().contains("top-level"),
        "unexpected error: {}",
        err
    );
}
