pub mod annot;
pub mod arena;
pub mod block;
pub mod builder;
pub mod compare;
pub mod expr;
pub mod printer;
pub mod types;

pub use annot::{Annot, AnnotData, AnnotId, AnnotKind};
pub use arena::Arena;
pub use block::{Block, BlockId};
pub use builder::Builder;
pub use compare::structural_eq;
pub use expr::{
    AllocKind, ApplyKind, BinOp, CallConv, CastOp, Expr, ExprId, ExprKind, LitVal, UnaryOp, VarKind,
};
pub use printer::expr_to_string;
pub use types::{BaseType, SizeCode, TypeClass};
