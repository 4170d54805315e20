//! TIL: a typed intermediate language with a bit-packed bytecode codec.
//!
//! Round-trip pipeline:
//!
//! ```text
//! Builder → [expression tree in Arena] → BytecodeWriter → [atoms] → ByteSink
//! ByteSource → BitReader → BytecodeReader (stack machine) → Builder → [tree]
//! ```
//!
//! The expression tree represents programs in SSA form: control-flow graphs
//! of basic blocks with phi arguments, scoped variable declarations,
//! literals, operations, and aggregate types. The codec serializes one tree
//! per stream into a variable-bit-width format divided into atoms of at
//! most 4 KiB, each boundary a flush and resynchronization point, and
//! reconstructs an equivalent tree with SSA sharing intact: every weak
//! reference to an instruction resolves to the same node, never a copy.
//!
//! ```
//! use til::{Arena, Builder};
//! use til::til::LitVal;
//!
//! let mut arena = Arena::new();
//! let mut builder = Builder::new(&mut arena);
//! let root = builder.new_literal(LitVal::I32(-7));
//!
//! let bytes = til::bytecode::to_bytes(&arena, root).expect("encode");
//!
//! let mut decoded_arena = Arena::new();
//! let decoded = til::bytecode::from_bytes(&mut decoded_arena, &bytes).expect("decode");
//! assert!(til::structural_eq(&arena, root, &decoded_arena, decoded));
//! ```

pub mod bytecode;
pub mod error;
pub mod til;

pub use error::BytecodeError;
pub use til::{Arena, Builder};
pub use til::compare::structural_eq;
