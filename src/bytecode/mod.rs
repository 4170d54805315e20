//! The bytecode codec: a bit-packed, streaming wire format for expression
//! trees in SSA form.
//!
//! [`writer::BytecodeWriter`] walks a tree post-order and emits opcodes and
//! scalar fields to a [`stream::BitWriter`]; [`reader::BytecodeReader`]
//! interprets the flat opcode stream with an operand stack and side tables,
//! driving a [`Builder`] to allocate nodes. Round-tripping any well-formed
//! tree reconstructs an equivalent tree, preserving SSA sharing.
//!
//! [`Builder`]: crate::til::builder::Builder

pub mod opcode;
pub mod reader;
pub mod stream;
pub mod writer;

pub use opcode::{FusedOp, Opcode, PseudoOp};
pub use reader::BytecodeReader;
pub use stream::{
    dump_bytes, BitReader, BitWriter, ByteSink, ByteSource, MAX_ATOM_SIZE, STREAM_BUFFER_SIZE,
};
pub use writer::BytecodeWriter;

use crate::error::BytecodeError;
use crate::til::arena::Arena;
use crate::til::builder::Builder;
use crate::til::expr::ExprId;

/// Serializes one expression tree to an in-memory buffer.
pub fn to_bytes(arena: &Arena, root: ExprId) -> Result<Vec<u8>, BytecodeError> {
    let mut out = Vec::new();
    let mut writer = BytecodeWriter::new(arena, &mut out);
    let result = writer.write(root);
    drop(writer);
    result.map(|_| out)
}

/// Deserializes one expression tree from a buffer into `arena`.
pub fn from_bytes(arena: &mut Arena, data: &[u8]) -> Result<ExprId, BytecodeError> {
    let builder = Builder::new(arena);
    let mut reader = BytecodeReader::new(builder, data);
    let root = reader.read();
    if let Some(e) = reader.take_error() {
        return Err(e);
    }
    root.ok_or_else(|| BytecodeError::invariant("stream contained no expression"))
}
