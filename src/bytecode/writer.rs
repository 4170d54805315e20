//! Post-order serialization of expression trees.
//!
//! ## Wire format
//!
//! ```text
//! Stream:  record* (one top-level expression per stream)
//! Record:  fused 6-bit opcode | payload | atom boundary
//!   expression:  children precede the record; scalars follow the opcode
//!   marker:      EnterScope/ExitScope (no payload),
//!                EnterCFG (nblocks, per-block arg counts),
//!                EnterBlock (index), BBArgument/BBInstruction (no payload),
//!                Null, WeakInstrRef (instruction id)
//!   annotation:  sub-expressions precede | kind:8 | kind payload
//! ```
//!
//! Children are emitted before their parent's opcode, so the reader can
//! reconstruct bottom-up from an operand stack. An operand that is a
//! committed instruction is emitted as a weak reference to its dense id;
//! everything else recurses. Scope markers bracket binder bodies, and CFG
//! markers frame blocks, their formal arguments, and their instructions.

use std::collections::HashMap;

use crate::bytecode::opcode::{
    alloc_kind_wire, apply_kind_wire, bin_op_wire, call_conv_wire, cast_op_wire, unary_op_wire,
    var_kind_wire, Opcode, PseudoOp, ALLOC_KIND_BITS, ANNOT_KIND_BITS, APPLY_KIND_BITS,
    CALL_CONV_BITS, OPCODE_BITS, OPERATOR_BITS, VAR_KIND_BITS,
};
use crate::bytecode::stream::{BitWriter, ByteSink};
use crate::error::BytecodeError;
use crate::til::annot::AnnotData;
use crate::til::arena::Arena;
use crate::til::expr::{ExprId, ExprKind, LitVal};

/// Serializes one expression tree to a bit stream.
pub struct BytecodeWriter<'a, S: ByteSink> {
    arena: &'a Arena,
    w: BitWriter<S>,
    /// Lexically enclosing variable declarations, outermost first. Wire
    /// indices are 1-based positions into this stack.
    scopes: Vec<ExprId>,
    /// Dense ids of instructions committed so far in the open CFG.
    instr_ids: HashMap<ExprId, u32>,
    next_instr_id: u32,
    in_cfg: bool,
}

impl<'a, S: ByteSink> BytecodeWriter<'a, S> {
    pub fn new(arena: &'a Arena, sink: S) -> BytecodeWriter<'a, S> {
        BytecodeWriter {
            arena,
            w: BitWriter::new(sink),
            scopes: Vec::new(),
            instr_ids: HashMap::new(),
            next_instr_id: 0,
            in_cfg: false,
        }
    }

    /// Serializes `root` and flushes the sink. The tree must be well formed;
    /// a violated invariant aborts the stream and reports an error.
    pub fn write(&mut self, root: ExprId) -> Result<(), BytecodeError> {
        let result = self.write_expr(root).and_then(|_| self.w.flush());
        if result.is_err() {
            self.w.abandon();
        }
        result
    }

    /// Emits an operand position: a weak reference for committed
    /// instructions, a full record otherwise.
    fn write_expr(&mut self, expr: ExprId) -> Result<(), BytecodeError> {
        if let Some(&id) = self.instr_ids.get(&expr) {
            self.write_psop(PseudoOp::WeakInstrRef)?;
            self.w.write_vbr32(id)?;
            return self.w.end_atom();
        }
        if self.arena.expr(expr).instr_id().is_some() {
            return Err(BytecodeError::invariant(
                "operand references an instruction that has not been emitted yet",
            ));
        }
        self.write_node(expr)
    }

    fn write_expr_opt(&mut self, expr: Option<ExprId>) -> Result<(), BytecodeError> {
        match expr {
            Some(e) => self.write_expr(e),
            None => {
                self.write_psop(PseudoOp::Null)?;
                self.w.end_atom()
            }
        }
    }

    /// Emits a defining occurrence: children, opcode, scalars, atom
    /// boundary, then the annotation chain.
    fn write_node(&mut self, expr: ExprId) -> Result<(), BytecodeError> {
        match &self.arena.expr(expr).kind {
            ExprKind::VarDecl {
                var_kind,
                name,
                definition,
            } => {
                self.write_expr_opt(*definition)?;
                self.write_opcode(Opcode::VarDecl)?;
                self.w.write_bits32(var_kind_wire(*var_kind), VAR_KIND_BITS)?;
                self.w.write_str(name)?;
                self.w.end_atom()?;
            }
            ExprKind::Function { vardecl, body } => {
                self.write_binder(Opcode::Function, *vardecl, *body)?;
            }
            ExprKind::Let { vardecl, body } => {
                self.write_binder(Opcode::Let, *vardecl, *body)?;
            }
            ExprKind::Code {
                call_conv,
                return_type,
                body,
            } => {
                self.write_expr(*return_type)?;
                self.write_expr_opt(*body)?;
                self.write_opcode(Opcode::Code)?;
                self.w.write_bits32(call_conv_wire(*call_conv), CALL_CONV_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::Field { range, body } => {
                self.write_expr(*range)?;
                self.write_expr(*body)?;
                self.write_opcode(Opcode::Field)?;
                self.w.end_atom()?;
            }
            ExprKind::Slot { name, definition } => {
                self.write_expr(*definition)?;
                self.write_opcode(Opcode::Slot)?;
                self.w.write_str(name)?;
                self.w.end_atom()?;
            }
            ExprKind::Record { slots } => {
                let slots = slots.clone();
                for &slot in &slots {
                    self.write_expr(slot)?;
                }
                self.write_opcode(Opcode::Record)?;
                self.w.write_vbr32(slots.len() as u32)?;
                self.w.end_atom()?;
            }
            ExprKind::Array { elems } => {
                let elems = elems.clone();
                for &elem in &elems {
                    self.write_expr(elem)?;
                }
                self.write_opcode(Opcode::Array)?;
                self.w.write_vbr32(elems.len() as u32)?;
                self.w.end_atom()?;
            }
            ExprKind::ScalarType { base } => {
                self.write_opcode(Opcode::ScalarType)?;
                self.w.write_u8(base.descriptor())?;
                if base.vect_size > 0 {
                    self.w.write_u8(base.vect_size)?;
                }
                self.w.end_atom()?;
            }
            ExprKind::Cfg { blocks } => {
                let blocks = blocks.clone();
                self.write_cfg(&blocks)?;
            }
            ExprKind::Literal { value } => {
                let value = value.clone();
                self.write_opcode(Opcode::Literal)?;
                self.write_literal(&value)?;
                self.w.end_atom()?;
            }
            ExprKind::Variable { decl } => {
                let index = self
                    .scopes
                    .iter()
                    .rposition(|d| d == decl)
                    .ok_or_else(|| {
                        BytecodeError::invariant("variable references a declaration not in scope")
                    })?;
                self.write_opcode(Opcode::Variable)?;
                self.w.write_vbr32(index as u32 + 1)?;
                self.w.end_atom()?;
            }
            ExprKind::Apply {
                apply_kind,
                fun,
                arg,
            } => {
                self.write_expr(*fun)?;
                self.write_expr_opt(*arg)?;
                self.write_opcode(Opcode::Apply)?;
                self.w.write_bits32(apply_kind_wire(*apply_kind), APPLY_KIND_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::Project { record, field } => {
                let field = field.clone();
                self.write_expr(*record)?;
                self.write_opcode(Opcode::Project)?;
                self.w.write_str(&field)?;
                self.w.end_atom()?;
            }
            ExprKind::Call { target } => {
                self.write_expr(*target)?;
                self.write_opcode(Opcode::Call)?;
                self.w.end_atom()?;
            }
            ExprKind::Alloc { alloc_kind, data } => {
                self.write_expr(*data)?;
                self.write_opcode(Opcode::Alloc)?;
                self.w.write_bits32(alloc_kind_wire(*alloc_kind), ALLOC_KIND_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::Load { pointer } => {
                self.write_expr(*pointer)?;
                self.write_opcode(Opcode::Load)?;
                self.w.end_atom()?;
            }
            ExprKind::Store { dest, source } => {
                self.write_expr(*dest)?;
                self.write_expr(*source)?;
                self.write_opcode(Opcode::Store)?;
                self.w.end_atom()?;
            }
            ExprKind::ArrayIndex { array, index } => {
                self.write_expr(*array)?;
                self.write_expr(*index)?;
                self.write_opcode(Opcode::ArrayIndex)?;
                self.w.end_atom()?;
            }
            ExprKind::ArrayAdd { array, index } => {
                self.write_expr(*array)?;
                self.write_expr(*index)?;
                self.write_opcode(Opcode::ArrayAdd)?;
                self.w.end_atom()?;
            }
            ExprKind::UnaryOp { op, operand } => {
                self.write_expr(*operand)?;
                self.write_opcode(Opcode::UnaryOp)?;
                self.w.write_bits32(unary_op_wire(*op), OPERATOR_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::BinaryOp { op, lhs, rhs } => {
                self.write_expr(*lhs)?;
                self.write_expr(*rhs)?;
                self.write_opcode(Opcode::BinaryOp)?;
                self.w.write_bits32(bin_op_wire(*op), OPERATOR_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::Cast { op, operand } => {
                self.write_expr(*operand)?;
                self.write_opcode(Opcode::Cast)?;
                self.w.write_bits32(cast_op_wire(*op), OPERATOR_BITS)?;
                self.w.end_atom()?;
            }
            ExprKind::Phi { .. } => {
                return Err(BytecodeError::invariant(
                    "phi outside the formal arguments of a basic block",
                ));
            }
            ExprKind::Goto { target, args } => {
                let args = args.clone();
                let target_index = self.arena.block(*target).index;
                for &arg in &args {
                    self.write_expr(arg)?;
                }
                self.write_opcode(Opcode::Goto)?;
                self.w.write_vbr32(target_index)?;
                self.w.write_vbr32(args.len() as u32)?;
                self.w.end_atom()?;
            }
            ExprKind::Branch {
                condition,
                then_block,
                else_block,
            } => {
                let then_index = self.arena.block(*then_block).index;
                let else_index = self.arena.block(*else_block).index;
                self.write_expr(*condition)?;
                self.write_opcode(Opcode::Branch)?;
                self.w.write_vbr32(then_index)?;
                self.w.write_vbr32(else_index)?;
                self.w.end_atom()?;
            }
            ExprKind::Switch {
                condition,
                labels,
                targets,
            } => {
                let labels = labels.clone();
                let target_indices: Vec<u32> =
                    targets.iter().map(|&t| self.arena.block(t).index).collect();
                self.write_expr(*condition)?;
                for &label in &labels {
                    self.write_expr(label)?;
                }
                self.write_opcode(Opcode::Switch)?;
                self.w.write_vbr32(target_indices.len() as u32)?;
                for index in target_indices {
                    self.w.write_vbr32(index)?;
                }
                self.w.end_atom()?;
            }
            ExprKind::Return { value } => {
                self.write_expr(*value)?;
                self.write_opcode(Opcode::Return)?;
                self.w.end_atom()?;
            }
            ExprKind::Undefined => {
                self.write_opcode(Opcode::Undefined)?;
                self.w.end_atom()?;
            }
            ExprKind::Wildcard => {
                self.write_opcode(Opcode::Wildcard)?;
                self.w.end_atom()?;
            }
            ExprKind::Identifier { name } => {
                let name = name.clone();
                self.write_opcode(Opcode::Identifier)?;
                self.w.write_str(&name)?;
                self.w.end_atom()?;
            }
            ExprKind::IfThenElse {
                condition,
                then_expr,
                else_expr,
            } => {
                self.write_expr(*condition)?;
                self.write_expr(*then_expr)?;
                self.write_expr(*else_expr)?;
                self.write_opcode(Opcode::IfThenElse)?;
                self.w.end_atom()?;
            }
        }
        self.write_annotations(expr)
    }

    /// Emits a binder (function or let): the declaration, scope markers
    /// around the body, then the binder's own opcode.
    fn write_binder(
        &mut self,
        opcode: Opcode,
        vardecl: ExprId,
        body: ExprId,
    ) -> Result<(), BytecodeError> {
        self.write_expr(vardecl)?;
        self.write_psop(PseudoOp::EnterScope)?;
        self.w.end_atom()?;
        self.scopes.push(vardecl);
        self.write_expr(body)?;
        self.write_psop(PseudoOp::ExitScope)?;
        self.w.end_atom()?;
        self.scopes.pop();
        self.write_opcode(opcode)?;
        self.w.end_atom()
    }

    /// Emits a structured CFG: the EnterCFG marker with every block's
    /// declared argument count, each block framed by EnterBlock and a
    /// closing BasicBlock record, and finally the Cfg record itself.
    fn write_cfg(&mut self, blocks: &[crate::til::block::BlockId]) -> Result<(), BytecodeError> {
        if self.in_cfg {
            return Err(BytecodeError::invariant("control-flow graphs do not nest"));
        }
        self.in_cfg = true;
        self.instr_ids.clear();
        self.next_instr_id = 0;
        log::trace!("encode cfg: {} blocks", blocks.len());

        self.write_psop(PseudoOp::EnterCfg)?;
        self.w.write_vbr32(blocks.len() as u32)?;
        for &bid in blocks {
            self.w.write_vbr32(self.arena.block(bid).declared_args)?;
        }
        self.w.end_atom()?;

        for &bid in blocks {
            let block = self.arena.block(bid);
            let index = block.index;
            let phis = block.phis.clone();
            let instrs = block.instrs.clone();

            self.write_psop(PseudoOp::EnterBlock)?;
            self.w.write_vbr32(index)?;
            self.w.end_atom()?;

            for &phi in &phis {
                self.write_opcode(Opcode::Phi)?;
                self.w.end_atom()?;
                self.write_annotations(phi)?;
                self.write_psop(PseudoOp::BBArgument)?;
                self.w.end_atom()?;
                self.commit(phi);
            }
            for &instr in &instrs {
                self.write_node(instr)?;
                self.write_psop(PseudoOp::BBInstruction)?;
                self.w.end_atom()?;
                self.commit(instr);
            }

            self.write_opcode(Opcode::BasicBlock)?;
            self.w.write_vbr32(index)?;
            self.w.end_atom()?;
        }

        self.write_opcode(Opcode::Cfg)?;
        self.w.write_vbr32(blocks.len() as u32)?;
        self.w.end_atom()?;
        self.in_cfg = false;
        Ok(())
    }

    fn write_literal(&mut self, value: &LitVal) -> Result<(), BytecodeError> {
        self.w.write_u8(value.base_type().descriptor())?;
        match value {
            LitVal::Bool(v) => self.w.write_bool(*v),
            LitVal::I8(v) => self.w.write_i8(*v),
            LitVal::I16(v) => self.w.write_i16(*v),
            LitVal::I32(v) => self.w.write_i32(*v),
            LitVal::I64(v) => self.w.write_i64(*v),
            LitVal::U8(v) => self.w.write_u8(*v),
            LitVal::U16(v) => self.w.write_u16(*v),
            LitVal::U32(v) => self.w.write_u32(*v),
            LitVal::U64(v) => self.w.write_u64(*v),
            LitVal::F32(v) => self.w.write_f32(*v),
            LitVal::F64(v) => self.w.write_f64(*v),
            LitVal::Str(v) => self.w.write_str(v),
            LitVal::Ptr(p) => {
                if *p != 0 {
                    return Err(BytecodeError::invariant(
                        "cannot serialize a non-null pointer literal",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Walks the annotation chain: sub-expressions first, then the marker,
    /// the kind, and the kind's scalar payload.
    fn write_annotations(&mut self, expr: ExprId) -> Result<(), BytecodeError> {
        for aid in self.arena.annot_chain(expr) {
            let data = self.arena.annot(aid).data.clone();
            for sub in data.sub_exprs() {
                self.write_expr(sub)?;
            }
            self.write_psop(PseudoOp::Annotation)?;
            self.w
                .write_bits32(data.kind().wire_value(), ANNOT_KIND_BITS)?;
            match &data {
                AnnotData::InstrName { name } => self.w.write_str(name)?,
                AnnotData::SourceLoc { position } => self.w.write_vbr64(*position)?,
                AnnotData::Precondition { .. } | AnnotData::TestTriplet { .. } => {}
            }
            self.w.end_atom()?;
        }
        Ok(())
    }

    fn commit(&mut self, expr: ExprId) {
        let id = self.next_instr_id;
        self.next_instr_id += 1;
        self.instr_ids.insert(expr, id);
    }

    fn write_psop(&mut self, psop: PseudoOp) -> Result<(), BytecodeError> {
        self.w.write_bits32(psop as u32, OPCODE_BITS)
    }

    fn write_opcode(&mut self, opcode: Opcode) -> Result<(), BytecodeError> {
        self.w.write_bits32(opcode.wire_value(), OPCODE_BITS)
    }
}
