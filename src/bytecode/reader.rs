//! Stack-machine deserialization of expression trees.
//!
//! The reader interprets the flat opcode stream with an operand stack and
//! three side tables:
//!
//! - a scope stack of variable declarations (index 0 is a sentinel; wire
//!   indices are 1-based),
//! - a block table, pre-allocated at `EnterCFG` from the declared argument
//!   counts so forward branch targets resolve immediately,
//! - an instruction table, appended as `BBArgument` and `BBInstruction`
//!   commit nodes, which weak references index.
//!
//! A stack floor is recorded when a CFG opens; no record may pop below it.
//! The first failure is sticky: the main loop stops, the diagnostic is
//! logged, and `read` hands back whatever partial tree exists. Callers must
//! check `success` and discard the partial tree on failure.

use crate::bytecode::opcode::{
    alloc_kind_from_wire, apply_kind_from_wire, bin_op_from_wire, call_conv_from_wire,
    cast_op_from_wire, decode_fused, unary_op_from_wire, var_kind_from_wire, FusedOp, Opcode,
    PseudoOp, ALLOC_KIND_BITS, ANNOT_KIND_BITS, APPLY_KIND_BITS, CALL_CONV_BITS, OPCODE_BITS,
    OPERATOR_BITS, VAR_KIND_BITS,
};
use crate::bytecode::stream::{BitReader, ByteSource};
use crate::error::BytecodeError;
use crate::til::annot::{AnnotData, AnnotKind};
use crate::til::block::BlockId;
use crate::til::builder::Builder;
use crate::til::expr::{ExprId, ExprKind, LitVal};
use crate::til::types::{BaseType, SizeCode, TypeClass};

/// Deserializes one expression tree from a bit stream, driving a builder to
/// allocate nodes.
pub struct BytecodeReader<'a, S: ByteSource> {
    builder: Builder<'a>,
    r: BitReader<S>,
    /// Operand stack; `None` entries come from `PSOP_Null`.
    stack: Vec<Option<ExprId>>,
    /// Scope stack; entry 0 is a sentinel so wire indices are 1-based.
    vars: Vec<Option<ExprId>>,
    /// Dense block table of the currently open CFG.
    blocks: Vec<BlockId>,
    /// Committed instructions of the currently open CFG, by dense id.
    instrs: Vec<ExprId>,
    /// Operand-stack depth when the current CFG opened.
    cfg_floor: Option<usize>,
    error: Option<BytecodeError>,
}

impl<'a, S: ByteSource> BytecodeReader<'a, S> {
    pub fn new(builder: Builder<'a>, source: S) -> BytecodeReader<'a, S> {
        BytecodeReader {
            builder,
            r: BitReader::new(source),
            stack: Vec::new(),
            vars: vec![None],
            blocks: Vec::new(),
            instrs: Vec::new(),
            cfg_floor: None,
            error: None,
        }
    }

    /// Reads records until the stream is exhausted or a failure sticks.
    /// Returns the decoded tree, or the partial tree on failure; check
    /// [`BytecodeReader::success`] before trusting the result.
    pub fn read(&mut self) -> Option<ExprId> {
        while self.error.is_none() && !self.r.empty() {
            if let Err(e) = self.read_record() {
                log::warn!("bytecode decode failed: {}", e);
                self.error = Some(e);
            }
        }
        if self.error.is_none() && self.stack.len() != 1 {
            let e = BytecodeError::invariant(format!(
                "expected exactly one top-level expression, found {}",
                self.stack.len()
            ));
            log::warn!("bytecode decode failed: {}", e);
            self.error = Some(e);
        }
        self.stack.last().copied().flatten()
    }

    /// True while no failure has been recorded.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&BytecodeError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<BytecodeError> {
        self.error.take()
    }

    fn read_record(&mut self) -> Result<(), BytecodeError> {
        match decode_fused(self.r.read_bits32(OPCODE_BITS)?)? {
            FusedOp::Pseudo(psop) => self.read_pseudo(psop)?,
            FusedOp::Expr(opcode) => self.read_expr(opcode)?,
        }
        self.r.end_atom()
    }

    fn read_pseudo(&mut self, psop: PseudoOp) -> Result<(), BytecodeError> {
        match psop {
            PseudoOp::Null => {
                self.stack.push(None);
            }
            PseudoOp::WeakInstrRef => {
                let id = self.r.read_vbr32()?;
                let expr = self.instrs.get(id as usize).copied().ok_or(
                    BytecodeError::IndexOutOfRange {
                        what: "instruction",
                        index: id,
                        limit: self.instrs.len() as u32,
                    },
                )?;
                self.stack.push(Some(expr));
            }
            PseudoOp::BBArgument => {
                let phi = self.pop_expr("block argument")?;
                self.builder.add_block_arg(phi)?;
                self.instrs.push(phi);
            }
            PseudoOp::BBInstruction => {
                let instr = self.pop_expr("block instruction")?;
                self.builder.add_instr(instr)?;
                self.instrs.push(instr);
            }
            PseudoOp::EnterScope => {
                let decl = self.peek_expr("scope entry")?;
                if !matches!(
                    self.builder.arena().expr(decl).kind,
                    ExprKind::VarDecl { .. }
                ) {
                    return Err(BytecodeError::invariant(
                        "scope entry expects a variable declaration on the stack",
                    ));
                }
                self.vars.push(Some(decl));
            }
            PseudoOp::ExitScope => {
                if self.vars.len() <= 1 {
                    return Err(BytecodeError::invariant("scope exit with no open scope"));
                }
                self.vars.pop();
            }
            PseudoOp::EnterBlock => {
                let index = self.r.read_vbr32()?;
                log::trace!("decode: enter block {}", index);
                self.builder.enter_block(index)?;
            }
            PseudoOp::EnterCfg => {
                let nblocks = self.r.read_vbr32()?;
                let mut arities = Vec::new();
                for _ in 0..nblocks {
                    arities.push(self.r.read_vbr32()?);
                }
                log::trace!("decode: enter cfg, {} blocks", nblocks);
                self.blocks = self.builder.enter_cfg(&arities)?;
                self.instrs.clear();
                self.cfg_floor = Some(self.stack.len());
            }
            PseudoOp::Annotation => {
                self.read_annotation()?;
            }
            PseudoOp::Last => {
                return Err(BytecodeError::Unknown {
                    what: "pseudo-opcode",
                    value: PseudoOp::Last as u32,
                });
            }
        }
        Ok(())
    }

    fn read_annotation(&mut self) -> Result<(), BytecodeError> {
        let raw = self.r.read_bits32(ANNOT_KIND_BITS)?;
        let kind = AnnotKind::from_wire(raw).ok_or(BytecodeError::Unknown {
            what: "annotation kind",
            value: raw,
        })?;
        let data = match kind {
            AnnotKind::InstrName => AnnotData::InstrName {
                name: self.r.read_str()?,
            },
            AnnotKind::SourceLoc => AnnotData::SourceLoc {
                position: self.r.read_vbr64()?,
            },
            AnnotKind::Precondition => AnnotData::Precondition {
                condition: self.pop_expr("precondition annotation")?,
            },
            AnnotKind::TestTriplet => {
                let exprs = self.pop_many(3, "triplet annotation")?;
                AnnotData::TestTriplet {
                    exprs: [exprs[0], exprs[1], exprs[2]],
                }
            }
        };
        let target = self.peek_expr("annotation target")?;
        self.builder.attach_annot(target, data);
        Ok(())
    }

    fn read_expr(&mut self, opcode: Opcode) -> Result<(), BytecodeError> {
        let expr = match opcode {
            Opcode::VarDecl => {
                let var_kind = var_kind_from_wire(self.r.read_bits32(VAR_KIND_BITS)?)?;
                let name = self.r.read_str()?;
                let definition = self.pop_slot("variable declaration")?;
                self.builder.new_var_decl(var_kind, name, definition)
            }
            Opcode::Function => {
                let body = self.pop_expr("function body")?;
                let vardecl = self.pop_expr("function binder")?;
                self.require_var_decl(vardecl, "function binder")?;
                self.builder.new_function(vardecl, body)
            }
            Opcode::Code => {
                let call_conv = call_conv_from_wire(self.r.read_bits32(CALL_CONV_BITS)?)?;
                let body = self.pop_slot("code body")?;
                let return_type = self.pop_expr("code return type")?;
                self.builder.new_code(call_conv, return_type, body)
            }
            Opcode::Field => {
                let body = self.pop_expr("field body")?;
                let range = self.pop_expr("field range")?;
                self.builder.new_field(range, body)
            }
            Opcode::Slot => {
                let name = self.r.read_str()?;
                let definition = self.pop_expr("slot definition")?;
                self.builder.new_slot(name, definition)
            }
            Opcode::Record => {
                let n = self.r.read_vbr32()?;
                let slots = self.pop_many(n as usize, "record slots")?;
                self.builder.new_record(slots)
            }
            Opcode::Array => {
                let n = self.r.read_vbr32()?;
                let elems = self.pop_many(n as usize, "array elements")?;
                self.builder.new_array(elems)
            }
            Opcode::ScalarType => {
                let base = self.read_base_type()?;
                self.builder.new_scalar_type(base)
            }
            Opcode::Cfg => {
                let n = self.r.read_vbr32()?;
                if n as usize != self.blocks.len() {
                    return Err(BytecodeError::ArityMismatch {
                        what: "cfg blocks",
                        expected: n,
                        found: self.blocks.len() as u32,
                    });
                }
                let cfg = self.builder.end_cfg()?;
                match self.cfg_floor.take() {
                    Some(floor) if floor == self.stack.len() => {}
                    Some(_) => {
                        return Err(BytecodeError::invariant(
                            "operand stack out of balance at CFG close",
                        ))
                    }
                    None => {
                        return Err(BytecodeError::invariant("CFG close without an open CFG"))
                    }
                }
                cfg
            }
            Opcode::BasicBlock => {
                let index = self.r.read_vbr32()?;
                let current = self.builder.current_block().ok_or_else(|| {
                    BytecodeError::invariant("block close without an open block")
                })?;
                if self.builder.arena().block(current).index != index {
                    return Err(BytecodeError::invariant(
                        "block close index disagrees with the open block",
                    ));
                }
                self.builder.end_block()?;
                return Ok(());
            }
            Opcode::Literal => {
                let value = self.read_literal()?;
                self.builder.new_literal(value)
            }
            Opcode::Variable => {
                let index = self.r.read_vbr32()?;
                let decl = if index == 0 || (index as usize) >= self.vars.len() {
                    return Err(BytecodeError::IndexOutOfRange {
                        what: "variable",
                        index,
                        limit: self.vars.len() as u32,
                    });
                } else {
                    self.vars[index as usize].ok_or_else(|| {
                        BytecodeError::invariant("scope sentinel used as a variable")
                    })?
                };
                self.builder.new_variable(decl)
            }
            Opcode::Apply => {
                let apply_kind = apply_kind_from_wire(self.r.read_bits32(APPLY_KIND_BITS)?)?;
                let arg = self.pop_slot("apply argument")?;
                let fun = self.pop_expr("apply function")?;
                self.builder.new_apply(apply_kind, fun, arg)
            }
            Opcode::Project => {
                let field = self.r.read_str()?;
                let record = self.pop_expr("projection record")?;
                self.builder.new_project(record, field)
            }
            Opcode::Call => {
                let target = self.pop_expr("call target")?;
                self.builder.new_call(target)
            }
            Opcode::Alloc => {
                let alloc_kind = alloc_kind_from_wire(self.r.read_bits32(ALLOC_KIND_BITS)?)?;
                let data = self.pop_expr("alloc data")?;
                self.builder.new_alloc(alloc_kind, data)
            }
            Opcode::Load => {
                let pointer = self.pop_expr("load pointer")?;
                self.builder.new_load(pointer)
            }
            Opcode::Store => {
                let source = self.pop_expr("store source")?;
                let dest = self.pop_expr("store destination")?;
                self.builder.new_store(dest, source)
            }
            Opcode::ArrayIndex => {
                let index = self.pop_expr("array index")?;
                let array = self.pop_expr("array")?;
                self.builder.new_array_index(array, index)
            }
            Opcode::ArrayAdd => {
                let index = self.pop_expr("array index")?;
                let array = self.pop_expr("array")?;
                self.builder.new_array_add(array, index)
            }
            Opcode::UnaryOp => {
                let op = unary_op_from_wire(self.r.read_bits32(OPERATOR_BITS)?)?;
                let operand = self.pop_expr("unary operand")?;
                self.builder.new_unary_op(op, operand)
            }
            Opcode::BinaryOp => {
                let op = bin_op_from_wire(self.r.read_bits32(OPERATOR_BITS)?)?;
                let rhs = self.pop_expr("binary operand")?;
                let lhs = self.pop_expr("binary operand")?;
                self.builder.new_binary_op(op, lhs, rhs)
            }
            Opcode::Cast => {
                let op = cast_op_from_wire(self.r.read_bits32(OPERATOR_BITS)?)?;
                let operand = self.pop_expr("cast operand")?;
                self.builder.new_cast(op, operand)
            }
            Opcode::Phi => self.builder.new_phi(),
            Opcode::Goto => {
                let target = self.r.read_vbr32()?;
                let n = self.r.read_vbr32()?;
                let args = self.pop_many(n as usize, "goto arguments")?;
                self.builder.new_goto(target, args)?
            }
            Opcode::Branch => {
                let then_index = self.r.read_vbr32()?;
                let else_index = self.r.read_vbr32()?;
                let condition = self.pop_expr("branch condition")?;
                self.builder.new_branch(condition, then_index, else_index)?
            }
            Opcode::Switch => {
                let n = self.r.read_vbr32()?;
                let mut targets = Vec::new();
                for _ in 0..n {
                    targets.push(self.r.read_vbr32()?);
                }
                let labels = self.pop_many(n as usize, "switch labels")?;
                let condition = self.pop_expr("switch condition")?;
                self.builder.new_switch(condition, labels, &targets)?
            }
            Opcode::Return => {
                let value = self.pop_expr("return value")?;
                self.builder.new_return(value)
            }
            Opcode::Undefined => self.builder.new_undefined(),
            Opcode::Wildcard => self.builder.new_wildcard(),
            Opcode::Identifier => {
                let name = self.r.read_str()?;
                self.builder.new_identifier(name)
            }
            Opcode::Let => {
                let body = self.pop_expr("let body")?;
                let vardecl = self.pop_expr("let binder")?;
                self.require_var_decl(vardecl, "let binder")?;
                self.builder.new_let(vardecl, body)
            }
            Opcode::IfThenElse => {
                let else_expr = self.pop_expr("else expression")?;
                let then_expr = self.pop_expr("then expression")?;
                let condition = self.pop_expr("condition")?;
                self.builder.new_if_then_else(condition, then_expr, else_expr)
            }
        };
        self.stack.push(Some(expr));
        Ok(())
    }

    fn read_base_type(&mut self) -> Result<BaseType, BytecodeError> {
        let descriptor = self.r.read_u8()?;
        let (base, has_vect) = BaseType::from_descriptor(descriptor)?;
        if has_vect {
            let lanes = self.r.read_u8()?;
            Ok(BaseType::vector(base.class, base.size, lanes))
        } else {
            Ok(base)
        }
    }

    fn read_literal(&mut self) -> Result<LitVal, BytecodeError> {
        let descriptor = self.r.read_u8()?;
        let (base, has_vect) = BaseType::from_descriptor(descriptor)?;
        if has_vect {
            return Err(BytecodeError::invariant(
                "vector literal values are not supported",
            ));
        }
        Ok(match (base.class, base.size) {
            (TypeClass::Bool, _) => LitVal::Bool(self.r.read_bool()?),
            (TypeClass::Int, SizeCode::Bits8) => LitVal::I8(self.r.read_i8()?),
            (TypeClass::Int, SizeCode::Bits16) => LitVal::I16(self.r.read_i16()?),
            (TypeClass::Int, SizeCode::Bits32) => LitVal::I32(self.r.read_i32()?),
            (TypeClass::Int, SizeCode::Bits64) => LitVal::I64(self.r.read_i64()?),
            (TypeClass::UInt, SizeCode::Bits8) => LitVal::U8(self.r.read_u8()?),
            (TypeClass::UInt, SizeCode::Bits16) => LitVal::U16(self.r.read_u16()?),
            (TypeClass::UInt, SizeCode::Bits32) => LitVal::U32(self.r.read_u32()?),
            (TypeClass::UInt, SizeCode::Bits64) => LitVal::U64(self.r.read_u64()?),
            (TypeClass::Float, SizeCode::Bits32) => LitVal::F32(self.r.read_f32()?),
            (TypeClass::Float, SizeCode::Bits64) => LitVal::F64(self.r.read_f64()?),
            (TypeClass::String, _) => LitVal::Str(self.r.read_str()?),
            (TypeClass::Pointer, _) => LitVal::Ptr(0),
            _ => {
                return Err(BytecodeError::Unknown {
                    what: "literal base type",
                    value: descriptor as u32,
                })
            }
        })
    }

    fn require_var_decl(&self, expr: ExprId, what: &'static str) -> Result<(), BytecodeError> {
        if matches!(
            self.builder.arena().expr(expr).kind,
            ExprKind::VarDecl { .. }
        ) {
            Ok(())
        } else {
            Err(BytecodeError::invariant(format!(
                "{} must be a variable declaration",
                what
            )))
        }
    }

    /// Pops one slot, which may be a null entry. Refuses to pop below the
    /// stack floor of the open CFG.
    fn pop_slot(&mut self, what: &'static str) -> Result<Option<ExprId>, BytecodeError> {
        let floor = self.cfg_floor.unwrap_or(0);
        if self.stack.len() <= floor {
            return Err(BytecodeError::invariant(format!(
                "operand stack underflow reading {}",
                what
            )));
        }
        Ok(self.stack.pop().flatten())
    }

    fn pop_expr(&mut self, what: &'static str) -> Result<ExprId, BytecodeError> {
        self.pop_slot(what)?.ok_or_else(|| {
            BytecodeError::invariant(format!("unexpected null operand reading {}", what))
        })
    }

    /// Pops `n` operands and returns them oldest-first.
    fn pop_many(&mut self, n: usize, what: &'static str) -> Result<Vec<ExprId>, BytecodeError> {
        let floor = self.cfg_floor.unwrap_or(0);
        let available = self.stack.len().saturating_sub(floor);
        if available < n {
            return Err(BytecodeError::ArityMismatch {
                what,
                expected: n as u32,
                found: available as u32,
            });
        }
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.pop_expr(what)?);
        }
        out.reverse();
        Ok(out)
    }

    fn peek_expr(&self, what: &'static str) -> Result<ExprId, BytecodeError> {
        self.stack.last().copied().flatten().ok_or_else(|| {
            BytecodeError::invariant(format!("no expression on the stack for {}", what))
        })
    }
}
