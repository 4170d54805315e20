//! Construction API for expression trees and control-flow graphs.
//!
//! The builder allocates nodes into a caller-owned [`Arena`] and tracks the
//! open CFG and block the way the decoder's stack machine expects:
//!
//! 1. `enter_cfg()` pre-allocates every block with its declared argument
//!    count, so forward branch targets resolve immediately.
//! 2. `enter_block()` points the cursor at a block; `add_block_arg()` and
//!    `add_instr()` install nodes and assign dense instruction ids in
//!    commit order.
//! 3. Terminator factories (`new_goto` and friends) record the incoming
//!    edge on their target as they are created.
//! 4. `end_cfg()` seals the graph: it checks arities and terminators, then
//!    wires each goto's argument list into the target block's phis at the
//!    position of the edge.

use crate::error::BytecodeError;
use crate::til::annot::{AnnotData, AnnotId};
use crate::til::arena::Arena;
use crate::til::block::BlockId;
use crate::til::expr::{
    AllocKind, ApplyKind, BinOp, CallConv, CastOp, ExprId, ExprKind, LitVal, UnaryOp, VarKind,
};
use crate::til::types::BaseType;

/// Builds expression trees into an arena.
pub struct Builder<'a> {
    arena: &'a mut Arena,
    cfg: Option<OpenCfg>,
}

/// State of the currently open control-flow graph.
struct OpenCfg {
    blocks: Vec<BlockId>,
    /// Index into `blocks` of the block under construction.
    current: Option<usize>,
    next_instr_id: u32,
}

impl<'a> Builder<'a> {
    pub fn new(arena: &'a mut Arena) -> Builder<'a> {
        Builder { arena, cfg: None }
    }

    pub fn arena(&self) -> &Arena {
        self.arena
    }

    /// True while a control-flow graph is open.
    pub fn in_cfg(&self) -> bool {
        self.cfg.is_some()
    }

    /// The block currently under construction, if any.
    pub fn current_block(&self) -> Option<BlockId> {
        let cfg = self.cfg.as_ref()?;
        cfg.current.map(|i| cfg.blocks[i])
    }

    // ---- Expression factories ----

    pub fn new_var_decl(
        &mut self,
        var_kind: VarKind,
        name: impl Into<String>,
        definition: Option<ExprId>,
    ) -> ExprId {
        self.arena.alloc_expr(ExprKind::VarDecl {
            var_kind,
            name: name.into(),
            definition,
        })
    }

    pub fn new_function(&mut self, vardecl: ExprId, body: ExprId) -> ExprId {
        debug_assert!(
            matches!(self.arena.expr(vardecl).kind, ExprKind::VarDecl { .. }),
            "function binder must be a variable declaration"
        );
        self.arena.alloc_expr(ExprKind::Function { vardecl, body })
    }

    pub fn new_code(
        &mut self,
        call_conv: CallConv,
        return_type: ExprId,
        body: Option<ExprId>,
    ) -> ExprId {
        self.arena.alloc_expr(ExprKind::Code {
            call_conv,
            return_type,
            body,
        })
    }

    pub fn new_field(&mut self, range: ExprId, body: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Field { range, body })
    }

    pub fn new_slot(&mut self, name: impl Into<String>, definition: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Slot {
            name: name.into(),
            definition,
        })
    }

    pub fn new_record(&mut self, slots: Vec<ExprId>) -> ExprId {
        self.arena.alloc_expr(ExprKind::Record { slots })
    }

    pub fn new_array(&mut self, elems: Vec<ExprId>) -> ExprId {
        self.arena.alloc_expr(ExprKind::Array { elems })
    }

    pub fn new_scalar_type(&mut self, base: BaseType) -> ExprId {
        self.arena.alloc_expr(ExprKind::ScalarType { base })
    }

    pub fn new_literal(&mut self, value: LitVal) -> ExprId {
        self.arena.alloc_expr(ExprKind::Literal { value })
    }

    pub fn new_variable(&mut self, decl: ExprId) -> ExprId {
        debug_assert!(
            matches!(self.arena.expr(decl).kind, ExprKind::VarDecl { .. }),
            "variable must reference a variable declaration"
        );
        self.arena.alloc_expr(ExprKind::Variable { decl })
    }

    pub fn new_apply(&mut self, apply_kind: ApplyKind, fun: ExprId, arg: Option<ExprId>) -> ExprId {
        self.arena.alloc_expr(ExprKind::Apply {
            apply_kind,
            fun,
            arg,
        })
    }

    pub fn new_project(&mut self, record: ExprId, field: impl Into<String>) -> ExprId {
        self.arena.alloc_expr(ExprKind::Project {
            record,
            field: field.into(),
        })
    }

    pub fn new_call(&mut self, target: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Call { target })
    }

    pub fn new_alloc(&mut self, alloc_kind: AllocKind, data: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Alloc { alloc_kind, data })
    }

    pub fn new_load(&mut self, pointer: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Load { pointer })
    }

    pub fn new_store(&mut self, dest: ExprId, source: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Store { dest, source })
    }

    pub fn new_array_index(&mut self, array: ExprId, index: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::ArrayIndex { array, index })
    }

    pub fn new_array_add(&mut self, array: ExprId, index: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::ArrayAdd { array, index })
    }

    pub fn new_unary_op(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::UnaryOp { op, operand })
    }

    pub fn new_binary_op(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::BinaryOp { op, lhs, rhs })
    }

    pub fn new_cast(&mut self, op: CastOp, operand: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Cast { op, operand })
    }

    /// Creates an empty phi. Operands are wired from incoming goto argument
    /// lists when the owning CFG is sealed.
    pub fn new_phi(&mut self) -> ExprId {
        self.arena.alloc_expr(ExprKind::Phi { args: Vec::new() })
    }

    pub fn new_return(&mut self, value: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Return { value })
    }

    pub fn new_undefined(&mut self) -> ExprId {
        self.arena.alloc_expr(ExprKind::Undefined)
    }

    pub fn new_wildcard(&mut self) -> ExprId {
        self.arena.alloc_expr(ExprKind::Wildcard)
    }

    pub fn new_identifier(&mut self, name: impl Into<String>) -> ExprId {
        self.arena.alloc_expr(ExprKind::Identifier { name: name.into() })
    }

    pub fn new_let(&mut self, vardecl: ExprId, body: ExprId) -> ExprId {
        self.arena.alloc_expr(ExprKind::Let { vardecl, body })
    }

    pub fn new_if_then_else(
        &mut self,
        condition: ExprId,
        then_expr: ExprId,
        else_expr: ExprId,
    ) -> ExprId {
        self.arena.alloc_expr(ExprKind::IfThenElse {
            condition,
            then_expr,
            else_expr,
        })
    }

    /// Appends an annotation to `expr`'s chain.
    pub fn attach_annot(&mut self, expr: ExprId, data: AnnotData) -> AnnotId {
        self.arena.attach_annot(expr, data)
    }

    // ---- CFG protocol ----

    /// Opens a control-flow graph, pre-allocating one block per entry of
    /// `declared_args` with that declared argument count. Graphs do not
    /// nest; at most one may be open per builder.
    pub fn enter_cfg(&mut self, declared_args: &[u32]) -> Result<Vec<BlockId>, BytecodeError> {
        if self.cfg.is_some() {
            return Err(BytecodeError::invariant(
                "control-flow graphs do not nest; a graph is already open",
            ));
        }
        let blocks: Vec<BlockId> = declared_args
            .iter()
            .enumerate()
            .map(|(i, &n)| self.arena.alloc_block(i as u32, n))
            .collect();
        self.cfg = Some(OpenCfg {
            blocks: blocks.clone(),
            current: None,
            next_instr_id: 0,
        });
        Ok(blocks)
    }

    /// Points the cursor at the block with the given dense index.
    pub fn enter_block(&mut self, index: u32) -> Result<BlockId, BytecodeError> {
        let cfg = self
            .cfg
            .as_mut()
            .ok_or_else(|| BytecodeError::invariant("enter_block outside a control-flow graph"))?;
        if cfg.current.is_some() {
            return Err(BytecodeError::invariant(
                "previous block is still under construction",
            ));
        }
        let limit = cfg.blocks.len() as u32;
        if index >= limit {
            return Err(BytecodeError::IndexOutOfRange {
                what: "block",
                index,
                limit,
            });
        }
        cfg.current = Some(index as usize);
        Ok(cfg.blocks[index as usize])
    }

    /// Installs `phi` as the next formal argument of the current block and
    /// assigns it the next dense instruction id.
    pub fn add_block_arg(&mut self, phi: ExprId) -> Result<u32, BytecodeError> {
        let bid = self.require_current_block()?;
        if !matches!(self.arena.expr(phi).kind, ExprKind::Phi { .. }) {
            return Err(BytecodeError::invariant(
                "block arguments must be phi expressions",
            ));
        }
        if self.arena.expr(phi).instr_id.is_some() {
            return Err(BytecodeError::invariant(
                "expression is already installed as an instruction",
            ));
        }
        let block = self.arena.block(bid);
        if !block.instrs.is_empty() {
            return Err(BytecodeError::invariant(
                "block arguments must precede instructions",
            ));
        }
        if block.phis.len() as u32 >= block.declared_args {
            return Err(BytecodeError::ArityMismatch {
                what: "block arguments",
                expected: block.declared_args,
                found: block.phis.len() as u32 + 1,
            });
        }
        let id = self.commit_instr(phi);
        self.arena.block_mut(bid).phis.push(phi);
        Ok(id)
    }

    /// Installs `expr` as the next instruction of the current block and
    /// assigns it the next dense instruction id.
    pub fn add_instr(&mut self, expr: ExprId) -> Result<u32, BytecodeError> {
        let bid = self.require_current_block()?;
        if self.arena.expr(expr).instr_id.is_some() {
            return Err(BytecodeError::invariant(
                "expression is already installed as an instruction",
            ));
        }
        if let Some(last) = self.arena.block(bid).last_instr() {
            if self.arena.expr(last).kind.is_terminator() {
                return Err(BytecodeError::invariant("block is already sealed"));
            }
        }
        let id = self.commit_instr(expr);
        self.arena.block_mut(bid).instrs.push(expr);
        Ok(id)
    }

    /// Creates a goto to the block with dense index `target_index`, carrying
    /// one operand per formal argument of the target, and records the edge.
    pub fn new_goto(
        &mut self,
        target_index: u32,
        args: Vec<ExprId>,
    ) -> Result<ExprId, BytecodeError> {
        let (source, target) = self.edge_target(target_index)?;
        let declared = self.arena.block(target).declared_args;
        if args.len() as u32 != declared {
            return Err(BytecodeError::ArityMismatch {
                what: "goto arguments",
                expected: declared,
                found: args.len() as u32,
            });
        }
        self.arena.block_mut(target).preds.push(source);
        Ok(self.arena.alloc_expr(ExprKind::Goto { target, args }))
    }

    /// Creates a two-way branch. Branch targets carry no phi operands, so
    /// both must declare zero arguments.
    pub fn new_branch(
        &mut self,
        condition: ExprId,
        then_index: u32,
        else_index: u32,
    ) -> Result<ExprId, BytecodeError> {
        let (source, then_block) = self.edge_target(then_index)?;
        let (_, else_block) = self.edge_target(else_index)?;
        for target in [then_block, else_block] {
            self.require_bare_target(target)?;
            self.arena.block_mut(target).preds.push(source);
        }
        Ok(self.arena.alloc_expr(ExprKind::Branch {
            condition,
            then_block,
            else_block,
        }))
    }

    /// Creates a multi-way switch. Labels and targets are parallel; switch
    /// targets, like branch targets, must declare zero arguments.
    pub fn new_switch(
        &mut self,
        condition: ExprId,
        labels: Vec<ExprId>,
        target_indices: &[u32],
    ) -> Result<ExprId, BytecodeError> {
        if labels.len() != target_indices.len() {
            return Err(BytecodeError::ArityMismatch {
                what: "switch cases",
                expected: labels.len() as u32,
                found: target_indices.len() as u32,
            });
        }
        let mut targets = Vec::with_capacity(target_indices.len());
        for &index in target_indices {
            let (source, target) = self.edge_target(index)?;
            self.require_bare_target(target)?;
            self.arena.block_mut(target).preds.push(source);
            targets.push(target);
        }
        Ok(self.arena.alloc_expr(ExprKind::Switch {
            condition,
            labels,
            targets,
        }))
    }

    /// Finishes the current block: its declared arguments must all be
    /// installed and its last instruction must be a terminator.
    pub fn end_block(&mut self) -> Result<BlockId, BytecodeError> {
        let bid = self.require_current_block()?;
        let block = self.arena.block(bid);
        if block.phis.len() as u32 != block.declared_args {
            return Err(BytecodeError::ArityMismatch {
                what: "block arguments",
                expected: block.declared_args,
                found: block.phis.len() as u32,
            });
        }
        match block.last_instr() {
            Some(last) if self.arena.expr(last).kind.is_terminator() => {}
            _ => {
                return Err(BytecodeError::invariant(format!(
                    "block {} lacks a terminator",
                    block.index
                )))
            }
        }
        if let Some(cfg) = self.cfg.as_mut() {
            cfg.current = None;
        }
        Ok(bid)
    }

    /// Seals the open graph and returns the CFG expression. Every block must
    /// be finished; each goto's argument list is wired into its target's
    /// phis at the position of the edge.
    pub fn end_cfg(&mut self) -> Result<ExprId, BytecodeError> {
        let cfg = self
            .cfg
            .take()
            .ok_or_else(|| BytecodeError::invariant("no open control-flow graph"))?;
        if cfg.current.is_some() {
            return Err(BytecodeError::invariant(
                "a block is still under construction",
            ));
        }
        for &bid in &cfg.blocks {
            let block = self.arena.block(bid);
            if block.phis.len() as u32 != block.declared_args {
                return Err(BytecodeError::ArityMismatch {
                    what: "block arguments",
                    expected: block.declared_args,
                    found: block.phis.len() as u32,
                });
            }
            match block.last_instr() {
                Some(last) if self.arena.expr(last).kind.is_terminator() => {}
                _ => {
                    return Err(BytecodeError::invariant(format!(
                        "block {} lacks a terminator",
                        block.index
                    )))
                }
            }
        }
        for &bid in &cfg.blocks {
            let preds = self.arena.block(bid).preds.clone();
            for &pred in &preds {
                let term = match self.arena.block(pred).last_instr() {
                    Some(term) => term,
                    None => continue,
                };
                let args = match &self.arena.expr(term).kind {
                    ExprKind::Goto { target, args } if *target == bid => args.clone(),
                    _ => continue,
                };
                let phis = self.arena.block(bid).phis.clone();
                for (i, &phi) in phis.iter().enumerate() {
                    if let ExprKind::Phi { args: phi_args } = &mut self.arena.expr_mut(phi).kind {
                        phi_args.push(args[i]);
                    }
                }
            }
        }
        Ok(self.arena.alloc_expr(ExprKind::Cfg { blocks: cfg.blocks }))
    }

    // ---- internals ----

    fn commit_instr(&mut self, expr: ExprId) -> u32 {
        let cfg = self
            .cfg
            .as_mut()
            .expect("commit_instr is only reachable with an open graph");
        let id = cfg.next_instr_id;
        cfg.next_instr_id += 1;
        self.arena.expr_mut(expr).instr_id = Some(id);
        id
    }

    fn require_current_block(&self) -> Result<BlockId, BytecodeError> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| BytecodeError::invariant("no open control-flow graph"))?;
        let cur = cfg
            .current
            .ok_or_else(|| BytecodeError::invariant("no block under construction"))?;
        Ok(cfg.blocks[cur])
    }

    fn edge_target(&self, target_index: u32) -> Result<(BlockId, BlockId), BytecodeError> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| BytecodeError::invariant("terminator outside a control-flow graph"))?;
        let cur = cfg
            .current
            .ok_or_else(|| BytecodeError::invariant("terminator outside a block"))?;
        let limit = cfg.blocks.len() as u32;
        if target_index >= limit {
            return Err(BytecodeError::IndexOutOfRange {
                what: "block",
                index: target_index,
                limit,
            });
        }
        Ok((cfg.blocks[cur], cfg.blocks[target_index as usize]))
    }

    fn require_bare_target(&self, target: BlockId) -> Result<(), BytecodeError> {
        let declared = self.arena.block(target).declared_args;
        if declared != 0 {
            return Err(BytecodeError::ArityMismatch {
                what: "branch target arguments",
                expected: 0,
                found: declared,
            });
        }
        Ok(())
    }
}
