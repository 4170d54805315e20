//! Structural equality between expression trees, possibly in different
//! arenas.
//!
//! SSA sharing is compared by correlated identity: instructions are paired
//! positionally when their CFGs are compared, and every operand reference to
//! an instruction must agree with that pairing. Two trees where a value is
//! shared in one but duplicated in the other therefore compare unequal, even
//! if a naive deep walk would match.

use std::collections::HashMap;

use crate::til::annot::AnnotData;
use crate::til::arena::Arena;
use crate::til::expr::{ExprId, ExprKind};

/// Compares two trees for structural equality, preserving SSA identity.
pub fn structural_eq(lhs: &Arena, lroot: ExprId, rhs: &Arena, rroot: ExprId) -> bool {
    let mut cmp = Cmp {
        lhs,
        rhs,
        instr_pairs: HashMap::new(),
        scope_pairs: HashMap::new(),
    };
    cmp.node(lroot, rroot)
}

struct Cmp<'a> {
    lhs: &'a Arena,
    rhs: &'a Arena,
    /// Pairing of committed instructions, built per CFG in block order.
    instr_pairs: HashMap<ExprId, ExprId>,
    /// Pairing of variable declarations, built at binder sites.
    scope_pairs: HashMap<ExprId, ExprId>,
}

impl<'a> Cmp<'a> {
    /// Compares an operand position: instruction references must agree with
    /// the established pairing, everything else compares structurally.
    fn operand(&mut self, l: ExprId, r: ExprId) -> bool {
        let l_instr = self.lhs.expr(l).instr_id().is_some();
        let r_instr = self.rhs.expr(r).instr_id().is_some();
        if l_instr || r_instr {
            return l_instr && r_instr && self.instr_pairs.get(&l) == Some(&r);
        }
        self.node(l, r)
    }

    fn operand_opt(&mut self, l: Option<ExprId>, r: Option<ExprId>) -> bool {
        match (l, r) {
            (None, None) => true,
            (Some(l), Some(r)) => self.operand(l, r),
            _ => false,
        }
    }

    fn operands(&mut self, l: &[ExprId], r: &[ExprId]) -> bool {
        l.len() == r.len() && l.iter().zip(r).all(|(&a, &b)| self.operand(a, b))
    }

    /// Compares two nodes structurally, ignoring the instruction-ness of the
    /// roots themselves (used at defining sites and for inline children).
    fn node(&mut self, l: ExprId, r: ExprId) -> bool {
        if !self.annots(l, r) {
            return false;
        }
        let (lk, rk) = (&self.lhs.expr(l).kind, &self.rhs.expr(r).kind);
        match (lk, rk) {
            (
                ExprKind::VarDecl {
                    var_kind: lv,
                    name: ln,
                    definition: ld,
                },
                ExprKind::VarDecl {
                    var_kind: rv,
                    name: rn,
                    definition: rd,
                },
            ) => lv == rv && ln == rn && self.operand_opt(*ld, *rd),
            (
                ExprKind::Function {
                    vardecl: lv,
                    body: lb,
                },
                ExprKind::Function {
                    vardecl: rv,
                    body: rb,
                },
            ) => {
                self.scope_pairs.insert(*lv, *rv);
                self.node(*lv, *rv) && self.operand(*lb, *rb)
            }
            (
                ExprKind::Code {
                    call_conv: lc,
                    return_type: lt,
                    body: lb,
                },
                ExprKind::Code {
                    call_conv: rc,
                    return_type: rt,
                    body: rb,
                },
            ) => lc == rc && self.operand(*lt, *rt) && self.operand_opt(*lb, *rb),
            (
                ExprKind::Field {
                    range: lr,
                    body: lb,
                },
                ExprKind::Field {
                    range: rr,
                    body: rb,
                },
            ) => self.operand(*lr, *rr) && self.operand(*lb, *rb),
            (
                ExprKind::Slot {
                    name: ln,
                    definition: ld,
                },
                ExprKind::Slot {
                    name: rn,
                    definition: rd,
                },
            ) => ln == rn && self.operand(*ld, *rd),
            (ExprKind::Record { slots: ls }, ExprKind::Record { slots: rs }) => {
                let (ls, rs) = (ls.clone(), rs.clone());
                self.operands(&ls, &rs)
            }
            (ExprKind::Array { elems: le }, ExprKind::Array { elems: re }) => {
                let (le, re) = (le.clone(), re.clone());
                self.operands(&le, &re)
            }
            (ExprKind::ScalarType { base: lb }, ExprKind::ScalarType { base: rb }) => lb == rb,
            (ExprKind::Cfg { blocks: lb }, ExprKind::Cfg { blocks: rb }) => {
                let (lb, rb) = (lb.clone(), rb.clone());
                self.cfg(&lb, &rb)
            }
            (ExprKind::Literal { value: lv }, ExprKind::Literal { value: rv }) => lv == rv,
            (ExprKind::Variable { decl: ld }, ExprKind::Variable { decl: rd }) => {
                self.scope_pairs.get(ld) == Some(rd)
            }
            (
                ExprKind::Apply {
                    apply_kind: lk,
                    fun: lf,
                    arg: la,
                },
                ExprKind::Apply {
                    apply_kind: rk,
                    fun: rf,
                    arg: ra,
                },
            ) => lk == rk && self.operand(*lf, *rf) && self.operand_opt(*la, *ra),
            (
                ExprKind::Project {
                    record: lr,
                    field: lf,
                },
                ExprKind::Project {
                    record: rr,
                    field: rf,
                },
            ) => lf == rf && self.operand(*lr, *rr),
            (ExprKind::Call { target: lt }, ExprKind::Call { target: rt }) => {
                self.operand(*lt, *rt)
            }
            (
                ExprKind::Alloc {
                    alloc_kind: lk,
                    data: ld,
                },
                ExprKind::Alloc {
                    alloc_kind: rk,
                    data: rd,
                },
            ) => lk == rk && self.operand(*ld, *rd),
            (ExprKind::Load { pointer: lp }, ExprKind::Load { pointer: rp }) => {
                self.operand(*lp, *rp)
            }
            (
                ExprKind::Store {
                    dest: ld,
                    source: ls,
                },
                ExprKind::Store {
                    dest: rd,
                    source: rs,
                },
            ) => self.operand(*ld, *rd) && self.operand(*ls, *rs),
            (
                ExprKind::ArrayIndex {
                    array: la,
                    index: li,
                },
                ExprKind::ArrayIndex {
                    array: ra,
                    index: ri,
                },
            ) => self.operand(*la, *ra) && self.operand(*li, *ri),
            (
                ExprKind::ArrayAdd {
                    array: la,
                    index: li,
                },
                ExprKind::ArrayAdd {
                    array: ra,
                    index: ri,
                },
            ) => self.operand(*la, *ra) && self.operand(*li, *ri),
            (
                ExprKind::UnaryOp {
                    op: lo,
                    operand: le,
                },
                ExprKind::UnaryOp {
                    op: ro,
                    operand: re,
                },
            ) => lo == ro && self.operand(*le, *re),
            (
                ExprKind::BinaryOp {
                    op: lo,
                    lhs: ll,
                    rhs: lr,
                },
                ExprKind::BinaryOp {
                    op: ro,
                    lhs: rl,
                    rhs: rr,
                },
            ) => lo == ro && self.operand(*ll, *rl) && self.operand(*lr, *rr),
            (
                ExprKind::Cast {
                    op: lo,
                    operand: le,
                },
                ExprKind::Cast {
                    op: ro,
                    operand: re,
                },
            ) => lo == ro && self.operand(*le, *re),
            (ExprKind::Phi { args: la }, ExprKind::Phi { args: ra }) => {
                let (la, ra) = (la.clone(), ra.clone());
                self.operands(&la, &ra)
            }
            (
                ExprKind::Goto {
                    target: lt,
                    args: la,
                },
                ExprKind::Goto {
                    target: rt,
                    args: ra,
                },
            ) => {
                let same_target = self.lhs.block(*lt).index == self.rhs.block(*rt).index;
                let (la, ra) = (la.clone(), ra.clone());
                same_target && self.operands(&la, &ra)
            }
            (
                ExprKind::Branch {
                    condition: lc,
                    then_block: ltb,
                    else_block: leb,
                },
                ExprKind::Branch {
                    condition: rc,
                    then_block: rtb,
                    else_block: reb,
                },
            ) => {
                self.lhs.block(*ltb).index == self.rhs.block(*rtb).index
                    && self.lhs.block(*leb).index == self.rhs.block(*reb).index
                    && self.operand(*lc, *rc)
            }
            (
                ExprKind::Switch {
                    condition: lc,
                    labels: ll,
                    targets: lt,
                },
                ExprKind::Switch {
                    condition: rc,
                    labels: rl,
                    targets: rt,
                },
            ) => {
                if lt.len() != rt.len() {
                    return false;
                }
                let targets_match = lt
                    .iter()
                    .zip(rt)
                    .all(|(&a, &b)| self.lhs.block(a).index == self.rhs.block(b).index);
                let (ll, rl, lc, rc) = (ll.clone(), rl.clone(), *lc, *rc);
                targets_match && self.operand(lc, rc) && self.operands(&ll, &rl)
            }
            (ExprKind::Return { value: lv }, ExprKind::Return { value: rv }) => {
                self.operand(*lv, *rv)
            }
            (ExprKind::Undefined, ExprKind::Undefined) => true,
            (ExprKind::Wildcard, ExprKind::Wildcard) => true,
            (ExprKind::Identifier { name: ln }, ExprKind::Identifier { name: rn }) => ln == rn,
            (
                ExprKind::Let {
                    vardecl: lv,
                    body: lb,
                },
                ExprKind::Let {
                    vardecl: rv,
                    body: rb,
                },
            ) => {
                self.scope_pairs.insert(*lv, *rv);
                self.node(*lv, *rv) && self.operand(*lb, *rb)
            }
            (
                ExprKind::IfThenElse {
                    condition: lc,
                    then_expr: lt,
                    else_expr: le,
                },
                ExprKind::IfThenElse {
                    condition: rc,
                    then_expr: rt,
                    else_expr: re,
                },
            ) => self.operand(*lc, *rc) && self.operand(*lt, *rt) && self.operand(*le, *re),
            _ => false,
        }
    }

    /// Compares two CFGs: pairs every phi and instruction positionally
    /// first, so that operand references resolve, then compares the paired
    /// nodes structurally.
    fn cfg(&mut self, lblocks: &[crate::til::block::BlockId], rblocks: &[crate::til::block::BlockId]) -> bool {
        if lblocks.len() != rblocks.len() {
            return false;
        }
        for (&lb, &rb) in lblocks.iter().zip(rblocks) {
            let (lblk, rblk) = (self.lhs.block(lb), self.rhs.block(rb));
            if lblk.index != rblk.index
                || lblk.declared_args != rblk.declared_args
                || lblk.phis.len() != rblk.phis.len()
                || lblk.instrs.len() != rblk.instrs.len()
                || lblk.preds.len() != rblk.preds.len()
            {
                return false;
            }
            let preds_match = lblk
                .preds
                .iter()
                .zip(&rblk.preds)
                .all(|(&a, &b)| self.lhs.block(a).index == self.rhs.block(b).index);
            if !preds_match {
                return false;
            }
            for (&li, &ri) in lblk.phis.iter().zip(&rblk.phis) {
                self.instr_pairs.insert(li, ri);
            }
            for (&li, &ri) in lblk.instrs.iter().zip(&rblk.instrs) {
                self.instr_pairs.insert(li, ri);
            }
        }
        for (&lb, &rb) in lblocks.iter().zip(rblocks) {
            let lphis = self.lhs.block(lb).phis.clone();
            let rphis = self.rhs.block(rb).phis.clone();
            for (li, ri) in lphis.into_iter().zip(rphis) {
                if !self.node(li, ri) {
                    return false;
                }
            }
            let linstrs = self.lhs.block(lb).instrs.clone();
            let rinstrs = self.rhs.block(rb).instrs.clone();
            for (li, ri) in linstrs.into_iter().zip(rinstrs) {
                if !self.node(li, ri) {
                    return false;
                }
            }
        }
        true
    }

    fn annots(&mut self, l: ExprId, r: ExprId) -> bool {
        let lchain: Vec<_> = self.lhs.annot_chain(l).collect();
        let rchain: Vec<_> = self.rhs.annot_chain(r).collect();
        if lchain.len() != rchain.len() {
            return false;
        }
        for (la, ra) in lchain.into_iter().zip(rchain) {
            let ld = self.lhs.annot(la).data.clone();
            let rd = self.rhs.annot(ra).data.clone();
            let same = match (&ld, &rd) {
                (AnnotData::InstrName { name: ln }, AnnotData::InstrName { name: rn }) => ln == rn,
                (
                    AnnotData::SourceLoc { position: lp },
                    AnnotData::SourceLoc { position: rp },
                ) => lp == rp,
                (
                    AnnotData::Precondition { condition: lc },
                    AnnotData::Precondition { condition: rc },
                ) => self.operand(*lc, *rc),
                (AnnotData::TestTriplet { exprs: le }, AnnotData::TestTriplet { exprs: re }) => {
                    le.iter().zip(re).all(|(&a, &b)| self.operand(a, b))
                }
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}
