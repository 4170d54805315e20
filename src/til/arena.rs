use crate::til::annot::{Annot, AnnotData, AnnotId};
use crate::til::block::{Block, BlockId};
use crate::til::expr::{Expr, ExprId, ExprKind};

/// Owns every node of one or more expression trees.
///
/// All handles (`ExprId`, `BlockId`, `AnnotId`) index into the arena that
/// minted them; nothing is freed individually. Decoded trees live exactly
/// as long as the arena, which must outlive any decoder borrowing it.
#[derive(Debug, Default)]
pub struct Arena {
    pub(crate) exprs: Vec<Expr>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) annots: Vec<Annot>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    /// Number of expression nodes allocated so far.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub(crate) fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn annot(&self, id: AnnotId) -> &Annot {
        &self.annots[id.0 as usize]
    }

    pub(crate) fn alloc_expr(&mut self, kind: ExprKind) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr::new(kind));
        id
    }

    pub(crate) fn alloc_block(&mut self, index: u32, declared_args: u32) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(index, declared_args));
        id
    }

    /// Appends an annotation to the end of `expr`'s chain, preserving
    /// attachment order.
    pub fn attach_annot(&mut self, expr: ExprId, data: AnnotData) -> AnnotId {
        let id = AnnotId(self.annots.len() as u32);
        self.annots.push(Annot::new(data));
        let head = self.expr(expr).annots;
        match head {
            None => self.expr_mut(expr).annots = Some(id),
            Some(head) => {
                let mut tail = head;
                while let Some(next) = self.annot(tail).next {
                    tail = next;
                }
                self.annots[tail.0 as usize].next = Some(id);
            }
        }
        id
    }

    /// Iterates an expression's annotation chain in attachment order.
    pub fn annot_chain(&self, expr: ExprId) -> AnnotChain<'_> {
        AnnotChain {
            arena: self,
            cursor: self.expr(expr).annots,
        }
    }
}

/// Iterator over an annotation chain.
pub struct AnnotChain<'a> {
    arena: &'a Arena,
    cursor: Option<AnnotId>,
}

impl<'a> Iterator for AnnotChain<'a> {
    type Item = AnnotId;

    fn next(&mut self) -> Option<AnnotId> {
        let id = self.cursor?;
        self.cursor = self.arena.annot(id).next;
        Some(id)
    }
}
