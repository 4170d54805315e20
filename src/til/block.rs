use crate::til::expr::ExprId;

/// An opaque handle to a basic block inside an [`Arena`].
///
/// [`Arena`]: crate::til::arena::Arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A basic block in SSA form.
///
/// Invariants enforced by `Builder::end_cfg()`:
/// 1. `phis` holds exactly `declared_args` entries, each a `Phi` expression.
/// 2. `instrs` is non-empty and its last element is the only terminator.
/// 3. `preds` lists incoming edges in installation order; each phi's operand
///    list is parallel to it.
#[derive(Debug, Clone)]
pub struct Block {
    /// Dense position of this block within its control-flow graph.
    pub index: u32,
    /// Number of formal arguments declared for this block.
    pub declared_args: u32,
    /// Formal arguments; each is a `Phi` expression.
    pub phis: Vec<ExprId>,
    /// Instructions in program order. Terminator is last.
    pub instrs: Vec<ExprId>,
    /// Incoming edges in installation order.
    pub preds: Vec<BlockId>,
}

impl Block {
    pub(crate) fn new(index: u32, declared_args: u32) -> Block {
        Block {
            index,
            declared_args,
            phis: Vec::new(),
            instrs: Vec::new(),
            preds: Vec::new(),
        }
    }

    /// The last instruction, which is the terminator once the block is sealed.
    pub fn last_instr(&self) -> Option<ExprId> {
        self.instrs.last().copied()
    }
}
