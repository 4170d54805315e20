//! Annotations: a forward-linked chain of tagged payloads on an expression.
//!
//! Each kind declares how many sub-expression slots it owns. Sub-expressions
//! travel through the codec like ordinary operands; the `rewrite` hook lets
//! a generic tree copier swap them out afterwards.

use crate::til::expr::ExprId;

/// An opaque handle to an annotation inside an [`Arena`].
///
/// [`Arena`]: crate::til::arena::Arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnnotId(pub u32);

/// The closed set of annotation kinds. Wire values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotKind {
    InstrName,
    SourceLoc,
    Precondition,
    TestTriplet,
}

impl AnnotKind {
    pub fn wire_value(self) -> u32 {
        match self {
            AnnotKind::InstrName => 0,
            AnnotKind::SourceLoc => 1,
            AnnotKind::Precondition => 2,
            AnnotKind::TestTriplet => 3,
        }
    }

    pub fn from_wire(value: u32) -> Option<AnnotKind> {
        Some(match value {
            0 => AnnotKind::InstrName,
            1 => AnnotKind::SourceLoc,
            2 => AnnotKind::Precondition,
            3 => AnnotKind::TestTriplet,
            _ => return None,
        })
    }
}

/// Per-kind annotation payload.
///
/// `TestTriplet` holds three sub-expression slots; it exists to exercise the
/// multi-slot schema and is used by the codec tests.
#[derive(Debug, Clone)]
pub enum AnnotData {
    /// A display name for an instruction.
    InstrName { name: String },
    /// A source position, as an opaque 64-bit offset.
    SourceLoc { position: u64 },
    /// A condition that must hold before the annotated node executes.
    Precondition { condition: ExprId },
    TestTriplet { exprs: [ExprId; 3] },
}

impl AnnotData {
    pub fn kind(&self) -> AnnotKind {
        match self {
            AnnotData::InstrName { .. } => AnnotKind::InstrName,
            AnnotData::SourceLoc { .. } => AnnotKind::SourceLoc,
            AnnotData::Precondition { .. } => AnnotKind::Precondition,
            AnnotData::TestTriplet { .. } => AnnotKind::TestTriplet,
        }
    }

    /// Sub-expression slots in serialization order.
    pub fn sub_exprs(&self) -> Vec<ExprId> {
        match self {
            AnnotData::InstrName { .. } | AnnotData::SourceLoc { .. } => Vec::new(),
            AnnotData::Precondition { condition } => vec![*condition],
            AnnotData::TestTriplet { exprs } => exprs.to_vec(),
        }
    }

    /// Replaces the sub-expression slots from `subs`, which must hold exactly
    /// as many operands as this kind declares.
    pub fn rewrite(&mut self, subs: &[ExprId]) {
        match self {
            AnnotData::InstrName { .. } | AnnotData::SourceLoc { .. } => {
                assert!(subs.is_empty(), "annotation kind has no sub-expression slots");
            }
            AnnotData::Precondition { condition } => {
                assert_eq!(subs.len(), 1, "precondition holds one sub-expression");
                *condition = subs[0];
            }
            AnnotData::TestTriplet { exprs } => {
                assert_eq!(subs.len(), 3, "triplet holds three sub-expressions");
                exprs.copy_from_slice(subs);
            }
        }
    }
}

/// One link of an annotation chain.
#[derive(Debug, Clone)]
pub struct Annot {
    pub data: AnnotData,
    pub(crate) next: Option<AnnotId>,
}

impl Annot {
    pub(crate) fn new(data: AnnotData) -> Annot {
        Annot { data, next: None }
    }

    pub fn next(&self) -> Option<AnnotId> {
        self.next
    }
}
