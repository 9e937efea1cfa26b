//! Basic blocks and structured-control-flow bookkeeping (§3 "Block").
use crate::id::{BlockId, ExprId, VariableId};

/// §3 "terminator ∈ {Direct, Select, MultiSelect, Return, Kill, Unreachable,
/// EmitMeshTasks, IgnoreIntersection, TerminateRay}".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// Unconditional `OpBranch`.
    Direct { target: BlockId },
    /// `OpBranchConditional`.
    Select {
        cond: ExprId,
        true_block: BlockId,
        false_block: BlockId,
    },
    /// `OpSwitch`.
    MultiSelect {
        selector: ExprId,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    Return(Option<ExprId>),
    Kill,
    Unreachable,
    EmitMeshTasks,
    IgnoreIntersection,
    TerminateRay,
}

/// §3 "merge kind ∈ {None, Selection, Loop}".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    None,
    Selection,
    Loop,
}

/// Recognized SPIR-V loop idioms (§4.7 "attempt-emit-loop-header").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopIdiom {
    MergeToSelectForLoop,
    MergeToSelectContinueForLoop,
    MergeToDirectForLoop,
    DoWhileLoop,
    ComplexLoop,
}

/// One incoming edge of an `OpPhi`.
#[derive(Debug, Clone, Copy)]
pub struct PhiEdge {
    pub value: ExprId,
    pub predecessor: BlockId,
}

/// A merged-variable temporary and its incoming edges (§3 "phi list",
/// §4.7 "Phi variables are flushed on branches").
#[derive(Debug, Clone)]
pub struct Phi {
    pub result: VariableId,
    pub edges: Vec<PhiEdge>,
}

/// §3 "Block": a list of instructions plus control-flow metadata.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// Opaque per-instruction expression references, in program order.
    pub instrs: Vec<ExprId>,
    pub terminator: Terminator,
    pub merge_kind: MergeKind,
    pub merge_block: Option<BlockId>,
    pub continue_block: Option<BlockId>,
    pub loop_idiom: Option<LoopIdiom>,
    pub phis: Vec<Phi>,
    /// Variables whose definitions are dominated by this block (§3
    /// "dominated variables"), used to decide hoisted declaration points.
    pub dominated_vars: Vec<VariableId>,
}

impl Block {
    pub fn new(id: BlockId, terminator: Terminator) -> Self {
        Self {
            id,
            instrs: Vec::new(),
            terminator,
            merge_kind: MergeKind::None,
            merge_block: None,
            continue_block: None,
            loop_idiom: None,
            phis: Vec::new(),
            dominated_vars: Vec::new(),
        }
    }

    pub fn is_loop_header(&self) -> bool {
        self.merge_kind == MergeKind::Loop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_block_has_no_merge_and_is_not_a_loop_header() {
        let block = Block::new(BlockId(0), Terminator::Return(None));
        assert_eq!(block.merge_kind, MergeKind::None);
        assert!(!block.is_loop_header());
        assert!(block.merge_block.is_none());
    }

    #[test]
    fn loop_merge_kind_marks_a_loop_header() {
        let mut block = Block::new(BlockId(0), Terminator::Direct { target: BlockId(1) });
        block.merge_kind = MergeKind::Loop;
        assert!(block.is_loop_header());
    }
}
