//! Functions, execution modes, and entry-prologue/epilogue fixup hooks
//! (§3 "Function", §4.3, §4.4 "Fixup hooks").
use fnv::FnvHashMap;
use spirv::ExecutionModel;

use crate::block::Block;
use crate::error::{Error, Result};
use crate::id::{BlockId, FunctionId, VariableId};

/// A subset of `OpExecutionMode` relevant to MSL lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    OutputVertices(u32),
    Triangles,
    Quads,
    Isolines,
    SpacingEqual,
    SpacingFractionalEven,
    SpacingFractionalOdd,
    VertexOrderCw,
    VertexOrderCcw,
    PointMode,
    LocalSize(u32, u32, u32),
    OriginUpperLeft,
    DepthReplacing,
    EarlyFragmentTests,
}

/// Which mask-computation formula a subgroup-mask fixup hook should apply
/// (§4.4 "SubgroupEqMask/GeMask/GtMask/LeMask/LtMask ← bitwise formulas").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubgroupMaskKind {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
}

/// A closure-free, data-driven description of an entry-prologue/epilogue
/// fixup (§3 "fixup-in/out hook lists (closures executed when emitting
/// entry prologue/epilogue)"; §9 Design Note: "avoid virtual dispatch
/// chains; use explicit dispatch and composition", so rather than storing
/// `Box<dyn Fn>` here (which would force this crate to depend on the
/// emitter's context type), each hook is one of a closed set of known
/// shapes that the emitter (C4/C8) interprets directly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixupHook {
    /// `SamplePosition ← get_sample_position(gl_SampleID)`.
    SamplePosition { sample_id: VariableId, target: VariableId },
    /// One of the five subgroup mask builtins.
    SubgroupMask {
        kind: SubgroupMaskKind,
        invocation_id: VariableId,
        subgroup_size: VariableId,
        target: VariableId,
    },
    /// Multiview instance-index fixup: divide/modulo on the instance index.
    MultiviewInstanceFixup {
        instance_index: VariableId,
        view_count: u32,
        target_instance: VariableId,
        target_view: VariableId,
    },
    /// Vertex-index zero-basing: subtract `BaseVertex`.
    VertexIndexZeroBase { vertex_index: VariableId, base_vertex: VariableId },
    /// Dispatch-base offset added to a builtin workgroup/global id.
    DispatchBaseOffset { builtin: VariableId, base: VariableId },
    /// Capture-to-buffer epilogue write (§4.3): `buffer_slot` 0 is the
    /// outer tess-factor array, 1 the inner one.
    CaptureOutputWrite { source: VariableId, buffer_slot: u32 },
    /// Per-control-point output write through a device-buffer pointer
    /// (§4.3 "Capture to buffer contract"): `spvOut[gl_InvocationID].{member_name}
    /// = {source}`.
    ControlPointOutputWrite { source: VariableId, member_name: String },
    /// Per-variable component-restore swizzle for a packed stage-IO member
    /// (§4.2 "Component packing": several SPIR-V variables sharing one
    /// `m_location_N` struct member each get a local alias swizzled back
    /// out at prologue/epilogue time). `component_offset`/`vecsize` index
    /// into the packed member the way its `ComponentSlice` recorded them.
    ComponentPackingRestore {
        source: VariableId,
        member_name: String,
        component_offset: u32,
        vecsize: u32,
    },
}

/// §3 "Function": entry block, parameters, local variables, fixup-hook
/// lists.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<String>,
    pub entry_block: BlockId,
    pub blocks: FnvHashMap<BlockId, Block>,
    pub params: Vec<VariableId>,
    pub locals: Vec<VariableId>,
    pub fixup_in: Vec<FixupHook>,
    pub fixup_out: Vec<FixupHook>,
    pub execution_model: Option<ExecutionModel>,
    pub execution_modes: Vec<ExecutionMode>,
}

impl Function {
    pub fn new(entry_block: BlockId) -> Self {
        Self {
            name: None,
            entry_block,
            blocks: FnvHashMap::default(),
            params: Vec::new(),
            locals: Vec::new(),
            fixup_in: Vec::new(),
            fixup_out: Vec::new(),
            execution_model: None,
            execution_modes: Vec::new(),
        }
    }

    pub fn insert_block(&mut self, block: Block) {
        self.blocks.insert(block.id, block);
    }

    pub fn block(&self, id: BlockId) -> Result<&Block> {
        self.blocks.get(&id).ok_or(Error::missing("block", id.0))
    }

    pub fn has_execution_mode(&self, pred: impl Fn(&ExecutionMode) -> bool) -> bool {
        self.execution_modes.iter().any(pred)
    }

    /// Walks the block graph in declaration order starting at the entry
    /// block, following `Direct`/`Select`/`MultiSelect` targets once each
    /// (used for the dead/reachable-block sweep before emission).
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        use crate::block::Terminator::*;
        let mut seen = fnv::FnvHashSet::default();
        let mut stack = vec![self.entry_block];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(block) = self.blocks.get(&id) {
                match &block.terminator {
                    Direct { target } => stack.push(*target),
                    Select {
                        true_block,
                        false_block,
                        ..
                    } => {
                        stack.push(*true_block);
                        stack.push(*false_block);
                    }
                    MultiSelect { default, cases, .. } => {
                        stack.push(*default);
                        for (_, target) in cases {
                            stack.push(*target);
                        }
                    }
                    Return(_) | Kill | Unreachable | EmitMeshTasks | IgnoreIntersection | TerminateRay => {}
                }
                if let Some(merge) = block.merge_block {
                    stack.push(merge);
                }
                if let Some(cont) = block.continue_block {
                    stack.push(cont);
                }
            }
        }
        order
    }
}

/// §4.1 registry over `Function`s.
#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    funcs: FnvHashMap<FunctionId, Function>,
    bound: u32,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(&mut self, id: FunctionId, func: Function) -> Result<()> {
        self.bound = self.bound.max(id.0 + 1);
        if self.funcs.contains_key(&id) {
            return Err(Error::corrupted(format!("function {} registered twice", id)));
        }
        self.funcs.insert(id, func);
        Ok(())
    }
    pub fn get(&self, id: FunctionId) -> Result<&Function> {
        self.funcs.get(&id).ok_or(Error::missing("function", id.0))
    }
    pub fn get_mut(&mut self, id: FunctionId) -> Result<&mut Function> {
        self.funcs.get_mut(&id).ok_or(Error::missing("function", id.0))
    }
    pub fn bound(&self) -> u32 {
        self.bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Terminator;

    #[test]
    fn reachable_blocks_follows_branches_once_each() {
        let mut f = Function::new(BlockId(0));
        f.insert_block(Block::new(BlockId(0), Terminator::Select {
            cond: crate::id::ExprId(0),
            true_block: BlockId(1),
            false_block: BlockId(2),
        }));
        f.insert_block(Block::new(BlockId(1), Terminator::Direct { target: BlockId(3) }));
        f.insert_block(Block::new(BlockId(2), Terminator::Direct { target: BlockId(3) }));
        f.insert_block(Block::new(BlockId(3), Terminator::Return(None)));

        let order = f.reachable_blocks();
        assert_eq!(order.len(), 4);
        assert!(order.contains(&BlockId(3)));
    }

    #[test]
    fn has_execution_mode_matches_predicate() {
        let mut f = Function::new(BlockId(0));
        f.execution_modes.push(ExecutionMode::OutputVertices(3));
        assert!(f.has_execution_mode(|m| matches!(m, ExecutionMode::OutputVertices(3))));
        assert!(!f.has_execution_mode(|m| matches!(m, ExecutionMode::Quads)));
    }

    #[test]
    fn registry_rejects_double_registration() {
        let mut reg = FunctionRegistry::new();
        reg.set(FunctionId(0), Function::new(BlockId(0))).unwrap();
        assert_eq!(reg.bound(), 1);
        assert!(reg.set(FunctionId(0), Function::new(BlockId(0))).is_err());
        assert!(reg.get(FunctionId(1)).is_err());
    }
}
