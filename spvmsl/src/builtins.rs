//! C4: Implicit Builtin Synthesizer (§4.4).
use fnv::FnvHashSet;
use spirv::{BuiltIn, StorageClass};

use spvmsl_core::error::{Error, Result};
use spvmsl_core::func::{FixupHook, SubgroupMaskKind};
use spvmsl_core::id::VariableId;
use spvmsl_core::module::Module;
use spvmsl_core::ty::{ArrayLength, ScalarType, Type};
use spvmsl_core::var::Variable;

use crate::options::CompilerOptions;

/// Why a builtin must be synthesized (§4.4 first paragraph enumerates the
/// trigger conditions this maps back to).
///
/// `MultiPatchStageInputSize` is the one trigger with no native builtin of
/// its own: it threads a side value (`spvStageInputSize`) rather than a
/// `DecorationBuiltIn` variable, so it is tracked in
/// [`crate::tessellation::needs_multi_patch_stage_input_size`] instead of a
/// `synthesize()` call here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SynthesisReason {
    SubpassInput,
    SampleRateShading,
    SubgroupMask,
    Multiview,
    DispatchBase,
    HelperInvocation,
    TessFactors,
    TescInvocationId,
    MultiPatchStageInputSize,
    VertexForTessBaseIndices,
}

/// The seven variables a subgroup-mask read pulls in together (§4.4
/// "subgroup mask builtins"): the two operands plus the five masks, each
/// wired to its [`FixupHook::SubgroupMask`] formula by the caller.
#[derive(Debug, Clone, Copy)]
pub struct SubgroupMaskVars {
    pub invocation_id: VariableId,
    pub subgroup_size: VariableId,
    pub eq: VariableId,
    pub ge: VariableId,
    pub gt: VariableId,
    pub le: VariableId,
    pub lt: VariableId,
}

impl SubgroupMaskVars {
    /// Builds the five `FixupHook::SubgroupMask` entries this set of
    /// variables implies (§4.4 "SubgroupEqMask/GeMask/GtMask/LeMask/LtMask
    /// ← bitwise formulas over SubgroupInvocationID and SubgroupSize").
    pub fn fixup_hooks(&self) -> Vec<FixupHook> {
        use SubgroupMaskKind::*;
        [(Eq, self.eq), (Ge, self.ge), (Gt, self.gt), (Le, self.le), (Lt, self.lt)]
            .into_iter()
            .map(|(kind, target)| FixupHook::SubgroupMask {
                kind,
                invocation_id: self.invocation_id,
                subgroup_size: self.subgroup_size,
                target,
            })
            .collect()
    }
}

fn native_type_for(builtin: BuiltIn) -> Type {
    use BuiltIn::*;
    match builtin {
        FragCoord | Position => Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 4,
        },
        GlobalInvocationId | LocalInvocationId | WorkgroupId | WorkgroupSize => Type::Vector {
            elem: ScalarType::Integer { bits: 32, is_signed: false },
            size: 3,
        },
        SampleId
        | InvocationId
        | PrimitiveId
        | LocalInvocationIndex
        | BaseVertex
        | BaseInstance
        | VertexIndex
        | InstanceIndex
        | SubgroupLocalInvocationId
        | SubgroupSize
        | Layer
        | ViewIndex => Type::Scalar(ScalarType::Integer { bits: 32, is_signed: false }),
        HelperInvocation => Type::Scalar(ScalarType::Boolean),
        SubgroupEqMask | SubgroupGeMask | SubgroupGtMask | SubgroupLeMask | SubgroupLtMask => Type::Vector {
            elem: ScalarType::Integer { bits: 32, is_signed: false },
            size: 4,
        },
        SamplePosition => Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 2,
        },
        TessLevelOuter => Type::Array {
            elem: Box::new(Type::Scalar(ScalarType::Float { bits: 32 })),
            len: ArrayLength::Literal(4),
            stride: None,
        },
        TessLevelInner => Type::Array {
            elem: Box::new(Type::Scalar(ScalarType::Float { bits: 32 })),
            len: ArrayLength::Literal(2),
            stride: None,
        },
        _ => Type::Scalar(ScalarType::Integer { bits: 32, is_signed: false }),
    }
}

/// §4.4: detects, then synthesizes, the implicit builtins an entry point
/// needs but doesn't declare itself.
pub struct BuiltinSynthesizer<'m> {
    module: &'m mut Module,
    /// §4.4 last paragraph: "a per-entry-point 'already marked' map
    /// prevents duplicates", keyed by builtin kind, since an entry point
    /// may need the same implicit builtin from two different triggers.
    already_marked: FnvHashSet<BuiltIn>,
}

impl<'m> BuiltinSynthesizer<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        let mut already_marked = FnvHashSet::default();
        if let Some(entry) = module.entry_point.clone() {
            for &var_id in &entry.interface {
                if let Ok(var) = module.vars.get(var_id) {
                    if let Some(b) = var.decoration.builtin {
                        already_marked.insert(b);
                    }
                }
            }
        }
        Self {
            module,
            already_marked,
        }
    }

    /// §4.4 steps 1-5: allocate IDs, create the pointer type and variable,
    /// attach `DecorationBuiltIn`, and append to the entry point's
    /// interface list exactly once.
    pub fn synthesize(
        &mut self,
        builtin: BuiltIn,
        store_cls: StorageClass,
        _reason: SynthesisReason,
    ) -> Result<VariableId> {
        if self.already_marked.contains(&builtin) {
            return Err(Error::corrupted(format!(
                "builtin {:?} was synthesized twice for the same entry point",
                builtin
            )));
        }
        let native_ty = native_type_for(builtin);
        let ptr_ty = self.module.alloc_type_id();
        self.module.set_type(
            ptr_ty,
            Type::Pointer {
                pointee: Box::new(native_ty),
                store_cls: store_cls.into(),
            },
        )?;
        let var_id = self.module.alloc_var_id();
        let mut var = Variable::new(ptr_ty, store_cls);
        var.decoration.builtin = Some(builtin);
        var.is_implicit = true;
        self.module.set_var(var_id, var)?;
        self.module.add_interface_variable_once(var_id)?;
        self.already_marked.insert(builtin);
        log::trace!("synthesized implicit builtin {:?} as {}", builtin, var_id);
        Ok(var_id)
    }

    pub fn is_already_present(&self, builtin: BuiltIn) -> bool {
        self.already_marked.contains(&builtin)
    }

    /// Finds the interface variable already carrying `DecorationBuiltIn
    /// builtin`, if any. Unlike `already_marked`, which only records which
    /// kinds are taken, this resolves back to the variable a fixup hook
    /// needs to reference.
    pub fn find_builtin_var_id(&self, builtin: BuiltIn) -> Option<VariableId> {
        let entry = self.module.entry_point.as_ref()?;
        entry.interface.iter().copied().find(|&id| {
            self.module
                .vars
                .get(id)
                .ok()
                .and_then(|v| v.decoration.builtin)
                .map_or(false, |b| b == builtin)
        })
    }

    /// Returns the existing variable for `builtin`, synthesizing one if the
    /// entry point doesn't declare it (§4.4 "for each missing builtin that
    /// is transitively required").
    fn resolve_builtin(&mut self, builtin: BuiltIn, store_cls: StorageClass, reason: SynthesisReason) -> Result<VariableId> {
        match self.find_builtin_var_id(builtin) {
            Some(id) => Ok(id),
            None => self.synthesize(builtin, store_cls, reason),
        }
    }

    /// Synthesizes `gl_FragCoord` when a subpass-input read is found and it
    /// isn't already declared (§4.4 "subpass inputs (need gl_FragCoord...)").
    pub fn ensure_frag_coord_for_subpass_input(&mut self) -> Result<Option<VariableId>> {
        if self.is_already_present(BuiltIn::FragCoord) {
            return Ok(None);
        }
        self.synthesize(BuiltIn::FragCoord, StorageClass::Input, SynthesisReason::SubpassInput)
            .map(Some)
    }

    /// Synthesizes the five subgroup mask builtins plus their two operand
    /// builtins when any of them is read (§4.4 "subgroup mask builtins"),
    /// returning them named so the caller can build the matching fixup
    /// hooks via [`SubgroupMaskVars::fixup_hooks`].
    pub fn ensure_subgroup_masks(&mut self) -> Result<SubgroupMaskVars> {
        let reason = SynthesisReason::SubgroupMask;
        Ok(SubgroupMaskVars {
            invocation_id: self.resolve_builtin(BuiltIn::SubgroupLocalInvocationId, StorageClass::Input, reason)?,
            subgroup_size: self.resolve_builtin(BuiltIn::SubgroupSize, StorageClass::Input, reason)?,
            eq: self.resolve_builtin(BuiltIn::SubgroupEqMask, StorageClass::Input, reason)?,
            ge: self.resolve_builtin(BuiltIn::SubgroupGeMask, StorageClass::Input, reason)?,
            gt: self.resolve_builtin(BuiltIn::SubgroupGtMask, StorageClass::Input, reason)?,
            le: self.resolve_builtin(BuiltIn::SubgroupLeMask, StorageClass::Input, reason)?,
            lt: self.resolve_builtin(BuiltIn::SubgroupLtMask, StorageClass::Input, reason)?,
        })
    }

    /// Synthesizes the dispatch-base extra variable when
    /// `options.dispatch_base` is set (§4.4 "dispatch-base").
    pub fn ensure_dispatch_base(&mut self, options: &CompilerOptions) -> Result<Option<VariableId>> {
        if !options.dispatch_base || self.is_already_present(BuiltIn::WorkgroupId) {
            return Ok(None);
        }
        self.synthesize(BuiltIn::WorkgroupId, StorageClass::Input, SynthesisReason::DispatchBase)
            .map(Some)
    }

    /// Builds the `DispatchBaseOffset` fixup hook pairing the dispatch-base
    /// extra variable with the builtin it offsets (§4.4 "dispatch-base").
    pub fn dispatch_base_fixup_hook(&mut self, base_var: VariableId) -> Result<FixupHook> {
        let builtin_var = self.resolve_builtin(BuiltIn::GlobalInvocationId, StorageClass::Input, SynthesisReason::DispatchBase)?;
        Ok(FixupHook::DispatchBaseOffset {
            builtin: builtin_var,
            base: base_var,
        })
    }

    /// Synthesizes `gl_SampleID` and the `SamplePosition` target its fixup
    /// hook writes (§4.4 "sample-rate shading (gl_SampleID)"; "SamplePosition
    /// ← get_sample_position(gl_SampleID)").
    pub fn ensure_sample_rate_shading(&mut self) -> Result<(VariableId, FixupHook)> {
        let sample_id = self.resolve_builtin(BuiltIn::SampleId, StorageClass::Input, SynthesisReason::SampleRateShading)?;
        let target = self.resolve_builtin(BuiltIn::SamplePosition, StorageClass::Input, SynthesisReason::SampleRateShading)?;
        Ok((sample_id, FixupHook::SamplePosition { sample_id, target }))
    }

    /// Synthesizes the four multiview builtins and the instance-index
    /// fixup hook that divides/modulos the captured instance index by
    /// `view_count` (§4.4 "multiview (need gl_InstanceIndex, gl_BaseInstance,
    /// gl_ViewIndex, gl_Layer)"; "multiview instance fixup ← divide/modulo
    /// on the instance index").
    pub fn ensure_multiview(&mut self, view_count: u32) -> Result<(Vec<VariableId>, FixupHook)> {
        let reason = SynthesisReason::Multiview;
        let instance_index = self.resolve_builtin(BuiltIn::InstanceIndex, StorageClass::Input, reason)?;
        let base_instance = self.resolve_builtin(BuiltIn::BaseInstance, StorageClass::Input, reason)?;
        let view_index = self.resolve_builtin(BuiltIn::ViewIndex, StorageClass::Input, reason)?;
        let layer = self.resolve_builtin(BuiltIn::Layer, StorageClass::Output, reason)?;
        let hook = FixupHook::MultiviewInstanceFixup {
            instance_index,
            view_count,
            target_instance: instance_index,
            target_view: view_index,
        };
        Ok((vec![instance_index, base_instance, view_index, layer], hook))
    }

    /// Synthesizes `gl_HelperInvocation` (§4.4 "helper invocation").
    pub fn ensure_helper_invocation(&mut self) -> Result<VariableId> {
        self.resolve_builtin(BuiltIn::HelperInvocation, StorageClass::Input, SynthesisReason::HelperInvocation)
    }

    /// Synthesizes the TCS output tess-factor builtins (§4.4 "tess
    /// factors"), returned `(outer, inner)`.
    pub fn ensure_tess_factors(&mut self) -> Result<(VariableId, VariableId)> {
        let reason = SynthesisReason::TessFactors;
        let outer = self.resolve_builtin(BuiltIn::TessLevelOuter, StorageClass::Output, reason)?;
        let inner = self.resolve_builtin(BuiltIn::TessLevelInner, StorageClass::Output, reason)?;
        Ok((outer, inner))
    }

    /// Synthesizes `gl_InvocationID` for a TCS that never declared it
    /// explicitly (§4.4 "TescInvocationId (raw or from dispatch)").
    pub fn ensure_tesc_invocation_id(&mut self) -> Result<VariableId> {
        self.resolve_builtin(BuiltIn::InvocationId, StorageClass::Input, SynthesisReason::TescInvocationId)
    }

    /// Synthesizes the `BaseVertex`/`VertexIndex` pair a vertex-for-
    /// tessellation entry point needs to zero-base its captured vertex
    /// index, plus the fixup hook that does the subtraction (§4.4
    /// "vertex-for-tess base indices"; "vertex-index zero-basing ← subtract
    /// BaseVertex").
    pub fn ensure_vertex_for_tess_base_indices(&mut self) -> Result<FixupHook> {
        let reason = SynthesisReason::VertexForTessBaseIndices;
        let vertex_index = self.resolve_builtin(BuiltIn::VertexIndex, StorageClass::Input, reason)?;
        let base_vertex = self.resolve_builtin(BuiltIn::BaseVertex, StorageClass::Input, reason)?;
        Ok(FixupHook::VertexIndexZeroBase { vertex_index, base_vertex })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use spirv::ExecutionModel;

    /// §8 S2: a fragment shader with subpass input but no declared
    /// `gl_FragCoord` gets one synthesized.
    #[test]
    fn s2_frag_coord_synthesized_for_subpass_input() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::Fragment, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        let id = synth.ensure_frag_coord_for_subpass_input().unwrap().unwrap();
        assert!(module.vars.get(id).unwrap().is_implicit);
        assert_eq!(module.vars.get(id).unwrap().decoration.builtin, Some(BuiltIn::FragCoord));
        assert!(module.entry_point.unwrap().interface.contains(&id));
    }

    #[test]
    fn duplicate_synthesis_is_rejected() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::Fragment, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        synth.ensure_frag_coord_for_subpass_input().unwrap();
        let err = synth
            .synthesize(BuiltIn::FragCoord, StorageClass::Input, SynthesisReason::SubpassInput)
            .unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn subgroup_mask_vars_produce_five_distinct_fixup_hooks() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::GLCompute, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        let vars = synth.ensure_subgroup_masks().unwrap();
        let hooks = vars.fixup_hooks();
        assert_eq!(hooks.len(), 5);
        for hook in &hooks {
            assert!(matches!(hook, FixupHook::SubgroupMask { .. }));
        }
    }

    #[test]
    fn ensure_multiview_reuses_an_already_present_builtin() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::Vertex, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        let instance_index = synth
            .synthesize(BuiltIn::InstanceIndex, StorageClass::Input, SynthesisReason::Multiview)
            .unwrap();
        let (vars, hook) = synth.ensure_multiview(2).unwrap();
        assert!(vars.contains(&instance_index));
        match hook {
            FixupHook::MultiviewInstanceFixup {
                instance_index: hook_instance,
                view_count,
                ..
            } => {
                assert_eq!(hook_instance, instance_index);
                assert_eq!(view_count, 2);
            }
            other => panic!("unexpected hook {:?}", other),
        }
    }

    #[test]
    fn ensure_vertex_for_tess_base_indices_builds_zero_base_hook() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::Vertex, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        let hook = synth.ensure_vertex_for_tess_base_indices().unwrap();
        assert!(matches!(hook, FixupHook::VertexIndexZeroBase { .. }));
    }

    #[test]
    fn ensure_tess_factors_synthesizes_outer_and_inner() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("main", ExecutionModel::TessellationControl, vec![]);
        let mut module = b.build();
        let mut synth = BuiltinSynthesizer::new(&mut module);
        let (outer, inner) = synth.ensure_tess_factors().unwrap();
        assert_eq!(module.vars.get(outer).unwrap().decoration.builtin, Some(BuiltIn::TessLevelOuter));
        assert_eq!(module.vars.get(inner).unwrap().decoration.builtin, Some(BuiltIn::TessLevelInner));
    }
}
