//! C3: Tessellation & Capture-to-Buffer Pipeline (§4.3).
use spirv::StorageClass;

use spvmsl_core::error::Result;
use spvmsl_core::func::FixupHook;
use spvmsl_core::module::Module;

use crate::options::CompilerOptions;

/// SPIR-V `OpExecutionMode` tessellation topology, driving which half-struct
/// is emitted (§8 property 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TessTopology {
    Triangles,
    Quads,
    Isolines,
}
impl TessTopology {
    /// §8 property 6: "triangles emit a `MTLTriangleTessellationFactorsHalf`;
    /// quads emit `MTLQuadTessellationFactorsHalf`".
    pub fn factors_struct_name(self) -> &'static str {
        match self {
            TessTopology::Triangles => "MTLTriangleTessellationFactorsHalf",
            TessTopology::Quads => "MTLQuadTessellationFactorsHalf",
            TessTopology::Isolines => "MTLQuadTessellationFactorsHalf",
        }
    }
    pub fn outer_count(self) -> u32 {
        match self {
            TessTopology::Triangles => 3,
            TessTopology::Quads => 4,
            TessTopology::Isolines => 2,
        }
    }
    pub fn inner_count(self) -> u32 {
        match self {
            TessTopology::Triangles => 1,
            TessTopology::Quads => 2,
            TessTopology::Isolines => 0,
        }
    }
}

/// Whether a TCS lowers to a multi-patch-per-threadgroup compute kernel or
/// a one-patch-per-threadgroup kernel (§4.3 "multi-patch workgroup mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInputMode {
    Threadgroup,
    DeviceBuffer,
}

/// §4.3 state machine steps for one TCS invocation, materialized as plain
/// data the emitter walks in order (§9 Design Note: explicit dispatch over
/// virtual chains).
pub struct TcsKernelPlan {
    pub output_vertices: u32,
    pub stage_input_mode: StageInputMode,
    pub topology: TessTopology,
    /// §4.3: "A threadgroup barrier precedes early-exit of threads whose
    /// InvocationId ≥ output_vertices."
    pub early_exit_guard: String,
    pub barrier: String,
}

pub fn plan_tcs_kernel(output_vertices: u32, topology: TessTopology, options: &CompilerOptions) -> TcsKernelPlan {
    let stage_input_mode = if options.multi_patch_workgroup {
        StageInputMode::DeviceBuffer
    } else {
        StageInputMode::Threadgroup
    };
    TcsKernelPlan {
        output_vertices,
        stage_input_mode,
        topology,
        early_exit_guard: format!("if (gl_InvocationID >= {}u) return;", output_vertices),
        barrier: "threadgroup_barrier(mem_flags::mem_threadgroup)".to_string(),
    }
}

/// §4.3: "Tessellation levels are written as half-precision values into a
/// factor struct keyed by PrimitiveId." Matches §8 S3's literal form.
pub fn tess_level_store(edge_index: u32) -> String {
    format!("spvTessLevel[gl_PrimitiveID].edgeTessellationFactor[{}]", edge_index)
}

/// The inner-factor counterpart of [`tess_level_store`].
pub fn inner_tess_level_store(component: u32) -> String {
    format!("spvTessLevel[gl_PrimitiveID].insideTessellationFactor[{}]", component)
}

/// §4.3: a write through a device-buffer output pointer, keyed by the
/// per-control-point member index map.
pub fn control_point_output_store(member: &str) -> String {
    format!("spvOut[gl_InvocationID].{}", member)
}

/// §4.3 "Capture to buffer contract": the entry point becomes void, and a
/// reference to the output buffer slot is established with one of three
/// addressing formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureAddressing {
    VertexForTess,
    ZeroBase,
    BaseOffset,
}
pub fn capture_address_expr(mode: CaptureAddressing, index_expr: &str, stride: u32, base_expr: Option<&str>) -> String {
    match mode {
        CaptureAddressing::VertexForTess => format!("spvIndirectParams[0] + {} * {}", index_expr, stride),
        CaptureAddressing::ZeroBase => format!("{} * {}", index_expr, stride),
        CaptureAddressing::BaseOffset => format!(
            "({}) + {} * {}",
            base_expr.unwrap_or("0"),
            index_expr,
            stride
        ),
    }
}

/// §4.3 TES: raw-buffer path vs `patch_control_point<T>` path. §9 Open
/// Question 3 asks these to be unified behind one enum-parameterized code
/// path; this is that enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesInputPath {
    PatchControlPointTemplate,
    RawDeviceBuffer,
}
pub fn tes_input_path(options: &CompilerOptions) -> TesInputPath {
    if options.raw_buffer_tese_input {
        TesInputPath::RawDeviceBuffer
    } else {
        TesInputPath::PatchControlPointTemplate
    }
}
pub fn tes_control_point_access(path: TesInputPath, patch_id_expr: &str, control_point_index_expr: &str) -> String {
    match path {
        TesInputPath::PatchControlPointTemplate => format!("gl_in[{}]", control_point_index_expr),
        TesInputPath::RawDeviceBuffer => format!(
            "spvIn[{} * spvStageInputSize + {}]",
            patch_id_expr, control_point_index_expr
        ),
    }
}

/// Whether the multi-patch stage-input-size side value (§4.4 "multi-patch
/// stage-input-size") must be threaded in as an extra kernel parameter:
/// true whenever patch-indexed stage input is read through the raw
/// device-buffer path rather than the `patch_control_point<T>` template,
/// since only the raw path needs a stride to index by.
pub fn needs_multi_patch_stage_input_size(path: TesInputPath) -> bool {
    matches!(path, TesInputPath::RawDeviceBuffer)
}

/// Installs the fixup hooks a TCS entry point needs (§4.3 + §4.4
/// integration point), delegated to by the top-level driver: ensures
/// `gl_InvocationID` and the outer/inner tess-factor builtins exist, then
/// wires each tess-factor write through a `CaptureOutputWrite` epilogue
/// hook (§4.3 "tessellation levels are written ... keyed by PrimitiveId").
pub fn install_tess_fixup_hooks(module: &mut Module, plan: &TcsKernelPlan) -> Result<Vec<FixupHook>> {
    let mut synth = crate::builtins::BuiltinSynthesizer::new(module);
    synth.ensure_tesc_invocation_id()?;
    let (outer, inner) = synth.ensure_tess_factors()?;
    log::trace!(
        "installed tess-factor capture hooks for a {:?}-topology TCS with {} output vertices",
        plan.topology,
        plan.output_vertices
    );
    let mut hooks = vec![
        FixupHook::CaptureOutputWrite {
            source: outer,
            buffer_slot: 0,
        },
        FixupHook::CaptureOutputWrite {
            source: inner,
            buffer_slot: 1,
        },
    ];

    // Every user-declared (non-builtin) output is a per-control-point
    // member captured into the device-buffer `spvOut` array rather than
    // returned (§4.3 "Capture to buffer contract").
    let entry = module
        .entry_point
        .clone()
        .expect("entry point set before tess fixup installation");
    for &var_id in &entry.interface {
        let var = module.vars.get(var_id)?;
        if var.store_cls != StorageClass::Output || var.decoration.builtin.is_some() {
            continue;
        }
        let member_name = var.name.clone().unwrap_or_else(|| format!("m{}", var_id.0));
        hooks.push(FixupHook::ControlPointOutputWrite { source: var_id, member_name });
    }

    Ok(hooks)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 S3.
    #[test]
    fn s3_tcs_multi_patch_workgroup_plan() {
        let mut options = CompilerOptions::default();
        options.multi_patch_workgroup = true;
        let plan = plan_tcs_kernel(3, TessTopology::Triangles, &options);
        assert_eq!(plan.early_exit_guard, "if (gl_InvocationID >= 3u) return;");
        assert_eq!(plan.barrier, "threadgroup_barrier(mem_flags::mem_threadgroup)");
        assert_eq!(plan.stage_input_mode, StageInputMode::DeviceBuffer);
    }

    #[test]
    fn triangle_and_quad_factor_struct_names_match_property6() {
        assert_eq!(TessTopology::Triangles.factors_struct_name(), "MTLTriangleTessellationFactorsHalf");
        assert_eq!(TessTopology::Quads.factors_struct_name(), "MTLQuadTessellationFactorsHalf");
    }

    #[test]
    fn tess_level_store_matches_s3_literal_form() {
        assert_eq!(
            tess_level_store(0),
            "spvTessLevel[gl_PrimitiveID].edgeTessellationFactor[0]"
        );
    }

    #[test]
    fn raw_device_buffer_path_needs_stage_input_size() {
        assert!(needs_multi_patch_stage_input_size(TesInputPath::RawDeviceBuffer));
        assert!(!needs_multi_patch_stage_input_size(TesInputPath::PatchControlPointTemplate));
    }

    #[test]
    fn install_tess_fixup_hooks_wires_both_tess_factor_captures() {
        use crate::builder::ModuleBuilder;
        use spirv::ExecutionModel;

        let mut b = ModuleBuilder::new();
        b.set_entry_point("tesc_main", ExecutionModel::TessellationControl, vec![]);
        let mut module = b.build();
        let options = CompilerOptions::default();
        let plan = plan_tcs_kernel(3, TessTopology::Triangles, &options);
        let hooks = install_tess_fixup_hooks(&mut module, &plan).unwrap();
        assert_eq!(hooks.len(), 2);
        assert!(hooks.iter().all(|h| matches!(h, FixupHook::CaptureOutputWrite { .. })));
    }
}
