//! C8: Entry Point & Preamble Writer (§4.8).
use spvmsl_core::error::Result;
use spvmsl_core::func::{FixupHook, SubgroupMaskKind};
use spvmsl_core::id::VariableId;
use spvmsl_core::module::Module;
use spvmsl_core::ty::{ArrayLength, Type};

use crate::options::{CompilerOptions, Platform};

/// One line of the preamble, in emission order (§4.8 first paragraph).
pub struct Preamble {
    pub lines: Vec<String>,
}

pub fn build_preamble(options: &CompilerOptions, needs_raytracing: bool, custom_templates: &[&str], helper_functions: &[&str]) -> Preamble {
    let mut lines = Vec::new();
    lines.push(format!(
        "#pragma clang diagnostic ignored \"-Wmissing-prototypes\""
    ));
    if options.platform == Platform::Ios {
        lines.push("#pragma clang diagnostic ignored \"-Wmissing-braces\"".to_string());
    }
    lines.push("#include <metal_stdlib>".to_string());
    lines.push("#include <simd/simd.h>".to_string());
    if needs_raytracing {
        lines.push("#include <metal_raytracing>".to_string());
        lines.push("using namespace metal::raytracing;".to_string());
    }
    lines.push("using namespace metal;".to_string());

    for (locator, sampler) in samplers_in_declaration_order(options) {
        lines.push(constexpr_sampler_decl(locator, sampler));
    }

    for template in custom_templates {
        lines.push((*template).to_string());
    }
    for func in helper_functions {
        lines.push((*func).to_string());
    }

    Preamble { lines }
}

fn samplers_in_declaration_order(
    options: &CompilerOptions,
) -> Vec<(spvmsl_core::locator::DescriptorLocator, &crate::options::ConstexprSampler)> {
    let mut v: Vec<_> = options.constexpr_samplers.iter().map(|(k, v)| (*k, v)).collect();
    v.sort_by_key(|(loc, _)| (loc.desc_set, loc.binding));
    v
}

fn constexpr_sampler_decl(locator: spvmsl_core::locator::DescriptorLocator, sampler: &crate::options::ConstexprSampler) -> String {
    format!(
        "constexpr sampler spvSampler_{}_{}(coord::{}, filter::{}, mip_filter::{});",
        locator.desc_set,
        locator.binding,
        if sampler.coord_normalized { "normalized" } else { "pixel" },
        if sampler.min_filter_linear { "linear" } else { "nearest" },
        if sampler.mip_filter_linear { "linear" } else { "nearest" }
    )
}

/// §4.8 parameter-list ordering: "stage-in, argument-buffer slots or
/// discrete resources, builtin parameters with Metal attributes,
/// swizzle/buffer-size/view-mask/dynamic-offset side buffers, and capture-
/// output sinks."
#[derive(Debug, Clone)]
pub struct EntryParameter {
    pub decl: String,
    pub attribute: Option<String>,
}

pub struct EntryParameterListBuilder {
    params: Vec<EntryParameter>,
}
impl EntryParameterListBuilder {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    pub fn add_stage_in(&mut self, struct_name: &str) -> &mut Self {
        self.params.push(EntryParameter {
            decl: format!("{} in", struct_name),
            attribute: Some("stage_in".to_string()),
        });
        self
    }

    pub fn add_argument_buffer(&mut self, struct_name: &str, set: u32, index: u32) -> &mut Self {
        self.params.push(EntryParameter {
            decl: format!("constant {}& spvDescriptorSet{}", struct_name, set),
            attribute: Some(format!("buffer({})", index)),
        });
        self
    }

    pub fn add_discrete_resource(&mut self, decl: &str, kind: &str, index: u32) -> &mut Self {
        self.params.push(EntryParameter {
            decl: decl.to_string(),
            attribute: Some(format!("{}({})", kind, index)),
        });
        self
    }

    pub fn add_builtin_parameter(&mut self, decl: &str, attribute: &str) -> &mut Self {
        self.params.push(EntryParameter {
            decl: decl.to_string(),
            attribute: Some(attribute.to_string()),
        });
        self
    }

    pub fn add_side_buffer(&mut self, name: &str, index: u32) -> &mut Self {
        self.params.push(EntryParameter {
            decl: format!("constant uint* {}", name),
            attribute: Some(format!("buffer({})", index)),
        });
        self
    }

    pub fn add_capture_output_sink(&mut self, name: &str, index: u32) -> &mut Self {
        self.params.push(EntryParameter {
            decl: format!("device spvOut_t* {}", name),
            attribute: Some(format!("buffer({})", index)),
        });
        self
    }

    pub fn build(self) -> Vec<EntryParameter> {
        self.params
    }
}
impl Default for EntryParameterListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn render_parameter(param: &EntryParameter) -> String {
    match &param.attribute {
        Some(a) => format!("{} [[{}]]", param.decl, a),
        None => param.decl.clone(),
    }
}

pub fn side_buffer_declarations(options: &CompilerOptions) -> Vec<String> {
    let mut decls = Vec::new();
    if options.swizzle_texture_samples {
        decls.push(format!(
            "constant uint* spvSwizzleConstants [[buffer({})]]",
            options.side_tables.swizzle_buffer
        ));
    }
    decls.push(format!(
        "constant uint* spvBufferSizeConstants [[buffer({})]]",
        options.side_tables.buffer_size_buffer
    ));
    if options.multiview {
        decls.push(format!(
            "constant uint& spvViewMask [[buffer({})]]",
            options.side_tables.view_mask_buffer
        ));
    }
    if !options.dynamic_buffers.is_empty() {
        decls.push(format!(
            "constant uint* spvDynamicOffsets [[buffer({})]]",
            options.side_tables.dynamic_offsets_buffer
        ));
    }
    if options.vertex_for_tessellation || options.capture_output_to_buffer {
        decls.push(format!(
            "constant uint* spvIndirectParams [[buffer({})]]",
            options.side_tables.indirect_params_buffer
        ));
    }
    decls
}

fn fixup_var_name(module: &Module, id: VariableId) -> String {
    module
        .vars
        .get(id)
        .ok()
        .and_then(|v| v.name.clone())
        .unwrap_or_else(|| format!("v{}", id.0))
}

fn fixup_pointee_type(module: &Module, id: VariableId) -> Result<Type> {
    let var = module.vars.get(id)?;
    match module.types.get(var.ty)? {
        Type::Pointer { pointee, .. } => Ok((**pointee).clone()),
        other => Ok(other.clone()),
    }
}

/// §4.2/§4.3 component-restore swizzle letters: offset 0, vecsize 3 → "xyz";
/// offset 3, vecsize 1 → "w" (§8 S1).
fn swizzle_letters(component_offset: u32, vecsize: u32) -> String {
    const LETTERS: [char; 4] = ['x', 'y', 'z', 'w'];
    (component_offset..component_offset + vecsize)
        .map(|i| LETTERS[i as usize % 4])
        .collect()
}

/// §4.4 "SubgroupEqMask/GeMask/GtMask/LeMask/LtMask ← bitwise formulas over
/// SubgroupInvocationID and SubgroupSize".
fn subgroup_mask_formula(kind: SubgroupMaskKind, invocation_id: &str, subgroup_size: &str) -> String {
    use SubgroupMaskKind::*;
    match kind {
        Eq => format!("1u << {}", invocation_id),
        Ge => format!("{} >= {} ? 0u : (~0u << {})", invocation_id, subgroup_size, invocation_id),
        Gt => format!(
            "({} + 1u) >= {} ? 0u : (~0u << ({} + 1u))",
            invocation_id, subgroup_size, invocation_id
        ),
        Le => format!("{} >= 32u ? ~0u : ((1u << ({} + 1u)) - 1u)", invocation_id, invocation_id),
        Lt => format!("{} == 0u ? 0u : ((1u << {}) - 1u)", invocation_id, invocation_id),
    }
}

/// Renders one `FixupHook` into the statement(s) it stands for (§4.4 "Fixup
/// hooks"), resolving variable names/types straight out of `module` rather
/// than threading an emitter context through (§9 Design Note: explicit
/// dispatch over virtual chains).
pub fn render_fixup_hook(module: &Module, hook: &FixupHook) -> Result<Vec<String>> {
    Ok(match hook {
        FixupHook::SamplePosition { sample_id, target } => {
            let ty = fixup_pointee_type(module, *target)?;
            vec![format!(
                "{} {} = get_sample_position({});",
                ty,
                fixup_var_name(module, *target),
                fixup_var_name(module, *sample_id)
            )]
        }
        FixupHook::SubgroupMask {
            kind,
            invocation_id,
            subgroup_size,
            target,
        } => {
            let ty = fixup_pointee_type(module, *target)?;
            let formula = subgroup_mask_formula(
                *kind,
                &fixup_var_name(module, *invocation_id),
                &fixup_var_name(module, *subgroup_size),
            );
            vec![format!(
                "{} {} = {}({}, 0u, 0u, 0u);",
                ty,
                fixup_var_name(module, *target),
                ty,
                formula
            )]
        }
        FixupHook::MultiviewInstanceFixup {
            instance_index,
            view_count,
            target_instance,
            target_view,
        } => {
            let raw = fixup_var_name(module, *instance_index);
            let view_name = fixup_var_name(module, *target_view);
            let instance_name = fixup_var_name(module, *target_instance);
            vec![
                format!("{} = {} % {}u;", view_name, raw, view_count),
                format!("{} = {} / {}u;", instance_name, raw, view_count),
            ]
        }
        FixupHook::VertexIndexZeroBase { vertex_index, base_vertex } => {
            let v = fixup_var_name(module, *vertex_index);
            vec![format!("{} = {} - {};", v, v, fixup_var_name(module, *base_vertex))]
        }
        FixupHook::DispatchBaseOffset { builtin, base } => {
            vec![format!(
                "{} += {};",
                fixup_var_name(module, *builtin),
                fixup_var_name(module, *base)
            )]
        }
        FixupHook::CaptureOutputWrite { source, buffer_slot } => {
            let ty = fixup_pointee_type(module, *source)?;
            let count = match &ty {
                Type::Array { len: ArrayLength::Literal(n), .. } => *n,
                _ => 0,
            };
            let is_inner = *buffer_slot != 0;
            let source_name = fixup_var_name(module, *source);
            (0..count)
                .map(|c| {
                    let lhs = if is_inner {
                        crate::tessellation::inner_tess_level_store(c)
                    } else {
                        crate::tessellation::tess_level_store(c)
                    };
                    format!("{} = half({}[{}]);", lhs, source_name, c)
                })
                .collect()
        }
        FixupHook::ControlPointOutputWrite { source, member_name } => {
            vec![format!(
                "{} = {};",
                crate::tessellation::control_point_output_store(member_name),
                fixup_var_name(module, *source)
            )]
        }
        FixupHook::ComponentPackingRestore {
            source,
            member_name,
            component_offset,
            vecsize,
        } => {
            let ty = fixup_pointee_type(module, *source)?;
            vec![format!(
                "{} {} = {}.{};",
                ty,
                fixup_var_name(module, *source),
                member_name,
                swizzle_letters(*component_offset, *vecsize)
            )]
        }
    })
}

/// Renders a whole fixup-hook list in declaration order, flattening each
/// hook's (possibly multi-line) rendering (§4.4).
pub fn render_fixup_hooks(module: &Module, hooks: &[FixupHook]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for hook in hooks {
        lines.extend(render_fixup_hook(module, hook)?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_list_preserves_declaration_order() {
        let mut b = EntryParameterListBuilder::new();
        b.add_stage_in("main0_in")
            .add_discrete_resource("texture2d<float> img", "texture", 0)
            .add_builtin_parameter("uint vid", "vertex_id");
        let params = b.build();
        assert_eq!(params.len(), 3);
        assert_eq!(render_parameter(&params[0]), "main0_in in [[stage_in]]");
        assert_eq!(render_parameter(&params[2]), "uint vid [[vertex_id]]");
    }

    #[test]
    fn side_buffers_only_declared_when_needed() {
        let options = CompilerOptions::default();
        let decls = side_buffer_declarations(&options);
        assert_eq!(decls.len(), 1);
        assert!(decls[0].contains("spvBufferSizeConstants"));
    }

    /// §4.8 "#include <metal_stdlib>; #include <simd/simd.h>; using
    /// namespace metal;" in that order, with raytracing includes gated.
    #[test]
    fn preamble_includes_come_before_using_namespace() {
        let options = CompilerOptions::default();
        let preamble = build_preamble(&options, false, &[], &[]);
        let stdlib_idx = preamble.lines.iter().position(|l| l == "#include <metal_stdlib>").unwrap();
        let namespace_idx = preamble.lines.iter().position(|l| l == "using namespace metal;").unwrap();
        assert!(stdlib_idx < namespace_idx);
        assert!(!preamble.lines.iter().any(|l| l.contains("raytracing")));
    }

    #[test]
    fn preamble_adds_raytracing_include_when_requested() {
        let options = CompilerOptions::default();
        let preamble = build_preamble(&options, true, &[], &[]);
        assert!(preamble.lines.iter().any(|l| l == "#include <metal_raytracing>"));
        assert!(preamble.lines.iter().any(|l| l == "using namespace metal::raytracing;"));
    }

    /// §8 S1: a packed component-restore hook reads back as a local alias
    /// swizzled out of the shared `m_location_0` member.
    #[test]
    fn component_packing_restore_matches_s1_literal_forms() {
        use crate::builder::ModuleBuilder;
        use spvmsl_core::ty::ScalarType;

        let mut b = ModuleBuilder::new();
        let f3 = b.add_type(Type::Vector { elem: ScalarType::Float { bits: 32 }, size: 3 });
        let f1 = b.add_type(Type::Scalar(ScalarType::Float { bits: 32 }));
        let in0 = b.add_variable(f3, spirv::StorageClass::Input);
        b.name_variable(in0, "in0").unwrap();
        let in1 = b.add_variable(f1, spirv::StorageClass::Input);
        b.name_variable(in1, "in1").unwrap();
        b.set_entry_point("main", spirv::ExecutionModel::Fragment, vec![in0, in1]);
        let module = b.build();

        let hook0 = FixupHook::ComponentPackingRestore {
            source: in0,
            member_name: "m_location_0".to_string(),
            component_offset: 0,
            vecsize: 3,
        };
        let hook1 = FixupHook::ComponentPackingRestore {
            source: in1,
            member_name: "m_location_0".to_string(),
            component_offset: 3,
            vecsize: 1,
        };
        assert_eq!(
            render_fixup_hook(&module, &hook0).unwrap(),
            vec!["float3 in0 = m_location_0.xyz;".to_string()]
        );
        assert_eq!(
            render_fixup_hook(&module, &hook1).unwrap(),
            vec!["float in1 = m_location_0.w;".to_string()]
        );
    }

    /// §8 S3: the outer tess-factor capture write stores each half-cast
    /// component keyed by `gl_PrimitiveID`.
    #[test]
    fn capture_output_write_matches_s3_literal_form() {
        use crate::builder::ModuleBuilder;
        use spvmsl_core::ty::{ArrayLength, ScalarType};

        let mut b = ModuleBuilder::new();
        let arr = b.add_type(Type::Array {
            elem: Box::new(Type::Scalar(ScalarType::Float { bits: 32 })),
            len: ArrayLength::Literal(4),
            stride: None,
        });
        let outer = b.add_variable(arr, spirv::StorageClass::Output);
        b.name_variable(outer, "gl_TessLevelOuter").unwrap();
        b.set_entry_point("tesc_main", spirv::ExecutionModel::TessellationControl, vec![outer]);
        let module = b.build();

        let hook = FixupHook::CaptureOutputWrite { source: outer, buffer_slot: 0 };
        let lines = render_fixup_hook(&module, &hook).unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "spvTessLevel[gl_PrimitiveID].edgeTessellationFactor[0] = half(gl_TessLevelOuter[0]);"
        );
    }

    #[test]
    fn constexpr_samplers_are_declared_sorted_by_set_then_binding() {
        use spvmsl_core::locator::DescriptorLocator;

        let mut options = CompilerOptions::default();
        options.constexpr_samplers.insert(
            DescriptorLocator { desc_set: 1, binding: 0 },
            crate::options::ConstexprSampler {
                coord_normalized: true,
                min_filter_linear: false,
                mip_filter_linear: false,
                ..Default::default()
            },
        );
        options.constexpr_samplers.insert(
            DescriptorLocator { desc_set: 0, binding: 2 },
            crate::options::ConstexprSampler {
                coord_normalized: false,
                min_filter_linear: true,
                mip_filter_linear: true,
                ..Default::default()
            },
        );
        let preamble = build_preamble(&options, false, &[], &[]);
        let first = preamble.lines.iter().position(|l| l.contains("spvSampler_0_2")).unwrap();
        let second = preamble.lines.iter().position(|l| l.contains("spvSampler_1_0")).unwrap();
        assert!(first < second);
        assert!(preamble.lines[first].contains("coord::pixel"));
        assert!(preamble.lines[first].contains("filter::linear"));
    }
}
