//! External interface surface (§6): the options a caller supplies alongside
//! the IR, and the client-supplied tables they govern.
use fnv::FnvHashMap;

use spvmsl_core::error::{Error, MslVersion, Result};
use spvmsl_core::locator::{DescriptorLocator, InterfaceLocator, InterpolationRate, InterfaceFormat};

/// §6 "target platform ∈ {iOS, macOS}".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ios,
    MacOs,
}

/// §6 "argument-buffer tier ∈ {1, 2}".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentBufferTier {
    Tier1,
    Tier2,
}

/// One entry of the client-supplied bindings list (§6 "Bindings: list of
/// (stage, set, binding, msl_buffer, msl_texture, msl_sampler, count,
/// base_type)").
#[derive(Debug, Clone)]
pub struct MslResourceBinding {
    pub stage: spirv::ExecutionModel,
    pub desc_set: u32,
    pub binding: u32,
    pub msl_buffer: Option<u32>,
    pub msl_texture: Option<u32>,
    pub msl_sampler: Option<u32>,
    pub count: u32,
    pub base_type: Option<String>,
}

/// One entry of the client-supplied shader-variable list (§6 "Shader
/// variables: per-location input/output records").
#[derive(Debug, Clone)]
pub struct ShaderVariableRecord {
    pub locator: InterfaceLocator,
    pub vecsize: u32,
    pub format: InterfaceFormat,
    pub rate: InterpolationRate,
    pub builtin: Option<spirv::BuiltIn>,
}

/// §6 "Dynamic buffer list: (set, binding, dynamic-offset index)".
#[derive(Debug, Clone, Copy)]
pub struct DynamicBufferEntry {
    pub desc_set: u32,
    pub binding: u32,
    pub dynamic_offset_index: u32,
}

/// §6 "Constexpr sampler table, keyed by (set, binding) or by variable ID".
#[derive(Debug, Clone)]
pub struct ConstexprSampler {
    pub coord_normalized: bool,
    pub min_filter_linear: bool,
    pub mag_filter_linear: bool,
    pub mip_filter_linear: bool,
    pub compare_enable: bool,
    pub ycbcr_conversion_enable: bool,
    pub ycbcr_model: YcbcrModel,
    pub planes: u8,
}
impl Default for ConstexprSampler {
    fn default() -> Self {
        Self {
            coord_normalized: true,
            min_filter_linear: false,
            mag_filter_linear: false,
            mip_filter_linear: false,
            compare_enable: false,
            ycbcr_conversion_enable: false,
            ycbcr_model: YcbcrModel::RgbIdentity,
            planes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YcbcrModel {
    RgbIdentity,
    YcbcrIdentity,
    Bt601,
    Bt709,
    Bt2020,
}

/// The five Metal buffer indices reserved for side tables (§6).
#[derive(Debug, Clone, Copy)]
pub struct SideTableIndices {
    pub swizzle_buffer: u32,
    pub buffer_size_buffer: u32,
    pub view_mask_buffer: u32,
    pub dynamic_offsets_buffer: u32,
    pub indirect_params_buffer: u32,
}
impl Default for SideTableIndices {
    fn default() -> Self {
        Self {
            swizzle_buffer: 30,
            buffer_size_buffer: 29,
            view_mask_buffer: 28,
            dynamic_offsets_buffer: 27,
            indirect_params_buffer: 26,
        }
    }
}

/// §6 full option surface, plus the recompile bound from §5 and the
/// argument-buffer padding flag from §4.6.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    pub msl_version: MslVersion,
    pub platform: Platform,
    pub argument_buffer_tier: ArgumentBufferTier,

    pub bindings: Vec<MslResourceBinding>,
    pub shader_variables: Vec<ShaderVariableRecord>,
    pub dynamic_buffers: Vec<DynamicBufferEntry>,
    pub inline_uniform_blocks: Vec<DescriptorLocator>,
    pub discrete_descriptor_sets: Vec<u32>,
    pub argument_buffer_device_storage_mask: Vec<u32>,
    pub constexpr_samplers: FnvHashMap<DescriptorLocator, ConstexprSampler>,

    pub multiview: bool,
    /// Number of views the multiview instance-index fixup divides/modulos
    /// by (§4.4 "multiview instance fixup ← divide/modulo on the instance
    /// index"). Only meaningful when `multiview` is set.
    pub multiview_view_count: u32,
    pub view_index_from_device_index: bool,
    pub dispatch_base: bool,
    pub vertex_for_tessellation: bool,
    pub multi_patch_workgroup: bool,
    pub raw_buffer_tese_input: bool,
    pub emulate_subgroups: bool,
    pub fixed_subgroup_size: Option<u32>,
    pub swizzle_texture_samples: bool,
    pub pad_fragment_output_components: bool,
    pub enable_frag_depth_builtin: bool,
    pub enable_frag_stencil_ref_builtin: bool,
    pub additional_fixed_sample_mask: Option<u32>,
    pub capture_output_to_buffer: bool,
    pub force_native_arrays: bool,
    pub invariant_float_math: bool,
    pub use_argument_buffers: bool,
    pub pad_argument_buffer_resources: bool,

    pub side_tables: SideTableIndices,

    /// §5 "default 3, hard cap configurable".
    pub max_recompile_passes: u32,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            msl_version: MslVersion::V2_1,
            platform: Platform::MacOs,
            argument_buffer_tier: ArgumentBufferTier::Tier1,
            bindings: Vec::new(),
            shader_variables: Vec::new(),
            dynamic_buffers: Vec::new(),
            inline_uniform_blocks: Vec::new(),
            discrete_descriptor_sets: Vec::new(),
            argument_buffer_device_storage_mask: Vec::new(),
            constexpr_samplers: FnvHashMap::default(),
            multiview: false,
            multiview_view_count: 2,
            view_index_from_device_index: false,
            dispatch_base: false,
            vertex_for_tessellation: false,
            multi_patch_workgroup: false,
            raw_buffer_tese_input: false,
            emulate_subgroups: false,
            fixed_subgroup_size: None,
            swizzle_texture_samples: false,
            pad_fragment_output_components: false,
            enable_frag_depth_builtin: false,
            enable_frag_stencil_ref_builtin: false,
            additional_fixed_sample_mask: None,
            capture_output_to_buffer: false,
            force_native_arrays: false,
            invariant_float_math: false,
            use_argument_buffers: false,
            pad_argument_buffer_resources: false,
            side_tables: SideTableIndices::default(),
            max_recompile_passes: 3,
        }
    }
}

impl CompilerOptions {
    pub fn find_binding(&self, stage: spirv::ExecutionModel, desc_set: u32, binding: u32) -> Option<&MslResourceBinding> {
        self.bindings
            .iter()
            .find(|b| b.stage == stage && b.desc_set == desc_set && b.binding == binding)
    }

    pub fn is_discrete_set(&self, desc_set: u32) -> bool {
        self.discrete_descriptor_sets.contains(&desc_set)
    }

    pub fn dynamic_offset_index(&self, desc_set: u32, binding: u32) -> Option<u32> {
        self.dynamic_buffers
            .iter()
            .find(|d| d.desc_set == desc_set && d.binding == binding)
            .map(|d| d.dynamic_offset_index)
    }

    pub fn constexpr_sampler_for(&self, desc_set: u32, binding: u32) -> Option<&ConstexprSampler> {
        self.constexpr_samplers.get(&DescriptorLocator { desc_set, binding })
    }

    /// §7 "Error::UnsupportedTarget": looks `feature` up in the version
    /// gating table and fails if this option set's `msl_version` is below
    /// what it requires. Features absent from the table are ungated.
    pub fn require_feature(&self, feature: &'static str) -> Result<()> {
        if let Some(required) = min_version_for_feature(feature) {
            if self.msl_version < required {
                return Err(Error::unsupported_target(feature, required, self.msl_version));
            }
        }
        Ok(())
    }
}

/// Minimum MSL version gating table (SPEC_FULL §3 "MslVersion feature
/// gating table"), driving `Error::UnsupportedTarget` (§7).
pub fn min_version_for_feature(feature: &str) -> Option<MslVersion> {
    Some(match feature {
        "atomics" => MslVersion(2, 0, 0),
        "argument_buffers" => MslVersion(2, 0, 0),
        "argument_buffers_tier2" => MslVersion(2, 1, 0),
        "raytracing" => MslVersion(2, 3, 0),
        "device_arg_buffer_storage" => MslVersion(2, 0, 0),
        "calculate_lod" => MslVersion(2, 1, 0),
        "simd_permute" => MslVersion(2, 1, 0),
        "quad_permute" => MslVersion(2, 1, 0),
        "mesh_shading" => MslVersion(3, 0, 0),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raytracing_below_2_3_is_unsupported_target() {
        let mut options = CompilerOptions::default();
        options.msl_version = MslVersion::V2_1;
        let err = options.require_feature("raytracing").unwrap_err();
        assert!(matches!(err, Error::UnsupportedTarget { required, .. } if required == MslVersion::V2_3));
    }

    #[test]
    fn unknown_feature_is_ungated() {
        let options = CompilerOptions::default();
        assert!(options.require_feature("not_a_real_feature").is_ok());
    }

    #[test]
    fn argument_buffers_at_2_0_is_supported() {
        let mut options = CompilerOptions::default();
        options.msl_version = MslVersion::V2_0;
        assert!(options.require_feature("argument_buffers").is_ok());
    }
}
