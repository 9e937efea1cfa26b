//! Decorations and the extended-decoration channel (§3 "Decoration").
use fnv::FnvHashMap;
use spirv::BuiltIn;

use crate::error::{Error, Result};
use crate::id::TypeId;

/// One of the four resource-index slots a variable may occupy
/// (§3 "resource index (primary/secondary/tertiary/quaternary)", used for
/// combined image-samplers and multiplanar YCbCr images, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceIndexSlot {
    Primary,
    Secondary,
    Tertiary,
    Quaternary,
}

/// The standard SPIR-V decorations relevant to MSL emission (§3
/// "Decoration"). Lives on a `Variable` or on a `StructMember`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoration {
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub binding: Option<u32>,
    pub descriptor_set: Option<u32>,
    pub builtin: Option<BuiltIn>,
    pub offset: Option<u32>,
    pub array_stride: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub row_major: bool,
    pub relaxed_precision: bool,
    pub non_writable: bool,
    pub non_readable: bool,
    pub patch: bool,
    pub per_primitive: bool,
    pub per_vertex_khr: bool,
    pub index: Option<u32>,
    pub spec_id: Option<u32>,
}

/// The parallel extended-decoration channel (§3): internal bookkeeping
/// attached per member/variable that never appears in the source SPIR-V,
/// produced by the layout rewriter (§4.5), the builtin synthesizer (§4.4)
/// and the resource binder (§4.6).
///
/// Per §5 "extended decorations are write-once within a pass unless
/// explicitly unset", every setter refuses to overwrite a field that is
/// already `Some`; callers that legitimately need to replace a mark call
/// the matching `unset_*` first.
#[derive(Debug, Clone, Default)]
pub struct ExtendedDecoration {
    pub packed_physical_type: bool,
    pub physical_type_id: Option<TypeId>,
    pub padding_target_bytes: Option<u32>,
    pub resource_index: FnvHashMap<ResourceIndexSlot, u32>,
    pub dispatch_base: bool,
    pub workgroup_struct: bool,
    pub buffer_block_repacked: bool,
    /// The struct self-ID this member was originally accepted from, stable
    /// across later reorderings (§3 invariant 1 / §4.2 "member ordering").
    pub interface_origin_id: Option<TypeId>,
    pub interface_member_index: Option<u32>,
    pub interpolant_component_expr: Option<String>,
    pub dynamic_image_sampler: bool,
    pub tess_io_original_type: Option<TypeId>,
}

impl ExtendedDecoration {
    pub fn mark_packed_physical_type(&mut self) -> Result<()> {
        if self.packed_physical_type {
            return Err(Error::corrupted("packed physical type mark set twice without unset"));
        }
        self.packed_physical_type = true;
        Ok(())
    }
    pub fn unset_packed_physical_type(&mut self) {
        self.packed_physical_type = false;
    }

    pub fn set_physical_type_id(&mut self, id: TypeId) -> Result<()> {
        if self.physical_type_id.is_some() {
            return Err(Error::corrupted("physical type id set twice without unset"));
        }
        self.physical_type_id = Some(id);
        Ok(())
    }
    pub fn unset_physical_type_id(&mut self) {
        self.physical_type_id = None;
    }

    pub fn set_padding_target_bytes(&mut self, n: u32) -> Result<()> {
        if self.padding_target_bytes.is_some() {
            return Err(Error::corrupted("padding target set twice without unset"));
        }
        self.padding_target_bytes = Some(n);
        Ok(())
    }

    pub fn set_resource_index(&mut self, slot: ResourceIndexSlot, index: u32) -> Result<()> {
        if self.resource_index.contains_key(&slot) {
            return Err(Error::corrupted(format!(
                "resource index slot {:?} set twice without unset",
                slot
            )));
        }
        self.resource_index.insert(slot, index);
        Ok(())
    }
    pub fn resource_index(&self, slot: ResourceIndexSlot) -> Option<u32> {
        self.resource_index.get(&slot).copied()
    }
}
