//! Resource binding and interface location records (§3).
use spirv::BuiltIn;

/// A (descriptor-set, binding) pair, used as a lookup key for the resource
/// binder (§4.6) and the client-supplied bindings list (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorLocator {
    pub desc_set: u32,
    pub binding: u32,
}

/// A (location, component) pair identifying a stage-IO slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceLocator {
    pub location: u32,
    pub component: u32,
}

/// Rate at which an interface value varies across the primitive
/// (§3 "rate ∈ {per-vertex, per-primitive, per-patch}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationRate {
    PerVertex,
    PerPrimitive,
    PerPatch,
}

/// The wire format of a packed stage-IO slot (§3 "format ∈ {any16, any32,
/// uint16, uint32, uint8}").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceFormat {
    Any16,
    Any32,
    Uint16,
    Uint32,
    Uint8,
}

/// §3 "Interface record (inputs/outputs)".
#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    pub locator: InterfaceLocator,
    pub vecsize: u32,
    pub format: InterfaceFormat,
    pub rate: InterpolationRate,
    pub builtin: Option<BuiltIn>,
}

/// A Metal resource kind a variable can be assigned an index in
/// (§4.6 "one or more Metal resource indices").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetalResourceKind {
    Buffer,
    Texture,
    Sampler,
    ThreadgroupMemory,
}

/// §3 "Resource binding record": where a (stage, set, binding) tuple ends
/// up in the Metal argument list.
#[derive(Debug, Clone)]
pub struct ResourceBindingRecord {
    pub desc_set: u32,
    pub binding: u32,
    pub msl_buffer: Option<u32>,
    pub msl_texture: Option<u32>,
    pub msl_sampler: Option<u32>,
    pub count: u32,
    pub base_type: Option<String>,
    pub used: bool,
    pub constexpr_sampler: Option<u32>,
    pub dynamic_offset: bool,
    pub inline_uniform: bool,
    pub device_storage: bool,
}

impl ResourceBindingRecord {
    pub fn new(desc_set: u32, binding: u32) -> Self {
        Self {
            desc_set,
            binding,
            msl_buffer: None,
            msl_texture: None,
            msl_sampler: None,
            count: 1,
            base_type: None,
            used: false,
            constexpr_sampler: None,
            dynamic_offset: false,
            inline_uniform: false,
            device_storage: false,
        }
    }

    pub fn locator(&self) -> DescriptorLocator {
        DescriptorLocator {
            desc_set: self.desc_set,
            binding: self.binding,
        }
    }

    pub fn index_for(&self, kind: MetalResourceKind) -> Option<u32> {
        match kind {
            MetalResourceKind::Buffer => self.msl_buffer,
            MetalResourceKind::Texture => self.msl_texture,
            MetalResourceKind::Sampler => self.msl_sampler,
            MetalResourceKind::ThreadgroupMemory => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locator_round_trips_from_record() {
        let rec = ResourceBindingRecord::new(2, 5);
        assert_eq!(rec.locator(), DescriptorLocator { desc_set: 2, binding: 5 });
    }

    #[test]
    fn index_for_picks_the_matching_kind() {
        let mut rec = ResourceBindingRecord::new(0, 0);
        rec.msl_texture = Some(3);
        rec.msl_sampler = Some(1);
        assert_eq!(rec.index_for(MetalResourceKind::Texture), Some(3));
        assert_eq!(rec.index_for(MetalResourceKind::Sampler), Some(1));
        assert_eq!(rec.index_for(MetalResourceKind::Buffer), None);
        assert_eq!(rec.index_for(MetalResourceKind::ThreadgroupMemory), None);
    }

    #[test]
    fn locators_order_by_set_then_binding() {
        let a = DescriptorLocator { desc_set: 0, binding: 9 };
        let b = DescriptorLocator { desc_set: 1, binding: 0 };
        assert!(a < b);
    }
}
