//! C2: Interface Block Assembler (§4.2).
use fnv::FnvHashMap;
use spirv::{BuiltIn, ExecutionModel, StorageClass};

use spvmsl_core::decoration::ExtendedDecoration;
use spvmsl_core::error::{Error, Result};
use spvmsl_core::func::FixupHook;
use spvmsl_core::id::{TypeId, VariableId};
use spvmsl_core::module::Module;
use spvmsl_core::ty::{ArrayLength, ScalarType, StructMember, Type};

/// One source variable contributing components to a packed stage-IO member
/// (§4.2 "Component packing").
#[derive(Debug, Clone)]
pub struct ComponentSlice {
    pub var: VariableId,
    pub component_offset: u32,
    pub vecsize: u32,
}

/// One accepted member of a `stage_in`/`stage_out`/per-patch struct.
#[derive(Debug, Clone)]
pub struct InterfaceMember {
    /// `m_location_N` for packed runtime-linkage slots, or the variable's
    /// own name for fixed-function/builtin members.
    pub name: String,
    pub ty: Type,
    pub location: Option<u32>,
    pub builtin: Option<BuiltIn>,
    /// The struct self-ID this member belongs to and its pre-sort index,
    /// kept stable for downstream access chains (§4.2 "Member ordering").
    pub origin_struct: TypeId,
    pub origin_index: u32,
    pub sources: Vec<ComponentSlice>,
}

/// Result of `AddInterfaceBlock`.
pub struct InterfaceBlock {
    pub struct_ty: TypeId,
    pub var: VariableId,
    pub members: Vec<InterfaceMember>,
}

/// Whether a pipeline stage/storage combination has *runtime linkage*:
/// vertex input, fragment output, or a captured vertex output that a later
/// stage will read by location rather than by name (§4.2 "Component
/// packing": "When the pipeline stage has runtime linkage").
fn has_runtime_linkage(stage: ExecutionModel, storage: StorageClass, capture_to_buffer: bool) -> bool {
    match (stage, storage) {
        (ExecutionModel::Vertex, StorageClass::Input) => true,
        (ExecutionModel::Fragment, StorageClass::Output) => true,
        (ExecutionModel::Vertex, StorageClass::Output) => capture_to_buffer,
        _ => false,
    }
}

/// §4.2 "Builtin redirection": the MSL attribute a builtin decoration maps
/// to for this (stage, storage) pair, or an explicit failure for ones
/// Metal doesn't support (e.g. `DrawIndex`, §4.2 "Failure modes").
pub fn builtin_msl_attribute(builtin: BuiltIn, stage: ExecutionModel, storage: StorageClass) -> Result<&'static str> {
    use BuiltIn::*;
    Ok(match builtin {
        Position if storage == StorageClass::Output => "position",
        FragCoord => "position",
        PointSize => "point_size",
        ClipDistance => "clip_distance",
        VertexIndex => "vertex_id",
        InstanceIndex => "instance_id",
        BaseVertex => "base_vertex",
        BaseInstance => "base_instance",
        FragDepth => "depth(any)",
        FrontFacing => "front_facing",
        SampleId => "sample_id",
        SampleMask if storage == StorageClass::Input => "sample_mask",
        SampleMask => "sample_mask",
        GlobalInvocationId => "thread_position_in_grid",
        LocalInvocationId => "thread_position_in_threadgroup",
        LocalInvocationIndex => "thread_index_in_threadgroup",
        WorkgroupId => "threadgroup_position_in_grid",
        WorkgroupSize => "dispatch_threads_per_threadgroup",
        PrimitiveId if stage == ExecutionModel::Fragment => "primitive_id",
        PrimitiveId => "primitive_id",
        Layer => "render_target_array_index",
        ViewportIndex => "viewport_array_index",
        InvocationId => "thread_index_in_threadgroup",
        TessCoord => "position_in_patch",
        SubgroupLocalInvocationId => "thread_index_in_simdgroup",
        SubgroupSize => "threads_per_simdgroup",
        DrawIndex => {
            return Err(Error::unsupported_shape(
                "Metal does not provide a DrawIndex builtin",
                None,
            ))
        }
        other => {
            return Err(Error::unsupported_shape(
                format!("builtin {:?} has no MSL attribute mapping", other),
                None,
            ))
        }
    })
}

/// Builtins with no native Metal attribute, whose only value comes from a
/// [`spvmsl_core::func::FixupHook`] formula evaluated at prologue time
/// (§4.4): the five subgroup masks, `SamplePosition`, `ViewIndex`, and
/// `HelperInvocation`. `InterfaceAssembler` leaves these out of the
/// `stage_in`/`stage_out` struct entirely rather than erroring on
/// [`builtin_msl_attribute`].
pub fn is_fixup_only_builtin(builtin: BuiltIn) -> bool {
    matches!(
        builtin,
        BuiltIn::SamplePosition
            | BuiltIn::SubgroupEqMask
            | BuiltIn::SubgroupGeMask
            | BuiltIn::SubgroupGtMask
            | BuiltIn::SubgroupLeMask
            | BuiltIn::SubgroupLtMask
            | BuiltIn::ViewIndex
            | BuiltIn::HelperInvocation
    )
}

/// Sort key for §4.2 "Member ordering": "(builtin-status, location-then-
/// builtin-type)". Non-builtins sort before builtins within the same
/// bucket is arbitrary here; what matters is it is total and stable.
fn member_sort_key(m: &InterfaceMember) -> (bool, u32, u32) {
    let is_builtin = m.builtin.is_some();
    let loc = m.location.unwrap_or(u32::MAX);
    let builtin_rank = m.builtin.map(|b| b as u32).unwrap_or(0);
    (is_builtin, loc, builtin_rank)
}

pub struct InterfaceAssembler<'m> {
    module: &'m mut Module,
    stage: ExecutionModel,
    capture_to_buffer: bool,
    next_free_location: u32,
}

impl<'m> InterfaceAssembler<'m> {
    pub fn new(module: &'m mut Module, stage: ExecutionModel, capture_to_buffer: bool) -> Self {
        Self {
            module,
            stage,
            capture_to_buffer,
            next_free_location: 0,
        }
    }

    fn alloc_location(&mut self) -> u32 {
        let loc = self.next_free_location;
        self.next_free_location += 1;
        loc
    }

    /// §4.2 "AddInterfaceBlock(storage, patch) → var_id".
    pub fn add_interface_block(&mut self, storage: StorageClass, patch: bool) -> Result<Option<InterfaceBlock>> {
        let entry = self
            .module
            .entry_point
            .clone()
            .ok_or_else(|| Error::corrupted("no entry point set"))?;

        // Track max declared location so auto-assignment doesn't collide.
        for &var_id in &entry.interface {
            let var = self.module.vars.get(var_id)?;
            if let Some(loc) = var.decoration.location {
                self.next_free_location = self.next_free_location.max(loc + 1);
            }
        }

        let mut accepted = Vec::new();
        let mut origin_index = 0u32;
        // location -> accumulated component slices, for runtime-linkage packing.
        let mut packed: FnvHashMap<u32, Vec<(VariableId, u32, u32, ScalarType)>> = FnvHashMap::default();

        let runtime_linkage = has_runtime_linkage(self.stage, storage, self.capture_to_buffer);

        for &var_id in &entry.interface {
            let var = self.module.vars.get(var_id)?;
            if var.store_cls != storage {
                continue;
            }
            if var.decoration.patch != patch {
                continue;
            }
            if var.decoration.builtin == Some(BuiltIn::PointSize) && patch {
                continue;
            }

            let ty = self.module.types.get(var.ty)?.clone();
            self.check_supported_shape(&ty, var_id.0)?;
            if var.decoration.per_vertex_khr {
                return Err(Error::unsupported_shape(
                    "Metal has no counterpart for the PerVertexKHR decoration",
                    Some(var_id.0),
                ));
            }

            if let Some(builtin) = var.decoration.builtin {
                if builtin == BuiltIn::DrawIndex {
                    return Err(Error::unsupported_shape(
                        "Metal does not provide a DrawIndex builtin",
                        Some(var_id.0),
                    ));
                }
                if is_fixup_only_builtin(builtin) {
                    continue;
                }
                let attribute = builtin_msl_attribute(builtin, self.stage, storage)?;
                let location = var.decoration.location.or_else(|| {
                    // Builtins without an explicit location still occupy one
                    // in the struct's declaration order, but are not part
                    // of the numeric location space (§4.2 "Location
                    // allocation" only concerns located variables).
                    None
                });
                accepted.push(InterfaceMember {
                    name: var
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{}_{:?}", attribute, builtin)),
                    ty,
                    location,
                    builtin: Some(builtin),
                    origin_struct: TypeId(0),
                    origin_index,
                    sources: vec![ComponentSlice {
                        var: var_id,
                        component_offset: 0,
                        vecsize: 0,
                    }],
                });
                origin_index += 1;
                continue;
            }

            let location = var
                .decoration
                .location
                .unwrap_or_else(|| self.alloc_location());
            let component = var.decoration.component.unwrap_or(0);

            if runtime_linkage {
                let base_ty = ty
                    .scalar_elem()
                    .ok_or_else(|| Error::unsupported_shape("packed interface member must be scalar/vector", Some(var_id.0)))?;
                packed
                    .entry(location)
                    .or_default()
                    .push((var_id, component, ty.vector_size().max(1), base_ty));
                origin_index += 1;
            } else if ty.needs_flattening_for_stage_io() {
                // §4.2 "composites ... are flattened": a struct/array-typed
                // stage-IO variable expands into one leaf member per
                // scalar/vector field instead of a single composite member,
                // since Metal's `stage_in`/`stage_out` structs only accept
                // scalar/vector/resource members directly.
                let base_name = var.name.clone().unwrap_or_else(|| format!("in_{}", var_id.0));
                let mut next_location = location;
                add_composite(var_id, &base_name, &ty, &mut next_location, &mut origin_index, &mut accepted)?;
                self.next_free_location = self.next_free_location.max(next_location);
            } else {
                accepted.push(InterfaceMember {
                    name: var.name.clone().unwrap_or_else(|| format!("in_{}", var_id.0)),
                    ty,
                    location: Some(location),
                    builtin: None,
                    origin_struct: TypeId(0),
                    origin_index,
                    sources: Vec::new(),
                });
                origin_index += 1;
            }
        }

        // Emit one packed `m_location_N` member per location (§4.2
        // "Component packing").
        let mut locations: Vec<_> = packed.keys().copied().collect();
        locations.sort_unstable();
        for location in locations {
            let slices = &packed[&location];
            let union_size = slices
                .iter()
                .map(|(_, comp, size, _)| comp + size)
                .max()
                .unwrap_or(0)
                .min(4);
            let base_ty = slices[0].3;
            let ty = if union_size <= 1 {
                Type::Scalar(base_ty)
            } else {
                Type::Vector {
                    elem: base_ty,
                    size: union_size,
                }
            };
            accepted.push(InterfaceMember {
                name: format!("m_location_{}", location),
                ty,
                location: Some(location),
                builtin: None,
                origin_struct: TypeId(0),
                origin_index,
                sources: slices
                    .iter()
                    .map(|(var, comp, size, _)| ComponentSlice {
                        var: *var,
                        component_offset: *comp,
                        vecsize: *size,
                    })
                    .collect(),
            });
            origin_index += 1;
        }

        if accepted.is_empty() {
            // §4.2: "0 if nothing qualifies (with a documented exception
            // for tessellation evaluation patch inputs)".
            if self.stage == ExecutionModel::TessellationEvaluation && storage == StorageClass::Input && patch {
                // patch-in structs may legitimately be empty pass-throughs.
            }
            return Ok(None);
        }

        // §4.2 "Member ordering": stable sort, preserving pre-sort indices
        // via `origin_index` already captured on each member.
        accepted.sort_by(|a, b| member_sort_key(a).cmp(&member_sort_key(b)));

        let struct_id = self.module.alloc_type_id();
        let members: Vec<StructMember> = accepted
            .iter()
            .map(|m| StructMember {
                name: Some(m.name.clone()),
                ty: Box::new(m.ty.clone()),
                offset: None,
            })
            .collect();
        self.module.set_type(
            struct_id,
            Type::Struct {
                name: Some(stage_struct_name(self.stage, storage, patch)),
                members,
                self_id: struct_id,
            },
        )?;
        for m in accepted.iter_mut() {
            m.origin_struct = struct_id;
        }

        let var_ty = self.module.alloc_type_id();
        self.module.set_type(
            var_ty,
            Type::Pointer {
                pointee: Box::new(self.module.types.get(struct_id)?.clone()),
                store_cls: storage.into(),
            },
        )?;
        let block_var = self.module.alloc_var_id();
        self.module
            .set_var(block_var, spvmsl_core::var::Variable::new(var_ty, storage))?;
        self.module.vars.get_mut(block_var)?.extended = ExtendedDecoration {
            interface_origin_id: Some(struct_id),
            ..Default::default()
        };

        Ok(Some(InterfaceBlock {
            struct_ty: struct_id,
            var: block_var,
            members: accepted,
        }))
    }

    /// §4.2 "Failure modes": matrices/multi-dim arrays can't sit directly
    /// in a `stage_in`/`stage_out` member. (The `PerVertexKHR` failure mode
    /// is a decoration check, not a shape check, and is rejected inline in
    /// `add_interface_block` above.)
    fn check_supported_shape(&self, ty: &Type, id: u32) -> Result<()> {
        match ty {
            Type::Matrix { .. } => Err(Error::unsupported_shape(
                "MSL cannot emit arrays-of-matrices in input and output variables.",
                Some(id),
            )),
            Type::Array { elem, .. } if elem.is_array() => Err(Error::unsupported_shape(
                "MSL cannot emit arrays-of-matrices in input and output variables.",
                Some(id),
            )),
            Type::Array { elem, .. } if elem.is_matrix() => Err(Error::unsupported_shape(
                "MSL cannot emit arrays-of-matrices in input and output variables.",
                Some(id),
            )),
            _ => Ok(()),
        }
    }
}

/// Renders the full `struct { ... };` declaration for an assembled
/// interface block (§4.2 "Builtin redirection" for the attribute on each
/// member; §6 "`[[user(locnN)]]`" naming for located non-builtin members).
pub fn render_interface_struct(
    block: &InterfaceBlock,
    name: &str,
    stage: ExecutionModel,
    storage: StorageClass,
) -> Result<String> {
    let mut out = format!("struct {} {{\n", name);
    for member in &block.members {
        let attribute = match member.builtin {
            Some(b) => builtin_msl_attribute(b, stage, storage)?.to_string(),
            None => format!("user(locn{})", member.location.unwrap_or(0)),
        };
        out.push_str(&format!(
            "    {} {} [[{}]];\n",
            member.ty, member.name, attribute
        ));
    }
    out.push_str("};\n");
    Ok(out)
}

/// Builds the `FixupHook::ComponentPackingRestore` entries a packed
/// stage-IO block implies: one per real (`vecsize > 0`) `ComponentSlice`,
/// restoring each source variable's own slice of the shared `m_location_N`
/// member (§4.2 "Component packing": per-variable reads/writes resolve
/// against a swizzle of the packed member"). Members whose sources are
/// single `vecsize == 0` placeholders (plain, builtin, or flattened
/// members) need no restore and are skipped.
pub fn component_restore_fixups(block: &InterfaceBlock) -> Vec<FixupHook> {
    let mut hooks = Vec::new();
    for member in &block.members {
        for source in &member.sources {
            if source.vecsize == 0 {
                continue;
            }
            hooks.push(FixupHook::ComponentPackingRestore {
                source: source.var,
                member_name: member.name.clone(),
                component_offset: source.component_offset,
                vecsize: source.vecsize,
            });
        }
    }
    hooks
}

/// §4.2 "AddPlainVariable": the interface member for a non-composite
/// (scalar/vector) interface variable — no recursion needed.
pub fn add_plain_variable(var_id: VariableId, name: String, ty: Type, location: u32, origin_index: u32) -> InterfaceMember {
    InterfaceMember {
        name,
        ty,
        location: Some(location),
        builtin: None,
        origin_struct: TypeId(0),
        origin_index,
        sources: vec![ComponentSlice {
            var: var_id,
            component_offset: 0,
            vecsize: 0,
        }],
    }
}

/// §4.2 "AddPlainMember": the leaf case reached while recursively
/// flattening a composite — one scalar/vector member taking the next free
/// location and origin index.
fn add_plain_member(
    var_id: VariableId,
    name: String,
    ty: Type,
    next_location: &mut u32,
    next_origin_index: &mut u32,
    out: &mut Vec<InterfaceMember>,
) {
    let location = *next_location;
    *next_location += 1;
    let origin_index = *next_origin_index;
    *next_origin_index += 1;
    out.push(InterfaceMember {
        name,
        ty,
        location: Some(location),
        builtin: None,
        origin_struct: TypeId(0),
        origin_index,
        sources: vec![ComponentSlice {
            var: var_id,
            component_offset: 0,
            vecsize: 0,
        }],
    });
}

/// §4.2 "AddCompositeMember": dispatches one member of a composite to
/// either a nested composite (`AddComposite`, recursing) or a leaf
/// (`AddPlainMember`).
fn add_composite_member(
    var_id: VariableId,
    name: String,
    ty: &Type,
    next_location: &mut u32,
    next_origin_index: &mut u32,
    out: &mut Vec<InterfaceMember>,
) -> Result<()> {
    if ty.needs_flattening_for_stage_io() {
        add_composite(var_id, &name, ty, next_location, next_origin_index, out)
    } else {
        add_plain_member(var_id, name, ty.clone(), next_location, next_origin_index, out);
        Ok(())
    }
}

/// §4.2 "AddComposite": recursively flattens a matrix/array/struct-typed
/// interface variable into one `AddPlainMember` leaf per scalar/vector
/// component, naming each leaf by its dotted path from the root variable
/// (§4.2 "composites ... are flattened"). Struct members recurse by field
/// name, array elements by index, and matrix columns by column index (each
/// column becomes its own `rows`-sized vector leaf, matching how Metal
/// only accepts vectors, not matrices, as `stage_in`/`stage_out` members).
pub fn add_composite(
    var_id: VariableId,
    base_name: &str,
    ty: &Type,
    next_location: &mut u32,
    next_origin_index: &mut u32,
    out: &mut Vec<InterfaceMember>,
) -> Result<()> {
    match ty {
        Type::Struct { members, .. } => {
            for (i, member) in members.iter().enumerate() {
                let member_name = member.name.clone().unwrap_or_else(|| format!("_m{}", i));
                add_composite_member(
                    var_id,
                    format!("{}_{}", base_name, member_name),
                    &member.ty,
                    next_location,
                    next_origin_index,
                    out,
                )?;
            }
            Ok(())
        }
        Type::Array { elem, len, .. } => {
            let count = match len {
                ArrayLength::Literal(n) => *n,
                _ => {
                    return Err(Error::unsupported_shape(
                        "a stage-IO composite array must have a literal length",
                        Some(var_id.0),
                    ))
                }
            };
            for i in 0..count {
                add_composite_member(var_id, format!("{}_{}", base_name, i), elem, next_location, next_origin_index, out)?;
            }
            Ok(())
        }
        Type::Matrix { elem, cols, rows, .. } => {
            for c in 0..*cols {
                let col_ty = Type::Vector { elem: *elem, size: *rows };
                add_composite_member(var_id, format!("{}_{}", base_name, c), &col_ty, next_location, next_origin_index, out)?;
            }
            Ok(())
        }
        leaf => {
            add_plain_member(var_id, base_name.to_string(), leaf.clone(), next_location, next_origin_index, out);
            Ok(())
        }
    }
}

/// §4.2 "AddTessLevelInput": on a tessellation-evaluation entry point the
/// outer/inner tess-level builtins aren't read directly off a variable —
/// Metal delivers them pre-packed in a half-precision factors struct keyed
/// by patch topology (triangle: 3 outer + 1 inner; quad: 4 outer + 2
/// inner, §8 property 6). Returns the factors struct's name and member
/// list for that input.
pub fn add_tess_level_input(topology: crate::tessellation::TessTopology) -> (&'static str, Vec<(&'static str, &'static str)>) {
    let mut members = vec![("edgeTessellationFactor", "half")];
    if topology.inner_count() > 0 {
        members.push(("insideTessellationFactor", "half"));
    }
    (topology.factors_struct_name(), members)
}

/// The read-back expression for one outer tess-level component out of the
/// packed half-precision factors struct (§4.2 "AddTessLevelInput"), cast up
/// to `float` to match `gl_TessLevelOuter`'s SPIR-V type.
pub fn tess_level_outer_component_expr(patch_factors_expr: &str, component: u32) -> String {
    format!("float({}.edgeTessellationFactor[{}])", patch_factors_expr, component)
}

/// The read-back expression for one inner tess-level component.
pub fn tess_level_inner_component_expr(patch_factors_expr: &str, component: u32) -> String {
    format!("float({}.insideTessellationFactor[{}])", patch_factors_expr, component)
}

fn stage_struct_name(stage: ExecutionModel, storage: StorageClass, patch: bool) -> String {
    let dir = match storage {
        StorageClass::Input => "in",
        StorageClass::Output => "out",
        _ => "io",
    };
    let patch_tag = if patch { "_patch" } else { "" };
    format!("{:?}{}_{}", stage, patch_tag, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;

    fn float3() -> Type {
        Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 3,
        }
    }
    fn float1() -> Type {
        Type::Scalar(ScalarType::Float { bits: 32 })
    }

    /// §8 S1: two fragment inputs at (location=0, component=0, float3) and
    /// (location=0, component=3, float) pack into one `float4 m_location_0`.
    #[test]
    fn s1_vertex_to_fragment_location_pack() {
        let mut b = ModuleBuilder::new();
        let f3 = b.add_type(float3());
        let f1 = b.add_type(float1());
        let in0 = b.add_variable(f3, StorageClass::Input);
        b.decorate(in0, |d| {
            d.location = Some(0);
            d.component = Some(0);
        })
        .unwrap();
        let in1 = b.add_variable(f1, StorageClass::Input);
        b.decorate(in1, |d| {
            d.location = Some(0);
            d.component = Some(3);
        })
        .unwrap();
        b.set_entry_point("main", ExecutionModel::Fragment, vec![in0, in1]);
        let mut module = b.build();

        let mut asm = InterfaceAssembler::new(&mut module, ExecutionModel::Fragment, false);
        let block = asm.add_interface_block(StorageClass::Input, false).unwrap().unwrap();
        assert_eq!(block.members.len(), 1);
        let m = &block.members[0];
        assert_eq!(m.name, "m_location_0");
        assert_eq!(m.ty.vector_size(), 4);
        assert_eq!(m.sources.len(), 2);

        let rendered = render_interface_struct(&block, "main_in", ExecutionModel::Fragment, StorageClass::Input).unwrap();
        assert!(rendered.contains("float4 m_location_0 [[user(locn0)]];"));

        let hooks = component_restore_fixups(&block);
        assert_eq!(hooks.len(), 2);
        assert!(hooks.iter().any(|h| matches!(
            h,
            FixupHook::ComponentPackingRestore { source, member_name, component_offset: 0, vecsize: 3 }
                if *source == in0 && member_name == "m_location_0"
        )));
        assert!(hooks.iter().any(|h| matches!(
            h,
            FixupHook::ComponentPackingRestore { source, member_name, component_offset: 3, vecsize: 1 }
                if *source == in1 && member_name == "m_location_0"
        )));
    }

    #[test]
    fn matrix_in_stage_in_is_rejected() {
        let mut b = ModuleBuilder::new();
        let mat = b.add_type(Type::Matrix {
            elem: ScalarType::Float { bits: 32 },
            cols: 4,
            rows: 4,
            layout: spvmsl_core::ty::MatrixLayout::ColumnMajor,
            stride: None,
        });
        let v = b.add_variable(mat, StorageClass::Input);
        b.decorate(v, |d| d.location = Some(0)).unwrap();
        b.set_entry_point("main", ExecutionModel::Vertex, vec![v]);
        let mut module = b.build();
        let mut asm = InterfaceAssembler::new(&mut module, ExecutionModel::Vertex, false);
        let err = asm.add_interface_block(StorageClass::Input, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }

    /// A `float2x2` interface variable flattens into two `float2` column
    /// leaves (§4.2 `AddComposite`), each at its own location.
    #[test]
    fn add_composite_flattens_matrix_into_column_leaves() {
        let mut b = ModuleBuilder::new();
        let f1 = b.add_type(float1());
        let v = b.add_variable(f1, StorageClass::Output);
        let mat = Type::Matrix {
            elem: ScalarType::Float { bits: 32 },
            cols: 2,
            rows: 2,
            layout: spvmsl_core::ty::MatrixLayout::ColumnMajor,
            stride: None,
        };
        let mut out = Vec::new();
        let mut loc = 3u32;
        let mut origin = 0u32;
        add_composite(v, "m", &mat, &mut loc, &mut origin, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "m_0");
        assert_eq!(out[0].location, Some(3));
        assert_eq!(out[1].name, "m_1");
        assert_eq!(out[1].location, Some(4));
        assert_eq!(out[0].ty.vector_size(), 2);
    }

    /// A struct containing a nested array of scalars flattens recursively
    /// through `AddCompositeMember` down to `AddPlainMember` leaves.
    #[test]
    fn add_composite_flattens_nested_struct_and_array() {
        let v = VariableId(99);
        let inner = Type::Array {
            elem: Box::new(float1()),
            len: spvmsl_core::ty::ArrayLength::Literal(2),
            stride: None,
        };
        let outer = Type::Struct {
            name: Some("Nested".into()),
            members: vec![StructMember {
                name: Some("vals".into()),
                ty: Box::new(inner),
                offset: None,
            }],
            self_id: TypeId(1),
        };
        let mut out = Vec::new();
        let mut loc = 0u32;
        let mut origin = 0u32;
        add_composite(v, "root", &outer, &mut loc, &mut origin, &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "root_vals_0");
        assert_eq!(out[1].name, "root_vals_1");
    }

    /// A struct-typed stage-out variable is flattened through
    /// `add_composite` by `add_interface_block` itself rather than
    /// surfacing as a single composite member (§4.2 "composites ... are
    /// flattened").
    #[test]
    fn add_interface_block_flattens_a_struct_typed_output() {
        let mut b = ModuleBuilder::new();
        let struct_ty = b.add_type(Type::Struct {
            name: Some("Unused".into()),
            members: vec![
                StructMember {
                    name: Some("a".into()),
                    ty: Box::new(float1()),
                    offset: None,
                },
                StructMember {
                    name: Some("b".into()),
                    ty: Box::new(float1()),
                    offset: None,
                },
            ],
            self_id: TypeId(0),
        });
        let v = b.add_variable(struct_ty, StorageClass::Output);
        b.decorate(v, |d| d.location = Some(0)).unwrap();
        b.set_entry_point("vert_main", ExecutionModel::Vertex, vec![v]);
        let mut module = b.build();

        let mut asm = InterfaceAssembler::new(&mut module, ExecutionModel::Vertex, false);
        let block = asm.add_interface_block(StorageClass::Output, false).unwrap().unwrap();
        assert_eq!(block.members.len(), 2);
        assert!(block.members.iter().any(|m| m.name.ends_with("_a")));
        assert!(block.members.iter().any(|m| m.name.ends_with("_b")));
        assert_eq!(block.members[0].location, Some(0));
        assert_eq!(block.members[1].location, Some(1));
    }

    /// §8 property 6: triangle topology packs 3 outer + 1 inner half
    /// factors; quad packs 4 outer + 2 inner.
    #[test]
    fn add_tess_level_input_matches_topology_member_counts() {
        let (name, members) = add_tess_level_input(crate::tessellation::TessTopology::Triangles);
        assert_eq!(name, "MTLTriangleTessellationFactorsHalf");
        assert_eq!(members.len(), 2);

        let (quad_name, quad_members) = add_tess_level_input(crate::tessellation::TessTopology::Quads);
        assert_eq!(quad_name, "MTLQuadTessellationFactorsHalf");
        assert_eq!(quad_members.len(), 2);

        let (iso_name, iso_members) = add_tess_level_input(crate::tessellation::TessTopology::Isolines);
        assert_eq!(iso_name, "MTLQuadTessellationFactorsHalf");
        assert_eq!(iso_members.len(), 1);
    }

    #[test]
    fn tess_level_component_expressions_cast_half_to_float() {
        assert_eq!(
            tess_level_outer_component_expr("patch", 2),
            "float(patch.edgeTessellationFactor[2])"
        );
        assert_eq!(
            tess_level_inner_component_expr("patch", 0),
            "float(patch.insideTessellationFactor[0])"
        );
    }

    #[test]
    fn draw_index_builtin_is_rejected() {
        let mut b = ModuleBuilder::new();
        let u = b.add_type(Type::Scalar(ScalarType::Integer { bits: 32, is_signed: false }));
        let v = b.add_variable(u, StorageClass::Input);
        b.decorate(v, |d| d.builtin = Some(BuiltIn::DrawIndex)).unwrap();
        b.set_entry_point("main", ExecutionModel::Vertex, vec![v]);
        let mut module = b.build();
        let mut asm = InterfaceAssembler::new(&mut module, ExecutionModel::Vertex, false);
        let err = asm.add_interface_block(StorageClass::Input, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }

    #[test]
    fn per_vertex_khr_decoration_is_rejected() {
        let mut b = ModuleBuilder::new();
        let f4 = b.add_type(Type::Vector { elem: ScalarType::Float { bits: 32 }, size: 4 });
        let v = b.add_variable(f4, StorageClass::Input);
        b.decorate(v, |d| {
            d.location = Some(0);
            d.per_vertex_khr = true;
        })
        .unwrap();
        b.set_entry_point("main", ExecutionModel::Fragment, vec![v]);
        let mut module = b.build();
        let mut asm = InterfaceAssembler::new(&mut module, ExecutionModel::Fragment, false);
        let err = asm.add_interface_block(StorageClass::Input, false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }
}
