//! C5: Access Chain & Layout Rewriter (§4.5).
use fnv::{FnvHashMap, FnvHashSet};

use spvmsl_core::error::{Error, Result};
use spvmsl_core::id::TypeId;
use spvmsl_core::ty::{ArrayLength, StructMember, Type, TypeRegistry};

/// Step A: any struct used in a uniform/storage/push-constant/physical-
/// storage buffer is "packable"; any struct used in workgroup storage is a
/// "workgroup struct" (§4.5 step A).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructRole {
    Packable,
    Workgroup,
}

/// A single member-packing decision from steps B/C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberFix {
    /// Use a `packed_*` declaration for this member in place of the natural
    /// MSL vector/matrix type.
    Pack,
    /// Insert `char _mN_pad[bytes]` before this member.
    PadBefore { bytes: u32 },
    /// Replace the member's matrix with its transposed physical shape
    /// (§4.5 step C "Row-major matrix: transpose dimensions").
    TransposePhysical,
    /// Pad a `vec3` element to `vec4` inside an array (§4.5 step C
    /// "Vector-in-std140-array").
    PadVec3ToVec4InArray,
    None,
}

/// Result of analyzing one struct's members (steps B/C/D combined).
pub struct StructLayoutPlan {
    pub member_fixes: Vec<MemberFix>,
    /// Set by step B when any member requires packing.
    pub physical_type_packed: bool,
    /// Set when this struct's natural MSL size exceeds the SPIR-V array
    /// stride it's used at (§4.5 step B last sentence).
    pub padding_target_bytes: Option<u32>,
}

pub struct LayoutRewriter<'t> {
    types: &'t TypeRegistry,
    /// "An `aligned_structs` memo prevents redundant work on shared types"
    /// (§4.5 step D).
    aligned_structs: FnvHashSet<TypeId>,
}

impl<'t> LayoutRewriter<'t> {
    pub fn new(types: &'t TypeRegistry) -> Self {
        Self {
            types,
            aligned_structs: FnvHashSet::default(),
        }
    }

    /// Step B + C: compares each member's SPIR-V declared offset against
    /// MSL's natural offset given current alignment, and decides a fix.
    pub fn analyze(&mut self, members: &[StructMember], used_array_stride: Option<u32>) -> Result<StructLayoutPlan> {
        let mut fixes = Vec::with_capacity(members.len());
        let mut physical_type_packed = false;
        let mut natural_offset: u32 = 0;

        for (i, member) in members.iter().enumerate() {
            let declared = member
                .offset
                .ok_or_else(|| Error::layout_impossible("struct member has no declared offset", None))?;
            let align = member.ty.natural_align() as u32;
            let aligned_natural = round_up(natural_offset, align);

            let mut fix = MemberFix::None;

            if declared < aligned_natural {
                // SPIR-V packed this member tighter than MSL would; the
                // vector/matrix must be declared `packed_*` (§4.5 step B).
                physical_type_packed = true;
                fix = MemberFix::Pack;
            } else if declared > aligned_natural {
                let pad = declared - natural_offset;
                fix = MemberFix::PadBefore { bytes: pad };
            }

            if let Type::Array { stride: Some(stride), elem, .. } = &member.ty {
                let natural_elem = elem.natural_size() as u32;
                // "array stride doesn't match (with a one-element exemption)"
                let elem_count = array_len_for_exemption(&member.ty);
                if *stride < natural_elem && elem_count > 1 {
                    fix = match fix {
                        MemberFix::None => MemberFix::PadVec3ToVec4InArray,
                        other => other,
                    };
                    physical_type_packed = true;
                }
            }

            if let Type::Matrix { stride: Some(stride), layout, .. } = &member.ty {
                let natural_stride = member.ty.natural_align() as u32;
                if *stride != natural_stride {
                    fix = MemberFix::Pack;
                    physical_type_packed = true;
                }
                if *layout == spvmsl_core::ty::MatrixLayout::RowMajor {
                    fix = MemberFix::TransposePhysical;
                }
            }

            natural_offset = declared + member_emitted_size(&member.ty, &fix);
            let _ = i;
            fixes.push(fix);
        }

        let padding_target_bytes = match used_array_stride {
            Some(stride) if (natural_offset) > stride => {
                return Err(Error::layout_impossible(
                    "array stride smaller than the struct's natural MSL size",
                    None,
                ));
            }
            Some(stride) if natural_offset < stride => Some(stride),
            _ => None,
        };

        Ok(StructLayoutPlan {
            member_fixes: fixes,
            physical_type_packed,
            padding_target_bytes,
        })
    }

    /// Step D: "align_struct". Returns the list of `(insert_before_index,
    /// pad_bytes)` synthetic padding members to splice in, honoring the
    /// per-type memo so repeated struct uses aren't recomputed.
    pub fn align_struct(&mut self, self_id: TypeId, plan: &StructLayoutPlan) -> Vec<(usize, u32)> {
        if self.aligned_structs.contains(&self_id) {
            return Vec::new();
        }
        self.aligned_structs.insert(self_id);
        plan.member_fixes
            .iter()
            .enumerate()
            .filter_map(|(i, fix)| match fix {
                MemberFix::PadBefore { bytes } => Some((i, *bytes)),
                _ => None,
            })
            .collect()
    }
}

fn round_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        offset
    } else {
        (offset + align - 1) / align * align
    }
}

fn array_len_for_exemption(ty: &Type) -> u32 {
    if let Type::Array { len, .. } = ty {
        match len {
            ArrayLength::Literal(n) => *n,
            _ => 2,
        }
    } else {
        0
    }
}

fn member_emitted_size(ty: &Type, fix: &MemberFix) -> u32 {
    match fix {
        MemberFix::Pack | MemberFix::PadVec3ToVec4InArray => packed_size(ty) as u32,
        _ => ty.natural_size() as u32,
    }
}

/// §4.5 step E "emit-time cast-through": the MSL spelling of a member's
/// type once a `MemberFix` decision has been made for it: `packed_*` for
/// `Pack`/`PadVec3ToVec4InArray`, a transposed `matrix` shape for
/// `TransposePhysical`, the type's own `Display` otherwise.
pub fn msl_member_type_name(ty: &Type, fix: &MemberFix) -> String {
    match fix {
        MemberFix::Pack | MemberFix::PadVec3ToVec4InArray => match ty {
            Type::Vector { elem, size } => format!("packed_{}{}", elem, size),
            Type::Matrix { elem, cols, rows, .. } => format!("packed_{}{}x{}", elem, cols, rows),
            Type::Array { elem, len, .. } => {
                let inner = msl_member_type_name(elem, &MemberFix::Pack);
                match len {
                    ArrayLength::Literal(n) => format!("spvUnsafeArray<{}, {}>", inner, n),
                    ArrayLength::SpecConstant(id) => format!("spvUnsafeArray<{}, {}>", inner, id),
                    ArrayLength::Runtime => format!("{}*", inner),
                }
            }
            other => format!("{}", other),
        },
        MemberFix::TransposePhysical => match ty {
            // §4.5 step C: row-major matrices defer transposition by
            // declaring the physical type with columns/rows swapped.
            Type::Matrix { elem, cols, rows, .. } => format!("{}{}x{}", elem, rows, cols),
            other => format!("{}", other),
        },
        MemberFix::PadBefore { .. } | MemberFix::None => format!("{}", ty),
    }
}

/// Renders one member's declaration line (including a `PadBefore` synthetic
/// padding member emitted immediately ahead of it), per §4.5 step D
/// `align_struct`'s `char _mN_pad[K]` naming (§6 "Naming conventions").
pub fn render_struct(name: &str, members: &[StructMember], plan: &StructLayoutPlan) -> String {
    let mut out = format!("struct {} {{\n", name);
    for (i, member) in members.iter().enumerate() {
        let fix = plan.member_fixes.get(i).unwrap_or(&MemberFix::None);
        if let MemberFix::PadBefore { bytes } = fix {
            out.push_str(&format!("    char _m{}_pad[{}];\n", i, bytes));
        }
        let ty_name = msl_member_type_name(&member.ty, fix);
        let member_name = member.name.clone().unwrap_or_else(|| format!("_m{}", i));
        out.push_str(&format!("    {} {};\n", ty_name, member_name));
    }
    if let Some(target) = plan.padding_target_bytes {
        out.push_str(&format!("    // padded to array stride {} bytes\n", target));
    }
    out.push_str("};\n");
    out
}

/// The packed (no vec3→vec4 rounding) size of a type, used once a member is
/// marked "packed physical type" (§4.5 step E unpack/pack math).
pub fn packed_size(ty: &Type) -> usize {
    match ty {
        Type::Vector { elem, size } => *size as usize * elem.nbyte(),
        Type::Matrix { elem, cols, rows, .. } => *cols as usize * *rows as usize * elem.nbyte(),
        Type::Array { elem, len, stride } => {
            let count = match len {
                ArrayLength::Literal(n) => *n as usize,
                _ => 1,
            };
            stride.map(|s| s as usize).unwrap_or_else(|| packed_size(elem)) * count
        }
        other => other.natural_size(),
    }
}

/// One `OpAccessChain` index: a compile-time constant (struct member /
/// literal array index) or a dynamic one rendered as an expression string
/// (§4.5 "Access chain walker" accepts either).
#[derive(Debug, Clone)]
pub enum AccessIndex {
    Constant(u32),
    Dynamic(String),
}
impl AccessIndex {
    fn as_constant(&self) -> Option<u32> {
        match self {
            AccessIndex::Constant(n) => Some(*n),
            AccessIndex::Dynamic(_) => None,
        }
    }
    fn render(&self) -> String {
        match self {
            AccessIndex::Constant(n) => n.to_string(),
            AccessIndex::Dynamic(expr) => expr.clone(),
        }
    }
}

/// The outcome of walking an access chain to its final step (§4.5 "Access
/// chain walker"): the rendered member/subscript expression, the logical
/// (pre-layout-fix) result type, and whether the final hop crossed a
/// `packed_*` or row-major-transposed member, which step E's cast-through
/// needs to know about.
#[derive(Debug, Clone)]
pub struct AccessResult {
    pub expr: String,
    pub result_type: Type,
    pub is_packed: bool,
    pub row_major: bool,
}

/// Walks an `OpAccessChain`'s index list against a base type's structure,
/// threading `current_type`/`is_packed`/`row_major` state across every hop
/// (§4.5 step "the walker handles struct, array, matrix, and vector cases,
/// tracking is_packed/row_major/current_type"). `plans` supplies each
/// struct's already-computed `StructLayoutPlan` (by the struct's `self_id`)
/// so member-level pack/transpose decisions don't need to be recomputed
/// mid-walk.
pub struct AccessChainWalker<'t> {
    #[allow(dead_code)]
    types: &'t TypeRegistry,
    plans: &'t FnvHashMap<TypeId, StructLayoutPlan>,
}

impl<'t> AccessChainWalker<'t> {
    pub fn new(types: &'t TypeRegistry, plans: &'t FnvHashMap<TypeId, StructLayoutPlan>) -> Self {
        Self { types, plans }
    }

    pub fn walk(&self, base_expr: &str, base_ty: &Type, indices: &[AccessIndex]) -> Result<AccessResult> {
        let mut expr = base_expr.to_string();
        let mut current_type = base_ty.clone();
        let mut is_packed = false;
        let mut row_major = false;

        for index in indices {
            match &current_type {
                Type::Struct { members, self_id, .. } => {
                    let i = index
                        .as_constant()
                        .ok_or_else(|| Error::invalid_argument("struct member access chain index must be constant"))?
                        as usize;
                    let member = members
                        .get(i)
                        .ok_or_else(|| Error::invalid_argument("access chain struct index out of range"))?;
                    let fix = self
                        .plans
                        .get(self_id)
                        .and_then(|p| p.member_fixes.get(i))
                        .cloned()
                        .unwrap_or(MemberFix::None);
                    let name = member.name.clone().unwrap_or_else(|| format!("_m{}", i));
                    expr = format!("{}.{}", expr, name);
                    is_packed = matches!(fix, MemberFix::Pack | MemberFix::PadVec3ToVec4InArray);
                    row_major = matches!(fix, MemberFix::TransposePhysical);
                    current_type = (*member.ty).clone();
                }
                Type::Array { elem, .. } => {
                    expr = format!("{}[{}]", expr, index.render());
                    current_type = (**elem).clone();
                    // A packed/transposed array element carries its parent
                    // struct member's fix forward; the element's own shape
                    // is unaffected by indexing into it.
                }
                Type::Matrix { elem, rows, .. } => {
                    // Column access. A row-major member defers transposition
                    // to the physical declaration (§4.5 step C), so a plain
                    // column index on a logically-transposed matrix must go
                    // through a helper that reads a *row* of the physical
                    // storage instead.
                    if row_major {
                        expr = format!("spvRowMajorColumn({}, {})", expr, index.render());
                    } else {
                        expr = format!("{}[{}]", expr, index.render());
                    }
                    current_type = Type::Vector { elem: *elem, size: *rows };
                    // A matrix's own is_packed is consumed at this step;
                    // the resulting column is a plain vector.
                    is_packed = false;
                }
                Type::Vector { elem, .. } => {
                    expr = format!("{}[{}]", expr, index.render());
                    current_type = Type::Scalar(*elem);
                    is_packed = false;
                    row_major = false;
                }
                other => {
                    return Err(Error::unsupported_shape(
                        format!("access chain cannot index into {:?}", other),
                        None,
                    ));
                }
            }
        }

        Ok(AccessResult {
            expr,
            result_type: current_type,
            is_packed,
            row_major,
        })
    }
}

/// §4.5 step E "emit-time cast-through" for a load: when the access chain
/// terminated on a `packed_*` member the raw expression must be cast back
/// to its logical (unpacked) type; when it terminated on a row-major
/// member the physical (transposed) storage must be transposed back.
pub fn load_cast_through(result: &AccessResult) -> String {
    if result.is_packed {
        format!("{}({})", result.result_type, result.expr)
    } else if result.row_major {
        format!("transpose({})", result.expr)
    } else {
        result.expr.clone()
    }
}

/// §4.5 step E for a store: the inverse cast, applied to the value being
/// written rather than the value being read.
pub fn store_cast_through(result: &AccessResult, value_expr: &str) -> String {
    let rhs = if result.is_packed {
        format!("{}({})", msl_member_type_name(&result.result_type, &MemberFix::Pack), value_expr)
    } else if result.row_major {
        format!("transpose({})", value_expr)
    } else {
        value_expr.to_string()
    };
    format!("{} = {}", result.expr, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvmsl_core::ty::ScalarType;

    fn float2() -> Type {
        Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 2,
        }
    }
    fn float1() -> Type {
        Type::Scalar(ScalarType::Float { bits: 32 })
    }

    /// §8 S4: `{ float2 a[2]; float b; }`, `a[i]` stride 8, `b` offset 16
    /// needs no padding; offset 20 needs a 4-byte pad.
    #[test]
    fn s4_scalar_layout_pad() {
        let registry = TypeRegistry::new();
        let mut rw = LayoutRewriter::new(&registry);

        let members_no_pad = vec![
            StructMember {
                name: Some("a".into()),
                ty: Type::Array {
                    elem: Box::new(float2()),
                    len: ArrayLength::Literal(2),
                    stride: Some(8),
                },
                offset: Some(0),
            },
            StructMember {
                name: Some("b".into()),
                ty: float1(),
                offset: Some(16),
            },
        ];
        let plan = rw.analyze(&members_no_pad, None).unwrap();
        assert!(matches!(plan.member_fixes[1], MemberFix::None));

        let members_pad = vec![
            StructMember {
                name: Some("a".into()),
                ty: Type::Array {
                    elem: Box::new(float2()),
                    len: ArrayLength::Literal(2),
                    stride: Some(8),
                },
                offset: Some(0),
            },
            StructMember {
                name: Some("b".into()),
                ty: float1(),
                offset: Some(20),
            },
        ];
        let plan2 = rw.analyze(&members_pad, None).unwrap();
        assert_eq!(plan2.member_fixes[1], MemberFix::PadBefore { bytes: 4 });
    }

    #[test]
    fn array_stride_smaller_than_struct_is_layout_impossible() {
        let registry = TypeRegistry::new();
        let mut rw = LayoutRewriter::new(&registry);
        let members = vec![StructMember {
            name: Some("a".into()),
            ty: float2(),
            offset: Some(0),
        }];
        let err = rw.analyze(&members, Some(4)).unwrap_err();
        assert!(matches!(err, Error::LayoutImpossible { .. }));
    }

    fn float3() -> Type {
        Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 3,
        }
    }

    /// A packed `float3` member walked to and loaded back must be cast
    /// through its logical `float3` shape (§4.5 step E).
    #[test]
    fn packed_member_load_casts_through_logical_type() {
        let registry = TypeRegistry::new();
        let mut rw = LayoutRewriter::new(&registry);
        let members = vec![
            StructMember {
                name: Some("a".into()),
                ty: float3(),
                offset: Some(0),
            },
            StructMember {
                name: Some("b".into()),
                ty: float3(),
                offset: Some(12),
            },
        ];
        let plan = rw.analyze(&members, None).unwrap();
        assert_eq!(plan.member_fixes[1], MemberFix::Pack);

        let self_id = TypeId(7);
        let struct_ty = Type::Struct {
            name: Some("S".into()),
            members: members.clone(),
            self_id,
        };
        let mut plans = FnvHashMap::default();
        plans.insert(self_id, plan);

        let walker = AccessChainWalker::new(&registry, &plans);
        let result = walker
            .walk("obj", &struct_ty, &[AccessIndex::Constant(1)])
            .unwrap();
        assert_eq!(result.expr, "obj.b");
        assert!(result.is_packed);
        assert_eq!(load_cast_through(&result), "float3(obj.b)");
    }

    /// A row-major matrix member: a plain column index on the logical
    /// (transposed-back) matrix must route through `spvRowMajorColumn`, and
    /// a whole-member load must `transpose` the physical storage.
    #[test]
    fn row_major_matrix_member_uses_row_major_column_and_transpose() {
        let registry = TypeRegistry::new();
        let mut rw = LayoutRewriter::new(&registry);
        let mat = Type::Matrix {
            elem: ScalarType::Float { bits: 32 },
            cols: 4,
            rows: 4,
            layout: spvmsl_core::ty::MatrixLayout::RowMajor,
            stride: Some(16),
        };
        let members = vec![StructMember {
            name: Some("m".into()),
            ty: mat,
            offset: Some(0),
        }];
        let plan = rw.analyze(&members, None).unwrap();
        assert_eq!(plan.member_fixes[0], MemberFix::TransposePhysical);

        let self_id = TypeId(9);
        let struct_ty = Type::Struct {
            name: Some("S".into()),
            members: members.clone(),
            self_id,
        };
        let mut plans = FnvHashMap::default();
        plans.insert(self_id, plan);

        let walker = AccessChainWalker::new(&registry, &plans);
        let whole_member = walker.walk("obj", &struct_ty, &[AccessIndex::Constant(0)]).unwrap();
        assert!(whole_member.row_major);
        assert_eq!(load_cast_through(&whole_member), "transpose(obj.m)");

        let column = walker
            .walk(
                "obj",
                &struct_ty,
                &[AccessIndex::Constant(0), AccessIndex::Dynamic("col".into())],
            )
            .unwrap();
        assert_eq!(column.expr, "spvRowMajorColumn(obj.m, col)");
    }

    /// Indexing a scalar out of a vector clears the packed/row-major state
    /// inherited from its containing struct member.
    #[test]
    fn vector_component_access_clears_packed_state() {
        let registry = TypeRegistry::new();
        let plans = FnvHashMap::default();
        let walker = AccessChainWalker::new(&registry, &plans);
        let base = float3();
        let result = walker.walk("v", &base, &[AccessIndex::Constant(2)]).unwrap();
        assert_eq!(result.expr, "v[2]");
        assert!(!result.is_packed);
        assert_eq!(result.result_type, float1());
    }
}
