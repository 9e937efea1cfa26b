//! The SPIR-V type taxonomy (§3 "Type") and its registry (§4.1 "C1").
use std::fmt;

use fnv::FnvHashMap;
use spirv::{Dim, ImageFormat, StorageClass};

use crate::error::{Error, Result};
use crate::id::TypeId;

/// Scalar kind shared by `Scalar`, and the element kind of `Vector`/`Matrix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Void,
    Boolean,
    Integer { bits: u8, is_signed: bool },
    Float { bits: u8 },
}
impl ScalarType {
    pub fn nbyte(&self) -> usize {
        match self {
            ScalarType::Void => 0,
            ScalarType::Boolean => 4,
            ScalarType::Integer { bits, .. } => (*bits as usize + 7) / 8,
            ScalarType::Float { bits } => (*bits as usize + 7) / 8,
        }
    }
}

/// Array dimension: a literal length, or the ID of a spec constant
/// governing the length (§3 "array dimensions (literal or spec-constant)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayLength {
    Literal(u32),
    SpecConstant(TypeId),
    /// `OpTypeRuntimeArray`: no fixed length, sized at the boundary of a
    /// storage buffer.
    Runtime,
}

/// Image sample/access qualifiers carried by `image`/`sampled-image` types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageType {
    pub sampled_ty: Box<Type>,
    pub dim: DimKind,
    pub depth: Option<bool>,
    pub arrayed: bool,
    pub multisampled: bool,
    /// 0 = unknown at this type (sampled at runtime), 1 = sampled, 2 = storage.
    pub sampled: u8,
    pub format: ImageFormatKind,
}

/// A local mirror of `spirv::Dim` that is `Eq + Hash`-friendly and doesn't
/// require depending on the crate's own (non-`Hash`) enum directly in our
/// derived collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimKind {
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
    Rect,
    Buffer,
    SubpassData,
}
impl From<Dim> for DimKind {
    fn from(d: Dim) -> Self {
        match d {
            Dim::Dim1D => DimKind::Dim1D,
            Dim::Dim2D => DimKind::Dim2D,
            Dim::Dim3D => DimKind::Dim3D,
            Dim::DimCube => DimKind::Cube,
            Dim::DimRect => DimKind::Rect,
            Dim::DimBuffer => DimKind::Buffer,
            Dim::DimSubpassData => DimKind::SubpassData,
            #[allow(unreachable_patterns)]
            _ => DimKind::Dim2D,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormatKind {
    Unknown,
    Known(u32),
}
impl From<ImageFormat> for ImageFormatKind {
    fn from(f: ImageFormat) -> Self {
        match f {
            ImageFormat::Unknown => ImageFormatKind::Unknown,
            other => ImageFormatKind::Known(other as u32),
        }
    }
}

/// One member of a `Struct` type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: Box<Type>,
    /// SPIR-V-declared byte offset (`OpMemberDecorate Offset`).
    pub offset: Option<u32>,
}

/// Row-major vs column-major, for matrix types (§4.5 "row-major").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatrixLayout {
    ColumnMajor,
    RowMajor,
}

/// The full type taxonomy from §3: "kind ∈ {scalar, vector, matrix, array,
/// struct, pointer, image, sampler, sampled-image, acceleration-structure,
/// ray-query, control-point-array, interpolant}".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarType),
    Vector {
        elem: ScalarType,
        size: u32,
    },
    Matrix {
        elem: ScalarType,
        cols: u32,
        rows: u32,
        layout: MatrixLayout,
        /// SPIR-V `MatrixStride`, when declared.
        stride: Option<u32>,
    },
    Array {
        elem: Box<Type>,
        len: ArrayLength,
        /// SPIR-V `ArrayStride`, when declared.
        stride: Option<u32>,
    },
    Struct {
        name: Option<String>,
        members: Vec<StructMember>,
        /// Self-ID, stable across member reorderings (§3 invariant 1).
        self_id: TypeId,
    },
    Pointer {
        pointee: Box<Type>,
        store_cls: StorageClassKind,
    },
    /// Forward-declared `PhysicalStorageBuffer` pointee, resolved later
    /// (§9 "Cyclic struct references").
    ForwardPointer { store_cls: StorageClassKind },
    Image(ImageType),
    Sampler,
    SampledImage(Box<Type>),
    AccelerationStructure,
    RayQuery,
    /// A flattened array of per-control-point structs used by tessellation
    /// stages (`gl_in`/`gl_out`, §4.3).
    ControlPointArray {
        elem: Box<Type>,
        control_points: u32,
    },
    /// A pull-model fragment interpolant (§4.7 "Pull-model interpolation").
    Interpolant(Box<Type>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClassKind {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    CrossWorkgroup,
    Private,
    Function,
    Generic,
    PushConstant,
    AtomicCounter,
    Image,
    StorageBuffer,
    PhysicalStorageBuffer,
}
impl From<StorageClass> for StorageClassKind {
    fn from(s: StorageClass) -> Self {
        use StorageClassKind::*;
        match s {
            StorageClass::UniformConstant => UniformConstant,
            StorageClass::Input => Input,
            StorageClass::Uniform => Uniform,
            StorageClass::Output => Output,
            StorageClass::Workgroup => Workgroup,
            StorageClass::CrossWorkgroup => CrossWorkgroup,
            StorageClass::Private => Private,
            StorageClass::Function => Function,
            StorageClass::Generic => Generic,
            StorageClass::PushConstant => PushConstant,
            StorageClass::AtomicCounter => AtomicCounter,
            StorageClass::Image => Image,
            StorageClass::StorageBuffer => StorageBuffer,
            StorageClass::PhysicalStorageBuffer => PhysicalStorageBuffer,
            #[allow(unreachable_patterns)]
            _ => Private,
        }
    }
}

impl Type {
    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Type::Matrix { .. })
    }
    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array { .. })
    }
    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct { .. })
    }

    /// Number of vector components, for `Vector`/`Scalar` types (used when
    /// computing component-packing unions, §4.2).
    pub fn vector_size(&self) -> u32 {
        match self {
            Type::Vector { size, .. } => *size,
            Type::Scalar(_) => 1,
            _ => 0,
        }
    }

    pub fn scalar_elem(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar(s) => Some(*s),
            Type::Vector { elem, .. } => Some(*elem),
            Type::Matrix { elem, .. } => Some(*elem),
            _ => None,
        }
    }

    /// Whether this type, if it appears in an input/output interface block,
    /// cannot be expressed as a `stage_in`/`stage_out` member directly and
    /// must be flattened (§4.2 "composites ... are flattened").
    pub fn needs_flattening_for_stage_io(&self) -> bool {
        matches!(self, Type::Matrix { .. } | Type::Array { .. } | Type::Struct { .. })
    }

    /// MSL's natural (unpacked) size in bytes, ignoring any packing applied
    /// by the layout rewriter (§4.5 step B compares against this).
    pub fn natural_size(&self) -> usize {
        match self {
            Type::Scalar(s) => s.nbyte(),
            Type::Vector { elem, size } => natural_vector_size(*size) * elem.nbyte(),
            Type::Matrix {
                elem, cols, rows, ..
            } => *cols as usize * natural_vector_size(*rows) * elem.nbyte(),
            Type::Array { elem, len, stride } => {
                let count = match len {
                    ArrayLength::Literal(n) => *n as usize,
                    ArrayLength::SpecConstant(_) | ArrayLength::Runtime => 1,
                };
                let elem_stride = stride.map(|s| s as usize).unwrap_or_else(|| elem.natural_size());
                count * elem_stride
            }
            Type::Struct { members, .. } => members
                .last()
                .map(|m| m.offset.unwrap_or(0) as usize + m.ty.natural_size())
                .unwrap_or(0),
            Type::Pointer { .. } | Type::ForwardPointer { .. } => 8,
            _ => 0,
        }
    }

    /// Natural MSL alignment in bytes.
    pub fn natural_align(&self) -> usize {
        match self {
            Type::Scalar(s) => s.nbyte().max(1),
            Type::Vector { elem, size } => natural_vector_size(*size) * elem.nbyte(),
            Type::Matrix { elem, rows, .. } => natural_vector_size(*rows) * elem.nbyte(),
            Type::Array { elem, .. } => elem.natural_align(),
            Type::Struct { members, .. } => members
                .iter()
                .map(|m| m.ty.natural_align())
                .max()
                .unwrap_or(1),
            Type::Pointer { .. } | Type::ForwardPointer { .. } => 8,
            _ => 1,
        }
    }
}

/// MSL rounds vec3 up to a 16-byte (vec4-equivalent) natural alignment.
fn natural_vector_size(n: u32) -> usize {
    match n {
        0 | 1 => 1,
        2 => 2,
        3 => 4,
        4 => 4,
        _ => n as usize,
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Void => write!(f, "void"),
            ScalarType::Boolean => write!(f, "bool"),
            ScalarType::Integer { bits: 8, is_signed: true } => write!(f, "char"),
            ScalarType::Integer { bits: 8, is_signed: false } => write!(f, "uchar"),
            ScalarType::Integer { bits: 16, is_signed: true } => write!(f, "short"),
            ScalarType::Integer { bits: 16, is_signed: false } => write!(f, "ushort"),
            ScalarType::Integer { bits: 32, is_signed: true } => write!(f, "int"),
            ScalarType::Integer { bits: 32, is_signed: false } => write!(f, "uint"),
            ScalarType::Integer { bits: 64, is_signed: true } => write!(f, "long"),
            ScalarType::Integer { bits: 64, is_signed: false } => write!(f, "ulong"),
            ScalarType::Integer { bits, is_signed } => {
                write!(f, "{}int{}_t", if *is_signed { "" } else { "u" }, bits)
            }
            ScalarType::Float { bits: 16 } => write!(f, "half"),
            ScalarType::Float { bits: 32 } => write!(f, "float"),
            ScalarType::Float { bits: 64 } => write!(f, "double"),
            ScalarType::Float { bits } => write!(f, "float{}_t", bits),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) => write!(f, "{}", s),
            Type::Vector { elem, size } => write!(f, "{}{}", elem, size),
            Type::Matrix { elem, cols, rows, .. } => write!(f, "{}{}x{}", elem, cols, rows),
            Type::Array { elem, len, .. } => match len {
                ArrayLength::Literal(n) => write!(f, "spvUnsafeArray<{}, {}>", elem, n),
                ArrayLength::SpecConstant(id) => write!(f, "spvUnsafeArray<{}, {}>", elem, id),
                ArrayLength::Runtime => write!(f, "{}*", elem),
            },
            Type::Struct { name, self_id, .. } => {
                write!(f, "{}", name.clone().unwrap_or_else(|| format!("_{}", self_id.0)))
            }
            Type::Pointer { pointee, .. } => write!(f, "{}*", pointee),
            Type::ForwardPointer { .. } => write!(f, "<forward pointer>"),
            Type::Image(img) => write!(f, "texture{:?}<{}>", img.dim, img.sampled_ty),
            Type::Sampler => write!(f, "sampler"),
            Type::SampledImage(img) => write!(f, "{}", img),
            Type::AccelerationStructure => write!(f, "raytracing::acceleration_structure<raytracing::instancing>"),
            Type::RayQuery => write!(f, "raytracing::intersection_query<raytracing::instancing>"),
            Type::ControlPointArray { elem, control_points } => {
                write!(f, "spvUnsafeArray<{}, {}>", elem, control_points)
            }
            Type::Interpolant(ty) => write!(f, "thread {}&", ty),
        }
    }
}

/// Registry of types by ID (§4.1: "typed lookup", "ID-bound growth").
///
/// `set` allows exactly one redundant-insert case per SPEC_FULL §1: a
/// `ForwardPointer` placeholder being resolved into a concrete `Pointer`.
/// Every other repeat insert is rejected so that "return the master type
/// when asked to emit a redundant alias" (§4.1) stays meaningful: once a
/// type is registered it does not silently change shape under callers that
/// hold a `TypeId` to it.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: FnvHashMap<TypeId, Type>,
    /// Maps a duplicate/alias ID to the ID holding the canonical ("master")
    /// definition, used by `resolve_alias`.
    aliases: FnvHashMap<TypeId, TypeId>,
    bound: u32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: TypeId, ty: Type) -> Result<()> {
        self.bound = self.bound.max(id.0 + 1);
        if let Some(prev) = self.types.get(&id) {
            let is_forward_resolution =
                matches!(prev, Type::ForwardPointer { .. }) && matches!(ty, Type::Pointer { .. });
            if !is_forward_resolution {
                return Err(Error::corrupted(format!(
                    "type {} registered twice with different shapes",
                    id
                )));
            }
        }
        self.types.insert(id, ty);
        Ok(())
    }

    /// Records that `alias` should resolve to the same master type as
    /// `master` (§4.1 "the service must return the master type when asked
    /// to emit a redundant alias").
    pub fn set_alias(&mut self, alias: TypeId, master: TypeId) {
        self.aliases.insert(alias, master);
    }

    pub fn resolve_alias(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        while let Some(next) = self.aliases.get(&cur) {
            cur = *next;
        }
        cur
    }

    pub fn get(&self, id: TypeId) -> Result<&Type> {
        let id = self.resolve_alias(id);
        self.types.get(&id).ok_or(Error::missing("type", id.0))
    }

    pub fn maybe_get(&self, id: TypeId) -> Option<&Type> {
        let id = self.resolve_alias(id);
        self.types.get(&id)
    }

    /// Iterates over all registered types in declaration order (ascending
    /// ID), matching §4.1 "iteration over typed IDs in declaration order".
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        let mut ids: Vec<_> = self.types.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(move |id| (id, &self.types[&id]))
    }

    /// The current ID bound; `Module::alloc_id` never returns a value below
    /// this (§4.1 "creating a new ID increments the bound monotonically").
    pub fn bound(&self) -> u32 {
        self.bound
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_forward_pointer_resolves() {
        let mut reg = TypeRegistry::new();
        reg.set(TypeId(1), Type::ForwardPointer {
            store_cls: StorageClassKind::PhysicalStorageBuffer,
        })
        .unwrap();
        let pointee = Type::Struct {
            name: Some("Node".into()),
            members: vec![],
            self_id: TypeId(2),
        };
        reg.set(
            TypeId(1),
            Type::Pointer {
                pointee: Box::new(pointee),
                store_cls: StorageClassKind::PhysicalStorageBuffer,
            },
        )
        .unwrap();
        assert!(matches!(reg.get(TypeId(1)).unwrap(), Type::Pointer { .. }));
    }

    #[test]
    fn genuine_double_insert_errors() {
        let mut reg = TypeRegistry::new();
        reg.set(TypeId(1), Type::Scalar(ScalarType::Float { bits: 32 })).unwrap();
        let err = reg
            .set(TypeId(1), Type::Scalar(ScalarType::Boolean))
            .unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
    }

    #[test]
    fn alias_resolves_to_master() {
        let mut reg = TypeRegistry::new();
        reg.set(TypeId(1), Type::Scalar(ScalarType::Float { bits: 32 })).unwrap();
        reg.set_alias(TypeId(5), TypeId(1));
        assert_eq!(reg.get(TypeId(5)).unwrap(), reg.get(TypeId(1)).unwrap());
    }

    #[test]
    fn natural_size_rounds_vec3_like_vec4() {
        let v3 = Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 3,
        };
        assert_eq!(v3.natural_size(), 16);
    }
}
