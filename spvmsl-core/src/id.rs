//! Small integer IDs referencing entities owned by the IR store (§3).
use std::fmt;

macro_rules! id_ty {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);
        impl $name {
            pub fn id(self) -> u32 {
                self.0
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "%{}", self.0)
            }
        }
        impl From<u32> for $name {
            fn from(x: u32) -> Self {
                $name(x)
            }
        }
    };
}

id_ty!(TypeId);
id_ty!(VariableId);
id_ty!(ConstantId);
id_ty!(FunctionId);
id_ty!(BlockId);
id_ty!(ExprId);

/// SPIR-V `SpecId` used by `OpDecorate SpecId`, distinct from the owning
/// constant's module ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpecId(pub u32);
