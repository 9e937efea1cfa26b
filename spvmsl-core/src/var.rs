//! Variable entities and their registry (§3 "Variable").
use fnv::FnvHashMap;
use spirv::StorageClass;

use crate::decoration::{Decoration, ExtendedDecoration};
use crate::error::{Error, Result};
use crate::id::{ConstantId, TypeId, VariableId};

/// §3 "Variable": type ID, storage class, optional initializer ID,
/// base-variable ID (for aliases), parameter flag, per-function local flag.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Option<String>,
    pub ty: TypeId,
    pub store_cls: StorageClass,
    pub initializer: Option<ConstantId>,
    /// For descriptor aliases: the variable that actually owns the Metal
    /// resource index (§3 invariant 2, §4.6 "descriptor aliasing").
    pub base_variable: Option<VariableId>,
    pub is_parameter: bool,
    pub is_function_local: bool,
    pub decoration: Decoration,
    pub extended: ExtendedDecoration,
    /// Set by the implicit builtin synthesizer (§4.4 step 5): "marks
    /// 'implicit' for later emission".
    pub is_implicit: bool,
}

impl Variable {
    pub fn new(ty: TypeId, store_cls: StorageClass) -> Self {
        Self {
            name: None,
            ty,
            store_cls,
            initializer: None,
            base_variable: None,
            is_parameter: false,
            is_function_local: false,
            decoration: Decoration::default(),
            extended: ExtendedDecoration::default(),
            is_implicit: false,
        }
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.store_cls, StorageClass::Input | StorageClass::Output)
    }

    pub fn is_resource(&self) -> bool {
        matches!(
            self.store_cls,
            StorageClass::Uniform
                | StorageClass::UniformConstant
                | StorageClass::StorageBuffer
                | StorageClass::PushConstant
        )
    }

    /// §3 invariant 2: "If two variables alias the same (set, binding), at
    /// most one has a Metal resource index; the others are emitted as
    /// pointer casts over the primary."
    pub fn is_descriptor_alias(&self) -> bool {
        self.base_variable.is_some()
    }
}

/// §4.1 registry over `Variable`s, mirroring `TypeRegistry`'s contract.
#[derive(Debug, Default, Clone)]
pub struct VariableRegistry {
    vars: FnvHashMap<VariableId, Variable>,
    bound: u32,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: VariableId, var: Variable) -> Result<()> {
        self.bound = self.bound.max(id.0 + 1);
        if self.vars.contains_key(&id) {
            return Err(Error::corrupted(format!("variable {} registered twice", id)));
        }
        self.vars.insert(id, var);
        Ok(())
    }

    pub fn get(&self, id: VariableId) -> Result<&Variable> {
        self.vars.get(&id).ok_or(Error::missing("variable", id.0))
    }
    pub fn get_mut(&mut self, id: VariableId) -> Result<&mut Variable> {
        self.vars.get_mut(&id).ok_or(Error::missing("variable", id.0))
    }
    pub fn maybe_get(&self, id: VariableId) -> Option<&Variable> {
        self.vars.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        let mut ids: Vec<_> = self.vars.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(move |id| (id, &self.vars[&id]))
    }

    pub fn bound(&self) -> u32 {
        self.bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TypeId;

    #[test]
    fn resource_storage_classes_are_recognized() {
        let buf = Variable::new(TypeId(0), StorageClass::StorageBuffer);
        assert!(buf.is_resource());
        assert!(!buf.is_interface());

        let input = Variable::new(TypeId(0), StorageClass::Input);
        assert!(input.is_interface());
        assert!(!input.is_resource());
    }

    #[test]
    fn descriptor_alias_tracks_base_variable() {
        let mut v = Variable::new(TypeId(0), StorageClass::UniformConstant);
        assert!(!v.is_descriptor_alias());
        v.base_variable = Some(VariableId(3));
        assert!(v.is_descriptor_alias());
    }

    #[test]
    fn registry_rejects_double_registration_and_tracks_bound() {
        let mut reg = VariableRegistry::new();
        reg.set(VariableId(5), Variable::new(TypeId(0), StorageClass::Input)).unwrap();
        assert_eq!(reg.bound(), 6);
        let err = reg.set(VariableId(5), Variable::new(TypeId(0), StorageClass::Input)).unwrap_err();
        assert!(matches!(err, Error::Corrupted(_)));
        assert!(reg.maybe_get(VariableId(99)).is_none());
        assert!(reg.get(VariableId(99)).is_err());
    }
}
