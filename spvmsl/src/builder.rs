//! A programmatic `Module` builder. SPIR-V binary parsing is out of scope
//! (§1), so this is the supported way to construct test fixtures and to let
//! an external parser hand off a finished IR without going through a
//! binary round-trip.
use spirv::{ExecutionModel, StorageClass};

use spvmsl_core::decoration::Decoration;
use spvmsl_core::error::Result;
use spvmsl_core::func::Function;
use spvmsl_core::id::{BlockId, FunctionId, TypeId, VariableId};
use spvmsl_core::module::{EntryPoint, Module};
use spvmsl_core::ty::Type;
use spvmsl_core::var::Variable;

pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
        }
    }

    pub fn add_type(&mut self, ty: Type) -> TypeId {
        let id = self.module.alloc_type_id();
        self.module.set_type(id, ty).expect("fresh id");
        id
    }

    pub fn add_variable(&mut self, ty: TypeId, store_cls: StorageClass) -> VariableId {
        let id = self.module.alloc_var_id();
        self.module.set_var(id, Variable::new(ty, store_cls)).expect("fresh id");
        id
    }

    pub fn decorate(&mut self, var: VariableId, f: impl FnOnce(&mut Decoration)) -> Result<()> {
        f(&mut self.module.vars.get_mut(var)?.decoration);
        Ok(())
    }

    pub fn name_variable(&mut self, var: VariableId, name: impl Into<String>) -> Result<()> {
        self.module.vars.get_mut(var)?.name = Some(name.into());
        Ok(())
    }

    pub fn set_entry_point(
        &mut self,
        name: impl Into<String>,
        execution_model: ExecutionModel,
        interface: Vec<VariableId>,
    ) -> FunctionId {
        let func_id = FunctionId(self.module.alloc_id());
        let mut func = Function::new(BlockId(0));
        func.execution_model = Some(execution_model);
        self.module.set_func(func_id, func).expect("fresh id");
        self.module.entry_point = Some(EntryPoint {
            name: name.into(),
            execution_model,
            function: func_id,
            interface,
        });
        func_id
    }

    pub fn push_execution_mode(&mut self, mode: spvmsl_core::func::ExecutionMode) -> Result<()> {
        let func_id = self
            .module
            .entry_point
            .as_ref()
            .expect("entry point set before execution modes")
            .function;
        self.module.funcs.get_mut(func_id)?.execution_modes.push(mode);
        Ok(())
    }

    pub fn build(self) -> Module {
        self.module
    }

    pub fn module(&self) -> &Module {
        &self.module
    }
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spvmsl_core::ty::{ScalarType, Type};

    #[test]
    fn builds_a_module_with_a_decorated_interface_variable_and_entry_point() {
        let mut b = ModuleBuilder::new();
        let f4 = b.add_type(Type::Vector {
            elem: ScalarType::Float { bits: 32 },
            size: 4,
        });
        let var = b.add_variable(f4, StorageClass::Output);
        b.decorate(var, |d| d.builtin = Some(spirv::BuiltIn::Position)).unwrap();
        b.name_variable(var, "gl_Position").unwrap();
        b.set_entry_point("main", ExecutionModel::Vertex, vec![var]);

        let module = b.build();
        let entry = module.entry_point.as_ref().unwrap();
        assert_eq!(entry.name, "main");
        assert_eq!(entry.interface, vec![var]);
        let stored = module.vars.get(var).unwrap();
        assert_eq!(stored.decoration.builtin, Some(spirv::BuiltIn::Position));
        assert_eq!(stored.name.as_deref(), Some("gl_Position"));
    }
}
