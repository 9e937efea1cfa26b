//! The IR store (§4.1): owns every registry, allocates IDs, and exposes the
//! "loop soft lock" primitive.
use spirv::ExecutionModel;

use crate::constant::Constant;
use crate::error::{Error, Result};
use crate::expr::ExpressionPool;
use crate::func::{Function, FunctionRegistry};
use crate::id::{ConstantId, FunctionId, TypeId, VariableId};
use crate::ty::{Type, TypeRegistry};
use crate::var::{Variable, VariableRegistry};

/// A snapshot of the module's current ID bound, returned by
/// `Module::lock_ids`. While held, `Module::alloc_id` mints IDs only above
/// the snapshot, so any `Vec`/iterator over entities that existed when the
/// lock was taken stays valid (§4.1: "permits new type IDs to be created
/// while iterating without invalidating the iteration"). Dropping the guard
/// commits the new bound as the module's ordinary bound; there is nothing
/// to roll back, since growth only ever appends.
pub struct IdBoundLock<'a> {
    module: &'a mut Module,
    snapshot: u32,
}
impl<'a> IdBoundLock<'a> {
    pub fn snapshot_bound(&self) -> u32 {
        self.snapshot
    }
}
impl<'a> Drop for IdBoundLock<'a> {
    fn drop(&mut self) {
        self.module.bound = self.module.bound.max(self.module.next_id);
    }
}

/// A single entry point under translation (§1 "a single entry point").
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub name: String,
    pub execution_model: ExecutionModel,
    pub function: FunctionId,
    /// Interface variable IDs, in declaration order, including any variables
    /// appended by the implicit builtin synthesizer (§3 invariant 4).
    pub interface: Vec<VariableId>,
}

/// The IR store. Everything the translator reads or mutates hangs off this
/// struct (§9 Design Note: "a handful of process-local buffers ... should
/// be fields on the translator instance": `Module` is the shared-state half
/// of that; the translator in `spvmsl` owns the emission-local buffers).
#[derive(Debug, Default)]
pub struct Module {
    pub types: TypeRegistry,
    pub vars: VariableRegistry,
    pub funcs: FunctionRegistry,
    pub consts: Vec<Option<Constant>>,
    pub entry_point: Option<EntryPoint>,
    /// Live expressions for the function currently under emission (§3
    /// "Expression"); populated by the (out-of-scope) instruction-level
    /// walker before `BlockChainEmitter` renders a function body.
    pub expr_pool: ExpressionPool,
    next_id: u32,
    bound: u32,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonically allocates a fresh ID (§4.1: "creating a new ID
    /// increments the bound monotonically"), used by the implicit builtin
    /// synthesizer (§4.4 step 1) and the layout rewriter when it needs a
    /// physical replacement type ID.
    pub fn alloc_id(&mut self) -> u32 {
        self.bound = self.bound.max(self.types.bound()).max(self.vars.bound()).max(self.funcs.bound());
        self.next_id = self.next_id.max(self.bound);
        let id = self.next_id;
        self.next_id += 1;
        self.bound = self.next_id;
        id
    }

    pub fn lock_ids(&mut self) -> IdBoundLock<'_> {
        self.bound = self.bound.max(self.types.bound()).max(self.vars.bound()).max(self.funcs.bound());
        self.next_id = self.next_id.max(self.bound);
        let snapshot = self.bound;
        IdBoundLock {
            module: self,
            snapshot,
        }
    }

    pub fn alloc_type_id(&mut self) -> TypeId {
        TypeId(self.alloc_id())
    }
    pub fn alloc_var_id(&mut self) -> VariableId {
        VariableId(self.alloc_id())
    }

    pub fn set_type(&mut self, id: TypeId, ty: Type) -> Result<()> {
        self.types.set(id, ty)
    }
    pub fn set_var(&mut self, id: VariableId, var: Variable) -> Result<()> {
        self.vars.set(id, var)
    }
    pub fn set_func(&mut self, id: FunctionId, func: Function) -> Result<()> {
        self.funcs.set(id, func)
    }

    pub fn set_const(&mut self, id: ConstantId, c: Constant) {
        let idx = id.0 as usize;
        if self.consts.len() <= idx {
            self.consts.resize(idx + 1, None);
        }
        self.consts[idx] = Some(c);
    }
    pub fn get_const(&self, id: ConstantId) -> Result<&Constant> {
        self.consts
            .get(id.0 as usize)
            .and_then(|c| c.as_ref())
            .ok_or(Error::missing("constant", id.0))
    }

    /// §3 invariant 3: "Every implicitly synthesized variable must be added
    /// to the entry point's interface variable list exactly once."
    pub fn add_interface_variable_once(&mut self, var: VariableId) -> Result<()> {
        let ep = self
            .entry_point
            .as_mut()
            .ok_or_else(|| Error::corrupted("no entry point set"))?;
        if ep.interface.contains(&var) {
            return Err(Error::corrupted(format!(
                "variable {} already in the entry point interface",
                var
            )));
        }
        ep.interface.push(var);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::{ScalarType, Type};

    #[test]
    fn alloc_id_grows_monotonically_during_lock() {
        let mut module = Module::new();
        module.set_type(TypeId(0), Type::Scalar(ScalarType::Float { bits: 32 })).unwrap();
        let before = {
            let lock = module.lock_ids();
            lock.snapshot_bound()
        };
        assert_eq!(before, 1);
        let new_id = module.alloc_id();
        assert!(new_id >= before);
    }

    #[test]
    fn duplicate_interface_variable_rejected() {
        let mut module = Module::new();
        module.entry_point = Some(EntryPoint {
            name: "main".into(),
            execution_model: ExecutionModel::Fragment,
            function: FunctionId(0),
            interface: Vec::new(),
        });
        module.add_interface_variable_once(VariableId(3)).unwrap();
        assert!(module.add_interface_variable_once(VariableId(3)).is_err());
    }
}
