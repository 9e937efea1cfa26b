//! The expression model (§3 "Expression").
use fnv::FnvHashSet;

use crate::id::{ExprId, TypeId, VariableId};

/// §3 "Expression": an MSL text fragment plus its result type, need-transpose
/// bit, access-chain bit, base-expression ID, implied-read set,
/// loaded-from variable ID.
#[derive(Debug, Clone)]
pub struct Expression {
    pub text: String,
    pub result_ty: TypeId,
    /// Set when this expression denotes a row-major matrix whose storage
    /// layout defers transposition to read time (§4.5 "Matrix: row-major
    /// matrices defer transposition").
    pub need_transpose: bool,
    /// Set when this expression is (or derives from) an `OpAccessChain`
    /// result, so downstream loads/stores know to apply packed-type
    /// unwrap/wrap logic (§4.5 step E).
    pub is_access_chain: bool,
    pub base_expr: Option<ExprId>,
    /// Variables this expression's evaluation implicitly reads, beyond its
    /// literal operands (e.g. a packed-location read also reads every
    /// sibling variable sharing that location, §4.2 "component packing").
    pub implied_reads: FnvHashSet<VariableId>,
    pub loaded_from: Option<VariableId>,
    /// True once this expression has been forwarded into its use site and
    /// should not be re-emitted as a separate temporary.
    pub is_forwarded: bool,
}

impl Expression {
    pub fn new(text: impl Into<String>, result_ty: TypeId) -> Self {
        Self {
            text: text.into(),
            result_ty,
            need_transpose: false,
            is_access_chain: false,
            base_expr: None,
            implied_reads: FnvHashSet::default(),
            loaded_from: None,
            is_forwarded: false,
        }
    }

    pub fn access_chain(text: impl Into<String>, result_ty: TypeId, base_expr: ExprId) -> Self {
        Self {
            is_access_chain: true,
            base_expr: Some(base_expr),
            ..Self::new(text, result_ty)
        }
    }
}

/// Registry of live expressions within a function body under emission.
#[derive(Debug, Default, Clone)]
pub struct ExpressionPool {
    exprs: Vec<Option<Expression>>,
}

impl ExpressionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ExprId, expr: Expression) {
        let idx = id.0 as usize;
        if self.exprs.len() <= idx {
            self.exprs.resize(idx + 1, None);
        }
        self.exprs[idx] = Some(expr);
    }

    pub fn get(&self, id: ExprId) -> Option<&Expression> {
        self.exprs.get(id.0 as usize).and_then(|e| e.as_ref())
    }
    pub fn get_mut(&mut self, id: ExprId) -> Option<&mut Expression> {
        self.exprs.get_mut(id.0 as usize).and_then(|e| e.as_mut())
    }

    /// Clears all expressions, called between functions the way a real
    /// emitter resets its expression cache per function body.
    pub fn clear(&mut self) {
        self.exprs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TypeId;

    #[test]
    fn access_chain_constructor_sets_base_expr_and_flag() {
        let e = Expression::access_chain("a.b", TypeId(1), ExprId(0));
        assert!(e.is_access_chain);
        assert_eq!(e.base_expr, Some(ExprId(0)));
        assert!(!e.need_transpose);
    }

    #[test]
    fn pool_insert_and_sparse_lookup() {
        let mut pool = ExpressionPool::new();
        pool.insert(ExprId(3), Expression::new("x", TypeId(0)));
        assert!(pool.get(ExprId(3)).is_some());
        assert!(pool.get(ExprId(0)).is_none());
        assert!(pool.get(ExprId(100)).is_none());
        pool.clear();
        assert!(pool.get(ExprId(3)).is_none());
    }
}
