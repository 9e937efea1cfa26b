//! The diagnostic channel (§9 Open Question 1): structured data describing
//! non-error events the translator wants an embedder to see, distinct from
//! the typed `Error`s of §7 which abort compilation outright.
use spvmsl_core::id::VariableId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A store to `TessLevelInner[1]` or `TessLevelOuter[3]` was dropped
    /// because triangle tessellation factors have no such component
    /// (§4.7, §8 property 6).
    DroppedTriangleTessLevelComponent { variable: VariableId, component: u32 },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::DroppedTriangleTessLevelComponent { variable, component } => write!(
                f,
                "store to component {} of {} has no effect under triangle tessellation and was dropped",
                component, variable
            ),
        }
    }
}
