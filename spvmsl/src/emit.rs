//! C7: Expression & Statement Emitter (§4.7). Overrides the (out-of-scope)
//! base GLSL-style emitter for MSL-specific operations only.
use std::collections::HashSet;

use spvmsl_core::block::{LoopIdiom, Terminator};
use spvmsl_core::error::Result;
use spvmsl_core::expr::ExpressionPool;
use spvmsl_core::func::Function;
use spvmsl_core::id::BlockId;

use crate::options::CompilerOptions;

/// §4.7 "Block chain": walks a function's block graph and emits structured
/// `if`/`else`/`for`/`while`/`switch` text directly, the way the base GLSL
/// emitter (out of scope, §1) would for its own expression language. This
/// is the MSL-side driver over whatever `Expression` text that emitter (or,
/// in this core, a test fixture) already produced per instruction.
pub struct BlockChainEmitter<'a> {
    pool: &'a ExpressionPool,
}

impl<'a> BlockChainEmitter<'a> {
    pub fn new(pool: &'a ExpressionPool) -> Self {
        Self { pool }
    }

    pub fn emit_function_body(&self, func: &Function) -> String {
        let mut out = String::new();
        self.emit_region(func, func.entry_block, None, 1, &mut out);
        out
    }

    fn indent(depth: usize) -> String {
        "    ".repeat(depth)
    }

    fn expr_text(&self, id: spvmsl_core::id::ExprId) -> String {
        self.pool.get(id).map(|e| e.text.clone()).unwrap_or_default()
    }

    /// Emits blocks reachable from `start`, stopping once `stop_at` (a
    /// merge block) is reached. This is the standard structured-control-flow
    /// "emit until merge, then let the caller continue" pattern.
    fn emit_region(&self, func: &Function, start: BlockId, stop_at: Option<BlockId>, depth: usize, out: &mut String) {
        let mut current = Some(start);
        let mut visited = HashSet::new();
        while let Some(id) = current {
            if Some(id) == stop_at || !visited.insert(id) {
                break;
            }
            let block = match func.blocks.get(&id) {
                Some(b) => b,
                None => break,
            };
            for expr_id in &block.instrs {
                if let Some(expr) = self.pool.get(*expr_id) {
                    if !expr.is_forwarded {
                        out.push_str(&Self::indent(depth));
                        out.push_str(&expr.text);
                        out.push_str(";\n");
                    }
                }
            }
            // §4.7 "Phi variables are flushed on branches": each phi's
            // result is assigned the incoming edge's value right before
            // the terminator fires.
            for phi in &block.phis {
                if let Some(edge) = phi.edges.first() {
                    out.push_str(&Self::indent(depth));
                    out.push_str(&format!("v{} = {};\n", phi.result.0, self.expr_text(edge.value)));
                }
            }
            match &block.terminator {
                Terminator::Direct { target } => {
                    if block.is_loop_header() {
                        let idiom = block.loop_idiom.unwrap_or(LoopIdiom::ComplexLoop);
                        let keyword = loop_idiom_keyword(idiom);
                        out.push_str(&Self::indent(depth));
                        if keyword == "do" {
                            out.push_str("do {\n");
                        } else {
                            out.push_str("for (;;) {\n");
                        }
                        self.emit_region(func, *target, block.merge_block, depth + 1, out);
                        out.push_str(&Self::indent(depth));
                        if keyword == "do" {
                            out.push_str("} while (true);\n");
                        } else {
                            out.push_str("}\n");
                        }
                        current = block.merge_block;
                    } else {
                        current = Some(*target);
                    }
                }
                Terminator::Select {
                    cond,
                    true_block,
                    false_block,
                } => {
                    let cond_text = self.expr_text(*cond);
                    out.push_str(&Self::indent(depth));
                    out.push_str(&format!("if ({}) {{\n", cond_text));
                    self.emit_region(func, *true_block, block.merge_block, depth + 1, out);
                    out.push_str(&Self::indent(depth));
                    out.push_str("} else {\n");
                    self.emit_region(func, *false_block, block.merge_block, depth + 1, out);
                    out.push_str(&Self::indent(depth));
                    out.push_str("}\n");
                    current = block.merge_block;
                }
                Terminator::MultiSelect { selector, default, cases } => {
                    let sel_text = self.expr_text(*selector);
                    out.push_str(&Self::indent(depth));
                    out.push_str(&format!("switch ({}) {{\n", sel_text));
                    for (value, target) in cases {
                        out.push_str(&Self::indent(depth + 1));
                        out.push_str(&format!("case {}:\n", value));
                        self.emit_region(func, *target, block.merge_block, depth + 2, out);
                        out.push_str(&Self::indent(depth + 2));
                        out.push_str("break;\n");
                    }
                    out.push_str(&Self::indent(depth + 1));
                    out.push_str("default:\n");
                    self.emit_region(func, *default, block.merge_block, depth + 2, out);
                    out.push_str(&Self::indent(depth + 2));
                    out.push_str("break;\n");
                    out.push_str(&Self::indent(depth));
                    out.push_str("}\n");
                    current = block.merge_block;
                }
                Terminator::Return(expr) => {
                    out.push_str(&Self::indent(depth));
                    match expr {
                        Some(e) => out.push_str(&format!("return {};\n", self.expr_text(*e))),
                        None => out.push_str("return;\n"),
                    }
                    current = None;
                }
                Terminator::Kill => {
                    out.push_str(&Self::indent(depth));
                    out.push_str("discard_fragment();\n");
                    current = None;
                }
                Terminator::Unreachable => {
                    current = None;
                }
                Terminator::EmitMeshTasks => {
                    out.push_str(&Self::indent(depth));
                    out.push_str("// unreachable after mesh task emission\n");
                    current = None;
                }
                Terminator::IgnoreIntersection => {
                    out.push_str(&Self::indent(depth));
                    out.push_str("ignore_intersection();\n");
                    current = None;
                }
                Terminator::TerminateRay => {
                    out.push_str(&Self::indent(depth));
                    out.push_str("terminate_ray();\n");
                    current = None;
                }
            }
        }
    }
}

/// §4.7 "Atomics": maps a SPIR-V atomic opcode to its MSL
/// `atomic_fetch_*_explicit` spelling.
pub fn atomic_op_name(op: spirv::Op) -> Option<&'static str> {
    use spirv::Op::*;
    Some(match op {
        AtomicIAdd => "atomic_fetch_add_explicit",
        AtomicISub => "atomic_fetch_sub_explicit",
        AtomicAnd => "atomic_fetch_and_explicit",
        AtomicOr => "atomic_fetch_or_explicit",
        AtomicXor => "atomic_fetch_xor_explicit",
        AtomicSMin | AtomicUMin => "atomic_fetch_min_explicit",
        AtomicSMax | AtomicUMax => "atomic_fetch_max_explicit",
        AtomicExchange => "atomic_exchange_explicit",
        AtomicCompareExchange => "atomic_compare_exchange_weak_explicit",
        AtomicLoad => "atomic_load_explicit",
        AtomicStore => "atomic_store_explicit",
        _ => return None,
    })
}

/// Emits an atomic call on a buffer-resident atomic (not an image), the
/// common case of §4.7's atomics bullet.
pub fn emit_buffer_atomic(op: spirv::Op, base_ty: &str, pointer_expr: &str, value_expr: &str) -> Option<String> {
    let name = atomic_op_name(op)?;
    Some(format!(
        "{}((device atomic_{}*){}, {}, memory_order_relaxed)",
        name, base_ty, pointer_expr, value_expr
    ))
}

/// §4.7: 2D image atomics require a derived linear coordinate and a
/// secondary buffer binding, per §8 S6:
/// `atomic_fetch_add_explicit((device atomic_uint*)&img_atomic[spvImage2DAtomicCoord(coord, img)], value, memory_order_relaxed)`.
pub fn emit_image_atomic(op: spirv::Op, base_ty: &str, atomic_buffer: &str, image_expr: &str, coord_expr: &str, value_expr: &str) -> Option<String> {
    let name = atomic_op_name(op)?;
    Some(format!(
        "{}((device atomic_{}*)&{}[spvImage2DAtomicCoord({}, {})], {}, memory_order_relaxed)",
        name, base_ty, atomic_buffer, coord_expr, image_expr, value_expr
    ))
}

/// §7: gated entry point for buffer atomics, rejecting a target MSL
/// version that predates `atomic_fetch_*_explicit` before building the
/// call text.
pub fn emit_buffer_atomic_checked(
    op: spirv::Op,
    base_ty: &str,
    pointer_expr: &str,
    value_expr: &str,
    options: &CompilerOptions,
) -> Result<Option<String>> {
    options.require_feature("atomics")?;
    Ok(emit_buffer_atomic(op, base_ty, pointer_expr, value_expr))
}

/// §7: gated entry point for the image-atomic form (§8 S6).
pub fn emit_image_atomic_checked(
    op: spirv::Op,
    base_ty: &str,
    atomic_buffer: &str,
    image_expr: &str,
    coord_expr: &str,
    value_expr: &str,
    options: &CompilerOptions,
) -> Result<Option<String>> {
    options.require_feature("atomics")?;
    Ok(emit_image_atomic(op, base_ty, atomic_buffer, image_expr, coord_expr, value_expr))
}

/// §7: ray queries require MSL 2.3; gates `ray_query_intersection_accessor`
/// the same way the buffer/image atomics entry points gate theirs.
pub fn ray_query_intersection_accessor_checked(field: &str, committed: bool, options: &CompilerOptions) -> Result<String> {
    options.require_feature("raytracing")?;
    Ok(ray_query_intersection_accessor(field, committed))
}

/// §4.7 "OpImageRead/Write/Fetch".
pub fn emit_image_read(image_expr: &str, coord_expr: &str) -> String {
    format!("{}.read({})", image_expr, coord_expr)
}
pub fn emit_image_write(image_expr: &str, coord_expr: &str, value_expr: &str) -> String {
    format!("{}.write({}, {})", image_expr, value_expr, coord_expr)
}
pub fn emit_image_fetch(image_expr: &str, coord_expr: &str, lod_expr: Option<&str>) -> String {
    match lod_expr {
        Some(lod) => format!("{}.read({}, {})", image_expr, coord_expr, lod),
        None => format!("{}.read({})", image_expr, coord_expr),
    }
}

/// §4.7: "when invariant math or NoContraction is requested, route through
/// `spvFMul/spvFAdd/spvFSub/spvFMulMatrixMatrix` fused-multiply-add
/// wrappers to defeat MSL's default contraction."
pub fn maybe_wrap_invariant(op: &str, lhs: &str, rhs: &str, options: &CompilerOptions, no_contraction: bool) -> String {
    if !options.invariant_float_math && !no_contraction {
        return format!("({} {} {})", lhs, op, rhs);
    }
    let wrapper = match op {
        "*" => "spvFMul",
        "+" => "spvFAdd",
        "-" => "spvFSub",
        _ => return format!("({} {} {})", lhs, op, rhs),
    };
    format!("{}({}, {})", wrapper, lhs, rhs)
}

/// §4.7 "Subgroup ops": choose `simd_*`, `quad_*`, or an emulated no-op
/// based on target MSL version and the "use quadgroup" option.
pub enum SubgroupDialect {
    Simd,
    Quad,
    Emulated,
}
pub fn choose_subgroup_dialect(options: &CompilerOptions, use_quadgroup: bool) -> SubgroupDialect {
    if options.emulate_subgroups {
        SubgroupDialect::Emulated
    } else if use_quadgroup {
        SubgroupDialect::Quad
    } else {
        SubgroupDialect::Simd
    }
}
pub fn subgroup_builtin_name(base: &str, dialect: &SubgroupDialect) -> String {
    match dialect {
        SubgroupDialect::Simd => format!("simd_{}", base),
        SubgroupDialect::Quad => format!("quad_{}", base),
        SubgroupDialect::Emulated => format!("spvSubgroup{}", titlecase(base)),
    }
}
fn titlecase(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
        None => String::new(),
    }
}

/// §4.7 "Ray query": `.get_candidate_*` vs `.get_committed_*`.
pub fn ray_query_intersection_accessor(field: &str, committed: bool) -> String {
    if committed {
        format!(".get_committed_{}()", field)
    } else {
        format!(".get_candidate_{}()", field)
    }
}

/// §4.7 "Pointer cast and physical-buffer-pointer bitcast".
pub fn emit_pointer_cast(target_ty: &str, expr: &str) -> String {
    format!("reinterpret_cast<{}>({})", target_ty, expr)
}
pub fn emit_bitcast(target_ty: &str, expr: &str) -> String {
    format!("as_type<{}>({})", target_ty, expr)
}

/// §4.7 "Barriers": control vs memory barriers, `simdgroup_barrier` at
/// subgroup scope.
pub enum BarrierScope {
    Workgroup,
    Subgroup,
}
pub fn emit_barrier(scope: BarrierScope, flags: &[&str]) -> String {
    let joined = if flags.is_empty() {
        "mem_flags::mem_none".to_string()
    } else {
        flags
            .iter()
            .map(|f| format!("mem_flags::mem_{}", f))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    match scope {
        BarrierScope::Workgroup => format!("threadgroup_barrier({})", joined),
        BarrierScope::Subgroup => format!("simdgroup_barrier({})", joined),
    }
}

/// §4.7 "Array copies": the 6x2 matrix of source/destination address
/// spaces (constant/stack/threadgroup/device on each side, constant
/// restricted to source) selects one of twelve `spvArrayCopyFromXToY<N>`
/// helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Constant,
    Stack,
    Threadgroup,
    Device,
}
pub fn array_copy_helper(from: AddressSpace, to: AddressSpace, len: u32) -> Option<String> {
    if to == AddressSpace::Constant {
        // §4.7: "constant restricted to source".
        return None;
    }
    Some(format!(
        "spvArrayCopyFrom{:?}To{:?}<{}>",
        from, to, len
    ))
}

/// §4.7 "Tessellation-level stores into the physically-non-existent
/// inner[1] or outer[3] of triangles are silently dropped" (§9 Open
/// Question 1: still drop the write, but return a diagnostic).
pub fn triangle_tess_level_component_is_dropped(is_inner: bool, component: u32) -> bool {
    (is_inner && component == 1) || (!is_inner && component == 3)
}

/// §4.7 "Block chain": recognized loop idiom names, used by the structured
/// control-flow emitter to decide between `for`/`while`/`do ... while`.
pub fn loop_idiom_keyword(idiom: LoopIdiom) -> &'static str {
    match idiom {
        LoopIdiom::MergeToSelectForLoop | LoopIdiom::MergeToDirectForLoop | LoopIdiom::MergeToSelectContinueForLoop => "for",
        LoopIdiom::DoWhileLoop => "do",
        LoopIdiom::ComplexLoop => "while",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §8 S6.
    #[test]
    fn s6_image_atomic_add_emission() {
        let s = emit_image_atomic(spirv::Op::AtomicIAdd, "uint", "img_atomic", "img", "coord", "value").unwrap();
        assert_eq!(
            s,
            "atomic_fetch_add_explicit((device atomic_uint*)&img_atomic[spvImage2DAtomicCoord(coord, img)], value, memory_order_relaxed)"
        );
    }

    #[test]
    fn invariant_math_routes_through_spv_wrapper() {
        let mut options = CompilerOptions::default();
        options.invariant_float_math = true;
        assert_eq!(maybe_wrap_invariant("*", "a", "b", &options, false), "spvFMul(a, b)");
    }

    #[test]
    fn constant_to_constant_array_copy_is_unsupported() {
        assert!(array_copy_helper(AddressSpace::Stack, AddressSpace::Constant, 4).is_none());
        assert_eq!(
            array_copy_helper(AddressSpace::Constant, AddressSpace::Stack, 4).unwrap(),
            "spvArrayCopyFromConstantToStack<4>"
        );
    }

    #[test]
    fn atomics_below_2_0_are_rejected() {
        let mut options = CompilerOptions::default();
        options.msl_version = spvmsl_core::error::MslVersion::V1_0;
        let err = emit_buffer_atomic_checked(spirv::Op::AtomicIAdd, "uint", "p", "v", &options).unwrap_err();
        assert!(matches!(err, spvmsl_core::error::Error::UnsupportedTarget { feature: "atomics", .. }));
    }

    #[test]
    fn ray_query_accessor_requires_2_3() {
        let options = CompilerOptions::default();
        let err = ray_query_intersection_accessor_checked("t_min", false, &options).unwrap_err();
        assert!(matches!(err, spvmsl_core::error::Error::UnsupportedTarget { feature: "raytracing", .. }));

        let mut options_ok = CompilerOptions::default();
        options_ok.msl_version = spvmsl_core::error::MslVersion::V2_4;
        assert_eq!(
            ray_query_intersection_accessor_checked("t_min", false, &options_ok).unwrap(),
            ".get_candidate_t_min()"
        );
    }

    #[test]
    fn s8_property6_triangle_drop_predicate() {
        assert!(triangle_tess_level_component_is_dropped(true, 1));
        assert!(triangle_tess_level_component_is_dropped(false, 3));
        assert!(!triangle_tess_level_component_is_dropped(true, 0));
    }

    fn scalar_ty() -> spvmsl_core::id::TypeId {
        spvmsl_core::id::TypeId(0)
    }

    /// A single-block function with an unconditional `return`.
    #[test]
    fn block_chain_emits_straight_line_return() {
        use spvmsl_core::block::{Block, Terminator};
        use spvmsl_core::expr::Expression;
        use spvmsl_core::id::{BlockId, ExprId};

        let mut pool = ExpressionPool::new();
        pool.insert(ExprId(0), Expression::new("float4 c = float4(1.0)", scalar_ty()));
        pool.insert(ExprId(1), Expression::new("c", scalar_ty()));

        let mut func = Function::new(BlockId(0));
        let mut block = Block::new(BlockId(0), Terminator::Return(Some(ExprId(1))));
        block.instrs.push(ExprId(0));
        func.insert_block(block);

        let emitter = BlockChainEmitter::new(&pool);
        let body = emitter.emit_function_body(&func);
        assert!(body.contains("float4 c = float4(1.0);"));
        assert!(body.contains("return c;"));
    }

    /// An `if`/`else` that both sides converge on a merge block.
    #[test]
    fn block_chain_emits_if_else_and_continues_past_merge() {
        use spvmsl_core::block::{Block, MergeKind, Terminator};
        use spvmsl_core::expr::Expression;
        use spvmsl_core::id::{BlockId, ExprId};

        let mut pool = ExpressionPool::new();
        pool.insert(ExprId(0), Expression::new("x > 0.0", scalar_ty()));
        pool.insert(ExprId(1), Expression::new("y = 1.0", scalar_ty()));
        pool.insert(ExprId(2), Expression::new("y = -1.0", scalar_ty()));
        pool.insert(ExprId(3), Expression::new("y", scalar_ty()));

        let mut func = Function::new(BlockId(0));
        let mut header = Block::new(
            BlockId(0),
            Terminator::Select {
                cond: ExprId(0),
                true_block: BlockId(1),
                false_block: BlockId(2),
            },
        );
        header.merge_kind = MergeKind::Selection;
        header.merge_block = Some(BlockId(3));
        func.insert_block(header);

        let mut true_blk = Block::new(BlockId(1), Terminator::Direct { target: BlockId(3) });
        true_blk.instrs.push(ExprId(1));
        func.insert_block(true_blk);

        let mut false_blk = Block::new(BlockId(2), Terminator::Direct { target: BlockId(3) });
        false_blk.instrs.push(ExprId(2));
        func.insert_block(false_blk);

        let merge = Block::new(BlockId(3), Terminator::Return(Some(ExprId(3))));
        func.insert_block(merge);

        let emitter = BlockChainEmitter::new(&pool);
        let body = emitter.emit_function_body(&func);
        assert!(body.contains("if (x > 0.0) {"));
        assert!(body.contains("y = 1.0;"));
        assert!(body.contains("} else {"));
        assert!(body.contains("y = -1.0;"));
        assert!(body.contains("return y;"));
    }
}
