//! Compact single-line rendering of expressions for logs and test output.
//!
//! Operand references to committed instructions print as `%id` so that CFG
//! cycles never recurse; full bodies print only at defining sites.

use std::fmt::Write;

use crate::til::arena::Arena;
use crate::til::expr::{ExprId, ExprKind};

/// Renders `expr` as a compact one-line string.
pub fn expr_to_string(arena: &Arena, expr: ExprId) -> String {
    let mut out = String::new();
    print_node(arena, expr, &mut out);
    out
}

fn print_operand(arena: &Arena, expr: ExprId, out: &mut String) {
    if let Some(id) = arena.expr(expr).instr_id() {
        let _ = write!(out, "%{}", id);
    } else {
        print_node(arena, expr, out);
    }
}

fn print_operand_opt(arena: &Arena, expr: Option<ExprId>, out: &mut String) {
    match expr {
        Some(e) => print_operand(arena, e, out),
        None => out.push_str("_"),
    }
}

fn print_list(arena: &Arena, exprs: &[ExprId], out: &mut String) {
    for (i, &e) in exprs.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_operand(arena, e, out);
    }
}

fn print_node(arena: &Arena, expr: ExprId, out: &mut String) {
    match &arena.expr(expr).kind {
        ExprKind::VarDecl {
            var_kind,
            name,
            definition,
        } => {
            let _ = write!(out, "vardecl<{:?}> {}: ", var_kind, name);
            print_operand_opt(arena, *definition, out);
        }
        ExprKind::Function { vardecl, body } => {
            out.push_str("fn(");
            print_node(arena, *vardecl, out);
            out.push_str(") -> ");
            print_operand(arena, *body, out);
        }
        ExprKind::Code {
            call_conv,
            return_type,
            body,
        } => {
            let _ = write!(out, "code<{:?}>: ", call_conv);
            print_operand(arena, *return_type, out);
            out.push_str(" = ");
            print_operand_opt(arena, *body, out);
        }
        ExprKind::Field { range, body } => {
            out.push_str("field ");
            print_operand(arena, *range, out);
            out.push_str(" = ");
            print_operand(arena, *body, out);
        }
        ExprKind::Slot { name, definition } => {
            let _ = write!(out, "{}: ", name);
            print_operand(arena, *definition, out);
        }
        ExprKind::Record { slots } => {
            out.push_str("record { ");
            print_list(arena, slots, out);
            out.push_str(" }");
        }
        ExprKind::Array { elems } => {
            out.push('[');
            print_list(arena, elems, out);
            out.push(']');
        }
        ExprKind::ScalarType { base } => {
            let _ = write!(out, "{}", base);
        }
        ExprKind::Cfg { blocks } => {
            out.push_str("cfg {");
            for &bid in blocks {
                let block = arena.block(bid);
                let _ = write!(out, " bb{}(", block.index);
                print_list(arena, &block.phis, out);
                out.push_str("):");
                for &i in &block.instrs {
                    out.push(' ');
                    if let Some(id) = arena.expr(i).instr_id() {
                        let _ = write!(out, "%{} = ", id);
                    }
                    print_node(arena, i, out);
                    out.push(';');
                }
            }
            out.push_str(" }");
        }
        ExprKind::Literal { value } => {
            let _ = write!(out, "{}:{}", value, value.base_type());
        }
        ExprKind::Variable { decl } => {
            if let ExprKind::VarDecl { name, .. } = &arena.expr(*decl).kind {
                let _ = write!(out, "${}", name);
            } else {
                out.push_str("$?");
            }
        }
        ExprKind::Apply {
            apply_kind,
            fun,
            arg,
        } => {
            let _ = write!(out, "apply<{:?}>(", apply_kind);
            print_operand(arena, *fun, out);
            out.push_str(", ");
            print_operand_opt(arena, *arg, out);
            out.push(')');
        }
        ExprKind::Project { record, field } => {
            print_operand(arena, *record, out);
            let _ = write!(out, ".{}", field);
        }
        ExprKind::Call { target } => {
            out.push_str("call ");
            print_operand(arena, *target, out);
        }
        ExprKind::Alloc { alloc_kind, data } => {
            let _ = write!(out, "alloc<{:?}> ", alloc_kind);
            print_operand(arena, *data, out);
        }
        ExprKind::Load { pointer } => {
            out.push_str("load ");
            print_operand(arena, *pointer, out);
        }
        ExprKind::Store { dest, source } => {
            out.push_str("store ");
            print_operand(arena, *dest, out);
            out.push_str(" <- ");
            print_operand(arena, *source, out);
        }
        ExprKind::ArrayIndex { array, index } => {
            print_operand(arena, *array, out);
            out.push('[');
            print_operand(arena, *index, out);
            out.push(']');
        }
        ExprKind::ArrayAdd { array, index } => {
            out.push_str("arrayadd(");
            print_operand(arena, *array, out);
            out.push_str(", ");
            print_operand(arena, *index, out);
            out.push(')');
        }
        ExprKind::UnaryOp { op, operand } => {
            let _ = write!(out, "{} ", op);
            print_operand(arena, *operand, out);
        }
        ExprKind::BinaryOp { op, lhs, rhs } => {
            let _ = write!(out, "{}(", op);
            print_operand(arena, *lhs, out);
            out.push_str(", ");
            print_operand(arena, *rhs, out);
            out.push(')');
        }
        ExprKind::Cast { op, operand } => {
            let _ = write!(out, "{} ", op);
            print_operand(arena, *operand, out);
        }
        ExprKind::Phi { args } => {
            out.push_str("phi(");
            print_list(arena, args, out);
            out.push(')');
        }
        ExprKind::Goto { target, args } => {
            let _ = write!(out, "goto bb{}(", arena.block(*target).index);
            print_list(arena, args, out);
            out.push(')');
        }
        ExprKind::Branch {
            condition,
            then_block,
            else_block,
        } => {
            out.push_str("branch ");
            print_operand(arena, *condition, out);
            let _ = write!(
                out,
                " bb{} bb{}",
                arena.block(*then_block).index,
                arena.block(*else_block).index
            );
        }
        ExprKind::Switch {
            condition,
            labels,
            targets,
        } => {
            out.push_str("switch ");
            print_operand(arena, *condition, out);
            out.push_str(" {");
            for (label, target) in labels.iter().zip(targets) {
                out.push(' ');
                print_operand(arena, *label, out);
                let _ = write!(out, " => bb{};", arena.block(*target).index);
            }
            out.push_str(" }");
        }
        ExprKind::Return { value } => {
            out.push_str("return ");
            print_operand(arena, *value, out);
        }
        ExprKind::Undefined => out.push_str("undefined"),
        ExprKind::Wildcard => out.push('_'),
        ExprKind::Identifier { name } => {
            let _ = write!(out, "`{}`", name);
        }
        ExprKind::Let { vardecl, body } => {
            out.push_str("let ");
            print_node(arena, *vardecl, out);
            out.push_str(" in ");
            print_operand(arena, *body, out);
        }
        ExprKind::IfThenElse {
            condition,
            then_expr,
            else_expr,
        } => {
            out.push_str("if ");
            print_operand(arena, *condition, out);
            out.push_str(" then ");
            print_operand(arena, *then_expr, out);
            out.push_str(" else ");
            print_operand(arena, *else_expr, out);
        }
    }
}
