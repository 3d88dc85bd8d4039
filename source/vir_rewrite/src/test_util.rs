//! Tree builders shared by the unit tests.
//! Everything is placed in module `M`, class `C`, with a fixed source span.

use crate::ast::*;
pub use crate::ast_util::{bool_typ, int_typ, nat_typ, seq_typ, set_typ, typ_param};
use crate::ast_util::{
    class_typ, mk_binary, mk_block, mk_call, mk_member, mk_old, mk_path, mk_quant, mk_stmt,
    mk_this, mk_unary, mk_var, mk_var_decl, no_attrs,
};
use crate::messages::Span;
use crate::tokens::TokenX;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::collections::HashMap;
use std::rc::Rc;

pub fn sp() -> Span {
    TokenX::source("test.dfy", 1, 1, 0, "x")
}

pub fn var_decl(name: &str, typ: &Typ) -> Var {
    mk_var_decl(&sp(), name, typ, false)
}

pub fn var(x: &Var) -> Expr {
    mk_var(&sp(), x)
}

pub fn int<I: Into<BigInt>>(i: I) -> Expr {
    crate::ast_util::mk_int(&sp(), i)
}

pub fn and(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::And, e1, e2)
}

pub fn le(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Le, e1, e2)
}

pub fn lt(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Lt, e1, e2)
}

pub fn eq(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Eq, e1, e2)
}

pub fn add(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Add, e1, e2)
}

pub fn sub(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Sub, e1, e2)
}

pub fn mul(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Mul, e1, e2)
}

pub fn implies(e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::Implies, e1, e2)
}

pub fn card(e: &Expr) -> Expr {
    mk_unary(&sp(), UnaryOp::Cardinality, e)
}

pub fn index(s: &Expr, i: &Expr) -> Expr {
    let typ = match &*s.typ {
        TypX::Seq(t) => t.clone(),
        TypX::Map { value, .. } => value.clone(),
        _ => int_typ(),
    };
    crate::ast_util::mk_expr(&sp(), &typ, ExprX::Index(s.clone(), i.clone()))
}

pub fn in_set(e: &Expr, s: &Expr) -> Expr {
    mk_binary(&sp(), BinaryOp::In, e, s)
}

pub fn old(e: &Expr) -> Expr {
    mk_old(&sp(), e)
}

pub fn fun_path(name: &str) -> Fun {
    mk_path(&["M", "C", name])
}

/// Call of `M.C.name` with an implicit receiver
pub fn call(name: &str, args: Vec<Expr>, typ: &Typ) -> Expr {
    call_path(&fun_path(name), args, typ)
}

pub fn call_path(fun: &Fun, args: Vec<Expr>, typ: &Typ) -> Expr {
    mk_call(&sp(), fun, Some(&implicit_this()), args, typ)
}

pub fn forall(vars: &[Var], range: Option<&Expr>, body: &Expr) -> Expr {
    mk_quant(&sp(), Quant::Forall, &Rc::new(vars.to_vec()), range, body, &no_attrs())
}

pub fn exists(vars: &[Var], range: Option<&Expr>, body: &Expr) -> Expr {
    mk_quant(&sp(), Quant::Exists, &Rc::new(vars.to_vec()), range, body, &no_attrs())
}

pub fn class(name: &str) -> Typ {
    class_typ(&mk_path(&["M", name]), false)
}

pub fn this() -> Expr {
    mk_this(&sp(), &class("C"), false)
}

pub fn implicit_this() -> Expr {
    mk_this(&sp(), &class("C"), true)
}

/// Field `M.C.name` of `obj`
pub fn member(obj: &Expr, name: &str, typ: &Typ) -> Expr {
    mk_member(&sp(), obj, &fun_path(name), typ)
}

pub fn let_expr(vars: &[Var], rhss: Vec<Expr>, body: &Expr) -> Expr {
    crate::ast_util::mk_expr(
        &sp(),
        &body.typ,
        ExprX::Let { vars: Rc::new(vars.to_vec()), rhss: Rc::new(rhss), body: body.clone() },
    )
}

pub fn stmt_expr(stmt: &Stmt, e: &Expr) -> Expr {
    crate::ast_util::mk_expr(&sp(), &e.typ, ExprX::StmtExpr(stmt.clone(), e.clone()))
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    mk_block(&sp(), stmts)
}

pub fn var_decl_stmt(x: &Var, init: Option<&Expr>) -> Stmt {
    mk_stmt(
        &sp(),
        StmtX::VarDecl { vars: Rc::new(vec![x.clone()]), init: init.map(|e| Rhs::Expr(e.clone())) },
    )
}

pub fn assert_stmt(e: &Expr) -> Stmt {
    mk_stmt(&sp(), StmtX::Assert { e: e.clone(), proof: None })
}

pub fn assign(lhs: &Expr, rhs: &Expr) -> Stmt {
    mk_stmt(&sp(), StmtX::Assign { lhs: lhs.clone(), rhs: Rhs::Expr(rhs.clone()) })
}

/// Evaluate an integer expression built from literals, variables, `+`, `-`, `*`, and `if`
pub fn eval_int(e: &Expr, env: &HashMap<String, i64>) -> Option<i64> {
    match &e.x {
        ExprX::Const(Constant::Int(i)) => i.to_i64(),
        ExprX::Var(x) => env.get(x.name.as_str()).copied(),
        ExprX::Unary(UnaryOp::Neg, e1) => Some(-eval_int(e1, env)?),
        ExprX::Binary(op, e1, e2) => {
            let (a, b) = (eval_int(e1, env)?, eval_int(e2, env)?);
            match op {
                BinaryOp::Add => Some(a + b),
                BinaryOp::Sub => Some(a - b),
                BinaryOp::Mul => Some(a * b),
                _ => None,
            }
        }
        ExprX::If(c, e1, e2) => {
            if eval_bool(c, env)? { eval_int(e1, env) } else { eval_int(e2, env) }
        }
        _ => None,
    }
}

/// Evaluate a boolean expression over integer comparisons and the logical connectives
pub fn eval_bool(e: &Expr, env: &HashMap<String, i64>) -> Option<bool> {
    match &e.x {
        ExprX::Const(Constant::Bool(b)) => Some(*b),
        ExprX::Unary(UnaryOp::Not, e1) => Some(!eval_bool(e1, env)?),
        ExprX::Binary(op, e1, e2) => match op {
            BinaryOp::And => Some(eval_bool(e1, env)? && eval_bool(e2, env)?),
            BinaryOp::Or => Some(eval_bool(e1, env)? || eval_bool(e2, env)?),
            BinaryOp::Implies => Some(!eval_bool(e1, env)? || eval_bool(e2, env)?),
            BinaryOp::Iff => Some(eval_bool(e1, env)? == eval_bool(e2, env)?),
            _ => {
                let (a, b) = (eval_int(e1, env)?, eval_int(e2, env)?);
                match op {
                    BinaryOp::Eq => Some(a == b),
                    BinaryOp::Ne => Some(a != b),
                    BinaryOp::Lt => Some(a < b),
                    BinaryOp::Le => Some(a <= b),
                    BinaryOp::Gt => Some(a > b),
                    BinaryOp::Ge => Some(a >= b),
                    _ => None,
                }
            }
        },
        _ => None,
    }
}
