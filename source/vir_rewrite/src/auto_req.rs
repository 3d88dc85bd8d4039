//! `{:autoReq}`: strengthen a function's preconditions with whatever its requires clauses and
//! body need to be well-formed. Each callee's preconditions, instantiated with the actual
//! arguments, and the bounds of every sequence index are collected under the path conditions
//! that guard them (`if`, `&&`, `||`, `==>`), then added as `requires` clauses.

use crate::ast::*;
use crate::ast_util::{mk_binary, mk_expr, mk_int, mk_not, mk_quant, mk_unary};
use crate::ast_visitor::expr_sub_exprs;
use crate::attributes::{bool_attr, AUTO_REQ};
use crate::context::GlobalCtx;
use crate::free_vars::free_vars_expr;
use crate::messages::Reporter;
use crate::printer::expr_to_string;
use crate::rewriter::Rewriter;
use crate::substitute::substitute_expr_with_receiver;
use indexmap::IndexSet;
use std::collections::HashMap;
use std::rc::Rc;

pub struct AutoReq {}

impl AutoReq {
    pub fn new() -> Self {
        AutoReq {}
    }
}

fn is_seq(typ: &Typ) -> bool {
    matches!(&**typ, TypX::Seq(_) | TypX::String)
}

fn guard(span: &Span, cond: &Expr, reqs: Vec<Expr>) -> Vec<Expr> {
    reqs.iter().map(|r| mk_binary(span, BinaryOp::Implies, cond, r)).collect()
}

fn mentions_any(e: &Expr, vars: &Vars) -> bool {
    let free = free_vars_expr(e);
    vars.iter().any(|v| free.contains(&v.name))
}

struct Generator<'a> {
    ctx: &'a GlobalCtx,
}

impl<'a> Generator<'a> {
    fn all(&self, exprs: &[Expr]) -> Vec<Expr> {
        exprs.iter().flat_map(|e| self.reqs(e)).collect()
    }

    fn reqs(&self, expr: &Expr) -> Vec<Expr> {
        let span = &expr.span;
        match &expr.x {
            ExprX::Call { fun, receiver, args, .. } => {
                let mut out = receiver.as_ref().map_or(vec![], |r| self.reqs(r));
                out.extend(self.all(args));
                if let Some(callee) = self.ctx.function(fun) {
                    let var_map: HashMap<Ident, Expr> =
                        callee.params.iter().zip(args.iter()).map(|(p, a)| (p.var.name.clone(), a.clone())).collect();
                    for r in callee.requires.iter() {
                        out.push(substitute_expr_with_receiver(r, receiver.as_ref(), &var_map, &HashMap::new()));
                    }
                }
                out
            }
            ExprX::Index(s, i) if is_seq(&s.typ) => {
                let mut out = self.reqs(s);
                out.extend(self.reqs(i));
                out.push(mk_binary(span, BinaryOp::Le, &mk_int(span, 0), i));
                out.push(mk_binary(span, BinaryOp::Lt, i, &mk_unary(span, UnaryOp::Cardinality, s)));
                out
            }
            ExprX::Slice(s, lo, hi) if is_seq(&s.typ) => {
                let mut out = self.reqs(s);
                let len = mk_unary(span, UnaryOp::Cardinality, s);
                if let Some(lo) = lo {
                    out.extend(self.reqs(lo));
                    out.push(mk_binary(span, BinaryOp::Le, &mk_int(span, 0), lo));
                }
                if let Some(hi) = hi {
                    out.extend(self.reqs(hi));
                    if let Some(lo) = lo {
                        out.push(mk_binary(span, BinaryOp::Le, lo, hi));
                    } else {
                        out.push(mk_binary(span, BinaryOp::Le, &mk_int(span, 0), hi));
                    }
                    out.push(mk_binary(span, BinaryOp::Le, hi, &len));
                } else if let Some(lo) = lo {
                    out.push(mk_binary(span, BinaryOp::Le, lo, &len));
                }
                out
            }
            ExprX::Binary(op @ (BinaryOp::And | BinaryOp::Implies | BinaryOp::Or), e1, e2) => {
                let mut out = self.reqs(e1);
                let cond = if *op == BinaryOp::Or { mk_not(span, e1) } else { e1.clone() };
                out.extend(guard(span, &cond, self.reqs(e2)));
                out
            }
            ExprX::If(c, e1, e2) => {
                let mut out = self.reqs(c);
                out.extend(guard(span, c, self.reqs(e1)));
                out.extend(guard(span, &mk_not(span, c), self.reqs(e2)));
                out
            }
            ExprX::Let { vars, rhss, body } => {
                let mut out = self.all(rhss);
                for r in self.reqs(body) {
                    if mentions_any(&r, vars) {
                        let body = r.clone();
                        out.push(mk_expr(span, &r.typ, ExprX::Let { vars: vars.clone(), rhss: rhss.clone(), body }));
                    } else {
                        out.push(r);
                    }
                }
                out
            }
            ExprX::Quant { vars, range, body, .. } => {
                let no_attrs: Attributes = Rc::new(vec![]);
                let close = |range: Option<&Expr>, r: Expr| {
                    if mentions_any(&r, vars) {
                        mk_quant(span, Quant::Forall, vars, range, &r, &no_attrs)
                    } else {
                        r
                    }
                };
                let mut out: Vec<Expr> =
                    range.as_ref().map_or(vec![], |r| self.reqs(r)).into_iter().map(|r| close(None, r)).collect();
                out.extend(self.reqs(body).into_iter().map(|r| close(range.as_ref(), r)));
                out
            }
            ExprX::Old(label, e) => {
                self.reqs(e).into_iter().map(|r| mk_expr(span, &r.typ, ExprX::Old(label.clone(), r.clone()))).collect()
            }
            ExprX::Match { scrutinee, .. } => self.reqs(scrutinee),
            ExprX::StmtExpr(_, e) => self.reqs(e),
            // bound variables of these would escape
            ExprX::Lambda { .. }
            | ExprX::SetComprehension { .. }
            | ExprX::MapComprehension { .. }
            | ExprX::LetSuchThat { .. } => vec![],
            _ => expr_sub_exprs(expr).into_iter().flat_map(|e| self.reqs(e)).collect(),
        }
    }
}

/// New requires clauses, before and after the existing ones
fn auto_requires(
    ctx: &GlobalCtx,
    span: &Span,
    requires: &mut Vec<Expr>,
    body: Option<&Expr>,
    reporter: &mut Reporter,
) {
    let generator = Generator { ctx };
    let mut seen: IndexSet<String> = requires.iter().map(expr_to_string).collect();
    let fresh = |reqs: Vec<Expr>, seen: &mut IndexSet<String>| -> Vec<Expr> {
        reqs.into_iter().filter(|r| seen.insert(expr_to_string(r))).collect()
    };
    let before = fresh(generator.all(requires), &mut seen);
    let after = fresh(body.map_or(vec![], |b| generator.reqs(b)), &mut seen);
    if before.is_empty() && after.is_empty() {
        return;
    }
    let text: Vec<String> = before.iter().chain(after.iter()).map(expr_to_string).collect();
    reporter.info(span, format!("auto requires: {}", text.join("; ")));
    tracing::debug!(count = text.len(), "auto requires added");
    let mut new_requires = before;
    new_requires.append(requires);
    new_requires.extend(after);
    *requires = new_requires;
}

impl Rewriter for AutoReq {
    fn name(&self) -> &'static str {
        "auto-req"
    }

    fn post_resolve_intermediate(
        &mut self,
        module: &mut Module,
        ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        for decl in module.decls.iter_mut() {
            let members = match decl.members_mut() {
                Some(members) => members,
                None => continue,
            };
            for member in members.iter_mut() {
                match member {
                    Member::Function(f) if bool_attr(&f.attrs, AUTO_REQ) == Some(true) => {
                        auto_requires(ctx, &f.span, &mut f.requires, f.body.as_ref(), reporter);
                    }
                    Member::Method(m) if bool_attr(&m.attrs, AUTO_REQ) == Some(true) => {
                        auto_requires(ctx, &m.span, &mut m.requires, None, reporter);
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
