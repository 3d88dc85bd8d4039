//! Free-variable queries that respect every binding construct:
//! quantifiers, comprehensions, lets, match arms, lambdas, local declarations in blocks,
//! and aggregate forall statements.

use crate::ast::*;
use crate::ast_visitor::{expr_sub_exprs, stmt_sub_exprs, stmt_sub_stmts};
use indexmap::IndexSet;

pub enum FreeOcc<'a> {
    Var(&'a Var),
    This,
}

struct FreeVarWalker<'f> {
    bound: Vec<Ident>,
    /// number of enclosing `old(...)` expressions
    old_depth: usize,
    /// return true to stop the walk; the flag says whether the occurrence is inside `old`
    f: &'f mut dyn FnMut(FreeOcc, bool) -> bool,
}

fn pattern_vars(pat: &Pattern, out: &mut Vec<Var>) {
    match &pat.x {
        PatternX::Var(v) => out.push(v.clone()),
        PatternX::Ctor { args, .. } => {
            for a in args.iter() {
                pattern_vars(a, out);
            }
        }
        PatternX::Wildcard | PatternX::Lit(_) => {}
    }
}

pub fn pattern_bound_vars(pat: &Pattern) -> Vec<Var> {
    let mut out = Vec::new();
    pattern_vars(pat, &mut out);
    out
}

impl<'f> FreeVarWalker<'f> {
    fn with_bound<F: FnOnce(&mut Self) -> bool>(&mut self, vars: &[Var], f: F) -> bool {
        let n = self.bound.len();
        self.bound.extend(vars.iter().map(|v| v.name.clone()));
        let stop = f(self);
        self.bound.truncate(n);
        stop
    }

    fn exprs<'a, I: IntoIterator<Item = &'a Expr>>(&mut self, es: I) -> bool {
        es.into_iter().any(|e| self.expr(e))
    }

    fn attrs(&mut self, attrs: &Attributes) -> bool {
        attrs.iter().any(|a| self.exprs(a.x.args.iter()))
    }

    fn expr(&mut self, e: &Expr) -> bool {
        match &e.x {
            ExprX::Var(v) => {
                if self.bound.iter().rev().any(|b| b == &v.name) {
                    false
                } else {
                    (self.f)(FreeOcc::Var(v), self.old_depth > 0)
                }
            }
            ExprX::This { .. } => (self.f)(FreeOcc::This, self.old_depth > 0),
            ExprX::Old(_, e1) => {
                self.old_depth += 1;
                let stop = self.expr(e1);
                self.old_depth -= 1;
                stop
            }
            ExprX::Quant { vars, range, body, attrs, .. } => self.with_bound(vars, |w| {
                w.attrs(attrs) || w.exprs(range.iter()) || w.expr(body)
            }),
            ExprX::SetComprehension { vars, range, term, .. } => {
                self.with_bound(vars, |w| w.expr(range) || w.exprs(term.iter()))
            }
            ExprX::MapComprehension { vars, range, key, value, .. } => self.with_bound(vars, |w| {
                w.expr(range) || w.exprs(key.iter()) || w.expr(value)
            }),
            ExprX::Let { vars, rhss, body } => {
                self.exprs(rhss.iter()) || self.with_bound(vars, |w| w.expr(body))
            }
            ExprX::LetSuchThat { vars, constraint, body, .. } => {
                self.with_bound(vars, |w| w.expr(constraint) || w.expr(body))
            }
            ExprX::Match { scrutinee, arms } => {
                self.expr(scrutinee)
                    || arms.iter().any(|arm| {
                        let vars = pattern_bound_vars(&arm.x.pattern);
                        self.with_bound(&vars, |w| w.expr(&arm.x.body))
                    })
            }
            ExprX::Lambda { params, reads, requires, body } => self.with_bound(params, |w| {
                w.exprs(reads.iter().map(|f| &f.e)) || w.exprs(requires.iter()) || w.expr(body)
            }),
            ExprX::StmtExpr(s, e1) => self.stmt(s) || self.expr(e1),
            _ => self.exprs(expr_sub_exprs(e)),
        }
    }

    fn stmt(&mut self, s: &Stmt) -> bool {
        match &s.x {
            StmtX::Block(stmts) => {
                let n = self.bound.len();
                let mut stop = false;
                for s in stmts.iter() {
                    if self.stmt(s) {
                        stop = true;
                        break;
                    }
                    if let StmtX::VarDecl { vars, .. } = &s.x {
                        self.bound.extend(vars.iter().map(|v| v.name.clone()));
                    }
                }
                self.bound.truncate(n);
                stop
            }
            StmtX::Forall { vars, range, ensures, body, attrs, forall_exprs } => {
                self.with_bound(vars, |w| {
                    w.attrs(attrs)
                        || w.expr(range)
                        || w.exprs(ensures.iter())
                        || body.as_ref().map_or(false, |b| w.stmt(b))
                })
                // forall_exprs carry their own binders
                || forall_exprs.as_ref().map_or(false, |es| self.exprs(es.iter()))
            }
            StmtX::Match { scrutinee, arms } => {
                self.expr(scrutinee)
                    || arms.iter().any(|arm| {
                        let vars = pattern_bound_vars(&arm.x.pattern);
                        self.with_bound(&vars, |w| w.stmt(&arm.x.body))
                    })
            }
            _ => self.exprs(stmt_sub_exprs(s)) || stmt_sub_stmts(s).into_iter().any(|s| self.stmt(s)),
        }
    }
}

fn walk_free_expr(expr: &Expr, f: &mut dyn FnMut(FreeOcc, bool) -> bool) -> bool {
    FreeVarWalker { bound: Vec::new(), old_depth: 0, f }.expr(expr)
}

fn walk_free_stmt(stmt: &Stmt, f: &mut dyn FnMut(FreeOcc, bool) -> bool) -> bool {
    FreeVarWalker { bound: Vec::new(), old_depth: 0, f }.stmt(stmt)
}

/// Names of the variables occurring free in `expr`, in order of first occurrence
pub fn free_vars_expr(expr: &Expr) -> IndexSet<Ident> {
    let mut vars = IndexSet::new();
    walk_free_expr(expr, &mut |occ, _| {
        if let FreeOcc::Var(v) = occ {
            vars.insert(v.name.clone());
        }
        false
    });
    vars
}

pub fn free_vars_stmt(stmt: &Stmt) -> IndexSet<Ident> {
    let mut vars = IndexSet::new();
    walk_free_stmt(stmt, &mut |occ, _| {
        if let FreeOcc::Var(v) = occ {
            vars.insert(v.name.clone());
        }
        false
    });
    vars
}

/// Free variable declarations (not just names) occurring in `expr`
pub fn free_var_decls(expr: &Expr) -> Vec<Var> {
    let mut vars: Vec<Var> = Vec::new();
    walk_free_expr(expr, &mut |occ, _| {
        if let FreeOcc::Var(v) = occ {
            if !vars.iter().any(|x| x.name == v.name) {
                vars.push(v.clone());
            }
        }
        false
    });
    vars
}

fn var_matches(occ: FreeOcc, in_old: bool, old_only: bool, var: Option<&Ident>) -> bool {
    match occ {
        FreeOcc::This => false,
        FreeOcc::Var(_) if old_only && !in_old => false,
        FreeOcc::Var(v) => var.map_or(true, |x| *x == v.name),
    }
}

/// Does `var` (or, when `None`, any variable) occur free in `expr`?
/// With `old_only`, only occurrences inside `old(...)` count.
pub fn contains_free_variable(expr: &Expr, old_only: bool, var: Option<&Ident>) -> bool {
    walk_free_expr(expr, &mut |occ, in_old| var_matches(occ, in_old, old_only, var))
}

pub fn stmt_contains_free_variable(stmt: &Stmt, old_only: bool, var: Option<&Ident>) -> bool {
    walk_free_stmt(stmt, &mut |occ, in_old| var_matches(occ, in_old, old_only, var))
}

pub fn contains_free_var_in(expr: &Expr, names: &[Ident]) -> bool {
    walk_free_expr(expr, &mut |occ, _| match occ {
        FreeOcc::This => false,
        FreeOcc::Var(v) => names.contains(&v.name),
    })
}

/// Does `expr` refer to the receiver, explicitly or implicitly?
pub fn mentions_receiver(expr: &Expr) -> bool {
    walk_free_expr(expr, &mut |occ, _| matches!(occ, FreeOcc::This))
}

/// Does `expr` refer to the previous heap state (`old`, `fresh`, `unchanged`)?
pub fn mentions_old_state(expr: &Expr) -> bool {
    crate::ast_visitor::expr_any(expr, |e| {
        matches!(&e.x, ExprX::Old(..) | ExprX::Fresh(_) | ExprX::Unchanged(_))
    })
}

/// Names bound anywhere inside `expr`
pub fn bound_var_names(expr: &Expr) -> IndexSet<Ident> {
    let mut names = IndexSet::new();
    crate::ast_visitor::expr_any(expr, |e| {
        match &e.x {
            ExprX::Quant { vars, .. }
            | ExprX::SetComprehension { vars, .. }
            | ExprX::MapComprehension { vars, .. }
            | ExprX::Let { vars, .. }
            | ExprX::LetSuchThat { vars, .. }
            | ExprX::Lambda { params: vars, .. } => {
                names.extend(vars.iter().map(|v| v.name.clone()));
            }
            ExprX::Match { arms, .. } => {
                for arm in arms.iter() {
                    names.extend(pattern_bound_vars(&arm.x.pattern).iter().map(|v| v.name.clone()));
                }
            }
            _ => {}
        }
        false
    });
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::str_ident;
    use crate::test_util::*;

    #[test]
    fn quantifier_binds_its_variables() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let q = forall(&[x.clone()], Some(&lt(&var(&x), &var(&y))), &le(&var(&x), &int(10)));
        let fvs: Vec<String> = free_vars_expr(&q).iter().map(|x| x.to_string()).collect();
        assert_eq!(fvs, vec!["y"]);
        assert!(!contains_free_variable(&q, false, Some(&str_ident("x"))));
        assert!(contains_free_variable(&q, false, Some(&str_ident("y"))));
    }

    #[test]
    fn let_rhs_is_outside_the_binding() {
        let x = var_decl("x", &int_typ());
        // var x := x + 1; x
        let e = let_expr(&[x.clone()], vec![add(&var(&x), &int(1))], &var(&x));
        assert!(free_vars_expr(&e).contains(&str_ident("x")));
        let e = let_expr(&[x.clone()], vec![int(1)], &var(&x));
        assert!(free_vars_expr(&e).is_empty());
    }

    #[test]
    fn block_declarations_scope_over_later_statements() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let block = block(vec![
            assert_stmt(&lt(&var(&x), &int(0))),
            var_decl_stmt(&x, Some(&int(1))),
            assert_stmt(&lt(&var(&x), &var(&y))),
        ]);
        let fvs = free_vars_stmt(&block);
        assert!(fvs.contains(&str_ident("x")));
        assert!(fvs.contains(&str_ident("y")));
        let block2 = crate::ast_util::mk_block(
            &sp(),
            vec![var_decl_stmt(&x, Some(&int(1))), assert_stmt(&lt(&var(&x), &var(&y)))],
        );
        let fvs = free_vars_stmt(&block2);
        assert!(!fvs.contains(&str_ident("x")));
    }

    #[test]
    fn receiver_detection() {
        let e = member(&this(), "f", &int_typ());
        assert!(mentions_receiver(&e));
        assert!(mentions_receiver(&member(&implicit_this(), "f", &int_typ())));
        assert!(!mentions_receiver(&int(3)));
        // the receiver is not a variable
        assert!(!contains_free_variable(&e, false, None));
        assert!(mentions_old_state(&old(&e)));
        assert!(!mentions_old_state(&e));
    }

    #[test]
    fn no_variable_given_matches_any_free_variable() {
        let x = var_decl("x", &int_typ());
        assert!(contains_free_variable(&add(&var(&x), &int(1)), false, None));
        assert!(!contains_free_variable(&add(&int(2), &int(1)), false, None));
        let q = forall(&[x.clone()], None, &le(&var(&x), &int(10)));
        assert!(!contains_free_variable(&q, false, None));
    }

    #[test]
    fn old_only_counts_occurrences_inside_old() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let name = str_ident("x");
        assert!(!contains_free_variable(&var(&x), true, Some(&name)));
        assert!(contains_free_variable(&old(&var(&x)), true, Some(&name)));
        assert!(contains_free_variable(&add(&var(&y), &old(&var(&x))), true, None));
        assert!(!contains_free_variable(&add(&var(&x), &old(&var(&y))), true, Some(&name)));
        // old(x) is still an occurrence of x
        assert!(contains_free_variable(&old(&var(&x)), false, Some(&name)));
        let s = assert_stmt(&old(&var(&y)));
        assert!(stmt_contains_free_variable(&s, true, Some(&str_ident("y"))));
        assert!(!stmt_contains_free_variable(&assert_stmt(&var(&y)), true, None));
    }
}
