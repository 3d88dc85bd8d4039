//! Capture-avoiding substitution of variables, type parameters, and the receiver.
//!
//! The result is always a freshly built tree; the input is never modified.
//! A binder whose name would capture a free variable of some replacement expression
//! is renamed (`x#0`, `x#1`, ...), and a binder that shadows a substituted name hides
//! that name from the substitution inside its scope.

use crate::ast::*;
use crate::ast_util::{mk_var, mk_var_decl_with};
use crate::ast_visitor::{map_attrs, map_children_exprx, map_children_stmtx, ExprMapper};
use crate::free_vars::{bound_var_names, free_vars_expr, free_vars_stmt, pattern_bound_vars};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::rc::Rc;

pub fn subst_typ(typ: &Typ, typ_map: &HashMap<Ident, Typ>) -> Typ {
    if typ_map.is_empty() {
        return typ.clone();
    }
    let typs = |ts: &Typs| -> Typs { Rc::new(ts.iter().map(|t| subst_typ(t, typ_map)).collect()) };
    match &**typ {
        TypX::TypParam(x) => match typ_map.get(x) {
            Some(t) => t.clone(),
            None => typ.clone(),
        },
        TypX::Set { finite, elem } => {
            Rc::new(TypX::Set { finite: *finite, elem: subst_typ(elem, typ_map) })
        }
        TypX::Multiset(t) => Rc::new(TypX::Multiset(subst_typ(t, typ_map))),
        TypX::Seq(t) => Rc::new(TypX::Seq(subst_typ(t, typ_map))),
        TypX::Map { finite, key, value } => Rc::new(TypX::Map {
            finite: *finite,
            key: subst_typ(key, typ_map),
            value: subst_typ(value, typ_map),
        }),
        TypX::Class { path, args, nullable } => {
            Rc::new(TypX::Class { path: path.clone(), args: typs(args), nullable: *nullable })
        }
        TypX::Datatype { path, args } => {
            Rc::new(TypX::Datatype { path: path.clone(), args: typs(args) })
        }
        TypX::Arrow(params, ret) => Rc::new(TypX::Arrow(typs(params), subst_typ(ret, typ_map))),
        TypX::Bool
        | TypX::Int
        | TypX::Nat
        | TypX::Real
        | TypX::Char
        | TypX::String
        | TypX::Object { .. } => typ.clone(),
    }
}

/// `base#0`, `base#1`, ... : the first candidate not in `avoid`
pub fn fresh_name(base: &str, avoid: &HashSet<Ident>) -> Ident {
    let base = match base.find('#') {
        Some(i) => &base[..i],
        None => base,
    };
    let mut n = 0;
    loop {
        let candidate = Rc::new(format!("{}#{}", base, n));
        if !avoid.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

struct Substituter<'a> {
    var_map: im::HashMap<Ident, Expr>,
    typ_map: &'a HashMap<Ident, Typ>,
    receiver: Option<Expr>,
    /// free variables of all replacement expressions
    avoid: HashSet<Ident>,
}

impl<'a> Substituter<'a> {
    fn new(
        receiver: Option<&Expr>,
        var_map: &HashMap<Ident, Expr>,
        typ_map: &'a HashMap<Ident, Typ>,
    ) -> Self {
        let mut avoid: HashSet<Ident> = HashSet::new();
        for e in var_map.values().chain(receiver.into_iter()) {
            avoid.extend(free_vars_expr(e));
        }
        Substituter {
            var_map: var_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            typ_map,
            receiver: receiver.cloned(),
            avoid,
        }
    }

    fn typ(&self, typ: &Typ) -> Typ {
        subst_typ(typ, self.typ_map)
    }

    /// Enter the scope of `vars`; `inner_names` are the names used inside that scope.
    /// Returns the (possibly renamed) binders.
    fn bind(&mut self, vars: &[Var], inner_names: &HashSet<Ident>) -> Vec<Var> {
        let mut taken: HashSet<Ident> = self.avoid.union(inner_names).cloned().collect();
        taken.extend(vars.iter().map(|v| v.name.clone()));
        let mut result = Vec::with_capacity(vars.len());
        for v in vars {
            let new_typ = self.typ(&v.typ);
            if self.avoid.contains(&v.name) {
                let name = fresh_name(&v.name, &taken);
                taken.insert(name.clone());
                let new_var = mk_var_decl_with(&v.span, name, &new_typ, v.is_ghost.get());
                self.var_map.insert(v.name.clone(), mk_var(&v.span, &new_var));
                result.push(new_var);
            } else if new_typ != v.typ {
                let new_var = mk_var_decl_with(&v.span, v.name.clone(), &new_typ, v.is_ghost.get());
                self.var_map.insert(v.name.clone(), mk_var(&v.span, &new_var));
                result.push(new_var);
            } else {
                self.var_map.remove(&v.name);
                result.push(v.clone());
            }
        }
        result
    }

    fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.var_map.clone();
        let r = f(self);
        self.var_map = saved;
        r
    }

    fn expr(&mut self, e: &Expr) -> Expr {
        match self.map_expr(e) {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    fn opt(&mut self, e: &Option<Expr>) -> Option<Expr> {
        e.as_ref().map(|e| self.expr(e))
    }

    fn exprs(&mut self, es: &Exprs) -> Exprs {
        Rc::new(es.iter().map(|e| self.expr(e)).collect())
    }

    fn attrs(&mut self, attrs: &Attributes) -> Attributes {
        match map_attrs(self, attrs) {
            Ok(a) => a,
            Err(never) => match never {},
        }
    }

    fn stmt(&mut self, s: &Stmt) -> Stmt {
        match self.map_stmt(s) {
            Ok(s) => s,
            Err(never) => match never {},
        }
    }

    fn rename_pattern(&self, pat: &Pattern, renamed: &HashMap<Ident, Var>) -> Pattern {
        let x = match &pat.x {
            PatternX::Var(v) => match renamed.get(&v.name) {
                Some(nv) => PatternX::Var(nv.clone()),
                None => PatternX::Var(v.clone()),
            },
            PatternX::Ctor { datatype, variant, args } => PatternX::Ctor {
                datatype: datatype.clone(),
                variant: variant.clone(),
                args: Rc::new(args.iter().map(|a| self.rename_pattern(a, renamed)).collect()),
            },
            PatternX::Wildcard => PatternX::Wildcard,
            PatternX::Lit(c) => PatternX::Lit(c.clone()),
        };
        SpannedTyped::new(&pat.span, &self.typ(&pat.typ), x)
    }

    fn bind_pattern(&mut self, pat: &Pattern, inner: &HashSet<Ident>) -> Pattern {
        let vars = pattern_bound_vars(pat);
        let new_vars = self.bind(&vars, inner);
        let renamed: HashMap<Ident, Var> =
            vars.iter().zip(new_vars.iter()).map(|(o, n)| (o.name.clone(), n.clone())).collect();
        self.rename_pattern(pat, &renamed)
    }
}

fn names_in(es: &[&Expr]) -> HashSet<Ident> {
    let mut names = HashSet::new();
    for e in es {
        names.extend(free_vars_expr(e));
        names.extend(bound_var_names(e));
    }
    names
}

fn names_in_stmt(s: &Stmt) -> HashSet<Ident> {
    let mut names: HashSet<Ident> = free_vars_stmt(s).into_iter().collect();
    crate::ast_visitor::stmt_any(s, |s| {
        if let StmtX::VarDecl { vars, .. } | StmtX::Forall { vars, .. } = &s.x {
            names.extend(vars.iter().map(|v| v.name.clone()));
        }
        false
    });
    names
}

impl<'a> ExprMapper for Substituter<'a> {
    type Err = Infallible;

    fn map_expr(&mut self, e: &Expr) -> Result<Expr, Infallible> {
        let x = match &e.x {
            ExprX::Var(v) => match self.var_map.get(&v.name) {
                Some(replacement) => return Ok(replacement.clone()),
                None => ExprX::Var(v.clone()),
            },
            ExprX::This { implicit } => match &self.receiver {
                Some(r) => return Ok(r.clone()),
                None => ExprX::This { implicit: *implicit },
            },
            ExprX::TypeTest(e1, t) => ExprX::TypeTest(self.expr(e1), self.typ(t)),
            ExprX::Quant { quant, vars, range, body, attrs } => {
                let mut es: Vec<&Expr> = range.iter().collect();
                es.push(body);
                let inner = names_in(&es);
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    ExprX::Quant {
                        quant: *quant,
                        vars: Rc::new(vars),
                        attrs: s.attrs(attrs),
                        range: s.opt(range),
                        body: s.expr(body),
                    }
                })
            }
            ExprX::SetComprehension { finite, vars, range, term } => {
                let mut es = vec![range];
                es.extend(term.iter());
                let inner = names_in(&es);
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    ExprX::SetComprehension {
                        finite: *finite,
                        vars: Rc::new(vars),
                        range: s.expr(range),
                        term: s.opt(term),
                    }
                })
            }
            ExprX::MapComprehension { finite, vars, range, key, value } => {
                let mut es = vec![range, value];
                es.extend(key.iter());
                let inner = names_in(&es);
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    ExprX::MapComprehension {
                        finite: *finite,
                        vars: Rc::new(vars),
                        range: s.expr(range),
                        key: s.opt(key),
                        value: s.expr(value),
                    }
                })
            }
            ExprX::Let { vars, rhss, body } => {
                let rhss = self.exprs(rhss);
                let inner = names_in(&[body]);
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    ExprX::Let { vars: Rc::new(vars), rhss, body: s.expr(body) }
                })
            }
            ExprX::LetSuchThat { vars, constraint, body, bounds } => {
                let inner = names_in(&[constraint, body]);
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    ExprX::LetSuchThat {
                        vars: Rc::new(vars),
                        constraint: s.expr(constraint),
                        body: s.expr(body),
                        bounds: RefCell::new(bounds.borrow().clone()),
                    }
                })
            }
            ExprX::Match { scrutinee, arms } => {
                let scrutinee = self.expr(scrutinee);
                let mut new_arms = Vec::with_capacity(arms.len());
                for arm in arms.iter() {
                    let inner = names_in(&[&arm.x.body]);
                    new_arms.push(self.scoped(|s| {
                        let pattern = s.bind_pattern(&arm.x.pattern, &inner);
                        arm.new_x(ArmX { pattern, body: s.expr(&arm.x.body) })
                    }));
                }
                ExprX::Match { scrutinee, arms: Rc::new(new_arms) }
            }
            ExprX::Lambda { params, reads, requires, body } => {
                let mut es: Vec<&Expr> = reads.iter().map(|f| &f.e).collect();
                es.extend(requires.iter());
                es.push(body);
                let inner = names_in(&es);
                self.scoped(|s| {
                    let params = s.bind(params, &inner);
                    let reads = Rc::new(
                        reads
                            .iter()
                            .map(|f| crate::ast_util::mk_frame(&s.expr(&f.e), f.field.as_ref()))
                            .collect(),
                    );
                    ExprX::Lambda {
                        params: Rc::new(params),
                        reads,
                        requires: s.opt(requires),
                        body: s.expr(body),
                    }
                })
            }
            _ => map_children_exprx(self, &e.x)?,
        };
        Ok(SpannedTyped::new(&e.span, &self.typ(&e.typ), x))
    }

    fn map_stmt(&mut self, st: &Stmt) -> Result<Stmt, Infallible> {
        let x = match &st.x {
            StmtX::Block(stmts) => {
                let inner = names_in_stmt(st);
                self.scoped(|s| {
                    let mut new_stmts = Vec::with_capacity(stmts.len());
                    for stmt in stmts.iter() {
                        match &stmt.x {
                            StmtX::VarDecl { vars, init } => {
                                let init = match init {
                                    None => None,
                                    Some(Rhs::Expr(e)) => Some(Rhs::Expr(s.expr(e))),
                                    Some(Rhs::New { typ, ctor, args }) => Some(Rhs::New {
                                        typ: s.typ(typ),
                                        ctor: ctor.clone(),
                                        args: s.exprs(args),
                                    }),
                                    Some(Rhs::Havoc) => Some(Rhs::Havoc),
                                };
                                let vars = s.bind(vars, &inner);
                                new_stmts.push(stmt.new_x(StmtX::VarDecl { vars: Rc::new(vars), init }));
                            }
                            _ => new_stmts.push(s.stmt(stmt)),
                        }
                    }
                    StmtX::Block(Rc::new(new_stmts))
                })
            }
            StmtX::Forall { vars, range, ensures, body, attrs, forall_exprs } => {
                let forall_exprs = forall_exprs.as_ref().map(|es| self.exprs(es));
                let mut inner = names_in_stmt(st);
                inner.extend(names_in(&[range]));
                self.scoped(|s| {
                    let vars = s.bind(vars, &inner);
                    StmtX::Forall {
                        vars: Rc::new(vars),
                        attrs: s.attrs(attrs),
                        range: s.expr(range),
                        ensures: s.exprs(ensures),
                        body: body.as_ref().map(|b| s.stmt(b)),
                        forall_exprs,
                    }
                })
            }
            StmtX::Match { scrutinee, arms } => {
                let scrutinee = self.expr(scrutinee);
                let mut new_arms = Vec::with_capacity(arms.len());
                for arm in arms.iter() {
                    let inner = names_in_stmt(&arm.x.body);
                    new_arms.push(self.scoped(|s| {
                        let pattern = s.bind_pattern(&arm.x.pattern, &inner);
                        arm.new_x(StmtArmX { pattern, body: s.stmt(&arm.x.body) })
                    }));
                }
                StmtX::Match { scrutinee, arms: Rc::new(new_arms) }
            }
            _ => map_children_stmtx(self, &st.x)?,
        };
        Ok(st.new_x(x))
    }
}

/// Replace free occurrences of the variables in `var_map` and the type parameters in `typ_map`
pub fn substitute_expr(
    expr: &Expr,
    var_map: &HashMap<Ident, Expr>,
    typ_map: &HashMap<Ident, Typ>,
) -> Expr {
    Substituter::new(None, var_map, typ_map).expr(expr)
}

/// Like `substitute_expr`, additionally replacing `this` (explicit or implicit) with `receiver`
pub fn substitute_expr_with_receiver(
    expr: &Expr,
    receiver: Option<&Expr>,
    var_map: &HashMap<Ident, Expr>,
    typ_map: &HashMap<Ident, Typ>,
) -> Expr {
    Substituter::new(receiver, var_map, typ_map).expr(expr)
}

pub fn substitute_stmt(
    stmt: &Stmt,
    receiver: Option<&Expr>,
    var_map: &HashMap<Ident, Expr>,
    typ_map: &HashMap<Ident, Typ>,
) -> Stmt {
    Substituter::new(receiver, var_map, typ_map).stmt(stmt)
}

/// `expr[x := replacement]`
pub fn subst_var(expr: &Expr, x: &Ident, replacement: &Expr) -> Expr {
    let mut var_map = HashMap::new();
    var_map.insert(x.clone(), replacement.clone());
    substitute_expr(expr, &var_map, &HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::str_ident;
    use crate::free_vars::free_vars_expr;
    use crate::test_util::*;
    use proptest::prelude::*;

    #[test]
    fn replaces_free_occurrences_only() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        // x + (forall x :: x < y)
        let e = and(&lt(&var(&x), &int(3)), &forall(&[x.clone()], None, &lt(&var(&x), &var(&y))));
        let r = subst_var(&e, &str_ident("x"), &int(7));
        assert_eq!(r.to_string(), "7 < 3 && (forall x: int :: x < y)");
    }

    #[test]
    fn renames_binder_that_would_capture() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        // forall x :: x < y   with y := x + 1
        let q = forall(&[x.clone()], None, &lt(&var(&x), &var(&y)));
        let r = subst_var(&q, &str_ident("y"), &add(&var(&x), &int(1)));
        assert_eq!(r.to_string(), "forall x#0: int :: x#0 < x + 1");
        let fvs: Vec<String> = free_vars_expr(&r).iter().map(|s| s.to_string()).collect();
        assert_eq!(fvs, vec!["x"]);
    }

    #[test]
    fn substitutes_receiver() {
        let c = var_decl("c", &class("C"));
        let e = member(&this(), "f", &int_typ());
        let r = substitute_expr_with_receiver(&e, Some(&var(&c)), &HashMap::new(), &HashMap::new());
        assert_eq!(r.to_string(), "c.f");
        let implicit = member(&implicit_this(), "f", &int_typ());
        assert_eq!(implicit.to_string(), "f");
        let r = substitute_expr_with_receiver(&implicit, Some(&var(&c)), &HashMap::new(), &HashMap::new());
        assert_eq!(r.to_string(), "c.f");
    }

    #[test]
    fn substitutes_type_parameters_in_binders() {
        let t = typ_param("T");
        let x = var_decl("x", &seq_typ(&t));
        let q = forall(&[x.clone()], None, &le(&int(0), &card(&var(&x))));
        let mut typ_map = HashMap::new();
        typ_map.insert(str_ident("T"), int_typ());
        let r = substitute_expr(&q, &HashMap::new(), &typ_map);
        assert_eq!(r.to_string(), "forall x: seq<int> :: 0 <= |x|");
    }

    proptest! {
        // Substituting a term that mentions the bound name never lets it be captured.
        #[test]
        fn no_capture(depth in 1usize..4, k in -5i64..5) {
            let x = var_decl("x", &int_typ());
            let y = var_decl("y", &int_typ());
            let mut e = lt(&var(&x), &var(&y));
            for _ in 0..depth {
                e = forall(&[x.clone()], None, &e);
            }
            let replacement = add(&var(&x), &int(k));
            let r = subst_var(&e, &str_ident("y"), &replacement);
            let fvs = free_vars_expr(&r);
            prop_assert!(fvs.contains(&str_ident("x")));
            prop_assert!(!fvs.contains(&str_ident("y")));
            prop_assert_eq!(fvs.len(), 1);
        }
    }
}
