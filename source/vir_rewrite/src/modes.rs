//! Compilability classification.
//!
//! `check_is_compilable` decides whether an expression may appear in compiled code, reporting
//! each ghost-only construct it finds.
//! It is not a pure query: it promotes let-bound variables whose right-hand sides use
//! specification features to ghost, records how calls to functions with by-method bodies are
//! compiled, marks datatype updates as compiled, and caches the bounds of let-such-that
//! expressions.
//! `uses_spec_features` is the side-effect-free sibling that only detects ghost content;
//! whenever it returns false, `check_is_compilable` raises no ghost-related error.

use crate::ast::*;
use crate::ast_util::{conjoin, internal_err};
use crate::bounds::{discover_bounds, uncompilable_bound_vars};
use crate::context::GlobalCtx;
use crate::messages::Reporter;
use std::collections::HashSet;
use std::rc::Rc;

pub struct ModeChecker<'a, 'r> {
    ctx: &'a GlobalCtx,
    reporter: &'a mut Reporter<'r>,
    /// when false, errors are not reported (speculative probing)
    report_errors: bool,
    /// bounds may only be cached once resolution has finished
    resolution_complete: bool,
}

fn ghost_function_message(f: &Function) -> String {
    match f.kind {
        FunctionKind::TwoStateFunction | FunctionKind::TwoStatePredicate => {
            "a two-state function is allowed only in specification contexts".to_string()
        }
        FunctionKind::LeastPredicate | FunctionKind::GreatestPredicate | FunctionKind::PrefixPredicate => {
            format!("a {} is allowed only in specification contexts", f.kind.keyword(true))
        }
        FunctionKind::Function | FunctionKind::Predicate => {
            let what = if f.kind.is_predicate() { "predicate" } else { "function" };
            format!(
                "a call to a ghost {} is allowed only in specification contexts (consider declaring the {} with '{} method')",
                what, what, what
            )
        }
    }
}

/// The range from which bounds of a quantifier's variables are read
fn bounds_range(quant: Quant, range: &Option<Expr>, body: &Expr) -> Option<Expr> {
    match (quant, range) {
        (Quant::Forall, Some(r)) => Some(r.clone()),
        (Quant::Forall, None) => match &body.x {
            ExprX::Binary(BinaryOp::Implies, antecedent, _) => Some(antecedent.clone()),
            _ => None,
        },
        (Quant::Exists, Some(r)) => Some(conjoin(&r.span, &[r.clone(), body.clone()])),
        (Quant::Exists, None) => Some(body.clone()),
    }
}

/// Can a value of static type `from` be tested at run time for being a `to`?
/// An upcast always can. A downcast requires every type parameter of `to` to be recoverable
/// from the type arguments `to` passes to `from`.
fn type_test_is_checkable(ctx: &GlobalCtx, from: &Typ, to: &Typ) -> bool {
    match (&**from, &**to) {
        (TypX::Class { path: from_path, .. }, TypX::Class { path: to_path, .. }) => {
            if from_path == to_path || ctx.parent_args(from_path, to_path).is_some() {
                return true;
            }
            let to_params = match ctx.classes.get(to_path) {
                Some(info) => info.typ_params.clone(),
                None => return false,
            };
            match ctx.parent_args(to_path, from_path) {
                None => false,
                Some(args) => to_params.iter().all(|x| {
                    args.iter().any(|t| matches!(&**t, TypX::TypParam(y) if y == x))
                }),
            }
        }
        (TypX::Object { .. }, TypX::Class { path, .. }) => {
            ctx.classes.get(path).map_or(false, |info| info.typ_params.is_empty())
        }
        _ => from == to,
    }
}

impl<'a, 'r> ModeChecker<'a, 'r> {
    pub fn new(ctx: &'a GlobalCtx, reporter: &'a mut Reporter<'r>, report_errors: bool) -> Self {
        ModeChecker { ctx, reporter, report_errors, resolution_complete: true }
    }

    /// A checker used before resolution has finished; it refuses to cache bounds
    pub fn during_resolution(mut self) -> Self {
        self.resolution_complete = false;
        self
    }

    fn error(&mut self, span: &Span, msg: String) {
        if self.report_errors {
            self.reporter.error(span, msg);
        }
    }

    fn check_all<'e>(&mut self, es: impl Iterator<Item = &'e Expr>) -> Result<bool, VirErr> {
        let mut ok = true;
        for e in es {
            ok &= self.check_is_compilable(e)?;
        }
        Ok(ok)
    }

    fn check_bounds(&mut self, span: &Span, what: &str, vars: &Vars, range: Option<&Expr>) -> bool {
        let missing = uncompilable_bound_vars(vars, range);
        for x in missing.iter() {
            self.error(
                span,
                format!(
                    "{} in non-ghost contexts must be compilable, but no bounded set of values could be found for '{}'",
                    what, x.name
                ),
            );
        }
        missing.is_empty()
    }

    fn check_member_select(&mut self, expr: &Expr, member: &Path) -> bool {
        if let Some(field) = self.ctx.field(member) {
            if field.is_ghost {
                self.error(&expr.span, "ghost fields are allowed only in specification contexts".to_string());
                return false;
            }
            return true;
        }
        if let Some(f) = self.ctx.function(member) {
            if f.is_effectively_ghost() {
                let msg = format!("a ghost {} is allowed only in specification contexts", f.kind.keyword(true));
                self.error(&expr.span, msg);
                return false;
            }
            if f.params.iter().any(|p| p.var.is_ghost.get()) {
                self.error(
                    &expr.span,
                    "a function with ghost parameters can be used as a value only in specification contexts"
                        .to_string(),
                );
                return false;
            }
            return true;
        }
        if let Some(ctors) = self.ctx.destructor_ctors(member) {
            let name = member.last();
            if ctors.iter().all(|c| c.is_ghost) {
                self.error(
                    &expr.span,
                    format!(
                        "in a compiled context, destructor '{}' can only be applied to values of non-ghost constructors",
                        name
                    ),
                );
                return false;
            }
            let ghost_formal = ctors
                .iter()
                .any(|c| c.params.iter().any(|p| &p.var.name == name && p.var.is_ghost.get()));
            if ghost_formal {
                self.error(&expr.span, "ghost destructors are allowed only in specification contexts".to_string());
                return false;
            }
        }
        true
    }

    fn check_call(
        &mut self,
        expr: &Expr,
        fun: &Fun,
        receiver: &Option<Expr>,
        args: &Exprs,
        route: &std::cell::Cell<CallRoute>,
    ) -> Result<bool, VirErr> {
        let f = match self.ctx.function(fun) {
            Some(f) => f.clone(),
            None => return internal_err(&expr.span, &format!("call to unresolved function {}", fun)),
        };
        let mut ok = true;
        if f.is_effectively_ghost() {
            if f.by_method.is_some() && !f.kind.is_ghost_only() {
                route.set(CallRoute::ByMethod);
            } else {
                self.error(&expr.span, ghost_function_message(&f));
                return Ok(false);
            }
        } else {
            route.set(CallRoute::Function);
        }
        if let Some(r) = receiver {
            ok &= self.check_is_compilable(r)?;
        }
        for (param, arg) in f.params.iter().zip(args.iter()) {
            if !param.var.is_ghost.get() {
                ok &= self.check_is_compilable(arg)?;
            }
        }
        Ok(ok)
    }

    /// Can `expr` be compiled? Reports every offending construct (unless reporting is off).
    /// Errors only for broken invariants of the tree.
    pub fn check_is_compilable(&mut self, expr: &Expr) -> Result<bool, VirErr> {
        match &expr.x {
            ExprX::Const(_) | ExprX::This { .. } => Ok(true),
            ExprX::Var(x) => {
                if x.is_ghost.get() {
                    self.error(
                        &expr.span,
                        format!("ghost variables such as {} are allowed only in specification contexts", x.name),
                    );
                    return Ok(false);
                }
                Ok(true)
            }
            ExprX::Member { obj, member } => {
                let ok = self.check_member_select(expr, member);
                Ok(self.check_is_compilable(obj)? && ok)
            }
            ExprX::Call { fun, receiver, args, route } => self.check_call(expr, fun, receiver, args, route),
            ExprX::Ctor { datatype, variant, args } => {
                let ctor = match self.ctx.ctor(datatype, variant) {
                    Some(c) => c.clone(),
                    None => {
                        return internal_err(&expr.span, &format!("unresolved constructor {}", variant));
                    }
                };
                if ctor.is_ghost {
                    self.error(
                        &expr.span,
                        format!("ghost constructor {} is allowed only in specification contexts", variant),
                    );
                    return Ok(false);
                }
                let mut ok = true;
                for (param, arg) in ctor.params.iter().zip(args.iter()) {
                    if !param.var.is_ghost.get() {
                        ok &= self.check_is_compilable(arg)?;
                    }
                }
                Ok(ok)
            }
            ExprX::DatatypeUpdate { root, updates, compiled } => {
                let mut ok = self.check_is_compilable(root)?;
                for (_, value) in updates.iter() {
                    ok &= self.check_is_compilable(value)?;
                }
                if ok {
                    compiled.set(true);
                }
                Ok(ok)
            }
            ExprX::Binary(BinaryOp::RankLt | BinaryOp::RankGt, _, _) => {
                self.error(&expr.span, "rank comparisons are allowed only in specification contexts".to_string());
                Ok(false)
            }
            ExprX::PrefixEq { .. } => {
                self.error(
                    &expr.span,
                    "prefix equalities are allowed only in specification and ghost contexts".to_string(),
                );
                Ok(false)
            }
            ExprX::Old(..) => {
                self.error(&expr.span, "old expressions are allowed only in specification and ghost contexts".to_string());
                Ok(false)
            }
            ExprX::Fresh(_) => {
                self.error(&expr.span, "fresh expressions are allowed only in specification and ghost contexts".to_string());
                Ok(false)
            }
            ExprX::Unchanged(_) => {
                self.error(
                    &expr.span,
                    "unchanged expressions are allowed only in specification and ghost contexts".to_string(),
                );
                Ok(false)
            }
            ExprX::TypeTest(e, t) => {
                let mut ok = self.check_is_compilable(e)?;
                if !type_test_is_checkable(self.ctx, &e.typ, t) {
                    self.error(
                        &expr.span,
                        format!("an expression of type '{}' is not run-time checkable to be a '{}'", e.typ, t),
                    );
                    ok = false;
                }
                Ok(ok)
            }
            ExprX::Quant { quant, vars, range, body, .. } => {
                let r = bounds_range(*quant, range, body);
                let mut ok = self.check_bounds(&expr.span, "quantifiers", vars, r.as_ref());
                ok &= self.check_all(range.iter())?;
                ok &= self.check_is_compilable(body)?;
                Ok(ok)
            }
            ExprX::SetComprehension { vars, range, term, .. } => {
                let mut ok = self.check_bounds(&expr.span, "set comprehensions", vars, Some(range));
                ok &= self.check_is_compilable(range)?;
                ok &= self.check_all(term.iter())?;
                Ok(ok)
            }
            ExprX::MapComprehension { vars, range, key, value, .. } => {
                let mut ok = self.check_bounds(&expr.span, "map comprehensions", vars, Some(range));
                ok &= self.check_is_compilable(range)?;
                ok &= self.check_all(key.iter())?;
                ok &= self.check_is_compilable(value)?;
                Ok(ok)
            }
            ExprX::Let { vars, rhss, body } => {
                let mut ok = true;
                for (x, rhs) in vars.iter().zip(rhss.iter()) {
                    if x.is_ghost.get() {
                        continue;
                    }
                    if uses_spec_features(self.ctx, rhs) {
                        tracing::trace!(var = %x.name, "let-bound variable promoted to ghost");
                        x.is_ghost.set(true);
                    } else {
                        ok &= self.check_is_compilable(rhs)?;
                    }
                }
                Ok(self.check_is_compilable(body)? && ok)
            }
            ExprX::LetSuchThat { vars, constraint, body, bounds } => {
                let mut ok = true;
                if !vars.iter().all(|x| x.is_ghost.get()) {
                    if !self.resolution_complete {
                        return internal_err(
                            &expr.span,
                            "bounds of a let-such-that expression requested before resolution finished",
                        );
                    }
                    ok &= self.check_is_compilable(constraint)?;
                    match discover_bounds(vars, Some(constraint)) {
                        Ok(pools) => *bounds.borrow_mut() = Some(Rc::new(pools)),
                        Err(missing) => {
                            for x in missing.iter() {
                                self.error(
                                    &expr.span,
                                    format!(
                                        "let-such-that expressions are compiled only if a bounded set of values can be found for '{}'",
                                        x.name
                                    ),
                                );
                            }
                            ok = false;
                        }
                    }
                }
                Ok(self.check_is_compilable(body)? && ok)
            }
            ExprX::Match { scrutinee, arms } => {
                let mut ok = self.check_is_compilable(scrutinee)?;
                for arm in arms.iter() {
                    if let PatternX::Ctor { datatype, variant, .. } = &arm.x.pattern.x {
                        if self.ctx.ctor(datatype, variant).map_or(false, |c| c.is_ghost) {
                            self.error(
                                &arm.span,
                                format!("match on ghost constructor '{}' is allowed only in specification contexts", variant),
                            );
                            ok = false;
                            continue;
                        }
                    }
                    ok &= self.check_is_compilable(&arm.x.body)?;
                }
                Ok(ok)
            }
            ExprX::Lambda { body, .. } => self.check_is_compilable(body),
            // the statement part is a proof
            ExprX::StmtExpr(_, e) => self.check_is_compilable(e),
            ExprX::Index(..)
            | ExprX::Slice(..)
            | ExprX::Update(..)
            | ExprX::Display(..)
            | ExprX::MapDisplay(..)
            | ExprX::Apply(..)
            | ExprX::Unary(..)
            | ExprX::Binary(..)
            | ExprX::If(..) => self.check_all(crate::ast_visitor::expr_sub_exprs(expr).into_iter()),
        }
    }

    fn lhs_is_ghost(&self, lhs: &Expr) -> bool {
        match &lhs.x {
            ExprX::Var(x) => x.is_ghost.get(),
            ExprX::Member { member, .. } => self.ctx.field(member).map_or(false, |f| f.is_ghost),
            ExprX::Index(base, _) => self.lhs_is_ghost(base),
            _ => false,
        }
    }

    fn check_lhs(&mut self, lhs: &Expr) -> Result<bool, VirErr> {
        match &lhs.x {
            ExprX::Var(_) => Ok(true),
            ExprX::Member { obj, .. } => self.check_is_compilable(obj),
            ExprX::Index(base, i) => Ok(self.check_lhs(base)? && self.check_is_compilable(i)?),
            _ => self.check_is_compilable(lhs),
        }
    }

    /// Guarded by a spec-only condition?
    fn branch_ghost(&mut self, cond: &Option<Expr>, ghost: bool) -> Result<bool, VirErr> {
        match cond {
            Some(c) if !ghost => {
                if uses_spec_features(self.ctx, c) {
                    Ok(true)
                } else {
                    self.check_is_compilable(c)?;
                    Ok(false)
                }
            }
            _ => Ok(ghost),
        }
    }

    /// Check a statement of compiled code; `ghost` is set inside branches guarded by
    /// specification-only conditions, where the statement may not have compiled effects
    pub fn check_stmt(&mut self, stmt: &Stmt, ghost: bool) -> Result<(), VirErr> {
        match &stmt.x {
            StmtX::VarDecl { vars, init } => {
                if ghost {
                    for x in vars.iter() {
                        x.is_ghost.set(true);
                    }
                    return Ok(());
                }
                match init {
                    Some(Rhs::Expr(e)) if vars.iter().any(|x| !x.is_ghost.get()) => {
                        if uses_spec_features(self.ctx, e) {
                            for x in vars.iter() {
                                tracing::trace!(var = %x.name, "local promoted to ghost");
                                x.is_ghost.set(true);
                            }
                        } else {
                            self.check_is_compilable(e)?;
                        }
                    }
                    Some(Rhs::New { args, .. }) => {
                        self.check_all(args.iter())?;
                    }
                    Some(Rhs::Expr(_)) | Some(Rhs::Havoc) | None => {}
                }
                Ok(())
            }
            StmtX::Assign { lhs, rhs } => {
                if self.lhs_is_ghost(lhs) {
                    return Ok(());
                }
                if ghost {
                    let msg = match &lhs.x {
                        ExprX::Var(x) => format!("cannot assign to non-ghost variable {} in a ghost context", x.name),
                        _ => "assignment to a non-ghost location is not allowed in a ghost context".to_string(),
                    };
                    self.error(&stmt.span, msg);
                    return Ok(());
                }
                self.check_lhs(lhs)?;
                match rhs {
                    Rhs::Expr(e) => {
                        self.check_is_compilable(e)?;
                    }
                    Rhs::New { args, .. } => {
                        self.check_all(args.iter())?;
                    }
                    Rhs::Havoc => {}
                }
                Ok(())
            }
            StmtX::Call { lhss, method, receiver, args } => {
                let m = match self.ctx.method(method) {
                    Some(m) => m.clone(),
                    None => return internal_err(&stmt.span, &format!("call to unresolved method {}", method)),
                };
                if m.is_ghost {
                    for lhs in lhss.iter() {
                        if !self.lhs_is_ghost(lhs) {
                            self.error(
                                &lhs.span,
                                format!("actual out-parameter {} is required to be a ghost variable", lhs),
                            );
                        }
                    }
                    return Ok(());
                }
                if ghost {
                    self.error(&stmt.span, "in a ghost context, only ghost methods can be called".to_string());
                    return Ok(());
                }
                if let Some(r) = receiver {
                    self.check_is_compilable(r)?;
                }
                for (param, arg) in m.ins.iter().zip(args.iter()) {
                    if !param.var.is_ghost.get() {
                        self.check_is_compilable(arg)?;
                    }
                }
                for (param, lhs) in m.outs.iter().zip(lhss.iter()) {
                    if param.var.is_ghost.get() && !self.lhs_is_ghost(lhs) {
                        self.error(
                            &lhs.span,
                            format!("actual out-parameter {} is required to be a ghost variable", lhs),
                        );
                    } else if !param.var.is_ghost.get() {
                        self.check_lhs(lhs)?;
                    }
                }
                Ok(())
            }
            StmtX::Assert { .. } | StmtX::Assume(_) => Ok(()),
            StmtX::Print(es) => {
                if ghost {
                    self.error(
                        &stmt.span,
                        "print statement is not allowed in this context (because it is guarded by a specification-only expression)"
                            .to_string(),
                    );
                    return Ok(());
                }
                self.check_all(es.iter())?;
                Ok(())
            }
            StmtX::Return(es) | StmtX::Yield(es) => {
                let kw = if matches!(&stmt.x, StmtX::Return(_)) { "return" } else { "yield" };
                if ghost {
                    self.error(
                        &stmt.span,
                        format!(
                            "{} statement is not allowed in this context (because it is guarded by a specification-only expression)",
                            kw
                        ),
                    );
                    return Ok(());
                }
                if let Some(es) = es {
                    self.check_all(es.iter())?;
                }
                Ok(())
            }
            StmtX::Block(stmts) => {
                for s in stmts.iter() {
                    self.check_stmt(s, ghost)?;
                }
                Ok(())
            }
            StmtX::If { cond, thn, els } => {
                let inner = self.branch_ghost(cond, ghost)?;
                self.check_stmt(thn, inner)?;
                if let Some(els) = els {
                    self.check_stmt(els, inner)?;
                }
                Ok(())
            }
            StmtX::While { cond, body, .. } => {
                let inner = self.branch_ghost(cond, ghost)?;
                if let Some(body) = body {
                    self.check_stmt(body, inner)?;
                }
                Ok(())
            }
            StmtX::Forall { vars, range, body, .. } => {
                let body = match body {
                    Some(b) => b,
                    None => return Ok(()),
                };
                let assigns_compiled = crate::ast_visitor::stmt_any(body, |s| match &s.x {
                    StmtX::Assign { lhs, .. } => !self.lhs_is_ghost(lhs),
                    _ => false,
                });
                if !assigns_compiled {
                    // a proof forall
                    return Ok(());
                }
                if ghost {
                    self.error(&stmt.span, "forall statements with compiled effects are not allowed in a ghost context".to_string());
                    return Ok(());
                }
                self.check_is_compilable(range)?;
                self.check_bounds(&stmt.span, "forall statements", vars, Some(range));
                self.check_stmt(body, false)
            }
            StmtX::Match { scrutinee, arms } => {
                let inner = self.branch_ghost(&Some(scrutinee.clone()), ghost)?;
                for arm in arms.iter() {
                    if !inner {
                        if let PatternX::Ctor { datatype, variant, .. } = &arm.x.pattern.x {
                            if self.ctx.ctor(datatype, variant).map_or(false, |c| c.is_ghost) {
                                self.error(
                                    &arm.span,
                                    format!("match on ghost constructor '{}' is allowed only in specification contexts", variant),
                                );
                                continue;
                            }
                        }
                    }
                    self.check_stmt(&arm.x.body, inner)?;
                }
                Ok(())
            }
        }
    }
}

struct SpecFeatures<'a> {
    ctx: &'a GlobalCtx,
    /// let-bound variables that would be promoted to ghost
    promoted: HashSet<*const VarX>,
}

impl<'a> SpecFeatures<'a> {
    fn uses(&mut self, expr: &Expr) -> bool {
        match &expr.x {
            ExprX::Var(x) => x.is_ghost.get() || self.promoted.contains(&Rc::as_ptr(x)),
            ExprX::Old(..) | ExprX::Fresh(_) | ExprX::Unchanged(_) | ExprX::PrefixEq { .. } => true,
            ExprX::Binary(BinaryOp::RankLt | BinaryOp::RankGt, _, _) => true,
            ExprX::Member { obj, member } => {
                let ghost = if let Some(field) = self.ctx.field(member) {
                    field.is_ghost
                } else if let Some(f) = self.ctx.function(member) {
                    f.is_effectively_ghost() || f.params.iter().any(|p| p.var.is_ghost.get())
                } else if let Some(ctors) = self.ctx.destructor_ctors(member) {
                    let name = member.last();
                    ctors.iter().all(|c| c.is_ghost)
                        || ctors.iter().any(|c| c.params.iter().any(|p| &p.var.name == name && p.var.is_ghost.get()))
                } else {
                    false
                };
                ghost || self.uses(obj)
            }
            ExprX::Call { fun, receiver, args, .. } => match self.ctx.function(fun) {
                Some(f) => {
                    if f.is_effectively_ghost() && (f.by_method.is_none() || f.kind.is_ghost_only()) {
                        return true;
                    }
                    let f = f.clone();
                    receiver.iter().any(|r| self.uses(r))
                        || f.params.iter().zip(args.iter()).any(|(p, a)| !p.var.is_ghost.get() && self.uses(a))
                }
                None => false,
            },
            ExprX::Ctor { datatype, variant, args } => match self.ctx.ctor(datatype, variant) {
                Some(c) if c.is_ghost => true,
                Some(c) => {
                    let params = c.params.clone();
                    params.iter().zip(args.iter()).any(|(p, a)| !p.var.is_ghost.get() && self.uses(a))
                }
                None => false,
            },
            ExprX::Let { vars, rhss, body } => {
                for (x, rhs) in vars.iter().zip(rhss.iter()) {
                    if !x.is_ghost.get() && self.uses(rhs) {
                        self.promoted.insert(Rc::as_ptr(x));
                    }
                }
                self.uses(body)
            }
            ExprX::LetSuchThat { vars, constraint, body, .. } => {
                let all_ghost = vars.iter().all(|x| x.is_ghost.get());
                (!all_ghost && self.uses(constraint)) || self.uses(body)
            }
            ExprX::Match { scrutinee, arms } => {
                let ghost_arm = arms.iter().any(|arm| match &arm.x.pattern.x {
                    PatternX::Ctor { datatype, variant, .. } => {
                        self.ctx.ctor(datatype, variant).map_or(false, |c| c.is_ghost)
                    }
                    _ => false,
                });
                ghost_arm || self.uses(scrutinee) || arms.iter().any(|arm| self.uses(&arm.x.body))
            }
            ExprX::Quant { range, body, .. } => range.iter().any(|r| self.uses(r)) || self.uses(body),
            ExprX::Lambda { body, .. } => self.uses(body),
            ExprX::StmtExpr(_, e) => self.uses(e),
            _ => crate::ast_visitor::expr_sub_exprs(expr).into_iter().any(|e| self.uses(e)),
        }
    }
}

/// Does `expr` use a specification-only feature? Has no side effects.
pub fn uses_spec_features(ctx: &GlobalCtx, expr: &Expr) -> bool {
    SpecFeatures { ctx, promoted: HashSet::new() }.uses(expr)
}

/// Check every compiled body of a module: non-ghost functions and constants, by-method bodies,
/// compiled methods, and iterators
pub fn check_module_compilable(module: &Module, ctx: &GlobalCtx, reporter: &mut Reporter) -> Result<(), VirErr> {
    let mut checker = ModeChecker::new(ctx, reporter, true);
    for decl in module.decls.iter() {
        if let TopLevelDecl::Iterator(it) = decl {
            if let Some(body) = &it.body {
                checker.check_stmt(body, false)?;
            }
        }
        for member in decl.members() {
            match member {
                Member::Field(f) => {
                    if let (false, Some(rhs)) = (f.is_ghost, &f.rhs) {
                        checker.check_is_compilable(rhs)?;
                    }
                }
                Member::Function(f) => {
                    if !f.is_effectively_ghost() {
                        if let Some(body) = &f.body {
                            checker.check_is_compilable(body)?;
                        }
                    } else if let Some(by_method) = &f.by_method {
                        checker.check_stmt(by_method, false)?;
                    }
                }
                Member::Method(m) => {
                    if !m.is_ghost {
                        if let Some(body) = &m.body {
                            checker.check_stmt(body, false)?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::config::RewriteOptions;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::test_util::*;
    use proptest::prelude::*;

    fn ctx_with(members: Vec<Member>, datatypes: Vec<DatatypeDecl>) -> GlobalCtx {
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class.members = members;
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        module.decls.extend(datatypes.into_iter().map(TopLevelDecl::Datatype));
        GlobalCtx::new(&Program::new("p", vec![module]), &Rc::new(RewriteOptions::default()))
    }

    fn check(ctx: &GlobalCtx, e: &Expr) -> (bool, Vec<String>) {
        let mut diags = CollectedDiagnostics::new();
        let ok = {
            let mut reporter = Reporter::new(&mut diags, "modes");
            ModeChecker::new(ctx, &mut reporter, true).check_is_compilable(e).unwrap()
        };
        (ok, diags.notes_at(MessageLevel::Error).iter().map(|s| s.to_string()).collect())
    }

    fn option_datatype() -> DatatypeDecl {
        let v = mk_var_decl(&sp(), "v", &int_typ(), false);
        let g = mk_var_decl(&sp(), "g", &int_typ(), false);
        DatatypeDecl {
            name: str_ident("D"),
            path: mk_path(&["M", "D"]),
            span: sp(),
            is_codatatype: false,
            typ_params: Rc::new(vec![]),
            ctors: vec![
                DatatypeCtor { name: str_ident("Real"), span: sp(), is_ghost: false, params: mk_params(&[v]) },
                DatatypeCtor { name: str_ident("Imagined"), span: sp(), is_ghost: true, params: mk_params(&[g]) },
            ],
            members: vec![],
            attrs: no_attrs(),
        }
    }

    #[test]
    fn ghost_variables_and_old_are_rejected() {
        let ctx = ctx_with(vec![], vec![]);
        let g = mk_var_decl(&sp(), "g", &int_typ(), true);
        let x = var_decl("x", &int_typ());
        let (ok, errors) = check(&ctx, &add(&var(&x), &var(&g)));
        assert!(!ok);
        assert_eq!(errors, vec!["ghost variables such as g are allowed only in specification contexts"]);
        let (ok, errors) = check(&ctx, &old(&var(&x)));
        assert!(!ok);
        assert!(errors[0].starts_with("old expressions"));
        assert!(check(&ctx, &add(&var(&x), &int(1))).0);
    }

    #[test]
    fn ghost_calls_and_by_method_routing() {
        let x = var_decl("x", &int_typ());
        let f = Function::new(&sp(), &fun_path("F"), FunctionKind::Function, vec![x.clone()], &int_typ());
        let mut g = Function::new(&sp(), &fun_path("G"), FunctionKind::Function, vec![x.clone()], &int_typ());
        g.by_method = Some(block(vec![]));
        let mut h = Function::new(&sp(), &fun_path("H"), FunctionKind::Function, vec![x.clone()], &int_typ());
        h.is_ghost = false;
        let ctx = ctx_with(vec![Member::Function(f), Member::Function(g), Member::Function(h)], vec![]);

        let (ok, errors) = check(&ctx, &call("F", vec![int(1)], &int_typ()));
        assert!(!ok);
        assert!(errors[0].contains("consider declaring the function with 'function method'"));

        let by_method = call("G", vec![int(1)], &int_typ());
        assert!(check(&ctx, &by_method).0);
        assert!(matches!(&by_method.x, ExprX::Call { route, .. } if route.get() == CallRoute::ByMethod));

        let compiled = call("H", vec![int(1)], &int_typ());
        assert!(check(&ctx, &compiled).0);
        assert!(matches!(&compiled.x, ExprX::Call { route, .. } if route.get() == CallRoute::Function));
    }

    #[test]
    fn let_promotes_spec_bindings() {
        let ctx = ctx_with(vec![], vec![]);
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        // var y := old(x); 5
        let e = let_expr(&[y.clone()], vec![old(&var(&x))], &int(5));
        assert!(!uses_spec_features(&ctx, &e));
        let (ok, errors) = check(&ctx, &e);
        assert!(ok);
        assert!(errors.is_empty());
        assert!(y.is_ghost.get());
        // var z := old(x); z  uses the promoted binding
        let z = var_decl("z", &int_typ());
        let e = let_expr(&[z.clone()], vec![old(&var(&x))], &var(&z));
        assert!(uses_spec_features(&ctx, &e));
        assert!(!z.is_ghost.get());
        assert!(!check(&ctx, &e).0);
    }

    #[test]
    fn unbounded_quantifiers_are_not_compilable() {
        let ctx = ctx_with(vec![], vec![]);
        let i = var_decl("i", &int_typ());
        let bounded = forall(&[i.clone()], Some(&and(&le(&int(0), &var(&i)), &lt(&var(&i), &int(10)))), &le(&int(0), &var(&i)));
        assert!(check(&ctx, &bounded).0);
        let unbounded = forall(&[i.clone()], None, &le(&int(0), &var(&i)));
        assert!(!uses_spec_features(&ctx, &unbounded));
        let (ok, errors) = check(&ctx, &unbounded);
        assert!(!ok);
        assert!(errors[0].contains("'i'"));
    }

    #[test]
    fn ghost_constructors_and_destructors() {
        let ctx = ctx_with(vec![], vec![option_datatype()]);
        let d = mk_path(&["M", "D"]);
        let dt = datatype_typ(&d, Rc::new(vec![]));
        let ghost_ctor = mk_expr(
            &sp(),
            &dt,
            ExprX::Ctor { datatype: d.clone(), variant: str_ident("Imagined"), args: Rc::new(vec![int(1)]) },
        );
        let (ok, errors) = check(&ctx, &ghost_ctor);
        assert!(!ok);
        assert!(errors[0].starts_with("ghost constructor Imagined"));
        let x = var_decl("x", &dt);
        let g = mk_member(&sp(), &var(&x), &d.push_segment("g"), &int_typ());
        let (ok, errors) = check(&ctx, &g);
        assert!(!ok);
        assert!(errors[0].contains("destructor 'g'"));
        let v = mk_member(&sp(), &var(&x), &d.push_segment("v"), &int_typ());
        assert!(check(&ctx, &v).0);
    }

    #[test]
    fn let_such_that_caches_bounds() {
        let ctx = ctx_with(vec![], vec![]);
        let k = var_decl("k", &int_typ());
        let constraint = and(&le(&int(0), &var(&k)), &lt(&var(&k), &int(4)));
        let e = mk_expr(
            &sp(),
            &int_typ(),
            ExprX::LetSuchThat {
                vars: Rc::new(vec![k.clone()]),
                constraint,
                body: var(&k),
                bounds: std::cell::RefCell::new(None),
            },
        );
        let mut diags = CollectedDiagnostics::new();
        let mut reporter = Reporter::new(&mut diags, "modes");
        let early = ModeChecker::new(&ctx, &mut reporter, true).during_resolution().check_is_compilable(&e);
        assert!(early.is_err());
        assert!(ModeChecker::new(&ctx, &mut reporter, true).check_is_compilable(&e).unwrap());
        assert!(matches!(&e.x, ExprX::LetSuchThat { bounds, .. } if bounds.borrow().is_some()));
    }

    #[test]
    fn ghost_guards_forbid_compiled_effects() {
        let ctx = ctx_with(vec![], vec![]);
        let g = mk_var_decl(&sp(), "g", &int_typ(), true);
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let body = block(vec![
            var_decl_stmt(&y, Some(&add(&var(&g), &int(1)))),
            mk_stmt(
                &sp(),
                StmtX::If { cond: Some(lt(&var(&g), &int(0))), thn: block(vec![assign(&var(&x), &int(1))]), els: None },
            ),
        ]);
        let mut diags = CollectedDiagnostics::new();
        {
            let mut reporter = Reporter::new(&mut diags, "modes");
            ModeChecker::new(&ctx, &mut reporter, true).check_stmt(&body, false).unwrap();
        }
        // y is silently promoted, the assignment to x is an error
        assert!(y.is_ghost.get());
        assert_eq!(diags.count(MessageLevel::Error), 1);
        assert!(diags.notes_at(MessageLevel::Error)[0].contains("non-ghost variable x"));
    }

    #[test]
    fn upcasts_are_checkable_and_downcasts_need_recoverable_parameters() {
        // trait T {}  class C extends T {}  class G<X> extends T {}
        let t_path = mk_path(&["M", "T"]);
        let mut t = ClassDecl::new(&sp(), &t_path);
        t.is_trait = true;
        let mut c = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        c.parents = vec![class_typ(&t_path, false)];
        let mut g = ClassDecl::new(&sp(), &mk_path(&["M", "G"]));
        g.typ_params = Rc::new(vec![str_ident("X")]);
        g.parents = vec![class_typ(&t_path, false)];
        let mut module = Module::new(&sp(), "M");
        module.decls = vec![TopLevelDecl::Class(t), TopLevelDecl::Class(c), TopLevelDecl::Class(g)];
        let ctx = GlobalCtx::new(&Program::new("p", vec![module]), &Rc::new(RewriteOptions::default()));
        let type_test = |x: &Var, to: &Typ| mk_expr(&sp(), &bool_typ(), ExprX::TypeTest(var(x), to.clone()));

        let cv = var_decl("c", &class("C"));
        let (ok, errors) = check(&ctx, &type_test(&cv, &class_typ(&t_path, false)));
        assert!(ok, "{:?}", errors);
        assert!(errors.is_empty());

        let tv = var_decl("t", &class_typ(&t_path, false));
        assert!(check(&ctx, &type_test(&tv, &class("C"))).0);
        let (ok, errors) = check(&ctx, &type_test(&tv, &class("G")));
        assert!(!ok);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn speculative_checks_report_nothing() {
        let ctx = ctx_with(vec![], vec![]);
        let g = mk_var_decl(&sp(), "g", &int_typ(), true);
        let mut diags = CollectedDiagnostics::new();
        {
            let mut reporter = Reporter::new(&mut diags, "modes");
            let ok = ModeChecker::new(&ctx, &mut reporter, false).check_is_compilable(&var(&g)).unwrap();
            assert!(!ok);
        }
        assert!(diags.messages.is_empty());
    }

    fn arb_expr(x: Var, g: Var) -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            (0i64..5).prop_map(int),
            Just(var(&x)),
            Just(var(&g)),
            Just(old(&var(&x))),
        ];
        leaf.prop_recursive(4, 24, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| add(&a, &b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| mk_if(&sp(), &le(&a, &b), &a, &b)),
                (inner.clone(), inner).prop_map(|(a, b)| {
                    let y = var_decl("y", &int_typ());
                    let_expr(&[y.clone()], vec![a], &add(&var(&y), &b))
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn expressions_without_spec_features_are_compilable(
            e in arb_expr(var_decl("x", &int_typ()), mk_var_decl(&sp(), "g", &int_typ(), true))
        ) {
            let ctx = ctx_with(vec![], vec![]);
            if !uses_spec_features(&ctx, &e) {
                let (ok, errors) = check(&ctx, &e);
                prop_assert!(ok, "{:?}", errors);
            }
        }
    }
}
