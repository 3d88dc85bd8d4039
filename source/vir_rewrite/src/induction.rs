//! Induction-variable inference for lemmas and universal quantifiers.
//!
//! The result is recorded as `{:_induction x, y}` for the translator. An explicit
//! `{:induction ...}` attribute overrides inference: `false` disables it, `true` (or no
//! arguments) selects every candidate, and a variable list is checked for declaration order
//! with `this` first.
//!
//! Inference asks whether a variable occurs in a *prominent* position: as an argument to a
//! recursive function, possibly through operators that keep the position prominent.
//! The heuristic level picks how strict this is:
//!
//! | level | variable is chosen when                                                          |
//! |-------|----------------------------------------------------------------------------------|
//! | 0     | always                                                                           |
//! | 1     | it occurs free anywhere                                                          |
//! | 2     | it occurs prominently; prominence, once gained, persists into every subterm      |
//! | 3     | as 2, but prominence is lost below operators that do not preserve it             |
//! | 4     | as 2, and sequence indices are only prominent inside an already prominent term  |
//! | 5     | as 3, with the sequence-index restriction of 4                                   |
//! | 6     | as 5, and only arguments that take part in the callee's `decreases` count        |

use crate::ast::*;
use crate::ast_util::{auto_span, mk_attr, mk_binary, mk_this, mk_var, params_vars};
use crate::ast_visitor::{expr_sub_exprs, map_iterator_exprs, map_member_exprs};
use crate::attributes::{has_attr, induction_args, with_attr_prepended, InductionArgs, INDUCTION_INFERRED};
use crate::config::{InductionMode, RewriteOptions};
use crate::context::GlobalCtx;
use crate::free_vars::{contains_free_variable, free_vars_expr, mentions_receiver};
use crate::messages::Reporter;
use crate::printer::expr_to_string;
use crate::rewriter::Rewriter;
use indexmap::IndexSet;
use std::collections::HashMap;

pub struct InductionRewriter {
    mode: InductionMode,
    heuristic: u8,
}

impl InductionRewriter {
    pub fn new(options: &RewriteOptions) -> Self {
        InductionRewriter { mode: options.induction, heuristic: options.induction_heuristic }
    }
}

struct Heuristic<'a> {
    ctx: &'a GlobalCtx,
    level: u8,
}

/// Operators whose operands stay prominent
fn preserves_prominence(op: BinaryOp) -> bool {
    use BinaryOp::*;
    matches!(
        op,
        Add | Sub
            | Mul
            | Div
            | Mod
            | BitAnd
            | BitOr
            | BitXor
            | LeftShift
            | RightShift
            | Union
            | Intersection
            | Difference
            | Concat
    )
}

fn binds(expr: &Expr, name: &Ident) -> bool {
    let vars = match &expr.x {
        ExprX::Quant { vars, .. }
        | ExprX::SetComprehension { vars, .. }
        | ExprX::MapComprehension { vars, .. }
        | ExprX::Let { vars, .. }
        | ExprX::LetSuchThat { vars, .. } => vars,
        ExprX::Lambda { params, .. } => params,
        _ => return false,
    };
    vars.iter().any(|v| v.name == *name)
}

impl<'a> Heuristic<'a> {
    fn var_occurs_in_recursive_argument(&self, expr: &Expr, n: &Var) -> bool {
        match self.level {
            0 => true,
            1 => contains_free_variable(expr, false, Some(&n.name)),
            _ => self.occurs(expr, n, false),
        }
    }

    fn occurs(&self, expr: &Expr, n: &Var, prominent: bool) -> bool {
        // what subterms inherit when they do not gain prominence themselves
        let sub = if self.level == 2 || self.level == 4 { prominent } else { false };
        match &expr.x {
            ExprX::Var(x) => prominent && x.name == n.name,
            ExprX::Index(s, i) => {
                let q = self.level < 4 || sub;
                self.occurs(s, n, sub) || self.occurs(i, n, q)
            }
            ExprX::Slice(s, lo, hi) => {
                let q = self.level < 4 || sub;
                self.occurs(s, n, sub)
                    || lo.as_ref().map_or(false, |e| self.occurs(e, n, q))
                    || hi.as_ref().map_or(false, |e| self.occurs(e, n, q))
            }
            ExprX::Call { fun, receiver, args, .. } => {
                let callee = self.ctx.function(fun);
                let rec = callee.map_or(false, |f| f.is_recursive);
                let mut decreases_vars: IndexSet<Ident> = IndexSet::new();
                if let Some(f) = callee {
                    for d in f.decreases.iter() {
                        decreases_vars.extend(free_vars_expr(d));
                    }
                }
                let receiver_variant = if self.level < 6 {
                    rec
                } else {
                    rec && callee.map_or(false, |f| f.decreases.iter().any(mentions_receiver))
                };
                if receiver.as_ref().map_or(false, |r| self.occurs(r, n, receiver_variant || sub)) {
                    return true;
                }
                args.iter().enumerate().any(|(k, arg)| {
                    let variant = if self.level < 6 {
                        rec
                    } else if rec {
                        let in_decreases = callee
                            .and_then(|f| f.params.get(k))
                            .map_or(false, |p| decreases_vars.contains(&p.var.name));
                        in_decreases || callee.map_or(false, |f| f.kind == FunctionKind::PrefixPredicate)
                    } else {
                        false
                    };
                    self.occurs(arg, n, variant || sub)
                })
            }
            ExprX::PrefixEq { k, e1, e2, .. } => {
                self.occurs(k, n, true) || self.occurs(e1, n, sub) || self.occurs(e2, n, sub)
            }
            ExprX::Ctor { args, .. } => {
                // looking for a datatype value: its constructor arguments keep its status
                let q = if let TypX::Datatype { .. } = &*n.typ { prominent } else { sub };
                args.iter().any(|a| self.occurs(a, n, q))
            }
            ExprX::Unary(_, e) => self.occurs(e, n, prominent),
            ExprX::Binary(op, e1, e2) => {
                let q = if preserves_prominence(*op) { prominent } else { sub };
                self.occurs(e1, n, q) || self.occurs(e2, n, q)
            }
            ExprX::StmtExpr(_, e) => self.occurs(e, n, false),
            ExprX::If(c, e1, e2) => {
                self.occurs(c, n, sub) || self.occurs(e1, n, prominent) || self.occurs(e2, n, prominent)
            }
            ExprX::Old(_, e) => self.occurs(e, n, prominent),
            _ if binds(expr, &n.name) => false,
            _ => expr_sub_exprs(expr).into_iter().any(|e| self.occurs(e, n, sub)),
        }
    }
}

/// What is being considered for induction
struct Target<'a> {
    span: &'a Span,
    vars: Vec<Var>,
    /// `Some` for instance lemmas, which may also induct on `this`
    this_typ: Option<Typ>,
    search: Vec<Expr>,
    infer: bool,
    is_lemma: bool,
}

impl InductionRewriter {
    /// New attributes for the target, or `None` to leave them alone
    fn compute(
        &self,
        ctx: &GlobalCtx,
        target: &Target,
        attrs: &Attributes,
        reporter: &mut Reporter,
    ) -> Option<Attributes> {
        if !self.mode.honors_explicit() || has_attr(attrs, INDUCTION_INFERRED) {
            return None;
        }
        let all = match induction_args(attrs) {
            None if !target.infer => return None,
            None => false,
            Some(InductionArgs::Off) => return None,
            Some(InductionArgs::All) => true,
            Some(InductionArgs::Vars(args)) => {
                let good = self.check_explicit(target, &args, reporter)?;
                return Some(with_attr_prepended(attrs, mk_attr(&auto_span(target.span), INDUCTION_INFERRED, good)));
            }
        };
        let heuristic = Heuristic { ctx, level: self.heuristic };
        let mut chosen = Vec::new();
        if let Some(this_typ) = &target.this_typ {
            if all || target.search.iter().any(mentions_receiver) {
                chosen.push(mk_this(target.span, this_typ, false));
            }
        }
        for n in target.vars.iter() {
            if let TypX::TypParam(_) = &*n.typ {
                continue;
            }
            if all || target.search.iter().any(|e| heuristic.var_occurs_in_recursive_argument(e, n)) {
                chosen.push(mk_var(target.span, n));
            }
        }
        if chosen.is_empty() {
            return None;
        }
        let names: Vec<String> = chosen.iter().map(expr_to_string).collect();
        reporter.info(target.span, format!("{{:induction {}}}", names.join(", ")));
        tracing::debug!(vars = %names.join(", "), "induction variables inferred");
        Some(with_attr_prepended(attrs, mk_attr(&auto_span(target.span), INDUCTION_INFERRED, chosen)))
    }

    /// Arguments must be `this` (instance lemmas only, first) then variables in declaration order
    fn check_explicit(&self, target: &Target, args: &Exprs, reporter: &mut Reporter) -> Option<Vec<Expr>> {
        let (what, owner) = if target.is_lemma { ("lemma parameter", "lemma") } else { ("bound variable", "quantifier") };
        let mut good = Vec::new();
        // -1: `this` may still come
        let mut next: isize = if target.this_typ.is_some() { -1 } else { 0 };
        for arg in args.iter() {
            match &arg.x {
                ExprX::Var(x) => {
                    if let Some(j) = target.vars.iter().position(|v| v.name == x.name) {
                        if next <= j as isize {
                            good.push(arg.clone());
                            next = j as isize + 1;
                            continue;
                        }
                        reporter.warning(
                            &arg.span,
                            format!(
                                "{}s given as :induction arguments must be given in the same order as in the {}; ignoring attribute",
                                what, owner
                            ),
                        );
                        return None;
                    }
                }
                ExprX::This { .. } if target.this_typ.is_some() => {
                    if next < 0 {
                        good.push(arg.clone());
                        next = 0;
                        continue;
                    }
                    reporter.warning(
                        &arg.span,
                        "lemma parameter 'this' given as :induction argument must be given first; ignoring attribute",
                    );
                    return None;
                }
                _ => {}
            }
            reporter.warning(
                &arg.span,
                format!(
                    "invalid :induction attribute argument; expected {}{}; ignoring attribute",
                    if next <= 0 { "'false' or 'true' or " } else { "" },
                    what
                ),
            );
            return None;
        }
        Some(good)
    }

    fn process_quantifiers(&self, ctx: &GlobalCtx, member: &mut Member, reporter: &mut Reporter) -> Result<(), VirErr> {
        if !self.mode.honors_explicit() {
            return Ok(());
        }
        let infer = self.mode.infer_for_quantifiers();
        map_member_exprs(member, &mut |e: &Expr| Ok(self.process_quantifier(ctx, e, infer, reporter)))
    }

    fn process_quantifier(&self, ctx: &GlobalCtx, e: &Expr, infer: bool, reporter: &mut Reporter) -> Expr {
        if let ExprX::Quant { quant: Quant::Forall, vars, range, body, attrs } = &e.x {
            let logical_body = match range {
                Some(r) => mk_binary(&e.span, BinaryOp::Implies, r, body),
                None => body.clone(),
            };
            let target = Target {
                span: &e.span,
                vars: vars.to_vec(),
                this_typ: None,
                search: vec![logical_body],
                infer,
                is_lemma: false,
            };
            if let Some(attrs) = self.compute(ctx, &target, attrs, reporter) {
                return e.new_x(ExprX::Quant {
                    quant: Quant::Forall,
                    vars: vars.clone(),
                    range: range.clone(),
                    body: body.clone(),
                    attrs,
                });
            }
        }
        e.clone()
    }

    fn process_lemma(&self, ctx: &GlobalCtx, this_typ: &Typ, m: &mut Method, reporter: &mut Reporter) {
        let eligible = m.is_ghost
            && m.kind.is_lemma()
            && !m.kind.is_extreme()
            && m.modifies.is_empty()
            && m.outs.is_empty();
        if !eligible {
            return;
        }
        let target = Target {
            span: &m.span,
            vars: params_vars(&m.ins),
            this_typ: if m.is_static { None } else { Some(this_typ.clone()) },
            search: m.ensures.clone(),
            infer: self.mode.infer_for_lemmas(),
            is_lemma: true,
        };
        if let Some(attrs) = self.compute(ctx, &target, &m.attrs, reporter) {
            m.attrs = attrs;
        }
    }
}

impl Rewriter for InductionRewriter {
    fn name(&self) -> &'static str {
        "induction"
    }

    fn post_decreases_resolve(
        &mut self,
        module: &mut Module,
        ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        // callees before callers
        let mut position: HashMap<Path, (usize, usize)> = HashMap::new();
        for (d, decl) in module.decls.iter().enumerate() {
            for (k, member) in decl.members().iter().enumerate() {
                position.insert(member.path().clone(), (d, k));
            }
        }
        let mut order: Vec<(usize, usize)> = Vec::new();
        if let Some(graph) = &module.call_graph {
            for component in graph.sorted_components() {
                order.extend(component.iter().filter_map(|f| position.remove(f)));
            }
        }
        let mut rest: Vec<(usize, usize)> = position.into_iter().map(|(_, p)| p).collect();
        rest.sort();
        order.extend(rest);

        for (d, k) in order {
            let this_typ = module.decls[d].this_typ();
            if let Some(members) = module.decls[d].members_mut() {
                let member = &mut members[k];
                if let Member::Method(m) = member {
                    self.process_lemma(ctx, &this_typ, m, reporter);
                }
                self.process_quantifiers(ctx, member, reporter)?;
            }
        }
        if self.mode.honors_explicit() {
            let infer = self.mode.infer_for_quantifiers();
            for decl in module.decls.iter_mut() {
                if let TopLevelDecl::Iterator(it) = decl {
                    map_iterator_exprs(it, &mut |e: &Expr| {
                        Ok(self.process_quantifier(ctx, e, infer, reporter))
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::attributes::INDUCTION;
    use crate::call_graph::build_call_graph;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::printer::{attrs_to_string, member_to_string};
    use crate::test_util::*;
    use std::rc::Rc;

    fn static_call(name: &str, args: Vec<Expr>) -> Expr {
        mk_call(&sp(), &fun_path(name), None, args, &int_typ())
    }

    /// `function Sum(n: int): int decreases n` and `function F(a: int, b: int): int decreases a`
    fn recursive_functions() -> Vec<Member> {
        let n = var_decl("n", &int_typ());
        let mut sum = Function::new(&sp(), &fun_path("Sum"), FunctionKind::Function, vec![n.clone()], &int_typ());
        sum.is_static = true;
        sum.decreases = vec![var(&n)];
        sum.body = Some(mk_if(
            &sp(),
            &le(&var(&n), &int(0)),
            &int(0),
            &add(&var(&n), &static_call("Sum", vec![sub(&var(&n), &int(1))])),
        ));
        let a = var_decl("a", &int_typ());
        let b = var_decl("b", &int_typ());
        let mut f = Function::new(&sp(), &fun_path("F"), FunctionKind::Function, vec![a.clone(), b.clone()], &int_typ());
        f.is_static = true;
        f.decreases = vec![var(&a)];
        f.body = Some(mk_if(
            &sp(),
            &le(&var(&a), &int(0)),
            &var(&b),
            &static_call("F", vec![sub(&var(&a), &int(1)), var(&b)]),
        ));
        vec![Member::Function(sum), Member::Function(f)]
    }

    fn lemma(params: &[Var], ensures: Expr, attrs: Vec<Attribute>) -> Method {
        let mut m = Method::new(&sp(), &fun_path("L"), MethodKind::Lemma, params.to_vec(), vec![]);
        m.is_static = true;
        m.ensures.push(ensures);
        m.attrs = Rc::new(attrs);
        m
    }

    fn run(options: RewriteOptions, lemma: Method) -> (Module, CollectedDiagnostics) {
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class.members = recursive_functions();
        class.members.push(Member::Method(lemma));
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        build_call_graph(&mut module);
        let mut program = Program::new("p", vec![module]);
        let options = Rc::new(options);
        let ctx = GlobalCtx::new(&program, &options);
        let mut diags = CollectedDiagnostics::new();
        InductionRewriter::new(&options)
            .post_decreases_resolve(&mut program.modules[0], &ctx, &mut Reporter::new(&mut diags, "induction"))
            .unwrap();
        (program.modules.remove(0), diags)
    }

    fn lemma_attrs(module: &Module) -> String {
        attrs_to_string(module.decls[0].members()[2].attrs())
    }

    fn with_level(level: u8) -> RewriteOptions {
        RewriteOptions { induction_heuristic: level, ..Default::default() }
    }

    #[test]
    fn lemma_inducts_on_arguments_of_recursive_calls() {
        let n = var_decl("n", &int_typ());
        let m = var_decl("m", &int_typ());
        let ens = le(&int(0), &add(&static_call("Sum", vec![var(&n)]), &mul(&var(&m), &var(&m))));
        let (module, diags) = run(RewriteOptions::default(), lemma(&[n, m], ens, vec![]));
        assert_eq!(lemma_attrs(&module), "{:_induction n}");
        assert_eq!(diags.notes_at(MessageLevel::Info), vec!["{:induction n}"]);
    }

    #[test]
    fn heuristic_levels_differ_on_branch_conditions_and_decreases() {
        let n = var_decl("n", &int_typ());
        let m = var_decl("m", &int_typ());
        let cond = mk_if(&sp(), &le(&int(0), &var(&m)), &var(&n), &int(0));
        let ens = le(&int(0), &static_call("Sum", vec![cond]));
        let chosen = |level: u8| {
            let (module, _) = run(with_level(level), lemma(&[n.clone(), m.clone()], ens.clone(), vec![]));
            lemma_attrs(&module)
        };
        assert_eq!(chosen(0), "{:_induction n, m}");
        assert_eq!(chosen(1), "{:_induction n, m}");
        assert_eq!(chosen(2), "{:_induction n, m}");
        assert_eq!(chosen(3), "{:_induction n}");

        let ens = le(&int(0), &static_call("F", vec![var(&n), var(&m)]));
        let chosen = |level: u8| {
            let (module, _) = run(with_level(level), lemma(&[n.clone(), m.clone()], ens.clone(), vec![]));
            lemma_attrs(&module)
        };
        assert_eq!(chosen(5), "{:_induction n, m}");
        assert_eq!(chosen(6), "{:_induction n}");
    }

    #[test]
    fn bitwise_operators_keep_their_operands_prominent() {
        let n = var_decl("n", &int_typ());
        let m = var_decl("m", &int_typ());
        for op in [BinaryOp::BitAnd, BinaryOp::BitOr, BinaryOp::BitXor].iter() {
            let arg = mk_binary(&sp(), *op, &var(&n), &var(&m));
            let ens = le(&int(0), &static_call("Sum", vec![arg]));
            let (module, _) = run(with_level(3), lemma(&[n.clone(), m.clone()], ens, vec![]));
            assert_eq!(lemma_attrs(&module), "{:_induction n, m}");
        }
    }

    #[test]
    fn instance_lemmas_induct_on_this_only_when_it_is_mentioned() {
        let n = var_decl("n", &int_typ());
        let field = member(&this(), "f", &int_typ());
        let ens = le(&field, &static_call("Sum", vec![var(&n)]));
        let mut instance = lemma(&[n.clone()], ens, vec![]);
        instance.is_static = false;
        let (module, _) = run(RewriteOptions::default(), instance);
        assert_eq!(lemma_attrs(&module), "{:_induction this, n}");

        let mut instance = lemma(&[n.clone()], le(&int(0), &static_call("Sum", vec![var(&n)])), vec![]);
        instance.is_static = false;
        let (module, _) = run(RewriteOptions::default(), instance);
        assert_eq!(lemma_attrs(&module), "{:_induction n}");
    }

    #[test]
    fn quantifiers_get_their_own_induction_variables() {
        let x = var_decl("x", &int_typ());
        let q = forall(&[x.clone()], Some(&le(&int(0), &var(&x))), &le(&int(0), &static_call("Sum", vec![var(&x)])));
        let (module, _) = run(RewriteOptions::default(), lemma(&[], q, vec![]));
        let text = member_to_string(&module.decls[0].members()[2]);
        assert!(text.contains("forall x: int {:_induction x} | 0 <= x :: 0 <= Sum(x)"), "{}", text);
        assert_eq!(lemma_attrs(&module), "");

        let options = RewriteOptions { induction: InductionMode::ExplicitOnly, ..Default::default() };
        let q = forall(&[x.clone()], None, &le(&int(0), &static_call("Sum", vec![var(&x)])));
        let (module, diags) = run(options, lemma(&[], q, vec![]));
        assert!(!member_to_string(&module.decls[0].members()[2]).contains("_induction"));
        assert_eq!(diags.count(MessageLevel::Info), 0);
    }

    #[test]
    fn explicit_lists_are_checked() {
        let a = var_decl("a", &int_typ());
        let b = var_decl("b", &int_typ());
        let ens = eq(&var(&a), &var(&b));
        let explicit = |args: Vec<Expr>| vec![mk_attr(&sp(), INDUCTION, args)];

        let (module, diags) = run(RewriteOptions::default(), lemma(&[a.clone(), b.clone()], ens.clone(), explicit(vec![var(&b)])));
        assert_eq!(lemma_attrs(&module), "{:_induction b} {:induction b}");
        assert_eq!(diags.count(MessageLevel::Warning), 0);

        let (module, diags) =
            run(RewriteOptions::default(), lemma(&[a.clone(), b.clone()], ens.clone(), explicit(vec![var(&b), var(&a)])));
        assert_eq!(lemma_attrs(&module), "{:induction b, a}");
        assert_eq!(
            diags.notes_at(MessageLevel::Warning),
            vec!["lemma parameters given as :induction arguments must be given in the same order as in the lemma; ignoring attribute"]
        );

        let mut instance = lemma(&[a.clone(), b.clone()], ens.clone(), explicit(vec![var(&a), this()]));
        instance.is_static = false;
        let (_, diags) = run(RewriteOptions::default(), instance);
        assert_eq!(
            diags.notes_at(MessageLevel::Warning),
            vec!["lemma parameter 'this' given as :induction argument must be given first; ignoring attribute"]
        );

        let (module, _) = run(
            RewriteOptions::default(),
            lemma(&[a.clone(), b.clone()], ens.clone(), vec![mk_attr(&sp(), INDUCTION, vec![mk_bool(&sp(), false)])]),
        );
        assert_eq!(lemma_attrs(&module), "{:induction false}");

        let (module, _) = run(RewriteOptions::default(), lemma(&[a, b], ens, explicit(vec![])));
        assert_eq!(lemma_attrs(&module), "{:_induction a, b} {:induction}");
    }

    #[test]
    fn never_mode_ignores_even_explicit_requests() {
        let a = var_decl("a", &int_typ());
        let options = RewriteOptions { induction: InductionMode::Never, ..Default::default() };
        let attrs = vec![mk_attr(&sp(), INDUCTION, vec![])];
        let (module, _) = run(options, lemma(&[a.clone()], eq(&var(&a), &var(&a)), attrs));
        assert_eq!(lemma_attrs(&module), "{:induction}");
    }
}
