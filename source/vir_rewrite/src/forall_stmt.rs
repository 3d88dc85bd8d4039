//! Aggregate `forall` statements, restated as quantified facts.
//!
//! Three body shapes are recognized:
//! - an assignment `forall i | R(i) { F(i)... := E(i) }`: when the target `F` can be inverted
//!   piecewise, the fact is `forall j | P(j) :: lhs(j) == E(F⁻¹(j))`, one quantifier per piece;
//!   otherwise the uninverted `forall i | R(i) :: lhs(i) == E(i)` is used
//! - a call to a lemma: the callee's postconditions instantiated with the actual arguments
//! - a proof: the statement's own `ensures` clauses
//!
//! The right-hand side of an assignment is read in the state before the statement, so it is
//! wrapped in `old` when it reads the heap.

use crate::ast::*;
use crate::ast_util::{
    auto_span, conjoin, const_int, is_integer_typ, is_true, mk_attr, mk_binary, mk_eq, mk_expr,
    mk_int, mk_not, mk_old, mk_quant, mk_var, mk_var_decl_with, stmt_as_block, str_ident,
};
use crate::ast_visitor::{expr_any, map_member_stmts, map_stmt_expr_visitor};
use crate::attributes::{has_attr, without_attrs, AUTO_REQUIRES, TRIGGER};
use crate::context::GlobalCtx;
use crate::free_vars::{contains_free_variable, free_vars_stmt};
use crate::messages::Reporter;
use crate::printer::expr_to_string;
use crate::rewriter::Rewriter;
use crate::substitute::{fresh_name, subst_var, substitute_expr_with_receiver};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub struct ForallStmtRewriter {}

impl ForallStmtRewriter {
    pub fn new() -> Self {
        ForallStmtRewriter {}
    }
}

/// One case of a piecewise inverse: whenever `guard(j)` holds, `i == inverse(j)`
#[derive(Debug, Clone)]
pub struct InversePiece {
    pub guard: Expr,
    pub inverse: Expr,
}

/// Find pieces such that `range(i) && j == f(i)` holds exactly when some
/// `guard_k(j) && i == inverse_k(j)` holds.
/// Returns `None` when `f` (or any branch of it) has no supported shape.
pub fn invert_expression(i: &Var, j: &Var, range: &Expr, f: &Expr) -> Option<Vec<InversePiece>> {
    let mut pieces = Vec::new();
    invert_into(i, range, f, &mk_var(&f.span, j), &mut pieces)?;
    Some(
        pieces
            .into_iter()
            .map(|(range, inverse)| {
                let guard = normalize_guard(&j.name, &subst_var(&range, &i.name, &inverse));
                InversePiece { guard, inverse }
            })
            .collect(),
    )
}

fn invert_into(i: &Var, range: &Expr, f: &Expr, target: &Expr, pieces: &mut Vec<(Expr, Expr)>) -> Option<()> {
    let mentions_i = |e: &Expr| contains_free_variable(e, false, Some(&i.name));
    if !mentions_i(f) {
        return None;
    }
    let span = &f.span;
    match &f.x {
        ExprX::Var(x) if x.name == i.name => {
            pieces.push((range.clone(), target.clone()));
            Some(())
        }
        ExprX::Binary(BinaryOp::Add, a, k) if !mentions_i(k) => {
            invert_into(i, range, a, &mk_binary(span, BinaryOp::Sub, target, k), pieces)
        }
        ExprX::Binary(BinaryOp::Add, k, a) if !mentions_i(k) => {
            invert_into(i, range, a, &mk_binary(span, BinaryOp::Sub, target, k), pieces)
        }
        ExprX::Binary(BinaryOp::Sub, a, k) if !mentions_i(k) => {
            invert_into(i, range, a, &mk_binary(span, BinaryOp::Add, target, k), pieces)
        }
        ExprX::Binary(BinaryOp::Sub, k, a) if !mentions_i(k) => {
            invert_into(i, range, a, &mk_binary(span, BinaryOp::Sub, k, target), pieces)
        }
        ExprX::If(cond, thn, els) => {
            // both branches must invert, or the whole attempt fails
            let thn_range = mk_binary(span, BinaryOp::And, range, cond);
            let els_range = mk_binary(span, BinaryOp::And, range, &mk_not(span, cond));
            invert_into(i, &thn_range, thn, target, pieces)?;
            invert_into(i, &els_range, els, target, pieces)
        }
        _ => None,
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(op, BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne)
}

/// Move constant offsets of `j` across comparisons: `0 <= j - 3` becomes `3 <= j`
fn normalize_guard(j: &Ident, e: &Expr) -> Expr {
    match &e.x {
        ExprX::Binary(op, e1, e2) if matches!(op, BinaryOp::And | BinaryOp::Or | BinaryOp::Implies) => {
            mk_binary(&e.span, *op, &normalize_guard(j, e1), &normalize_guard(j, e2))
        }
        ExprX::Unary(UnaryOp::Not, e1) => mk_not(&e.span, &normalize_guard(j, e1)),
        ExprX::Binary(op, e1, e2) if is_comparison(*op) && is_integer_typ(&e1.typ) => {
            let mentions_j = |e: &Expr| contains_free_variable(e, false, Some(j));
            let (mut lhs, mut rhs) = (e1.clone(), e2.clone());
            loop {
                if !mentions_j(&rhs) {
                    if let Some((x, k, op)) = split_offset(j, &lhs) {
                        rhs = mk_binary(&e.span, op, &rhs, &k);
                        lhs = x;
                        continue;
                    }
                }
                if !mentions_j(&lhs) {
                    if let Some((x, k, op)) = split_offset(j, &rhs) {
                        lhs = mk_binary(&e.span, op, &lhs, &k);
                        rhs = x;
                        continue;
                    }
                }
                break;
            }
            mk_binary(&e.span, *op, &fold_constants(&lhs), &fold_constants(&rhs))
        }
        _ => e.clone(),
    }
}

/// `x + k` or `k + x` gives `(x, k, -)`; `x - k` gives `(x, k, +)`: the operation that cancels `k`
fn split_offset(j: &Ident, e: &Expr) -> Option<(Expr, Expr, BinaryOp)> {
    let mentions_j = |e: &Expr| contains_free_variable(e, false, Some(j));
    if !is_integer_typ(&e.typ) {
        return None;
    }
    match &e.x {
        ExprX::Binary(BinaryOp::Add, x, k) if mentions_j(x) && !mentions_j(k) => {
            Some((x.clone(), k.clone(), BinaryOp::Sub))
        }
        ExprX::Binary(BinaryOp::Add, k, x) if mentions_j(x) && !mentions_j(k) => {
            Some((x.clone(), k.clone(), BinaryOp::Sub))
        }
        ExprX::Binary(BinaryOp::Sub, x, k) if mentions_j(x) && !mentions_j(k) => {
            Some((x.clone(), k.clone(), BinaryOp::Add))
        }
        _ => None,
    }
}

fn fold_constants(e: &Expr) -> Expr {
    match &e.x {
        ExprX::Binary(op, e1, e2) if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) => {
            let (e1, e2) = (fold_constants(e1), fold_constants(e2));
            match (const_int(&e1), const_int(&e2)) {
                (Some(a), Some(b)) => {
                    let value = match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        _ => a * b,
                    };
                    mk_int(&e.span, value)
                }
                _ => mk_binary(&e.span, *op, &e1, &e2),
            }
        }
        _ => e.clone(),
    }
}

/// The target of an assignment and how to rebuild the left-hand side around a new target
enum Lhs {
    /// `s[F(i)]` with `s` free of the bound variable
    Index { seq: Expr },
    /// `F(i).f`
    Member { member: Path },
}

fn decompose_lhs(i: &Ident, lhs: &Expr) -> Option<(Lhs, Expr)> {
    match &lhs.x {
        ExprX::Index(seq, idx) if !contains_free_variable(seq, false, Some(i)) => {
            Some((Lhs::Index { seq: seq.clone() }, idx.clone()))
        }
        ExprX::Member { obj, member } => Some((Lhs::Member { member: member.clone() }, obj.clone())),
        _ => None,
    }
}

fn rebuild_lhs(shape: &Lhs, lhs: &Expr, target: &Expr) -> Expr {
    let x = match shape {
        Lhs::Index { seq } => ExprX::Index(seq.clone(), target.clone()),
        Lhs::Member { member } => ExprX::Member { obj: target.clone(), member: member.clone() },
    };
    mk_expr(&lhs.span, &lhs.typ, x)
}

fn reads_heap(e: &Expr) -> bool {
    expr_any(e, |e| matches!(&e.x, ExprX::This { .. } | ExprX::Member { .. } | ExprX::Call { .. } | ExprX::Apply(..)))
}

fn pre_state(e: &Expr) -> Expr {
    if reads_heap(e) { mk_old(&e.span, e) } else { e.clone() }
}

/// The range together with what the bound variable's type implies about it
fn range_with_type_constraint(var: &Var, range: &Expr) -> Expr {
    if let TypX::Nat = &*var.typ {
        let span = &range.span;
        let nonneg = mk_binary(span, BinaryOp::Le, &mk_int(span, 0), &mk_var(span, var));
        if is_true(range) { nonneg } else { mk_binary(span, BinaryOp::And, &nonneg, range) }
    } else {
        range.clone()
    }
}

/// Attributes carried over to the synthesized quantifiers
fn quantifier_attrs(attrs: &Attributes) -> Attributes {
    without_attrs(attrs, |a| a.x.name.as_str() == AUTO_REQUIRES)
}

fn forall(span: &Span, vars: &Vars, range: &Expr, body: &Expr, attrs: &Attributes) -> Expr {
    let range = if is_true(range) { None } else { Some(range) };
    mk_quant(span, Quant::Forall, vars, range, body, attrs)
}

fn assign_facts(
    stmt: &Stmt,
    vars: &Vars,
    range: &Expr,
    attrs: &Attributes,
    lhs: &Expr,
    rhs: &Expr,
    reporter: &mut Reporter,
) -> Vec<Expr> {
    let span = &stmt.span;
    if vars.len() == 1 {
        let i = &vars[0];
        if let Some((shape, f)) = decompose_lhs(&i.name, lhs) {
            let mut avoid: HashSet<Ident> = free_vars_stmt(stmt).into_iter().collect();
            avoid.insert(i.name.clone());
            let j_name = if avoid.contains(&str_ident("j")) { fresh_name("j", &avoid) } else { str_ident("j") };
            let j = mk_var_decl_with(&i.span, j_name, &f.typ, i.is_ghost.get());
            let range = range_with_type_constraint(i, range);
            if let Some(pieces) = invert_expression(i, &j, &range, &f) {
                let new_lhs = rebuild_lhs(&shape, lhs, &mk_var(span, &j));
                let trigger = mk_attr(&auto_span(span), TRIGGER, vec![new_lhs.clone()]);
                let user_attrs = without_attrs(&quantifier_attrs(attrs), |a| a.x.name.as_str() == TRIGGER);
                let mut q_attrs = vec![trigger];
                q_attrs.extend(user_attrs.iter().cloned());
                let q_attrs = Rc::new(q_attrs);
                let j_vars = Rc::new(vec![j.clone()]);
                return pieces
                    .into_iter()
                    .map(|piece| {
                        let new_rhs = subst_var(&pre_state(rhs), &i.name, &piece.inverse);
                        let body = mk_eq(span, &new_lhs, &new_rhs);
                        let q = forall(span, &j_vars, &piece.guard, &body, &q_attrs);
                        reporter.info(span, format!("rewrite: {}", expr_to_string(&q)));
                        q
                    })
                    .collect();
            }
        }
    }
    tracing::trace!(lhs = %expr_to_string(lhs), "forall assignment not invertible, keeping the uninverted form");
    let body = mk_eq(span, lhs, &pre_state(rhs));
    vec![forall(span, vars, range, &body, &quantifier_attrs(attrs))]
}

fn call_facts(
    ctx: &GlobalCtx,
    stmt: &Stmt,
    vars: &Vars,
    range: &Expr,
    attrs: &Attributes,
    method: &Fun,
    receiver: Option<&Expr>,
    args: &Exprs,
) -> Option<Vec<Expr>> {
    let callee = ctx.method(method)?;
    let span = &stmt.span;
    let var_map: HashMap<Ident, Expr> =
        callee.ins.iter().zip(args.iter()).map(|(p, a)| (p.var.name.clone(), a.clone())).collect();
    let instantiate = |es: &Vec<Expr>| -> Vec<Expr> {
        es.iter().map(|e| substitute_expr_with_receiver(e, receiver, &var_map, &HashMap::new())).collect()
    };
    let post = conjoin(span, &instantiate(&callee.ensures));
    let range = if has_attr(attrs, AUTO_REQUIRES) && !callee.requires.is_empty() {
        let pre = conjoin(span, &instantiate(&callee.requires));
        if is_true(range) { pre } else { mk_binary(span, BinaryOp::And, range, &pre) }
    } else {
        range.clone()
    };
    Some(vec![forall(span, vars, &range, &post, &quantifier_attrs(attrs))])
}

fn desugar(stmt: &Stmt, ctx: &GlobalCtx, reporter: &mut Reporter) -> Stmt {
    let (vars, range, ensures, body, attrs) = match &stmt.x {
        StmtX::Forall { vars, range, ensures, body, attrs, forall_exprs: None } => {
            (vars, range, ensures, body, attrs)
        }
        _ => return stmt.clone(),
    };
    let single = body.as_ref().map(stmt_as_block).filter(|stmts| stmts.len() == 1).map(|stmts| stmts[0].clone());
    let mut facts = None;
    if let Some(s) = &single {
        match &s.x {
            StmtX::Assign { lhs, rhs: Rhs::Expr(rhs) } => {
                facts = Some(assign_facts(stmt, vars, range, attrs, lhs, rhs, reporter));
            }
            StmtX::Call { lhss, method, receiver, args } if lhss.is_empty() => {
                facts = call_facts(ctx, stmt, vars, range, attrs, method, receiver.as_ref(), args);
            }
            _ => {}
        }
    }
    let facts = facts.unwrap_or_else(|| {
        if ensures.is_empty() {
            vec![]
        } else {
            let post = conjoin(&stmt.span, ensures);
            vec![forall(&stmt.span, vars, range, &post, &quantifier_attrs(attrs))]
        }
    });
    stmt.new_x(StmtX::Forall {
        vars: vars.clone(),
        range: range.clone(),
        ensures: ensures.clone(),
        body: body.clone(),
        attrs: attrs.clone(),
        forall_exprs: Some(Rc::new(facts)),
    })
}

impl Rewriter for ForallStmtRewriter {
    fn name(&self) -> &'static str {
        "forall-stmt"
    }

    fn post_resolve_intermediate(
        &mut self,
        module: &mut Module,
        ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        let mut fs = |s: &Stmt| -> Result<Stmt, VirErr> { Ok(desugar(s, ctx, reporter)) };
        for decl in module.decls.iter_mut() {
            if let TopLevelDecl::Iterator(it) = decl {
                if let Some(body) = &it.body {
                    let mut fe = |e: &Expr| -> Result<Expr, VirErr> { Ok(e.clone()) };
                    it.body = Some(map_stmt_expr_visitor(body, &mut fe, &mut fs)?);
                }
            }
            if let Some(members) = decl.members_mut() {
                for member in members.iter_mut() {
                    map_member_stmts(member, &mut fs)?;
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
    use crate::config::RewriteOptions;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::test_util::*;
    use proptest::prelude::*;

    fn forall_stmt(vars: &[Var], range: &Expr, ensures: Vec<Expr>, body: Option<Stmt>, attrs: Attributes) -> Stmt {
        mk_stmt(
            &sp(),
            StmtX::Forall {
                vars: Rc::new(vars.to_vec()),
                range: range.clone(),
                ensures: Rc::new(ensures),
                body,
                attrs,
                forall_exprs: None,
            },
        )
    }

    fn run(program: &Program, stmt: &Stmt) -> (Vec<String>, CollectedDiagnostics) {
        let ctx = GlobalCtx::new(program, &Rc::new(RewriteOptions::default()));
        let mut diags = CollectedDiagnostics::new();
        let result = desugar(stmt, &ctx, &mut Reporter::new(&mut diags, "forall-stmt"));
        let facts = match &result.x {
            StmtX::Forall { forall_exprs: Some(es), .. } => es.iter().map(expr_to_string).collect(),
            _ => panic!("forall statement was not desugared"),
        };
        (facts, diags)
    }

    fn shifted_assignment() -> Stmt {
        let i = var_decl("i", &int_typ());
        let a = var_decl("a", &seq_typ(&int_typ()));
        let range = and(&le(&int(0), &var(&i)), &lt(&var(&i), &int(10)));
        let body = block(vec![assign(&index(&var(&a), &add(&var(&i), &int(3))), &var(&i))]);
        forall_stmt(&[i], &range, vec![], Some(body), no_attrs())
    }

    #[test]
    fn shifted_index_is_inverted() {
        let (facts, diags) = run(&Program::new("p", vec![]), &shifted_assignment());
        assert_eq!(facts, vec!["forall j: int {:trigger a[j]} | 3 <= j < 13 :: a[j] == j - 3"]);
        assert_eq!(
            diags.notes_at(MessageLevel::Info),
            vec!["rewrite: forall j: int {:trigger a[j]} | 3 <= j < 13 :: a[j] == j - 3"]
        );
    }

    #[test]
    fn fresh_index_variable_avoids_names_in_scope() {
        let i = var_decl("i", &nat_typ());
        let j = var_decl("j", &int_typ());
        let a = var_decl("a", &seq_typ(&int_typ()));
        let range = lt(&var(&i), &var(&j));
        let body = assign(&index(&var(&a), &var(&i)), &var(&j));
        let stmt = forall_stmt(&[i], &range, vec![], Some(body), no_attrs());
        let (facts, _) = run(&Program::new("p", vec![]), &stmt);
        assert_eq!(facts, vec!["forall j#0: nat {:trigger a[j#0]} | 0 <= j#0 < j :: a[j#0] == j"]);
    }

    #[test]
    fn field_update_reads_the_pre_state() {
        let o = var_decl("o", &class("C"));
        let s = var_decl("s", &set_typ(&class("C")));
        let range = in_set(&var(&o), &var(&s));
        let f = |e: &Expr| member(e, "f", &int_typ());
        let body = assign(&f(&var(&o)), &add(&f(&var(&o)), &int(1)));
        let stmt = forall_stmt(&[o], &range, vec![], Some(body), no_attrs());
        let (facts, _) = run(&Program::new("p", vec![]), &stmt);
        assert_eq!(facts, vec!["forall j: C {:trigger j.f} | j in s :: j.f == old(j.f + 1)"]);
    }

    #[test]
    fn non_invertible_target_falls_back() {
        let i = var_decl("i", &int_typ());
        let a = var_decl("a", &seq_typ(&int_typ()));
        let range = and(&le(&int(0), &var(&i)), &lt(&var(&i), &int(5)));
        let body = assign(&index(&var(&a), &mul(&var(&i), &int(2))), &int(0));
        let stmt = forall_stmt(&[i], &range, vec![], Some(body), no_attrs());
        let (facts, diags) = run(&Program::new("p", vec![]), &stmt);
        assert_eq!(facts, vec!["forall i: int | 0 <= i < 5 :: a[i * 2] == 0"]);
        assert_eq!(diags.count(MessageLevel::Info), 0);
    }

    #[test]
    fn proof_and_call_bodies() {
        let x = var_decl("x", &int_typ());
        let n = var_decl("n", &int_typ());
        let mut lemma = Method::new(&sp(), &fun_path("L"), MethodKind::Lemma, vec![n.clone()], vec![]);
        lemma.requires.push(le(&int(0), &var(&n)));
        lemma.ensures.push(eq(&call("f", vec![var(&n)], &int_typ()), &var(&n)));
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class.members.push(Member::Method(lemma));
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        let program = Program::new("p", vec![module]);

        let call = mk_stmt(
            &sp(),
            StmtX::Call {
                lhss: no_exprs(),
                method: fun_path("L"),
                receiver: Some(implicit_this()),
                args: Rc::new(vec![add(&var(&x), &int(1))]),
            },
        );
        let range = lt(&var(&x), &int(5));
        let plain = forall_stmt(&[x.clone()], &range, vec![], Some(call.clone()), no_attrs());
        let (facts, _) = run(&program, &plain);
        assert_eq!(facts, vec!["forall x: int | x < 5 :: f(x + 1) == x + 1"]);

        let auto = Rc::new(vec![mk_attr(&sp(), AUTO_REQUIRES, vec![])]);
        let strengthened = forall_stmt(&[x.clone()], &range, vec![], Some(call), auto);
        let (facts, _) = run(&program, &strengthened);
        assert_eq!(facts, vec!["forall x: int | x < 5 && 0 <= x + 1 :: f(x + 1) == x + 1"]);

        let ens = le(&int(0), &mul(&var(&x), &var(&x)));
        let proof = forall_stmt(&[x], &range, vec![ens], Some(block(vec![])), no_attrs());
        let (facts, _) = run(&program, &proof);
        assert_eq!(facts, vec!["forall x: int | x < 5 :: 0 <= x * x"]);
    }

    #[test]
    fn partial_inversion_is_rejected() {
        let i = var_decl("i", &int_typ());
        let j = var_decl("j", &int_typ());
        let f = mk_if(&sp(), &lt(&var(&i), &int(0)), &add(&var(&i), &int(1)), &mul(&var(&i), &int(2)));
        assert!(invert_expression(&i, &j, &mk_bool(&sp(), true), &f).is_none());
        assert!(invert_expression(&i, &j, &mk_bool(&sp(), true), &int(4)).is_none());
    }

    fn shape(i: &Var, which: u8, k: i64, c: i64) -> Expr {
        let (vi, vk) = (var(i), int(k));
        match which {
            0 => vi,
            1 => add(&vi, &vk),
            2 => add(&vk, &vi),
            3 => sub(&vi, &vk),
            4 => sub(&vk, &vi),
            _ => mk_if(&sp(), &lt(&vi, &int(c)), &add(&vi, &vk), &sub(&int(c), &vi)),
        }
    }

    proptest! {
        #[test]
        fn inversion_is_equivalent_on_a_bounded_domain(
            which in 0u8..6, k in -5i64..6, c in -5i64..6, lo in -10i64..1, hi in 0i64..11,
        ) {
            let i = var_decl("i", &int_typ());
            let j = var_decl("j", &int_typ());
            let range = and(&le(&int(lo), &var(&i)), &lt(&var(&i), &int(hi)));
            let f = shape(&i, which, k, c);
            let pieces = invert_expression(&i, &j, &range, &f).unwrap();
            for iv in -15i64..16 {
                for jv in -30i64..31 {
                    let env: HashMap<String, i64> =
                        vec![("i".to_string(), iv), ("j".to_string(), jv)].into_iter().collect();
                    let direct = eval_bool(&range, &env).unwrap() && eval_int(&f, &env).unwrap() == jv;
                    let inverted = pieces.iter().any(|p| {
                        eval_bool(&p.guard, &env).unwrap() && eval_int(&p.inverse, &env).unwrap() == iv
                    });
                    prop_assert_eq!(direct, inverted, "i = {}, j = {}", iv, jv);
                }
            }
        }
    }
}
