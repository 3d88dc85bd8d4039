//! Trigger selection for quantifiers without user-supplied triggers.
//!
//! A candidate term is a function call, field select, sequence or map select, or set
//! membership that mentions a bound variable and contains no interpreted operation over the
//! bound variables (the prover matches ground terms, so `f(x + 1)` can never fire on `x`).
//! Single terms covering every bound variable are preferred; otherwise a greedy multi-term
//! trigger is assembled. Terms that would instantiate themselves again through the body
//! (`f(x)` alongside `f(x + 1)`) are dropped while alternatives exist.

use crate::ast::*;
use crate::ast_util::{auto_span, mk_attr};
use crate::ast_visitor::{expr_sub_exprs, map_module_exprs};
use crate::attributes::{bool_attr, has_attr, AUTO_TRIGGERS, TRIGGER};
use crate::context::GlobalCtx;
use crate::free_vars::free_vars_expr;
use crate::messages::Reporter;
use crate::printer::expr_to_string;
use crate::rewriter::Rewriter;
use indexmap::IndexMap;
use std::rc::Rc;

pub struct TriggerGenerator {}

impl TriggerGenerator {
    pub fn new() -> Self {
        TriggerGenerator {}
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    term: Expr,
    /// indices into the quantifier's bound variables
    covers: Vec<usize>,
    text: String,
}

fn is_candidate_shape(e: &Expr) -> bool {
    match &e.x {
        ExprX::Call { .. } | ExprX::Member { .. } | ExprX::Index(..) | ExprX::Apply(..) => true,
        ExprX::Binary(BinaryOp::In, _, _) => true,
        _ => false,
    }
}

/// Nodes that may appear inside a trigger term
fn is_trigger_friendly(e: &Expr) -> bool {
    match &e.x {
        ExprX::Const(_) | ExprX::Var(_) | ExprX::This { .. } | ExprX::Old(..) | ExprX::Ctor { .. } => true,
        ExprX::Unary(UnaryOp::Cardinality, _) => true,
        ExprX::Binary(..) => false,
        _ => is_candidate_shape(e),
    }
}

/// Head symbol of a term, used to recognize other instances of it
fn head_of(e: &Expr) -> Option<String> {
    match &e.x {
        ExprX::Call { fun, .. } => Some(format!("call {}", fun)),
        ExprX::Member { member, .. } => Some(format!("member {}", member)),
        ExprX::Index(s, _) => Some(format!("index {}", expr_to_string(s))),
        ExprX::Binary(BinaryOp::In, _, s) => Some(format!("in {}", expr_to_string(s))),
        ExprX::Apply(f, _) => Some(format!("apply {}", expr_to_string(f))),
        _ => None,
    }
}

struct Collector<'a> {
    bound: &'a [Ident],
    candidates: IndexMap<String, Candidate>,
    /// every application under the quantifier, by head, used for matching-loop detection
    applications: Vec<(String, String, bool)>,
}

impl<'a> Collector<'a> {
    fn covers(&self, e: &Expr) -> Vec<usize> {
        let free = free_vars_expr(e);
        (0..self.bound.len()).filter(|i| free.contains(&self.bound[*i])).collect()
    }

    /// Bound variables occur in `e` only under trigger-friendly nodes
    fn is_clean(&self, e: &Expr) -> bool {
        expr_sub_exprs(e).into_iter().all(|sub| {
            if self.covers(sub).is_empty() {
                true
            } else {
                is_trigger_friendly(sub) && self.is_clean(sub)
            }
        })
    }

    fn visit(&mut self, e: &Expr) {
        match &e.x {
            // inner binders get their own triggers
            ExprX::Quant { .. }
            | ExprX::SetComprehension { .. }
            | ExprX::MapComprehension { .. }
            | ExprX::Lambda { .. }
            | ExprX::Let { .. }
            | ExprX::LetSuchThat { .. }
            | ExprX::StmtExpr(..) => return,
            _ => {}
        }
        if is_candidate_shape(e) {
            let covers = self.covers(e);
            if !covers.is_empty() {
                let text = expr_to_string(e);
                let clean = self.is_clean(e);
                if let Some(head) = head_of(e) {
                    self.applications.push((head, text.clone(), clean));
                }
                if clean && !self.candidates.contains_key(&text) {
                    self.candidates.insert(text.clone(), Candidate { term: e.clone(), covers, text });
                }
            }
        }
        for sub in expr_sub_exprs(e) {
            self.visit(sub);
        }
    }

    /// Another instance of the same head, not itself a candidate, would re-trigger `c`
    fn may_loop(&self, c: &Candidate) -> bool {
        let head = match head_of(&c.term) {
            Some(h) => h,
            None => return false,
        };
        self.applications.iter().any(|(h, text, clean)| *h == head && *text != c.text && !clean)
    }
}

/// Terms covering a var strictly inside another covering term make the outer term redundant
fn minimal(cands: Vec<Candidate>) -> Vec<Candidate> {
    let texts: Vec<String> = cands.iter().map(|c| c.text.clone()).collect();
    cands
        .into_iter()
        .filter(|c| !texts.iter().any(|t| *t != c.text && c.text.contains(t.as_str())))
        .collect()
}

/// Selected triggers, each a list of terms, plus whether they may loop
fn select_triggers(vars: &Vars, body: &Expr, range: Option<&Expr>) -> (Vec<Vec<Candidate>>, bool) {
    let bound: Vec<Ident> = vars.iter().map(|v| v.name.clone()).collect();
    let mut collector = Collector { bound: &bound, candidates: IndexMap::new(), applications: vec![] };
    if let Some(range) = range {
        collector.visit(range);
    }
    collector.visit(body);
    let all: Vec<Candidate> = collector.candidates.values().cloned().collect();
    let single: Vec<Candidate> = minimal(all.iter().filter(|c| c.covers.len() == bound.len()).cloned().collect());
    if !single.is_empty() {
        let (looping, safe): (Vec<Candidate>, Vec<Candidate>) =
            single.into_iter().partition(|c| collector.may_loop(c));
        return if safe.is_empty() {
            (looping.into_iter().map(|c| vec![c]).collect(), true)
        } else {
            (safe.into_iter().map(|c| vec![c]).collect(), false)
        };
    }
    // greedy multi-trigger: widest coverage first, then shortest text
    let mut pool = all;
    pool.sort_by(|a, b| b.covers.len().cmp(&a.covers.len()).then(a.text.len().cmp(&b.text.len())));
    let mut covered = vec![false; bound.len()];
    let mut chosen = Vec::new();
    for c in pool {
        if c.covers.iter().any(|i| !covered[*i]) {
            for i in c.covers.iter() {
                covered[*i] = true;
            }
            chosen.push(c);
        }
    }
    if covered.iter().all(|b| *b) && !chosen.is_empty() {
        let loops = chosen.iter().any(|c| collector.may_loop(c));
        (vec![chosen], loops)
    } else {
        (vec![], false)
    }
}

fn add_triggers(expr: &Expr, reporter: &mut Reporter) -> Expr {
    let (quant, vars, range, body, attrs) = match &expr.x {
        ExprX::Quant { quant, vars, range, body, attrs } => (quant, vars, range, body, attrs),
        _ => return expr.clone(),
    };
    if has_attr(attrs, TRIGGER) || bool_attr(attrs, AUTO_TRIGGERS) == Some(false) {
        return expr.clone();
    }
    let (triggers, loops) = select_triggers(vars, body, range.as_ref());
    if triggers.is_empty() {
        reporter.warning(&expr.span, "Could not find a trigger for this quantifier");
        return expr.clone();
    }
    let text = triggers
        .iter()
        .map(|t| format!("{{{}}}", t.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(", ")))
        .collect::<Vec<_>>()
        .join(", ");
    if loops {
        reporter.warning(&expr.span, format!("Selected triggers may cause matching loops: {}", text));
    }
    reporter.info(&expr.span, format!("Selected triggers: {}", text));
    let span = auto_span(&expr.span);
    let mut new_attrs: Vec<Attribute> = (**attrs).clone();
    for t in triggers {
        new_attrs.push(mk_attr(&span, TRIGGER, t.into_iter().map(|c| c.term).collect()));
    }
    expr.new_x(ExprX::Quant {
        quant: *quant,
        vars: vars.clone(),
        range: range.clone(),
        body: body.clone(),
        attrs: Rc::new(new_attrs),
    })
}

impl Rewriter for TriggerGenerator {
    fn name(&self) -> &'static str {
        "triggers"
    }

    fn post_resolve_module(
        &mut self,
        module: &mut Module,
        _ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        map_module_exprs(module, &mut |e: &Expr| Ok(add_triggers(e, reporter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::test_util::*;

    fn run(e: &Expr) -> (String, CollectedDiagnostics) {
        let mut diags = CollectedDiagnostics::new();
        let result = add_triggers(e, &mut Reporter::new(&mut diags, "triggers"));
        (expr_to_string(&result), diags)
    }

    fn f(e: &Expr) -> Expr {
        call("f", vec![e.clone()], &int_typ())
    }

    #[test]
    fn single_term_covering_the_bound_variable() {
        let x = var_decl("x", &int_typ());
        let q = forall(&[x.clone()], Some(&le(&int(0), &var(&x))), &le(&int(0), &f(&var(&x))));
        let (s, diags) = run(&q);
        assert_eq!(s, "forall x: int {:trigger f(x)} | 0 <= x :: 0 <= f(x)");
        assert_eq!(diags.notes_at(MessageLevel::Info), vec!["Selected triggers: {f(x)}"]);
    }

    #[test]
    fn multi_term_trigger_when_no_single_term_covers() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let s = var_decl("s", &seq_typ(&int_typ()));
        let body = implies(&lt(&var(&x), &var(&y)), &le(&index(&var(&s), &var(&x)), &index(&var(&s), &var(&y))));
        let (out, _) = run(&forall(&[x, y], None, &body));
        assert!(out.starts_with("forall x: int, y: int {:trigger s[x], s[y]} ::"), "{}", out);
    }

    #[test]
    fn arithmetic_on_bound_variables_is_not_a_trigger() {
        let x = var_decl("x", &int_typ());
        let q = forall(&[x.clone()], None, &le(&var(&x), &add(&var(&x), &int(1))));
        let (s, diags) = run(&q);
        assert_eq!(s, "forall x: int :: x <= x + 1");
        assert_eq!(diags.notes_at(MessageLevel::Warning), vec!["Could not find a trigger for this quantifier"]);
    }

    #[test]
    fn matching_loops_are_reported() {
        let x = var_decl("x", &int_typ());
        let body = lt(&f(&var(&x)), &f(&add(&var(&x), &int(1))));
        let (s, diags) = run(&forall(&[x], None, &body));
        assert!(s.contains("{:trigger f(x)}"), "{}", s);
        assert_eq!(
            diags.notes_at(MessageLevel::Warning),
            vec!["Selected triggers may cause matching loops: {f(x)}"]
        );
    }

    #[test]
    fn explicit_triggers_and_opt_out_are_respected() {
        let x = var_decl("x", &int_typ());
        let vars = Rc::new(vec![x.clone()]);
        let body = le(&int(0), &f(&var(&x)));
        let off = Rc::new(vec![mk_attr(&sp(), AUTO_TRIGGERS, vec![mk_bool(&sp(), false)])]);
        let q = mk_quant(&sp(), Quant::Forall, &vars, None, &body, &off);
        let (_, diags) = run(&q);
        assert_eq!(diags.count(MessageLevel::Info), 0);
        let once = add_triggers(&forall(&[x], None, &body), &mut Reporter::new(&mut CollectedDiagnostics::new(), "t"));
        let (twice, diags) = run(&once);
        assert_eq!(twice, expr_to_string(&once));
        assert_eq!(diags.count(MessageLevel::Info), 0);
    }
}
