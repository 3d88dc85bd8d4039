use crate::ast::*;
use crate::ast_util::{conjoin, conjuncts, mk_binary, mk_quant};
use crate::ast_visitor::map_module_exprs;
use crate::attributes::{bool_attr, has_user_triggers, SPLIT};
use crate::context::GlobalCtx;
use crate::messages::Reporter;
use crate::rewriter::Rewriter;

/// Splits `forall x :: A && B` into `(forall x :: A) && (forall x :: B)` and
/// `exists x :: A || B` into `(exists x :: A) || (exists x :: B)`,
/// so each piece gets its own triggers and its own error location.
pub struct QuantifierSplitter {}

impl QuantifierSplitter {
    pub fn new() -> Self {
        QuantifierSplitter {}
    }
}

fn disjuncts(expr: &Expr) -> Vec<Expr> {
    match &expr.x {
        ExprX::Binary(BinaryOp::Or, e1, e2) => {
            let mut v = disjuncts(e1);
            v.extend(disjuncts(e2));
            v
        }
        _ => vec![expr.clone()],
    }
}

/// Bodies of the pieces, or `None` when the body does not split
fn split_body(quant: Quant, body: &Expr) -> Option<Vec<Expr>> {
    let parts = match (quant, &body.x) {
        (Quant::Forall, ExprX::Binary(BinaryOp::Implies, lhs, rhs)) => {
            let rhs_parts = conjuncts(rhs);
            if rhs_parts.len() < 2 {
                return None;
            }
            rhs_parts.iter().map(|r| mk_binary(&body.span, BinaryOp::Implies, lhs, r)).collect()
        }
        (Quant::Forall, _) => conjuncts(body),
        (Quant::Exists, _) => disjuncts(body),
    };
    if parts.len() < 2 { None } else { Some(parts) }
}

fn split_quantifier(expr: &Expr, reporter: &mut Reporter) -> Expr {
    if let ExprX::Quant { quant, vars, range, body, attrs } = &expr.x {
        // user triggers are written for the whole body
        if bool_attr(attrs, SPLIT) == Some(false) || has_user_triggers(attrs) {
            return expr.clone();
        }
        if let Some(parts) = split_body(*quant, body) {
            let pieces: Vec<Expr> = parts
                .iter()
                .map(|part| mk_quant(&expr.span, *quant, vars, range.as_ref(), part, attrs))
                .collect();
            reporter.info(&expr.span, format!("Quantifier was split into {} parts", pieces.len()));
            return match quant {
                Quant::Forall => conjoin(&expr.span, &pieces),
                Quant::Exists => pieces[1..]
                    .iter()
                    .fold(pieces[0].clone(), |acc, p| mk_binary(&expr.span, BinaryOp::Or, &acc, p)),
            };
        }
    }
    expr.clone()
}

impl Rewriter for QuantifierSplitter {
    fn name(&self) -> &'static str {
        "quantifier-split"
    }

    fn post_resolve_module(
        &mut self,
        module: &mut Module,
        _ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        map_module_exprs(module, &mut |e: &Expr| Ok(split_quantifier(e, reporter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::printer::expr_to_string;
    use crate::test_util::*;
    use std::rc::Rc;

    fn split(e: &Expr) -> (String, usize) {
        let mut diags = CollectedDiagnostics::new();
        let result = split_quantifier(e, &mut Reporter::new(&mut diags, "quantifier-split"));
        (expr_to_string(&result), diags.count(MessageLevel::Info))
    }

    #[test]
    fn forall_over_conjunction_under_implication() {
        let x = var_decl("x", &int_typ());
        let p = |e: &Expr| call("P", vec![e.clone()], &bool_typ());
        let q = |e: &Expr| call("Q", vec![e.clone()], &bool_typ());
        let body = implies(&lt(&int(0), &var(&x)), &and(&p(&var(&x)), &q(&var(&x))));
        let (s, infos) = split(&forall(&[x], None, &body));
        assert_eq!(s, "(forall x: int :: 0 < x ==> P(x)) && (forall x: int :: 0 < x ==> Q(x))");
        assert_eq!(infos, 1);
    }

    #[test]
    fn exists_over_disjunction() {
        let x = var_decl("x", &int_typ());
        let body = mk_or(&sp(), &eq(&var(&x), &int(1)), &eq(&var(&x), &int(2)));
        let (s, _) = split(&exists(&[x.clone()], Some(&lt(&int(0), &var(&x))), &body));
        assert_eq!(s, "(exists x: int | 0 < x :: x == 1) || (exists x: int | 0 < x :: x == 2)");
        // a conjunction under exists stays whole
        let body = and(&eq(&var(&x), &int(1)), &eq(&var(&x), &int(2)));
        let (_, infos) = split(&exists(&[x], None, &body));
        assert_eq!(infos, 0);
    }

    #[test]
    fn opt_out_and_user_triggers_prevent_splitting() {
        let x = var_decl("x", &int_typ());
        let body = and(&le(&int(0), &var(&x)), &le(&var(&x), &int(9)));
        let vars = Rc::new(vec![x.clone()]);
        let no_split = Rc::new(vec![mk_attr(&sp(), SPLIT, vec![mk_bool(&sp(), false)])]);
        let q = mk_quant(&sp(), Quant::Forall, &vars, None, &body, &no_split);
        assert_eq!(split(&q).1, 0);
        let trigger = Rc::new(vec![mk_attr(&sp(), "trigger", vec![call("f", vec![var(&x)], &int_typ())])]);
        let q = mk_quant(&sp(), Quant::Forall, &vars, None, &body, &trigger);
        assert_eq!(split(&q).1, 0);
    }
}
