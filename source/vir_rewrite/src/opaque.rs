//! Reveal lemmas for opaque functions and constants.
//!
//! An opaque member gets `{:fuel 0, 0}`, hiding its definition, and a companion lemma
//! `reveal_<name>()` whose `{:fuel <name>, 1, 2}` attribute restores one unfolding at each call
//! site. For a constant the lemma also states the defining equation.

use crate::ast::*;
use crate::ast_util::{auto_span, mk_attr, mk_block, mk_bool, mk_eq, mk_int, mk_member, mk_this, undefined_typ};
use crate::attributes::{
    has_attr, is_opaque, with_attr_appended, AUTO_GENERATED, FUEL, OPAQUE_REVEAL, VERIFY,
};
use crate::context::GlobalCtx;
use crate::messages::Reporter;
use crate::rewriter::Rewriter;
use std::rc::Rc;

pub const REVEAL_PREFIX: &str = "reveal_";

pub struct OpaqueRevealLemmas {}

impl OpaqueRevealLemmas {
    pub fn new() -> Self {
        OpaqueRevealLemmas {}
    }
}

fn member_ref(span: &Span, this_typ: &Typ, path: &Path, typ: &Typ) -> Expr {
    mk_member(span, &mk_this(span, this_typ, true), path, typ)
}

fn reveal_lemma(span: &Span, this_typ: &Typ, member: &Member) -> Method {
    let span = auto_span(span);
    let path = member.path();
    let lemma_path = path.pop_segment().push_segment(&format!("{}{}", REVEAL_PREFIX, path.last()));
    let mut lemma = Method::new(&span, &lemma_path, MethodKind::Lemma, vec![], vec![]);
    lemma.is_static = member.is_static();
    let target_typ = match member {
        Member::Field(f) => f.typ.clone(),
        _ => undefined_typ(),
    };
    let target = member_ref(&span, this_typ, path, &target_typ);
    lemma.attrs = Rc::new(vec![
        mk_attr(&span, FUEL, vec![target.clone(), mk_int(&span, 1), mk_int(&span, 2)]),
        mk_attr(&span, AUTO_GENERATED, vec![]),
        mk_attr(&span, OPAQUE_REVEAL, vec![]),
        mk_attr(&span, VERIFY, vec![mk_bool(&span, false)]),
    ]);
    if let Member::Field(f) = member {
        if let Some(rhs) = &f.rhs {
            lemma.ensures.push(mk_eq(&span, &target, rhs));
        }
    }
    if let Member::Function(f) = member {
        lemma.typ_params = f.typ_params.clone();
    }
    lemma.body = Some(mk_block(&span, vec![]));
    lemma
}

fn is_revealable(member: &Member) -> bool {
    match member {
        Member::Function(f) => !f.is_refining && is_opaque(&f.attrs),
        Member::Field(f) => !f.is_refining && !f.is_mutable && f.rhs.is_some() && is_opaque(&f.attrs),
        Member::Method(_) => false,
    }
}

impl Rewriter for OpaqueRevealLemmas {
    fn name(&self) -> &'static str {
        "opaque"
    }

    fn pre_resolve_module(&mut self, module: &mut Module, _ctx: &GlobalCtx, reporter: &mut Reporter) -> Result<(), VirErr> {
        for decl in module.decls.iter_mut() {
            let this_typ = decl.this_typ();
            let members = match decl.members_mut() {
                Some(members) => members,
                None => continue,
            };
            let existing: Vec<Ident> = members.iter().map(|m| m.name().clone()).collect();
            let mut rewritten = Vec::with_capacity(members.len());
            for mut member in members.drain(..) {
                if !is_revealable(&member) {
                    rewritten.push(member);
                    continue;
                }
                if !has_attr(member.attrs(), FUEL) {
                    let span = auto_span(member.span());
                    let fuel = mk_attr(&span, FUEL, vec![mk_int(&span, 0), mk_int(&span, 0)]);
                    let attrs = with_attr_appended(member.attrs(), fuel);
                    *member.attrs_mut() = attrs;
                }
                let lemma_name = format!("{}{}", REVEAL_PREFIX, member.name());
                let lemma = if existing.iter().any(|x| x.as_str() == lemma_name) {
                    None
                } else {
                    reporter.info(member.span(), format!("{} can be revealed with {}()", member.name(), lemma_name));
                    tracing::debug!(member = %member.path(), "synthesized reveal lemma");
                    Some(reveal_lemma(member.span(), &this_typ, &member))
                };
                rewritten.push(member);
                if let Some(lemma) = lemma {
                    rewritten.push(Member::Method(lemma));
                }
            }
            *members = rewritten;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::attributes::OPAQUE;
    use crate::config::RewriteOptions;
    use crate::messages::CollectedDiagnostics;
    use crate::printer::{attrs_to_string, member_to_string};
    use crate::test_util::*;

    fn run(module: &mut Module) {
        let ctx = GlobalCtx::new(&Program::new("p", vec![]), &Rc::new(RewriteOptions::default()));
        let mut diags = CollectedDiagnostics::new();
        OpaqueRevealLemmas::new()
            .pre_resolve_module(module, &ctx, &mut Reporter::new(&mut diags, "opaque"))
            .unwrap();
    }

    fn module_with(members: Vec<Member>) -> Module {
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class.members = members;
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        module
    }

    fn opaque_foo() -> Function {
        let x = var_decl("x", &int_typ());
        let mut f = Function::new(&sp(), &fun_path("Foo"), FunctionKind::Function, vec![x.clone()], &int_typ());
        f.attrs = Rc::new(vec![mk_attr(&sp(), OPAQUE, vec![])]);
        f.body = Some(add(&var(&x), &int(1)));
        f
    }

    #[test]
    fn opaque_function_gets_fuel_and_one_reveal_lemma() {
        let mut module = module_with(vec![Member::Function(opaque_foo())]);
        run(&mut module);
        run(&mut module);
        let members = module.decls[0].members();
        assert_eq!(members.len(), 2);
        assert_eq!(attrs_to_string(members[0].attrs()), "{:opaque} {:fuel 0, 0}");
        assert_eq!(members[1].name().as_str(), "reveal_Foo");
        assert_eq!(
            attrs_to_string(members[1].attrs()),
            "{:fuel Foo, 1, 2} {:auto_generated} {:opaque_reveal} {:verify false}"
        );
        match &members[1] {
            Member::Method(m) => {
                assert_eq!(m.kind, MethodKind::Lemma);
                assert!(m.is_ghost);
                assert!(m.ensures.is_empty());
            }
            _ => panic!("expected a lemma"),
        }
    }

    #[test]
    fn opaque_constant_lemma_states_its_definition() {
        let mut c = Field::new(&sp(), &fun_path("K"), &int_typ(), false);
        c.is_mutable = false;
        c.rhs = Some(mul(&int(6), &int(7)));
        c.attrs = Rc::new(vec![mk_attr(&sp(), OPAQUE, vec![])]);
        let mut module = module_with(vec![Member::Field(c)]);
        run(&mut module);
        let lemma = &module.decls[0].members()[1];
        assert!(member_to_string(lemma).contains("ensures K == 6 * 7"));
    }

    #[test]
    fn refining_and_transparent_members_are_skipped() {
        let mut inherited = opaque_foo();
        inherited.is_refining = true;
        let mut plain = opaque_foo();
        plain.name = str_ident("Bar");
        plain.path = fun_path("Bar");
        plain.attrs = no_attrs();
        let mut module = module_with(vec![Member::Function(inherited), Member::Function(plain)]);
        run(&mut module);
        assert_eq!(module.decls[0].members().len(), 2);
        assert_eq!(attrs_to_string(module.decls[0].members()[0].attrs()), "{:opaque}");
    }
}
