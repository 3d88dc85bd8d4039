//! Dynamic-frames boilerplate for classes marked `{:autocontracts}`.
//!
//! Before resolution the pass declares `ghost var Repr: set<object?>` and `predicate Valid()`
//! when the class does not, and adds the standard contracts to every member.
//! After resolution, when field types are known, it fills in the body of `Valid` and appends
//! the statements that maintain `Repr` to constructors and mutating methods.
//! Every addition is skipped when an identical clause or statement is already present, so the
//! pass can be run again on its own output.

use crate::ast::*;
use crate::ast_util::{
    auto_span, bool_typ, conjoin, conjuncts, is_nullable_typ, mk_and, mk_binary, mk_block, mk_call, mk_frame, mk_fresh,
    mk_implies, mk_member, mk_not, mk_null, mk_old, mk_set_display, mk_stmt, mk_this, stmt_as_block,
};
use crate::ast_visitor::stmt_any;
use crate::attributes::{bool_attr, has_attr, AUTOCONTRACTS, AUTO_GENERATED};
use crate::context::GlobalCtx;
use crate::free_vars::mentions_old_state;
use crate::messages::Reporter;
use crate::printer::{expr_to_string, frame_to_string, stmt_to_string};
use crate::rewriter::Rewriter;
use std::rc::Rc;

const REPR: &str = "Repr";
const VALID: &str = "Valid";

pub struct AutoContracts {}

impl AutoContracts {
    pub fn new() -> Self {
        AutoContracts {}
    }
}

/// Names and types of the class being expanded
struct Frame {
    class_typ: Typ,
    repr_path: Path,
    valid_path: Path,
    set_typ: Typ,
    object_typ: Typ,
}

impl Frame {
    fn new(class: &ClassDecl, ctx: &GlobalCtx) -> Self {
        Frame {
            class_typ: Rc::new(TypX::Class {
                path: class.path.clone(),
                args: Rc::new(class.typ_params.iter().map(|x| Rc::new(TypX::TypParam(x.clone()))).collect()),
                nullable: false,
            }),
            repr_path: class.path.push_segment(REPR),
            valid_path: class.path.push_segment(VALID),
            set_typ: ctx.builtins.set_of_objects_typ.clone(),
            object_typ: ctx.builtins.nullable_object_typ.clone(),
        }
    }

    fn this(&self, span: &Span) -> Expr {
        mk_this(span, &self.class_typ, false)
    }

    fn repr(&self, span: &Span) -> Expr {
        mk_member(span, &mk_this(span, &self.class_typ, true), &self.repr_path, &self.set_typ)
    }

    fn valid(&self, span: &Span) -> Expr {
        mk_call(span, &self.valid_path, Some(&mk_this(span, &self.class_typ, true)), vec![], &bool_typ())
    }
}

/// A field whose class follows the same Repr/Valid discipline
struct SubObject {
    field: Expr,
    repr: Expr,
    valid: Expr,
    nullable: bool,
}

fn is_autocontracts_class(class: &ClassDecl) -> bool {
    !class.is_trait && bool_attr(&class.attrs, AUTOCONTRACTS) == Some(true)
}

fn opted_out(attrs: &Attributes) -> bool {
    bool_attr(attrs, AUTOCONTRACTS) == Some(false) || has_attr(attrs, AUTO_GENERATED)
}

fn add_clause(clauses: &mut Vec<Expr>, e: Expr, at_front: bool, added: &mut Vec<String>, keyword: &str) {
    let text = expr_to_string(&e);
    if clauses.iter().any(|c| expr_to_string(c) == text) {
        return;
    }
    added.push(format!("{} {}", keyword, text));
    if at_front {
        clauses.insert(0, e);
    } else {
        clauses.push(e);
    }
}

fn add_frame(frames: &mut Vec<FrameExpr>, frame: FrameExpr, added: &mut Vec<String>, keyword: &str) {
    let text = frame_to_string(&frame);
    if frames.iter().any(|f| frame_to_string(f) == text) {
        return;
    }
    added.push(format!("{} {}", keyword, text));
    frames.push(frame);
}

/// Does the body assign only to locals (and allocate nothing)?
fn local_assigns_only(body: &Stmt) -> bool {
    !stmt_any(body, |s| match &s.x {
        StmtX::Assign { lhs, rhs } => !matches!(&lhs.x, ExprX::Var(_)) || matches!(rhs, Rhs::New { .. }),
        StmtX::VarDecl { init: Some(Rhs::New { .. }), .. } => true,
        StmtX::Call { .. } => true,
        _ => false,
    })
}

/// Methods with results whose bodies only compute those results
fn is_simple_query(m: &Method) -> bool {
    m.outs.len() > 0
        && m.body.as_ref().map_or(false, local_assigns_only)
        && m.ensures.iter().all(|e| !mentions_old_state(e))
}

fn is_this_frame(frame: &FrameExpr) -> bool {
    frame.field.is_none() && matches!(&frame.e.x, ExprX::This { .. })
}

fn add_contracts(frame: &Frame, class: &mut ClassDecl, reporter: &mut Reporter) {
    for member in class.members.iter_mut() {
        if opted_out(member.attrs()) || member.is_static() {
            continue;
        }
        let span = auto_span(member.span());
        let mut added = vec![];
        match member {
            Member::Field(_) => continue,
            Member::Function(f) if f.name.as_str() == VALID => {
                let this_frame = mk_frame(&mk_this(&span, &frame.class_typ, true), None);
                add_frame(&mut f.reads, this_frame, &mut added, "reads");
                add_frame(&mut f.reads, mk_frame(&frame.repr(&span), None), &mut added, "reads");
            }
            Member::Function(f) => {
                let this_frame = mk_frame(&mk_this(&span, &frame.class_typ, true), None);
                add_frame(&mut f.reads, this_frame, &mut added, "reads");
                add_frame(&mut f.reads, mk_frame(&frame.repr(&span), None), &mut added, "reads");
                add_clause(&mut f.requires, frame.valid(&span), true, &mut added, "requires");
            }
            Member::Method(m) if m.kind == MethodKind::Constructor => {
                let before = m.modifies.len();
                m.modifies.retain(|fr| !is_this_frame(fr));
                if m.modifies.len() < before {
                    reporter.warning(&m.span, "constructors no longer need 'this' to be listed in modifies clauses");
                }
                let fresh_repr = mk_fresh(&span, &frame.repr(&span));
                add_clause(&mut m.ensures, mk_and(&span, &frame.valid(&span), &fresh_repr), false, &mut added, "ensures");
            }
            Member::Method(m) if m.kind == MethodKind::TwoStateLemma => {
                add_clause(&mut m.requires, mk_old(&span, &frame.valid(&span)), true, &mut added, "requires");
            }
            Member::Method(m) if m.is_ghost || is_simple_query(m) => {
                add_clause(&mut m.requires, frame.valid(&span), true, &mut added, "requires");
            }
            Member::Method(m) => {
                add_clause(&mut m.requires, frame.valid(&span), true, &mut added, "requires");
                if m.modifies.is_empty() {
                    add_frame(&mut m.modifies, mk_frame(&frame.repr(&span), None), &mut added, "modifies");
                }
                let new_repr = mk_binary(
                    &span,
                    BinaryOp::Difference,
                    &frame.repr(&span),
                    &mk_old(&span, &frame.repr(&span)),
                );
                let post = mk_and(&span, &frame.valid(&span), &mk_fresh(&span, &new_repr));
                add_clause(&mut m.ensures, post, false, &mut added, "ensures");
            }
        }
        if !added.is_empty() {
            reporter.info(member.span(), added.join("\n"));
        }
    }
}

fn declare_frame_members(frame: &Frame, class: &mut ClassDecl) {
    let span = auto_span(&class.span);
    let has = |name: &str| class.members.iter().any(|m| m.name().as_str() == name);
    let (has_repr, has_valid) = (has(REPR), has(VALID));
    if !has_repr {
        let repr = Field::new(&span, &frame.repr_path, &frame.set_typ, true);
        class.members.insert(0, Member::Field(repr));
    }
    if !has_valid {
        let valid = Function::new(&span, &frame.valid_path, FunctionKind::Predicate, vec![], &bool_typ());
        let at = if has_repr { 0 } else { 1 };
        class.members.insert(at, Member::Function(valid));
    }
}

fn sub_objects(frame: &Frame, class: &ClassDecl, ctx: &GlobalCtx, span: &Span) -> Vec<SubObject> {
    let mut subs = vec![];
    for member in class.members.iter() {
        let f = match member {
            Member::Field(f) if !f.is_static && f.name.as_str() != REPR => f,
            _ => continue,
        };
        let path = match &*f.typ {
            TypX::Class { path, .. } => path,
            _ => continue,
        };
        if !ctx.class_has_member(path, REPR) || !ctx.class_has_member(path, VALID) {
            continue;
        }
        let field = mk_member(span, &mk_this(span, &frame.class_typ, true), &f.path, &f.typ);
        subs.push(SubObject {
            repr: mk_member(span, &field, &path.push_segment(REPR), &frame.set_typ),
            valid: mk_call(span, &path.push_segment(VALID), Some(&field), vec![], &bool_typ()),
            nullable: is_nullable_typ(&f.typ),
            field,
        });
    }
    subs
}

fn guard_non_null(span: &Span, sub: &SubObject, e: &Expr) -> Expr {
    if sub.nullable {
        let non_null = mk_binary(span, BinaryOp::Ne, &sub.field, &mk_null(span));
        mk_implies(span, &non_null, e)
    } else {
        e.clone()
    }
}

/// `this in Repr && null !in Repr && (A != null ==> A in Repr && A.Repr <= Repr && this !in A.Repr && A.Valid())`
fn valid_conjuncts(frame: &Frame, subs: &[SubObject], span: &Span) -> Vec<Expr> {
    let repr = frame.repr(span);
    let mut cs = vec![
        mk_binary(span, BinaryOp::In, &frame.this(span), &repr),
        mk_binary(span, BinaryOp::NotIn, &mk_null(span), &repr),
    ];
    for sub in subs.iter() {
        let owned = conjoin(
            span,
            &[
                mk_binary(span, BinaryOp::In, &sub.field, &repr),
                mk_binary(span, BinaryOp::Subset, &sub.repr, &repr),
                mk_binary(span, BinaryOp::NotIn, &frame.this(span), &sub.repr),
                sub.valid.clone(),
            ],
        );
        cs.push(guard_non_null(span, sub, &owned));
    }
    cs
}

fn assign_repr(frame: &Frame, span: &Span, rhs: &Expr) -> Stmt {
    mk_stmt(span, StmtX::Assign { lhs: frame.repr(span), rhs: Rhs::Expr(rhs.clone()) })
}

/// `Repr := Repr + {A} + A.Repr;`
fn absorb(frame: &Frame, span: &Span, sub: &SubObject) -> Stmt {
    let with_field = mk_binary(
        span,
        BinaryOp::Union,
        &frame.repr(span),
        &mk_set_display(span, &frame.object_typ, vec![sub.field.clone()]),
    );
    assign_repr(frame, span, &mk_binary(span, BinaryOp::Union, &with_field, &sub.repr))
}

fn if_stmt(span: &Span, cond: &Expr, thn: Stmt) -> Stmt {
    mk_stmt(span, StmtX::If { cond: Some(cond.clone()), thn: mk_block(span, vec![thn]), els: None })
}

fn constructor_updates(frame: &Frame, subs: &[SubObject], span: &Span) -> Vec<Stmt> {
    let mut stmts = vec![assign_repr(frame, span, &mk_set_display(span, &frame.object_typ, vec![frame.this(span)]))];
    for sub in subs.iter() {
        let update = absorb(frame, span, sub);
        if sub.nullable {
            stmts.push(if_stmt(span, &mk_binary(span, BinaryOp::Ne, &sub.field, &mk_null(span)), update));
        } else {
            stmts.push(update);
        }
    }
    stmts
}

/// `if A != null && !(A in Repr && A.Repr <= Repr) { Repr := Repr + {A} + A.Repr; }`
fn method_updates(frame: &Frame, subs: &[SubObject], span: &Span) -> Vec<Stmt> {
    let mut stmts = vec![];
    for sub in subs.iter() {
        let repr = frame.repr(span);
        let owned = mk_and(
            span,
            &mk_binary(span, BinaryOp::In, &sub.field, &repr),
            &mk_binary(span, BinaryOp::Subset, &sub.repr, &repr),
        );
        let mut cond = mk_not(span, &owned);
        if sub.nullable {
            cond = mk_and(span, &mk_binary(span, BinaryOp::Ne, &sub.field, &mk_null(span)), &cond);
        }
        stmts.push(if_stmt(span, &cond, absorb(frame, span, sub)));
    }
    stmts
}

/// Append `updates` to `body` unless it already ends with them
fn append_updates(body: &Option<Stmt>, updates: &[Stmt]) -> Option<Stmt> {
    let body = body.as_ref()?;
    if updates.is_empty() {
        return None;
    }
    let stmts = stmt_as_block(body);
    let printed: Vec<String> = updates.iter().map(stmt_to_string).collect();
    if stmts.len() >= updates.len() {
        let tail = &stmts[stmts.len() - updates.len()..];
        if tail.iter().map(stmt_to_string).eq(printed.iter().cloned()) {
            return None;
        }
    }
    let mut all: Vec<Stmt> = (*stmts).clone();
    all.extend(updates.iter().cloned());
    Some(mk_block(&body.span, all))
}

fn fill_in_bodies(frame: &Frame, class: &mut ClassDecl, ctx: &GlobalCtx, reporter: &mut Reporter) {
    let span = auto_span(&class.span);
    let subs = sub_objects(frame, class, ctx, &span);
    for member in class.members.iter_mut() {
        if opted_out(member.attrs()) || member.is_static() {
            continue;
        }
        match member {
            Member::Function(f) if f.name.as_str() == VALID && f.params.is_empty() => {
                let own = valid_conjuncts(frame, &subs, &span);
                let existing: Vec<String> = match &f.body {
                    Some(body) => conjuncts(body).iter().map(expr_to_string).collect(),
                    None => vec![],
                };
                if own.iter().all(|c| existing.contains(&expr_to_string(c))) {
                    continue;
                }
                let mut all = own;
                all.extend(f.body.iter().cloned());
                let body = conjoin(&span, &all);
                reporter.info(&f.span, expr_to_string(&body));
                f.body = Some(body);
            }
            Member::Method(m) if m.kind == MethodKind::Constructor => {
                let updates = constructor_updates(frame, &subs, &span);
                if let Some(body) = append_updates(&m.body, &updates) {
                    m.body = Some(body);
                }
            }
            Member::Method(m) if !m.is_ghost && !is_simple_query(m) => {
                let updates = method_updates(frame, &subs, &span);
                if let Some(body) = append_updates(&m.body, &updates) {
                    m.body = Some(body);
                }
            }
            _ => {}
        }
    }
}

impl Rewriter for AutoContracts {
    fn name(&self) -> &'static str {
        "autocontracts"
    }

    fn pre_resolve_module(&mut self, module: &mut Module, ctx: &GlobalCtx, reporter: &mut Reporter) -> Result<(), VirErr> {
        for decl in module.decls.iter_mut() {
            if let TopLevelDecl::Class(class) = decl {
                if !is_autocontracts_class(class) {
                    continue;
                }
                tracing::debug!(class = %class.path, "adding autocontracts");
                let frame = Frame::new(class, ctx);
                declare_frame_members(&frame, class);
                add_contracts(&frame, class, reporter);
            }
        }
        Ok(())
    }

    fn post_resolve_intermediate(
        &mut self,
        module: &mut Module,
        ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        for decl in module.decls.iter_mut() {
            if let TopLevelDecl::Class(class) = decl {
                if !is_autocontracts_class(class) {
                    continue;
                }
                let frame = Frame::new(class, ctx);
                fill_in_bodies(&frame, class, ctx, reporter);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::attributes::AUTOCONTRACTS;
    use crate::config::RewriteOptions;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::printer::member_to_string;
    use crate::test_util::*;

    fn run_on(program: &mut Program) -> CollectedDiagnostics {
        let options = Rc::new(RewriteOptions::default());
        let mut diags = CollectedDiagnostics::new();
        let mut reporter = Reporter::new(&mut diags, "autocontracts");
        let mut pass = AutoContracts::new();
        for i in 0..program.modules.len() {
            let ctx = GlobalCtx::new(program, &options);
            pass.pre_resolve_module(&mut program.modules[i], &ctx, &mut reporter).unwrap();
        }
        for i in 0..program.modules.len() {
            let ctx = GlobalCtx::new(program, &options);
            pass.post_resolve_intermediate(&mut program.modules[i], &ctx, &mut reporter).unwrap();
        }
        drop(reporter);
        diags
    }

    fn autocontracts_class(name: &str, members: Vec<Member>) -> ClassDecl {
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", name]));
        class.attrs = Rc::new(vec![mk_attr(&sp(), AUTOCONTRACTS, vec![])]);
        class.members = members;
        class
    }

    /// class {:autocontracts} C { var data: int; predicate Valid() { true } constructor() {} method Bump() { data := data + 1; } }
    fn scenario() -> Program {
        let data = Field::new(&sp(), &fun_path("data"), &int_typ(), false);
        let mut valid = Function::new(&sp(), &fun_path("Valid"), FunctionKind::Predicate, vec![], &bool_typ());
        valid.body = Some(mk_bool(&sp(), true));
        let mut ctor = Method::new(&sp(), &fun_path("_ctor"), MethodKind::Constructor, vec![], vec![]);
        ctor.body = Some(block(vec![]));
        let mut bump = Method::new(&sp(), &fun_path("Bump"), MethodKind::Method, vec![], vec![]);
        let data_expr = member(&implicit_this(), "data", &int_typ());
        bump.body = Some(block(vec![assign(&data_expr, &add(&data_expr, &int(1)))]));
        let class = autocontracts_class(
            "C",
            vec![Member::Field(data), Member::Function(valid), Member::Method(ctor), Member::Method(bump)],
        );
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        Program::new("p", vec![module])
    }

    fn member_named<'a>(program: &'a Program, class: usize, name: &str) -> &'a Member {
        program.modules[0].decls[class].members().iter().find(|m| m.name().as_str() == name).unwrap()
    }

    #[test]
    fn expands_a_simple_class() {
        let mut program = scenario();
        run_on(&mut program);
        let repr = member_named(&program, 0, "Repr");
        assert_eq!(member_to_string(repr), "ghost var Repr: set<object?>");
        let valid = member_to_string(member_named(&program, 0, "Valid"));
        assert!(valid.contains("reads this, Repr"), "{}", valid);
        assert!(valid.contains("this in Repr && null !in Repr && true"), "{}", valid);
        let ctor = member_to_string(member_named(&program, 0, "_ctor"));
        assert!(ctor.contains("ensures Valid() && fresh(Repr)"), "{}", ctor);
        assert!(ctor.contains("Repr := {this};"), "{}", ctor);
        let bump = member_to_string(member_named(&program, 0, "Bump"));
        assert!(bump.contains("requires Valid()\n  modifies Repr\n  ensures Valid() && fresh(Repr - old(Repr))"), "{}", bump);
    }

    #[test]
    fn rerunning_adds_nothing() {
        let mut program = scenario();
        run_on(&mut program);
        let once: Vec<String> = program.modules[0].decls[0].members().iter().map(member_to_string).collect();
        run_on(&mut program);
        let twice: Vec<String> = program.modules[0].decls[0].members().iter().map(member_to_string).collect();
        assert_eq!(once, twice);
        assert_eq!(once.iter().filter(|m| m.contains("Repr: set<object?>")).count(), 1);
    }

    #[test]
    fn synthesizes_valid_and_absorbs_sub_objects() {
        // class {:autocontracts} Node {}  class {:autocontracts} List { var head: Node?; constructor() {} }
        let node = autocontracts_class("Node", vec![]);
        let head = Field::new(&sp(), &mk_path(&["M", "List", "head"]), &class_typ(&mk_path(&["M", "Node"]), true), false);
        let mut ctor = Method::new(&sp(), &mk_path(&["M", "List", "_ctor"]), MethodKind::Constructor, vec![], vec![]);
        ctor.body = Some(block(vec![]));
        let list = autocontracts_class("List", vec![Member::Field(head), Member::Method(ctor)]);
        let mut module = Module::new(&sp(), "M");
        module.decls = vec![TopLevelDecl::Class(node), TopLevelDecl::Class(list)];
        let mut program = Program::new("p", vec![module]);
        run_on(&mut program);
        let valid = member_to_string(member_named(&program, 1, "Valid"));
        assert!(
            valid.contains(
                "this in Repr && null !in Repr && (head != null ==> head in Repr && head.Repr <= Repr && this !in head.Repr && head.Valid())"
            ),
            "{}",
            valid
        );
        let ctor = member_to_string(member_named(&program, 1, "_ctor"));
        assert!(ctor.contains("if head != null {\n    Repr := Repr + {head} + head.Repr;\n  }"), "{}", ctor);
    }

    #[test]
    fn queries_ghost_members_and_opt_outs() {
        let r = var_decl("r", &int_typ());
        let mut get = Method::new(&sp(), &fun_path("Get"), MethodKind::Method, vec![], vec![r.clone()]);
        get.body = Some(block(vec![assign(&var(&r), &member(&implicit_this(), "data", &int_typ()))]));
        let lemma = Method::new(&sp(), &fun_path("L"), MethodKind::Lemma, vec![], vec![]);
        let mut skipped = Method::new(&sp(), &fun_path("Raw"), MethodKind::Method, vec![], vec![]);
        skipped.attrs = Rc::new(vec![mk_attr(&sp(), AUTOCONTRACTS, vec![mk_bool(&sp(), false)])]);
        let mut ctor = Method::new(&sp(), &fun_path("_ctor"), MethodKind::Constructor, vec![], vec![]);
        ctor.modifies = vec![mk_frame(&this(), None)];
        let class = autocontracts_class(
            "C",
            vec![Member::Method(get), Member::Method(lemma), Member::Method(skipped), Member::Method(ctor)],
        );
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        let mut program = Program::new("p", vec![module]);
        let diags = run_on(&mut program);
        let get = member_to_string(member_named(&program, 0, "Get"));
        assert!(get.contains("requires Valid()") && !get.contains("modifies"), "{}", get);
        let lemma = member_to_string(member_named(&program, 0, "L"));
        assert!(lemma.contains("requires Valid()") && !lemma.contains("ensures"), "{}", lemma);
        let raw = member_to_string(member_named(&program, 0, "Raw"));
        assert!(!raw.contains("Valid"), "{}", raw);
        match member_named(&program, 0, "_ctor") {
            Member::Method(m) => assert!(m.modifies.is_empty()),
            _ => panic!("expected the constructor"),
        }
        assert_eq!(
            diags.notes_at(MessageLevel::Warning),
            vec!["constructors no longer need 'this' to be listed in modifies clauses"]
        );
    }
}
