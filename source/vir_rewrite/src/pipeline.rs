//! The resolution driver: fires the rewriters at the eight checkpoints, module by module in
//! import order, around the (pluggable) bare resolution steps.

use crate::ast::*;
use crate::ast_util::{auto_span, mk_var, params_vars};
use crate::ast_visitor::{map_member_exprs, map_member_stmts, map_iterator_exprs};
use crate::attributes::{check_attributes, AttrTarget};
use crate::call_graph::{build_call_graph, module_order};
use crate::config::RewriteOptions;
use crate::context::GlobalCtx;
use crate::messages::{error_bare, Diagnostics, Reporter};
use crate::modes::check_module_compilable;
use crate::rewriter::{default_rewriters, run_module_hook, Checkpoint, PluginAdapter, PluginRewriter, Rewriter};
use std::rc::Rc;

/// Name and type resolution proper.
/// The trees handed to the pipeline are usually resolved already, in which case every step is
/// a no-op; a resolver that does work reports problems through the reporter.
pub trait ModuleResolver {
    fn resolve_names_and_types(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    /// Clone the module for compilation and re-resolve the clone
    fn compile_clone_and_resolve(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn resolve_decreases(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }
}

/// For trees that arrive fully resolved
pub struct PreResolvedTrees;

impl ModuleResolver for PreResolvedTrees {}

pub struct Pipeline {
    options: RewriteOptions,
    rewriters: Vec<Box<dyn Rewriter>>,
    resolver: Box<dyn ModuleResolver>,
}

fn check_stmt_attrs(stmt: &Stmt, reporter: &mut Reporter) -> Result<Stmt, VirErr> {
    match &stmt.x {
        StmtX::Forall { vars, range, ensures, body, attrs, forall_exprs } => Ok(stmt.new_x(StmtX::Forall {
            vars: vars.clone(),
            range: range.clone(),
            ensures: ensures.clone(),
            body: body.clone(),
            attrs: check_attributes(attrs, AttrTarget::Quantifier, reporter),
            forall_exprs: forall_exprs.clone(),
        })),
        _ => Ok(stmt.clone()),
    }
}

fn check_expr_attrs(expr: &Expr, reporter: &mut Reporter) -> Result<Expr, VirErr> {
    match &expr.x {
        ExprX::Quant { quant, vars, range, body, attrs } if !attrs.is_empty() => {
            Ok(expr.new_x(ExprX::Quant {
                quant: *quant,
                vars: vars.clone(),
                range: range.clone(),
                body: body.clone(),
                attrs: check_attributes(attrs, AttrTarget::Quantifier, reporter),
            }))
        }
        _ => Ok(expr.clone()),
    }
}

/// Validate every attribute in the module once, dropping malformed ones
fn check_module_attributes(module: &mut Module, reporter: &mut Reporter) -> Result<(), VirErr> {
    module.attrs = check_attributes(&module.attrs, AttrTarget::Decl, reporter);
    for decl in module.decls.iter_mut() {
        match decl {
            TopLevelDecl::Class(d) => d.attrs = check_attributes(&d.attrs, AttrTarget::Decl, reporter),
            TopLevelDecl::Datatype(d) => d.attrs = check_attributes(&d.attrs, AttrTarget::Decl, reporter),
            TopLevelDecl::Newtype(d) => d.attrs = check_attributes(&d.attrs, AttrTarget::Decl, reporter),
            TopLevelDecl::TypeSynonym(d) => d.attrs = check_attributes(&d.attrs, AttrTarget::Decl, reporter),
            TopLevelDecl::Iterator(it) => {
                it.attrs = check_attributes(&it.attrs, AttrTarget::Member, reporter);
                map_iterator_exprs(it, &mut |e: &Expr| check_expr_attrs(e, reporter))?;
            }
        }
        if let Some(members) = decl.members_mut() {
            for member in members.iter_mut() {
                let attrs = check_attributes(member.attrs(), AttrTarget::Member, reporter);
                *member.attrs_mut() = attrs;
                map_member_exprs(member, &mut |e: &Expr| check_expr_attrs(e, reporter))?;
                map_member_stmts(member, &mut |s: &Stmt| check_stmt_attrs(s, reporter))?;
            }
        }
    }
    Ok(())
}

fn default_decreases(span: &Span, params: &Params) -> Vec<Expr> {
    params_vars(params)
        .iter()
        .filter(|x| !crate::ast_util::is_reference_typ(&x.typ))
        .map(|x| mk_var(&auto_span(span), x))
        .collect()
}

/// Recursive callables without a decreases clause get the default one: their non-reference
/// parameters, in order
fn fill_default_decreases(module: &mut Module, reporter: &mut Reporter) {
    for decl in module.decls.iter_mut() {
        if let Some(members) = decl.members_mut() {
            for member in members.iter_mut() {
                let (span, decreases) = match member {
                    Member::Function(f) if f.is_recursive && f.decreases.is_empty() => {
                        f.decreases = default_decreases(&f.span, &f.params);
                        (f.span.clone(), f.decreases.clone())
                    }
                    Member::Method(m) if m.is_recursive && m.decreases.is_empty() => {
                        m.decreases = default_decreases(&m.span, &m.ins);
                        (m.span.clone(), m.decreases.clone())
                    }
                    _ => continue,
                };
                if !decreases.is_empty() {
                    let shown: Vec<String> = decreases.iter().map(|e| e.to_string()).collect();
                    reporter.info(&span, format!("decreases {}", shown.join(", ")));
                }
            }
        }
    }
}

impl Pipeline {
    pub fn new(options: RewriteOptions) -> Self {
        let rewriters = default_rewriters(&options);
        Pipeline { options, rewriters, resolver: Box::new(PreResolvedTrees) }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ModuleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Plugins run after the built-in passes
    pub fn register_plugin<P: PluginRewriter + 'static>(&mut self, plugin: P) {
        self.rewriters.push(Box::new(PluginAdapter::new(plugin)));
    }

    pub fn options(&self) -> &RewriteOptions {
        &self.options
    }

    fn run_program_hooks(
        &mut self,
        checkpoint: Checkpoint,
        program: &mut Program,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        for rewriter in self.rewriters.iter_mut() {
            tracing::debug!(pass = rewriter.name(), checkpoint = checkpoint.name(), "running rewriter");
            reporter.with_source(rewriter.name(), |r| match checkpoint {
                Checkpoint::PreResolveProgram => rewriter.pre_resolve_program(program, r),
                Checkpoint::PostResolveProgram => rewriter.post_resolve_program(program, r),
                _ => Ok(()),
            })?;
        }
        Ok(())
    }

    fn run_module_hooks(
        &mut self,
        checkpoint: Checkpoint,
        program: &mut Program,
        index: usize,
        options: &Rc<RewriteOptions>,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        for rewriter in self.rewriters.iter_mut() {
            let ctx = GlobalCtx::new(program, options);
            let module = &mut program.modules[index];
            tracing::debug!(
                pass = rewriter.name(),
                checkpoint = checkpoint.name(),
                module = %module.name,
                "running rewriter"
            );
            reporter.with_source(rewriter.name(), |r| {
                run_module_hook(rewriter.as_mut(), checkpoint, module, &ctx, r)
            })?;
        }
        Ok(())
    }

    /// Resolve `program` in place, reporting user-facing problems to `diagnostics`.
    /// Returns Err only for internal errors, which abort the run.
    pub fn resolve_program(&mut self, program: &mut Program, diagnostics: &mut dyn Diagnostics) -> Result<(), VirErr> {
        let mut reporter = Reporter::new(diagnostics, "resolver").with_hover_text(self.options.report_hover_text);
        self.options.validate(&mut reporter);
        let options = Rc::new(self.options.clone());

        for module in program.modules.iter_mut() {
            check_module_attributes(module, &mut reporter)?;
        }
        self.run_program_hooks(Checkpoint::PreResolveProgram, program, &mut reporter)?;

        let order = module_order(program, &mut reporter);
        for index in order {
            let name = program.modules[index].name.clone();
            tracing::debug!(module = %name, "resolving module");
            self.run_module_hooks(Checkpoint::PreResolveModule, program, index, &options, &mut reporter)?;

            let errors_before = reporter.error_count();
            let ctx = GlobalCtx::new(program, &options);
            self.resolver.resolve_names_and_types(&mut program.modules[index], &ctx, &mut reporter)?;
            if reporter.error_count() > errors_before {
                tracing::debug!(module = %name, "resolution failed; skipping later checkpoints");
                continue;
            }
            self.run_module_hooks(Checkpoint::PostResolveIntermediate, program, index, &options, &mut reporter)?;

            let ctx = GlobalCtx::new(program, &options);
            self.resolver.compile_clone_and_resolve(&mut program.modules[index], &ctx, &mut reporter)?;
            self.run_module_hooks(Checkpoint::PostCompileCloneAndResolve, program, index, &options, &mut reporter)?;

            let graph = build_call_graph(&mut program.modules[index]);
            tracing::trace!(module = %name, order = ?graph.sort_sccs(), "call graph SCCs");
            self.run_module_hooks(Checkpoint::PostCyclicityResolve, program, index, &options, &mut reporter)?;

            let ctx = GlobalCtx::new(program, &options);
            self.resolver.resolve_decreases(&mut program.modules[index], &ctx, &mut reporter)?;
            fill_default_decreases(&mut program.modules[index], &mut reporter);
            self.run_module_hooks(Checkpoint::PostDecreasesResolve, program, index, &options, &mut reporter)?;

            let ctx = GlobalCtx::new(program, &options);
            reporter.with_source("compilability", |r| check_module_compilable(&program.modules[index], &ctx, r))?;
            self.run_module_hooks(Checkpoint::PostResolveModule, program, index, &options, &mut reporter)?;
        }

        self.run_program_hooks(Checkpoint::PostResolveProgram, program, &mut reporter)?;

        if let Some(path) = &self.options.log_ast {
            let written = std::fs::File::create(path)
                .and_then(|mut file| crate::printer::write_program(&mut file, program));
            if let Err(err) = written {
                reporter.report(error_bare(format!("could not write {}: {}", path, err)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::test_util::*;
    use std::cell::RefCell;

    struct Recorder {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Rewriter for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn pre_resolve_module(&mut self, m: &mut Module, _: &GlobalCtx, _: &mut Reporter) -> Result<(), VirErr> {
            self.log.borrow_mut().push(format!("pre {}", m.name));
            Ok(())
        }
        fn post_cyclicity_resolve(&mut self, m: &mut Module, _: &GlobalCtx, _: &mut Reporter) -> Result<(), VirErr> {
            assert!(m.call_graph.is_some());
            self.log.borrow_mut().push(format!("cyclicity {}", m.name));
            Ok(())
        }
        fn post_resolve_program(&mut self, _: &mut Program, _: &mut Reporter) -> Result<(), VirErr> {
            self.log.borrow_mut().push("program".to_string());
            Ok(())
        }
    }

    struct FailingResolver;

    impl ModuleResolver for FailingResolver {
        fn resolve_names_and_types(&mut self, m: &mut Module, _: &GlobalCtx, r: &mut Reporter) -> Result<(), VirErr> {
            if m.name.as_str() == "Bad" {
                r.error(&m.span, "unresolved identifier");
            }
            Ok(())
        }
    }

    #[test]
    fn modules_run_in_import_order_and_failed_modules_stop_early() {
        let log = Rc::new(RefCell::new(vec![]));
        let mut pipeline = Pipeline::new(RewriteOptions::default()).with_resolver(Box::new(FailingResolver));
        pipeline.rewriters = vec![Box::new(Recorder { log: log.clone() })];
        let mut a = Module::new(&sp(), "A");
        a.imports = vec![str_ident("B")];
        let b = Module::new(&sp(), "B");
        let bad = Module::new(&sp(), "Bad");
        let mut program = Program::new("p", vec![a, b, bad]);
        let mut diags = CollectedDiagnostics::new();
        pipeline.resolve_program(&mut program, &mut diags).unwrap();
        let log = log.borrow();
        let pos = |s: &str| log.iter().position(|l| l == s).unwrap();
        assert!(pos("cyclicity B") < pos("pre A"));
        assert!(log.contains(&"pre Bad".to_string()));
        assert!(!log.contains(&"cyclicity Bad".to_string()));
        assert_eq!(log.last().map(|s| s.as_str()), Some("program"));
        assert_eq!(diags.count(MessageLevel::Error), 1);
    }

    #[test]
    fn recursive_functions_get_default_decreases() {
        let n = var_decl("n", &nat_typ());
        let c = var_decl("c", &class("C"));
        let path = fun_path("Sum");
        let mut f = Function::new(&sp(), &path, FunctionKind::Function, vec![n.clone(), c.clone()], &int_typ());
        f.body = Some(call_path(&path, vec![var(&n), var(&c)], &int_typ()));
        let mut class_decl = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class_decl.members.push(Member::Function(f));
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class_decl));
        let mut program = Program::new("p", vec![module]);
        let mut diags = CollectedDiagnostics::new();
        Pipeline::new(RewriteOptions::default()).resolve_program(&mut program, &mut diags).unwrap();
        match &program.modules[0].decls[0].members()[0] {
            Member::Function(f) => {
                assert!(f.is_recursive);
                let shown: Vec<String> = f.decreases.iter().map(|e| e.to_string()).collect();
                assert_eq!(shown, vec!["n"]);
            }
            _ => panic!("expected a function"),
        }
        assert!(diags.notes_at(MessageLevel::Info).contains(&"decreases n"));
    }

    #[test]
    fn malformed_attributes_are_dropped_before_passes_run() {
        let mut f = Function::new(&sp(), &fun_path("F"), FunctionKind::Function, vec![], &int_typ());
        f.attrs = Rc::new(vec![mk_attr(&sp(), "timeLimitMultiplier", vec![mk_bool(&sp(), true)])]);
        f.body = Some(int(1));
        let mut class_decl = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class_decl.members.push(Member::Function(f));
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class_decl));
        let mut program = Program::new("p", vec![module]);
        let mut diags = CollectedDiagnostics::new();
        Pipeline::new(RewriteOptions::default()).resolve_program(&mut program, &mut diags).unwrap();
        assert!(program.modules[0].decls[0].members()[0].attrs().is_empty());
        assert_eq!(diags.count(MessageLevel::Warning), 1);
    }
}
