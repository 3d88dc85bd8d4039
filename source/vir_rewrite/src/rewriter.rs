//! Rewriter framework: passes that hook into the eight checkpoints of resolution.

use crate::ast::{Module, Program, VirErr};
use crate::config::RewriteOptions;
use crate::context::GlobalCtx;
use crate::messages::Reporter;

/// The points in resolution at which rewriters run, in the order they fire
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Checkpoint {
    PreResolveProgram,
    PreResolveModule,
    PostResolveIntermediate,
    PostCompileCloneAndResolve,
    PostCyclicityResolve,
    PostDecreasesResolve,
    PostResolveModule,
    PostResolveProgram,
}

impl Checkpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Checkpoint::PreResolveProgram => "PreResolve(program)",
            Checkpoint::PreResolveModule => "PreResolve(module)",
            Checkpoint::PostResolveIntermediate => "PostResolveIntermediate",
            Checkpoint::PostCompileCloneAndResolve => "PostCompileCloneAndResolve",
            Checkpoint::PostCyclicityResolve => "PostCyclicityResolve",
            Checkpoint::PostDecreasesResolve => "PostDecreasesResolve",
            Checkpoint::PostResolveModule => "PostResolve(module)",
            Checkpoint::PostResolveProgram => "PostResolve(program)",
        }
    }

    pub fn is_module_level(&self) -> bool {
        !matches!(self, Checkpoint::PreResolveProgram | Checkpoint::PostResolveProgram)
    }
}

/// A pass over the tree.
/// Every hook is optional; a pass overrides the checkpoints it cares about.
/// Module-level hooks see a `GlobalCtx` snapshot of the whole program taken just before the
/// hook runs, so later passes see the declarations earlier passes added.
/// Errors returned from a hook are internal errors and abort the run; user-facing problems
/// go through the reporter.
pub trait Rewriter {
    /// Tag attached to every diagnostic the pass reports
    fn name(&self) -> &'static str;

    fn pre_resolve_program(&mut self, _program: &mut Program, _reporter: &mut Reporter) -> Result<(), VirErr> {
        Ok(())
    }

    fn pre_resolve_module(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_resolve_intermediate(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_compile_clone_and_resolve(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_cyclicity_resolve(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_decreases_resolve(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_resolve_module(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_resolve_program(&mut self, _program: &mut Program, _reporter: &mut Reporter) -> Result<(), VirErr> {
        Ok(())
    }
}

/// Fire the module-level hook for `checkpoint`
pub fn run_module_hook(
    rewriter: &mut dyn Rewriter,
    checkpoint: Checkpoint,
    module: &mut Module,
    ctx: &GlobalCtx,
    reporter: &mut Reporter,
) -> Result<(), VirErr> {
    match checkpoint {
        Checkpoint::PreResolveModule => rewriter.pre_resolve_module(module, ctx, reporter),
        Checkpoint::PostResolveIntermediate => rewriter.post_resolve_intermediate(module, ctx, reporter),
        Checkpoint::PostCompileCloneAndResolve => rewriter.post_compile_clone_and_resolve(module, ctx, reporter),
        Checkpoint::PostCyclicityResolve => rewriter.post_cyclicity_resolve(module, ctx, reporter),
        Checkpoint::PostDecreasesResolve => rewriter.post_decreases_resolve(module, ctx, reporter),
        Checkpoint::PostResolveModule => rewriter.post_resolve_module(module, ctx, reporter),
        Checkpoint::PreResolveProgram | Checkpoint::PostResolveProgram => Ok(()),
    }
}

/// Third-party passes may only observe the end of resolution
pub trait PluginRewriter {
    fn name(&self) -> &'static str;

    fn post_resolve_module(
        &mut self,
        _module: &mut Module,
        _ctx: &GlobalCtx,
        _reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        Ok(())
    }

    fn post_resolve_program(&mut self, _program: &mut Program, _reporter: &mut Reporter) -> Result<(), VirErr> {
        Ok(())
    }
}

pub struct PluginAdapter<P: PluginRewriter> {
    plugin: P,
}

impl<P: PluginRewriter> PluginAdapter<P> {
    pub fn new(plugin: P) -> Self {
        PluginAdapter { plugin }
    }
}

impl<P: PluginRewriter> Rewriter for PluginAdapter<P> {
    fn name(&self) -> &'static str {
        self.plugin.name()
    }

    fn post_resolve_module(
        &mut self,
        module: &mut Module,
        ctx: &GlobalCtx,
        reporter: &mut Reporter,
    ) -> Result<(), VirErr> {
        self.plugin.post_resolve_module(module, ctx, reporter)
    }

    fn post_resolve_program(&mut self, program: &mut Program, reporter: &mut Reporter) -> Result<(), VirErr> {
        self.plugin.post_resolve_program(program, reporter)
    }
}

/// The built-in passes, in the order they run at each checkpoint
pub fn default_rewriters(options: &RewriteOptions) -> Vec<Box<dyn Rewriter>> {
    let mut rewriters: Vec<Box<dyn Rewriter>> = vec![
        Box::new(crate::autocontracts::AutoContracts::new()),
        Box::new(crate::opaque::OpaqueRevealLemmas::new()),
        Box::new(crate::time_limit::TimeLimitMultiplier::new(options)),
        Box::new(crate::forall_stmt::ForallStmtRewriter::new()),
    ];
    if options.auto_triggers {
        rewriters.push(Box::new(crate::quantifier_split::QuantifierSplitter::new()));
    }
    if options.auto_req {
        rewriters.push(Box::new(crate::auto_req::AutoReq::new()));
    }
    if options.auto_triggers {
        rewriters.push(Box::new(crate::triggers_auto::TriggerGenerator::new()));
    }
    rewriters.push(Box::new(crate::induction::InductionRewriter::new(options)));
    rewriters
}
