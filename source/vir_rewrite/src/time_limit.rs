use crate::ast::*;
use crate::ast_util::{auto_span, mk_attr, mk_int};
use crate::attributes::{
    find_attr, parse_attr, with_attr_prepended, without_attrs, Attr, RLIMIT, RLIMIT_INTERNAL, TIME_LIMIT,
    TIME_LIMIT_MULTIPLIER,
};
use crate::config::RewriteOptions;
use crate::context::GlobalCtx;
use crate::messages::Reporter;
use crate::rewriter::Rewriter;
use num_bigint::BigInt;

/// Turns `{:timeLimitMultiplier X}` into a concrete time or resource limit
pub struct TimeLimitMultiplier {
    attr_name: &'static str,
    base: u32,
}

impl TimeLimitMultiplier {
    pub fn new(options: &RewriteOptions) -> Self {
        let (attr_name, base) = options.time_limit_base();
        TimeLimitMultiplier { attr_name, base }
    }

    fn rewrite_attrs(&self, attrs: &Attributes, reporter: &mut Reporter) -> Option<Attributes> {
        let multiplier_attr = find_attr(attrs, TIME_LIMIT_MULTIPLIER)?;
        let multiplier = match parse_attr(multiplier_attr) {
            Ok(Attr::TimeLimitMultiplier(m)) => m,
            _ => return None,
        };
        let span = multiplier_attr.span.clone();
        for competing in [TIME_LIMIT, RLIMIT] {
            if find_attr(attrs, competing).is_some() {
                reporter.warning(&span, format!("timeLimitMultiplier annotation overrides {} annotation", competing));
            }
        }
        let value = multiplier * BigInt::from(self.base);
        let limit = mk_attr(&auto_span(&span), self.attr_name, vec![mk_int(&auto_span(&span), value)]);
        let rest = without_attrs(attrs, |a| {
            matches!(a.x.name.as_str(), TIME_LIMIT_MULTIPLIER | TIME_LIMIT | RLIMIT | RLIMIT_INTERNAL)
        });
        Some(with_attr_prepended(&rest, limit))
    }
}

impl Rewriter for TimeLimitMultiplier {
    fn name(&self) -> &'static str {
        "time-limit"
    }

    fn pre_resolve_module(&mut self, module: &mut Module, _ctx: &GlobalCtx, reporter: &mut Reporter) -> Result<(), VirErr> {
        for decl in module.decls.iter_mut() {
            if let Some(members) = decl.members_mut() {
                for member in members.iter_mut() {
                    if let Member::Field(_) = member {
                        continue;
                    }
                    if let Some(attrs) = self.rewrite_attrs(member.attrs(), reporter) {
                        *member.attrs_mut() = attrs;
                    }
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
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::printer::attrs_to_string;
    use crate::test_util::*;
    use std::rc::Rc;

    fn run(options: &RewriteOptions, attrs: Vec<Attribute>) -> (String, Vec<String>) {
        let mut m = Method::new(&sp(), &fun_path("Slow"), MethodKind::Method, vec![], vec![]);
        m.attrs = Rc::new(attrs);
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "C"]));
        class.members.push(Member::Method(m));
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        let program = Program::new("p", vec![]);
        let ctx = GlobalCtx::new(&program, &Rc::new(options.clone()));
        let mut diags = CollectedDiagnostics::new();
        let mut pass = TimeLimitMultiplier::new(options);
        pass.pre_resolve_module(&mut module, &ctx, &mut Reporter::new(&mut diags, "time-limit")).unwrap();
        let attrs = attrs_to_string(module.decls[0].members()[0].attrs());
        (attrs, diags.notes_at(MessageLevel::Warning).iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn multiplies_the_configured_limit() {
        let options = RewriteOptions { time_limit: 20, ..Default::default() };
        let (attrs, warnings) = run(&options, vec![mk_attr(&sp(), TIME_LIMIT_MULTIPLIER, vec![int(3)])]);
        assert_eq!(attrs, "{:timeLimit 60}");
        assert!(warnings.is_empty());

        let (attrs, _) = run(&RewriteOptions::default(), vec![mk_attr(&sp(), TIME_LIMIT_MULTIPLIER, vec![int(2)])]);
        assert_eq!(attrs, "{:timeLimit 20}");

        let options = RewriteOptions { resource_limit: 1000, ..Default::default() };
        let (attrs, _) = run(&options, vec![mk_attr(&sp(), TIME_LIMIT_MULTIPLIER, vec![int(2)])]);
        assert_eq!(attrs, "{:_rlimit 2000}");
    }

    #[test]
    fn explicit_limit_is_overridden_with_a_warning() {
        let (attrs, warnings) = run(
            &RewriteOptions::default(),
            vec![mk_attr(&sp(), TIME_LIMIT, vec![int(5)]), mk_attr(&sp(), TIME_LIMIT_MULTIPLIER, vec![int(4)])],
        );
        assert_eq!(attrs, "{:timeLimit 40}");
        assert_eq!(warnings, vec!["timeLimitMultiplier annotation overrides timeLimit annotation"]);

        let options = RewriteOptions { resource_limit: 1000, ..Default::default() };
        let (attrs, warnings) = run(
            &options,
            vec![
                mk_attr(&sp(), TIME_LIMIT_MULTIPLIER, vec![int(2)]),
                mk_attr(&sp(), "opaque", vec![]),
                mk_attr(&sp(), RLIMIT, vec![int(7)]),
            ],
        );
        assert_eq!(attrs, "{:_rlimit 2000} {:opaque}");
        assert_eq!(warnings, vec!["timeLimitMultiplier annotation overrides rlimit annotation"]);
    }

    #[test]
    fn members_without_the_attribute_are_untouched() {
        let (attrs, warnings) = run(&RewriteOptions::default(), vec![mk_attr(&sp(), TIME_LIMIT, vec![int(5)])]);
        assert_eq!(attrs, "{:timeLimit 5}");
        assert!(warnings.is_empty());
    }
}
