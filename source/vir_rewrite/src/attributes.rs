//! Typed view of the `{:name args}` attributes the rewriters consume.
//!
//! Every recognized attribute has an entry in `ATTR_SCHEMAS`; `check_attributes` validates a
//! declaration's attributes against it once, up front, so that passes can use the typed
//! accessors below without re-validating argument shapes.

use crate::ast::*;
use crate::ast_util::const_int;
#[cfg(test)]
use crate::ast_util::mk_attr;
use crate::messages::Reporter;
use crate::tokens::is_auto_generated;
use num_bigint::BigInt;
use std::rc::Rc;

pub const OPAQUE: &str = "opaque";
pub const AUTOCONTRACTS: &str = "autocontracts";
pub const INDUCTION: &str = "induction";
/// induction variables chosen by the induction pass
pub const INDUCTION_INFERRED: &str = "_induction";
pub const TIME_LIMIT_MULTIPLIER: &str = "timeLimitMultiplier";
pub const TIME_LIMIT: &str = "timeLimit";
pub const RLIMIT: &str = "rlimit";
pub const RLIMIT_INTERNAL: &str = "_rlimit";
pub const AUTO_REQ: &str = "autoReq";
pub const AUTO_REQUIRES: &str = "_autorequires";
pub const FUEL: &str = "fuel";
pub const TRIGGER: &str = "trigger";
pub const AUTO_TRIGGERS: &str = "autotriggers";
pub const SPLIT: &str = "split";
pub const AUTO_GENERATED: &str = "auto_generated";
pub const OPAQUE_REVEAL: &str = "opaque_reveal";
pub const VERIFY: &str = "verify";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgKind {
    /// `true` or `false`
    Bool,
    /// integer literal
    Int,
    /// any expression
    Expr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrTarget {
    Decl,
    Member,
    Quantifier,
    /// members and quantifiers
    Any,
}

pub struct AttrSchema {
    pub name: &'static str,
    pub min_args: usize,
    /// None for unbounded
    pub max_args: Option<usize>,
    /// kind of every argument
    pub arg_kind: ArgKind,
    pub target: AttrTarget,
    /// written only by rewriters
    pub internal: bool,
}

const fn schema(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    arg_kind: ArgKind,
    target: AttrTarget,
    internal: bool,
) -> AttrSchema {
    AttrSchema { name, min_args, max_args, arg_kind, target, internal }
}

pub const ATTR_SCHEMAS: &[AttrSchema] = &[
    schema(OPAQUE, 0, Some(0), ArgKind::Expr, AttrTarget::Member, false),
    schema(AUTOCONTRACTS, 0, Some(1), ArgKind::Bool, AttrTarget::Any, false),
    schema(INDUCTION, 0, None, ArgKind::Expr, AttrTarget::Any, false),
    schema(INDUCTION_INFERRED, 0, None, ArgKind::Expr, AttrTarget::Any, true),
    schema(TIME_LIMIT_MULTIPLIER, 1, Some(1), ArgKind::Int, AttrTarget::Member, false),
    schema(TIME_LIMIT, 1, Some(1), ArgKind::Int, AttrTarget::Member, false),
    schema(RLIMIT, 1, Some(1), ArgKind::Int, AttrTarget::Member, false),
    schema(RLIMIT_INTERNAL, 1, Some(1), ArgKind::Int, AttrTarget::Member, true),
    schema(AUTO_REQ, 0, Some(1), ArgKind::Bool, AttrTarget::Member, false),
    schema(AUTO_REQUIRES, 0, Some(0), ArgKind::Expr, AttrTarget::Any, false),
    schema(FUEL, 1, Some(3), ArgKind::Expr, AttrTarget::Member, false),
    schema(TRIGGER, 1, None, ArgKind::Expr, AttrTarget::Quantifier, false),
    schema(AUTO_TRIGGERS, 0, Some(1), ArgKind::Bool, AttrTarget::Quantifier, false),
    schema(SPLIT, 0, Some(1), ArgKind::Bool, AttrTarget::Quantifier, false),
    schema(AUTO_GENERATED, 0, Some(0), ArgKind::Expr, AttrTarget::Member, true),
    schema(OPAQUE_REVEAL, 0, Some(0), ArgKind::Expr, AttrTarget::Member, true),
    schema(VERIFY, 0, Some(1), ArgKind::Bool, AttrTarget::Member, false),
];

pub fn lookup_schema(name: &str) -> Option<&'static AttrSchema> {
    ATTR_SCHEMAS.iter().find(|s| s.name == name)
}

/// The `{:induction ...}` argument forms
#[derive(Debug, Clone)]
pub enum InductionArgs {
    /// `{:induction}`, `{:induction true}`
    All,
    /// `{:induction false}`
    Off,
    Vars(Exprs),
}

/// Typed form of a recognized attribute
#[derive(Debug, Clone)]
pub enum Attr {
    Opaque,
    AutoContracts(bool),
    Induction(InductionArgs),
    InductionInferred(Exprs),
    TimeLimitMultiplier(BigInt),
    TimeLimit(BigInt),
    Rlimit(BigInt),
    AutoReq(bool),
    AutoRequires,
    Fuel(Exprs),
    Trigger(Exprs),
    AutoTriggers(bool),
    Split(bool),
    AutoGenerated,
    OpaqueReveal,
    Verify(bool),
    /// not one the rewriters care about
    Other(Ident),
}

fn const_bool(e: &Expr) -> Option<bool> {
    match &e.x {
        ExprX::Const(Constant::Bool(b)) => Some(*b),
        _ => None,
    }
}

fn bool_arg(attr: &Attribute) -> Result<bool, String> {
    match attr.x.args.first() {
        None => Ok(true),
        Some(e) => const_bool(e)
            .ok_or_else(|| format!("{{:{}}} expects a boolean literal argument", attr.x.name)),
    }
}

fn int_arg(attr: &Attribute) -> Result<BigInt, String> {
    match attr.x.args.first().and_then(const_int) {
        Some(i) => Ok(i.clone()),
        None => Err(format!("{{:{}}} expects an integer literal argument", attr.x.name)),
    }
}

/// Check arity and argument kinds, then produce the typed form
pub fn parse_attr(attr: &Attribute) -> Result<Attr, String> {
    let name = attr.x.name.as_str();
    let args = &attr.x.args;
    let schema = match lookup_schema(name) {
        None => return Ok(Attr::Other(attr.x.name.clone())),
        Some(schema) => schema,
    };
    if args.len() < schema.min_args || schema.max_args.map_or(false, |m| args.len() > m) {
        let expected = match schema.max_args {
            Some(m) if m == schema.min_args => format!("{}", m),
            Some(m) => format!("{} to {}", schema.min_args, m),
            None => format!("at least {}", schema.min_args),
        };
        return Err(format!(
            "{{:{}}} expects {} argument(s), but got {}",
            name,
            expected,
            args.len()
        ));
    }
    let kinds_ok = match schema.arg_kind {
        ArgKind::Bool => args.iter().all(|a| const_bool(a).is_some()),
        ArgKind::Int => args.iter().all(|a| const_int(a).is_some()),
        ArgKind::Expr => true,
    };
    if !kinds_ok {
        let kind = if schema.arg_kind == ArgKind::Bool { "boolean" } else { "integer" };
        return Err(format!("{{:{}}} expects {} literal arguments", name, kind));
    }
    Ok(match name {
        OPAQUE => Attr::Opaque,
        AUTOCONTRACTS => Attr::AutoContracts(bool_arg(attr)?),
        INDUCTION => {
            let flag = if args.len() == 1 { const_bool(&args[0]) } else { None };
            match (args.len(), flag) {
                (0, _) | (_, Some(true)) => Attr::Induction(InductionArgs::All),
                (_, Some(false)) => Attr::Induction(InductionArgs::Off),
                _ => Attr::Induction(InductionArgs::Vars(args.clone())),
            }
        }
        INDUCTION_INFERRED => Attr::InductionInferred(args.clone()),
        TIME_LIMIT_MULTIPLIER => Attr::TimeLimitMultiplier(int_arg(attr)?),
        TIME_LIMIT => Attr::TimeLimit(int_arg(attr)?),
        RLIMIT | RLIMIT_INTERNAL => Attr::Rlimit(int_arg(attr)?),
        AUTO_REQ => Attr::AutoReq(bool_arg(attr)?),
        AUTO_REQUIRES => Attr::AutoRequires,
        FUEL => Attr::Fuel(args.clone()),
        TRIGGER => Attr::Trigger(args.clone()),
        AUTO_TRIGGERS => Attr::AutoTriggers(bool_arg(attr)?),
        SPLIT => Attr::Split(bool_arg(attr)?),
        AUTO_GENERATED => Attr::AutoGenerated,
        OPAQUE_REVEAL => Attr::OpaqueReveal,
        VERIFY => Attr::Verify(bool_arg(attr)?),
        _ => Attr::Other(attr.x.name.clone()),
    })
}

/// Warn about every malformed recognized attribute; returns the attributes that passed.
/// Malformed attributes are dropped so that no pass ever sees them.
pub fn check_attributes(attrs: &Attributes, target: AttrTarget, reporter: &mut Reporter) -> Attributes {
    let mut kept = Vec::with_capacity(attrs.len());
    for attr in attrs.iter() {
        if is_auto_generated(&attr.span) {
            kept.push(attr.clone());
            continue;
        }
        if let Some(schema) = lookup_schema(&attr.x.name) {
            if schema.internal {
                reporter.warning(
                    &attr.span,
                    format!("{{:{}}} is reserved for generated code; ignoring attribute", attr.x.name),
                );
                continue;
            }
            let target_ok = schema.target == AttrTarget::Any
                || target == AttrTarget::Any
                || schema.target == target;
            if !target_ok {
                reporter.warning(
                    &attr.span,
                    format!("{{:{}}} has no effect here; ignoring attribute", attr.x.name),
                );
                continue;
            }
        }
        match parse_attr(attr) {
            Ok(_) => kept.push(attr.clone()),
            Err(msg) => reporter.warning(&attr.span, format!("{}; ignoring attribute", msg)),
        }
    }
    Rc::new(kept)
}

pub fn find_attr<'a>(attrs: &'a Attributes, name: &str) -> Option<&'a Attribute> {
    attrs.iter().find(|a| a.x.name.as_str() == name)
}

pub fn has_attr(attrs: &Attributes, name: &str) -> bool {
    find_attr(attrs, name).is_some()
}

/// `{:name}` and `{:name true}` give Some(true), `{:name false}` gives Some(false)
pub fn bool_attr(attrs: &Attributes, name: &str) -> Option<bool> {
    find_attr(attrs, name).map(|a| bool_arg(a).unwrap_or(true))
}

pub fn typed_attrs(attrs: &Attributes) -> Vec<Attr> {
    attrs.iter().filter_map(|a| parse_attr(a).ok()).collect()
}

pub fn is_opaque(attrs: &Attributes) -> bool {
    typed_attrs(attrs).iter().any(|a| matches!(a, Attr::Opaque))
}

pub fn induction_args(attrs: &Attributes) -> Option<InductionArgs> {
    typed_attrs(attrs).into_iter().find_map(|a| match a {
        Attr::Induction(args) => Some(args),
        _ => None,
    })
}

/// Does the quantifier carry user triggers (or ask for none)?
pub fn has_user_triggers(attrs: &Attributes) -> bool {
    attrs.iter().any(|a| a.x.name.as_str() == TRIGGER && !is_auto_generated(&a.span))
        || bool_attr(attrs, AUTO_TRIGGERS) == Some(false)
}

pub fn with_attr_prepended(attrs: &Attributes, attr: Attribute) -> Attributes {
    let mut v = Vec::with_capacity(attrs.len() + 1);
    v.push(attr);
    v.extend(attrs.iter().cloned());
    Rc::new(v)
}

pub fn with_attr_appended(attrs: &Attributes, attr: Attribute) -> Attributes {
    let mut v: Vec<Attribute> = (**attrs).clone();
    v.push(attr);
    Rc::new(v)
}

pub fn without_attrs(attrs: &Attributes, mut remove: impl FnMut(&Attribute) -> bool) -> Attributes {
    Rc::new(attrs.iter().filter(|a| !remove(a)).cloned().collect())
}
