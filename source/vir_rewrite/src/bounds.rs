//! Discovery of finite enumeration strategies ("bounds") for bound variables.
//!
//! Compiled quantifiers, comprehensions, and let-such-that expressions need a way to enumerate
//! candidate values of each bound variable.
//! Bounds are read off the conjuncts of the range (or constraint).

use crate::ast::*;
use crate::ast_util::{conjuncts, mk_binary, mk_int};
use crate::free_vars::contains_free_var_in;

#[derive(Debug, Clone)]
pub enum BoundedPool {
    /// `false, true`
    Bool,
    Char,
    /// `lo <= x < hi`; either end may be missing, in which case the pool is infinite
    IntRange { lo: Option<Expr>, hi: Option<Expr> },
    /// `x == e`
    Exact(Expr),
    SetMembership(Expr),
    MultisetMembership(Expr),
    SeqMembership(Expr),
    MapDomain(Expr),
}

impl BoundedPool {
    pub fn is_finite(&self) -> bool {
        match self {
            BoundedPool::IntRange { lo, hi } => lo.is_some() && hi.is_some(),
            BoundedPool::SetMembership(s) | BoundedPool::MapDomain(s) => match &*s.typ {
                TypX::Set { finite, .. } | TypX::Map { finite, .. } => *finite,
                _ => true,
            },
            _ => true,
        }
    }

    fn preference(&self) -> u8 {
        match self {
            BoundedPool::Exact(_) => 0,
            BoundedPool::Bool | BoundedPool::Char => 1,
            BoundedPool::SetMembership(_)
            | BoundedPool::MultisetMembership(_)
            | BoundedPool::SeqMembership(_)
            | BoundedPool::MapDomain(_) => 2,
            BoundedPool::IntRange { .. } => 3,
        }
    }
}

fn is_var(e: &Expr, x: &Var) -> bool {
    matches!(&e.x, ExprX::Var(v) if v.name == x.name)
}

fn plus_one(e: &Expr) -> Expr {
    mk_binary(&e.span, BinaryOp::Add, e, &mk_int(&e.span, 1))
}

fn membership_pool(collection: &Expr) -> Option<BoundedPool> {
    match &*collection.typ {
        TypX::Set { .. } => Some(BoundedPool::SetMembership(collection.clone())),
        TypX::Multiset(_) => Some(BoundedPool::MultisetMembership(collection.clone())),
        TypX::Seq(_) => Some(BoundedPool::SeqMembership(collection.clone())),
        TypX::Map { .. } => Some(BoundedPool::MapDomain(collection.clone())),
        _ => None,
    }
}

/// Bounds on `x` that a single conjunct provides.
/// `forbidden` are the names a bound expression may not mention (the bound variables).
fn conjunct_bounds(x: &Var, c: &Expr, forbidden: &[Ident]) -> Vec<BoundedPool> {
    let ok = |e: &Expr| !contains_free_var_in(e, forbidden);
    let mut pools = Vec::new();
    if let ExprX::Binary(op, e1, e2) = &c.x {
        let int_like = crate::ast_util::is_integer_typ(&x.typ);
        match op {
            BinaryOp::Eq if is_var(e1, x) && ok(e2) => pools.push(BoundedPool::Exact(e2.clone())),
            BinaryOp::Eq if is_var(e2, x) && ok(e1) => pools.push(BoundedPool::Exact(e1.clone())),
            BinaryOp::In if is_var(e1, x) && ok(e2) => pools.extend(membership_pool(e2)),
            // lo <= x, lo < x
            BinaryOp::Le if int_like && is_var(e2, x) && ok(e1) => {
                pools.push(BoundedPool::IntRange { lo: Some(e1.clone()), hi: None })
            }
            BinaryOp::Lt if int_like && is_var(e2, x) && ok(e1) => {
                pools.push(BoundedPool::IntRange { lo: Some(plus_one(e1)), hi: None })
            }
            // x < hi, x <= hi
            BinaryOp::Lt if int_like && is_var(e1, x) && ok(e2) => {
                pools.push(BoundedPool::IntRange { lo: None, hi: Some(e2.clone()) })
            }
            BinaryOp::Le if int_like && is_var(e1, x) && ok(e2) => {
                pools.push(BoundedPool::IntRange { lo: None, hi: Some(plus_one(e2)) })
            }
            // x >= lo, x > lo
            BinaryOp::Ge if int_like && is_var(e1, x) && ok(e2) => {
                pools.push(BoundedPool::IntRange { lo: Some(e2.clone()), hi: None })
            }
            BinaryOp::Gt if int_like && is_var(e1, x) && ok(e2) => {
                pools.push(BoundedPool::IntRange { lo: Some(plus_one(e2)), hi: None })
            }
            // hi > x, hi >= x
            BinaryOp::Gt if int_like && is_var(e2, x) && ok(e1) => {
                pools.push(BoundedPool::IntRange { lo: None, hi: Some(e1.clone()) })
            }
            BinaryOp::Ge if int_like && is_var(e2, x) && ok(e1) => {
                pools.push(BoundedPool::IntRange { lo: None, hi: Some(plus_one(e1)) })
            }
            _ => {}
        }
    }
    pools
}

/// Best pool for `x`: an exact value, a finite type, a collection, or a two-sided integer range.
pub fn discover_bound(x: &Var, range: Option<&Expr>, all_vars: &[Var]) -> Option<BoundedPool> {
    let forbidden: Vec<Ident> = all_vars.iter().map(|v| v.name.clone()).collect();
    let mut candidates: Vec<BoundedPool> = Vec::new();
    match &*x.typ {
        TypX::Bool => candidates.push(BoundedPool::Bool),
        TypX::Char => candidates.push(BoundedPool::Char),
        _ => {}
    }
    let mut lo: Option<Expr> = None;
    let mut hi: Option<Expr> = None;
    if matches!(&*x.typ, TypX::Nat) {
        lo = Some(mk_int(&x.span, 0));
    }
    if let Some(range) = range {
        for c in conjuncts(range) {
            for pool in conjunct_bounds(x, &c, &forbidden) {
                match pool {
                    BoundedPool::IntRange { lo: Some(l), hi: None } if lo.is_none() => lo = Some(l),
                    BoundedPool::IntRange { lo: None, hi: Some(h) } if hi.is_none() => hi = Some(h),
                    BoundedPool::IntRange { .. } => {}
                    pool => candidates.push(pool),
                }
            }
        }
    }
    if lo.is_some() || hi.is_some() {
        candidates.push(BoundedPool::IntRange { lo, hi });
    }
    candidates.retain(|p| p.is_finite());
    candidates.sort_by_key(|p| p.preference());
    candidates.into_iter().next()
}

/// Pools for all of `vars`, or the variables that have none
pub fn discover_bounds(vars: &[Var], range: Option<&Expr>) -> Result<Vec<BoundedPool>, Vec<Var>> {
    let mut pools = Vec::new();
    let mut missing = Vec::new();
    for x in vars {
        match discover_bound(x, range, vars) {
            Some(pool) => pools.push(pool),
            None => missing.push(x.clone()),
        }
    }
    if missing.is_empty() { Ok(pools) } else { Err(missing) }
}

/// The bound variables that cannot be enumerated at run time
pub fn uncompilable_bound_vars(vars: &[Var], range: Option<&Expr>) -> Vec<Var> {
    match discover_bounds(vars, range) {
        Ok(_) => vec![],
        Err(missing) => missing,
    }
}

/// Range `lo <= x < hi` as an expression pair, for pools that have one
pub fn int_range_of(pool: &BoundedPool) -> Option<(Expr, Expr)> {
    match pool {
        BoundedPool::IntRange { lo: Some(lo), hi: Some(hi) } => Some((lo.clone(), hi.clone())),
        BoundedPool::Exact(e) if crate::ast_util::is_integer_typ(&e.typ) => {
            Some((e.clone(), mk_binary(&e.span, BinaryOp::Add, e, &mk_int(&e.span, 1))))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[test]
    fn two_sided_integer_ranges_are_finite() {
        let i = var_decl("i", &int_typ());
        let n = var_decl("n", &int_typ());
        let range = and(&le(&int(0), &var(&i)), &lt(&var(&i), &var(&n)));
        let pool = discover_bound(&i, Some(&range), &[i.clone()]).unwrap();
        let (lo, hi) = int_range_of(&pool).unwrap();
        assert_eq!(lo.to_string(), "0");
        assert_eq!(hi.to_string(), "n");
        let one_sided = le(&int(0), &var(&i));
        assert!(discover_bound(&i, Some(&one_sided), &[i.clone()]).is_none());
    }

    #[test]
    fn nat_needs_only_an_upper_bound() {
        let k = var_decl("k", &crate::ast_util::nat_typ());
        let range = lt(&var(&k), &int(5));
        assert!(matches!(discover_bound(&k, Some(&range), &[k.clone()]), Some(BoundedPool::IntRange { .. })));
    }

    #[test]
    fn membership_and_exact_bounds() {
        let x = var_decl("x", &int_typ());
        let y = var_decl("y", &int_typ());
        let s = var_decl("s", &crate::ast_util::set_typ(&int_typ()));
        let range = and(&in_set(&var(&x), &var(&s)), &eq(&var(&y), &add(&var(&x), &int(1))));
        // y's candidate bound mentions x, another bound variable
        let result = discover_bounds(&[x.clone(), y.clone()], Some(&range));
        let missing = result.unwrap_err();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name.as_str(), "y");
        let b = var_decl("b", &crate::ast_util::bool_typ());
        assert!(matches!(discover_bound(&b, None, &[b.clone()]), Some(BoundedPool::Bool)));
    }
}
