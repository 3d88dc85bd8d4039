use crate::ast::*;
use crate::ast_util::mk_frame;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(PartialEq, Eq, Debug)]
pub enum VisitorControlFlow<T> {
    /// visit the children, then call the exit hook
    Recurse,
    /// skip the children and the exit hook
    Return,
    /// abandon the whole traversal
    Stop(T),
}

macro_rules! expr_visitor_control_flow {
    ($cf:expr) => {
        match $cf {
            crate::ast_visitor::VisitorControlFlow::Recurse => (),
            crate::ast_visitor::VisitorControlFlow::Return => (),
            crate::ast_visitor::VisitorControlFlow::Stop(val) => {
                return crate::ast_visitor::VisitorControlFlow::Stop(val);
            }
        }
    };
}

pub(crate) use expr_visitor_control_flow;

/// Hooks for a depth-first walk over declarations, members, statements, and expressions.
/// Every hook defaults to `Recurse`, so a visitor overrides only the nodes it cares about.
pub trait AstVisitor {
    type Stop;

    fn visit_decl(&mut self, _decl: &TopLevelDecl) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn exit_decl(&mut self, _decl: &TopLevelDecl) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn visit_member(&mut self, _member: &Member) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn exit_member(&mut self, _member: &Member) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn visit_stmt(&mut self, _stmt: &Stmt) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn exit_stmt(&mut self, _stmt: &Stmt) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn visit_expr(&mut self, _expr: &Expr) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
    fn exit_expr(&mut self, _expr: &Expr) -> VisitorControlFlow<Self::Stop> {
        VisitorControlFlow::Recurse
    }
}

/// Immediate sub-expressions of an expression, in source order
pub fn expr_sub_exprs(expr: &Expr) -> Vec<&Expr> {
    let mut v: Vec<&Expr> = Vec::new();
    match &expr.x {
        ExprX::Const(_) | ExprX::This { .. } | ExprX::Var(_) => {}
        ExprX::Member { obj, .. } => v.push(obj),
        ExprX::Index(e1, e2) => v.extend([e1, e2]),
        ExprX::Slice(e1, lo, hi) => {
            v.push(e1);
            v.extend(lo.iter());
            v.extend(hi.iter());
        }
        ExprX::Update(e1, e2, e3) => v.extend([e1, e2, e3]),
        ExprX::Display(_, es) => v.extend(es.iter()),
        ExprX::MapDisplay(entries) => {
            for (k, val) in entries.iter() {
                v.push(k);
                v.push(val);
            }
        }
        ExprX::Call { receiver, args, .. } => {
            v.extend(receiver.iter());
            v.extend(args.iter());
        }
        ExprX::Apply(f, args) => {
            v.push(f);
            v.extend(args.iter());
        }
        ExprX::Ctor { args, .. } => v.extend(args.iter()),
        ExprX::DatatypeUpdate { root, updates, .. } => {
            v.push(root);
            v.extend(updates.iter().map(|(_, e)| e));
        }
        ExprX::Unary(_, e1) => v.push(e1),
        ExprX::Binary(_, e1, e2) => v.extend([e1, e2]),
        ExprX::PrefixEq { k, e1, e2, .. } => v.extend([k, e1, e2]),
        ExprX::Old(_, e1) | ExprX::Fresh(e1) | ExprX::TypeTest(e1, _) => v.push(e1),
        ExprX::Unchanged(frames) => v.extend(frames.iter().map(|f| &f.e)),
        ExprX::Quant { range, body, attrs, .. } => {
            for attr in attrs.iter() {
                v.extend(attr.x.args.iter());
            }
            v.extend(range.iter());
            v.push(body);
        }
        ExprX::SetComprehension { range, term, .. } => {
            v.push(range);
            v.extend(term.iter());
        }
        ExprX::MapComprehension { range, key, value, .. } => {
            v.push(range);
            v.extend(key.iter());
            v.push(value);
        }
        ExprX::Let { rhss, body, .. } => {
            v.extend(rhss.iter());
            v.push(body);
        }
        ExprX::LetSuchThat { constraint, body, .. } => v.extend([constraint, body]),
        ExprX::Match { scrutinee, arms } => {
            v.push(scrutinee);
            v.extend(arms.iter().map(|a| &a.x.body));
        }
        ExprX::If(e1, e2, e3) => v.extend([e1, e2, e3]),
        ExprX::Lambda { reads, requires, body, .. } => {
            v.extend(reads.iter().map(|f| &f.e));
            v.extend(requires.iter());
            v.push(body);
        }
        ExprX::StmtExpr(_, e1) => v.push(e1),
    }
    v
}

/// Immediate sub-statements of an expression (only statement-expressions have one)
pub fn expr_sub_stmts(expr: &Expr) -> Vec<&Stmt> {
    match &expr.x {
        ExprX::StmtExpr(s, _) => vec![s],
        _ => vec![],
    }
}

fn rhs_sub_exprs(rhs: &Rhs) -> Vec<&Expr> {
    match rhs {
        Rhs::Expr(e) => vec![e],
        Rhs::New { args, .. } => args.iter().collect(),
        Rhs::Havoc => vec![],
    }
}

/// Immediate sub-expressions of a statement, in source order
pub fn stmt_sub_exprs(stmt: &Stmt) -> Vec<&Expr> {
    let mut v: Vec<&Expr> = Vec::new();
    match &stmt.x {
        StmtX::VarDecl { init, .. } => {
            if let Some(init) = init {
                v.extend(rhs_sub_exprs(init));
            }
        }
        StmtX::Assign { lhs, rhs } => {
            v.push(lhs);
            v.extend(rhs_sub_exprs(rhs));
        }
        StmtX::Call { lhss, receiver, args, .. } => {
            v.extend(lhss.iter());
            v.extend(receiver.iter());
            v.extend(args.iter());
        }
        StmtX::Assert { e, .. } | StmtX::Assume(e) => v.push(e),
        StmtX::Print(es) => v.extend(es.iter()),
        StmtX::Return(es) | StmtX::Yield(es) => {
            if let Some(es) = es {
                v.extend(es.iter());
            }
        }
        StmtX::Block(_) => {}
        StmtX::If { cond, .. } => v.extend(cond.iter()),
        StmtX::While { cond, invs, decreases, modifies, .. } => {
            v.extend(cond.iter());
            v.extend(invs.iter());
            v.extend(decreases.iter());
            v.extend(modifies.iter().map(|f| &f.e));
        }
        StmtX::Forall { range, ensures, attrs, forall_exprs, .. } => {
            for attr in attrs.iter() {
                v.extend(attr.x.args.iter());
            }
            v.push(range);
            v.extend(ensures.iter());
            if let Some(es) = forall_exprs {
                v.extend(es.iter());
            }
        }
        StmtX::Match { scrutinee, .. } => v.push(scrutinee),
    }
    v
}

/// Immediate sub-statements of a statement, in source order
pub fn stmt_sub_stmts(stmt: &Stmt) -> Vec<&Stmt> {
    match &stmt.x {
        StmtX::Assert { proof, .. } => proof.iter().collect(),
        StmtX::Block(stmts) => stmts.iter().collect(),
        StmtX::If { thn, els, .. } => std::iter::once(thn).chain(els.iter()).collect(),
        StmtX::While { body, .. } | StmtX::Forall { body, .. } => body.iter().collect(),
        StmtX::Match { arms, .. } => arms.iter().map(|a| &a.x.body).collect(),
        _ => vec![],
    }
}

pub fn walk_expr<V: AstVisitor>(v: &mut V, expr: &Expr) -> VisitorControlFlow<V::Stop> {
    match v.visit_expr(expr) {
        VisitorControlFlow::Stop(val) => return VisitorControlFlow::Stop(val),
        VisitorControlFlow::Return => return VisitorControlFlow::Recurse,
        VisitorControlFlow::Recurse => {
            for s in expr_sub_stmts(expr) {
                expr_visitor_control_flow!(walk_stmt(v, s));
            }
            for e in expr_sub_exprs(expr) {
                expr_visitor_control_flow!(walk_expr(v, e));
            }
        }
    }
    expr_visitor_control_flow!(v.exit_expr(expr));
    VisitorControlFlow::Recurse
}

pub fn walk_stmt<V: AstVisitor>(v: &mut V, stmt: &Stmt) -> VisitorControlFlow<V::Stop> {
    match v.visit_stmt(stmt) {
        VisitorControlFlow::Stop(val) => return VisitorControlFlow::Stop(val),
        VisitorControlFlow::Return => return VisitorControlFlow::Recurse,
        VisitorControlFlow::Recurse => {
            for e in stmt_sub_exprs(stmt) {
                expr_visitor_control_flow!(walk_expr(v, e));
            }
            for s in stmt_sub_stmts(stmt) {
                expr_visitor_control_flow!(walk_stmt(v, s));
            }
        }
    }
    expr_visitor_control_flow!(v.exit_stmt(stmt));
    VisitorControlFlow::Recurse
}

fn walk_params<V: AstVisitor>(v: &mut V, params: &Params) -> VisitorControlFlow<V::Stop> {
    for p in params.iter() {
        if let Some(d) = &p.default_value {
            expr_visitor_control_flow!(walk_expr(v, d));
        }
    }
    VisitorControlFlow::Recurse
}

fn walk_exprs<V: AstVisitor>(v: &mut V, es: &[Expr]) -> VisitorControlFlow<V::Stop> {
    for e in es {
        expr_visitor_control_flow!(walk_expr(v, e));
    }
    VisitorControlFlow::Recurse
}

fn walk_frames<V: AstVisitor>(v: &mut V, frames: &[FrameExpr]) -> VisitorControlFlow<V::Stop> {
    for f in frames {
        expr_visitor_control_flow!(walk_expr(v, &f.e));
    }
    VisitorControlFlow::Recurse
}

pub fn walk_member<V: AstVisitor>(v: &mut V, member: &Member) -> VisitorControlFlow<V::Stop> {
    match v.visit_member(member) {
        VisitorControlFlow::Stop(val) => return VisitorControlFlow::Stop(val),
        VisitorControlFlow::Return => return VisitorControlFlow::Recurse,
        VisitorControlFlow::Recurse => match member {
            Member::Field(f) => {
                if let Some(rhs) = &f.rhs {
                    expr_visitor_control_flow!(walk_expr(v, rhs));
                }
            }
            Member::Function(f) => {
                expr_visitor_control_flow!(walk_params(v, &f.params));
                expr_visitor_control_flow!(walk_exprs(v, &f.requires));
                expr_visitor_control_flow!(walk_frames(v, &f.reads));
                expr_visitor_control_flow!(walk_exprs(v, &f.ensures));
                expr_visitor_control_flow!(walk_exprs(v, &f.decreases));
                if let Some(body) = &f.body {
                    expr_visitor_control_flow!(walk_expr(v, body));
                }
                if let Some(by_method) = &f.by_method {
                    expr_visitor_control_flow!(walk_stmt(v, by_method));
                }
            }
            Member::Method(m) => {
                expr_visitor_control_flow!(walk_params(v, &m.ins));
                expr_visitor_control_flow!(walk_exprs(v, &m.requires));
                expr_visitor_control_flow!(walk_frames(v, &m.modifies));
                expr_visitor_control_flow!(walk_exprs(v, &m.ensures));
                expr_visitor_control_flow!(walk_exprs(v, &m.decreases));
                if let Some(body) = &m.body {
                    expr_visitor_control_flow!(walk_stmt(v, body));
                }
            }
        },
    }
    expr_visitor_control_flow!(v.exit_member(member));
    VisitorControlFlow::Recurse
}

pub fn walk_decl<V: AstVisitor>(v: &mut V, decl: &TopLevelDecl) -> VisitorControlFlow<V::Stop> {
    match v.visit_decl(decl) {
        VisitorControlFlow::Stop(val) => return VisitorControlFlow::Stop(val),
        VisitorControlFlow::Return => return VisitorControlFlow::Recurse,
        VisitorControlFlow::Recurse => {
            match decl {
                TopLevelDecl::Datatype(d) => {
                    for ctor in d.ctors.iter() {
                        expr_visitor_control_flow!(walk_params(v, &ctor.params));
                    }
                }
                TopLevelDecl::Newtype(n) => {
                    if let Some(c) = &n.constraint {
                        expr_visitor_control_flow!(walk_expr(v, c));
                    }
                }
                TopLevelDecl::Iterator(it) => {
                    expr_visitor_control_flow!(walk_params(v, &it.ins));
                    expr_visitor_control_flow!(walk_exprs(v, &it.requires));
                    expr_visitor_control_flow!(walk_frames(v, &it.reads));
                    expr_visitor_control_flow!(walk_frames(v, &it.modifies));
                    expr_visitor_control_flow!(walk_exprs(v, &it.yield_requires));
                    expr_visitor_control_flow!(walk_exprs(v, &it.yield_ensures));
                    expr_visitor_control_flow!(walk_exprs(v, &it.ensures));
                    expr_visitor_control_flow!(walk_exprs(v, &it.decreases));
                    if let Some(body) = &it.body {
                        expr_visitor_control_flow!(walk_stmt(v, body));
                    }
                }
                TopLevelDecl::Class(_) | TopLevelDecl::TypeSynonym(_) => {}
            }
            for member in decl.members() {
                expr_visitor_control_flow!(walk_member(v, member));
            }
        }
    }
    expr_visitor_control_flow!(v.exit_decl(decl));
    VisitorControlFlow::Recurse
}

pub fn walk_module<V: AstVisitor>(v: &mut V, module: &Module) -> VisitorControlFlow<V::Stop> {
    for decl in module.decls.iter() {
        expr_visitor_control_flow!(walk_decl(v, decl));
    }
    VisitorControlFlow::Recurse
}

struct ExprClosureVisitor<F> {
    f: F,
}

impl<T, F: FnMut(&Expr) -> VisitorControlFlow<T>> AstVisitor for ExprClosureVisitor<F> {
    type Stop = T;
    fn visit_expr(&mut self, expr: &Expr) -> VisitorControlFlow<T> {
        (self.f)(expr)
    }
}

/// Pre-order walk over every expression reachable from `expr`, including those inside
/// nested statements
pub fn expr_visitor_dfs<T, F>(expr: &Expr, f: &mut F) -> VisitorControlFlow<T>
where
    F: FnMut(&Expr) -> VisitorControlFlow<T>,
{
    walk_expr(&mut ExprClosureVisitor { f }, expr)
}

/// Does any sub-expression (including `expr` itself) satisfy `pred`?
pub fn expr_any<F: FnMut(&Expr) -> bool>(expr: &Expr, mut pred: F) -> bool {
    let found = expr_visitor_dfs(expr, &mut |e: &Expr| {
        if pred(e) { VisitorControlFlow::Stop(()) } else { VisitorControlFlow::Recurse }
    });
    matches!(found, VisitorControlFlow::Stop(()))
}

pub fn stmt_any<F: FnMut(&Stmt) -> bool>(stmt: &Stmt, pred: F) -> bool {
    struct V<F> {
        pred: F,
    }
    impl<F: FnMut(&Stmt) -> bool> AstVisitor for V<F> {
        type Stop = ();
        fn visit_stmt(&mut self, stmt: &Stmt) -> VisitorControlFlow<()> {
            if (self.pred)(stmt) { VisitorControlFlow::Stop(()) } else { VisitorControlFlow::Recurse }
        }
    }
    matches!(walk_stmt(&mut V { pred }, stmt), VisitorControlFlow::Stop(()))
}

// Rebuilding

/// A bottom-up (or custom) rewrite of expressions and statements.
/// `map_children_expr`/`map_children_stmt` rebuild a node after mapping its immediate children.
pub trait ExprMapper {
    type Err;
    fn map_expr(&mut self, expr: &Expr) -> Result<Expr, Self::Err>;
    fn map_stmt(&mut self, stmt: &Stmt) -> Result<Stmt, Self::Err>;
}

fn map_exprs<M: ExprMapper + ?Sized>(m: &mut M, es: &Exprs) -> Result<Exprs, M::Err> {
    let mut v = Vec::with_capacity(es.len());
    for e in es.iter() {
        v.push(m.map_expr(e)?);
    }
    Ok(Rc::new(v))
}

fn map_opt<M: ExprMapper + ?Sized>(m: &mut M, e: &Option<Expr>) -> Result<Option<Expr>, M::Err> {
    match e {
        None => Ok(None),
        Some(e) => Ok(Some(m.map_expr(e)?)),
    }
}

fn map_frames<M: ExprMapper + ?Sized>(m: &mut M, frames: &FrameExprs) -> Result<FrameExprs, M::Err> {
    let mut v = Vec::with_capacity(frames.len());
    for f in frames.iter() {
        v.push(mk_frame(&m.map_expr(&f.e)?, f.field.as_ref()));
    }
    Ok(Rc::new(v))
}

pub fn map_attrs<M: ExprMapper + ?Sized>(m: &mut M, attrs: &Attributes) -> Result<Attributes, M::Err> {
    let mut v = Vec::with_capacity(attrs.len());
    for a in attrs.iter() {
        v.push(a.new_x(AttributeX { name: a.x.name.clone(), args: map_exprs(m, &a.x.args)? }));
    }
    Ok(Rc::new(v))
}

fn map_rhs<M: ExprMapper + ?Sized>(m: &mut M, rhs: &Rhs) -> Result<Rhs, M::Err> {
    Ok(match rhs {
        Rhs::Expr(e) => Rhs::Expr(m.map_expr(e)?),
        Rhs::New { typ, ctor, args } => {
            Rhs::New { typ: typ.clone(), ctor: ctor.clone(), args: map_exprs(m, args)? }
        }
        Rhs::Havoc => Rhs::Havoc,
    })
}

/// Rebuild an expression variant after mapping its immediate children.
/// Binders are kept as they are; mappers that care about binding override those cases.
pub fn map_children_exprx<M: ExprMapper + ?Sized>(m: &mut M, x: &ExprX) -> Result<ExprX, M::Err> {
    Ok(match x {
        ExprX::Const(c) => ExprX::Const(c.clone()),
        ExprX::This { implicit } => ExprX::This { implicit: *implicit },
        ExprX::Var(v) => ExprX::Var(v.clone()),
        ExprX::Member { obj, member } => {
            ExprX::Member { obj: m.map_expr(obj)?, member: member.clone() }
        }
        ExprX::Index(e1, e2) => ExprX::Index(m.map_expr(e1)?, m.map_expr(e2)?),
        ExprX::Slice(e1, lo, hi) => ExprX::Slice(m.map_expr(e1)?, map_opt(m, lo)?, map_opt(m, hi)?),
        ExprX::Update(e1, e2, e3) => {
            ExprX::Update(m.map_expr(e1)?, m.map_expr(e2)?, m.map_expr(e3)?)
        }
        ExprX::Display(kind, es) => ExprX::Display(*kind, map_exprs(m, es)?),
        ExprX::MapDisplay(entries) => {
            let mut v = Vec::with_capacity(entries.len());
            for (k, val) in entries.iter() {
                v.push((m.map_expr(k)?, m.map_expr(val)?));
            }
            ExprX::MapDisplay(Rc::new(v))
        }
        ExprX::Call { fun, receiver, args, route } => ExprX::Call {
            fun: fun.clone(),
            receiver: map_opt(m, receiver)?,
            args: map_exprs(m, args)?,
            route: Cell::new(route.get()),
        },
        ExprX::Apply(f, args) => ExprX::Apply(m.map_expr(f)?, map_exprs(m, args)?),
        ExprX::Ctor { datatype, variant, args } => ExprX::Ctor {
            datatype: datatype.clone(),
            variant: variant.clone(),
            args: map_exprs(m, args)?,
        },
        ExprX::DatatypeUpdate { root, updates, compiled } => {
            let mut v = Vec::with_capacity(updates.len());
            for (f, e) in updates.iter() {
                v.push((f.clone(), m.map_expr(e)?));
            }
            ExprX::DatatypeUpdate {
                root: m.map_expr(root)?,
                updates: Rc::new(v),
                compiled: Cell::new(compiled.get()),
            }
        }
        ExprX::Unary(op, e1) => ExprX::Unary(*op, m.map_expr(e1)?),
        ExprX::Binary(op, e1, e2) => ExprX::Binary(*op, m.map_expr(e1)?, m.map_expr(e2)?),
        ExprX::PrefixEq { negated, k, e1, e2 } => ExprX::PrefixEq {
            negated: *negated,
            k: m.map_expr(k)?,
            e1: m.map_expr(e1)?,
            e2: m.map_expr(e2)?,
        },
        ExprX::Old(label, e1) => ExprX::Old(label.clone(), m.map_expr(e1)?),
        ExprX::Fresh(e1) => ExprX::Fresh(m.map_expr(e1)?),
        ExprX::Unchanged(frames) => ExprX::Unchanged(map_frames(m, frames)?),
        ExprX::TypeTest(e1, t) => ExprX::TypeTest(m.map_expr(e1)?, t.clone()),
        ExprX::Quant { quant, vars, range, body, attrs } => ExprX::Quant {
            quant: *quant,
            vars: vars.clone(),
            attrs: map_attrs(m, attrs)?,
            range: map_opt(m, range)?,
            body: m.map_expr(body)?,
        },
        ExprX::SetComprehension { finite, vars, range, term } => ExprX::SetComprehension {
            finite: *finite,
            vars: vars.clone(),
            range: m.map_expr(range)?,
            term: map_opt(m, term)?,
        },
        ExprX::MapComprehension { finite, vars, range, key, value } => ExprX::MapComprehension {
            finite: *finite,
            vars: vars.clone(),
            range: m.map_expr(range)?,
            key: map_opt(m, key)?,
            value: m.map_expr(value)?,
        },
        ExprX::Let { vars, rhss, body } => {
            ExprX::Let { vars: vars.clone(), rhss: map_exprs(m, rhss)?, body: m.map_expr(body)? }
        }
        ExprX::LetSuchThat { vars, constraint, body, bounds } => ExprX::LetSuchThat {
            vars: vars.clone(),
            constraint: m.map_expr(constraint)?,
            body: m.map_expr(body)?,
            bounds: RefCell::new(bounds.borrow().clone()),
        },
        ExprX::Match { scrutinee, arms } => {
            let scrutinee = m.map_expr(scrutinee)?;
            let mut v = Vec::with_capacity(arms.len());
            for arm in arms.iter() {
                v.push(arm.new_x(ArmX { pattern: arm.x.pattern.clone(), body: m.map_expr(&arm.x.body)? }));
            }
            ExprX::Match { scrutinee, arms: Rc::new(v) }
        }
        ExprX::If(e1, e2, e3) => ExprX::If(m.map_expr(e1)?, m.map_expr(e2)?, m.map_expr(e3)?),
        ExprX::Lambda { params, reads, requires, body } => ExprX::Lambda {
            params: params.clone(),
            reads: map_frames(m, reads)?,
            requires: map_opt(m, requires)?,
            body: m.map_expr(body)?,
        },
        ExprX::StmtExpr(s, e1) => ExprX::StmtExpr(m.map_stmt(s)?, m.map_expr(e1)?),
    })
}

pub fn map_children_expr<M: ExprMapper + ?Sized>(m: &mut M, expr: &Expr) -> Result<Expr, M::Err> {
    Ok(expr.new_x(map_children_exprx(m, &expr.x)?))
}

pub fn map_children_stmtx<M: ExprMapper + ?Sized>(m: &mut M, x: &StmtX) -> Result<StmtX, M::Err> {
    Ok(match x {
        StmtX::VarDecl { vars, init } => StmtX::VarDecl {
            vars: vars.clone(),
            init: match init {
                None => None,
                Some(rhs) => Some(map_rhs(m, rhs)?),
            },
        },
        StmtX::Assign { lhs, rhs } => StmtX::Assign { lhs: m.map_expr(lhs)?, rhs: map_rhs(m, rhs)? },
        StmtX::Call { lhss, method, receiver, args } => StmtX::Call {
            lhss: map_exprs(m, lhss)?,
            method: method.clone(),
            receiver: map_opt(m, receiver)?,
            args: map_exprs(m, args)?,
        },
        StmtX::Assert { e, proof } => StmtX::Assert {
            e: m.map_expr(e)?,
            proof: match proof {
                None => None,
                Some(p) => Some(m.map_stmt(p)?),
            },
        },
        StmtX::Assume(e) => StmtX::Assume(m.map_expr(e)?),
        StmtX::Print(es) => StmtX::Print(map_exprs(m, es)?),
        StmtX::Return(es) => StmtX::Return(match es {
            None => None,
            Some(es) => Some(map_exprs(m, es)?),
        }),
        StmtX::Yield(es) => StmtX::Yield(match es {
            None => None,
            Some(es) => Some(map_exprs(m, es)?),
        }),
        StmtX::Block(stmts) => {
            let mut v = Vec::with_capacity(stmts.len());
            for s in stmts.iter() {
                v.push(m.map_stmt(s)?);
            }
            StmtX::Block(Rc::new(v))
        }
        StmtX::If { cond, thn, els } => StmtX::If {
            cond: map_opt(m, cond)?,
            thn: m.map_stmt(thn)?,
            els: match els {
                None => None,
                Some(s) => Some(m.map_stmt(s)?),
            },
        },
        StmtX::While { cond, invs, decreases, modifies, body } => StmtX::While {
            cond: map_opt(m, cond)?,
            invs: map_exprs(m, invs)?,
            decreases: map_exprs(m, decreases)?,
            modifies: map_frames(m, modifies)?,
            body: match body {
                None => None,
                Some(s) => Some(m.map_stmt(s)?),
            },
        },
        StmtX::Forall { vars, range, ensures, body, attrs, forall_exprs } => StmtX::Forall {
            vars: vars.clone(),
            attrs: map_attrs(m, attrs)?,
            range: m.map_expr(range)?,
            ensures: map_exprs(m, ensures)?,
            body: match body {
                None => None,
                Some(s) => Some(m.map_stmt(s)?),
            },
            forall_exprs: match forall_exprs {
                None => None,
                Some(es) => Some(map_exprs(m, es)?),
            },
        },
        StmtX::Match { scrutinee, arms } => {
            let scrutinee = m.map_expr(scrutinee)?;
            let mut v = Vec::with_capacity(arms.len());
            for arm in arms.iter() {
                v.push(arm.new_x(StmtArmX {
                    pattern: arm.x.pattern.clone(),
                    body: m.map_stmt(&arm.x.body)?,
                }));
            }
            StmtX::Match { scrutinee, arms: Rc::new(v) }
        }
    })
}

pub fn map_children_stmt<M: ExprMapper + ?Sized>(m: &mut M, stmt: &Stmt) -> Result<Stmt, M::Err> {
    Ok(stmt.new_x(map_children_stmtx(m, &stmt.x)?))
}

struct PostOrderMapper<FE, FS> {
    fe: FE,
    fs: FS,
}

impl<FE, FS> ExprMapper for PostOrderMapper<FE, FS>
where
    FE: FnMut(&Expr) -> Result<Expr, VirErr>,
    FS: FnMut(&Stmt) -> Result<Stmt, VirErr>,
{
    type Err = VirErr;
    fn map_expr(&mut self, expr: &Expr) -> Result<Expr, VirErr> {
        let expr = map_children_expr(self, expr)?;
        (self.fe)(&expr)
    }
    fn map_stmt(&mut self, stmt: &Stmt) -> Result<Stmt, VirErr> {
        let stmt = map_children_stmt(self, stmt)?;
        (self.fs)(&stmt)
    }
}

/// Bottom-up rebuild: `f` sees each node after its children have been rebuilt
pub fn map_expr_visitor<F>(expr: &Expr, f: &mut F) -> Result<Expr, VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    PostOrderMapper { fe: f, fs: |s: &Stmt| -> Result<Stmt, VirErr> { Ok(s.clone()) } }
        .map_expr(expr)
}

pub fn map_stmt_expr_visitor<FE, FS>(stmt: &Stmt, fe: &mut FE, fs: &mut FS) -> Result<Stmt, VirErr>
where
    FE: FnMut(&Expr) -> Result<Expr, VirErr>,
    FS: FnMut(&Stmt) -> Result<Stmt, VirErr>,
{
    PostOrderMapper { fe, fs }.map_stmt(stmt)
}

pub fn map_expr_with_stmts<FE, FS>(expr: &Expr, fe: &mut FE, fs: &mut FS) -> Result<Expr, VirErr>
where
    FE: FnMut(&Expr) -> Result<Expr, VirErr>,
    FS: FnMut(&Stmt) -> Result<Stmt, VirErr>,
{
    PostOrderMapper { fe, fs }.map_expr(expr)
}

fn map_vec<F>(es: &mut Vec<Expr>, f: &mut F) -> Result<(), VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    for e in es.iter_mut() {
        *e = map_expr_visitor(e, f)?;
    }
    Ok(())
}

fn map_frame_vec<F>(frames: &mut Vec<FrameExpr>, f: &mut F) -> Result<(), VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    for fr in frames.iter_mut() {
        *fr = mk_frame(&map_expr_visitor(&fr.e, f)?, fr.field.as_ref());
    }
    Ok(())
}

/// Apply a bottom-up expression rewrite to every expression a member owns,
/// including expressions nested in its statements
pub fn map_member_exprs<F>(member: &mut Member, f: &mut F) -> Result<(), VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    let mut fs = |s: &Stmt| -> Result<Stmt, VirErr> { Ok(s.clone()) };
    match member {
        Member::Field(field) => {
            if let Some(rhs) = &field.rhs {
                field.rhs = Some(map_expr_visitor(rhs, f)?);
            }
        }
        Member::Function(func) => {
            map_vec(&mut func.requires, f)?;
            map_frame_vec(&mut func.reads, f)?;
            map_vec(&mut func.ensures, f)?;
            map_vec(&mut func.decreases, f)?;
            if let Some(body) = &func.body {
                func.body = Some(map_expr_with_stmts(body, f, &mut fs)?);
            }
            if let Some(by_method) = &func.by_method {
                func.by_method = Some(map_stmt_expr_visitor(by_method, f, &mut fs)?);
            }
        }
        Member::Method(method) => {
            map_vec(&mut method.requires, f)?;
            map_frame_vec(&mut method.modifies, f)?;
            map_vec(&mut method.ensures, f)?;
            map_vec(&mut method.decreases, f)?;
            if let Some(body) = &method.body {
                method.body = Some(map_stmt_expr_visitor(body, f, &mut fs)?);
            }
        }
    }
    Ok(())
}

/// Apply a bottom-up statement rewrite to every statement a member owns
pub fn map_member_stmts<FS>(member: &mut Member, fs: &mut FS) -> Result<(), VirErr>
where
    FS: FnMut(&Stmt) -> Result<Stmt, VirErr>,
{
    let mut fe = |e: &Expr| -> Result<Expr, VirErr> { Ok(e.clone()) };
    match member {
        Member::Field(_) => {}
        Member::Function(func) => {
            if let Some(body) = &func.body {
                func.body = Some(map_expr_with_stmts(body, &mut fe, fs)?);
            }
            if let Some(by_method) = &func.by_method {
                func.by_method = Some(map_stmt_expr_visitor(by_method, &mut fe, fs)?);
            }
        }
        Member::Method(method) => {
            if let Some(body) = &method.body {
                method.body = Some(map_stmt_expr_visitor(body, &mut fe, fs)?);
            }
        }
    }
    Ok(())
}

/// Like `map_member_exprs`, for iterator declarations
pub fn map_iterator_exprs<F>(it: &mut IteratorDecl, f: &mut F) -> Result<(), VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    let mut fs = |s: &Stmt| -> Result<Stmt, VirErr> { Ok(s.clone()) };
    map_vec(&mut it.requires, f)?;
    map_vec(&mut it.ensures, f)?;
    map_vec(&mut it.yield_requires, f)?;
    map_vec(&mut it.yield_ensures, f)?;
    map_frame_vec(&mut it.reads, f)?;
    map_frame_vec(&mut it.modifies, f)?;
    map_vec(&mut it.decreases, f)?;
    if let Some(body) = &it.body {
        it.body = Some(map_stmt_expr_visitor(body, f, &mut fs)?);
    }
    Ok(())
}

/// Rewrite every expression in a module, declaration by declaration
pub fn map_module_exprs<F>(module: &mut Module, f: &mut F) -> Result<(), VirErr>
where
    F: FnMut(&Expr) -> Result<Expr, VirErr>,
{
    for decl in module.decls.iter_mut() {
        if let TopLevelDecl::Iterator(it) = decl {
            map_iterator_exprs(it, f)?;
        }
        if let Some(members) = decl.members_mut() {
            for member in members.iter_mut() {
                map_member_exprs(member, f)?;
            }
        }
    }
    Ok(())
}
