use crate::ast::{
    Attribute, AttributeX, Attributes, BinaryOp, BuiltIns, CallRoute, ClassDecl, Constant, Expr,
    ExprX, Exprs, Field, FrameExpr, FrameExprX, Fun, Function, FunctionKind, Ident, Idents,
    Member, Method, MethodKind, Module, Param, ParamX, Params, Path, PathX, Program, Quant,
    Spanned, SpannedTyped, Stmt, StmtX, Stmts, TopLevelDecl, Typ, TypX, Typs, UnaryOp, Var, VarX,
    Vars, VirErr,
};
use crate::messages::{error, internal_error, Span};
use crate::tokens::TokenX;
use num_bigint::BigInt;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Construct an Error and wrap it in Err.
/// For more complex Error objects, use the builder functions in messages

pub fn err_str<A>(span: &Span, msg: &str) -> Result<A, VirErr> {
    Err(error(span, msg))
}

pub fn err_string<A>(span: &Span, msg: String) -> Result<A, VirErr> {
    Err(error(span, msg))
}

pub fn internal_err<A>(span: &Span, msg: &str) -> Result<A, VirErr> {
    Err(internal_error(span, msg))
}

pub fn str_ident(x: &str) -> Ident {
    Rc::new(x.to_string())
}

pub fn mk_path(segments: &[&str]) -> Path {
    Rc::new(PathX { segments: Rc::new(segments.iter().map(|s| str_ident(s)).collect()) })
}

impl PathX {
    pub fn last(&self) -> &Ident {
        self.segments.last().expect("path with no segments")
    }

    pub fn push_segment(&self, segment: &str) -> Path {
        let mut segments = (*self.segments).clone();
        segments.push(str_ident(segment));
        Rc::new(PathX { segments: Rc::new(segments) })
    }

    pub fn pop_segment(&self) -> Path {
        let mut segments = (*self.segments).clone();
        segments.pop();
        Rc::new(PathX { segments: Rc::new(segments) })
    }

    /// The module a path belongs to
    pub fn module(&self) -> &Ident {
        &self.segments[0]
    }
}

impl fmt::Display for PathX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<&str> = self.segments.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", strings.join("."))
    }
}

impl<X> SpannedTyped<X> {
    pub fn new(span: &Span, typ: &Typ, x: X) -> Rc<Self> {
        Rc::new(SpannedTyped { span: span.clone(), typ: typ.clone(), x })
    }

    pub fn new_x(&self, x: X) -> Rc<Self> {
        Rc::new(SpannedTyped { span: self.span.clone(), typ: self.typ.clone(), x })
    }
}

impl<X> Spanned<X> {
    pub fn new(span: &Span, x: X) -> Rc<Self> {
        Rc::new(Spanned { span: span.clone(), x })
    }

    pub fn new_x(&self, x: X) -> Rc<Self> {
        Rc::new(Spanned { span: self.span.clone(), x })
    }
}

// Types

pub fn bool_typ() -> Typ {
    Rc::new(TypX::Bool)
}

pub fn int_typ() -> Typ {
    Rc::new(TypX::Int)
}

pub fn nat_typ() -> Typ {
    Rc::new(TypX::Nat)
}

pub fn set_typ(elem: &Typ) -> Typ {
    Rc::new(TypX::Set { finite: true, elem: elem.clone() })
}

pub fn seq_typ(elem: &Typ) -> Typ {
    Rc::new(TypX::Seq(elem.clone()))
}

pub fn object_typ(nullable: bool) -> Typ {
    Rc::new(TypX::Object { nullable })
}

pub fn class_typ(path: &Path, nullable: bool) -> Typ {
    Rc::new(TypX::Class { path: path.clone(), args: Rc::new(vec![]), nullable })
}

pub fn datatype_typ(path: &Path, args: Typs) -> Typ {
    Rc::new(TypX::Datatype { path: path.clone(), args })
}

pub fn typ_param(name: &str) -> Typ {
    Rc::new(TypX::TypParam(str_ident(name)))
}

pub fn is_bool_typ(typ: &Typ) -> bool {
    matches!(&**typ, TypX::Bool)
}

pub fn is_integer_typ(typ: &Typ) -> bool {
    matches!(&**typ, TypX::Int | TypX::Nat)
}

/// class, trait, and object types
pub fn is_reference_typ(typ: &Typ) -> bool {
    matches!(&**typ, TypX::Class { .. } | TypX::Object { .. })
}

pub fn is_nullable_typ(typ: &Typ) -> bool {
    match &**typ {
        TypX::Class { nullable, .. } | TypX::Object { nullable } => *nullable,
        _ => false,
    }
}

pub fn undefined_typ() -> Typ {
    Rc::new(TypX::Arrow(Rc::new(vec![]), bool_typ()))
}

impl BuiltIns {
    pub fn new() -> Self {
        let nullable_object_typ = object_typ(true);
        BuiltIns {
            bool_typ: bool_typ(),
            int_typ: int_typ(),
            object_typ: object_typ(false),
            set_of_objects_typ: set_typ(&nullable_object_typ),
            nullable_object_typ,
        }
    }
}

// Expressions

pub fn mk_expr(span: &Span, typ: &Typ, x: ExprX) -> Expr {
    SpannedTyped::new(span, typ, x)
}

pub fn mk_bool(span: &Span, b: bool) -> Expr {
    mk_expr(span, &bool_typ(), ExprX::Const(Constant::Bool(b)))
}

pub fn mk_int<I: Into<BigInt>>(span: &Span, i: I) -> Expr {
    mk_expr(span, &int_typ(), ExprX::Const(Constant::Int(i.into())))
}

pub fn mk_null(span: &Span) -> Expr {
    mk_expr(span, &object_typ(true), ExprX::Const(Constant::Null))
}

pub fn mk_var(span: &Span, var: &Var) -> Expr {
    mk_expr(span, &var.typ, ExprX::Var(var.clone()))
}

pub fn mk_this(span: &Span, typ: &Typ, implicit: bool) -> Expr {
    mk_expr(span, typ, ExprX::This { implicit })
}

pub fn mk_member(span: &Span, obj: &Expr, member: &Path, typ: &Typ) -> Expr {
    mk_expr(span, typ, ExprX::Member { obj: obj.clone(), member: member.clone() })
}

pub fn mk_call(
    span: &Span,
    fun: &Fun,
    receiver: Option<&Expr>,
    args: Vec<Expr>,
    typ: &Typ,
) -> Expr {
    mk_expr(
        span,
        typ,
        ExprX::Call {
            fun: fun.clone(),
            receiver: receiver.cloned(),
            args: Rc::new(args),
            route: Cell::new(CallRoute::Undecided),
        },
    )
}

pub fn mk_unary(span: &Span, op: UnaryOp, e: &Expr) -> Expr {
    let typ = match op {
        UnaryOp::Not => bool_typ(),
        UnaryOp::Neg => e.typ.clone(),
        UnaryOp::Cardinality => nat_typ(),
    };
    mk_expr(span, &typ, ExprX::Unary(op, e.clone()))
}

pub fn mk_not(span: &Span, e: &Expr) -> Expr {
    mk_unary(span, UnaryOp::Not, e)
}

impl BinaryOp {
    pub fn returns_bool(&self) -> bool {
        use BinaryOp::*;
        match self {
            Iff | Implies | And | Or | Eq | Ne | Lt | Le | Gt | Ge | In | NotIn | Subset
            | ProperSubset | Disjoint | RankLt | RankGt => true,
            Add | Sub | Mul | Div | Mod | LeftShift | RightShift | BitAnd | BitOr | BitXor
            | Union | Intersection | Difference | Concat | MapMerge | MapSubtraction => false,
        }
    }
}

pub fn mk_binary(span: &Span, op: BinaryOp, e1: &Expr, e2: &Expr) -> Expr {
    let typ = if op.returns_bool() {
        bool_typ()
    } else if matches!(op, BinaryOp::Add | BinaryOp::Sub) && matches!(&*e1.typ, TypX::Nat) {
        // nat - nat may go negative
        int_typ()
    } else {
        e1.typ.clone()
    };
    mk_expr(span, &typ, ExprX::Binary(op, e1.clone(), e2.clone()))
}

pub fn mk_and(span: &Span, e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(span, BinaryOp::And, e1, e2)
}

pub fn mk_or(span: &Span, e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(span, BinaryOp::Or, e1, e2)
}

pub fn mk_implies(span: &Span, e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(span, BinaryOp::Implies, e1, e2)
}

pub fn mk_eq(span: &Span, e1: &Expr, e2: &Expr) -> Expr {
    mk_binary(span, BinaryOp::Eq, e1, e2)
}

pub fn mk_old(span: &Span, e: &Expr) -> Expr {
    mk_expr(span, &e.typ, ExprX::Old(None, e.clone()))
}

pub fn mk_fresh(span: &Span, e: &Expr) -> Expr {
    mk_expr(span, &bool_typ(), ExprX::Fresh(e.clone()))
}

pub fn mk_if(span: &Span, cond: &Expr, e1: &Expr, e2: &Expr) -> Expr {
    mk_expr(span, &e1.typ, ExprX::If(cond.clone(), e1.clone(), e2.clone()))
}

pub fn mk_set_display(span: &Span, elem_typ: &Typ, elems: Vec<Expr>) -> Expr {
    mk_expr(span, &set_typ(elem_typ), ExprX::Display(crate::ast::DisplayKind::Set, Rc::new(elems)))
}

pub fn mk_quant(
    span: &Span,
    quant: Quant,
    vars: &Vars,
    range: Option<&Expr>,
    body: &Expr,
    attrs: &Attributes,
) -> Expr {
    mk_expr(
        span,
        &bool_typ(),
        ExprX::Quant {
            quant,
            vars: vars.clone(),
            range: range.cloned(),
            body: body.clone(),
            attrs: attrs.clone(),
        },
    )
}

pub fn chain_binary(span: &Span, op: BinaryOp, init: &Expr, exprs: &[Expr]) -> Expr {
    let mut expr = init.clone();
    for e in exprs.iter() {
        expr = mk_binary(span, op, &expr, e);
    }
    expr
}

/// e1 && ... && en, or `true` when empty
pub fn conjoin(span: &Span, exprs: &[Expr]) -> Expr {
    match exprs.split_first() {
        None => mk_bool(span, true),
        Some((first, rest)) => chain_binary(span, BinaryOp::And, first, rest),
    }
}

/// Flatten a tree of && into its conjuncts
pub fn conjuncts(expr: &Expr) -> Vec<Expr> {
    let mut result = Vec::new();
    fn go(expr: &Expr, result: &mut Vec<Expr>) {
        match &expr.x {
            ExprX::Binary(BinaryOp::And, e1, e2) => {
                go(e1, result);
                go(e2, result);
            }
            _ => result.push(expr.clone()),
        }
    }
    go(expr, &mut result);
    result
}

pub fn is_true(expr: &Expr) -> bool {
    matches!(&expr.x, ExprX::Const(Constant::Bool(true)))
}

pub fn const_int(expr: &Expr) -> Option<&BigInt> {
    match &expr.x {
        ExprX::Const(Constant::Int(i)) => Some(i),
        _ => None,
    }
}

pub fn mk_frame(e: &Expr, field: Option<&Ident>) -> FrameExpr {
    Rc::new(FrameExprX { e: e.clone(), field: field.cloned() })
}

pub fn mk_attr(span: &Span, name: &str, args: Vec<Expr>) -> Attribute {
    Spanned::new(span, AttributeX { name: str_ident(name), args: Rc::new(args) })
}

pub fn no_attrs() -> Attributes {
    Rc::new(vec![])
}

pub fn no_exprs() -> Exprs {
    Rc::new(vec![])
}

// Variables and statements

pub fn mk_var_decl(span: &Span, name: &str, typ: &Typ, is_ghost: bool) -> Var {
    mk_var_decl_with(span, str_ident(name), typ, is_ghost)
}

pub fn mk_var_decl_with(span: &Span, name: Ident, typ: &Typ, is_ghost: bool) -> Var {
    Rc::new(VarX { name, typ: typ.clone(), is_ghost: Cell::new(is_ghost), span: span.clone() })
}

pub fn mk_param(var: &Var) -> Param {
    Rc::new(ParamX { var: var.clone(), default_value: None })
}

pub fn mk_params(vars: &[Var]) -> Params {
    Rc::new(vars.iter().map(mk_param).collect())
}

pub fn params_vars(params: &Params) -> Vec<Var> {
    params.iter().map(|p| p.var.clone()).collect()
}

pub fn mk_stmt(span: &Span, x: StmtX) -> Stmt {
    Spanned::new(span, x)
}

pub fn mk_block(span: &Span, stmts: Vec<Stmt>) -> Stmt {
    mk_stmt(span, StmtX::Block(Rc::new(stmts)))
}

/// Statements of a block, or the statement itself
pub fn stmt_as_block(stmt: &Stmt) -> Stmts {
    match &stmt.x {
        StmtX::Block(stmts) => stmts.clone(),
        _ => Rc::new(vec![stmt.clone()]),
    }
}

/// A token that marks synthesized code while still pointing at `span`
pub fn auto_span(span: &Span) -> Span {
    TokenX::auto_generated(span)
}

// Declarations

impl FunctionKind {
    /// Kinds that are always ghost, regardless of how they are declared
    pub fn is_ghost_only(&self) -> bool {
        matches!(
            self,
            FunctionKind::TwoStateFunction
                | FunctionKind::TwoStatePredicate
                | FunctionKind::LeastPredicate
                | FunctionKind::GreatestPredicate
                | FunctionKind::PrefixPredicate
        )
    }

    pub fn is_two_state(&self) -> bool {
        matches!(self, FunctionKind::TwoStateFunction | FunctionKind::TwoStatePredicate)
    }

    pub fn is_predicate(&self) -> bool {
        !matches!(self, FunctionKind::Function | FunctionKind::TwoStateFunction)
    }

    pub fn keyword(&self, is_ghost: bool) -> &'static str {
        match (self, is_ghost) {
            (FunctionKind::Function, false) => "function method",
            (FunctionKind::Function, true) => "function",
            (FunctionKind::Predicate, false) => "predicate method",
            (FunctionKind::Predicate, true) => "predicate",
            (FunctionKind::TwoStateFunction, _) => "twostate function",
            (FunctionKind::TwoStatePredicate, _) => "twostate predicate",
            (FunctionKind::LeastPredicate, _) => "least predicate",
            (FunctionKind::GreatestPredicate, _) => "greatest predicate",
            (FunctionKind::PrefixPredicate, _) => "prefix predicate",
        }
    }
}

impl MethodKind {
    pub fn is_lemma(&self) -> bool {
        !matches!(self, MethodKind::Method | MethodKind::Constructor)
    }

    pub fn is_extreme(&self) -> bool {
        matches!(self, MethodKind::LeastLemma | MethodKind::GreatestLemma)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            MethodKind::Method => "method",
            MethodKind::Constructor => "constructor",
            MethodKind::Lemma => "lemma",
            MethodKind::TwoStateLemma => "twostate lemma",
            MethodKind::LeastLemma => "least lemma",
            MethodKind::GreatestLemma => "greatest lemma",
            MethodKind::PrefixLemma => "prefix lemma",
        }
    }
}

impl Function {
    pub fn new(span: &Span, path: &Path, kind: FunctionKind, params: Vec<Var>, ret: &Typ) -> Self {
        Function {
            name: path.last().clone(),
            path: path.clone(),
            span: span.clone(),
            kind,
            is_ghost: true,
            is_static: false,
            typ_params: Rc::new(vec![]),
            params: mk_params(&params),
            ret: mk_var_decl(span, "result", ret, false),
            requires: vec![],
            reads: vec![],
            ensures: vec![],
            decreases: vec![],
            body: None,
            by_method: None,
            attrs: no_attrs(),
            is_refining: false,
            is_recursive: false,
        }
    }

    pub fn is_effectively_ghost(&self) -> bool {
        self.is_ghost || self.kind.is_ghost_only()
    }
}

impl Method {
    pub fn new(span: &Span, path: &Path, kind: MethodKind, ins: Vec<Var>, outs: Vec<Var>) -> Self {
        Method {
            name: path.last().clone(),
            path: path.clone(),
            span: span.clone(),
            kind,
            is_ghost: kind.is_lemma(),
            is_static: false,
            typ_params: Rc::new(vec![]),
            ins: mk_params(&ins),
            outs: mk_params(&outs),
            requires: vec![],
            modifies: vec![],
            ensures: vec![],
            decreases: vec![],
            body: None,
            attrs: no_attrs(),
            is_refining: false,
            is_recursive: false,
        }
    }
}

impl Field {
    pub fn new(span: &Span, path: &Path, typ: &Typ, is_ghost: bool) -> Self {
        Field {
            name: path.last().clone(),
            path: path.clone(),
            span: span.clone(),
            typ: typ.clone(),
            is_ghost,
            is_static: false,
            is_mutable: true,
            rhs: None,
            attrs: no_attrs(),
            is_refining: false,
        }
    }
}

impl ClassDecl {
    pub fn new(span: &Span, path: &Path) -> Self {
        ClassDecl {
            name: path.last().clone(),
            path: path.clone(),
            span: span.clone(),
            is_trait: false,
            typ_params: Rc::new(vec![]),
            parents: vec![],
            members: vec![],
            attrs: no_attrs(),
        }
    }
}

impl Module {
    pub fn new(span: &Span, name: &str) -> Self {
        Module {
            name: str_ident(name),
            span: span.clone(),
            imports: vec![],
            refines: None,
            decls: vec![],
            attrs: no_attrs(),
            call_graph: None,
        }
    }
}

impl Program {
    pub fn new(name: &str, modules: Vec<Module>) -> Self {
        Program { name: str_ident(name), modules, builtins: BuiltIns::new() }
    }
}

impl Member {
    pub fn name(&self) -> &Ident {
        match self {
            Member::Field(f) => &f.name,
            Member::Function(f) => &f.name,
            Member::Method(m) => &m.name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Member::Field(f) => &f.path,
            Member::Function(f) => &f.path,
            Member::Method(m) => &m.path,
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            Member::Field(f) => &f.span,
            Member::Function(f) => &f.span,
            Member::Method(m) => &m.span,
        }
    }

    pub fn attrs(&self) -> &Attributes {
        match self {
            Member::Field(f) => &f.attrs,
            Member::Function(f) => &f.attrs,
            Member::Method(m) => &m.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut Attributes {
        match self {
            Member::Field(f) => &mut f.attrs,
            Member::Function(f) => &mut f.attrs,
            Member::Method(m) => &mut m.attrs,
        }
    }

    pub fn is_static(&self) -> bool {
        match self {
            Member::Field(f) => f.is_static,
            Member::Function(f) => f.is_static,
            Member::Method(m) => m.is_static,
        }
    }
}

impl TopLevelDecl {
    pub fn name(&self) -> &Ident {
        match self {
            TopLevelDecl::Class(d) => &d.name,
            TopLevelDecl::Datatype(d) => &d.name,
            TopLevelDecl::Newtype(d) => &d.name,
            TopLevelDecl::TypeSynonym(d) => &d.name,
            TopLevelDecl::Iterator(d) => &d.name,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TopLevelDecl::Class(d) => &d.path,
            TopLevelDecl::Datatype(d) => &d.path,
            TopLevelDecl::Newtype(d) => &d.path,
            TopLevelDecl::TypeSynonym(d) => &d.path,
            TopLevelDecl::Iterator(d) => &d.path,
        }
    }

    pub fn members(&self) -> &[Member] {
        match self {
            TopLevelDecl::Class(d) => &d.members,
            TopLevelDecl::Datatype(d) => &d.members,
            TopLevelDecl::Newtype(d) => &d.members,
            TopLevelDecl::TypeSynonym(_) | TopLevelDecl::Iterator(_) => &[],
        }
    }

    /// None for declarations that cannot have members
    pub fn members_mut(&mut self) -> Option<&mut Vec<Member>> {
        match self {
            TopLevelDecl::Class(d) => Some(&mut d.members),
            TopLevelDecl::Datatype(d) => Some(&mut d.members),
            TopLevelDecl::Newtype(d) => Some(&mut d.members),
            TopLevelDecl::TypeSynonym(_) | TopLevelDecl::Iterator(_) => None,
        }
    }

    /// Type of `this` inside members of this declaration
    pub fn this_typ(&self) -> Typ {
        match self {
            TopLevelDecl::Class(d) => Rc::new(TypX::Class {
                path: d.path.clone(),
                args: Rc::new(d.typ_params.iter().map(|x| Rc::new(TypX::TypParam(x.clone()))).collect()),
                nullable: false,
            }),
            TopLevelDecl::Datatype(d) => Rc::new(TypX::Datatype {
                path: d.path.clone(),
                args: Rc::new(d.typ_params.iter().map(|x| Rc::new(TypX::TypParam(x.clone()))).collect()),
            }),
            TopLevelDecl::Newtype(d) => d.base.clone(),
            TopLevelDecl::TypeSynonym(d) => d.rhs.clone(),
            TopLevelDecl::Iterator(d) => class_typ(&d.path, false),
        }
    }
}

pub fn idents(xs: &[&str]) -> Idents {
    Rc::new(xs.iter().map(|x| str_ident(x)).collect())
}
