//! Resolved program trees.
//!
//! Expressions and statements are immutable, reference-counted nodes; a rewrite builds a new
//! node rather than mutating an old one.
//! The few facts the compilability classifier records on a node live in `Cell`/`RefCell`s:
//! the ghost flag of a variable, the routing of a call, the compile form of a datatype update,
//! and the cached bounds of a let-such-that.
//! Declarations are plain owned structs that rewriters mutate in place.

use crate::bounds::BoundedPool;
use crate::messages::Message;
pub use crate::messages::Span;
use crate::scc::Graph;
use num_bigint::BigInt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type VirErr = Message;
pub type Ident = Rc<String>;
pub type Idents = Rc<Vec<Ident>>;

/// Fully qualified name of a declaration: module, then enclosing type, then member
pub type Path = Rc<PathX>;
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone)]
pub struct PathX {
    pub segments: Idents,
}

/// Callables (functions, methods, lemmas, constructors, iterators) are identified by path
pub type Fun = Path;

#[derive(Debug, Clone)]
pub struct Spanned<X> {
    pub span: Span,
    pub x: X,
}

#[derive(Debug, Clone)]
pub struct SpannedTyped<X> {
    pub span: Span,
    pub typ: Typ,
    pub x: X,
}

pub type Typ = Rc<TypX>;
pub type Typs = Rc<Vec<Typ>>;
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TypX {
    Bool,
    Int,
    Nat,
    Real,
    Char,
    String,
    /// `set<T>` when finite, `iset<T>` otherwise
    Set { finite: bool, elem: Typ },
    Multiset(Typ),
    Seq(Typ),
    /// `map<K, V>` when finite, `imap<K, V>` otherwise
    Map { finite: bool, key: Typ, value: Typ },
    /// `object` or `object?`
    Object { nullable: bool },
    /// class or trait type; `nullable` selects the `C?` form
    Class { path: Path, args: Typs, nullable: bool },
    Datatype { path: Path, args: Typs },
    TypParam(Ident),
    Arrow(Typs, Typ),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Bool(bool),
    Int(BigInt),
    Char(char),
    Str(Rc<String>),
    Null,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    /// `|e|`
    Cardinality,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Iff,
    Implies,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Subset,
    ProperSubset,
    Disjoint,
    /// well-founded rank comparison of datatype values
    RankLt,
    RankGt,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LeftShift,
    RightShift,
    BitAnd,
    BitOr,
    BitXor,
    /// set or multiset `+`
    Union,
    /// set or multiset `*`
    Intersection,
    /// set or multiset `-`
    Difference,
    /// sequence `+`
    Concat,
    MapMerge,
    MapSubtraction,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Quant {
    Forall,
    Exists,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DisplayKind {
    Set,
    Multiset,
    Seq,
}

/// How a call to a function is compiled, decided by the compilability classifier
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallRoute {
    Undecided,
    Function,
    /// ghost function with a compiled by-method body
    ByMethod,
}

pub type Var = Rc<VarX>;
pub type Vars = Rc<Vec<Var>>;
/// Declaration of a local, formal, or bound variable.
/// Every occurrence refers back to the same `VarX`, so promoting it to ghost is seen everywhere.
#[derive(Debug)]
pub struct VarX {
    pub name: Ident,
    pub typ: Typ,
    pub is_ghost: Cell<bool>,
    pub span: Span,
}

pub type Param = Rc<ParamX>;
pub type Params = Rc<Vec<Param>>;
#[derive(Debug)]
pub struct ParamX {
    pub var: Var,
    pub default_value: Option<Expr>,
}

pub type Attribute = Rc<Spanned<AttributeX>>;
pub type Attributes = Rc<Vec<Attribute>>;
#[derive(Debug)]
pub struct AttributeX {
    pub name: Ident,
    pub args: Exprs,
}

/// `e` or `` e`f `` in reads, modifies, and unchanged clauses
pub type FrameExpr = Rc<FrameExprX>;
pub type FrameExprs = Rc<Vec<FrameExpr>>;
#[derive(Debug)]
pub struct FrameExprX {
    pub e: Expr,
    pub field: Option<Ident>,
}

pub type Pattern = Rc<SpannedTyped<PatternX>>;
pub type Patterns = Rc<Vec<Pattern>>;
#[derive(Debug)]
pub enum PatternX {
    Wildcard,
    Var(Var),
    Ctor { datatype: Path, variant: Ident, args: Patterns },
    Lit(Constant),
}

pub type Arm = Rc<Spanned<ArmX>>;
pub type Arms = Rc<Vec<Arm>>;
#[derive(Debug)]
pub struct ArmX {
    pub pattern: Pattern,
    pub body: Expr,
}

pub type StmtArm = Rc<Spanned<StmtArmX>>;
pub type StmtArms = Rc<Vec<StmtArm>>;
#[derive(Debug)]
pub struct StmtArmX {
    pub pattern: Pattern,
    pub body: Stmt,
}

pub type Expr = Rc<SpannedTyped<ExprX>>;
pub type Exprs = Rc<Vec<Expr>>;
#[derive(Debug)]
pub enum ExprX {
    Const(Constant),
    /// `implicit` is set when the receiver was not written by the user
    This { implicit: bool },
    Var(Var),
    /// field, constant, datatype destructor, or function used as a value
    Member { obj: Expr, member: Path },
    /// `s[i]`, `m[k]`
    Index(Expr, Expr),
    /// `s[lo..hi]`
    Slice(Expr, Option<Expr>, Option<Expr>),
    /// `s[i := v]`, `m[k := v]`
    Update(Expr, Expr, Expr),
    Display(DisplayKind, Exprs),
    MapDisplay(Rc<Vec<(Expr, Expr)>>),
    Call { fun: Fun, receiver: Option<Expr>, args: Exprs, route: Cell<CallRoute> },
    /// application of a function-typed value
    Apply(Expr, Exprs),
    Ctor { datatype: Path, variant: Ident, args: Exprs },
    /// `root.(f := v, ...)`; `compiled` is set once the classifier has chosen the compile form
    DatatypeUpdate { root: Expr, updates: Rc<Vec<(Ident, Expr)>>, compiled: Cell<bool> },
    Unary(UnaryOp, Expr),
    Binary(BinaryOp, Expr, Expr),
    /// ternary prefix (in)equality `e1 ==#[k] e2` of co-datatype values
    PrefixEq { negated: bool, k: Expr, e1: Expr, e2: Expr },
    /// `old(e)` or `old@label(e)`
    Old(Option<Ident>, Expr),
    Fresh(Expr),
    Unchanged(FrameExprs),
    /// `e is T`
    TypeTest(Expr, Typ),
    Quant { quant: Quant, vars: Vars, range: Option<Expr>, body: Expr, attrs: Attributes },
    SetComprehension { finite: bool, vars: Vars, range: Expr, term: Option<Expr> },
    MapComprehension { finite: bool, vars: Vars, range: Expr, key: Option<Expr>, value: Expr },
    /// exact let: `var x, y := e1, e2; body`
    Let { vars: Vars, rhss: Exprs, body: Expr },
    /// `var x :| constraint; body`; `bounds` is cached by the classifier
    LetSuchThat {
        vars: Vars,
        constraint: Expr,
        body: Expr,
        bounds: RefCell<Option<Rc<Vec<BoundedPool>>>>,
    },
    Match { scrutinee: Expr, arms: Arms },
    If(Expr, Expr, Expr),
    Lambda { params: Vars, reads: FrameExprs, requires: Option<Expr>, body: Expr },
    /// a statement (typically a proof) followed by an expression
    StmtExpr(Stmt, Expr),
}

#[derive(Debug, Clone)]
pub enum Rhs {
    Expr(Expr),
    /// `new C` or `new C.Init(args)`
    New { typ: Typ, ctor: Option<Fun>, args: Exprs },
    /// `*`
    Havoc,
}

pub type Stmt = Rc<Spanned<StmtX>>;
pub type Stmts = Rc<Vec<Stmt>>;
#[derive(Debug)]
pub enum StmtX {
    /// `var x := rhs;` (`ghost var` when the variables are ghost)
    VarDecl { vars: Vars, init: Option<Rhs> },
    Assign { lhs: Expr, rhs: Rhs },
    Call { lhss: Exprs, method: Fun, receiver: Option<Expr>, args: Exprs },
    Assert { e: Expr, proof: Option<Stmt> },
    Assume(Expr),
    Print(Exprs),
    Return(Option<Exprs>),
    Yield(Option<Exprs>),
    Block(Stmts),
    /// `cond` is `None` for the nondeterministic `if *`
    If { cond: Option<Expr>, thn: Stmt, els: Option<Stmt> },
    While {
        cond: Option<Expr>,
        invs: Exprs,
        decreases: Exprs,
        modifies: FrameExprs,
        body: Option<Stmt>,
    },
    /// aggregate statement; `forall_exprs` holds the equivalent quantified facts
    /// once the forall rewriter has processed it
    Forall {
        vars: Vars,
        range: Expr,
        ensures: Exprs,
        body: Option<Stmt>,
        attrs: Attributes,
        forall_exprs: Option<Exprs>,
    },
    Match { scrutinee: Expr, arms: StmtArms },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Function,
    Predicate,
    TwoStateFunction,
    TwoStatePredicate,
    LeastPredicate,
    GreatestPredicate,
    /// prefix predicate of an extreme predicate
    PrefixPredicate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Method,
    Constructor,
    Lemma,
    TwoStateLemma,
    LeastLemma,
    GreatestLemma,
    /// prefix lemma of an extreme lemma
    PrefixLemma,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub typ: Typ,
    pub is_ghost: bool,
    pub is_static: bool,
    /// `var` (true) or `const` (false)
    pub is_mutable: bool,
    /// defining expression of a `const`
    pub rhs: Option<Expr>,
    pub attrs: Attributes,
    /// inherited from a refined module
    pub is_refining: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub kind: FunctionKind,
    pub is_ghost: bool,
    pub is_static: bool,
    pub typ_params: Idents,
    pub params: Params,
    pub ret: Var,
    pub requires: Vec<Expr>,
    pub reads: Vec<FrameExpr>,
    pub ensures: Vec<Expr>,
    pub decreases: Vec<Expr>,
    pub body: Option<Expr>,
    /// compiled implementation of a ghost function
    pub by_method: Option<Stmt>,
    pub attrs: Attributes,
    pub is_refining: bool,
    /// set once the call graph is known
    pub is_recursive: bool,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub kind: MethodKind,
    pub is_ghost: bool,
    pub is_static: bool,
    pub typ_params: Idents,
    pub ins: Params,
    pub outs: Params,
    pub requires: Vec<Expr>,
    pub modifies: Vec<FrameExpr>,
    pub ensures: Vec<Expr>,
    pub decreases: Vec<Expr>,
    pub body: Option<Stmt>,
    pub attrs: Attributes,
    pub is_refining: bool,
    pub is_recursive: bool,
}

#[derive(Debug, Clone)]
pub enum Member {
    Field(Field),
    Function(Function),
    Method(Method),
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub is_trait: bool,
    pub typ_params: Idents,
    /// extended traits, in terms of `typ_params`
    pub parents: Vec<Typ>,
    pub members: Vec<Member>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone)]
pub struct DatatypeCtor {
    pub name: Ident,
    pub span: Span,
    pub is_ghost: bool,
    pub params: Params,
}

#[derive(Debug, Clone)]
pub struct DatatypeDecl {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub is_codatatype: bool,
    pub typ_params: Idents,
    pub ctors: Vec<DatatypeCtor>,
    pub members: Vec<Member>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone)]
pub struct NewtypeDecl {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub base: Typ,
    pub var: Option<Var>,
    pub constraint: Option<Expr>,
    pub members: Vec<Member>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone)]
pub struct TypeSynonymDecl {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub typ_params: Idents,
    pub rhs: Typ,
    pub attrs: Attributes,
}

#[derive(Debug, Clone)]
pub struct IteratorDecl {
    pub name: Ident,
    pub path: Path,
    pub span: Span,
    pub ins: Params,
    pub outs: Params,
    pub requires: Vec<Expr>,
    pub ensures: Vec<Expr>,
    pub yield_requires: Vec<Expr>,
    pub yield_ensures: Vec<Expr>,
    pub reads: Vec<FrameExpr>,
    pub modifies: Vec<FrameExpr>,
    pub decreases: Vec<Expr>,
    pub body: Option<Stmt>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone)]
pub enum TopLevelDecl {
    Class(ClassDecl),
    Datatype(DatatypeDecl),
    Newtype(NewtypeDecl),
    TypeSynonym(TypeSynonymDecl),
    Iterator(IteratorDecl),
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: Ident,
    pub span: Span,
    pub imports: Vec<Ident>,
    /// name of the module this one refines, if any
    pub refines: Option<Ident>,
    pub decls: Vec<TopLevelDecl>,
    pub attrs: Attributes,
    /// filled in after bare resolution
    pub call_graph: Option<Rc<Graph<Fun>>>,
}

/// Canonical handles for the types rewriters synthesize
#[derive(Debug, Clone)]
pub struct BuiltIns {
    pub bool_typ: Typ,
    pub int_typ: Typ,
    pub object_typ: Typ,
    pub nullable_object_typ: Typ,
    pub set_of_objects_typ: Typ,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: Ident,
    pub modules: Vec<Module>,
    pub builtins: BuiltIns,
}
