//! Surface-syntax rendering of trees (used for hover text, diagnostics, and clause comparison)
//! and an s-expression dump of whole programs.

use crate::ast::*;
use sise::Node;
use std::fmt::{self, Write};

fn binary_op_info(op: BinaryOp) -> (u8, &'static str) {
    use BinaryOp::*;
    match op {
        Iff => (1, "<==>"),
        Implies => (2, "==>"),
        And => (3, "&&"),
        Or => (3, "||"),
        Eq => (4, "=="),
        Ne => (4, "!="),
        Lt => (4, "<"),
        Le => (4, "<="),
        Gt => (4, ">"),
        Ge => (4, ">="),
        In => (4, "in"),
        NotIn => (4, "!in"),
        Subset => (4, "<="),
        ProperSubset => (4, "<"),
        Disjoint => (4, "!!"),
        RankLt => (4, "<"),
        RankGt => (4, ">"),
        LeftShift => (5, "<<"),
        RightShift => (5, ">>"),
        Add => (6, "+"),
        Sub => (6, "-"),
        Union => (6, "+"),
        Difference => (6, "-"),
        Concat => (6, "+"),
        MapMerge => (6, "+"),
        MapSubtraction => (6, "-"),
        Mul => (7, "*"),
        Div => (7, "/"),
        Mod => (7, "%"),
        Intersection => (7, "*"),
        BitAnd => (8, "&"),
        BitOr => (8, "|"),
        BitXor => (8, "^"),
    }
}

const PREC_BINDER: u8 = 0;
const PREC_UNARY: u8 = 9;
const PREC_ATOM: u8 = 10;

/// `lo <= x < hi`, printed as a chain when both comparisons share the variable in the middle
fn as_chain(e: &SpannedTyped<ExprX>) -> Option<(&Expr, BinaryOp, &Var, BinaryOp, &Expr)> {
    if let ExprX::Binary(BinaryOp::And, e1, e2) = &e.x {
        if let (ExprX::Binary(op1, lo, mid1), ExprX::Binary(op2, mid2, hi)) = (&e1.x, &e2.x) {
            let ascending = |op: &BinaryOp| matches!(op, BinaryOp::Lt | BinaryOp::Le);
            if let (ExprX::Var(x1), ExprX::Var(x2)) = (&mid1.x, &mid2.x) {
                if ascending(op1) && ascending(op2) && x1.name == x2.name {
                    return Some((lo, *op1, x1, *op2, hi));
                }
            }
        }
    }
    None
}

fn expr_prec(e: &SpannedTyped<ExprX>) -> u8 {
    match &e.x {
        ExprX::Binary(op, _, _) => {
            if as_chain(e).is_some() {
                4
            } else {
                binary_op_info(*op).0
            }
        }
        ExprX::Unary(UnaryOp::Cardinality, _) => PREC_ATOM,
        ExprX::Unary(..) => PREC_UNARY,
        ExprX::TypeTest(..) => 4,
        ExprX::PrefixEq { .. } => 4,
        ExprX::Quant { .. }
        | ExprX::SetComprehension { .. }
        | ExprX::MapComprehension { .. }
        | ExprX::Let { .. }
        | ExprX::LetSuchThat { .. }
        | ExprX::Match { .. }
        | ExprX::If(..)
        | ExprX::Lambda { .. }
        | ExprX::StmtExpr(..) => PREC_BINDER,
        _ => PREC_ATOM,
    }
}

fn is_implicit_this(e: &SpannedTyped<ExprX>) -> bool {
    matches!(&e.x, ExprX::This { implicit: true })
}

struct Printer<'a> {
    out: &'a mut String,
}

impl<'a> Printer<'a> {
    fn s(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn typ(&mut self, typ: &Typ) {
        let _ = write!(self.out, "{}", typ);
    }

    fn list<A>(&mut self, items: &[A], mut f: impl FnMut(&mut Self, &A)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.s(", ");
            }
            f(self, item);
        }
    }

    fn exprs(&mut self, es: &[Expr]) {
        self.list(es, |p, e| p.expr(e, PREC_BINDER));
    }

    fn constant(&mut self, c: &Constant) {
        let _ = match c {
            Constant::Bool(b) => write!(self.out, "{}", b),
            Constant::Int(i) => write!(self.out, "{}", i),
            Constant::Char(c) => write!(self.out, "'{}'", c.escape_default()),
            Constant::Str(s) => write!(self.out, "\"{}\"", s.escape_default()),
            Constant::Null => write!(self.out, "null"),
        };
    }

    fn attrs(&mut self, attrs: &Attributes) {
        for attr in attrs.iter() {
            self.s(" {:");
            self.s(&attr.x.name);
            if attr.x.args.len() > 0 {
                self.s(" ");
                self.exprs(&attr.x.args);
            }
            self.s("}");
        }
    }

    fn bound_vars(&mut self, vars: &Vars) {
        self.list(vars, |p, v| {
            p.s(&v.name);
            p.s(": ");
            p.typ(&v.typ);
        });
    }

    fn frame(&mut self, frame: &FrameExpr) {
        self.expr(&frame.e, PREC_ATOM);
        if let Some(field) = &frame.field {
            self.s("`");
            self.s(field);
        }
    }

    fn frames(&mut self, frames: &[FrameExpr]) {
        self.list(frames, |p, f| p.frame(f));
    }

    fn pattern(&mut self, pat: &Pattern) {
        match &pat.x {
            PatternX::Wildcard => self.s("_"),
            PatternX::Var(v) => self.s(&v.name),
            PatternX::Lit(c) => self.constant(c),
            PatternX::Ctor { variant, args, .. } => {
                self.s(variant);
                if args.len() > 0 {
                    self.s("(");
                    self.list(args, |p, a| p.pattern(a));
                    self.s(")");
                }
            }
        }
    }

    fn binary_child(&mut self, parent: BinaryOp, child: &SpannedTyped<ExprX>, left: bool) {
        use BinaryOp::*;
        let (prec, _) = binary_op_info(parent);
        let ctx = match parent {
            Iff => {
                if left {
                    prec
                } else {
                    prec + 1
                }
            }
            Implies => {
                if left {
                    prec + 1
                } else {
                    prec
                }
            }
            And | Or => {
                if let ExprX::Binary(child_op, _, _) = &child.x {
                    if as_chain(child).is_none() && *child_op != parent && binary_op_info(*child_op).0 == prec {
                        // mixing && and || always gets parentheses
                        prec + 1
                    } else {
                        prec
                    }
                } else {
                    prec
                }
            }
            _ if prec == 4 => prec + 1,
            BitAnd | BitOr | BitXor => {
                if let ExprX::Binary(child_op, _, _) = &child.x {
                    if left && *child_op == parent {
                        prec
                    } else {
                        prec + 1
                    }
                } else {
                    prec + 1
                }
            }
            _ => {
                if left {
                    prec
                } else {
                    prec + 1
                }
            }
        };
        self.expr(child, ctx);
    }

    fn expr(&mut self, e: &SpannedTyped<ExprX>, ctx: u8) {
        let parens = expr_prec(e) < ctx;
        if parens {
            self.s("(");
        }
        self.expr_inner(e);
        if parens {
            self.s(")");
        }
    }

    fn receiver(&mut self, receiver: Option<&Expr>) {
        if let Some(r) = receiver {
            if !is_implicit_this(r) {
                self.expr(r, PREC_ATOM);
                self.s(".");
            }
        }
    }

    fn expr_inner(&mut self, e: &SpannedTyped<ExprX>) {
        match &e.x {
            ExprX::Const(c) => self.constant(c),
            ExprX::This { .. } => self.s("this"),
            ExprX::Var(v) => self.s(&v.name),
            ExprX::Member { obj, member } => {
                self.receiver(Some(obj));
                self.s(member.last());
            }
            ExprX::Index(e1, e2) => {
                self.expr(e1, PREC_ATOM);
                self.s("[");
                self.expr(e2, PREC_BINDER);
                self.s("]");
            }
            ExprX::Slice(e1, lo, hi) => {
                self.expr(e1, PREC_ATOM);
                self.s("[");
                if let Some(lo) = lo {
                    self.expr(lo, PREC_BINDER);
                }
                self.s("..");
                if let Some(hi) = hi {
                    self.expr(hi, PREC_BINDER);
                }
                self.s("]");
            }
            ExprX::Update(e1, e2, e3) => {
                self.expr(e1, PREC_ATOM);
                self.s("[");
                self.expr(e2, PREC_BINDER);
                self.s(" := ");
                self.expr(e3, PREC_BINDER);
                self.s("]");
            }
            ExprX::Display(kind, es) => {
                let (open, close) = match kind {
                    DisplayKind::Set => ("{", "}"),
                    DisplayKind::Multiset => ("multiset{", "}"),
                    DisplayKind::Seq => ("[", "]"),
                };
                self.s(open);
                self.exprs(es);
                self.s(close);
            }
            ExprX::MapDisplay(entries) => {
                self.s("map[");
                self.list(entries, |p, (k, v)| {
                    p.expr(k, PREC_BINDER);
                    p.s(" := ");
                    p.expr(v, PREC_BINDER);
                });
                self.s("]");
            }
            ExprX::Call { fun, receiver, args, .. } => {
                self.receiver(receiver.as_ref());
                self.s(fun.last());
                self.s("(");
                self.exprs(args);
                self.s(")");
            }
            ExprX::Apply(f, args) => {
                self.expr(f, PREC_ATOM);
                self.s("(");
                self.exprs(args);
                self.s(")");
            }
            ExprX::Ctor { variant, args, .. } => {
                self.s(variant);
                if args.len() > 0 {
                    self.s("(");
                    self.exprs(args);
                    self.s(")");
                }
            }
            ExprX::DatatypeUpdate { root, updates, .. } => {
                self.expr(root, PREC_ATOM);
                self.s(".(");
                self.list(updates, |p, (f, v)| {
                    p.s(f);
                    p.s(" := ");
                    p.expr(v, PREC_BINDER);
                });
                self.s(")");
            }
            ExprX::Unary(op, e1) => match op {
                UnaryOp::Not => {
                    self.s("!");
                    self.expr(e1, PREC_UNARY);
                }
                UnaryOp::Neg => {
                    self.s("-");
                    self.expr(e1, PREC_UNARY);
                }
                UnaryOp::Cardinality => {
                    self.s("|");
                    self.expr(e1, PREC_BINDER);
                    self.s("|");
                }
            },
            ExprX::Binary(op, e1, e2) => {
                if let Some((lo, op1, x, op2, hi)) = as_chain(e) {
                    self.expr(lo, 5);
                    self.s(if op1 == BinaryOp::Lt { " < " } else { " <= " });
                    self.s(&x.name);
                    self.s(if op2 == BinaryOp::Lt { " < " } else { " <= " });
                    self.expr(hi, 5);
                    return;
                }
                let (_, text) = binary_op_info(*op);
                self.binary_child(*op, e1, true);
                self.s(" ");
                self.s(text);
                self.s(" ");
                self.binary_child(*op, e2, false);
            }
            ExprX::PrefixEq { negated, k, e1, e2 } => {
                self.expr(e1, 5);
                self.s(if *negated { " !=#[" } else { " ==#[" });
                self.expr(k, PREC_BINDER);
                self.s("] ");
                self.expr(e2, 5);
            }
            ExprX::Old(label, e1) => {
                self.s("old");
                if let Some(label) = label {
                    self.s("@");
                    self.s(label);
                }
                self.s("(");
                self.expr(e1, PREC_BINDER);
                self.s(")");
            }
            ExprX::Fresh(e1) => {
                self.s("fresh(");
                self.expr(e1, PREC_BINDER);
                self.s(")");
            }
            ExprX::Unchanged(frames) => {
                self.s("unchanged(");
                self.frames(frames);
                self.s(")");
            }
            ExprX::TypeTest(e1, t) => {
                self.expr(e1, 5);
                self.s(" is ");
                self.typ(t);
            }
            ExprX::Quant { quant, vars, range, body, attrs } => {
                self.s(match quant {
                    Quant::Forall => "forall ",
                    Quant::Exists => "exists ",
                });
                self.bound_vars(vars);
                self.attrs(attrs);
                if let Some(range) = range {
                    self.s(" | ");
                    self.expr(range, PREC_BINDER);
                }
                self.s(" :: ");
                self.expr(body, PREC_BINDER);
            }
            ExprX::SetComprehension { finite, vars, range, term } => {
                self.s(if *finite { "set " } else { "iset " });
                self.bound_vars(vars);
                self.s(" | ");
                self.expr(range, PREC_BINDER);
                if let Some(term) = term {
                    self.s(" :: ");
                    self.expr(term, PREC_BINDER);
                }
            }
            ExprX::MapComprehension { finite, vars, range, key, value } => {
                self.s(if *finite { "map " } else { "imap " });
                self.bound_vars(vars);
                self.s(" | ");
                self.expr(range, PREC_BINDER);
                self.s(" :: ");
                if let Some(key) = key {
                    self.expr(key, PREC_BINDER);
                    self.s(" := ");
                }
                self.expr(value, PREC_BINDER);
            }
            ExprX::Let { vars, rhss, body } => {
                if vars.iter().all(|v| v.is_ghost.get()) {
                    self.s("ghost ");
                }
                self.s("var ");
                self.list(vars, |p, v| p.s(&v.name));
                self.s(" := ");
                self.exprs(rhss);
                self.s("; ");
                self.expr(body, PREC_BINDER);
            }
            ExprX::LetSuchThat { vars, constraint, body, .. } => {
                self.s("var ");
                self.list(vars, |p, v| p.s(&v.name));
                self.s(" :| ");
                self.expr(constraint, PREC_BINDER);
                self.s("; ");
                self.expr(body, PREC_BINDER);
            }
            ExprX::Match { scrutinee, arms } => {
                self.s("match ");
                self.expr(scrutinee, PREC_ATOM);
                for arm in arms.iter() {
                    self.s(" case ");
                    self.pattern(&arm.x.pattern);
                    self.s(" => ");
                    self.expr(&arm.x.body, PREC_ATOM);
                }
            }
            ExprX::If(c, e1, e2) => {
                self.s("if ");
                self.expr(c, PREC_BINDER);
                self.s(" then ");
                self.expr(e1, PREC_BINDER);
                self.s(" else ");
                self.expr(e2, PREC_BINDER);
            }
            ExprX::Lambda { params, reads, requires, body } => {
                self.s("(");
                self.bound_vars(params);
                self.s(")");
                if reads.len() > 0 {
                    self.s(" reads ");
                    self.frames(reads);
                }
                if let Some(req) = requires {
                    self.s(" requires ");
                    self.expr(req, PREC_BINDER);
                }
                self.s(" => ");
                self.expr(body, PREC_BINDER);
            }
            ExprX::StmtExpr(stmt, e1) => {
                self.stmt(stmt, None);
                self.s(" ");
                self.expr(e1, PREC_BINDER);
            }
        }
    }

    fn rhs(&mut self, rhs: &Rhs) {
        match rhs {
            Rhs::Expr(e) => self.expr(e, PREC_BINDER),
            Rhs::Havoc => self.s("*"),
            Rhs::New { typ, ctor, args } => {
                self.s("new ");
                self.typ(typ);
                if let Some(ctor) = ctor {
                    self.s(".");
                    self.s(ctor.last());
                    self.s("(");
                    self.exprs(args);
                    self.s(")");
                }
            }
        }
    }

    fn newline(&mut self, indent: Option<usize>) {
        match indent {
            None => self.s(" "),
            Some(n) => {
                self.s("\n");
                for _ in 0..n {
                    self.s("  ");
                }
            }
        }
    }

    /// `indent` of None prints the statement on a single line
    fn stmt(&mut self, stmt: &Spanned<StmtX>, indent: Option<usize>) {
        match &stmt.x {
            StmtX::VarDecl { vars, init } => {
                if vars.iter().all(|v| v.is_ghost.get()) {
                    self.s("ghost ");
                }
                self.s("var ");
                self.bound_vars(vars);
                if let Some(init) = init {
                    self.s(" := ");
                    self.rhs(init);
                }
                self.s(";");
            }
            StmtX::Assign { lhs, rhs } => {
                self.expr(lhs, PREC_ATOM);
                self.s(" := ");
                self.rhs(rhs);
                self.s(";");
            }
            StmtX::Call { lhss, method, receiver, args } => {
                if lhss.len() > 0 {
                    self.exprs(lhss);
                    self.s(" := ");
                }
                self.receiver(receiver.as_ref());
                self.s(method.last());
                self.s("(");
                self.exprs(args);
                self.s(");");
            }
            StmtX::Assert { e, proof } => {
                self.s("assert ");
                self.expr(e, PREC_BINDER);
                match proof {
                    None => self.s(";"),
                    Some(proof) => {
                        self.s(" by ");
                        self.stmt(proof, indent);
                    }
                }
            }
            StmtX::Assume(e) => {
                self.s("assume ");
                self.expr(e, PREC_BINDER);
                self.s(";");
            }
            StmtX::Print(es) => {
                self.s("print ");
                self.exprs(es);
                self.s(";");
            }
            StmtX::Return(es) | StmtX::Yield(es) => {
                self.s(if matches!(&stmt.x, StmtX::Return(_)) { "return" } else { "yield" });
                if let Some(es) = es {
                    self.s(" ");
                    self.exprs(es);
                }
                self.s(";");
            }
            StmtX::Block(stmts) => {
                self.s("{");
                let inner = indent.map(|n| n + 1);
                for s in stmts.iter() {
                    self.newline(inner);
                    self.stmt(s, inner);
                }
                self.newline(indent);
                self.s("}");
            }
            StmtX::If { cond, thn, els } => {
                self.s("if ");
                match cond {
                    None => self.s("*"),
                    Some(c) => self.expr(c, PREC_BINDER),
                }
                self.s(" ");
                self.stmt(thn, indent);
                if let Some(els) = els {
                    self.s(" else ");
                    self.stmt(els, indent);
                }
            }
            StmtX::While { cond, invs, decreases, modifies, body } => {
                self.s("while ");
                match cond {
                    None => self.s("*"),
                    Some(c) => self.expr(c, PREC_BINDER),
                }
                let inner = indent.map(|n| n + 1);
                for inv in invs.iter() {
                    self.newline(inner);
                    self.s("invariant ");
                    self.expr(inv, PREC_BINDER);
                }
                if modifies.len() > 0 {
                    self.newline(inner);
                    self.s("modifies ");
                    self.frames(modifies);
                }
                if decreases.len() > 0 {
                    self.newline(inner);
                    self.s("decreases ");
                    self.exprs(decreases);
                }
                if let Some(body) = body {
                    self.newline(indent);
                    self.stmt(body, indent);
                }
            }
            StmtX::Forall { vars, range, ensures, body, attrs, .. } => {
                self.s("forall ");
                self.bound_vars(vars);
                self.attrs(attrs);
                self.s(" | ");
                self.expr(range, PREC_BINDER);
                let inner = indent.map(|n| n + 1);
                for ens in ensures.iter() {
                    self.newline(inner);
                    self.s("ensures ");
                    self.expr(ens, PREC_BINDER);
                }
                if let Some(body) = body {
                    self.s(" ");
                    self.stmt(body, indent);
                }
            }
            StmtX::Match { scrutinee, arms } => {
                self.s("match ");
                self.expr(scrutinee, PREC_ATOM);
                self.s(" {");
                let inner = indent.map(|n| n + 1);
                for arm in arms.iter() {
                    self.newline(inner);
                    self.s("case ");
                    self.pattern(&arm.x.pattern);
                    self.s(" => ");
                    self.stmt(&arm.x.body, inner);
                }
                self.newline(indent);
                self.s("}");
            }
        }
    }

    fn params(&mut self, params: &Params) {
        self.s("(");
        self.list(params, |p, param| {
            if param.var.is_ghost.get() {
                p.s("ghost ");
            }
            p.s(&param.var.name);
            p.s(": ");
            p.typ(&param.var.typ);
            if let Some(d) = &param.default_value {
                p.s(" := ");
                p.expr(d, PREC_BINDER);
            }
        });
        self.s(")");
    }

    fn clause(&mut self, keyword: &str, e: &Expr) {
        self.s("\n  ");
        self.s(keyword);
        self.s(" ");
        self.expr(e, PREC_BINDER);
    }

    fn typ_params(&mut self, typ_params: &Idents) {
        if typ_params.len() > 0 {
            self.s("<");
            self.list(typ_params, |p, x| p.s(x));
            self.s(">");
        }
    }

    fn member(&mut self, member: &Member) {
        match member {
            Member::Field(f) => {
                if f.is_static {
                    self.s("static ");
                }
                if f.is_ghost {
                    self.s("ghost ");
                }
                self.s(if f.is_mutable { "var " } else { "const " });
                self.s(&f.name);
                self.attrs(&f.attrs);
                self.s(": ");
                self.typ(&f.typ);
                if let Some(rhs) = &f.rhs {
                    self.s(" := ");
                    self.expr(rhs, PREC_BINDER);
                }
            }
            Member::Function(f) => {
                if f.is_static {
                    self.s("static ");
                }
                self.s(f.kind.keyword(f.is_ghost));
                self.attrs(&f.attrs);
                self.s(" ");
                self.s(&f.name);
                self.typ_params(&f.typ_params);
                self.params(&f.params);
                if !f.kind.is_predicate() {
                    self.s(": ");
                    self.typ(&f.ret.typ);
                }
                if f.reads.len() > 0 {
                    self.s("\n  reads ");
                    self.frames(&f.reads);
                }
                for e in f.requires.iter() {
                    self.clause("requires", e);
                }
                for e in f.ensures.iter() {
                    self.clause("ensures", e);
                }
                if f.decreases.len() > 0 {
                    self.s("\n  decreases ");
                    self.exprs(&f.decreases);
                }
                if let Some(body) = &f.body {
                    self.s("\n{\n  ");
                    self.expr(body, PREC_BINDER);
                    self.s("\n}");
                }
                if let Some(by_method) = &f.by_method {
                    self.s(" by method ");
                    self.stmt(by_method, Some(0));
                }
            }
            Member::Method(m) => {
                if m.is_static {
                    self.s("static ");
                }
                if m.is_ghost && !m.kind.is_lemma() {
                    self.s("ghost ");
                }
                self.s(m.kind.keyword());
                self.attrs(&m.attrs);
                self.s(" ");
                self.s(&m.name);
                self.typ_params(&m.typ_params);
                self.params(&m.ins);
                if m.outs.len() > 0 {
                    self.s(" returns ");
                    self.params(&m.outs);
                }
                for e in m.requires.iter() {
                    self.clause("requires", e);
                }
                if m.modifies.len() > 0 {
                    self.s("\n  modifies ");
                    self.frames(&m.modifies);
                }
                for e in m.ensures.iter() {
                    self.clause("ensures", e);
                }
                if m.decreases.len() > 0 {
                    self.s("\n  decreases ");
                    self.exprs(&m.decreases);
                }
                if let Some(body) = &m.body {
                    self.s("\n");
                    self.stmt(body, Some(0));
                }
            }
        }
    }

    fn members(&mut self, members: &[Member]) {
        self.s(" {");
        for m in members {
            self.s("\n");
            let mut inner = String::new();
            Printer { out: &mut inner }.member(m);
            for line in inner.lines() {
                self.s("\n  ");
                self.s(line);
            }
        }
        self.s("\n}");
    }

    fn decl(&mut self, decl: &TopLevelDecl) {
        match decl {
            TopLevelDecl::Class(c) => {
                self.s(if c.is_trait { "trait" } else { "class" });
                self.attrs(&c.attrs);
                self.s(" ");
                self.s(&c.name);
                self.typ_params(&c.typ_params);
                if c.parents.len() > 0 {
                    self.s(" extends ");
                    self.list(&c.parents, |p, t| p.typ(t));
                }
                self.members(&c.members);
            }
            TopLevelDecl::Datatype(d) => {
                self.s(if d.is_codatatype { "codatatype" } else { "datatype" });
                self.attrs(&d.attrs);
                self.s(" ");
                self.s(&d.name);
                self.typ_params(&d.typ_params);
                self.s(" = ");
                for (i, ctor) in d.ctors.iter().enumerate() {
                    if i > 0 {
                        self.s(" | ");
                    }
                    if ctor.is_ghost {
                        self.s("ghost ");
                    }
                    self.s(&ctor.name);
                    if ctor.params.len() > 0 {
                        self.params(&ctor.params);
                    }
                }
                if d.members.len() > 0 {
                    self.members(&d.members);
                }
            }
            TopLevelDecl::Newtype(n) => {
                self.s("newtype");
                self.attrs(&n.attrs);
                self.s(" ");
                self.s(&n.name);
                self.s(" = ");
                match (&n.var, &n.constraint) {
                    (Some(v), Some(c)) => {
                        self.s(&v.name);
                        self.s(": ");
                        self.typ(&n.base);
                        self.s(" | ");
                        self.expr(c, PREC_BINDER);
                    }
                    _ => self.typ(&n.base),
                }
                if n.members.len() > 0 {
                    self.members(&n.members);
                }
            }
            TopLevelDecl::TypeSynonym(t) => {
                self.s("type");
                self.attrs(&t.attrs);
                self.s(" ");
                self.s(&t.name);
                self.typ_params(&t.typ_params);
                self.s(" = ");
                self.typ(&t.rhs);
            }
            TopLevelDecl::Iterator(it) => {
                self.s("iterator");
                self.attrs(&it.attrs);
                self.s(" ");
                self.s(&it.name);
                self.params(&it.ins);
                self.s(" yields ");
                self.params(&it.outs);
                for e in it.requires.iter() {
                    self.clause("requires", e);
                }
                for e in it.yield_requires.iter() {
                    self.clause("yield requires", e);
                }
                for e in it.yield_ensures.iter() {
                    self.clause("yield ensures", e);
                }
                for e in it.ensures.iter() {
                    self.clause("ensures", e);
                }
                if let Some(body) = &it.body {
                    self.s("\n");
                    self.stmt(body, Some(0));
                }
            }
        }
    }
}

impl fmt::Display for TypX {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn args(f: &mut fmt::Formatter<'_>, typs: &Typs) -> fmt::Result {
            if typs.len() > 0 {
                write!(f, "<")?;
                for (i, t) in typs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ">")?;
            }
            Ok(())
        }
        match self {
            TypX::Bool => write!(f, "bool"),
            TypX::Int => write!(f, "int"),
            TypX::Nat => write!(f, "nat"),
            TypX::Real => write!(f, "real"),
            TypX::Char => write!(f, "char"),
            TypX::String => write!(f, "string"),
            TypX::Set { finite, elem } => {
                write!(f, "{}<{}>", if *finite { "set" } else { "iset" }, elem)
            }
            TypX::Multiset(t) => write!(f, "multiset<{}>", t),
            TypX::Seq(t) => write!(f, "seq<{}>", t),
            TypX::Map { finite, key, value } => {
                write!(f, "{}<{}, {}>", if *finite { "map" } else { "imap" }, key, value)
            }
            TypX::Object { nullable } => write!(f, "object{}", if *nullable { "?" } else { "" }),
            TypX::Class { path, args: typs, nullable } => {
                write!(f, "{}", path.last())?;
                args(f, typs)?;
                if *nullable {
                    write!(f, "?")?;
                }
                Ok(())
            }
            TypX::Datatype { path, args: typs } => {
                write!(f, "{}", path.last())?;
                args(f, typs)
            }
            TypX::TypParam(x) => write!(f, "{}", x),
            TypX::Arrow(params, ret) => {
                write!(f, "(")?;
                for (i, t) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ") -> {}", ret)
            }
        }
    }
}

pub fn expr_to_string(e: &Expr) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.expr(e, PREC_BINDER);
    out
}

pub fn stmt_to_string(s: &Stmt) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.stmt(s, None);
    out
}

pub fn frame_to_string(frame: &FrameExpr) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.frame(frame);
    out
}

pub fn attrs_to_string(attrs: &Attributes) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.attrs(attrs);
    out.trim_start().to_string()
}

pub fn member_to_string(member: &Member) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.member(member);
    out
}

pub fn decl_to_string(decl: &TopLevelDecl) -> String {
    let mut out = String::new();
    Printer { out: &mut out }.decl(decl);
    out
}

pub fn module_to_string(module: &Module) -> String {
    let mut out = String::new();
    let _ = write!(out, "module {} {{", module.name);
    for d in module.decls.iter() {
        out.push_str("\n");
        for line in decl_to_string(d).lines() {
            out.push_str("\n  ");
            out.push_str(line);
        }
    }
    out.push_str("\n}");
    out
}

impl fmt::Display for SpannedTyped<ExprX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        Printer { out: &mut out }.expr(self, PREC_BINDER);
        write!(f, "{}", out)
    }
}

impl fmt::Display for Spanned<StmtX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        Printer { out: &mut out }.stmt(self, None);
        write!(f, "{}", out)
    }
}

// S-expression dump of whole programs

const DUMP_BREAK_ON: &[&str] = &["module", "class", "trait", "datatype", "newtype", "iterator"];
const DUMP_BREAK_AFTER: &[&str] = &["field", "function", "method", ":requires", ":ensures"];

pub struct NodeWriter<'a> {
    pub break_on: std::collections::HashSet<&'a str>,
    pub break_after: std::collections::HashSet<&'a str>,
}

impl<'a> NodeWriter<'a> {
    pub fn new() -> Self {
        NodeWriter {
            break_on: DUMP_BREAK_ON.iter().copied().collect(),
            break_after: DUMP_BREAK_AFTER.iter().copied().collect(),
        }
    }

    fn write_node(
        &mut self,
        writer: &mut sise::SpacedStringWriter,
        node: &Node,
        break_len: usize,
        brk: bool,
    ) {
        use sise::Writer;
        let opts =
            sise::SpacedStringWriterNodeOptions { break_line_len: if brk { 0 } else { break_len } };
        match node {
            Node::Atom(a) => {
                writer.write_atom(a, opts).unwrap();
            }
            Node::List(l) => {
                writer.begin_list(opts).unwrap();
                let mut brk = false;
                for n in l {
                    self.write_node(writer, n, break_len + 1, brk);
                    brk = false;
                    if let Node::Atom(a) = n {
                        if self.break_on.contains(a.as_str()) || self.break_after.contains(a.as_str()) {
                            brk = true;
                        }
                    }
                }
                writer.end_list(()).unwrap();
            }
        }
    }

    pub fn node_to_string(&mut self, node: &Node) -> String {
        use sise::Writer;
        let indentation = " ";
        let style = sise::SpacedStringWriterStyle { line_break: &("\n".to_string()), indentation };
        let mut result = String::new();
        let mut string_writer = sise::SpacedStringWriter::new(style, &mut result);
        self.write_node(&mut string_writer, node, 100, false);
        string_writer.finish(()).unwrap();
        result
    }
}

fn atom(s: &str) -> Node {
    Node::Atom(s.to_string())
}

fn quoted(s: &str) -> Node {
    Node::Atom(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " ")))
}

fn exprs_node(tag: &str, es: &[Expr]) -> Node {
    let mut nodes = vec![atom(tag)];
    nodes.extend(es.iter().map(|e| quoted(&expr_to_string(e))));
    Node::List(nodes)
}

fn frames_node(tag: &str, frames: &[FrameExpr]) -> Node {
    let mut nodes = vec![atom(tag)];
    nodes.extend(frames.iter().map(|f| quoted(&frame_to_string(f))));
    Node::List(nodes)
}

fn member_node(member: &Member) -> Node {
    match member {
        Member::Field(f) => Node::List(vec![
            atom("field"),
            atom(&f.name),
            quoted(&f.typ.to_string()),
            atom(if f.is_ghost { ":ghost" } else { ":compiled" }),
        ]),
        Member::Function(f) => {
            let mut nodes = vec![atom("function"), atom(&f.name), quoted(&attrs_to_string(&f.attrs))];
            nodes.push(exprs_node(":requires", &f.requires));
            nodes.push(frames_node(":reads", &f.reads));
            nodes.push(exprs_node(":ensures", &f.ensures));
            nodes.push(exprs_node(":decreases", &f.decreases));
            if let Some(body) = &f.body {
                nodes.push(Node::List(vec![atom(":body"), quoted(&expr_to_string(body))]));
            }
            Node::List(nodes)
        }
        Member::Method(m) => {
            let mut nodes = vec![atom("method"), atom(&m.name), quoted(&attrs_to_string(&m.attrs))];
            nodes.push(exprs_node(":requires", &m.requires));
            nodes.push(frames_node(":modifies", &m.modifies));
            nodes.push(exprs_node(":ensures", &m.ensures));
            nodes.push(exprs_node(":decreases", &m.decreases));
            if let Some(body) = &m.body {
                let mut stmts = vec![atom(":body")];
                stmts.extend(crate::ast_util::stmt_as_block(body).iter().map(|s| quoted(&stmt_to_string(s))));
                nodes.push(Node::List(stmts));
            }
            Node::List(nodes)
        }
    }
}

fn decl_node(decl: &TopLevelDecl) -> Node {
    let tag = match decl {
        TopLevelDecl::Class(c) if c.is_trait => "trait",
        TopLevelDecl::Class(_) => "class",
        TopLevelDecl::Datatype(_) => "datatype",
        TopLevelDecl::Newtype(_) => "newtype",
        TopLevelDecl::TypeSynonym(_) => "type",
        TopLevelDecl::Iterator(_) => "iterator",
    };
    let mut nodes = vec![atom(tag), atom(decl.name())];
    nodes.extend(decl.members().iter().map(member_node));
    if let TopLevelDecl::Iterator(it) = decl {
        nodes.push(exprs_node(":requires", &it.requires));
        nodes.push(exprs_node(":ensures", &it.ensures));
    }
    Node::List(nodes)
}

pub fn program_to_node(program: &Program) -> Node {
    let mut nodes = vec![atom("program"), atom(&program.name)];
    for module in program.modules.iter() {
        let mut m = vec![atom("module"), atom(&module.name)];
        m.push(Node::List(
            std::iter::once(atom(":imports")).chain(module.imports.iter().map(|i| atom(i))).collect(),
        ));
        m.extend(module.decls.iter().map(decl_node));
        nodes.push(Node::List(m));
    }
    Node::List(nodes)
}

pub fn write_program(writer: &mut impl std::io::Write, program: &Program) -> std::io::Result<()> {
    let mut nw = NodeWriter::new();
    writeln!(writer, "{}", nw.node_to_string(&program_to_node(program)))
}
