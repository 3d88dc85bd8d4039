//! Per-module call graph: an edge `A -> B` whenever the specification or body of `A` mentions
//! the callable `B`.
//! Computing its SCCs tells us which functions are recursive and the order in which
//! callees are processed before callers.

use crate::ast::*;
use crate::ast_visitor::{walk_decl, walk_member, AstVisitor, VisitorControlFlow};
use crate::messages::Reporter;
use crate::scc::Graph;
use std::rc::Rc;

/// Collects every callable mentioned by the nodes it walks
#[derive(Default)]
struct Callees {
    out: Vec<Fun>,
}

impl AstVisitor for Callees {
    type Stop = ();

    fn visit_expr(&mut self, expr: &Expr) -> VisitorControlFlow<()> {
        match &expr.x {
            ExprX::Call { fun, .. } => self.out.push(fun.clone()),
            // a function used as a value
            ExprX::Member { member, .. } => self.out.push(member.clone()),
            _ => {}
        }
        VisitorControlFlow::Recurse
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> VisitorControlFlow<()> {
        match &stmt.x {
            StmtX::Call { method, .. } => self.out.push(method.clone()),
            StmtX::VarDecl { init: Some(Rhs::New { ctor: Some(ctor), .. }), .. }
            | StmtX::Assign { rhs: Rhs::New { ctor: Some(ctor), .. }, .. } => self.out.push(ctor.clone()),
            _ => {}
        }
        VisitorControlFlow::Recurse
    }
}

fn member_callees(member: &Member) -> Vec<Fun> {
    let mut callees = Callees::default();
    walk_member(&mut callees, member);
    callees.out
}

/// Iterators have no members, so the declaration walk covers exactly the iterator's own clauses
fn iterator_callees(decl: &TopLevelDecl) -> Vec<Fun> {
    let mut callees = Callees::default();
    walk_decl(&mut callees, decl);
    callees.out
}

/// Build the call graph of `module`, compute its SCCs, store it in `module.call_graph`,
/// and mark the module's recursive functions and methods
pub fn build_call_graph(module: &mut Module) -> Rc<Graph<Fun>> {
    let mut graph: Graph<Fun> = Graph::new();
    for decl in module.decls.iter() {
        if let TopLevelDecl::Iterator(it) = decl {
            graph.add_node(it.path.clone());
            for callee in iterator_callees(decl) {
                graph.add_edge(it.path.clone(), callee);
            }
        }
        for member in decl.members() {
            if let Member::Field(f) = member {
                if f.rhs.is_none() {
                    continue;
                }
            }
            graph.add_node(member.path().clone());
            for callee in member_callees(member) {
                graph.add_edge(member.path().clone(), callee);
            }
        }
    }
    graph.compute_sccs();
    for decl in module.decls.iter_mut() {
        if let Some(members) = decl.members_mut() {
            for member in members.iter_mut() {
                match member {
                    Member::Function(f) => f.is_recursive = graph.node_is_in_cycle(&f.path),
                    Member::Method(m) => m.is_recursive = graph.node_is_in_cycle(&m.path),
                    Member::Field(_) => {}
                }
            }
        }
    }
    tracing::trace!(module = %module.name, nodes = graph.num_nodes(), "call graph computed");
    let graph = Rc::new(graph);
    module.call_graph = Some(graph.clone());
    graph
}

/// Order the modules so that every module comes after the modules it imports.
/// Import cycles and unknown imports are reported; the modules involved keep their relative order.
pub fn module_order(program: &Program, reporter: &mut Reporter) -> Vec<usize> {
    let mut graph: Graph<Ident> = Graph::new();
    for module in program.modules.iter() {
        graph.add_node(module.name.clone());
    }
    for module in program.modules.iter() {
        for import in module.imports.iter() {
            if program.modules.iter().any(|m| &m.name == import) {
                graph.add_edge(module.name.clone(), import.clone());
            } else {
                reporter.error(
                    &module.span,
                    format!("module {} imports unknown module {}", module.name, import),
                );
            }
        }
    }
    graph.compute_sccs();
    let mut order = Vec::new();
    for component in graph.sorted_components() {
        if component.len() > 1 || graph.node_has_direct_edge_to_itself(&component[0]) {
            let cycle = graph.shortest_cycle_back_to_self(&component[0]);
            let mut names: Vec<String> = cycle.iter().map(|n| n.to_string()).collect();
            names.push(component[0].to_string());
            if let Some(m) = program.modules.iter().find(|m| m.name == component[0]) {
                reporter.error(&m.span, format!("module imports form a cycle: {}", names.join(" -> ")));
            }
        }
        let mut idxs: Vec<usize> = component
            .iter()
            .filter_map(|name| program.modules.iter().position(|m| &m.name == name))
            .collect();
        idxs.sort();
        order.extend(idxs);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::messages::{CollectedDiagnostics, MessageLevel};
    use crate::test_util::*;

    #[test]
    fn mutual_recursion_marks_both_functions() {
        let x = var_decl("x", &int_typ());
        let even = mk_path(&["M", "_default", "Even"]);
        let odd = mk_path(&["M", "_default", "Odd"]);
        let other = mk_path(&["M", "_default", "Other"]);
        let mut fe = Function::new(&sp(), &even, FunctionKind::Predicate, vec![x.clone()], &bool_typ());
        fe.body = Some(call_path(&odd, vec![var(&x)], &bool_typ()));
        let mut fo = Function::new(&sp(), &odd, FunctionKind::Predicate, vec![x.clone()], &bool_typ());
        fo.body = Some(call_path(&even, vec![var(&x)], &bool_typ()));
        let mut fx = Function::new(&sp(), &other, FunctionKind::Predicate, vec![x.clone()], &bool_typ());
        fx.body = Some(call_path(&even, vec![var(&x)], &bool_typ()));
        let mut class = ClassDecl::new(&sp(), &mk_path(&["M", "_default"]));
        class.members = vec![Member::Function(fe), Member::Function(fo), Member::Function(fx)];
        let mut module = Module::new(&sp(), "M");
        module.decls.push(TopLevelDecl::Class(class));
        let graph = build_call_graph(&mut module);
        assert!(graph.in_same_scc(&even, &odd));
        let recursive: Vec<bool> = module.decls[0]
            .members()
            .iter()
            .map(|m| match m {
                Member::Function(f) => f.is_recursive,
                _ => false,
            })
            .collect();
        assert_eq!(recursive, vec![true, true, false]);
        let order = graph.sorted_components();
        let pos = |p: &Fun| order.iter().position(|c| c.contains(p)).unwrap();
        assert!(pos(&even) < pos(&other));
    }

    #[test]
    fn modules_follow_their_imports() {
        let mut a = Module::new(&sp(), "A");
        a.imports = vec![str_ident("B")];
        let b = Module::new(&sp(), "B");
        let mut c = Module::new(&sp(), "C");
        c.imports = vec![str_ident("D")];
        let mut d = Module::new(&sp(), "D");
        d.imports = vec![str_ident("C")];
        let program = Program::new("p", vec![a, b, c, d]);
        let mut diags = CollectedDiagnostics::new();
        let order = module_order(&program, &mut Reporter::new(&mut diags, "resolver"));
        let pos = |i: usize| order.iter().position(|x| *x == i).unwrap();
        assert!(pos(1) < pos(0));
        assert_eq!(order.len(), 4);
        assert_eq!(diags.count(MessageLevel::Error), 1);
        assert!(diags.notes_at(MessageLevel::Error)[0].contains("cycle"));
    }
}
