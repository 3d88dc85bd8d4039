pub mod ast;
pub mod ast_util;
pub mod ast_visitor;
pub mod attributes;
mod auto_req;
mod autocontracts;
pub mod bounds;
pub mod call_graph;
pub mod config;
pub mod context;
mod forall_stmt;
pub mod free_vars;
mod induction;
pub mod messages;
pub mod modes;
mod opaque;
pub mod pipeline;
pub mod printer;
mod quantifier_split;
pub mod rewriter;
pub mod scc;
pub mod substitute;
#[cfg(test)]
mod test_util;
mod time_limit;
pub mod tokens;
mod triggers_auto;
