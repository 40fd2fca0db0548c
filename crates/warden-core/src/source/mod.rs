//! Logic source loading: tokenizing, parsing, and hybrid-directive desugaring.

pub mod ast;
pub mod parser;

pub use ast::{BodyAtom, DeclNode, Directive, FactLit, Item, RuleNode, VarOrConst};
pub use parser::{parse_source, parse_term};
