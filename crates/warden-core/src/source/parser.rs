//! Recursive-descent parser for the logic source format (§6)
//!
//! The format is line-oriented: each declaration, fact, or rule ends with a
//! trailing `.`, comments run from `#` to end of line, and hybrid
//! directives (`INTENT:`, `PROMPT:`, `TAXONOMY:`) are recognized ahead of
//! ordinary fact/rule parsing. A full PEG grammar is overkill for this line
//! format, so parsing stays explicit and hand-rolled rather than reaching
//! for a parser-combinator crate purely for this. `Decl ephemeral p(...).`
//! marks a predicate session-scoped; a plain `Decl p(...).` is Persistent.

use super::ast::{BodyAtom, DeclNode, Directive, FactLit, Item, RuleNode, VarOrConst};
use crate::error::ProgramError;
use crate::schema::{ArgType, PredicateCategory};
use crate::term::Term;
use crate::types::Comparison;

/// Parse the full text of a logic source file into a sequence of items, in
/// source order. Directives are expanded into their desugared facts inline.
pub fn parse_source(text: &str) -> Result<Vec<Item>, ProgramError> {
    let mut items = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("Decl ") {
            let (category, rest) = match rest.strip_prefix("ephemeral ") {
                Some(body) => (PredicateCategory::Ephemeral, body),
                None => (PredicateCategory::Persistent, rest),
            };
            items.push(Item::Decl(parse_decl(rest, line_no, category)?));
        } else if let Some(rest) = line.strip_prefix("INTENT:") {
            items.push(Item::Directive(parse_intent(rest.trim(), line_no)?));
        } else if let Some(rest) = line.strip_prefix("PROMPT:") {
            items.push(Item::Directive(parse_prompt(rest.trim(), line_no)?));
        } else if let Some(rest) = line.strip_prefix("TAXONOMY:") {
            items.push(Item::Directive(parse_taxonomy(rest.trim(), line_no)?));
        } else if line.contains(":-") {
            items.push(Item::Rule(parse_rule(line, line_no)?));
        } else {
            items.push(Item::Fact(parse_fact(line, line_no)?));
        }
    }

    Ok(items)
}

fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

fn require_trailing_dot<'a>(line: &'a str, line_no: usize) -> Result<&'a str, ProgramError> {
    line.strip_suffix('.').ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "expected trailing '.'".to_string(),
    })
}

/// Split a parenthesized list `(a, b(c, d), "e, f")` into its top-level
/// comma-separated members, respecting nested parens/brackets and quotes.
fn split_args(inner: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut current = String::new();

    for c in inner.chars() {
        match c {
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            '(' | '[' if !in_string => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' if !in_string => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 && !in_string => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parens_inner<'a>(s: &'a str, line_no: usize) -> Result<(&'a str, &'a str), ProgramError> {
    let open = s.find('(').ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "expected '('".to_string(),
    })?;
    let close = s.rfind(')').ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "expected ')'".to_string(),
    })?;
    if close < open {
        return Err(ProgramError::Parse {
            line: line_no,
            message: "mismatched parens".to_string(),
        });
    }
    Ok((&s[..open], &s[open + 1..close]))
}

fn parse_arg_type(tok: &str, line_no: usize) -> Result<ArgType, ProgramError> {
    match tok {
        "Name" => Ok(ArgType::Name),
        "String" => Ok(ArgType::String),
        "Integer" => Ok(ArgType::Integer),
        "Float" => Ok(ArgType::Float),
        "Boolean" => Ok(ArgType::Boolean),
        "List" => Ok(ArgType::List),
        "Any" => Ok(ArgType::Any),
        other => Err(ProgramError::Parse {
            line: line_no,
            message: format!("unknown arg type '{other}'"),
        }),
    }
}

fn parse_decl(rest: &str, line_no: usize, category: PredicateCategory) -> Result<DeclNode, ProgramError> {
    let body = require_trailing_dot(rest.trim(), line_no)?;
    let (name, inner) = parens_inner(body, line_no)?;
    let arg_types = split_args(inner)
        .into_iter()
        .map(|t| parse_arg_type(&t, line_no))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DeclNode {
        predicate: name.trim().to_string(),
        arg_types,
        category,
        line: line_no,
    })
}

/// Parse a single constant term: `/name`, `"string"`, integer, float, or
/// boolean `/true|/false`. Booleans share the `/` sigil with names and are
/// distinguished by spelling.
pub fn parse_term(tok: &str) -> Result<Term, ProgramError> {
    let tok = tok.trim();
    if let Some(rest) = tok.strip_prefix('/') {
        return Ok(match rest {
            "true" => Term::Boolean(true),
            "false" => Term::Boolean(false),
            other => Term::Name(other.to_string()),
        });
    }
    if tok.starts_with('"') && tok.ends_with('"') && tok.len() >= 2 {
        return Ok(Term::String(tok[1..tok.len() - 1].to_string()));
    }
    if tok.starts_with('[') && tok.ends_with(']') {
        let inner = &tok[1..tok.len() - 1];
        let items = split_args(inner)
            .into_iter()
            .map(|t| parse_term(&t))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Term::List(items));
    }
    if let Ok(i) = tok.parse::<i64>() {
        return Ok(Term::Integer(i));
    }
    if let Ok(f) = tok.parse::<f64>() {
        return Ok(Term::Float(f));
    }
    Err(ProgramError::Parse {
        line: 0,
        message: format!("unparseable term '{tok}'"),
    })
}

fn parse_fact(line: &str, line_no: usize) -> Result<FactLit, ProgramError> {
    let body = require_trailing_dot(line, line_no)?;
    let (name, inner) = parens_inner(body, line_no)?;
    let args = split_args(inner)
        .into_iter()
        .map(|t| parse_term(&t).map_err(|_| ProgramError::Parse {
            line: line_no,
            message: format!("unparseable term '{t}'"),
        }))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FactLit {
        predicate: name.trim().to_string(),
        args,
        line: line_no,
    })
}

/// A variable is a bare identifier starting with an uppercase letter and
/// carrying no `/`/`"` sigil; anything else is a ground constant.
fn parse_var_or_const(tok: &str, line_no: usize) -> Result<VarOrConst, ProgramError> {
    let tok = tok.trim();
    if tok
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
        && tok.chars().all(|c| c.is_alphanumeric() || c == '_')
    {
        return Ok(VarOrConst::Var(tok.to_string()));
    }
    parse_term(tok)
        .map(VarOrConst::Const)
        .map_err(|_| ProgramError::Parse {
            line: line_no,
            message: format!("unparseable rule argument '{tok}'"),
        })
}

fn parse_atom(tok: &str, line_no: usize) -> Result<BodyAtom, ProgramError> {
    let tok = tok.trim();

    for op_tok in ["<=", ">=", "!=", "==", "<", ">", "="] {
        if let Some(pos) = tok.find(op_tok) {
            // Avoid splitting inside a predicate application's parens.
            if !tok[..pos].contains('(') {
                let op = Comparison::from_token(op_tok).expect("checked token set");
                let left = parse_var_or_const(&tok[..pos], line_no)?;
                let right = parse_var_or_const(&tok[pos + op_tok.len()..], line_no)?;
                return Ok(BodyAtom::Comparison { op, left, right });
            }
        }
    }

    let (negated, pred_expr) = match tok.strip_prefix("not ") {
        Some(rest) => (true, rest.trim()),
        None => (false, tok),
    };

    let (name, inner) = parens_inner(pred_expr, line_no)?;
    let args = split_args(inner)
        .into_iter()
        .map(|t| parse_var_or_const(&t, line_no))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BodyAtom::Predicate {
        predicate: name.trim().to_string(),
        args,
        negated,
    })
}

fn parse_rule(line: &str, line_no: usize) -> Result<RuleNode, ProgramError> {
    let body = require_trailing_dot(line, line_no)?;
    let split_pos = body.find(":-").ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "expected ':-'".to_string(),
    })?;
    let (head, tail) = body.split_at(split_pos);
    let tail = &tail[2..];

    let (head_name, head_inner) = parens_inner(head.trim(), line_no)?;
    let head_args = split_args(head_inner)
        .into_iter()
        .map(|t| parse_var_or_const(&t, line_no))
        .collect::<Result<Vec<_>, _>>()?;

    let body_atoms = split_args(tail)
        .into_iter()
        .map(|t| parse_atom(&t, line_no))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RuleNode {
        head_predicate: head_name.trim().to_string(),
        head_args,
        body: body_atoms,
        line: line_no,
    })
}

fn parse_intent(rest: &str, line_no: usize) -> Result<Directive, ProgramError> {
    // "text" -> /verb "target"
    let arrow = rest.find("->").ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "INTENT directive missing '->'".to_string(),
    })?;
    let (text_part, action_part) = rest.split_at(arrow);
    let action_part = action_part[2..].trim();

    let text = text_part.trim().trim_matches('"').to_string();
    let mut pieces = action_part.splitn(2, ' ');
    let verb = pieces
        .next()
        .unwrap_or("")
        .trim_start_matches('/')
        .to_string();
    let target = pieces
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches('"')
        .to_string();

    Ok(Directive::Intent { text, verb, target })
}

fn parse_prompt(rest: &str, line_no: usize) -> Result<Directive, ProgramError> {
    // /id [role] -> "content"
    let arrow = rest.find("->").ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "PROMPT directive missing '->'".to_string(),
    })?;
    let (head, content_part) = rest.split_at(arrow);
    let content = content_part[2..].trim().trim_matches('"').to_string();

    let bracket_open = head.find('[').ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "PROMPT directive missing '[role]'".to_string(),
    })?;
    let bracket_close = head.find(']').ok_or_else(|| ProgramError::Parse {
        line: line_no,
        message: "PROMPT directive missing ']'".to_string(),
    })?;
    let id = head[..bracket_open]
        .trim()
        .trim_start_matches('/')
        .to_string();
    let role = head[bracket_open + 1..bracket_close].trim().to_string();

    Ok(Directive::Prompt { id, role, content })
}

fn parse_taxonomy(rest: &str, line_no: usize) -> Result<Directive, ProgramError> {
    let chain: Vec<String> = rest
        .split('>')
        .map(|s| s.trim().to_string())
        .collect();
    if chain.len() < 2 {
        return Err(ProgramError::Parse {
            line: line_no,
            message: "TAXONOMY directive needs at least two levels".to_string(),
        });
    }
    Ok(Directive::Taxonomy { chain })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decl() {
        let items = parse_source("Decl unique(Name).").unwrap();
        assert_eq!(items.len(), 1);
        match &items[0] {
            Item::Decl(d) => {
                assert_eq!(d.predicate, "unique");
                assert_eq!(d.arg_types, vec![ArgType::Name]);
                assert_eq!(d.category, PredicateCategory::Persistent);
            }
            _ => panic!("expected decl"),
        }
    }

    #[test]
    fn test_parse_ephemeral_decl() {
        let items = parse_source("Decl ephemeral user_intent(Name, String).").unwrap();
        match &items[0] {
            Item::Decl(d) => {
                assert_eq!(d.predicate, "user_intent");
                assert_eq!(d.category, PredicateCategory::Ephemeral);
            }
            _ => panic!("expected decl"),
        }
    }

    #[test]
    fn test_parse_fact() {
        let items = parse_source("unique(/singleton).").unwrap();
        match &items[0] {
            Item::Fact(f) => {
                assert_eq!(f.predicate, "unique");
                assert_eq!(f.args, vec![Term::Name("singleton".to_string())]);
            }
            _ => panic!("expected fact"),
        }
    }

    #[test]
    fn test_parse_fact_with_string_and_comment() {
        let items = parse_source(r#"task_status(/t1, /completed). # done"#).unwrap();
        match &items[0] {
            Item::Fact(f) => {
                assert_eq!(f.predicate, "task_status");
                assert_eq!(f.args.len(), 2);
            }
            _ => panic!("expected fact"),
        }
    }

    #[test]
    fn test_parse_rule_with_negation_and_comparison() {
        let src = "bad(X,Y) :- body(X,Y), not other(Y), X < Y.";
        let items = parse_source(src).unwrap();
        match &items[0] {
            Item::Rule(r) => {
                assert_eq!(r.head_predicate, "bad");
                assert_eq!(r.body.len(), 3);
                assert!(matches!(
                    r.body[1],
                    BodyAtom::Predicate { negated: true, .. }
                ));
                assert!(matches!(r.body[2], BodyAtom::Comparison { .. }));
            }
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn test_mode_check_rule_s6() {
        let src = "ok(S,X,Y) :- session_id(\"s1\", S), query_session(S, X, Y).";
        let items = parse_source(src).unwrap();
        match &items[0] {
            Item::Rule(r) => assert_eq!(r.body.len(), 2),
            _ => panic!("expected rule"),
        }
    }

    #[test]
    fn test_taxonomy_directive_end_to_end() {
        let items = parse_source("TAXONOMY: a > b > c").unwrap();
        match &items[0] {
            Item::Directive(d) => {
                let facts = d.desugar();
                assert_eq!(facts.len(), 2);
            }
            _ => panic!("expected directive"),
        }
    }

    #[test]
    fn test_missing_trailing_dot_errors() {
        let err = parse_source("unique(/x)").unwrap_err();
        assert!(matches!(err, ProgramError::Parse { .. }));
    }

    #[test]
    fn test_comment_only_line_skipped() {
        let items = parse_source("# just a comment\nunique(/x).").unwrap();
        assert_eq!(items.len(), 1);
    }
}
