// Pest-backed parser: concrete syntax tree -> ast module types.

use pest::iterators::Pair;
use pest::Parser;

use crate::ast::{BinaryOp, Expr, Literal, Program, Stmt, UnaryOp};
use crate::runtime::error::ScriptError;

#[derive(pest_derive::Parser)]
#[grammar = "grammar.pest"]
struct Grammar;

/// Parse a script source into a [`Program`].
pub fn parse_program(source: &str) -> Result<Program, ScriptError> {
    let mut pairs = Grammar::parse(Rule::program, source)
        .map_err(|e| ScriptError::Parse(e.to_string()))?;
    let root = pairs
        .next()
        .ok_or_else(|| ScriptError::Parse("empty parse result".to_string()))?;

    let mut stmts = Vec::new();
    for pair in root.into_inner() {
        if pair.as_rule() == Rule::EOI {
            continue;
        }
        stmts.push(build_stmt(pair)?);
    }
    Ok(Program { stmts })
}

fn is_keyword_rule(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_let
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_for
            | Rule::kw_while
            | Rule::kw_in
            | Rule::kw_return
            | Rule::kw_break
            | Rule::kw_continue
    )
}

fn unexpected(pair: &Pair<Rule>) -> ScriptError {
    ScriptError::Parse(format!(
        "unexpected {:?} at `{}`",
        pair.as_rule(),
        pair.as_str()
    ))
}

fn build_stmt(pair: Pair<Rule>) -> Result<Stmt, ScriptError> {
    match pair.as_rule() {
        Rule::let_stmt | Rule::assign_stmt => {
            let is_let = pair.as_rule() == Rule::let_stmt;
            let mut inner = pair.into_inner().filter(|p| !is_keyword_rule(p.as_rule()));
            let name = inner
                .next()
                .ok_or_else(|| ScriptError::Parse("binding missing name".to_string()))?
                .as_str()
                .to_string();
            let value_pair = inner
                .next()
                .ok_or_else(|| ScriptError::Parse("binding missing value".to_string()))?;
            let value = build_expr(value_pair)?;
            if is_let {
                Ok(Stmt::Let { name, value })
            } else {
                Ok(Stmt::Assign { name, value })
            }
        }
        Rule::return_stmt => {
            let mut value = None;
            for p in pair.into_inner() {
                if !is_keyword_rule(p.as_rule()) {
                    value = Some(build_expr(p)?);
                }
            }
            Ok(Stmt::Return(value))
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::if_stmt => {
            let mut cond = None;
            let mut then_block = None;
            let mut else_block = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::kw_if | Rule::kw_else => {}
                    Rule::expr => cond = Some(build_expr(p)?),
                    Rule::block => {
                        if then_block.is_none() {
                            then_block = Some(build_block(p)?);
                        } else {
                            else_block = Some(build_block(p)?);
                        }
                    }
                    // `else if ...` chains desugar into a nested If.
                    Rule::if_stmt => else_block = Some(vec![build_stmt(p)?]),
                    _ => return Err(unexpected(&p)),
                }
            }
            Ok(Stmt::If {
                cond: cond.ok_or_else(|| ScriptError::Parse("if missing condition".to_string()))?,
                then_block: then_block
                    .ok_or_else(|| ScriptError::Parse("if missing body".to_string()))?,
                else_block,
            })
        }
        Rule::for_stmt => {
            let mut inner = pair.into_inner().filter(|p| !is_keyword_rule(p.as_rule()));
            let var = inner
                .next()
                .ok_or_else(|| ScriptError::Parse("for missing variable".to_string()))?
                .as_str()
                .to_string();
            let iterable = build_expr(
                inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("for missing iterable".to_string()))?,
            )?;
            let body = build_block(
                inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("for missing body".to_string()))?,
            )?;
            Ok(Stmt::For {
                var,
                iterable,
                body,
            })
        }
        Rule::while_stmt => {
            let mut inner = pair.into_inner().filter(|p| !is_keyword_rule(p.as_rule()));
            let cond = build_expr(
                inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("while missing condition".to_string()))?,
            )?;
            let body = build_block(
                inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("while missing body".to_string()))?,
            )?;
            Ok(Stmt::While { cond, body })
        }
        Rule::expr_stmt => {
            let mut inner = pair.into_inner();
            let expr = build_expr(
                inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("empty expression statement".to_string()))?,
            )?;
            Ok(Stmt::Expr(expr))
        }
        _ => Err(unexpected(&pair)),
    }
}

fn build_block(pair: Pair<Rule>) -> Result<Vec<Stmt>, ScriptError> {
    pair.into_inner().map(build_stmt).collect()
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    match pair.as_rule() {
        Rule::expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ScriptError::Parse("empty expression".to_string()))?;
            build_expr(inner)
        }
        Rule::or_expr => build_binary_chain(pair, build_expr),
        Rule::and_expr => build_binary_chain(pair, build_expr),
        Rule::eq_expr => build_binary_chain(pair, build_expr),
        Rule::cmp_expr => build_binary_chain(pair, build_expr),
        Rule::add_expr => build_binary_chain(pair, build_expr),
        Rule::mul_expr => build_binary_chain(pair, build_expr),
        Rule::unary_expr => build_unary(pair),
        Rule::postfix_expr => build_postfix(pair),
        _ => build_primary(pair),
    }
}

fn binary_op(text: &str) -> Result<BinaryOp, ScriptError> {
    match text {
        "||" => Ok(BinaryOp::Or),
        "&&" => Ok(BinaryOp::And),
        "==" => Ok(BinaryOp::Eq),
        "!=" => Ok(BinaryOp::Ne),
        "<" => Ok(BinaryOp::Lt),
        "<=" => Ok(BinaryOp::Le),
        ">" => Ok(BinaryOp::Gt),
        ">=" => Ok(BinaryOp::Ge),
        "+" => Ok(BinaryOp::Add),
        "-" => Ok(BinaryOp::Sub),
        "*" => Ok(BinaryOp::Mul),
        "/" => Ok(BinaryOp::Div),
        "%" => Ok(BinaryOp::Rem),
        other => Err(ScriptError::Parse(format!("unknown operator `{}`", other))),
    }
}

fn build_binary_chain(
    pair: Pair<Rule>,
    build: fn(Pair<Rule>) -> Result<Expr, ScriptError>,
) -> Result<Expr, ScriptError> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ScriptError::Parse("empty binary expression".to_string()))?;
    let mut left = build(first)?;
    while let Some(op_pair) = inner.next() {
        let op = binary_op(op_pair.as_str())?;
        let rhs_pair = inner
            .next()
            .ok_or_else(|| ScriptError::Parse("operator missing right operand".to_string()))?;
        let right = build(rhs_pair)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn build_unary(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    let mut ops = Vec::new();
    let mut operand = None;
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::unary_op => ops.push(match p.as_str() {
                "!" => UnaryOp::Not,
                _ => UnaryOp::Neg,
            }),
            _ => operand = Some(build_expr(p)?),
        }
    }
    let mut expr =
        operand.ok_or_else(|| ScriptError::Parse("unary operator missing operand".to_string()))?;
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
        };
    }
    Ok(expr)
}

fn build_postfix(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| ScriptError::Parse("empty postfix expression".to_string()))?;
    let mut expr = build_primary(first)?;
    for suffix in inner {
        match suffix.as_rule() {
            Rule::call_suffix => {
                let mut args = Vec::new();
                if let Some(arg_list) = suffix.into_inner().next() {
                    for arg in arg_list.into_inner() {
                        args.push(build_expr(arg)?);
                    }
                }
                expr = Expr::Call {
                    target: Box::new(expr),
                    args,
                };
            }
            Rule::index_suffix => {
                let index_pair = suffix
                    .into_inner()
                    .next()
                    .ok_or_else(|| ScriptError::Parse("index missing expression".to_string()))?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(build_expr(index_pair)?),
                };
            }
            Rule::field_suffix => {
                let name_pair = suffix
                    .into_inner()
                    .next()
                    .ok_or_else(|| ScriptError::Parse("field access missing name".to_string()))?;
                expr = Expr::Field {
                    target: Box::new(expr),
                    name: name_pair.as_str().to_string(),
                };
            }
            _ => return Err(unexpected(&suffix)),
        }
    }
    Ok(expr)
}

fn build_primary(pair: Pair<Rule>) -> Result<Expr, ScriptError> {
    match pair.as_rule() {
        Rule::number => {
            let text = pair.as_str();
            if text.contains('.') {
                let value: f64 = text
                    .parse()
                    .map_err(|_| ScriptError::Parse(format!("invalid number `{}`", text)))?;
                Ok(Expr::Literal(Literal::Float(value)))
            } else {
                let value: i64 = text
                    .parse()
                    .map_err(|_| ScriptError::Parse(format!("invalid number `{}`", text)))?;
                Ok(Expr::Literal(Literal::Int(value)))
            }
        }
        Rule::dq_string | Rule::sq_string => {
            Ok(Expr::Literal(Literal::Str(unquote(pair.as_str()))))
        }
        Rule::bool_lit => Ok(Expr::Literal(Literal::Bool(pair.as_str() == "true"))),
        Rule::null_lit => Ok(Expr::Literal(Literal::Null)),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::list => {
            let items = pair
                .into_inner()
                .map(build_expr)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::List(items))
        }
        Rule::map => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut inner = entry.into_inner();
                let key_pair = inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("map entry missing key".to_string()))?;
                let key = build_map_key(key_pair)?;
                let value_pair = inner
                    .next()
                    .ok_or_else(|| ScriptError::Parse("map entry missing value".to_string()))?;
                entries.push((key, build_expr(value_pair)?));
            }
            Ok(Expr::Map(entries))
        }
        Rule::paren_expr => {
            let inner = pair
                .into_inner()
                .next()
                .ok_or_else(|| ScriptError::Parse("empty parenthesized expression".to_string()))?;
            build_expr(inner)
        }
        _ => Err(unexpected(&pair)),
    }
}

fn build_map_key(pair: Pair<Rule>) -> Result<String, ScriptError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| ScriptError::Parse("empty map key".to_string()))?;
    match inner.as_rule() {
        Rule::ident => Ok(inner.as_str().to_string()),
        Rule::dq_string | Rule::sq_string => Ok(unquote(inner.as_str())),
        _ => Err(unexpected(&inner)),
    }
}

/// Strip surrounding quotes and process escape sequences.
fn unquote(text: &str) -> String {
    let body = &text[1..text.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_let_and_expression_statement() {
        let program = parse_program("let x = 1 + 2 * 3;\nx;").unwrap();
        assert_eq!(program.stmts.len(), 2);
        assert_eq!(
            program.stmts[0],
            Stmt::Let {
                name: "x".to_string(),
                value: Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(Expr::Literal(Literal::Int(1))),
                    right: Box::new(Expr::Binary {
                        op: BinaryOp::Mul,
                        left: Box::new(Expr::Literal(Literal::Int(2))),
                        right: Box::new(Expr::Literal(Literal::Int(3))),
                    }),
                },
            }
        );
    }

    #[test]
    fn parses_method_call_chain() {
        let program = parse_program("dandi.print('hi');").unwrap();
        assert_eq!(
            program.stmts[0],
            Stmt::Expr(Expr::Call {
                target: Box::new(Expr::Field {
                    target: Box::new(Expr::Ident("dandi".to_string())),
                    name: "print".to_string(),
                }),
                args: vec![Expr::Literal(Literal::Str("hi".to_string()))],
            })
        );
    }

    #[test]
    fn parses_control_flow() {
        let source = r#"
            let total = 0;
            for ds in dandi.get_dandisets() {
                if ds.asset_count > 10 {
                    total = total + 1;
                } else if ds.asset_count == 0 {
                    continue;
                }
            }
            while total > 100 { break; }
            return total;
        "#;
        let program = parse_program(source).unwrap();
        assert_eq!(program.stmts.len(), 4);
        assert!(matches!(program.stmts[0], Stmt::Let { .. }));
        assert!(matches!(program.stmts[1], Stmt::For { .. }));
        assert!(matches!(program.stmts[2], Stmt::While { .. }));
        assert!(matches!(program.stmts[3], Stmt::Return(Some(_))));
    }

    #[test]
    fn parses_literals_and_collections() {
        let program =
            parse_program("let q = {search: 'mouse', limit: 2.5, ok: true, missing: null};")
                .unwrap();
        let Stmt::Let { value: Expr::Map(entries), .. } = &program.stmts[0] else {
            panic!("expected map literal");
        };
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].0, "search");
    }

    #[test]
    fn keywords_do_not_swallow_identifier_prefixes() {
        let program = parse_program("let letter = 1; let index = 2;").unwrap();
        assert!(matches!(
            &program.stmts[0],
            Stmt::Let { name, .. } if name == "letter"
        ));
        assert!(matches!(
            &program.stmts[1],
            Stmt::Let { name, .. } if name == "index"
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_program("let = 3;").is_err());
        assert!(parse_program("if { }").is_err());
        assert!(parse_program("1 +").is_err());
    }

    #[test]
    fn escape_sequences_are_unescaped() {
        let program = parse_program(r#"let s = "a\nb\t'c'";"#).unwrap();
        let Stmt::Let { value: Expr::Literal(Literal::Str(s)), .. } = &program.stmts[0] else {
            panic!("expected string literal");
        };
        assert_eq!(s, "a\nb\t'c'");
    }
}
