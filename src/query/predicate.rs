use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::domain::Value;
use crate::error::{Error, Result};
use crate::validation::{quote_qualified, validate_column_name};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
        }
    }
}

/// A WHERE or JOIN ON fragment restricted to column references, literals and boolean structure.
///
/// Client text is never spliced into generated SQL. It is parsed into this tree and rendered back
/// with quoted identifiers and escaped literals, so anything outside the supported grammar
/// (subqueries, function calls, extra statements) is rejected up front.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Like {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    InList {
        operand: Operand,
        list: Vec<Value>,
        negated: bool,
    },
    Between {
        operand: Operand,
        low: Value,
        high: Value,
        negated: bool,
    },
}

impl Condition {
    pub fn parse(text: &str) -> Result<Condition> {
        if text.trim().is_empty() {
            return Err(Error::Validation("Condition cannot be empty".into()));
        }

        let dialect = ClickHouseDialect {};
        let mut parser = Parser::new(&dialect)
            .try_with_sql(text)
            .map_err(|e| Error::Validation(format!("Invalid condition '{}': {}", text, e)))?;
        let expr = parser
            .parse_expr()
            .map_err(|e| Error::Validation(format!("Invalid condition '{}': {}", text, e)))?;
        if parser.peek_token().token != Token::EOF {
            return Err(Error::Validation(format!(
                "Unexpected trailing input in condition '{}'",
                text
            )));
        }

        from_expr(&expr)
    }

    pub fn and(self, other: Condition) -> Condition {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn to_sql(&self) -> String {
        self.to_string()
    }

    /// Every column the condition reads, in order of appearance.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Compare { left, right, .. } => {
                push_column(left, out);
                push_column(right, out);
            }
            Condition::IsNull { operand, .. }
            | Condition::Like { operand, .. }
            | Condition::InList { operand, .. }
            | Condition::Between { operand, .. } => push_column(operand, out),
            Condition::And(a, b) | Condition::Or(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            Condition::Not(inner) => inner.collect_columns(out),
        }
    }

    /// Evaluates against one row. `resolve` maps a column reference to its value; unknown columns
    /// should resolve to null. Comparisons involving null are false.
    pub fn evaluate<F>(&self, resolve: &F) -> bool
    where
        F: Fn(&str) -> Value,
    {
        let value_of = |operand: &Operand| match operand {
            Operand::Column(name) => resolve(name),
            Operand::Literal(v) => v.clone(),
        };

        match self {
            Condition::Compare { left, op, right } => {
                let (l, r) = (value_of(left), value_of(right));
                match op {
                    CompareOp::Eq => l.loose_eq(&r),
                    CompareOp::NotEq => !l.is_null() && !r.is_null() && !l.loose_eq(&r),
                    CompareOp::Gt => l.loose_cmp(&r) == Some(Ordering::Greater),
                    CompareOp::GtEq => matches!(l.loose_cmp(&r), Some(Ordering::Greater | Ordering::Equal)),
                    CompareOp::Lt => l.loose_cmp(&r) == Some(Ordering::Less),
                    CompareOp::LtEq => matches!(l.loose_cmp(&r), Some(Ordering::Less | Ordering::Equal)),
                }
            }
            Condition::And(a, b) => a.evaluate(resolve) && b.evaluate(resolve),
            Condition::Or(a, b) => a.evaluate(resolve) || b.evaluate(resolve),
            Condition::Not(inner) => !inner.evaluate(resolve),
            Condition::IsNull { operand, negated } => value_of(operand).is_null() != *negated,
            Condition::Like {
                operand,
                pattern,
                negated,
            } => {
                let value = value_of(operand);
                if value.is_null() {
                    return false;
                }
                like_matches(pattern, &value.to_display_string()) != *negated
            }
            Condition::InList {
                operand,
                list,
                negated,
            } => {
                let value = value_of(operand);
                if value.is_null() {
                    return false;
                }
                list.iter().any(|item| value.loose_eq(item)) != *negated
            }
            Condition::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let value = value_of(operand);
                let inside = matches!(
                    value.loose_cmp(low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(value.loose_cmp(high), Some(Ordering::Less | Ordering::Equal));
                if value.is_null() {
                    false
                } else {
                    inside != *negated
                }
            }
        }
    }
}

fn push_column<'a>(operand: &'a Operand, out: &mut Vec<&'a str>) {
    if let Operand::Column(name) = operand {
        out.push(name.as_str());
    }
}

fn like_matches(pattern: &str, text: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(text)).unwrap_or(false)
}

fn unsupported(expr: &Expr) -> Error {
    Error::Validation(format!("Unsupported expression in condition: {}", expr))
}

fn from_expr(expr: &Expr) -> Result<Condition> {
    match expr {
        Expr::Nested(inner) => from_expr(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(Condition::And(
                Box::new(from_expr(left)?),
                Box::new(from_expr(right)?),
            )),
            BinaryOperator::Or => Ok(Condition::Or(
                Box::new(from_expr(left)?),
                Box::new(from_expr(right)?),
            )),
            _ => {
                let op = match op {
                    BinaryOperator::Eq => CompareOp::Eq,
                    BinaryOperator::NotEq => CompareOp::NotEq,
                    BinaryOperator::Gt => CompareOp::Gt,
                    BinaryOperator::GtEq => CompareOp::GtEq,
                    BinaryOperator::Lt => CompareOp::Lt,
                    BinaryOperator::LtEq => CompareOp::LtEq,
                    _ => return Err(unsupported(expr)),
                };
                Ok(Condition::Compare {
                    left: operand(left)?,
                    op,
                    right: operand(right)?,
                })
            }
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => Ok(Condition::Not(Box::new(from_expr(inner)?))),
        Expr::IsNull(inner) => Ok(Condition::IsNull {
            operand: operand(inner)?,
            negated: false,
        }),
        Expr::IsNotNull(inner) => Ok(Condition::IsNull {
            operand: operand(inner)?,
            negated: true,
        }),
        Expr::Like {
            negated,
            expr: inner,
            pattern,
            ..
        } => match literal(pattern)? {
            Value::String(pattern) => Ok(Condition::Like {
                operand: operand(inner)?,
                pattern,
                negated: *negated,
            }),
            _ => Err(Error::Validation("LIKE pattern must be a string literal".into())),
        },
        Expr::InList {
            expr: inner,
            list,
            negated,
        } => Ok(Condition::InList {
            operand: operand(inner)?,
            list: list.iter().map(literal).collect::<Result<_>>()?,
            negated: *negated,
        }),
        Expr::Between {
            expr: inner,
            negated,
            low,
            high,
        } => Ok(Condition::Between {
            operand: operand(inner)?,
            low: literal(low)?,
            high: literal(high)?,
            negated: *negated,
        }),
        _ => Err(unsupported(expr)),
    }
}

fn operand(expr: &Expr) -> Result<Operand> {
    match expr {
        Expr::Nested(inner) => operand(inner),
        Expr::Identifier(ident) => column(&ident.value),
        Expr::CompoundIdentifier(idents) => {
            let name = idents
                .iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            column(&name)
        }
        _ => Ok(Operand::Literal(literal(expr)?)),
    }
}

fn column(name: &str) -> Result<Operand> {
    validate_column_name(name)?;
    if name.ends_with('*') {
        return Err(Error::Validation(format!("Wildcard not allowed in condition: {}", name)));
    }
    Ok(Operand::Column(name.to_string()))
}

fn literal(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Nested(inner) => literal(inner),
        Expr::Value(value) => match value {
            SqlValue::Number(n, _) => parse_number(n, false),
            SqlValue::SingleQuotedString(s) => Ok(Value::String(s.clone())),
            SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
            SqlValue::Null => Ok(Value::Null),
            _ => Err(unsupported(expr)),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            Expr::Value(SqlValue::Number(n, _)) => parse_number(n, true),
            _ => Err(unsupported(expr)),
        },
        _ => Err(unsupported(expr)),
    }
}

fn parse_number(text: &str, negative: bool) -> Result<Value> {
    let signed = if negative { format!("-{}", text) } else { text.to_string() };
    if let Ok(i) = signed.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    signed
        .parse::<f64>()
        .map(Value::Float)
        .map_err(|_| Error::Validation(format!("Invalid numeric literal: {}", text)))
}

/// Renders a literal as ClickHouse SQL.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Float(_) => "NULL".to_string(),
        Value::Boolean(b) => b.to_string(),
        other => {
            let text = other.to_display_string();
            format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(name) => f.write_str(&quote_qualified(name)),
            Operand::Literal(v) => f.write_str(&render_literal(v)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not = |negated: bool| if negated { "NOT " } else { "" };
        match self {
            Condition::Compare { left, op, right } => write!(f, "{} {} {}", left, op.as_sql(), right),
            Condition::And(a, b) => {
                write_grouped(f, a, true)?;
                f.write_str(" AND ")?;
                write_grouped(f, b, true)
            }
            Condition::Or(a, b) => {
                write_grouped(f, a, false)?;
                f.write_str(" OR ")?;
                write_grouped(f, b, false)
            }
            Condition::Not(inner) => write!(f, "NOT ({})", inner),
            Condition::IsNull { operand, negated } => {
                write!(f, "{} IS {}NULL", operand, not(*negated))
            }
            Condition::Like {
                operand,
                pattern,
                negated,
            } => write!(
                f,
                "{} {}LIKE {}",
                operand,
                not(*negated),
                render_literal(&Value::String(pattern.clone()))
            ),
            Condition::InList {
                operand,
                list,
                negated,
            } => {
                let items = list.iter().map(render_literal).collect::<Vec<_>>().join(", ");
                write!(f, "{} {}IN ({})", operand, not(*negated), items)
            }
            Condition::Between {
                operand,
                low,
                high,
                negated,
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                operand,
                not(*negated),
                render_literal(low),
                render_literal(high)
            ),
        }
    }
}

fn write_grouped(f: &mut fmt::Formatter<'_>, child: &Condition, parent_is_and: bool) -> fmt::Result {
    let needs_parens = match child {
        Condition::Or(..) => parent_is_and,
        Condition::And(..) => !parent_is_and,
        _ => false,
    };
    if needs_parens {
        write!(f, "({})", child)
    } else {
        write!(f, "{}", child)
    }
}
