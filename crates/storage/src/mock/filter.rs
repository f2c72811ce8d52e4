//! Minimal `filter_by` evaluator for the in-memory client
//!
//! Supports `||`, `&&`, parentheses and clauses of the form `field:value`,
//! `field:=value`, `field:!=value`, `field:<value`, `field:<=value`,
//! `field:>value`, `field:>=value` and `field:[a,b]`. Values may be wrapped in
//! backticks.

use searchkeeper_core::Document;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Filter {
    Or(Vec<Filter>),
    And(Vec<Filter>),
    Clause {
        field: String,
        op: Op,
        values: Vec<String>,
    },
}

impl Filter {
    /// Every field a clause refers to
    pub(crate) fn fields(&self) -> Vec<&str> {
        match self {
            Self::Or(parts) | Self::And(parts) => parts.iter().flat_map(Filter::fields).collect(),
            Self::Clause { field, .. } => vec![field.as_str()],
        }
    }
}

/// Parse a filter expression
pub(crate) fn parse(input: &str) -> Result<Filter, String> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let filter = parser.parse_or()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(format!(
            "Could not parse the filter query: unexpected input at position {}",
            parser.pos
        ));
    }
    Ok(filter)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&self, token: &str) -> bool {
        token
            .chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn at_operator(&self) -> bool {
        self.starts_with("&&") || self.starts_with("||")
    }

    fn parse_or(&mut self) -> Result<Filter, String> {
        let mut parts = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if !self.starts_with("||") {
                break;
            }
            self.pos += 2;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Filter, String> {
        let mut parts = vec![self.parse_atom()?];
        loop {
            self.skip_ws();
            if !self.starts_with("&&") {
                break;
            }
            self.pos += 2;
            parts.push(self.parse_atom()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::And(parts)
        })
    }

    fn parse_atom(&mut self) -> Result<Filter, String> {
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.skip_ws();
            if self.peek() != Some(')') {
                return Err("Could not parse the filter query: unbalanced parentheses".into());
            }
            self.pos += 1;
            return Ok(inner);
        }
        self.parse_clause()
    }

    fn parse_clause(&mut self) -> Result<Filter, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        let field: String = self.chars[start..self.pos].iter().collect();
        if field.is_empty() {
            return Err("Could not parse the filter query: expected a field name".into());
        }

        self.skip_ws();
        if self.peek() != Some(':') {
            return Err(format!(
                "Could not parse the filter query: expected ':' after '{field}'"
            ));
        }
        self.pos += 1;
        self.skip_ws();

        let op = if self.starts_with("!=") {
            self.pos += 2;
            Op::NotEq
        } else if self.starts_with("<=") {
            self.pos += 2;
            Op::Le
        } else if self.starts_with(">=") {
            self.pos += 2;
            Op::Ge
        } else if self.starts_with("<") {
            self.pos += 1;
            Op::Lt
        } else if self.starts_with(">") {
            self.pos += 1;
            Op::Gt
        } else if self.starts_with("=") {
            self.pos += 1;
            Op::Eq
        } else {
            Op::Eq
        };

        self.skip_ws();
        let values = if self.peek() == Some('[') {
            self.pos += 1;
            let mut values = Vec::new();
            loop {
                values.push(self.parse_value(&[',', ']'])?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(']') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err("Could not parse the filter query: unterminated list".into()),
                }
            }
            values
        } else {
            vec![self.parse_value(&[')'])?]
        };

        Ok(Filter::Clause { field, op, values })
    }

    fn parse_value(&mut self, stops: &[char]) -> Result<String, String> {
        self.skip_ws();
        if self.peek() == Some('`') {
            self.pos += 1;
            let start = self.pos;
            while self.peek().is_some_and(|c| c != '`') {
                self.pos += 1;
            }
            if self.peek() != Some('`') {
                return Err("Could not parse the filter query: unterminated backtick".into());
            }
            let value = self.chars[start..self.pos].iter().collect();
            self.pos += 1;
            return Ok(value);
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if stops.contains(&c) || self.at_operator() {
                break;
            }
            self.pos += 1;
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        let value = value.trim().to_string();
        if value.is_empty() {
            return Err("Could not parse the filter query: empty value".into());
        }
        Ok(value)
    }
}

/// Whether a document satisfies the filter
pub(crate) fn matches(filter: &Filter, document: &Document) -> bool {
    match filter {
        Filter::Or(parts) => parts.iter().any(|p| matches(p, document)),
        Filter::And(parts) => parts.iter().all(|p| matches(p, document)),
        Filter::Clause { field, op, values } => {
            let Some(value) = document.get(field) else {
                return *op == Op::NotEq;
            };
            let candidates: Vec<&Value> = match value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            let equal = candidates
                .iter()
                .any(|c| values.iter().any(|v| compare(c, v) == Some(Ordering::Equal)));

            match op {
                Op::Eq => equal,
                Op::NotEq => !equal,
                Op::Lt | Op::Le | Op::Gt | Op::Ge => candidates.iter().any(|c| {
                    values.iter().any(|v| match compare(c, v) {
                        Some(ord) => match op {
                            Op::Lt => ord == Ordering::Less,
                            Op::Le => ord != Ordering::Greater,
                            Op::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        },
                        None => false,
                    })
                }),
            }
        }
    }
}

/// Compare a document value with a literal from the filter
fn compare(actual: &Value, literal: &str) -> Option<Ordering> {
    match actual {
        Value::Number(n) => {
            let lhs = n.as_f64()?;
            let rhs: f64 = literal.parse().ok()?;
            lhs.partial_cmp(&rhs)
        }
        Value::String(s) => Some(s.as_str().cmp(literal)),
        Value::Bool(b) => {
            let rhs: bool = literal.parse().ok()?;
            Some(b.cmp(&rhs))
        }
        _ => None,
    }
}
