//! RFC 6570 URI template expansion (level 4 operators, string values).
//!
//! Values are plain strings, so the explode modifier is accepted but has no
//! effect. Undefined variables are skipped, as the RFC requires.
//!
//! Expansion yields two renderings. `escaped` percent-encodes each value per
//! its operator; `unescaped` inserts the raw values and leaves encoding to
//! whoever parses the result as a URL.

use std::collections::HashMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("uri template: unclosed expression at byte {0}")]
    Unclosed(usize),

    #[error("uri template: unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),

    #[error("uri template: empty expression at byte {0}")]
    EmptyExpression(usize),

    #[error("uri template: reserved operator {0:?}")]
    ReservedOperator(char),

    #[error("uri template: invalid variable name {0:?}")]
    InvalidName(String),

    #[error("uri template: invalid prefix in {0:?}")]
    InvalidPrefix(String),
}

/// Result of expanding a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub escaped: String,
    pub unescaped: String,
}

/// A parsed template, reusable across expansions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Expression { op: Operator, vars: Vec<VarSpec> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct VarSpec {
    name: String,
    prefix: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Simple,
    Reserved,
    Fragment,
    Label,
    Path,
    PathParam,
    Query,
    QueryCont,
}

impl Operator {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            '+' => Operator::Reserved,
            '#' => Operator::Fragment,
            '.' => Operator::Label,
            '/' => Operator::Path,
            ';' => Operator::PathParam,
            '?' => Operator::Query,
            '&' => Operator::QueryCont,
            _ => return None,
        })
    }

    fn first(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved => "",
            Operator::Fragment => "#",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::PathParam => ";",
            Operator::Query => "?",
            Operator::QueryCont => "&",
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Operator::Simple | Operator::Reserved | Operator::Fragment => ",",
            Operator::Label => ".",
            Operator::Path => "/",
            Operator::PathParam => ";",
            Operator::Query | Operator::QueryCont => "&",
        }
    }

    fn named(self) -> bool {
        matches!(
            self,
            Operator::PathParam | Operator::Query | Operator::QueryCont
        )
    }

    fn if_empty(self) -> &'static str {
        match self {
            Operator::Query | Operator::QueryCont => "=",
            _ => "",
        }
    }

    fn allow_reserved(self) -> bool {
        matches!(self, Operator::Reserved | Operator::Fragment)
    }
}

const MAX_PREFIX: usize = 9999;

impl Template {
    pub fn parse(src: &str) -> Result<Self, TemplateError> {
        let is_brace = |c: char| c == '{' || c == '}';
        let mut parts = Vec::new();
        let mut rest = src;
        let mut offset = 0;

        while !rest.is_empty() {
            let Some(open) = rest.find(is_brace) else {
                parts.push(Part::Literal(rest.to_string()));
                break;
            };
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            if rest[open..].starts_with('}') {
                return Err(TemplateError::UnmatchedClose(offset + open));
            }
            let inner = &rest[open + 1..];
            let close = match inner.find(is_brace) {
                Some(i) if inner[i..].starts_with('}') => i,
                _ => return Err(TemplateError::Unclosed(offset + open)),
            };
            parts.push(parse_expression(&inner[..close], offset + open)?);

            let consumed = open + 1 + close + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }

        Ok(Self { parts })
    }

    pub fn expand(&self, vars: &HashMap<String, String>) -> Expansion {
        let mut out = Expansion {
            escaped: String::new(),
            unescaped: String::new(),
        };
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_both(text),
                Part::Expression { op, vars: specs } => expand_expression(&mut out, *op, specs, vars),
            }
        }
        out
    }
}

/// Parse and expand in one step.
pub fn expand(template: &str, vars: &HashMap<String, String>) -> Result<Expansion, TemplateError> {
    Ok(Template::parse(template)?.expand(vars))
}

impl Expansion {
    fn push_both(&mut self, s: &str) {
        self.escaped.push_str(s);
        self.unescaped.push_str(s);
    }
}

fn parse_expression(inner: &str, at: usize) -> Result<Part, TemplateError> {
    let mut chars = inner.chars();
    let op = match chars.next() {
        None => return Err(TemplateError::EmptyExpression(at)),
        Some(c @ ('=' | ',' | '!' | '@' | '|')) => return Err(TemplateError::ReservedOperator(c)),
        Some(c) => Operator::from_char(c),
    };
    let list = match op {
        Some(_) => chars.as_str(),
        None => inner,
    };
    if list.is_empty() {
        return Err(TemplateError::EmptyExpression(at));
    }

    let vars = list.split(',').map(parse_varspec).collect::<Result<_, _>>()?;
    Ok(Part::Expression {
        op: op.unwrap_or(Operator::Simple),
        vars,
    })
}

fn parse_varspec(spec: &str) -> Result<VarSpec, TemplateError> {
    let (name, prefix) = if let Some(name) = spec.strip_suffix('*') {
        (name, None)
    } else if let Some((name, len)) = spec.split_once(':') {
        let valid = !len.is_empty() && len.len() <= 4 && len.bytes().all(|b| b.is_ascii_digit());
        match len.parse::<usize>() {
            Ok(n) if valid && (1..=MAX_PREFIX).contains(&n) => (name, Some(n)),
            _ => return Err(TemplateError::InvalidPrefix(spec.to_string())),
        }
    } else {
        (spec, None)
    };

    if !valid_name(name) {
        return Err(TemplateError::InvalidName(name.to_string()));
    }
    Ok(VarSpec {
        name: name.to_string(),
        prefix,
    })
}

fn valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes[0] == b'.' || bytes[bytes.len() - 1] == b'.' {
        return false;
    }
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if is_pct_triplet(bytes, i) => i += 3,
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' => i += 1,
            _ => return false,
        }
    }
    true
}

fn expand_expression(
    out: &mut Expansion,
    op: Operator,
    specs: &[VarSpec],
    vars: &HashMap<String, String>,
) {
    let mut first = true;
    for spec in specs {
        let Some(value) = vars.get(&spec.name) else {
            continue;
        };
        let value = match spec.prefix {
            Some(n) => truncate_chars(value, n),
            None => value.as_str(),
        };

        out.push_both(if first { op.first() } else { op.separator() });
        first = false;

        if op.named() {
            out.push_both(&spec.name);
            if value.is_empty() {
                out.push_both(op.if_empty());
                continue;
            }
            out.push_both("=");
        }
        encode_into(&mut out.escaped, value, op.allow_reserved());
        out.unescaped.push_str(value);
    }
}

fn truncate_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn is_reserved(b: u8) -> bool {
    matches!(
        b,
        b':' | b'/' | b'?' | b'#' | b'[' | b']' | b'@' | b'!' | b'$' | b'&' | b'\'' | b'('
            | b')' | b'*' | b'+' | b',' | b';' | b'='
    )
}

fn is_pct_triplet(bytes: &[u8], i: usize) -> bool {
    i + 2 < bytes.len() && bytes[i + 1].is_ascii_hexdigit() && bytes[i + 2].is_ascii_hexdigit()
}

fn encode_into(out: &mut String, value: &str, allow_reserved: bool) {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_unreserved(b) || (allow_reserved && is_reserved(b)) {
            out.push(b as char);
        } else if allow_reserved && b == b'%' && is_pct_triplet(bytes, i) {
            out.push_str(&value[i..i + 3]);
            i += 3;
            continue;
        } else {
            let _ = write!(out, "%{b:02X}");
        }
        i += 1;
    }
}
