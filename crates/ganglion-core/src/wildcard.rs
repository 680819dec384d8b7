//! Wildcard queries over the element tree
//!
//! ```text
//! /model/##[TYPE=Pool]             every Pool below /model
//! /model/#[FIELD(conc)>=0.5]       direct children with some conc >= 0.5
//! /cells/soma_?,/cells/dend#       name globs, unioned
//! ```
//!
//! A pattern is a `/`-separated chain of segments. Each segment is one of
//! `.`, `..`, a literal name, `#` (direct children), `##` (all descendants
//! in pre-order, excluding the starting element) or a name glob (`#` for any
//! run of characters, `?` for exactly one). A segment may carry a bracketed
//! condition or instance index:
//!
//! - `TYPE=name`, `ISA=name`, `CLASS=name` and their `!=` forms test the
//!   element's type;
//! - `FIELD(name) OP literal` with OP in `= != < > <= >=` holds when any
//!   instance's value compares as requested; fields the type lacks never match;
//! - `[n]` keeps elements with at least `n + 1` instances.
//!
//! Queries never fail. Unmatched paths give no results; malformed patterns are
//! logged at debug level and give no results either.

use crate::element::ElementGraph;
use crate::{Error, Id, ObjId, Result, Value};
use indexmap::IndexSet;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CmpOp::Ne, None) => true,
            (_, None) => false,
            (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
            (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
            (CmpOp::Lt, Some(o)) => o == Ordering::Less,
            (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
            (CmpOp::Le, Some(o)) => o != Ordering::Greater,
            (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Type { class: String, negate: bool },
    Field { name: String, op: CmpOp, literal: Value },
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    Current,
    Parent,
    Name(String),
    Glob(String),
    Children,
    Descendants,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub selector: Selector,
    pub condition: Option<Condition>,
}

/// One comma-separated alternative
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub absolute: bool,
    pub segments: Vec<Segment>,
}

/// A parsed query
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub alternatives: Vec<PathPattern>,
}

fn malformed(pattern: &str, why: &str) -> Error {
    Error::InvalidArgument(format!("malformed pattern '{}': {}", pattern, why))
}

/// Split on `sep` outside brackets, parentheses and quotes
fn split_top(input: &str, sep: char) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '[' | '(' if !quoted => depth += 1,
            ']' | ')' if !quoted => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            c if c == sep && depth == 0 && !quoted => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 || quoted {
        return None;
    }
    parts.push(&input[start..]);
    Some(parts)
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let alternatives = split_top(pattern, ',')
            .ok_or_else(|| malformed(pattern, "unbalanced brackets"))?
            .into_iter()
            .map(|alt| PathPattern::parse(alt.trim()).map_err(|e| match e {
                Error::InvalidArgument(why) => malformed(pattern, &why),
                other => other,
            }))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { alternatives })
    }
}

impl PathPattern {
    fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::InvalidArgument("empty alternative".into()));
        }
        let absolute = path.starts_with('/');
        let segments = split_top(path, '/')
            .ok_or_else(|| Error::InvalidArgument("unbalanced brackets".into()))?
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(Segment::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { absolute, segments })
    }
}

impl Segment {
    fn parse(text: &str) -> Result<Self> {
        let (head, condition) = match text.find('[') {
            None => (text, None),
            Some(open) => {
                let inner = text[open + 1..]
                    .strip_suffix(']')
                    .ok_or_else(|| Error::InvalidArgument(format!("bad condition in '{}'", text)))?;
                (&text[..open], Some(Condition::parse(inner.trim())?))
            }
        };
        let selector = match head {
            "." => Selector::Current,
            ".." => Selector::Parent,
            "#" => Selector::Children,
            "##" => Selector::Descendants,
            "" => {
                return Err(Error::InvalidArgument(format!(
                    "segment '{}' has no selector",
                    text
                )))
            }
            glob if glob.contains(['#', '?']) => Selector::Glob(glob.to_string()),
            name => Selector::Name(name.to_string()),
        };
        Ok(Self {
            selector,
            condition,
        })
    }
}

impl Condition {
    fn parse(text: &str) -> Result<Self> {
        if let Ok(index) = text.parse::<usize>() {
            return Ok(Condition::Index(index));
        }
        for keyword in ["TYPE", "ISA", "CLASS"] {
            if let Some(rest) = text.strip_prefix(keyword) {
                let rest = rest.trim_start();
                let (negate, class) = if let Some(class) = rest.strip_prefix("!=") {
                    (true, class)
                } else if let Some(class) = rest.strip_prefix('=') {
                    (false, class)
                } else {
                    return Err(Error::InvalidArgument(format!("bad type test '{}'", text)));
                };
                return Ok(Condition::Type {
                    class: class.trim().to_string(),
                    negate,
                });
            }
        }
        if let Some(rest) = text.strip_prefix("FIELD") {
            let rest = rest.trim_start();
            let close = rest
                .find(')')
                .filter(|_| rest.starts_with('('))
                .ok_or_else(|| Error::InvalidArgument(format!("bad field test '{}'", text)))?;
            let name = rest[1..close].trim().to_string();
            let tail = rest[close + 1..].trim_start();
            let (op, literal) = [
                ("<=", CmpOp::Le),
                (">=", CmpOp::Ge),
                ("!=", CmpOp::Ne),
                ("=", CmpOp::Eq),
                ("<", CmpOp::Lt),
                (">", CmpOp::Gt),
            ]
            .into_iter()
            .find_map(|(token, op)| tail.strip_prefix(token).map(|lit| (op, lit)))
            .ok_or_else(|| Error::InvalidArgument(format!("bad operator in '{}'", text)))?;
            return Ok(Condition::Field {
                name,
                op,
                literal: parse_literal(literal.trim()),
            });
        }
        Err(Error::InvalidArgument(format!("unknown condition '{}'", text)))
    }

    fn holds_for(&self, graph: &ElementGraph, obj: ObjId) -> bool {
        match self {
            Condition::Type { class, negate } => graph
                .type_of(obj.id)
                .is_ok_and(|t| (t == class) != *negate),
            Condition::Field { name, op, literal } => match graph.get_opt(obj, name) {
                Ok(Some(value)) => op.holds(value.compare(literal)),
                _ => false,
            },
            Condition::Index(index) => obj.index == *index,
        }
    }

    fn holds(&self, graph: &ElementGraph, id: Id) -> bool {
        let len = graph.len(id).unwrap_or(0);
        match self {
            Condition::Index(index) => *index < len,
            _ => (0..len).any(|i| self.holds_for(graph, id.at(i))),
        }
    }
}

fn parse_literal(text: &str) -> Value {
    if let Some(inner) = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
    {
        return Value::String(inner.to_string());
    }
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(text.to_string())
}

/// Match a name against a glob where `#` is any run and `?` one character
fn glob_match(glob: &[char], name: &[char]) -> bool {
    let (mut g, mut n) = (0, 0);
    // last `#` seen, and the name position it absorbs up to
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        match glob.get(g) {
            Some('#') => {
                star = Some((g, n));
                g += 1;
            }
            Some(c) if *c == '?' || *c == name[n] => {
                g += 1;
                n += 1;
            }
            _ => match star {
                Some((sg, sn)) => {
                    star = Some((sg, sn + 1));
                    g = sg + 1;
                    n = sn + 1;
                }
                None => return false,
            },
        }
    }
    glob[g..].iter().all(|c| *c == '#')
}

impl PathPattern {
    fn select(&self, graph: &ElementGraph, base: Id) -> Vec<Id> {
        let start = if self.absolute { graph.root() } else { base };
        if !graph.contains(start) {
            return Vec::new();
        }
        let mut current = vec![start];
        for segment in &self.segments {
            let mut next = IndexSet::new();
            for id in &current {
                for candidate in segment.expand(graph, *id) {
                    let keep = segment
                        .condition
                        .as_ref()
                        .map_or(true, |c| c.holds(graph, candidate));
                    if keep {
                        next.insert(candidate);
                    }
                }
            }
            current = next.into_iter().collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    fn last_condition(&self) -> Option<&Condition> {
        self.segments.last().and_then(|s| s.condition.as_ref())
    }
}

impl Segment {
    fn expand(&self, graph: &ElementGraph, id: Id) -> Vec<Id> {
        match &self.selector {
            Selector::Current => vec![id],
            Selector::Parent => graph.parent(id).ok().flatten().into_iter().collect(),
            Selector::Name(name) => graph.child_by_name(id, name).ok().flatten().into_iter().collect(),
            Selector::Children => graph.children(id).map(<[Id]>::to_vec).unwrap_or_default(),
            Selector::Descendants => graph.descendants(id).unwrap_or_default(),
            Selector::Glob(glob) => {
                let glob: Vec<char> = glob.chars().collect();
                graph
                    .children(id)
                    .map(<[Id]>::to_vec)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|c| {
                        graph.name(*c).is_ok_and(|n| {
                            let name: Vec<char> = n.chars().collect();
                            glob_match(&glob, &name)
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Elements matching `pattern`, relative patterns resolved against `base`
pub fn find(graph: &ElementGraph, base: Id, pattern: &str) -> Vec<Id> {
    let parsed = match Pattern::parse(pattern) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(pattern, %err, "ignoring malformed wildcard pattern");
            return Vec::new();
        }
    };
    let mut out = IndexSet::new();
    for alt in &parsed.alternatives {
        out.extend(alt.select(graph, base));
    }
    out.into_iter().collect()
}

/// Instances matching `pattern`
///
/// A condition on the last segment is applied per instance, so a vec
/// contributes only the instances that satisfy it.
pub fn find_instances(graph: &ElementGraph, base: Id, pattern: &str) -> Vec<ObjId> {
    let parsed = match Pattern::parse(pattern) {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(pattern, %err, "ignoring malformed wildcard pattern");
            return Vec::new();
        }
    };
    let mut out = IndexSet::new();
    for alt in &parsed.alternatives {
        let condition = alt.last_condition();
        for id in alt.select(graph, base) {
            let len = graph.len(id).unwrap_or(0);
            out.extend(
                (0..len)
                    .map(|i| id.at(i))
                    .filter(|obj| condition.map_or(true, |c| c.holds_for(graph, *obj))),
            );
        }
    }
    out.into_iter().collect()
}
