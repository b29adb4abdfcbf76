//! Consumed query model.
//!
//! The surface grammar lives outside this crate; queries arrive as an
//! already-parsed tree of clauses and boolean triples. A clause names an
//! index, a relation with modifiers, and a canonical term (canonicalized by
//! the same extraction pipeline that fed the index).

use crate::error::{CarrelError, Result};

/// How far a distance comparison may deviate: the sign set accepted from
/// `cmp(|actual| , distance)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceCmp {
    /// Strictly closer than the distance.
    Less,
    /// Within the distance.
    LessOrEqual,
    /// Exactly the distance (the default).
    #[default]
    Equal,
    /// The distance or further.
    GreaterOrEqual,
    /// Strictly further than the distance.
    Greater,
}

impl DistanceCmp {
    /// Parse the comparison symbol carried by a `distance` modifier.
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol {
            "<" => Ok(DistanceCmp::Less),
            "<=" => Ok(DistanceCmp::LessOrEqual),
            "=" | "" => Ok(DistanceCmp::Equal),
            ">=" => Ok(DistanceCmp::GreaterOrEqual),
            ">" => Ok(DistanceCmp::Greater),
            other => Err(CarrelError::query(format!(
                "unknown distance comparison '{other}'"
            ))),
        }
    }

    /// Whether an absolute distance `actual` satisfies this comparison
    /// against `wanted`.
    pub fn accepts(&self, actual: u32, wanted: u32) -> bool {
        match self {
            DistanceCmp::Less => actual < wanted,
            DistanceCmp::LessOrEqual => actual <= wanted,
            DistanceCmp::Equal => actual == wanted,
            DistanceCmp::GreaterOrEqual => actual >= wanted,
            DistanceCmp::Greater => actual > wanted,
        }
    }
}

/// Unit a proximity distance is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxUnit {
    /// Word ordinals within the same element (the default).
    #[default]
    Word,
    /// Element ordinals; distance 0 means same element.
    Element,
    /// Character offsets (requires an index recording them).
    Character,
}

impl ProxUnit {
    /// Parse a `unit` modifier value.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "word" => Ok(ProxUnit::Word),
            "element" => Ok(ProxUnit::Element),
            "character" => Ok(ProxUnit::Character),
            other => Err(CarrelError::query(format!(
                "unknown proximity unit '{other}'"
            ))),
        }
    }
}

/// A relation or boolean modifier: `name`, an optional comparison symbol
/// and an optional value (`distance<=3`, `unit=word`, `relevant`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modifier {
    /// Modifier name, lowercase.
    pub name: String,
    /// Comparison symbol; `=` unless the grammar said otherwise.
    pub comparison: String,
    /// Modifier value; empty for bare flags.
    pub value: String,
}

impl Modifier {
    /// A bare flag modifier (`relevant`, `ordered`, `proxinfo`).
    pub fn flag<S: Into<String>>(name: S) -> Self {
        Modifier {
            name: name.into(),
            comparison: String::new(),
            value: String::new(),
        }
    }

    /// A `name=value` modifier.
    pub fn valued<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Modifier {
            name: name.into(),
            comparison: "=".to_string(),
            value: value.into(),
        }
    }

    /// A modifier with an explicit comparison symbol.
    pub fn compared<N: Into<String>, C: Into<String>, V: Into<String>>(
        name: N,
        comparison: C,
        value: V,
    ) -> Self {
        Modifier {
            name: name.into(),
            comparison: comparison.into(),
            value: value.into(),
        }
    }
}

/// The relation values the engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationValue {
    /// The stored term equals the query term byte-for-byte.
    Exact,
    /// Any of the query terms (OR).
    Any,
    /// All of the query terms (AND).
    All,
    /// Phrase: all terms adjacent in order (`=` in the surface grammar).
    Phrase,
    /// All terms within a window of the given size.
    Window,
    /// Stored term strictly before the query term.
    Less,
    /// Stored term at or before the query term.
    LessOrEqual,
    /// Stored term strictly after the query term.
    Greater,
    /// Stored term at or after the query term.
    GreaterOrEqual,
    /// Stored term inside the bounds of the query term.
    Within,
    /// Range variant only: stored range encloses the query range.
    Encloses,
}

impl RelationValue {
    /// Surface name, for error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationValue::Exact => "exact",
            RelationValue::Any => "any",
            RelationValue::All => "all",
            RelationValue::Phrase => "=",
            RelationValue::Window => "window",
            RelationValue::Less => "<",
            RelationValue::LessOrEqual => "<=",
            RelationValue::Greater => ">",
            RelationValue::GreaterOrEqual => ">=",
            RelationValue::Within => "within",
            RelationValue::Encloses => "encloses",
        }
    }
}

/// A relation plus its modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// The relation value.
    pub value: RelationValue,
    /// Attached modifiers.
    pub modifiers: Vec<Modifier>,
}

impl Relation {
    /// A relation without modifiers.
    pub fn new(value: RelationValue) -> Self {
        Relation {
            value,
            modifiers: Vec::new(),
        }
    }

    /// Add a modifier, builder style.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Look up a modifier by name.
    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.name == name)
    }

    /// Whether a bare flag modifier is present.
    pub fn has_flag(&self, name: &str) -> bool {
        self.modifier(name).is_some()
    }
}

/// A leaf query: one index, one relation, one canonical term.
///
/// For `any`/`all`/phrase relations the term may hold several
/// whitespace-separated query terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Name of the target index.
    pub index: String,
    /// Relation and modifiers.
    pub relation: Relation,
    /// Canonical query term(s).
    pub term: String,
}

impl Clause {
    /// Construct a clause.
    pub fn new<I: Into<String>, T: Into<String>>(
        index: I,
        relation: Relation,
        term: T,
    ) -> Self {
        Clause {
            index: index.into(),
            relation,
            term: term.into(),
        }
    }
}

/// Boolean connective values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanValue {
    /// Intersection.
    And,
    /// Union.
    Or,
    /// Left minus right.
    Not,
    /// Positional proximity.
    Prox,
}

/// A boolean connective plus its modifiers (`distance`, `unit`, `ordered`,
/// relevance controls).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanOp {
    /// The connective.
    pub value: BooleanValue,
    /// Attached modifiers.
    pub modifiers: Vec<Modifier>,
}

impl BooleanOp {
    /// A connective without modifiers.
    pub fn new(value: BooleanValue) -> Self {
        BooleanOp {
            value,
            modifiers: Vec::new(),
        }
    }

    /// Add a modifier, builder style.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Look up a modifier by name.
    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.name == name)
    }

    /// Whether a bare flag modifier is present.
    pub fn has_flag(&self, name: &str) -> bool {
        self.modifier(name).is_some()
    }
}

/// A parsed query tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    /// A leaf clause.
    Clause(Clause),
    /// A boolean combination of two subtrees.
    Triple(Box<Triple>),
}

impl QueryNode {
    /// Wrap a clause.
    pub fn clause(clause: Clause) -> Self {
        QueryNode::Clause(clause)
    }

    /// Combine two nodes with a boolean op.
    pub fn triple(left: QueryNode, op: BooleanOp, right: QueryNode) -> Self {
        QueryNode::Triple(Box::new(Triple { left, op, right }))
    }
}

/// A boolean combination of two query subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    /// Left operand.
    pub left: QueryNode,
    /// Connective.
    pub op: BooleanOp,
    /// Right operand.
    pub right: QueryNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_cmp() {
        assert!(DistanceCmp::parse("<=").unwrap().accepts(2, 3));
        assert!(!DistanceCmp::parse("<").unwrap().accepts(3, 3));
        assert!(DistanceCmp::parse("").unwrap().accepts(1, 1));
        assert!(DistanceCmp::parse(">").unwrap().accepts(4, 3));
        assert!(DistanceCmp::parse("~").is_err());
    }

    #[test]
    fn test_prox_unit_parse() {
        assert_eq!(ProxUnit::parse("word").unwrap(), ProxUnit::Word);
        assert_eq!(ProxUnit::parse("element").unwrap(), ProxUnit::Element);
        assert!(ProxUnit::parse("sentence").is_err());
    }

    #[test]
    fn test_modifier_lookup() {
        let relation = Relation::new(RelationValue::All)
            .with_modifier(Modifier::flag("relevant"))
            .with_modifier(Modifier::valued("algorithm", "cori"));

        assert!(relation.has_flag("relevant"));
        assert_eq!(relation.modifier("algorithm").unwrap().value, "cori");
        assert!(relation.modifier("proxinfo").is_none());
    }

    #[test]
    fn test_triple_construction() {
        let left = QueryNode::clause(Clause::new(
            "idx",
            Relation::new(RelationValue::Exact),
            "fox",
        ));
        let right = QueryNode::clause(Clause::new(
            "idx",
            Relation::new(RelationValue::Exact),
            "jumps",
        ));
        let node = QueryNode::triple(left, BooleanOp::new(BooleanValue::And), right);
        match node {
            QueryNode::Triple(triple) => assert_eq!(triple.op.value, BooleanValue::And),
            _ => panic!("expected triple"),
        }
    }
}
