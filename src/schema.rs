//! Relation rewrite rules.
//!
//! A [`Schema`] maps `object_type -> relation -> rule`. It is plain data,
//! deserialised from the node config:
//!
//! ```json
//! {
//!   "document": {
//!     "owner":  "direct",
//!     "editor": { "union": ["direct", { "computed": "owner" }] },
//!     "viewer": { "tuple_to_userset": { "tupleset": "parent", "computed": "viewer" } }
//!   }
//! }
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// How the truth of one relation is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationRule {
    /// Fixed answer, no lookup.
    Terminal(bool),
    /// Stored facts for this exact `(object, relation)`.
    Direct,
    /// Same object, another relation.
    Computed(String),
    /// Follow `tupleset` facts to other objects and check `computed` there.
    TupleToUserset { tupleset: String, computed: String },
    Union(Vec<RelationRule>),
    Intersection(Vec<RelationRule>),
    Exclusion {
        base: Box<RelationRule>,
        subtract: Box<RelationRule>,
    },
}

impl RelationRule {
    pub fn computed(relation: impl Into<String>) -> Self {
        RelationRule::Computed(relation.into())
    }

    pub fn tuple_to_userset(tupleset: impl Into<String>, computed: impl Into<String>) -> Self {
        RelationRule::TupleToUserset {
            tupleset: tupleset.into(),
            computed: computed.into(),
        }
    }

    pub fn exclusion(base: RelationRule, subtract: RelationRule) -> Self {
        RelationRule::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            RelationRule::Terminal(_) | RelationRule::Direct => {}
            RelationRule::Computed(relation) => out.push(relation),
            // the computed side lives on another type, only the tupleset is local
            RelationRule::TupleToUserset { tupleset, .. } => out.push(tupleset),
            RelationRule::Union(children) | RelationRule::Intersection(children) => {
                for child in children {
                    child.collect_references(out);
                }
            }
            RelationRule::Exclusion { base, subtract } => {
                base.collect_references(out);
                subtract.collect_references(out);
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    types: HashMap<String, HashMap<String, RelationRule>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(
        mut self,
        object_type: impl Into<String>,
        relation: impl Into<String>,
        rule: RelationRule,
    ) -> Self {
        self.insert(object_type, relation, rule);
        self
    }

    pub fn insert(
        &mut self,
        object_type: impl Into<String>,
        relation: impl Into<String>,
        rule: RelationRule,
    ) {
        self.types
            .entry(object_type.into())
            .or_default()
            .insert(relation.into(), rule);
    }

    pub fn rule(&self, object_type: &str, relation: &str) -> Option<&RelationRule> {
        self.types.get(object_type)?.get(relation)
    }

    /// Like [`rule`](Self::rule) but reports a missing rule as
    /// [`DispatchError::UnresolvedRelation`].
    pub fn resolve(&self, object_type: &str, relation: &str) -> DispatchResult<&RelationRule> {
        self.rule(object_type, relation).ok_or_else(|| {
            DispatchError::UnresolvedRelation(format!("{}#{}", object_type, relation))
        })
    }

    pub fn object_types(&self) -> BTreeSet<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Checks that every same-type reference points at a defined relation.
    ///
    /// Cross-type references (the `computed` side of a tuple-to-userset) cannot
    /// be checked statically and surface as `UnresolvedRelation` at check time.
    pub fn validate(&self) -> Result<(), String> {
        let mut dangling = Vec::new();
        for (object_type, relations) in &self.types {
            for (relation, rule) in relations {
                let mut refs = Vec::new();
                rule.collect_references(&mut refs);
                for target in refs {
                    if !relations.contains_key(target) {
                        dangling.push(format!("{}#{} -> {}", object_type, relation, target));
                    }
                }
            }
        }
        if dangling.is_empty() {
            Ok(())
        } else {
            dangling.sort();
            Err(format!("undefined relations: {}", dangling.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_schema() {
        let json = r#"{
            "document": {
                "parent": "direct",
                "owner": "direct",
                "editor": { "union": ["direct", { "computed": "owner" }] },
                "viewer": { "tuple_to_userset": { "tupleset": "parent", "computed": "viewer" } },
                "blocked": { "terminal": false },
                "reader": { "exclusion": { "base": { "computed": "editor" }, "subtract": { "computed": "blocked" } } }
            }
        }"#;
        let schema: Schema = serde_json::from_str(json).unwrap();

        assert_eq!(
            schema.rule("document", "editor"),
            Some(&RelationRule::Union(vec![
                RelationRule::Direct,
                RelationRule::computed("owner"),
            ]))
        );
        assert_eq!(
            schema.rule("document", "viewer"),
            Some(&RelationRule::tuple_to_userset("parent", "viewer"))
        );
        assert_eq!(
            schema.rule("document", "reader"),
            Some(&RelationRule::exclusion(
                RelationRule::computed("editor"),
                RelationRule::computed("blocked"),
            ))
        );
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_resolve_reports_unresolved_relation() {
        let schema = Schema::new().with_rule("document", "editor", RelationRule::Direct);
        let err = schema.resolve("document", "owner").unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnresolvedRelation("document#owner".to_string())
        );
        assert!(schema.resolve("folder", "editor").is_err());
    }

    #[test]
    fn test_validate_flags_dangling_references() {
        let schema = Schema::new()
            .with_rule("document", "viewer", RelationRule::computed("editor"))
            .with_rule("document", "commenter", RelationRule::tuple_to_userset("parent", "viewer"));
        let err = schema.validate().unwrap_err();
        assert_eq!(
            err,
            "undefined relations: document#commenter -> parent, document#viewer -> editor"
        );
    }
}
