//! Relationship tuple storage.
//!
//! The evaluator only needs point lookups. [`InMemoryTupleStore`] backs a
//! single process (and tests); a networked backend plugs in through
//! [`TupleStore`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::error::DispatchError;
use crate::model::{parse_object, SubjectRef};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Tuple store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => DispatchError::UpstreamUnavailable(msg),
            StoreError::InvalidTuple(msg) => DispatchError::InvalidRequest(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One stored fact: `object_type:object_id#relation@subject`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Tuple {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        subject: SubjectRef,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            subject,
        }
    }

    fn key(&self) -> TupleKey {
        TupleKey::new(&self.object_type, &self.object_id, &self.relation)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.object_type, self.object_id, self.relation, self.subject
        )
    }
}

impl FromStr for Tuple {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |detail: String| StoreError::InvalidTuple(format!("'{}': {}", s, detail));

        let (resource, subject) = s
            .split_once('@')
            .ok_or_else(|| invalid("missing '@subject'".into()))?;
        let (object, relation) = resource
            .split_once('#')
            .ok_or_else(|| invalid("missing '#relation'".into()))?;
        if relation.is_empty() {
            return Err(invalid("empty relation".into()));
        }
        let (object_type, object_id) = parse_object(object).map_err(|e| invalid(e.to_string()))?;
        let subject: SubjectRef = subject.parse().map_err(|e: DispatchError| invalid(e.to_string()))?;

        Ok(Tuple::new(object_type, object_id, relation, subject))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TupleKey {
    object_type: String,
    object_id: String,
    relation: String,
}

impl TupleKey {
    fn new(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            relation: relation.to_string(),
        }
    }
}

/// Read side used by the local evaluator.
#[mockall::automock]
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Subjects stored for `(object_type, object_id, relation)`.
    async fn lookup(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StoreResult<Vec<SubjectRef>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTupleStore {
    tuples: DashMap<TupleKey, BTreeSet<String>>,
}

impl InMemoryTupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tuples<I, S>(tuples: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for tuple in tuples {
            store.write(tuple.as_ref().parse()?);
        }
        Ok(store)
    }

    /// Returns `false` if the tuple was already present.
    pub fn write(&self, tuple: Tuple) -> bool {
        self.tuples
            .entry(tuple.key())
            .or_default()
            .insert(tuple.subject.to_string())
    }

    /// Returns `false` if the tuple was not present.
    pub fn delete(&self, tuple: &Tuple) -> bool {
        let key = tuple.key();
        let removed = match self.tuples.get_mut(&key) {
            Some(mut subjects) => subjects.remove(&tuple.subject.to_string()),
            None => return false,
        };
        self.tuples.remove_if(&key, |_, subjects| subjects.is_empty());
        removed
    }

    pub fn len(&self) -> usize {
        self.tuples.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TupleStore for InMemoryTupleStore {
    async fn lookup(
        &self,
        object_type: &str,
        object_id: &str,
        relation: &str,
    ) -> StoreResult<Vec<SubjectRef>> {
        let key = TupleKey::new(object_type, object_id, relation);
        let Some(subjects) = self.tuples.get(&key) else {
            return Ok(Vec::new());
        };
        subjects
            .iter()
            .map(|s| {
                s.parse::<SubjectRef>()
                    .map_err(|e| StoreError::InvalidTuple(e.to_string()))
            })
            .collect()
    }
}
