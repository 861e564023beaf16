//! Check request / result model.
//!
//! A [`CheckRequest`] identifies exactly one relation check and is never
//! mutated once built: rewriting produces a new request through
//! [`CheckRequest::derive`], which also spends one unit of the depth budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DispatchError, DispatchResult};

pub const DEFAULT_MAX_DEPTH: u32 = 50;

fn is_valid_identifier(s: &str) -> bool {
    !s.is_empty()
        && !s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | '#' | '@'))
}

fn is_valid_object_id(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c.is_whitespace() || matches!(c, '#' | '@'))
}

/// Splits `type:id`.
pub(crate) fn parse_object(s: &str) -> DispatchResult<(String, String)> {
    let (object_type, object_id) = s
        .split_once(':')
        .ok_or_else(|| DispatchError::invalid(format!("expected type:id, got '{}'", s)))?;
    if !is_valid_identifier(object_type) || !is_valid_object_id(object_id) {
        return Err(DispatchError::invalid(format!("malformed object '{}'", s)));
    }
    Ok((object_type.to_string(), object_id.to_string()))
}

/// The subject of a check: either a concrete object (`user:alice`) or a
/// subject set (`group:eng#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub object_type: String,
    pub object_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: None,
        }
    }

    pub fn subject_set(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: Some(relation.into()),
        }
    }

    pub fn is_subject_set(&self) -> bool {
        self.relation.is_some()
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)?;
        if let Some(relation) = &self.relation {
            write!(f, "#{}", relation)?;
        }
        Ok(())
    }
}

impl FromStr for SubjectRef {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object, relation) = match s.split_once('#') {
            Some((object, relation)) => {
                if !is_valid_identifier(relation) {
                    return Err(DispatchError::invalid(format!(
                        "malformed subject relation in '{}'",
                        s
                    )));
                }
                (object, Some(relation.to_string()))
            }
            None => (s, None),
        };
        let (object_type, object_id) = parse_object(object)?;
        Ok(Self {
            object_type,
            object_id,
            relation,
        })
    }
}

/// Whether a check may be answered from, and stored in, the result cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Consistency {
    #[default]
    MinimizeLatency,
    FullyConsistent,
}

/// Dispatch bookkeeping carried alongside a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default = "default_depth")]
    pub depth_remaining: u32,
}

fn default_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            depth_remaining: default_depth(),
        }
    }
}

/// A single relation check: does `subject` have `relation` on
/// `object_type:object_id`?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectRef>,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default)]
    pub meta: RequestMeta,
}

impl CheckRequest {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            subject: None,
            consistency: Consistency::default(),
            meta: RequestMeta::default(),
        }
    }

    pub fn with_subject(mut self, subject: SubjectRef) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_depth(mut self, depth_remaining: u32) -> Self {
        self.meta.depth_remaining = depth_remaining;
        self
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if !is_valid_identifier(&self.object_type) {
            return Err(DispatchError::invalid(format!(
                "malformed object type '{}'",
                self.object_type
            )));
        }
        if !is_valid_object_id(&self.object_id) {
            return Err(DispatchError::invalid(format!(
                "malformed object id '{}'",
                self.object_id
            )));
        }
        if !is_valid_identifier(&self.relation) {
            return Err(DispatchError::invalid(format!(
                "malformed relation '{}'",
                self.relation
            )));
        }
        if let Some(subject) = &self.subject {
            let relation_ok = subject
                .relation
                .as_deref()
                .map_or(true, is_valid_identifier);
            if !is_valid_identifier(&subject.object_type)
                || !is_valid_object_id(&subject.object_id)
                || !relation_ok
            {
                return Err(DispatchError::invalid(format!(
                    "malformed subject '{}'",
                    subject
                )));
            }
        }
        Ok(())
    }

    /// Builds a derived check for the same subject on another object/relation.
    ///
    /// Fails with [`DispatchError::MaxDepthExceeded`] once the depth budget is
    /// spent, which is what stops rewrite cycles.
    pub fn derive(
        &self,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> DispatchResult<CheckRequest> {
        if self.meta.depth_remaining == 0 {
            return Err(DispatchError::MaxDepthExceeded(self.to_string()));
        }
        Ok(CheckRequest {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            subject: self.subject.clone(),
            consistency: self.consistency,
            meta: RequestMeta {
                depth_remaining: self.meta.depth_remaining - 1,
            },
        })
    }

    /// Rewrite to another relation on the same object.
    pub fn rewrite(&self, relation: impl Into<String>) -> DispatchResult<CheckRequest> {
        self.derive(self.object_type.clone(), self.object_id.clone(), relation)
    }

    /// Key used to pick the owning peer.
    pub fn routing_key(&self) -> &[u8] {
        self.object_id.as_bytes()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(self)
    }
}

impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.object_type, self.object_id, self.relation)?;
        if let Some(subject) = &self.subject {
            write!(f, "@{}", subject)?;
        }
        Ok(())
    }
}

impl FromStr for CheckRequest {
    type Err = DispatchError;

    /// Parses `type:id#relation` with an optional `@subject` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, subject) = match s.split_once('@') {
            Some((resource, subject)) => (resource, Some(subject.parse::<SubjectRef>()?)),
            None => (s, None),
        };
        let (object, relation) = resource
            .split_once('#')
            .ok_or_else(|| DispatchError::invalid(format!("expected type:id#relation, got '{}'", s)))?;
        let (object_type, object_id) = parse_object(object)?;
        let request = CheckRequest {
            subject,
            ..CheckRequest::new(object_type, object_id, relation)
        };
        request.validate()?;
        Ok(request)
    }
}

/// Memoization key for a check.
///
/// Built from the full request, subject included. A key without a subject
/// (`document:1#editor`) denotes a subject-independent fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(req: &CheckRequest) -> Self {
        CacheKey(req.to_string())
    }

    /// The subject-independent key for the request's object and relation.
    pub fn object_relation(req: &CheckRequest) -> Self {
        CacheKey(format!(
            "{}:{}#{}",
            req.object_type, req.object_id, req.relation
        ))
    }

    /// Whether the key names a subject (`...@type:id`).
    pub fn has_subject(&self) -> bool {
        self.0.contains('@')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CacheKey {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let request: CheckRequest = s.parse()?;
        Ok(CacheKey::for_request(&request))
    }
}

/// Bookkeeping returned with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Number of derived checks issued to produce this answer.
    #[serde(default)]
    pub dispatch_count: u32,
    /// Longest rewrite chain below this check.
    #[serde(default)]
    pub depth_required: u32,
    /// Served from the result cache without evaluation.
    #[serde(default)]
    pub cached: bool,
    #[serde(default = "default_true")]
    pub cacheable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResultMeta {
    fn default() -> Self {
        Self {
            dispatch_count: 0,
            depth_required: 0,
            cached: false,
            cacheable: true,
        }
    }
}

impl ResultMeta {
    /// Folds a sibling's bookkeeping into this one.
    pub fn absorb(&mut self, other: &ResultMeta) {
        self.dispatch_count = self.dispatch_count.saturating_add(other.dispatch_count);
        self.depth_required = self.depth_required.max(other.depth_required);
        self.cacheable &= other.cacheable;
    }
}

/// Answer to a [`CheckRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub allowed: bool,
    #[serde(default)]
    pub meta: ResultMeta,
}

impl CheckResult {
    pub fn new(allowed: bool) -> Self {
        Self {
            allowed,
            meta: ResultMeta::default(),
        }
    }

    pub fn allowed() -> Self {
        Self::new(true)
    }

    pub fn denied() -> Self {
        Self::new(false)
    }

    pub fn non_cacheable(mut self) -> Self {
        self.meta.cacheable = false;
        self
    }

    /// Wraps the answer of a derived check as seen by its parent.
    pub fn from_derived(child: CheckResult) -> Self {
        Self {
            allowed: child.allowed,
            meta: ResultMeta {
                dispatch_count: child.meta.dispatch_count.saturating_add(1),
                depth_required: child.meta.depth_required.saturating_add(1),
                cached: false,
                cacheable: child.meta.cacheable,
            },
        }
    }
}

/// A cluster member able to run a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub address: String,
}

impl Peer {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}
