use relcheck::{CheckRequest, CheckResult, Consistency, DispatchError, SubjectRef};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Consistency requested by a client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyParam {
    /// Answer from the result cache when possible
    #[default]
    MinimizeLatency,

    /// Bypass the result cache
    FullyConsistent,
}

impl From<ConsistencyParam> for Consistency {
    fn from(param: ConsistencyParam) -> Self {
        match param {
            ConsistencyParam::MinimizeLatency => Consistency::MinimizeLatency,
            ConsistencyParam::FullyConsistent => Consistency::FullyConsistent,
        }
    }
}

/// Check request model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckRequestBody {
    /// Object type, e.g. `document`
    pub object_type: String,

    /// Object identifier; also the routing key
    pub object_id: String,

    /// Relation to check, e.g. `viewer`
    pub relation: String,

    /// Subject as `type:id` or `type:id#relation`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default)]
    pub consistency: ConsistencyParam,
}

impl TryFrom<CheckRequestBody> for CheckRequest {
    type Error = DispatchError;

    fn try_from(body: CheckRequestBody) -> Result<Self, Self::Error> {
        let mut request = CheckRequest::new(body.object_type, body.object_id, body.relation)
            .with_consistency(body.consistency.into());
        if let Some(subject) = body.subject {
            request = request.with_subject(subject.parse::<SubjectRef>()?);
        }
        request.validate()?;
        Ok(request)
    }
}

/// Check response model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckResponseBody {
    /// Whether the subject has the relation
    pub allowed: bool,

    /// Derived checks issued to answer this one
    pub dispatch_count: u32,

    /// Longest rewrite chain below this check
    pub depth_required: u32,

    /// Answered from the result cache
    pub cached: bool,
}

impl From<CheckResult> for CheckResponseBody {
    fn from(result: CheckResult) -> Self {
        Self {
            allowed: result.allowed,
            dispatch_count: result.meta.dispatch_count,
            depth_required: result.meta.depth_required,
            cached: result.meta.cached,
        }
    }
}
