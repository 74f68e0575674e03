//! Request and response bodies of the grouping REST API.
//!
//! Only the fields the client acts on are typed; product cards keep any
//! remaining attributes as raw JSON.

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use crate::types::TaskId;
use crate::validation::validate_non_blank;

/// Lowest accepted grouping rating.
pub const MIN_RATING: u8 = 1;

/// Highest accepted grouping rating.
pub const MAX_RATING: u8 = 5;

/// Body of `POST /grouping/request` and `POST /grouping/{taskId}/regenerate`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GroupingRequest {
    #[validate(custom(function = "validate_non_blank"))]
    pub query: String,
}

impl GroupingRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

/// Body of `POST /grouping/{taskId}/rate`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct RateRequest {
    #[validate(range(min = 1, max = 5))]
    pub rating: u8,
}

/// Response of the task-creating endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: TaskId,
}

/// One grouped product card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCard {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Any further attributes the backend attaches to the card.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Response of `GET /grouping/{taskId}/results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingResults {
    #[serde(default)]
    pub cards: Vec<ProductCard>,
}

/// A single filter facet and its selectable values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Response of `GET /grouping/{taskId}/filters`.
///
/// Accepts both `{"filters": [...]}` and a bare `[...]` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupingFilters {
    pub filters: Vec<FilterOption>,
}

impl<'de> Deserialize<'de> for GroupingFilters {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Wrapped { filters: Vec<FilterOption> },
            Bare(Vec<FilterOption>),
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Wrapped { filters } | Shape::Bare(filters) => GroupingFilters { filters },
        })
    }
}
