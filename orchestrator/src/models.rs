use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// A validated, non-empty conversation split into history and the active query.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub history: Vec<Turn>,
    pub active: Turn,
}

impl TryFrom<Vec<Turn>> for Conversation {
    type Error = ApiError;

    fn try_from(mut turns: Vec<Turn>) -> Result<Self, Self::Error> {
        let active = turns
            .pop()
            .ok_or_else(|| ApiError::InvalidInput("conversation has no turns".to_string()))?;

        if active.content.trim().is_empty() {
            return Err(ApiError::InvalidInput("last turn has empty content".to_string()));
        }

        Ok(Conversation { history: turns, active })
    }
}

pub type EmbeddingVector = Vec<f32>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub review: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub stars: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Professor identifier.
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: MatchMetadata,
}
