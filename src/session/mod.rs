//! Session model and the pre-run access gate.
//!
//! A session captures one interview transcript and tracks a forward-only
//! status marker that the pipeline advances as stages complete. The marker
//! is written by the runner and consumed elsewhere; this crate never reads
//! it back to make decisions.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::PipelineError;

/// Forward-only progression of a session through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Created,
    FactsExtracted,
    HypothesesDrafted,
    RequirementsDrafted,
    BlueprintReady,
}

impl SessionStatus {
    /// Ordinal rank used to keep the marker forward-only.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::FactsExtracted => 1,
            SessionStatus::HypothesesDrafted => 2,
            SessionStatus::RequirementsDrafted => 3,
            SessionStatus::BlueprintReady => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::FactsExtracted => "facts_extracted",
            SessionStatus::HypothesesDrafted => "hypotheses_drafted",
            SessionStatus::RequirementsDrafted => "requirements_drafted",
            SessionStatus::BlueprintReady => "blueprint_ready",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "facts_extracted" => Ok(SessionStatus::FactsExtracted),
            "hypotheses_drafted" => Ok(SessionStatus::HypothesesDrafted),
            "requirements_drafted" => Ok(SessionStatus::RequirementsDrafted),
            "blueprint_ready" => Ok(SessionStatus::BlueprintReady),
            other => Err(anyhow::anyhow!("Unknown session status: {}", other)),
        }
    }
}

/// A captured interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner: String,
    pub title: String,
    /// Raw interview transcript the pipeline consumes.
    pub transcript: String,
    /// Short fingerprint of the transcript at import time.
    pub transcript_hash: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Session {
    pub fn new(owner: impl Into<String>, title: impl Into<String>, transcript: impl Into<String>) -> Self {
        let transcript = transcript.into();
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            title: title.into(),
            transcript_hash: transcript_fingerprint(&transcript),
            transcript,
            status: SessionStatus::Created,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Listing view of a session, without the transcript body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub status: SessionStatus,
    pub transcript_hash: String,
    pub created_at: String,
}

/// Compute the short SHA256 fingerprint of a transcript.
///
/// Used to detect that a session's artifacts were produced from an older
/// transcript. Truncated to 12 hex characters for brevity.
pub fn transcript_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)[..12].to_string()
}

/// Pre-run access decision for a session.
///
/// Invoked exactly once before a pipeline run starts; stages are never
/// re-checked mid-run.
pub trait AccessGate: Send + Sync {
    fn check_access(&self, session: &Session, identity: &str) -> Result<(), PipelineError>;
}

/// Grants access to the session's owner only.
pub struct OwnerGate;

impl AccessGate for OwnerGate {
    fn check_access(&self, session: &Session, identity: &str) -> Result<(), PipelineError> {
        if session.owner == identity {
            Ok(())
        } else {
            Err(PipelineError::AccessDenied {
                reason: format!("session {} belongs to another user", session.id),
            })
        }
    }
}
