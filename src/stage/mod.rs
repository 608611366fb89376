//! The stage table: static configuration of the four-stage pipeline.
//!
//! No control flow lives here. Each descriptor names what a stage consumes,
//! its output-size ceiling, and which session status marker a success
//! advances to; `prompts` assembles the actual backend request. The runner
//! stays generic over how many stages exist and what each one consumes.

pub mod prompts;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationRequest;
use crate::pipeline::models::Artifact;
use crate::session::SessionStatus;

/// Identifier of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Facts,
    Hypotheses,
    Requirements,
    Blueprint,
}

impl StageId {
    pub fn as_str(self) -> &'static str {
        match self {
            StageId::Facts => "facts",
            StageId::Hypotheses => "hypotheses",
            StageId::Requirements => "requirements",
            StageId::Blueprint => "blueprint",
        }
    }

    /// Position in the execution order.
    pub fn position(self) -> usize {
        match self {
            StageId::Facts => 0,
            StageId::Hypotheses => 1,
            StageId::Requirements => 2,
            StageId::Blueprint => 3,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facts" => Ok(StageId::Facts),
            "hypotheses" => Ok(StageId::Hypotheses),
            "requirements" => Ok(StageId::Requirements),
            "blueprint" => Ok(StageId::Blueprint),
            other => Err(anyhow::anyhow!("Unknown stage: {}", other)),
        }
    }
}

/// Descriptor of one stage.
pub struct Stage {
    pub id: StageId,
    /// Stages whose artifacts this stage's prompt consumes. Always earlier
    /// in the table than the stage itself.
    pub depends_on: &'static [StageId],
    /// Output-size ceiling hint for the backend call.
    pub max_output_tokens: u32,
    /// Marker the session advances to when this stage completes.
    pub status_on_success: SessionStatus,
}

/// The pipeline's stages in execution order.
pub const STAGES: [Stage; 4] = [
    Stage {
        id: StageId::Facts,
        depends_on: &[],
        max_output_tokens: 4096,
        status_on_success: SessionStatus::FactsExtracted,
    },
    Stage {
        id: StageId::Hypotheses,
        depends_on: &[StageId::Facts],
        max_output_tokens: 4096,
        status_on_success: SessionStatus::HypothesesDrafted,
    },
    Stage {
        id: StageId::Requirements,
        depends_on: &[StageId::Facts, StageId::Hypotheses],
        max_output_tokens: 8192,
        status_on_success: SessionStatus::RequirementsDrafted,
    },
    Stage {
        id: StageId::Blueprint,
        depends_on: &[StageId::Requirements],
        max_output_tokens: 8192,
        status_on_success: SessionStatus::BlueprintReady,
    },
];

/// All stages in execution order.
pub fn stage_table() -> &'static [Stage] {
    &STAGES
}

impl Stage {
    /// Assemble the backend request for this stage from the transcript and
    /// the run's working set of prior artifacts.
    pub fn build_request(
        &self,
        transcript: &str,
        deps: &HashMap<StageId, Artifact>,
    ) -> GenerationRequest {
        prompts::build_request(self, transcript, deps)
    }

    /// The fallback artifact substituted when extraction fails: the raw
    /// backend text, verbatim.
    pub fn degraded_artifact(&self, raw: &str) -> Artifact {
        Artifact::Degraded {
            stage: self.id,
            raw: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_table_order_matches_positions() {
        for (index, stage) in stage_table().iter().enumerate() {
            assert_eq!(stage.id.position(), index);
        }
    }

    #[test]
    fn test_dependencies_point_strictly_backward() {
        for stage in stage_table() {
            for dep in stage.depends_on {
                assert!(
                    dep.position() < stage.id.position(),
                    "stage {} depends on later stage {}",
                    stage.id,
                    dep
                );
            }
        }
    }

    #[test]
    fn test_status_markers_advance_with_the_table() {
        let mut previous = SessionStatus::Created.rank();
        for stage in stage_table() {
            assert!(stage.status_on_success.rank() > previous);
            previous = stage.status_on_success.rank();
        }
    }

    #[test]
    fn test_stage_id_round_trips_through_str() {
        for stage in stage_table() {
            let parsed: StageId = stage.id.as_str().parse().unwrap();
            assert_eq!(parsed, stage.id);
        }
        assert!("deploy".parse::<StageId>().is_err());
    }

    #[test]
    fn test_degraded_artifact_carries_raw_text_verbatim() {
        let raw = "I can't answer that.\n\nSorry.";
        let artifact = STAGES[0].degraded_artifact(raw);
        match artifact {
            Artifact::Degraded { stage, raw: kept } => {
                assert_eq!(stage, StageId::Facts);
                assert_eq!(kept, raw);
            }
            _ => panic!("Expected degraded artifact"),
        }
    }
}
