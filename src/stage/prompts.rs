//! Per-stage system prompts and request assembly.
//!
//! Every prompt demands a single JSON object in an exact shape so the
//! extractor has something to aim at. Prior artifacts are rendered into the
//! task message as sections: structured artifacts as pretty-printed JSON,
//! degraded ones as their raw text (later stages can consume arbitrary
//! text, so a degraded upstream never blocks the pipeline).

use std::collections::HashMap;

use crate::backend::{ChatMessage, GenerationRequest};
use crate::pipeline::models::Artifact;

use super::{Stage, StageId};

/// System prompt for the facts stage.
pub const FACTS_SYSTEM_PROMPT: &str = r#"You are extracting factual statements from a product interview transcript.

A fact is something the interviewee actually said or clearly implied about their
product, users, constraints, or environment. Do not invent, generalize, or
editorialize.

Output ONLY a JSON object in this exact format (no other text):
{
  "facts": [
    {
      "statement": "One factual statement in plain language",
      "topic": "users|problem|workflow|constraints|environment|other",
      "confidence": "high|medium|low"
    }
  ]
}

Guidelines:
- One statement per fact; split compound statements
- Use "low" confidence for anything inferred rather than stated
- Keep statements under 200 characters
- Preserve concrete numbers, names, and tool references exactly"#;

/// System prompt for the hypotheses stage.
pub const HYPOTHESES_SYSTEM_PROMPT: &str = r#"You are deriving product hypotheses from extracted interview facts.

A hypothesis is a falsifiable claim about what the product must do or how users
will behave, grounded in the facts provided. Each one should be something a
requirements document could later commit to or reject.

Output ONLY a JSON object in this exact format (no other text):
{
  "hypotheses": [
    {
      "statement": "A falsifiable claim about the product or its users",
      "rationale": "Which facts support this and how",
      "risk": "high|medium|low"
    }
  ]
}

Guidelines:
- Ground every hypothesis in the provided facts; cite them in the rationale
- Mark "high" risk where the facts are thin or contradictory
- Prefer fewer, sharper hypotheses over exhaustive lists"#;

/// System prompt for the requirements stage.
pub const REQUIREMENTS_SYSTEM_PROMPT: &str = r#"You are writing a requirements document from interview facts and product hypotheses.

Output ONLY a JSON object in this exact format (no other text):
{
  "functional": [
    "The system shall ..."
  ],
  "non_functional": [
    "Measurable quality requirement"
  ],
  "constraints": [
    "Hard constraint from the interview (stack, budget, compliance, ...)"
  ]
}

Guidelines:
- Every functional requirement must trace to a fact or hypothesis
- Non-functional requirements need a measurable target where possible
- Constraints are things the solution may not violate, not preferences
- Write requirements as complete sentences, one obligation each"#;

/// System prompt for the blueprint stage.
pub const BLUEPRINT_SYSTEM_PROMPT: &str = r#"You are turning a requirements document into an implementation blueprint.

Output ONLY a JSON object in this exact format (no other text):
{
  "overview": "One paragraph describing the system to build",
  "components": [
    {
      "name": "Component name",
      "description": "What it does and which requirements it covers",
      "dependencies": ["other-component-names"]
    }
  ],
  "build_order": [
    "component names in a workable build sequence"
  ]
}

Guidelines:
- Components are things that get built, not concepts
- Dependencies must reference other component names exactly
- The build order must respect every dependency
- Cover all functional requirements; note any you could not place"#;

/// Per-stage task line appended after the rendered sections.
fn task_line(id: StageId) -> &'static str {
    match id {
        StageId::Facts => "Extract the facts from the transcript above.",
        StageId::Hypotheses => "Derive product hypotheses from the facts above.",
        StageId::Requirements => {
            "Write the requirements document from the facts and hypotheses above."
        }
        StageId::Blueprint => "Produce the implementation blueprint from the requirements above.",
    }
}

fn system_prompt(id: StageId) -> &'static str {
    match id {
        StageId::Facts => FACTS_SYSTEM_PROMPT,
        StageId::Hypotheses => HYPOTHESES_SYSTEM_PROMPT,
        StageId::Requirements => REQUIREMENTS_SYSTEM_PROMPT,
        StageId::Blueprint => BLUEPRINT_SYSTEM_PROMPT,
    }
}

/// Assemble the full request for a stage.
pub(crate) fn build_request(
    stage: &Stage,
    transcript: &str,
    deps: &HashMap<StageId, Artifact>,
) -> GenerationRequest {
    let mut sections: Vec<String> = Vec::new();

    if stage.depends_on.is_empty() {
        sections.push(format!("## TRANSCRIPT\n\n{}", transcript));
    }

    for dep in stage.depends_on {
        match deps.get(dep) {
            Some(Artifact::Structured { value, .. }) => {
                let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
                sections.push(format!("## {}\n\n{}", dep.as_str().to_uppercase(), rendered));
            }
            Some(Artifact::Degraded { raw, .. }) => {
                sections.push(format!(
                    "## {} (unstructured)\n\n{}",
                    dep.as_str().to_uppercase(),
                    raw
                ));
            }
            None => {}
        }
    }

    sections.push(format!("## TASK\n\n{}", task_line(stage.id)));

    GenerationRequest {
        system: system_prompt(stage.id).to_string(),
        messages: vec![ChatMessage::user(sections.join("\n\n"))],
        max_output_tokens: stage.max_output_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::STAGES;
    use serde_json::json;

    // =========================================
    // Prompt constant tests
    // =========================================

    #[test]
    fn test_prompts_demand_json_only_output() {
        for prompt in [
            FACTS_SYSTEM_PROMPT,
            HYPOTHESES_SYSTEM_PROMPT,
            REQUIREMENTS_SYSTEM_PROMPT,
            BLUEPRINT_SYSTEM_PROMPT,
        ] {
            assert!(prompt.contains("Output ONLY a JSON object"));
            assert!(prompt.contains("no other text"));
        }
    }

    #[test]
    fn test_prompts_name_their_top_level_keys() {
        assert!(FACTS_SYSTEM_PROMPT.contains("\"facts\""));
        assert!(HYPOTHESES_SYSTEM_PROMPT.contains("\"hypotheses\""));
        assert!(REQUIREMENTS_SYSTEM_PROMPT.contains("\"functional\""));
        assert!(REQUIREMENTS_SYSTEM_PROMPT.contains("\"non_functional\""));
        assert!(BLUEPRINT_SYSTEM_PROMPT.contains("\"components\""));
        assert!(BLUEPRINT_SYSTEM_PROMPT.contains("\"build_order\""));
    }

    // =========================================
    // build_request tests
    // =========================================

    #[test]
    fn test_facts_request_carries_the_transcript() {
        let request = STAGES[0].build_request("We discussed invoices.", &HashMap::new());
        assert_eq!(request.messages.len(), 1);
        let content = &request.messages[0].content;
        assert!(content.contains("## TRANSCRIPT"));
        assert!(content.contains("We discussed invoices."));
        assert!(content.contains("## TASK"));
        assert_eq!(request.max_output_tokens, 4096);
    }

    #[test]
    fn test_dependent_request_renders_structured_artifact() {
        let mut deps = HashMap::new();
        deps.insert(
            StageId::Facts,
            Artifact::Structured {
                stage: StageId::Facts,
                value: json!({"facts": [{"statement": "uses stripe"}]}),
            },
        );
        let request = STAGES[1].build_request("ignored", &deps);
        let content = &request.messages[0].content;
        assert!(content.contains("## FACTS"));
        assert!(content.contains("uses stripe"));
        assert!(!content.contains("## TRANSCRIPT"));
    }

    #[test]
    fn test_dependent_request_renders_degraded_artifact_verbatim() {
        let mut deps = HashMap::new();
        deps.insert(
            StageId::Facts,
            Artifact::Degraded {
                stage: StageId::Facts,
                raw: "The interviewee mostly talked about spreadsheets.".to_string(),
            },
        );
        let request = STAGES[1].build_request("ignored", &deps);
        let content = &request.messages[0].content;
        assert!(content.contains("## FACTS (unstructured)"));
        assert!(content.contains("mostly talked about spreadsheets"));
    }

    #[test]
    fn test_requirements_request_renders_both_dependencies() {
        let mut deps = HashMap::new();
        deps.insert(
            StageId::Facts,
            Artifact::Structured {
                stage: StageId::Facts,
                value: json!({"facts": []}),
            },
        );
        deps.insert(
            StageId::Hypotheses,
            Artifact::Structured {
                stage: StageId::Hypotheses,
                value: json!({"hypotheses": []}),
            },
        );
        let request = STAGES[2].build_request("ignored", &deps);
        let content = &request.messages[0].content;
        assert!(content.contains("## FACTS"));
        assert!(content.contains("## HYPOTHESES"));
    }
}
