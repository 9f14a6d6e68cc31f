//! Reasoning prompt assembly (pure function of query, blueprint and groups)

use crate::summarizer::SummaryGroup;
use crate::types::{ContextBlueprint, Query, SourceType};

pub fn source_label(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Statute => "statute",
        SourceType::CaseLaw => "case law",
        SourceType::Regulation => "regulation",
        SourceType::Guidance => "guidance",
        SourceType::Commentary => "commentary",
        SourceType::Other => "other",
    }
}

/// Build the prompt sent to the model. Groups are labelled `[G1]`, `[G2]`...
/// at line start so the draft can reference them.
pub fn build_reasoning_prompt(
    query: &Query,
    blueprint: &ContextBlueprint,
    groups: &[SummaryGroup],
    conversation: &[String],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a legal research assistant. Answer the question using only the sources below.\n\n",
    );
    prompt.push_str(&format!("Question: {}\n", query.text.trim()));

    let areas: Vec<&str> = blueprint.detected_domains.iter().map(|d| d.label()).collect();
    prompt.push_str(&format!("Areas of law: {}\n", areas.join(", ")));
    prompt.push_str(&format!(
        "Complexity: {:?}. Urgency: {:?}.\n",
        blueprint.complexity, blueprint.urgency
    ));

    if !conversation.is_empty() {
        prompt.push_str("\nEarlier questions in this conversation:\n");
        for prior in conversation {
            prompt.push_str(&format!("- {}\n", prior));
        }
    }

    prompt.push('\n');
    if groups.is_empty() {
        prompt.push_str(
            "No supporting sources were retrieved. Answer cautiously, say that the answer is \
             not grounded in sources, and do not invent citations.\n",
        );
    } else {
        prompt.push_str("Sources (cite a group by its label, e.g. [G1]):\n");
        for group in groups {
            prompt.push_str(&format!("[{}] {}\n", group.label(), group.topic.label()));
            for doc in &group.documents {
                let excerpt = group
                    .excerpt_for(&doc.doc_id)
                    .map(|e| e.text.as_str())
                    .unwrap_or(doc.excerpt.as_str());
                prompt.push_str(&format!(
                    "  - {} ({}): \"{}\"\n",
                    doc.title,
                    source_label(doc.source_type),
                    excerpt
                ));
            }
        }
    }

    prompt.push_str(
        "\nRespond in this format:\n\
         STEP: <one inference per line, in order>\n\
         COUNTERPOINT: <a consideration that cuts the other way, if any>\n\
         ANSWER: <the final answer; support each claim with a group label such as [G1]>\n",
    );
    prompt
}
