//! Prompt construction for the two attempt tiers

use crate::fetcher::FetchedContent;
use crate::types::{AnalyzedContent, AttemptKind};

const OUTPUT_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{
  "summary_title": string,
  "overall_summary_sentence": string,
  "committee_name": string,
  "agenda_items": [ { "title": string, "summary": string } ]
}"#;

/// Builds the regular and shortened analysis prompts
#[derive(Clone, Debug, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    /// Create a builder
    pub fn new() -> Self {
        Self
    }

    /// Prompt for the given attempt tier
    pub fn build(
        &self,
        kind: AttemptKind,
        record: &AnalyzedContent,
        content: &FetchedContent,
    ) -> String {
        match kind {
            AttemptKind::Regular => self.regular(record, content),
            AttemptKind::Shortened => self.shortened(record, content),
        }
    }

    /// Full prompt: complete instructions and the full document
    pub fn regular(&self, record: &AnalyzedContent, content: &FetchedContent) -> String {
        let mut prompt = String::with_capacity(content.text.len() + 1024);
        prompt.push_str(
            "You are analyzing a government gazette record: minutes or notices of a \
             committee or council meeting.\n\
             Identify the committee, summarize the record in one sentence, give it a short \
             title and list every agenda item with a brief summary.\n\n",
        );
        push_context(&mut prompt, record, content);
        prompt.push_str(OUTPUT_CONTRACT);
        prompt.push_str("\n\nDocument:\n");
        prompt.push_str(&content.text);
        prompt
    }

    /// Reduced prompt used after the regular tier is exhausted
    ///
    /// Mentions the previous failure so the model can avoid repeating it.
    pub fn shortened(&self, record: &AnalyzedContent, content: &FetchedContent) -> String {
        let mut prompt = String::with_capacity(content.text.len() + 512);
        prompt.push_str(
            "Summarize this government gazette record. Keep the answer brief and list at \
             most five agenda items.\n\n",
        );
        if let (Some(error_type), Some(message)) = (&record.error_type, &record.error_message) {
            prompt.push_str(&format!(
                "A previous analysis failed ({}): {}\nReturn only valid JSON.\n\n",
                error_type, message
            ));
        }
        push_context(&mut prompt, record, content);
        prompt.push_str(OUTPUT_CONTRACT);
        prompt.push_str("\n\nDocument excerpt:\n");
        prompt.push_str(&content.text);
        prompt
    }
}

fn push_context(prompt: &mut String, record: &AnalyzedContent, content: &FetchedContent) {
    if let Some(title) = &record.title {
        prompt.push_str(&format!("Title: {}\n", title));
    }
    prompt.push_str(&format!("Source: {}\n", record.source_url));
    if content.truncated {
        prompt.push_str("Note: the document was truncated; analyze the available part.\n");
    }
    prompt.push('\n');
}
