use serde::{Deserialize, Serialize};

use crate::model::ids::MaterialId;
use crate::model::question::Question;

//
// ─── MATERIAL ──────────────────────────────────────────────────────────────────
//

/// A source material (document, video transcript, note) and its accumulated
/// question list. The question list is append-only from this crate's
/// perspective; unrelated fields are never rewritten by the supply engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub title: String,
    pub language: String,
    pub transcript: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub questions: Vec<Question>,
}

impl Material {
    #[must_use]
    pub fn new(id: MaterialId, title: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            language: language.into(),
            transcript: None,
            description: None,
            summary: None,
            questions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Resolves the free-text context used when spawning a related question.
    ///
    /// Fallback chain, first non-blank wins: transcript, description, summary,
    /// title plus a generic note, and finally a minimal synthetic context built
    /// from the seed text itself. Resolution never fails.
    #[must_use]
    pub fn resolve_context(&self, seed_text: &str) -> ResolvedContext {
        fn non_blank(field: &Option<String>) -> Option<&str> {
            field.as_deref().map(str::trim).filter(|s| !s.is_empty())
        }

        if let Some(text) = non_blank(&self.transcript) {
            return ResolvedContext::new(text, ContextSource::Transcript);
        }
        if let Some(text) = non_blank(&self.description) {
            return ResolvedContext::new(text, ContextSource::Description);
        }
        if let Some(text) = non_blank(&self.summary) {
            return ResolvedContext::new(text, ContextSource::Summary);
        }
        if !self.title.trim().is_empty() {
            return ResolvedContext::new(
                format!(
                    "Study material titled \"{}\". No transcript is available; rely on general knowledge of the topic.",
                    self.title.trim()
                ),
                ContextSource::TitleNote,
            );
        }
        ResolvedContext::new(
            format!("Follow-up practice on the question: {}", seed_text.trim()),
            ContextSource::Synthetic,
        )
    }

    /// Most recent question texts from this material, newest last, capped.
    #[must_use]
    pub fn recent_question_texts(&self, cap: usize) -> Vec<String> {
        let skip = self.questions.len().saturating_sub(cap);
        self.questions
            .iter()
            .skip(skip)
            .map(|q| q.text().to_owned())
            .collect()
    }
}

/// Where the spawn context came from in the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Transcript,
    Description,
    Summary,
    TitleNote,
    Synthetic,
}

/// Free-text context resolved for a spawn call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContext {
    pub text: String,
    pub source: ContextSource,
}

impl ResolvedContext {
    #[must_use]
    pub fn new(text: impl Into<String>, source: ContextSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::question::{Origin, QuestionDraft};
    use crate::time::fixed_now;

    fn material() -> Material {
        Material::new(MaterialId::new("mat-1").unwrap(), "Cell Biology", "en")
    }

    #[test]
    fn transcript_wins_over_description() {
        let m = material()
            .with_transcript("full transcript")
            .with_description("short description");
        let ctx = m.resolve_context("seed");
        assert_eq!(ctx.source, ContextSource::Transcript);
        assert_eq!(ctx.text, "full transcript");
    }

    #[test]
    fn blank_transcript_falls_through() {
        let m = material().with_transcript("   ").with_summary("the summary");
        let ctx = m.resolve_context("seed");
        assert_eq!(ctx.source, ContextSource::Summary);
    }

    #[test]
    fn title_note_when_no_text_fields() {
        let ctx = material().resolve_context("seed");
        assert_eq!(ctx.source, ContextSource::TitleNote);
        assert!(ctx.text.contains("Cell Biology"));
    }

    #[test]
    fn synthetic_context_as_last_resort() {
        let mut m = material();
        m.title = "  ".into();
        let ctx = m.resolve_context("What is a ribosome?");
        assert_eq!(ctx.source, ContextSource::Synthetic);
        assert!(ctx.text.contains("What is a ribosome?"));
    }

    #[test]
    fn recent_texts_respects_cap_and_order() {
        let mut m = material();
        for i in 0..5 {
            let origin = Origin::new(m.id.clone(), m.title.clone());
            let q = QuestionDraft::open_response(format!("Q{i}"), "A")
                .validate(origin, fixed_now())
                .unwrap();
            m.questions.push(q);
        }
        let recent = m.recent_question_texts(3);
        assert_eq!(recent, vec!["Q2", "Q3", "Q4"]);
    }
}
