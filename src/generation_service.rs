use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GenerationConfig, LLMConfig};
use crate::errors::GenerationError;
use crate::flashcard_extractor::extract_with_grammar;
use crate::flashcard_service::FlashcardStore;
use crate::llm_providers::{CompletionClient, CompletionRequest};
use crate::models::{Flashcard, GenerationOutcome};
use crate::pdf_text::PdfTextSource;
use crate::prompt::build_flashcard_prompt;
use crate::text_normalizer::{normalize, normalize_optional};
use crate::{log_llm_operation, log_service_start, log_service_success, log_service_warn};

const SERVICE: &str = "generation_service";
const COMPLETION_PREVIEW_CHARS: usize = 200;

/// One generation run. When both sources are given the PDF wins.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub lesson_id: Uuid,
    pub owner_id: String,
    pub pdf: Option<Vec<u8>>,
    pub text: Option<String>,
    pub cards_number: Option<u32>,
}

#[derive(Clone)]
pub struct GenerationService {
    completion: Arc<dyn CompletionClient>,
    store: Arc<dyn FlashcardStore>,
    pdf_source: Arc<dyn PdfTextSource>,
    max_tokens: u32,
    temperature: f32,
    limits: GenerationConfig,
}

impl GenerationService {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        store: Arc<dyn FlashcardStore>,
        pdf_source: Arc<dyn PdfTextSource>,
        llm_config: &LLMConfig,
        limits: GenerationConfig,
    ) -> Self {
        Self {
            completion,
            store,
            pdf_source,
            max_tokens: llm_config.max_tokens,
            temperature: llm_config.temperature,
            limits,
        }
    }

    pub fn limits(&self) -> &GenerationConfig {
        &self.limits
    }

    /// Get the provider name for logging and testing
    pub fn provider_name(&self) -> &'static str {
        self.completion.provider_name()
    }

    pub fn model_name(&self) -> &str {
        self.completion.model_name()
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutcome, GenerationError> {
        let started = Instant::now();
        log_service_start!(SERVICE, "generate", lesson_id = request.lesson_id);

        let card_count = self.resolve_card_count(request.cards_number)?;
        self.authorize(request.lesson_id, &request.owner_id).await?;
        let source_text = self.resolve_source(request.pdf, request.text).await?;

        let raw_completion = self.request_completion(&source_text, card_count).await?;
        let completion = normalize(&raw_completion);

        let extraction = extract_with_grammar(&completion);
        if extraction.drafts.is_empty() {
            warn!(
                lesson_id = %request.lesson_id,
                grammar = extraction.grammar.map(|g| g.as_str()).unwrap_or("none"),
                rejected = extraction.rejected,
                raw_completion = %raw_completion,
                "No flashcards parsed from completion"
            );
            return Err(GenerationError::NoExtractableFlashcards {
                completion_preview: completion.chars().take(COMPLETION_PREVIEW_CHARS).collect(),
            });
        }

        info!(
            lesson_id = %request.lesson_id,
            grammar = extraction.grammar.map(|g| g.as_str()).unwrap_or("none"),
            extracted = extraction.drafts.len(),
            rejected = extraction.rejected,
            "Flashcards parsed from completion"
        );

        let attempted = extraction.drafts.len();
        let mut flashcards: Vec<Flashcard> = Vec::with_capacity(attempted);
        for draft in &extraction.drafts {
            match self
                .store
                .insert_flashcard(request.lesson_id, &request.owner_id, draft)
                .await
            {
                Ok(flashcard) => flashcards.push(flashcard),
                Err(e) => {
                    warn!(
                        lesson_id = %request.lesson_id,
                        question = %draft.question,
                        error = %e,
                        "Failed to save generated flashcard"
                    );
                }
            }
        }

        if flashcards.is_empty() {
            return Err(GenerationError::PersistenceFailed { attempted });
        }

        let outcome = GenerationOutcome {
            lesson_id: request.lesson_id,
            extracted: attempted,
            failed: attempted - flashcards.len(),
            flashcards,
        };

        if outcome.is_partial() {
            log_service_warn!(
                SERVICE,
                "generate",
                format!("{} of {} flashcards could not be saved", outcome.failed, attempted)
            );
        }

        log_service_success!(
            SERVICE,
            "generate",
            lesson_id = outcome.lesson_id,
            card_count = outcome.flashcards.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );

        Ok(outcome)
    }

    fn resolve_card_count(&self, requested: Option<u32>) -> Result<u32, GenerationError> {
        let count = requested.unwrap_or(self.limits.default_card_count);
        if count == 0 || count > self.limits.max_card_count {
            return Err(GenerationError::InvalidCardCount {
                requested: count,
                max: self.limits.max_card_count,
            });
        }
        Ok(count)
    }

    async fn authorize(&self, lesson_id: Uuid, owner_id: &str) -> Result<(), GenerationError> {
        let lesson = self
            .store
            .find_lesson(lesson_id)
            .await
            .map_err(GenerationError::Store)?
            .ok_or(GenerationError::LessonNotFound(lesson_id))?;

        if lesson.owner_id != owner_id {
            return Err(GenerationError::Forbidden);
        }
        Ok(())
    }

    async fn resolve_source(
        &self,
        pdf: Option<Vec<u8>>,
        text: Option<String>,
    ) -> Result<String, GenerationError> {
        if let Some(bytes) = pdf.filter(|bytes| !bytes.is_empty()) {
            if bytes.len() > self.limits.max_pdf_bytes {
                return Err(GenerationError::SourceUnavailable(format!(
                    "PDF exceeds the {} byte limit",
                    self.limits.max_pdf_bytes
                )));
            }

            let text = self
                .pdf_source
                .extract(bytes)
                .await
                .map_err(|e| GenerationError::PdfExtraction(e.to_string()))?;

            if text.is_empty() {
                return Err(GenerationError::SourceUnavailable(
                    "Could not extract text from PDF. Ensure it is a text-based PDF, not scanned images."
                        .to_string(),
                ));
            }
            return Ok(text);
        }

        let text = normalize_optional(text.as_deref());
        if text.is_empty() {
            return Err(GenerationError::SourceUnavailable(
                "Please provide lesson text or upload a PDF.".to_string(),
            ));
        }
        Ok(text)
    }

    async fn request_completion(
        &self,
        source_text: &str,
        card_count: u32,
    ) -> Result<String, GenerationError> {
        let prompt = build_flashcard_prompt(source_text, card_count);
        let request = CompletionRequest::from_prompt(prompt, self.max_tokens, self.temperature);

        let provider = self.completion.provider_name();
        log_llm_operation!(
            start,
            "complete",
            provider = provider,
            text_length = source_text.len()
        );

        let started = Instant::now();
        match self.completion.complete(&request).await {
            Ok(raw) => {
                log_llm_operation!(
                    success,
                    "complete",
                    provider = provider,
                    duration_ms = started.elapsed().as_millis() as u64,
                    response_length = raw.len()
                );
                debug!(
                    preview = %raw.chars().take(COMPLETION_PREVIEW_CHARS).collect::<String>(),
                    "Completion received"
                );
                Ok(raw)
            }
            Err(e) => {
                log_llm_operation!(error, "complete", provider = provider, error = e);
                Err(GenerationError::Completion(e))
            }
        }
    }
}
