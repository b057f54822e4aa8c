pub mod api;
pub mod config;
pub mod database;
pub mod errors;
pub mod flashcard_extractor;
pub mod flashcard_service;
pub mod generation_service;
pub mod llm_providers;
pub mod logging;
pub mod models;
pub mod pdf_text;
pub mod prompt;
pub mod review_scheduler;
pub mod text_normalizer;


pub use database::Database;
pub use errors::*;
pub use flashcard_extractor::{extract, extract_with_grammar, Extraction, Grammar};
pub use flashcard_service::{Access, FlashcardService, FlashcardStore};
pub use generation_service::{GenerationRequest, GenerationService};
pub use llm_providers::{
    CompletionClient, CompletionError, CompletionRequest, LLMProvider, LLMProviderFactory,
    LLMProviderType,
};
pub use models::*;
pub use review_scheduler::ReviewScheduler;
pub use text_normalizer::{deep_normalize, normalize};
