use crate::api::ApiResponse;
use crate::llm_providers::CompletionError;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("LLM service error: {0}")]
    LLMError(String),

    #[error("Missing or empty owner identity")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("No flashcards could be extracted: {0}")]
    Unprocessable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Failures of the generation pipeline, from source resolution to persistence.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("No usable source text: {0}")]
    SourceUnavailable(String),

    #[error("PDF could not be read: {0}")]
    PdfExtraction(String),

    #[error("Completion service failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("Completion contained no recognisable flashcards")]
    NoExtractableFlashcards { completion_preview: String },

    #[error("None of the {attempted} extracted flashcards could be saved")]
    PersistenceFailed { attempted: usize },

    #[error("Lesson '{0}' not found")]
    LessonNotFound(Uuid),

    #[error("Lesson belongs to another owner")]
    Forbidden,

    #[error("Card count must be between 1 and {max}, got {requested}")]
    InvalidCardCount { requested: u32, max: u32 },

    #[error("Store error: {0}")]
    Store(anyhow::Error),
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::SourceUnavailable(message) => ApiError::BadRequest(message),
            GenerationError::PdfExtraction(message) => {
                ApiError::BadRequest(format!("PDF could not be read: {}", message))
            }
            GenerationError::InvalidCardCount { .. } => ApiError::ValidationError(err.to_string()),
            GenerationError::Completion(inner) => ApiError::LLMError(inner.to_string()),
            GenerationError::NoExtractableFlashcards { .. } => {
                ApiError::Unprocessable("the AI response could not be parsed".to_string())
            }
            GenerationError::PersistenceFailed { .. } => ApiError::InternalError(err.to_string()),
            GenerationError::LessonNotFound(id) => {
                ApiError::NotFound(format!("Lesson with id '{}' not found", id))
            }
            GenerationError::Forbidden => {
                ApiError::Forbidden("lesson belongs to another owner".to_string())
            }
            GenerationError::Store(inner) => ApiError::DatabaseError(inner),
        }
    }
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::LLMError(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        let status = self.status_code();
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    status,
                    Json(ApiResponse::error(
                        context
                            .user_friendly_message
                            .unwrap_or_else(|| format!("{} not found", context.resource_type)),
                    )),
                )
            }
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Rejected request"
                );
                (status, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::Unauthorized | ApiError::Forbidden(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Access denied"
                );
                (status, Json(ApiResponse::error(self.to_string())))
            }
            ApiError::Unprocessable(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Unprocessable completion"
                );
                (
                    status,
                    Json(ApiResponse::error(context.user_friendly_message.unwrap_or_else(
                        || "No flashcards could be generated from the AI response.".to_string(),
                    ))),
                )
            }
            ApiError::LLMError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "LLM service error"
                );
                (
                    status,
                    Json(ApiResponse::error(
                        "AI service temporarily unavailable. Please try again.".to_string(),
                    )),
                )
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    status,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
            ApiError::InternalError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Internal server error"
                );
                (
                    status,
                    Json(ApiResponse::error(
                        "An internal error occurred. Please try again.".to_string(),
                    )),
                )
            }
        }
    }

    /// Simple conversion without context
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}

/// Helper macro for structured error logging
#[macro_export]
macro_rules! api_error {
    (not_found, $operation:expr, $resource_type:expr, $id:expr) => {
        $crate::errors::ApiError::NotFound(format!("{} with id '{}' not found", $resource_type, $id))
            .to_response_with_context(
                $crate::errors::ErrorContext::new($operation, $resource_type).with_id(&$id.to_string()),
            )
    };

    (validation, $operation:expr, $resource_type:expr, $message:expr) => {
        $crate::errors::ApiError::ValidationError($message.to_string())
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (unauthorized, $operation:expr, $resource_type:expr) => {
        $crate::errors::ApiError::Unauthorized
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };

    (forbidden, $operation:expr, $resource_type:expr, $id:expr) => {
        $crate::errors::ApiError::Forbidden(format!("{} '{}' belongs to another owner", $resource_type, $id))
            .to_response_with_context(
                $crate::errors::ErrorContext::new($operation, $resource_type).with_id(&$id.to_string()),
            )
    };

    (database, $operation:expr, $resource_type:expr, $error:expr) => {
        $crate::errors::classify_database_error(&$error)
            .to_response_with_context($crate::errors::ErrorContext::new($operation, $resource_type))
    };
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}

/// Map store errors onto ApiErrors by their message
pub fn classify_database_error(error: &anyhow::Error) -> ApiError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("not found") || error_str.contains("no rows") {
        ApiError::NotFound("Resource not found".to_string())
    } else if error_str.contains("foreign key constraint") {
        ApiError::NotFound("Referenced lesson not found".to_string())
    } else if error_str.contains("must not be empty")
        || error_str.contains("exceeds")
        || error_str.contains("cannot be null")
    {
        ApiError::ValidationError(error.to_string())
    } else {
        ApiError::DatabaseError(anyhow::anyhow!("{}", error))
    }
}
