use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::{classify_database_error, ApiError, ErrorContext, GenerationError},
    flashcard_service::{Access, FlashcardService},
    generation_service::{GenerationRequest, GenerationService},
    models::*,
    text_normalizer::{deep_normalize_payload, normalize_bytes},
};

// Import logging macros
use crate::{api_error, log_api_error, log_api_start, log_api_success, log_api_warn};

/// Header carrying the already-authenticated caller identity.
pub const OWNER_HEADER: &str = "x-user-id";

/// Headroom on top of the PDF limit for the other multipart fields.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub flashcard_service: FlashcardService,
    pub generation_service: GenerationService,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

type ErrorResponse = (StatusCode, Json<ApiResponse<()>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// Caller identity taken from the `X-User-Id` header.
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ErrorResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| OwnerId(value.to_string()))
            .ok_or_else(|| api_error!(unauthorized, "resolve_owner", "request"))
    }
}

/// Turn an ownership-checked lookup into a handler result.
fn granted<T>(
    access: anyhow::Result<Access<T>>,
    operation: &str,
    resource_type: &str,
    id: Uuid,
) -> Result<T, ErrorResponse> {
    match access {
        Ok(Access::Granted(value)) => Ok(value),
        Ok(Access::NotFound) => {
            log_api_warn!(operation, format!("{} {} not found", resource_type, id));
            Err(api_error!(not_found, operation, resource_type, id))
        }
        Ok(Access::Denied) => Err(api_error!(forbidden, operation, resource_type, id)),
        Err(e) => {
            let context = ErrorContext::new(operation, resource_type).with_id(&id.to_string());
            Err(classify_database_error(&e).to_response_with_context(context))
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "provider": state.generation_service.provider_name(),
        "model": state.generation_service.model_name(),
    })))
}

// Lesson endpoints
pub async fn create_lesson(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(request): Json<CreateLessonRequest>,
) -> ApiResult<Lesson> {
    log_api_start!("create_lesson");

    match state.flashcard_service.create_lesson(&owner, request).await {
        Ok(lesson) => {
            log_api_success!("create_lesson", lesson_id = lesson.id, "lesson created");
            Ok(Json(ApiResponse::success(lesson)))
        }
        Err(e) => Err(api_error!(database, "create_lesson", "lesson", e)),
    }
}

pub async fn list_lessons(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
) -> ApiResult<Vec<Lesson>> {
    log_api_start!("list_lessons");

    match state.flashcard_service.list_lessons(&owner).await {
        Ok(lessons) => {
            log_api_success!("list_lessons", count = lessons.len(), "lessons listed");
            Ok(Json(ApiResponse::success(lessons)))
        }
        Err(e) => {
            log_api_error!("list_lessons", error = e, "database error listing lessons");
            Err(ApiError::DatabaseError(e)
                .to_response_with_context(ErrorContext::new("list_lessons", "lesson")))
        }
    }
}

pub async fn delete_lesson(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> ApiResult<bool> {
    log_api_start!("delete_lesson", lesson_id = id);

    let access = state.flashcard_service.delete_lesson(&owner, id).await;
    granted(access, "delete_lesson", "Lesson", id)?;

    log_api_success!("delete_lesson", lesson_id = id, "lesson deleted");
    Ok(Json(ApiResponse::success(true)))
}

pub async fn get_lesson_flashcards(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> ApiResult<LessonWithFlashcards> {
    log_api_start!("get_lesson_flashcards", lesson_id = id);

    let access = state.flashcard_service.get_lesson_with_flashcards(&owner, id).await;
    let lesson = granted(access, "get_lesson_flashcards", "Lesson", id)?;

    Ok(Json(ApiResponse::success(lesson)))
}

// Flashcard endpoints
pub async fn create_flashcard(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(request): Json<CreateFlashcardRequest>,
) -> ApiResult<Flashcard> {
    let lesson_id = request.lesson_id;
    log_api_start!("create_flashcard", lesson_id = lesson_id);

    let access = state.flashcard_service.create_flashcard(&owner, request).await;
    let flashcard = granted(access, "create_flashcard", "Lesson", lesson_id)?;

    log_api_success!("create_flashcard", flashcard_id = flashcard.id, "flashcard created");
    Ok(Json(ApiResponse::success(flashcard)))
}

pub async fn update_flashcard(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateFlashcardRequest>,
) -> ApiResult<Flashcard> {
    log_api_start!("update_flashcard", flashcard_id = id);

    let access = state.flashcard_service.update_flashcard(&owner, id, request).await;
    let flashcard = granted(access, "update_flashcard", "Flashcard", id)?;

    log_api_success!("update_flashcard", flashcard_id = id, "flashcard updated");
    Ok(Json(ApiResponse::success(flashcard)))
}

pub async fn delete_flashcard(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
) -> ApiResult<bool> {
    log_api_start!("delete_flashcard", flashcard_id = id);

    let access = state.flashcard_service.delete_flashcard(&owner, id).await;
    granted(access, "delete_flashcard", "Flashcard", id)?;

    log_api_success!("delete_flashcard", flashcard_id = id, "flashcard deleted");
    Ok(Json(ApiResponse::success(true)))
}

// Review endpoints
pub async fn rate_flashcard(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Path(id): Path<Uuid>,
    Json(request): Json<RateFlashcardRequest>,
) -> ApiResult<Flashcard> {
    log_api_start!("rate_flashcard", flashcard_id = id);

    let access = state
        .flashcard_service
        .rate_flashcard(&owner, id, request.difficulty)
        .await;
    let flashcard = granted(access, "rate_flashcard", "Flashcard", id)?;

    info!(
        flashcard_id = %id,
        difficulty = %request.difficulty,
        next_review_at = ?flashcard.next_review_at,
        "Flashcard rated"
    );
    Ok(Json(ApiResponse::success(flashcard)))
}

// Generation endpoints
pub async fn generate_from_text(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    Json(request): Json<GenerateFromTextRequest>,
) -> Result<Json<Value>, ErrorResponse> {
    let generation = GenerationRequest {
        lesson_id: request.lesson_id,
        owner_id: owner,
        pdf: None,
        text: request.text,
        cards_number: request.cards_number,
    };

    run_generation(&state, generation, "generate_from_text").await
}

pub async fn generate_from_upload(
    State(state): State<AppState>,
    OwnerId(owner): OwnerId,
    mut multipart: Multipart,
) -> Result<Json<Value>, ErrorResponse> {
    let mut lesson_id: Option<Uuid> = None;
    let mut pdf: Option<Vec<u8>> = None;
    let mut text: Option<String> = None;
    let mut cards_number: Option<u32> = None;

    let invalid = |message: String| api_error!(validation, "generate_from_upload", "generation", message);

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(invalid(format!("malformed multipart body: {}", e))),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "pdf" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| invalid(format!("could not read PDF upload: {}", e)))?;
                pdf = Some(bytes.to_vec());
            }
            "text" => {
                // Lesson text may arrive in a legacy encoding.
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| invalid(format!("could not read text field: {}", e)))?;
                text = Some(normalize_bytes(&bytes));
            }
            "lesson_id" | "cards_number" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| invalid(format!("could not read {}: {}", name, e)))?;
                let value = value.trim();
                if name == "lesson_id" {
                    lesson_id = Some(
                        Uuid::parse_str(value)
                            .map_err(|_| invalid(format!("invalid lesson_id '{}'", value)))?,
                    );
                } else if !value.is_empty() {
                    cards_number = Some(
                        value
                            .parse()
                            .map_err(|_| invalid(format!("invalid cards_number '{}'", value)))?,
                    );
                }
            }
            other => {
                warn!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let lesson_id = lesson_id.ok_or_else(|| invalid("lesson_id is required".to_string()))?;

    let generation = GenerationRequest {
        lesson_id,
        owner_id: owner,
        pdf,
        text,
        cards_number,
    };

    run_generation(&state, generation, "generate_from_upload").await
}

async fn run_generation(
    state: &AppState,
    request: GenerationRequest,
    operation: &str,
) -> Result<Json<Value>, ErrorResponse> {
    let lesson_id = request.lesson_id;
    log_api_start!(operation, lesson_id = lesson_id);

    match state.generation_service.generate(request).await {
        Ok(outcome) => {
            log_api_success!(
                operation,
                lesson_id = lesson_id,
                format!("{} flashcards generated", outcome.flashcards.len())
            );

            deep_normalize_payload(&ApiResponse::success(outcome))
                .map(Json)
                .map_err(|e| {
                    ApiError::InternalError(format!("response serialization failed: {}", e))
                        .to_response_with_context(
                            ErrorContext::new(operation, "generation").with_id(&lesson_id.to_string()),
                        )
                })
        }
        Err(e) => {
            let mut context =
                ErrorContext::new(operation, "generation").with_id(&lesson_id.to_string());
            if matches!(e, GenerationError::NoExtractableFlashcards { .. }) {
                context = context
                    .with_user_message("Failed to parse flashcards from AI response. Please try again.");
            }
            Err(ApiError::from(e).to_response_with_context(context))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.generation_service.limits().max_pdf_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/api/health", get(health))
        // Lesson routes
        .route("/api/lessons", post(create_lesson))
        .route("/api/lessons", get(list_lessons))
        .route("/api/lessons/:id", delete(delete_lesson))
        .route("/api/lessons/:id/flashcards", get(get_lesson_flashcards))
        // Flashcard routes
        .route("/api/flashcards", post(create_flashcard))
        .route("/api/flashcards/:id", put(update_flashcard))
        .route("/api/flashcards/:id", delete(delete_flashcard))
        .route("/api/flashcards/:id/rate", post(rate_flashcard))
        // Generation routes
        .route("/api/generate/text", post(generate_from_text))
        .route("/api/generate/pdf", post(generate_from_upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
