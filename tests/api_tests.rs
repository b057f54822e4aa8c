use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestRequest, TestServer};
use lesson_flashcards::{
    api::*,
    config::{GenerationConfig, LLMConfig},
    pdf_text::{PdfError, PdfTextSource},
    CompletionClient, CompletionError, CompletionRequest, Database, FlashcardService,
    GenerationService, LLMProviderType,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const LABELED_COMPLETION: &str = "FLASHCARD 1:\nQ: What is an atom?\nA: A basic unit of matter.\n\nFLASHCARD 2:\nQ: Define mass.\nA: Amount of matter in an object.";

/// Completion stub returning a fixed reply, or failing when `None`.
struct CannedCompletion(Option<String>);

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        self.0.clone().ok_or_else(|| CompletionError::Status {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "Canned"
    }

    fn model_name(&self) -> &str {
        "canned-model"
    }
}

struct CannedPdf;

#[async_trait]
impl PdfTextSource for CannedPdf {
    async fn extract(&self, bytes: Vec<u8>) -> Result<String, PdfError> {
        if bytes.starts_with(b"%PDF-") {
            Ok("Atoms and mass.".to_string())
        } else {
            Err(PdfError::NotPdf)
        }
    }
}

fn llm_config() -> LLMConfig {
    LLMConfig {
        api_key: "test_key".to_string(),
        base_url: None,
        provider: LLMProviderType::OpenRouter,
        model: None,
        max_tokens: 1500,
        temperature: 0.3,
        timeout_secs: 60,
        app_url: "http://localhost".to_string(),
        app_title: "Flashcard App".to_string(),
    }
}

async fn create_test_server_with(completion: Option<&str>) -> TestServer {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let flashcard_service = FlashcardService::new(db);
    let generation_service = GenerationService::new(
        Arc::new(CannedCompletion(completion.map(str::to_string))),
        Arc::new(flashcard_service.clone()),
        Arc::new(CannedPdf),
        &llm_config(),
        GenerationConfig::default(),
    );

    let app_state = AppState {
        flashcard_service,
        generation_service,
    };

    TestServer::new(create_router(app_state)).unwrap()
}

async fn create_test_server() -> TestServer {
    create_test_server_with(Some(LABELED_COMPLETION)).await
}

fn as_user(request: TestRequest, owner: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static(OWNER_HEADER),
        HeaderValue::from_str(owner).unwrap(),
    )
}

async fn create_lesson(server: &TestServer, owner: &str, name: &str) -> Uuid {
    let response = as_user(server.post("/api/lessons"), owner)
        .json(&json!({ "name": name }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    Uuid::parse_str(body["data"]["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;

    let response = server.get("/api/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["provider"], "Canned");
}

#[tokio::test]
async fn test_missing_owner_header_is_unauthorized() {
    let server = create_test_server().await;

    let response = server.get("/api/lessons").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_lesson_create_and_list() {
    let server = create_test_server().await;

    create_lesson(&server, "alice", "Biology").await;
    create_lesson(&server, "alice", "Chemistry").await;
    create_lesson(&server, "bob", "History").await;

    let response = as_user(server.get("/api/lessons"), "alice").await;
    response.assert_status_ok();

    let body: Value = response.json();
    let lessons = body["data"].as_array().unwrap();
    assert_eq!(lessons.len(), 2);
    assert!(lessons.iter().all(|l| l["owner_id"] == "alice"));
}

#[tokio::test]
async fn test_lesson_name_validation() {
    let server = create_test_server().await;

    let response = as_user(server.post("/api/lessons"), "alice")
        .json(&json!({ "name": "   " }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manual_flashcard_lifecycle() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Physics").await;

    // Create
    let response = as_user(server.post("/api/flashcards"), "alice")
        .json(&json!({
            "lesson_id": lesson_id,
            "question": "What is inertia?",
            "answer": "Resistance to changes in motion."
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["difficulty"], "medium");
    assert_eq!(body["data"]["repetition"], 0);
    assert!(body["data"]["next_review_at"].is_string());
    let flashcard_id = body["data"]["id"].as_str().unwrap().to_string();

    // Update
    let response = as_user(server.put(&format!("/api/flashcards/{}", flashcard_id)), "alice")
        .json(&json!({ "answer": "An object's resistance to acceleration." }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["question"], "What is inertia?");
    assert_eq!(body["data"]["answer"], "An object's resistance to acceleration.");

    // Rate
    let response = as_user(server.post(&format!("/api/flashcards/{}/rate", flashcard_id)), "alice")
        .json(&json!({ "difficulty": "easy" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["difficulty"], "easy");
    assert_eq!(body["data"]["repetition"], 1);

    // List
    let response = as_user(server.get(&format!("/api/lessons/{}/flashcards", lesson_id)), "alice").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["lesson"]["name"], "Physics");
    assert_eq!(body["data"]["flashcards"].as_array().unwrap().len(), 1);

    // Delete
    let response = as_user(server.delete(&format!("/api/flashcards/{}", flashcard_id)), "alice").await;
    response.assert_status_ok();

    let response = as_user(server.delete(&format!("/api/flashcards/{}", flashcard_id)), "alice").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_rating_is_rejected() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Physics").await;

    let response = as_user(server.post("/api/flashcards"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "question": "Q?", "answer": "A." }))
        .await;
    let body: Value = response.json();
    let flashcard_id = body["data"]["id"].as_str().unwrap().to_string();

    let response = as_user(server.post(&format!("/api/flashcards/{}/rate", flashcard_id)), "alice")
        .json(&json!({ "difficulty": "impossible" }))
        .await;

    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_ownership_is_enforced() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Private lesson").await;

    let response = as_user(server.get(&format!("/api/lessons/{}/flashcards", lesson_id)), "mallory").await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = as_user(server.delete(&format!("/api/lessons/{}", lesson_id)), "mallory").await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = as_user(server.post("/api/flashcards"), "mallory")
        .json(&json!({ "lesson_id": lesson_id, "question": "Q?", "answer": "A." }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = as_user(server.post("/api/generate/text"), "mallory")
        .json(&json!({ "lesson_id": lesson_id, "text": "Some text" }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_lesson_cascades() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Temporary").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "Atoms and mass." }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let flashcard_id = body["data"]["flashcards"][0]["id"].as_str().unwrap().to_string();

    let response = as_user(server.delete(&format!("/api/lessons/{}", lesson_id)), "alice").await;
    response.assert_status_ok();

    let response = as_user(server.delete(&format!("/api/flashcards/{}", flashcard_id)), "alice").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = as_user(server.get(&format!("/api/lessons/{}/flashcards", lesson_id)), "alice").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_from_text() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "Atoms make up matter.", "cards_number": 2 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["extracted"], 2);
    assert_eq!(body["data"]["failed"], 0);

    let flashcards = body["data"]["flashcards"].as_array().unwrap();
    assert_eq!(flashcards[0]["question"], "What is an atom?");
    assert_eq!(flashcards[1]["answer"], "Amount of matter in an object.");
    assert!(flashcards[0]["next_review_at"].is_null());
}

#[tokio::test]
async fn test_generate_requires_source() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "  " }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_generate_for_unknown_lesson() {
    let server = create_test_server().await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": Uuid::new_v4(), "text": "Atoms." }))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_rejects_out_of_range_card_count() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "Atoms.", "cards_number": 500 }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unparseable_completion_maps_to_unprocessable() {
    let server = create_test_server_with(Some("I am unable to produce flashcards.")).await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "Atoms." }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Failed to parse flashcards from AI response. Please try again."
    );
}

#[tokio::test]
async fn test_completion_failure_maps_to_service_unavailable() {
    let server = create_test_server_with(None).await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let response = as_user(server.post("/api/generate/text"), "alice")
        .json(&json!({ "lesson_id": lesson_id, "text": "Atoms." }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_generate_from_pdf_upload() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let form = MultipartForm::new()
        .add_text("lesson_id", lesson_id.to_string())
        .add_text("cards_number", "2")
        .add_part(
            "pdf",
            Part::bytes(b"%PDF-1.7 canned".to_vec())
                .file_name("lesson.pdf")
                .mime_type("application/pdf"),
        );

    let response = as_user(server.post("/api/generate/pdf"), "alice")
        .multipart(form)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["flashcards"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_with_text_only_and_legacy_encoding() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Cuisine").await;

    let form = MultipartForm::new()
        .add_text("lesson_id", lesson_id.to_string())
        .add_part("text", Part::bytes(b"caf\xE9 cr\xE8me".to_vec()));

    let response = as_user(server.post("/api/generate/pdf"), "alice")
        .multipart(form)
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_upload_requires_lesson_id() {
    let server = create_test_server().await;

    let form = MultipartForm::new().add_text("text", "Atoms.");

    let response = as_user(server.post("/api/generate/pdf"), "alice")
        .multipart(form)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rejects_non_pdf_file() {
    let server = create_test_server().await;
    let lesson_id = create_lesson(&server, "alice", "Chemistry").await;

    let form = MultipartForm::new()
        .add_text("lesson_id", lesson_id.to_string())
        .add_part("pdf", Part::bytes(b"PK\x03\x04 not a pdf".to_vec()).file_name("notes.docx"));

    let response = as_user(server.post("/api/generate/pdf"), "alice")
        .multipart(form)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}
