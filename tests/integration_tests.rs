use axum::{
    extract::State,
    http::{HeaderName, HeaderValue},
    response::Json,
    routing::post,
    Router,
};
use axum_test::TestServer;
use lesson_flashcards::{
    api::{create_router, AppState, OWNER_HEADER},
    config::{GenerationConfig, LLMConfig},
    pdf_text::PdfExtractor,
    CreateLessonRequest, Database, Difficulty, FlashcardService, GenerationError,
    GenerationRequest, GenerationService, LLMProviderFactory, LLMProviderType,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Fake chat-completions endpoint replying with a fixed message and
/// recording every prompt it receives.
#[derive(Clone)]
struct FakeCompletions {
    reply: String,
    prompts: Arc<Mutex<Vec<String>>>,
}

async fn chat_completions(
    State(fake): State<FakeCompletions>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
    fake.prompts.lock().unwrap().push(prompt);
    Json(json!({
        "choices": [ { "message": { "role": "assistant", "content": fake.reply } } ]
    }))
}

async fn spawn_completions(reply: &str) -> (String, Arc<Mutex<Vec<String>>>) {
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/chat/completions", post(chat_completions))
        .with_state(FakeCompletions {
            reply: reply.to_string(),
            prompts: prompts.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), prompts)
}

async fn build_services(base_url: String) -> (FlashcardService, GenerationService) {
    let llm = LLMConfig {
        api_key: "sk-or-integration".to_string(),
        base_url: Some(base_url),
        provider: LLMProviderType::OpenRouter,
        model: None,
        max_tokens: 1500,
        temperature: 0.3,
        timeout_secs: 5,
        app_url: "http://localhost".to_string(),
        app_title: "Flashcard App".to_string(),
    };

    let db = Database::new("sqlite::memory:").await.unwrap();
    let flashcard_service = FlashcardService::new(db);
    let provider = LLMProviderFactory::create_provider(&llm).unwrap();
    let generation_service = GenerationService::new(
        Arc::new(provider),
        Arc::new(flashcard_service.clone()),
        Arc::new(PdfExtractor),
        &llm,
        GenerationConfig::default(),
    );

    (flashcard_service, generation_service)
}

#[tokio::test]
async fn test_text_generation_end_to_end() {
    let reply = "Voici les flashcards :\n\nFLASHCARD 1:\nQ: Qu'est-ce qu'une cellule ?\nA: L'unit\u{e9} de base du vivant.\n\nFLASHCARD 2:\nQ: O\u{f9} se trouve l'ADN ?\nA: Dans le noyau.";
    let (base_url, prompts) = spawn_completions(reply).await;
    let (flashcards, generation) = build_services(base_url).await;

    let lesson = flashcards
        .create_lesson("alice", CreateLessonRequest { name: "Biologie".to_string() })
        .await
        .unwrap();

    let outcome = generation
        .generate(GenerationRequest {
            lesson_id: lesson.id,
            owner_id: "alice".to_string(),
            text: Some("La cellule\u{0} est l'unit\u{e9} de base.\u{1F600}".to_string()),
            cards_number: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(outcome.extracted, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.flashcards[0].question, "Qu'est-ce qu'une cellule ?");
    assert_eq!(outcome.flashcards[1].answer, "Dans le noyau.");

    // Source text reached the service cleaned up, with the requested count
    let prompts = prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("La cellule est l'unit\u{e9} de base."));
    assert!(!prompts[0].contains('\u{1F600}'));
    assert!(prompts[0].contains("exactement 2 flashcards"));

    // Generated cards are stored with default review state
    let stored = flashcards
        .get_lesson_with_flashcards("alice", lesson.id)
        .await
        .unwrap()
        .granted()
        .unwrap();
    assert_eq!(stored.flashcards.len(), 2);
    for card in &stored.flashcards {
        assert_eq!(card.owner_id, "alice");
        assert_eq!(card.difficulty, Difficulty::Medium);
        assert_eq!(card.repetition, 0);
        assert!(card.next_review_at.is_none());
    }
}

#[tokio::test]
async fn test_unparseable_completion_persists_nothing() {
    let (base_url, _) = spawn_completions("I am sorry, I cannot help with that.").await;
    let (flashcards, generation) = build_services(base_url).await;

    let lesson = flashcards
        .create_lesson("alice", CreateLessonRequest { name: "Chimie".to_string() })
        .await
        .unwrap();

    let result = generation
        .generate(GenerationRequest {
            lesson_id: lesson.id,
            owner_id: "alice".to_string(),
            text: Some("Les atomes forment des mol\u{e9}cules.".to_string()),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(GenerationError::NoExtractableFlashcards { .. })));

    let stored = flashcards
        .get_lesson_with_flashcards("alice", lesson.id)
        .await
        .unwrap()
        .granted()
        .unwrap();
    assert!(stored.flashcards.is_empty());
}

#[tokio::test]
async fn test_generated_cards_can_be_reviewed_over_http() {
    let reply = "1. Q: What is photosynthesis?\nA: Turning light into chemical energy.\n\n2. Q: Where does it happen?\nA: In chloroplasts.";
    let (base_url, _) = spawn_completions(reply).await;
    let (flashcard_service, generation_service) = build_services(base_url).await;

    let server = TestServer::new(create_router(AppState {
        flashcard_service,
        generation_service,
    }))
    .unwrap();
    let owner = (
        HeaderName::from_static(OWNER_HEADER),
        HeaderValue::from_static("carol"),
    );

    let response = server
        .post("/api/lessons")
        .add_header(owner.0.clone(), owner.1.clone())
        .json(&json!({ "name": "Plants" }))
        .await;
    response.assert_status_ok();
    let lesson_id = response.json::<Value>()["data"]["id"].as_str().unwrap().to_string();

    let response = server
        .post("/api/generate/text")
        .add_header(owner.0.clone(), owner.1.clone())
        .json(&json!({ "lesson_id": lesson_id, "text": "Photosynthesis notes", "cards_number": 2 }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let generated = body["data"]["flashcards"].as_array().unwrap();
    assert_eq!(generated.len(), 2);
    assert_eq!(generated[1]["question"], "Where does it happen?");
    let card_id = generated[0]["id"].as_str().unwrap().to_string();

    let response = server
        .post(&format!("/api/flashcards/{}/rate", card_id))
        .add_header(owner.0.clone(), owner.1.clone())
        .json(&json!({ "difficulty": "hard" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["difficulty"], "hard");
    assert_eq!(body["data"]["repetition"], 1);
    assert_eq!(body["data"]["last_reviewed_at"], body["data"]["next_review_at"]);
}
