//! Provider integration tests against an in-process fake of the Replicate
//! and OpenAI HTTP APIs.
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use generators::*;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storyboard::{
    plan_story, FormatRegistry, GenerationInvoker, PipelineRunner, RunnerConfig, SceneRecord,
    Stage, StoryboardError,
};

const TOKEN: &str = "r8_good";

struct FakePrediction {
    polls_left: u32,
    status: &'static str,
    output: Value,
    error: Option<String>,
}

#[derive(Default)]
struct FakeState {
    predictions: HashMap<String, FakePrediction>,
    requests: Vec<(String, Value)>,
    cancelled: Vec<String>,
    completion: String,
}

type Shared = Arc<Mutex<FakeState>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Token {TOKEN}"))
}

fn start_prediction(state: &Shared, route: String, body: Value) -> Value {
    let mut state = state.lock().unwrap();
    let id = format!("pred{}", state.predictions.len() + 1);
    let input = &body["input"];
    let prompt = input["prompt"]
        .as_str()
        .or_else(|| input["caption"].as_str())
        .unwrap_or_default();
    let prediction = if prompt.contains("hang") {
        FakePrediction {
            polls_left: u32::MAX,
            status: "succeeded",
            output: Value::Null,
            error: None,
        }
    } else if prompt.contains("fail") {
        FakePrediction {
            polls_left: 1,
            status: "failed",
            output: Value::Null,
            error: Some("NSFW content detected".to_string()),
        }
    } else {
        FakePrediction {
            polls_left: 2,
            status: "succeeded",
            output: json!([format!("https://replicate.delivery/{id}/out.bin")]),
            error: None,
        }
    };
    state.predictions.insert(id.clone(), prediction);
    state.requests.push((route, body));
    json!({ "id": id, "status": "starting" })
}

async fn create_model_prediction(
    State(state): State<Shared>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(start_prediction(&state, format!("{owner}/{name}"), body)))
}

async fn create_version_prediction(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(start_prediction(&state, "version".to_string(), body)))
}

async fn get_prediction(
    State(state): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = state.lock().unwrap();
    let prediction = state.predictions.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if prediction.polls_left > 1 {
        if prediction.polls_left != u32::MAX {
            prediction.polls_left -= 1;
        }
        return Ok(Json(json!({ "id": id, "status": "processing" })));
    }
    Ok(Json(json!({
        "id": id,
        "status": prediction.status,
        "output": prediction.output,
        "error": prediction.error,
        "metrics": { "predict_time": 1.5 },
    })))
}

async fn cancel_prediction(State(state): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    state.lock().unwrap().cancelled.push(id.clone());
    Json(json!({ "id": id, "status": "canceled" }))
}

async fn chat_completions(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.requests.push(("chat".to_string(), body));
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": state.completion } }],
        "usage": { "prompt_tokens": 900, "completion_tokens": 300 }
    }))
}

async fn start_fake() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(FakeState::default()));
    let app = Router::new()
        .route("/models/:owner/:name/predictions", post(create_model_prediction))
        .route("/predictions", post(create_version_prediction))
        .route("/predictions/:id", get(get_prediction))
        .route("/predictions/:id/cancel", post(cancel_prediction))
        .route("/chat/completions", post(chat_completions))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn config(base: &str) -> BackendConfig {
    BackendConfig::default()
        .with_replicate_token(TOKEN)
        .with_replicate_url(base)
        .with_openai_key("sk-test")
        .with_openai_url(base)
        .with_poll_interval(Duration::from_millis(10))
}

#[tokio::test]
async fn test_image_prediction_lifecycle() {
    let (base, state) = start_fake().await;
    let invoker = ReplicateInvoker::new(&config(&base)).unwrap();

    let image = invoker.generate_image("a neon alley at night").await.unwrap();
    assert_eq!(image.as_str(), "https://replicate.delivery/pred1/out.bin");

    let state = state.lock().unwrap();
    let (route, body) = &state.requests[0];
    assert_eq!(route, "bytedance/seedream-3");
    assert_eq!(body["input"]["prompt"], "a neon alley at night");
    assert_eq!(body["input"]["aspect_ratio"], "9:16");
    assert_eq!(body["input"]["size"], "big");
    assert!(state.cancelled.is_empty());
}

#[tokio::test]
async fn test_sound_uses_versioned_endpoint() {
    let (base, state) = start_fake().await;
    let invoker = ReplicateInvoker::new(&config(&base)).unwrap();
    let video = storyboard::ArtifactRef::new("https://replicate.delivery/v.mp4").unwrap();

    invoker.generate_sound(&video, "rain on a tin roof").await.unwrap();

    let state = state.lock().unwrap();
    let (route, body) = &state.requests[0];
    assert_eq!(route, "version");
    assert_eq!(
        body["version"],
        "40d08f9f569e91a5d72f6795ebed75178c185b0434699a98c07fc5f566efb2d4"
    );
    assert_eq!(body["input"]["caption"], "rain on a tin roof");
    assert_eq!(body["input"]["cot"], "rain on a tin roof");
    assert_eq!(body["input"]["video"], "https://replicate.delivery/v.mp4");
    assert_eq!(body["input"]["cfg"], 5);
}

#[tokio::test]
async fn test_failed_prediction_is_stage_scoped() {
    let (base, _state) = start_fake().await;
    let invoker = ReplicateInvoker::new(&config(&base)).unwrap();
    let start = storyboard::ArtifactRef::new("https://replicate.delivery/i.png").unwrap();

    match invoker.generate_video("this will fail", &start).await {
        Err(StoryboardError::RemoteGeneration { stage, message }) => {
            assert_eq!(stage, Stage::Video);
            assert!(message.contains("failed"));
            assert!(message.contains("NSFW content detected"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_bad_token_is_reported() {
    let (base, _state) = start_fake().await;
    let invoker = ReplicateInvoker::new(&config(&base).with_replicate_token("wrong")).unwrap();
    let err = invoker.generate_image("x").await.unwrap_err();
    assert!(err.to_string().contains("authentication rejected"), "{err}");
}

#[tokio::test]
async fn test_timeout_cancels_prediction() {
    let (base, state) = start_fake().await;
    let invoker = Arc::new(ReplicateInvoker::new(&config(&base)).unwrap());
    let runner = PipelineRunner::new(invoker)
        .with_config(RunnerConfig::default().with_timeout(Duration::from_millis(200)));
    let mut record = SceneRecord::new("s", "hang forever", "v", "a");

    let err = runner.run_stage(&mut record, Stage::Image).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(!record.image_done());

    let mut cancelled = false;
    for _ in 0..50 {
        if state.lock().unwrap().cancelled.contains(&"pred1".to_string()) {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cancelled, "abandoned prediction was not cancelled");
}

#[tokio::test]
async fn test_openai_planner_builds_story() {
    let (base, state) = start_fake().await;
    state.lock().unwrap().completion = "```json\n{\"scenes\": [{\"scene\": \"The signal\", \"scene_image_prompt\": \"i\", \"scene_video_prompt\": \"v\", \"scene_sound_prompt\": \"s\"}]}\n```".to_string();
    let planner = OpenAiPlanner::from_backend(&config(&base)).unwrap();
    let format = FormatRegistry::new().resolve("conspiracy");

    let story = plan_story(&planner, "numbers stations", format).await.unwrap();
    assert_eq!(story.len(), 1);
    assert_eq!(story.scenes()[0].script_text(), "The signal");

    let state = state.lock().unwrap();
    let (_, body) = state.requests.iter().find(|(r, _)| r == "chat").unwrap();
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["messages"][1]["content"], "Input: numbers stations");
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("TOPIC PROMPT:"));
}

#[tokio::test]
async fn test_openai_empty_completion_is_malformed() {
    let (base, _state) = start_fake().await;
    let planner = OpenAiPlanner::from_backend(&config(&base)).unwrap();
    let format = FormatRegistry::new().resolve("motivational");
    assert!(matches!(
        plan_story(&planner, "discipline", format).await,
        Err(StoryboardError::MalformedResponse { .. })
    ));
}
