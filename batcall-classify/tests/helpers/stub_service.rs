//! In-process classifier service stub
//!
//! Serves `GET /ping` and `POST /classify` on an ephemeral localhost port.
//! Each batch request is recorded together with the clip files present in
//! its `wav_folder`, and answered by a caller-supplied responder.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Form, Router,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// One batch request as the stub saw it
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub form: HashMap<String, String>,
    /// Clip filenames in `wav_folder`, sorted
    pub clips: Vec<String>,
}

/// Stub answer to a batch request
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
    /// Written to `export_features_path` before answering
    pub features_csv: Option<String>,
}

impl StubResponse {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            features_csv: None,
        }
    }

    /// Success envelope giving every clip the same percent per class
    pub fn uniform_success(clips: &[String], probabilities: &[(&str, f64)]) -> Self {
        let mut file_results = Map::new();
        for clip in clips {
            let classes: Map<String, Value> = probabilities
                .iter()
                .map(|(name, value)| (name.to_string(), json!(value)))
                .collect();
            file_results.insert(clip.clone(), json!({ "class_probabilities": classes }));
        }
        Self::json(json!({ "status": "success", "file_results": file_results }))
    }

    pub fn with_features(mut self, csv: String) -> Self {
        self.features_csv = Some(csv);
        self
    }
}

type Responder = Arc<dyn Fn(&StubRequest) -> StubResponse + Send + Sync>;

#[derive(Clone)]
struct StubState {
    responder: Responder,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

/// Running stub server; aborted on drop
pub struct StubClassifier {
    pub url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    handle: JoinHandle<()>,
}

impl StubClassifier {
    pub async fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            responder: Arc::new(responder),
            requests: Arc::clone(&requests),
        };

        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/classify", post(classify))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            requests,
            handle,
        }
    }

    /// Stub that always answers with the same response
    pub async fn fixed(response: StubResponse) -> Self {
        Self::spawn(move |_| response.clone()).await
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for StubClassifier {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn classify(
    State(state): State<StubState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, String) {
    let clips = form
        .get("wav_folder")
        .and_then(|dir| std::fs::read_dir(dir).ok())
        .map(|entries| {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        })
        .unwrap_or_default();

    let request = StubRequest { form, clips };
    let response = (state.responder)(&request);

    if let (Some(csv), Some(path)) = (&response.features_csv, request.form.get("export_features_path")) {
        std::fs::write(Path::new(path), csv).unwrap();
    }

    state.requests.lock().unwrap().push(request);

    let status = StatusCode::from_u16(response.status).unwrap();
    (status, response.body)
}
