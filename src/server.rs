use crate::{
    error::AnalyzerError,
    gateway::InferenceGateway,
    model::ModelFactory,
    page,
    session::{AnalysisState, Session, SessionView},
    upload::ImageUpload,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};
use uuid::Uuid;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "receipt_session";

/// Largest accepted request body.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// How long an untouched session is kept before it is evicted.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

pub type SharedSession = Arc<Mutex<Session>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Entry<F: ModelFactory> {
    session: SharedSession,
    gateway: Arc<InferenceGateway<F>>,
    last_seen: Instant,
}

/// A live session together with the gateway holding its own model handle.
pub struct OpenSession<F: ModelFactory> {
    pub id: Uuid,
    pub session: SharedSession,
    pub gateway: Arc<InferenceGateway<F>>,
    /// True when the session was started by this request.
    pub created: bool,
}

/// Live sessions keyed by their cookie id. Nothing here outlives the process.
///
/// Each session gets a fork of the template gateway, so a model handle is only ever
/// built from, and used with, the credential of the session that owns it.
pub struct SessionStore<F: ModelFactory> {
    template: InferenceGateway<F>,
    idle_ttl: Duration,
    sessions: Mutex<HashMap<Uuid, Entry<F>>>,
}

impl<F: ModelFactory> SessionStore<F> {
    pub fn new(template: InferenceGateway<F>) -> Self {
        Self {
            template,
            idle_ttl: DEFAULT_SESSION_TTL,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Returns the session for `id`, starting a new one when it is unknown.
    pub fn open(&self, id: Option<Uuid>) -> OpenSession<F> {
        let now = Instant::now();
        self.evict_idle(now);

        let mut sessions = lock(&self.sessions);
        if let Some(id) = id {
            if let Some(entry) = sessions.get_mut(&id) {
                entry.last_seen = now;
                return OpenSession {
                    id,
                    session: entry.session.clone(),
                    gateway: entry.gateway.clone(),
                    created: false,
                };
            }
        }

        let id = Uuid::new_v4();
        let entry = Entry {
            session: Arc::new(Mutex::new(Session::new())),
            gateway: Arc::new(self.template.fork()),
            last_seen: now,
        };
        let opened = OpenSession {
            id,
            session: entry.session.clone(),
            gateway: entry.gateway.clone(),
            created: true,
        };
        sessions.insert(id, entry);
        log::debug!("Started session {id}");
        opened
    }

    /// Drops sessions untouched for longer than the idle TTL at `now`.
    ///
    /// Sessions with an analysis in flight are kept. Returns the number evicted.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let fresh = now.saturating_duration_since(entry.last_seen) <= self.idle_ttl;
            let keep = fresh || lock(&entry.session).state() == AnalysisState::Requesting;
            if !keep {
                log::debug!("Evicted idle session {id}");
            }
            keep
        });
        before - sessions.len()
    }

    /// Ends a session, discarding everything it held.
    pub fn close(&self, id: &Uuid) -> bool {
        lock(&self.sessions).remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State shared by every handler: the live sessions and their gateways.
pub struct AppState<F: ModelFactory> {
    pub sessions: Arc<SessionStore<F>>,
}

impl<F: ModelFactory> AppState<F> {
    pub fn new(gateway: InferenceGateway<F>) -> Self {
        Self::with_store(SessionStore::new(gateway))
    }

    pub fn with_store(store: SessionStore<F>) -> Self {
        Self {
            sessions: Arc::new(store),
        }
    }
}

impl<F: ModelFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
        }
    }
}

pub fn router<F: ModelFactory>(state: AppState<F>) -> Router {
    Router::new()
        .route("/", get(get_page::<F>).post(post_page::<F>))
        .route("/api/analyze", post(post_analyze::<F>))
        .route(
            "/api/session",
            get(get_session::<F>).delete(delete_session::<F>),
        )
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Fields of one form submission. Absent fields leave the session untouched.
#[derive(Default)]
struct Submission {
    credential: Option<String>,
    question: Option<String>,
    image: Option<ImageUpload>,
}

impl Submission {
    async fn read(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut submission = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "credential" => submission.credential = Some(field.text().await?),
                "question" => submission.question = Some(field.text().await?),
                "image" => {
                    let file_name = field.file_name().unwrap_or("upload").to_string();
                    let bytes = field.bytes().await?;
                    // browsers send an empty part when no file was picked
                    if !bytes.is_empty() {
                        submission.image = Some(ImageUpload::new(file_name, bytes.to_vec()));
                    }
                }
                other => log::debug!("Ignoring form field {other:?}"),
            }
        }
        Ok(submission)
    }

    fn apply(self, session: &mut Session) {
        // the password field is never echoed back, so blank means "keep"
        if let Some(credential) = self.credential.filter(|c| !c.trim().is_empty()) {
            session.set_credential(&credential);
        }
        if let Some(question) = self.question {
            session.set_question(&question);
        }
        if let Some(image) = self.image {
            session.set_image(image);
        }
    }
}

/// Applies a submission and, when every input is present, runs one analysis.
///
/// The analysis is recorded by the blocking task itself, so the session returns to `Idle`
/// even when the client goes away before the call completes.
async fn submit<F: ModelFactory>(
    open: &OpenSession<F>,
    submission: Submission,
) -> (StatusCode, SessionView) {
    let job = {
        let mut session = lock(&open.session);
        if session.state() == AnalysisState::Requesting {
            let mut view = session.view();
            view.notice = Some(AnalyzerError::AnalysisInProgress.to_string());
            return (StatusCode::CONFLICT, view);
        }
        submission.apply(&mut session);
        session.begin_analysis()
    };

    let Ok(job) = job else {
        return (StatusCode::OK, lock(&open.session).view());
    };

    let gateway = open.gateway.clone();
    let session = open.session.clone();
    let task = tokio::task::spawn_blocking(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| gateway.run(&job)))
            .unwrap_or_else(|_| {
                Err(AnalyzerError::Interrupted(
                    "analysis panicked".to_string(),
                ))
            });
        let mut session = lock(&session);
        session.finish_analysis(outcome);
        session.view()
    });

    match task.await {
        Ok(view) => (StatusCode::OK, view),
        Err(e) => {
            let mut session = lock(&open.session);
            if session.state() == AnalysisState::Requesting {
                session.finish_analysis(Err(AnalyzerError::Interrupted(e.to_string())));
            }
            (StatusCode::OK, session.view())
        }
    }
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

fn with_cookie(mut response: Response, cookie: String) -> Response {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => log::warn!("Invalid session cookie: {e}"),
    }
    response
}

fn with_session_cookie(response: Response, id: Uuid, created: bool) -> Response {
    if !created {
        return response;
    }
    with_cookie(
        response,
        format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Strict"),
    )
}

async fn get_page<F: ModelFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
) -> Response {
    let open = state.sessions.open(session_id(&headers));
    let view = lock(&open.session).view();
    with_session_cookie(
        Html(page::render(&view)).into_response(),
        open.id,
        open.created,
    )
}

async fn post_page<F: ModelFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let open = state.sessions.open(session_id(&headers));
    let submission = match Submission::read(multipart).await {
        Ok(submission) => submission,
        Err(e) => {
            log::warn!("Rejected form submission: {e}");
            return with_session_cookie(e.into_response(), open.id, open.created);
        }
    };

    let (status, view) = submit(&open, submission).await;
    with_session_cookie(
        (status, Html(page::render(&view))).into_response(),
        open.id,
        open.created,
    )
}

async fn post_analyze<F: ModelFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let open = state.sessions.open(session_id(&headers));
    let submission = match Submission::read(multipart).await {
        Ok(submission) => submission,
        Err(e) => {
            log::warn!("Rejected analysis request: {e}");
            let response = (e.status(), Json(json!({ "error": e.body_text() })));
            return with_session_cookie(response.into_response(), open.id, open.created);
        }
    };

    let (status, view) = submit(&open, submission).await;
    with_session_cookie((status, Json(view)).into_response(), open.id, open.created)
}

async fn get_session<F: ModelFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
) -> Response {
    let open = state.sessions.open(session_id(&headers));
    let view = lock(&open.session).view();
    with_session_cookie(Json(view).into_response(), open.id, open.created)
}

async fn delete_session<F: ModelFactory>(
    State(state): State<AppState<F>>,
    headers: HeaderMap,
) -> Response {
    let status = match session_id(&headers) {
        Some(id) if state.sessions.close(&id) => {
            log::debug!("Closed session {id}");
            StatusCode::NO_CONTENT
        }
        _ => StatusCode::NOT_FOUND,
    };
    with_cookie(
        status.into_response(),
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0"),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
