//! Stub CRM provider for tests: one axum server standing in for the
//! contacts, deals, users and token endpoints, with per-route counters
//! and scriptable responses.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use crm::auth::Authenticator;
use crm::client::CrmClient;
use crm::config::Config;
use crm::persist::SecretStores;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

pub struct StubState {
    pub contacts_calls: AtomicUsize,
    pub auth_calls: AtomicUsize,
    pub users_calls: AtomicUsize,
    pub visible_users_calls: AtomicUsize,
    contacts_script: Mutex<Vec<(u16, Value)>>,
    auth_response: Mutex<(u16, Value)>,
    deals: Mutex<HashMap<String, (u16, Value)>>,
    deals_queried: Mutex<Vec<String>>,
    users: Mutex<HashMap<String, (u16, Value)>>,
    visible_users: Mutex<(u16, Value)>,
    updates: Mutex<Vec<(String, Value)>>,
    update_status: Mutex<u16>,
    /// Bearer tokens presented to the deal and user endpoints.
    data_tokens: Mutex<Vec<String>>,
}

impl Default for StubState {
    fn default() -> Self {
        StubState {
            contacts_calls: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
            users_calls: AtomicUsize::new(0),
            visible_users_calls: AtomicUsize::new(0),
            contacts_script: Mutex::new(Vec::new()),
            auth_response: Mutex::new((
                200,
                json!({"access_token": "refreshed-token", "refresh_token": "refresh-0"}),
            )),
            deals: Mutex::new(HashMap::new()),
            deals_queried: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            visible_users: Mutex::new((200, json!({"data": []}))),
            updates: Mutex::new(Vec::new()),
            update_status: Mutex::new(200),
            data_tokens: Mutex::new(Vec::new()),
        }
    }
}

impl StubState {
    /// Queues contact-search responses, served in order; once drained the
    /// endpoint answers with an empty page.
    pub fn script_contacts(&self, responses: Vec<(u16, Value)>) {
        *self.contacts_script.lock().unwrap() = responses;
    }

    pub fn set_auth_response(&self, status: u16, body: Value) {
        *self.auth_response.lock().unwrap() = (status, body);
    }

    pub fn set_deals(&self, contact_id: &str, status: u16, body: Value) {
        self.deals
            .lock()
            .unwrap()
            .insert(contact_id.to_owned(), (status, body));
    }

    pub fn set_user(&self, user_id: &str, status: u16, body: Value) {
        self.users
            .lock()
            .unwrap()
            .insert(user_id.to_owned(), (status, body));
    }

    pub fn set_visible_users(&self, status: u16, body: Value) {
        *self.visible_users.lock().unwrap() = (status, body);
    }

    pub fn set_update_status(&self, status: u16) {
        *self.update_status.lock().unwrap() = status;
    }

    /// Contact ids the deal search was called with, in arrival order.
    pub fn deals_queried(&self) -> Vec<String> {
        self.deals_queried.lock().unwrap().clone()
    }

    /// `(deal_id, body)` pairs received by the owner-update endpoint.
    pub fn deal_updates(&self) -> Vec<(String, Value)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn bearer_tokens_seen(&self) -> Vec<String> {
        self.data_tokens.lock().unwrap().clone()
    }

    fn record_token(&self, headers: &HeaderMap) {
        if let Some(token) = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
        {
            self.data_tokens.lock().unwrap().push(token.to_owned());
        }
    }
}

pub struct StubCrm {
    pub addr: SocketAddr,
    pub state: Arc<StubState>,
}

impl StubCrm {
    pub async fn spawn() -> StubCrm {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/contacts", get(contacts))
            .route("/deals", get(deals))
            .route("/deals/{id}", put(update_deal))
            .route("/users", get(visible_users))
            .route("/users/{id}", get(user))
            .route("/oauth/token", post(token))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        StubCrm { addr, state }
    }

    /// Config pointing every endpoint at this stub. The env file path is
    /// unique and absent, so persistence attempts fail softly unless a
    /// test creates the file.
    pub fn config(&self, access_token: Option<&str>) -> Config {
        let url = |path: &str| Url::parse(&format!("http://{}{path}", self.addr)).unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.access_token = access_token.map(str::to_owned);
        config.client_id = Some("cid".into());
        config.client_secret = Some("csecret".into());
        config.refresh_token = Some("refresh-0".into());
        config.auth_url = url("/oauth/token");
        config.contacts_url = url("/contacts");
        config.deals_url = url("/deals");
        config.users_url = url("/users");
        config.env_file = std::env::temp_dir().join(format!("stub-{}.env", self.addr.port()));
        config
    }

    pub fn client_and_auth(&self) -> (CrmClient, Authenticator) {
        let config = self.config(None);
        Self::client_and_auth_for(&config)
    }

    pub fn client_and_auth_for(config: &Config) -> (CrmClient, Authenticator) {
        (
            CrmClient::new(config),
            Authenticator::new(config, SecretStores::from_config(config)),
        )
    }
}

fn reply(status: u16, body: Value) -> (axum::http::StatusCode, Json<Value>) {
    (
        axum::http::StatusCode::from_u16(status).unwrap(),
        Json(body),
    )
}

async fn contacts(State(state): State<Arc<StubState>>) -> (axum::http::StatusCode, Json<Value>) {
    state.contacts_calls.fetch_add(1, Ordering::SeqCst);
    let mut script = state.contacts_script.lock().unwrap();
    if script.is_empty() {
        reply(200, json!({"contacts": []}))
    } else {
        let (status, body) = script.remove(0);
        reply(status, body)
    }
}

async fn token(State(state): State<Arc<StubState>>) -> (axum::http::StatusCode, Json<Value>) {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    let (status, body) = state.auth_response.lock().unwrap().clone();
    reply(status, body)
}

async fn deals(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> (axum::http::StatusCode, Json<Value>) {
    state.record_token(&headers);
    let filter = params.get("filter").cloned().unwrap_or_default();
    let contact_id = filter
        .strip_prefix("contact_id:")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_owned();
    state.deals_queried.lock().unwrap().push(contact_id.clone());

    match state.deals.lock().unwrap().get(&contact_id).cloned() {
        Some((status, body)) => reply(status, body),
        None => reply(200, json!({"data": []})),
    }
}

async fn update_deal(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Path(deal_id): Path<String>,
    Json(body): Json<Value>,
) -> (axum::http::StatusCode, Json<Value>) {
    state.record_token(&headers);
    state.updates.lock().unwrap().push((deal_id, body));
    let status = *state.update_status.lock().unwrap();
    reply(status, json!({}))
}

async fn user(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> (axum::http::StatusCode, Json<Value>) {
    state.users_calls.fetch_add(1, Ordering::SeqCst);
    state.record_token(&headers);
    match state.users.lock().unwrap().get(&user_id).cloned() {
        Some((status, body)) => reply(status, body),
        None => reply(200, json!({"data": {}})),
    }
}

async fn visible_users(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> (axum::http::StatusCode, Json<Value>) {
    state.visible_users_calls.fetch_add(1, Ordering::SeqCst);
    state.record_token(&headers);
    let (status, body) = state.visible_users.lock().unwrap().clone();
    reply(status, body)
}
