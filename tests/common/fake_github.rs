//! In-process stand-in for the GitHub OAuth and REST endpoints

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Form, Json, Router,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Hook registered through `POST /repos/{owner}/{repo}/hooks`
#[derive(Debug, Clone)]
pub struct FakeHook {
    pub id: u64,
    pub full_name: String,
    pub url: String,
    pub secret: String,
}

/// Fake provider
///
/// Any authorization code is accepted and becomes the user's login, except
/// `bad-code`, which the token endpoint rejects. Repo names `missing` and
/// `broken` answer 404 and 502.
pub struct FakeGitHub {
    addr: String,
    hooks: Mutex<Vec<FakeHook>>,
    next_hook_id: AtomicU64,
    requests: AtomicU64,
}

impl FakeGitHub {
    pub async fn start() -> Arc<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let fake = Arc::new(Self {
            addr: format!("http://{}", listener.local_addr().unwrap()),
            hooks: Mutex::new(Vec::new()),
            next_hook_id: AtomicU64::new(1),
            requests: AtomicU64::new(0),
        });

        let app = Router::new()
            .route("/login/oauth/access_token", post(access_token))
            .route("/user", get(user))
            .route("/user/repos", get(user_repos))
            .route("/repos/:owner/:repo", get(repo))
            .route("/repos/:owner/:repo/hooks", post(create_hook))
            .route("/repos/:owner/:repo/hooks/:id", delete(delete_hook))
            .layer(middleware::from_fn_with_state(fake.clone(), count_requests))
            .with_state(fake.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        fake
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn hooks(&self) -> Vec<FakeHook> {
        self.hooks.lock().unwrap().clone()
    }

    /// Requests received so far, on any endpoint
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

async fn count_requests(
    State(fake): State<Arc<FakeGitHub>>,
    request: Request,
    next: Next,
) -> Response {
    fake.requests.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

pub fn user_id(login: &str) -> u64 {
    match login {
        "octocat" => 583231,
        "hubot" => 480938,
        _ => 1,
    }
}

fn login_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer gho_")
        .map(str::to_string)
}

fn repo_json(owner: &str, name: &str) -> Value {
    let full_name = format!("{}/{}", owner, name);
    let id: u64 = 1_000 + full_name.bytes().map(u64::from).sum::<u64>();
    json!({
        "id": id,
        "name": name,
        "full_name": full_name,
        "owner": { "login": owner },
        "private": false,
        "html_url": format!("https://github.com/{}", full_name),
        "description": format!("{} test repository", name),
        "default_branch": "main",
    })
}

async fn access_token(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    match form.get("code").map(String::as_str) {
        None | Some("bad-code") => Json(json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired.",
        })),
        Some(code) => Json(json!({
            "access_token": format!("gho_{}", code),
            "token_type": "bearer",
            "scope": "read:user,public_repo,admin:repo_hook",
        })),
    }
}

async fn user(headers: HeaderMap) -> Response {
    let Some(login) = login_from(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    Json(json!({
        "login": login,
        "id": user_id(&login),
        "avatar_url": format!("https://avatars.example.com/{}", login),
    }))
    .into_response()
}

async fn user_repos(headers: HeaderMap) -> Response {
    let Some(login) = login_from(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    Json(json!([repo_json(&login, "hello-world"), repo_json(&login, "spoon-knife")]))
        .into_response()
}

async fn repo(headers: HeaderMap, Path((owner, name)): Path<(String, String)>) -> Response {
    if login_from(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match name.as_str() {
        "missing" => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response(),
        "broken" => StatusCode::BAD_GATEWAY.into_response(),
        _ => Json(repo_json(&owner, &name)).into_response(),
    }
}

async fn create_hook(
    State(fake): State<Arc<FakeGitHub>>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if login_from(&headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let id = fake.next_hook_id.fetch_add(1, Ordering::SeqCst);
    fake.hooks.lock().unwrap().push(FakeHook {
        id,
        full_name: format!("{}/{}", owner, name),
        url: body["config"]["url"].as_str().unwrap_or_default().to_string(),
        secret: body["config"]["secret"].as_str().unwrap_or_default().to_string(),
    });
    (StatusCode::CREATED, Json(json!({ "id": id, "active": true }))).into_response()
}

async fn delete_hook(
    State(fake): State<Arc<FakeGitHub>>,
    Path((_owner, _name, id)): Path<(String, String, u64)>,
) -> StatusCode {
    let mut hooks = fake.hooks.lock().unwrap();
    let before = hooks.len();
    hooks.retain(|hook| hook.id != id);
    if hooks.len() < before {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
