//! In-process stand-in for the IAM and inventory APIs.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::config::ApiConfig;

pub fn api_config(base_url: &str) -> ApiConfig {
    ApiConfig {
        endpoint: format!("{}/inventory", base_url),
        iam_endpoint: base_url.to_string(),
        domain: "ops".into(),
        username: "exporter".into(),
        password: "s3cret".into(),
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHit {
    pub page_no: u32,
    pub page_size: u32,
    pub token: String,
}

pub struct UpstreamState {
    pub auth_calls: AtomicUsize,
    pub auth_status: AtomicU16,
    pub auth_omit_header: AtomicBool,
    pub last_auth_body: Mutex<Option<Value>>,
    pub total_size: AtomicI64,
    /// Report a larger totalSize on every page.
    pub grow_total: AtomicBool,
    /// Page number answered with a 500. 0 disables.
    pub fail_page: AtomicU32,
    /// Page number answered with a non-JSON body. 0 disables.
    pub garbage_page: AtomicU32,
    pub hits: Mutex<Vec<PageHit>>,
}

impl UpstreamState {
    pub fn hits(&self) -> Vec<PageHit> {
        self.hits.lock().unwrap().clone()
    }
}

pub struct MockUpstream {
    pub base_url: String,
    pub state: Arc<UpstreamState>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start() -> Self {
        let state = Arc::new(UpstreamState {
            auth_calls: AtomicUsize::new(0),
            auth_status: AtomicU16::new(201),
            auth_omit_header: AtomicBool::new(false),
            last_auth_body: Mutex::new(None),
            total_size: AtomicI64::new(0),
            grow_total: AtomicBool::new(false),
            fail_page: AtomicU32::new(0),
            garbage_page: AtomicU32::new(0),
            hits: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v3/auth/tokens", post(auth_handler))
            .route("/inventory", post(inventory_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            handle,
        }
    }

    pub fn with_total(self, total: i64) -> Self {
        self.state.total_size.store(total, Ordering::SeqCst);
        self
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn auth_handler(State(state): State<Arc<UpstreamState>>, Json(body): Json<Value>) -> Response {
    let n = state.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_auth_body.lock().unwrap() = Some(body);

    let status = StatusCode::from_u16(state.auth_status.load(Ordering::SeqCst)).unwrap();
    if status != StatusCode::CREATED {
        return (status, "denied").into_response();
    }
    if state.auth_omit_header.load(Ordering::SeqCst) {
        return (status, "{}").into_response();
    }
    (status, [("X-Subject-Token", format!("token-{}", n))], "{}").into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageQuery {
    page_no: u32,
    page_size: u32,
}

async fn inventory_handler(
    State(state): State<Arc<UpstreamState>>,
    Query(q): Query<PageQuery>,
    headers: HeaderMap,
) -> Response {
    let token = headers
        .get("X-Auth-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.hits.lock().unwrap().push(PageHit {
        page_no: q.page_no,
        page_size: q.page_size,
        token,
    });

    if state.fail_page.load(Ordering::SeqCst) == q.page_no {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if state.garbage_page.load(Ordering::SeqCst) == q.page_no {
        return (StatusCode::OK, "<html>not json</html>").into_response();
    }

    let page_size = i64::from(q.page_size);
    let offset = i64::from(q.page_no - 1) * page_size;
    let total = if state.grow_total.load(Ordering::SeqCst) {
        offset + page_size + 1
    } else {
        state.total_size.load(Ordering::SeqCst)
    };

    let datas: Vec<Value> = (offset..(offset + page_size).min(total))
        .map(|i| {
            json!({
                "object.name": format!("vm-{}", i),
                "vdc.vdcLevel2": "tier-a",
                "otherInfo.status": "ACTIVE",
                "otherInfo.osVersion": "EulerOS 2.9",
                "otherInfo.flavorName": "s6.large.2",
                "logicLoc.azoneName": "az1",
                "logicLoc.clusterName": "cluster-1",
                "tenant.projectName": "infra",
                "runningTime": i as f64,
                "ramSize": 8.0,
            })
        })
        .collect();

    Json(json!({
        "totalSize": total,
        "pageNo": q.page_no,
        "pageSize": q.page_size,
        "datas": datas,
    }))
    .into_response()
}
