//! Consul client, catalog watches and session locks against a mock agent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::watch;

use catalog_proxy::config::CatalogConfig;
use catalog_proxy::consul::{ConsulCatalog, ConsulClient, ConsulLocker};
use catalog_proxy::discovery::{RegistrySync, ServiceCatalog};
use catalog_proxy::election::{LeadershipElection, LockError, Locker};
use catalog_proxy::lifecycle::{Supervisor, Worker};
use catalog_proxy::registry::Registry;

mod common;

const KEY: &str = "catalog-proxy/leader/test";

#[derive(Default)]
struct AgentState {
    services: BTreeMap<String, Vec<Value>>,
    /// Key to holding session; `None` once released.
    kv: BTreeMap<String, Option<String>>,
    sessions: BTreeMap<String, String>,
    next_session: u64,
    tokens: Vec<String>,
    /// Refuse every acquire, as a running lock-delay does.
    refuse_acquire: bool,
}

/// Just enough of the Consul agent API, with real blocking queries.
#[derive(Clone)]
struct MockAgent {
    state: Arc<Mutex<AgentState>>,
    index: Arc<watch::Sender<u64>>,
}

impl MockAgent {
    fn new() -> Self {
        let (index, _) = watch::channel(1);
        Self { state: Arc::new(Mutex::new(AgentState::default())), index: Arc::new(index) }
    }

    async fn start(&self) -> String {
        let app = Router::new()
            .route("/v1/catalog/services", get(catalog_services))
            .route("/v1/health/service/{name}", get(health_service))
            .route("/v1/session/create", put(session_create))
            .route("/v1/session/renew/{id}", put(session_renew))
            .route("/v1/session/destroy/{id}", put(session_destroy))
            .route("/v1/session/info/{id}", get(session_info))
            .route("/v1/kv/{*key}", get(kv_get).put(kv_put))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn register(&self, service: &str, id: &str, address: &str, port: u16, status: &str) {
        let entry = json!({
            "Node": { "Node": "node-1", "Address": "10.9.9.9" },
            "Service": { "ID": id, "Service": service, "Address": address, "Port": port },
            "Checks": [{ "CheckID": format!("{id}-check"), "Name": "http", "Status": status }],
        });
        {
            let mut state = self.state.lock().unwrap();
            let instances = state.services.entry(service.to_string()).or_default();
            instances.retain(|existing| existing["Service"]["ID"] != id);
            instances.push(entry);
        }
        self.bump();
    }

    /// Kill whatever session holds `key`, as an expired TTL would.
    fn expire_holder(&self, key: &str) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            let Some(Some(session)) = state.kv.get(key).cloned() else {
                return false;
            };
            state.sessions.remove(&session);
            state.kv.insert(key.to_string(), None);
        }
        self.bump();
        true
    }

    fn refuse_acquire(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_acquire = refuse;
    }

    /// Forget every session, so renewals start failing with 404.
    fn drop_sessions(&self) {
        self.state.lock().unwrap().sessions.clear();
    }

    fn tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }

    fn bump(&self) {
        self.index.send_modify(|index| *index += 1);
    }

    /// Hold a request carrying `?index=` until the index moves past it.
    async fn block(&self, params: &HashMap<String, String>) -> u64 {
        let requested: u64 = params.get("index").and_then(|i| i.parse().ok()).unwrap_or(0);
        let mut rx = self.index.subscribe();
        if requested > 0 {
            let _ = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|current| *current > requested)).await;
        }
        let current = *rx.borrow();
        current
    }
}

fn indexed(index: u64, body: impl IntoResponse) -> Response {
    ([("X-Consul-Index", index.to_string())], body).into_response()
}

async fn catalog_services(
    State(agent): State<MockAgent>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Some(token) = headers.get("x-consul-token").and_then(|v| v.to_str().ok()) {
        agent.state.lock().unwrap().tokens.push(token.to_string());
    }
    let index = agent.block(&params).await;
    let services: BTreeMap<String, Vec<String>> = {
        let state = agent.state.lock().unwrap();
        state.services.keys().map(|name| (name.clone(), Vec::new())).collect()
    };
    indexed(index, Json(services))
}

async fn health_service(
    State(agent): State<MockAgent>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let index = agent.block(&params).await;
    let entries = agent.state.lock().unwrap().services.get(&name).cloned().unwrap_or_default();
    indexed(index, Json(entries))
}

async fn session_create(State(agent): State<MockAgent>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = agent.state.lock().unwrap();
    state.next_session += 1;
    let id = format!("session-{}", state.next_session);
    let name = body["Name"].as_str().unwrap_or_default().to_string();
    state.sessions.insert(id.clone(), name);
    Json(json!({ "ID": id }))
}

async fn session_renew(State(agent): State<MockAgent>, Path(id): Path<String>) -> Response {
    let state = agent.state.lock().unwrap();
    match state.sessions.get(&id) {
        Some(name) => Json(json!([{ "ID": id, "Name": name }])).into_response(),
        None => (StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}

async fn session_destroy(State(agent): State<MockAgent>, Path(id): Path<String>) -> Json<bool> {
    {
        let mut state = agent.state.lock().unwrap();
        state.sessions.remove(&id);
        for holder in state.kv.values_mut() {
            if holder.as_deref() == Some(id.as_str()) {
                *holder = None;
            }
        }
    }
    agent.bump();
    Json(true)
}

async fn session_info(State(agent): State<MockAgent>, Path(id): Path<String>) -> Json<Value> {
    let state = agent.state.lock().unwrap();
    match state.sessions.get(&id) {
        Some(name) => Json(json!([{ "ID": id, "Name": name }])),
        None => Json(Value::Null),
    }
}

async fn kv_get(
    State(agent): State<MockAgent>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let index = agent.block(&params).await;
    let holder = agent.state.lock().unwrap().kv.get(&key).cloned();
    match holder {
        Some(session) => indexed(
            index,
            Json(json!([{ "Key": key, "Session": session, "LockIndex": 1, "ModifyIndex": index }])),
        ),
        None => indexed(index, StatusCode::NOT_FOUND),
    }
}

async fn kv_put(
    State(agent): State<MockAgent>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<bool> {
    let changed = {
        let mut state = agent.state.lock().unwrap();
        if let Some(session) = params.get("acquire") {
            let held_elsewhere = matches!(state.kv.get(&key), Some(Some(holder)) if holder != session);
            if held_elsewhere || state.refuse_acquire || !state.sessions.contains_key(session) {
                false
            } else {
                state.kv.insert(key.clone(), Some(session.clone()));
                true
            }
        } else if let Some(session) = params.get("release") {
            match state.kv.get_mut(&key) {
                Some(holder) if holder.as_deref() == Some(session.as_str()) => {
                    *holder = None;
                    true
                }
                _ => false,
            }
        } else {
            state.kv.entry(key.clone()).or_insert(None);
            true
        }
    };
    if changed {
        agent.bump();
    }
    Json(changed)
}

fn client(address: String, token: Option<&str>) -> Arc<ConsulClient> {
    let config = CatalogConfig {
        address,
        token: token.map(str::to_string),
        wait_secs: 1,
        ..CatalogConfig::default()
    };
    Arc::new(ConsulClient::new(&config).unwrap())
}

fn locker(client: &Arc<ConsulClient>) -> Arc<ConsulLocker> {
    Arc::new(ConsulLocker::new(client.clone(), Duration::from_secs(10), Duration::ZERO))
}

#[tokio::test]
async fn test_catalog_lists_services_and_instances() {
    let agent = MockAgent::new();
    agent.register("orders", "orders-1", "10.0.0.1", 80, "passing");
    agent.register("orders", "orders-2", "10.0.0.2", 80, "critical");
    agent.register("users", "users-1", "10.0.1.1", 8080, "warning");
    let catalog = ConsulCatalog::new(client(agent.start().await, Some("secret")));

    assert_eq!(catalog.services().await.unwrap(), vec!["orders", "users"]);

    let orders = catalog.service_instances("orders").await.unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].endpoint(), "10.0.0.1:80");
    assert_eq!(orders[0].node, "node-1");
    assert!(!orders[0].is_critical());
    assert!(orders[1].is_critical());

    assert!(catalog.service_instances("billing").await.unwrap().is_empty());
    assert_eq!(agent.tokens(), vec!["secret".to_string()]);
}

#[tokio::test]
async fn test_catalog_watch_fires_on_change() {
    let agent = MockAgent::new();
    agent.register("orders", "orders-1", "10.0.0.1", 80, "passing");
    let catalog = ConsulCatalog::new(client(agent.start().await, None));
    let mut watch = catalog.watch_catalog();

    let first = tokio::time::timeout(Duration::from_secs(2), watch.next()).await.unwrap().unwrap();

    agent.register("users", "users-1", "10.0.1.1", 80, "passing");
    let second = tokio::time::timeout(Duration::from_secs(2), watch.next()).await.unwrap().unwrap();
    assert!(second.index > first.index);
}

#[tokio::test]
async fn test_registry_follows_consul() {
    let agent = MockAgent::new();
    agent.register("orders", "orders-1", "10.0.0.1", 80, "passing");
    agent.register("orders", "orders-2", "10.0.0.2", 80, "critical");
    agent.register("catalog-proxy", "proxy-1", "10.0.5.1", 8000, "passing");
    let catalog = Arc::new(ConsulCatalog::new(client(agent.start().await, None)));

    let registry = Arc::new(Registry::new());
    let sync = Arc::new(RegistrySync::new(registry.clone(), catalog, "catalog-proxy"));
    let mut supervisor = Supervisor::new();
    supervisor.spawn(sync.clone());

    common::eventually("initial sync", || registry.contains("orders")).await;
    assert_eq!(registry.lookup("orders"), Some(vec!["10.0.0.1:80".to_string()]));
    assert!(!registry.contains("catalog-proxy"));

    agent.register("orders", "orders-2", "10.0.0.2", 80, "passing");
    common::eventually("recovered instance", || registry.lookup("orders").map(|e| e.len()) == Some(2)).await;

    agent.register("users", "users-1", "10.0.1.1", 8080, "passing");
    common::eventually("new service", || registry.contains("users")).await;
    assert_eq!(sync.active_watchers().await, vec!["orders".to_string(), "users".to_string()]);

    supervisor.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_lock_handoff_between_sessions() {
    let agent = MockAgent::new();
    let client = client(agent.start().await, None);
    let locker = locker(&client);

    let held = locker.lock(KEY, "proxy-a@host").await.unwrap();
    assert_eq!(locker.holder(KEY).await.unwrap().as_deref(), Some("proxy-a@host"));

    let contender = {
        let locker = locker.clone();
        tokio::spawn(async move { locker.lock(KEY, "proxy-b@host").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!contender.is_finished());

    held.release().await.unwrap();
    let held = tokio::time::timeout(Duration::from_secs(3), contender)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(locker.holder(KEY).await.unwrap().as_deref(), Some("proxy-b@host"));

    held.release().await.unwrap();
    assert_eq!(locker.holder(KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_lock_loss_is_reported() {
    let agent = MockAgent::new();
    let client = client(agent.start().await, None);
    let locker = locker(&client);

    let mut held = locker.lock(KEY, "proxy-a@host").await.unwrap();
    assert!(!held.is_lost());

    assert!(agent.expire_holder(KEY));
    tokio::time::timeout(Duration::from_secs(3), held.lost()).await.unwrap();
    assert!(held.is_lost());
    held.release().await.unwrap();
}

#[tokio::test]
async fn test_lock_delay_wait_ends_when_session_dies() {
    let agent = MockAgent::new();
    agent.refuse_acquire(true);
    let client = client(agent.start().await, None);
    let locker = Arc::new(ConsulLocker::new(client, Duration::from_secs(2), Duration::from_secs(30)));

    let attempt = {
        let locker = locker.clone();
        tokio::spawn(async move { locker.lock(KEY, "proxy-a@host").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!attempt.is_finished());

    // Renewal runs every second and now gets 404.
    agent.drop_sessions();
    let result = tokio::time::timeout(Duration::from_secs(5), attempt).await.unwrap().unwrap();
    assert!(matches!(result, Err(LockError::SessionLost(_))));
}

#[tokio::test]
async fn test_election_stops_during_lock_delay() {
    let agent = MockAgent::new();
    agent.refuse_acquire(true);
    let client = client(agent.start().await, None);
    let locker = Arc::new(ConsulLocker::new(client, Duration::from_secs(10), Duration::from_secs(30)));
    let election = Arc::new(LeadershipElection::new(
        locker.clone(),
        KEY,
        "proxy-a@host",
        Duration::from_millis(50),
    ));
    let task = election.clone().start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!election.is_leader());

    election.stop().await;
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    assert!(!election.is_leader());
    assert_eq!(locker.holder(KEY).await.unwrap(), None);
}

#[tokio::test]
async fn test_election_over_consul() {
    let agent = MockAgent::new();
    let client = client(agent.start().await, None);
    let locker = locker(&client);
    let election = Arc::new(LeadershipElection::new(
        locker.clone(),
        KEY,
        "proxy-a@host",
        Duration::from_millis(50),
    ));
    let task = election.clone().start();

    common::eventually("leader", || election.is_leader()).await;
    assert_eq!(election.leader().as_deref(), Some("proxy-a@host"));

    election.stop().await;
    tokio::time::timeout(Duration::from_secs(3), task).await.unwrap().unwrap();
    assert!(!election.is_leader());
    assert_eq!(locker.holder(KEY).await.unwrap(), None);
}
