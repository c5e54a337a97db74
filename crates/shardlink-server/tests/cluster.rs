//! End-to-end tests: a real server and real clients on loopback sockets.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use shardlink_client::{ClientConfig, ConnectionStatus, IpcClient};
use shardlink_core::handler::registry::BUILTIN_HANDLERS;
use shardlink_core::handler::{
    concat_arrays, BroadcastHandler, BroadcastReply, PointToPointHandler, RequestHandler,
};
use shardlink_core::ownership::OwnershipMap;
use shardlink_core::{
    ClusterMember, GuildRecord, Handler, HandlerRegistry, Owner, ShardLinkError, ShardStatus,
    StaticMember,
};
use shardlink_server::{IpcServer, ServerConfig};

const SECRET: &str = "secret";
const USER: u64 = 42;

fn server_member() -> Arc<dyn ClusterMember> {
    Arc::new(
        StaticMember::new()
            .with_shard(ShardStatus::healthy(0, 0))
            .with_guild(GuildRecord::new(0, "Guild 0", 10))
            .with_guild(GuildRecord::new(1, "Guild 1", 20).with_members([USER]))
            .with_guild(GuildRecord::new(2, "Guild 2", 30)),
    )
}

fn client_member() -> Arc<dyn ClusterMember> {
    Arc::new(
        StaticMember::new()
            .with_shard(ShardStatus::healthy(1, 201))
            .with_guild(GuildRecord::new(10, "Guild 10", 1210).with_members([USER]))
            .with_guild(GuildRecord::new(11, "Guild 11", 5).with_members([USER])),
    )
}

fn empty_member() -> Arc<dyn ClusterMember> {
    Arc::new(StaticMember::new())
}

async fn start_server_at(addr: &str) -> IpcServer {
    let member = server_member();
    let registry = HandlerRegistry::from_names(BUILTIN_HANDLERS, member.clone(), "hub").unwrap();
    let mut config = ServerConfig::new(addr, SECRET);
    config.name = "hub".into();
    IpcServer::start(config, registry, member).await.unwrap()
}

async fn start_server() -> IpcServer {
    start_server_at("127.0.0.1:0").await
}

fn client_config(addr: SocketAddr, secret: &str) -> ClientConfig {
    let mut config = ClientConfig::new(format!("ws://{addr}/ws"), secret);
    config.reconnect_delay = Duration::from_millis(100);
    config
}

fn start_client(addr: SocketAddr, member: Arc<dyn ClusterMember>) -> IpcClient {
    let registry = HandlerRegistry::from_names(BUILTIN_HANDLERS, member.clone(), "unused").unwrap();
    IpcClient::connect(client_config(addr, SECRET), registry, member)
}

async fn online(client: &IpcClient) {
    tokio::time::timeout(Duration::from_secs(5), client.wait_online())
        .await
        .expect("client did not come online in time")
        .expect("login rejected");
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

async fn raw_socket(
    addr: SocketAddr,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame in time")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn login_claims_ownership() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    assert_eq!(client.status(), ConnectionStatus::Online);
    assert_eq!(server.clients_count().await, 1);
    assert_eq!(server.shard_owner(0).await, Some(Owner::Local));
    assert_eq!(server.guild_owner(2).await, Some(Owner::Local));
    assert!(matches!(server.shard_owner(1).await, Some(Owner::Remote(_))));
    assert!(matches!(server.guild_owner(11).await, Some(Owner::Remote(_))));

    let connections = server.connections().await;
    assert_eq!(connections.len(), 1);
    assert!(connections[0].authenticated);
    assert_eq!(connections[0].name, "Bot 0");
    assert_eq!(connections[0].guilds, vec![10, 11]);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn chosen_name_is_kept() {
    let server = start_server().await;
    let member = client_member();
    let registry = HandlerRegistry::from_names(BUILTIN_HANDLERS, member.clone(), "x").unwrap();
    let mut config = client_config(server.local_addr(), SECRET);
    config.name = Some("worker-a".into());
    let client = IpcClient::connect(config, registry, member);
    online(&client).await;

    assert_eq!(server.connections().await[0].name, "worker-a");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn wrong_secret_is_rejected() {
    let server = start_server().await;
    let member = client_member();
    let registry = HandlerRegistry::from_names(BUILTIN_HANDLERS, member.clone(), "x").unwrap();
    let client = IpcClient::connect(client_config(server.local_addr(), "wrong"), registry, member);

    let result = tokio::time::timeout(Duration::from_secs(5), client.wait_online())
        .await
        .unwrap();
    assert!(matches!(result, Err(ShardLinkError::AuthFailed(_))));
    assert_eq!(client.status(), ConnectionStatus::Rejected);

    // The socket stays open but unauthenticated, and claims nothing.
    assert_eq!(server.clients_count().await, 0);
    let connections = server.connections().await;
    assert_eq!(connections.len(), 1);
    assert!(!connections[0].authenticated);
    assert_eq!(server.guild_owner(10).await, None);

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn guild_info_reaches_the_owner() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    let remote = client.send_request("guild_info", json!(10)).await.unwrap();
    assert_eq!(
        remote,
        Some(json!({"success": true, "guild": {"id": 10, "name": "Guild 10", "member_count": 1210}}))
    );

    let local = client.send_request("guild_info", json!({"guild_id": 1})).await.unwrap();
    assert_eq!(
        local,
        Some(json!({"success": true, "guild": {"id": 1, "name": "Guild 1", "member_count": 20}}))
    );

    let missing = client.send_request("guild_info", json!(99)).await.unwrap();
    assert_eq!(missing, Some(json!({"success": false, "message": "Guild not found"})));

    assert_eq!(server.return_path_count().await, 0);
    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn requests_relay_between_clients() {
    let server = start_server().await;
    let owner = start_client(server.local_addr(), client_member());
    let asker = start_client(server.local_addr(), empty_member());
    online(&owner).await;
    online(&asker).await;

    let reply = asker.send_request("guild_info", json!(11)).await.unwrap();
    assert_eq!(
        reply,
        Some(json!({"success": true, "guild": {"id": 11, "name": "Guild 11", "member_count": 5}}))
    );
    assert_eq!(server.return_path_count().await, 0);

    owner.shutdown().await;
    asker.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn shard_status_is_merged() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    let reply = client.send_request("shard_status", json!({})).await.unwrap();
    assert_eq!(
        reply,
        Some(json!({
            "0": {"latency": 0, "ws_ratelimited": false, "closed": false},
            "1": {"latency": 201, "ws_ratelimited": false, "closed": false},
        }))
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn find_member_concatenates_in_peer_order() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    let reply = client.send_request("find_member", json!(USER)).await.unwrap();
    assert_eq!(reply, Some(json!([1, 10, 11])));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn server_originated_requests() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    let remote = server.send_request("guild_info", json!(10)).await.unwrap();
    assert_eq!(remote.unwrap()["guild"]["member_count"], json!(1210));

    let merged = server.send_request("find_member", json!(USER)).await.unwrap();
    assert_eq!(merged, Some(json!([1, 10, 11])));

    let missing = server.send_request("guild_info", json!(99)).await.unwrap();
    assert_eq!(missing, Some(json!({"success": false, "message": "Guild not found"})));

    assert!(matches!(
        server.send_request("nope", json!({})).await,
        Err(ShardLinkError::UnknownHandler(_))
    ));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn ping_is_answered_by_the_server() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;

    let reply = client.send_request("ping", json!({})).await.unwrap();
    assert_eq!(reply, Some(json!({"success": true, "server": "hub"})));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn frames_before_login_are_treated_as_login() {
    let server = start_server().await;
    let mut ws = raw_socket(server.local_addr()).await;

    // A broadcast request before login is read as a (bad) login.
    let sneaky = json!({"handler": "shard_status", "type": "request", "rtoken": "r1", "data": {}});
    ws.send(Message::Text(sneaky.to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["handler"], "login");
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["rtoken"], "r1");
    assert_eq!(reply["data"]["success"], false);
    assert_eq!(server.clients_count().await, 0);

    // Garbage gets a failure too, and the socket stays usable.
    ws.send(Message::Text("not json".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["data"]["success"], false);

    // A flat payload with the right secret logs in.
    let flat = json!({"shared_secret": SECRET, "shards": [5], "guilds": [50]});
    ws.send(Message::Text(flat.to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["data"]["success"], true);
    assert!(reply.get("rtoken").is_none());
    assert_eq!(server.clients_count().await, 1);
    assert!(matches!(server.guild_owner(50).await, Some(Owner::Remote(_))));

    server.shutdown().await;
}

#[tokio::test]
async fn orphan_responses_are_dropped() {
    let server = start_server().await;
    let mut ws = raw_socket(server.local_addr()).await;

    let login = json!({
        "handler": "login", "type": "request", "rtoken": "l1",
        "data": {"shared_secret": SECRET, "shards": [], "guilds": []},
    });
    ws.send(Message::Text(login.to_string())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["data"]["success"], true);

    let orphan = json!({"handler": "guild_info", "type": "response", "rtoken": "nobody", "data": {}});
    ws.send(Message::Text(orphan.to_string())).await.unwrap();
    ws.send(Message::Text("{broken".into())).await.unwrap();

    let ping = json!({"handler": "ping", "type": "request", "rtoken": "p1", "data": {}});
    ws.send(Message::Text(ping.to_string())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["rtoken"], "p1");
    assert_eq!(reply["data"], json!({"success": true, "server": "hub"}));

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_handler_request_is_ignored() {
    let server = start_server().await;
    let mut ws = raw_socket(server.local_addr()).await;

    let login = json!({"handler": "login", "type": "request", "rtoken": "l1",
        "data": {"shared_secret": SECRET}});
    ws.send(Message::Text(login.to_string())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["data"]["success"], true);

    let bogus = json!({"handler": "bogus", "type": "request", "rtoken": "b1", "data": {}});
    ws.send(Message::Text(bogus.to_string())).await.unwrap();
    let ping = json!({"handler": "ping", "type": "request", "rtoken": "p1", "data": {}});
    ws.send(Message::Text(ping.to_string())).await.unwrap();

    // Only the ping is answered.
    assert_eq!(next_json(&mut ws).await["rtoken"], "p1");

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_releases_ownership() {
    let server = start_server().await;
    let client = start_client(server.local_addr(), client_member());
    online(&client).await;
    assert!(server.guild_owner(10).await.is_some());

    client.shutdown().await;
    let srv = &server;
    eventually(move || async move { srv.clients_count().await == 0 }).await;
    assert_eq!(server.guild_owner(10).await, None);
    assert_eq!(server.shard_owner(1).await, None);
    assert_eq!(server.shard_owner(0).await, Some(Owner::Local));

    // Nobody owns guild 10 any more.
    let reply = server.send_request("guild_info", json!(10)).await.unwrap();
    assert_eq!(reply, Some(json!({"success": false, "message": "Guild not found"})));

    server.shutdown().await;
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let server = start_server().await;
    let addr = server.local_addr();
    let client = start_client(addr, client_member());
    online(&client).await;

    server.shutdown().await;
    drop(server);
    let mut status = client.status_watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s != ConnectionStatus::Online),
    )
    .await
    .unwrap()
    .unwrap();

    let server = start_server_at(&addr.to_string()).await;
    online(&client).await;
    let srv = &server;
    eventually(move || async move { srv.clients_count().await == 1 }).await;

    let reply = client.send_request("guild_info", json!(2)).await.unwrap();
    assert_eq!(reply.unwrap()["guild"]["name"], "Guild 2");

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn http_root_serves_banner() {
    let server = start_server().await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("text/plain"));
    assert!(response.contains("This is a websocket IPC server for shardlink"));

    server.shutdown().await;
}

/// Answers locally and never replies.
struct Silent;

#[async_trait]
impl RequestHandler for Silent {
    fn name(&self) -> &str {
        "silent"
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        None
    }
}

impl PointToPointHandler for Silent {
    fn route(&self, _owners: &OwnershipMap, _data: &Value) -> Option<Owner> {
        Some(Owner::Local)
    }
}

/// Fire-and-forget handler that counts deliveries.
struct Counter(Arc<AtomicUsize>);

#[async_trait]
impl RequestHandler for Counter {
    fn name(&self) -> &str {
        "count"
    }

    fn wait(&self) -> bool {
        false
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Some(json!("ignored"))
    }
}

impl PointToPointHandler for Counter {
    fn route(&self, _owners: &OwnershipMap, _data: &Value) -> Option<Owner> {
        Some(Owner::Local)
    }
}

fn custom_registry(counter: Arc<AtomicUsize>) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(Handler::point_to_point(Silent))
        .unwrap()
        .register(Handler::point_to_point(Counter(counter)))
        .unwrap()
        .build()
}

#[tokio::test]
async fn custom_handlers_timeout_and_fire_and_forget() {
    let server_hits = Arc::new(AtomicUsize::new(0));
    let member = server_member();
    let server = IpcServer::start(
        ServerConfig::new("127.0.0.1:0", SECRET),
        custom_registry(server_hits.clone()),
        member,
    )
    .await
    .unwrap();

    let member = client_member();
    let mut config = client_config(server.local_addr(), SECRET);
    config.request_timeout = Some(Duration::from_millis(200));
    let client = IpcClient::connect(config, custom_registry(Arc::new(AtomicUsize::new(0))), member);
    online(&client).await;

    let result = client.send_request("silent", json!({})).await;
    assert!(matches!(result, Err(ShardLinkError::Timeout)));
    assert_eq!(client.pending_calls(), 0);

    let result = client.send_request("count", json!({})).await.unwrap();
    assert_eq!(result, None);
    let hits = &server_hits;
    eventually(move || async move { hits.load(Ordering::SeqCst) == 1 }).await;

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn dropped_call_frees_its_rtoken() {
    let server = IpcServer::start(
        ServerConfig::new("127.0.0.1:0", SECRET),
        custom_registry(Arc::new(AtomicUsize::new(0))),
        server_member(),
    )
    .await
    .unwrap();
    let client = IpcClient::connect(
        client_config(server.local_addr(), SECRET),
        custom_registry(Arc::new(AtomicUsize::new(0))),
        client_member(),
    );
    online(&client).await;

    let cancelled =
        tokio::time::timeout(Duration::from_millis(100), client.send_request("silent", json!({})))
            .await;
    assert!(cancelled.is_err());
    assert_eq!(client.pending_calls(), 0);

    client.shutdown().await;
    server.shutdown().await;
}

fn second_member() -> Arc<dyn ClusterMember> {
    Arc::new(
        StaticMember::new()
            .with_shard(ShardStatus::healthy(2, 50))
            .with_guild(GuildRecord::new(20, "Guild 20", 7).with_members([USER]))
            .with_guild(GuildRecord::new(11, "Guild 11 again", 9)),
    )
}

#[tokio::test]
async fn unnamed_clients_count_from_zero() {
    let server = start_server().await;
    let first = start_client(server.local_addr(), client_member());
    online(&first).await;
    let second = start_client(server.local_addr(), empty_member());
    online(&second).await;

    let names: Vec<String> = server.connections().await.into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["Bot 0", "Bot 1"]);

    first.shutdown().await;
    second.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn later_login_takes_over_claims() {
    let server = start_server().await;
    let first = start_client(server.local_addr(), client_member());
    online(&first).await;
    let second = start_client(server.local_addr(), second_member());
    online(&second).await;

    let connections = server.connections().await;
    assert_eq!(connections[0].guilds, vec![10]);
    assert_eq!(connections[0].shards, vec![1]);
    assert_eq!(connections[1].guilds, vec![11, 20]);
    assert_eq!(server.guild_owner(11).await, Some(Owner::Remote(connections[1].id)));

    first.shutdown().await;
    second.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn broadcast_covers_every_peer_in_order() {
    let server = start_server().await;
    let first = start_client(server.local_addr(), client_member());
    online(&first).await;
    let second = start_client(server.local_addr(), second_member());
    online(&second).await;
    let asker = start_client(server.local_addr(), empty_member());
    online(&asker).await;

    // Server first, then connections by id; the asker answers too.
    let found = asker.send_request("find_member", json!(USER)).await.unwrap();
    assert_eq!(found, Some(json!([1, 10, 11, 20])));

    let status = asker.send_request("shard_status", json!({})).await.unwrap().unwrap();
    assert_eq!(status.as_object().unwrap().len(), 3);
    assert_eq!(status["0"]["latency"], 0);
    assert_eq!(status["1"]["latency"], 201);
    assert_eq!(status["2"]["latency"], 50);

    first.shutdown().await;
    second.shutdown().await;
    asker.shutdown().await;
    server.shutdown().await;
}

/// `find_member` that takes far longer than any test waits.
struct SlowFind;

#[async_trait]
impl RequestHandler for SlowFind {
    fn name(&self) -> &str {
        "find_member"
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Some(json!([99]))
    }
}

impl BroadcastHandler for SlowFind {
    fn aggregate(&self, replies: Vec<BroadcastReply>) -> Value {
        concat_arrays(replies)
    }
}

#[tokio::test]
async fn broadcast_drops_target_that_disconnects() {
    let server = start_server().await;
    let registry = HandlerRegistry::builder()
        .register(Handler::broadcast(SlowFind))
        .unwrap()
        .build();
    let slow = IpcClient::connect(
        client_config(server.local_addr(), SECRET),
        registry,
        client_member(),
    );
    online(&slow).await;
    let asker = Arc::new(start_client(server.local_addr(), empty_member()));
    online(&asker).await;

    let call = {
        let asker = asker.clone();
        tokio::spawn(async move { asker.send_request("find_member", json!(USER)).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!call.is_finished());

    slow.shutdown().await;
    let reply = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .expect("broadcast stalled on a departed peer")
        .unwrap()
        .unwrap();
    assert_eq!(reply, Some(json!([1])));

    asker.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn offline_calls_wait_for_reconnect() {
    let server = start_server().await;
    let addr = server.local_addr();
    let client = Arc::new(start_client(addr, client_member()));
    online(&client).await;

    server.shutdown().await;
    drop(server);
    let mut status = client.status_watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| *s != ConnectionStatus::Online),
    )
    .await
    .unwrap()
    .unwrap();

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.send_request("ping", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!call.is_finished());

    let server = start_server_at(&addr.to_string()).await;
    let reply = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Some(json!({"success": true, "server": "hub"})));

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn busy_senders_ride_out_a_restart() {
    let server = start_server().await;
    let addr = server.local_addr();
    let member = empty_member();
    let registry = HandlerRegistry::from_names(BUILTIN_HANDLERS, member.clone(), "x").unwrap();
    let mut config = client_config(addr, SECRET);
    config.request_timeout = Some(Duration::from_millis(500));
    let client = Arc::new(IpcClient::connect(config, registry, member));
    online(&client).await;

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut failures = Vec::new();
                while !stop.load(Ordering::SeqCst) {
                    match client.send_request("ping", json!({})).await {
                        Ok(_) | Err(ShardLinkError::Timeout) => {}
                        Err(e) => failures.push(e.to_string()),
                    }
                }
                failures
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown().await;
    drop(server);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let server = start_server_at(&addr.to_string()).await;
    online(&client).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    stop.store(true, Ordering::SeqCst);

    for worker in workers {
        let failures = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(failures.is_empty(), "callers saw {failures:?}");
    }

    client.shutdown().await;
    server.shutdown().await;
}

/// Routed to whoever owns guild 10, which never answers.
struct Unanswered;

#[async_trait]
impl RequestHandler for Unanswered {
    fn name(&self) -> &str {
        "unanswered"
    }

    async fn answer(&self, _data: Value) -> Option<Value> {
        None
    }
}

impl PointToPointHandler for Unanswered {
    fn route(&self, owners: &OwnershipMap, _data: &Value) -> Option<Owner> {
        owners.guild_owner(10)
    }
}

fn unanswered_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(Handler::point_to_point(Unanswered))
        .unwrap()
        .build()
}

#[tokio::test]
async fn return_paths_expire_with_request_timeout() {
    let mut config = ServerConfig::new("127.0.0.1:0", SECRET);
    config.request_timeout = Some(Duration::from_millis(300));
    let server = IpcServer::start(config, unanswered_registry(), server_member())
        .await
        .unwrap();

    let owner = IpcClient::connect(
        client_config(server.local_addr(), SECRET),
        unanswered_registry(),
        client_member(),
    );
    online(&owner).await;
    let asker = Arc::new(IpcClient::connect(
        client_config(server.local_addr(), SECRET),
        unanswered_registry(),
        empty_member(),
    ));
    online(&asker).await;

    let call = {
        let asker = asker.clone();
        tokio::spawn(async move { asker.send_request("unanswered", json!({})).await })
    };
    let srv = &server;
    eventually(move || async move { srv.return_path_count().await == 1 }).await;
    eventually(move || async move { srv.return_path_count().await == 0 }).await;

    call.abort();
    owner.shutdown().await;
    asker.shutdown().await;
    server.shutdown().await;
}
