//! Registry, heartbeat and load-balanced client working together.

use std::sync::Arc;
use std::time::Duration;

use minirpc::client::{
    dial, Discovery, MultiServersDiscovery, RegistryDiscovery, SelectMode, XClient,
};
use minirpc::common::{Options, RpcError, SERVERS_HEADER, SERVER_HEADER};
use minirpc::registry::{Heartbeat, Registry, RegistryServer};
use minirpc::server::{Server, Service};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Starts a server whose `Node.Name` replies `name`, or fails when `fail` is set.
async fn start_node(name: &'static str, fail: bool, http: bool) -> String {
    let mut server = Server::new();
    server
        .register(
            Service::new("Node")
                .method("Name", move |_: ()| async move {
                    if fail {
                        Err(format!("{} is broken", name))
                    } else {
                        Ok(name.to_string())
                    }
                })
                .method("Sleep", |ms: u64| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, String>(ms)
                }),
        )
        .unwrap();
    let server = Arc::new(server);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    if http {
        tokio::spawn(server.serve_http(listener));
        format!("http@{}", addr)
    } else {
        tokio::spawn(server.accept(listener));
        format!("tcp@{}", addr)
    }
}

async fn start_registry(timeout: Duration) -> String {
    let server = RegistryServer::new(Arc::new(Registry::new(timeout)));
    let path = server.path().to_string();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.serve(listener));
    format!("http://{}{}", addr, path)
}

#[tokio::test]
async fn test_xclient_over_mixed_transports() {
    let a = start_node("a", false, false).await;
    let b = start_node("b", false, true).await;
    let discovery = Arc::new(MultiServersDiscovery::new(vec![a, b]));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());

    let mut names = Vec::new();
    for _ in 0..4 {
        let name: String = xclient.call("Node.Name", &()).await.unwrap();
        names.push(name);
    }
    names.sort();
    assert_eq!(names, vec!["a", "a", "b", "b"]);
    xclient.close().await.unwrap();
}

#[tokio::test]
async fn test_broadcast_reports_first_error() {
    let a = start_node("a", false, false).await;
    let b = start_node("b", true, false).await;
    let discovery = Arc::new(MultiServersDiscovery::new(vec![a, b]));
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let mut reply = String::new();
    let err = xclient
        .broadcast("Node.Name", &(), &mut reply)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "b is broken");
}

#[tokio::test]
async fn test_broadcast_with_no_servers_succeeds_trivially() {
    let discovery = Arc::new(MultiServersDiscovery::new(Vec::new()));
    let xclient = XClient::new(discovery, SelectMode::Random, Options::default());

    let mut reply = String::from("untouched");
    xclient.broadcast("Node.Name", &(), &mut reply).await.unwrap();
    assert_eq!(reply, "untouched");
    assert!(matches!(
        xclient.call::<_, String>("Node.Name", &()).await,
        Err(RpcError::NoAvailableServer)
    ));
}

#[tokio::test]
async fn test_registry_discovery_follows_heartbeats() {
    let registry = start_registry(Duration::from_secs(60)).await;
    let a = start_node("a", false, false).await;
    let b = start_node("b", false, true).await;

    for addr in [&a, &b] {
        Heartbeat::new(registry.clone(), addr.clone(), Duration::from_secs(30))
            .start()
            .await
            .unwrap();
    }

    let discovery = Arc::new(RegistryDiscovery::new(registry.clone(), Duration::ZERO));
    let mut expected = vec![a.clone(), b.clone()];
    expected.sort();
    assert_eq!(discovery.get_all().await.unwrap(), expected);

    let xclient = XClient::new(discovery, SelectMode::RoundRobin, Options::default());
    let mut reply = String::new();
    xclient.broadcast("Node.Name", &(), &mut reply).await.unwrap();
    assert!(reply == "a" || reply == "b");
}

#[tokio::test]
async fn test_registry_expiry_via_discovery() {
    let registry = start_registry(Duration::from_millis(100)).await;
    let a = start_node("a", false, false).await;

    let heartbeat = Heartbeat::new(registry.clone(), a.clone(), Duration::from_secs(60))
        .start()
        .await
        .unwrap();

    // A short refresh timeout so each lookup goes back to the registry
    let discovery = RegistryDiscovery::new(registry.clone(), Duration::from_millis(10));
    assert_eq!(discovery.get_all().await.unwrap(), vec![a.clone()]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(discovery.get_all().await.unwrap().is_empty());
    assert!(matches!(
        discovery.get(SelectMode::Random).await,
        Err(RpcError::NoAvailableServer)
    ));
    heartbeat.abort();
}

#[tokio::test]
async fn test_registry_raw_http_surface() {
    let registry = start_registry(Duration::from_secs(60)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(&registry)
        .header(SERVER_HEADER, "tcp@127.0.0.1:7")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = client.get(&registry).send().await.unwrap();
    assert_eq!(response.headers().get(SERVERS_HEADER).unwrap(), "tcp@127.0.0.1:7");

    let response = client.post(&registry).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let response = client.put(&registry).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_cancelled_call_leaves_client_usable() {
    let a = start_node("a", false, false).await;
    let client = minirpc::client::xdial(&a, Options::default()).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = client
        .call_cancellable::<_, u64>(&token, "Node.Sleep", &100u64)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Cancelled));

    let name: String = client.call("Node.Name", &()).await.unwrap();
    assert_eq!(name, "a");

    // A bare address dials TCP
    let bare = a.trim_start_matches("tcp@");
    let client = dial(bare, Options::default()).await.unwrap();
    let name: String = client.call("Node.Name", &()).await.unwrap();
    assert_eq!(name, "a");
}
