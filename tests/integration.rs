//! End-to-end tests over loopback sockets.
//!
//! A minimal in-memory register center runs as an ordinary [`Dispatcher`]
//! behind an [`RpcServer`]. Misbehaving peers are plain `TcpListener`s that
//! speak the wire format by hand.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use rpcwire::codec::{tags, SerializerRegistry};
use rpcwire::protocol::{
    Body, FrameBuffer, MessageCodec, MessageType, RegistryAction, HEADER_SIZE,
};
use rpcwire::provider::BoxFuture;
use rpcwire::server::ServerConfig;
use rpcwire::writer::OutboundFrame;
use rpcwire::{
    Dispatcher, Message, MethodRouter, RegisterClient, RegistryEntry, ResponseCode, RpcClient,
    RpcConfig, RpcError, RpcRequest, RpcResponse, RpcServer, ServerHandle, ServiceDescriptor,
    ServiceDispatcher, ServiceError, ServiceProvider,
};

/// Register center keeping entries in memory.
#[derive(Clone, Default)]
struct TestCenter {
    entries: Arc<DashMap<String, RegistryEntry>>,
}

impl Dispatcher for TestCenter {
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<Message>> {
        let serializer = message.serializer;
        let response = match message.body {
            Body::Register(command) => {
                self.entries
                    .entry(command.service_name.clone())
                    .or_insert_with(|| RegistryEntry::new(command.service_name.clone()))
                    .apply(&command);
                Some(RpcResponse::success(command.request_id, None))
            }
            Body::Discover(query) => {
                let picked = self
                    .entries
                    .get(&query.service_name)
                    .and_then(|entry| entry.pick());
                Some(match picked {
                    Some(addr) => RpcResponse::success(query.request_id, Some(json!(addr.to_string()))),
                    None => RpcResponse::fail(query.request_id, ResponseCode::ServiceNotFound),
                })
            }
            _ => None,
        };
        let reply = response.map(|r| Message::response(r).with_serializer(serializer));
        Box::pin(async move { reply })
    }
}

async fn start_center() -> (ServerHandle, TestCenter) {
    let center = TestCenter::default();
    let handle = RpcServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        center.clone(),
        &RpcConfig::default(),
    )
    .await
    .unwrap()
    .spawn()
    .unwrap();
    (handle, center)
}

fn client_for(center: &ServerHandle) -> RpcClient {
    RpcClient::builder()
        .register_center(center.local_addr())
        .request_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn codec() -> MessageCodec {
    MessageCodec::new(Arc::new(SerializerRegistry::with_defaults()))
}

fn request(id: &str) -> Message {
    Message::request(RpcRequest {
        request_id: id.to_string(),
        service_name: "echo@1.0".to_string(),
        method_name: "say".to_string(),
        params: json!("hi"),
    })
}

/// Read frames from a raw peer until `count` messages have arrived.
async fn read_messages(stream: &mut TcpStream, count: usize) -> Vec<Message> {
    let codec = codec();
    let mut buffer = FrameBuffer::new();
    let mut messages = Vec::new();
    let mut buf = vec![0u8; 4096];

    while messages.len() < count {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "peer closed early");
        for frame in buffer.push(&buf[..n]).unwrap() {
            messages.push(codec.decode(&frame).unwrap());
        }
    }
    messages
}

async fn respond(stream: &mut TcpStream, id: &str, data: Value) {
    let bytes = codec()
        .encode(&Message::response(RpcResponse::success(id, Some(data))))
        .unwrap();
    stream.write_all(&bytes).await.unwrap();
}

#[derive(Deserialize)]
struct Say {
    text: String,
}

fn echo_service() -> MethodRouter {
    MethodRouter::new()
        .method("say", |p: Say| async move { Ok::<_, ServiceError>(p.text) })
        .method("slow", |ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, ServiceError>(ms)
        })
}

#[tokio::test]
async fn test_publish_then_discover_returns_published_address() {
    let (center, _) = start_center().await;
    let client = client_for(&center);

    let provider = ServiceProvider::new(
        "10.0.0.5:9000".parse().unwrap(),
        RegisterClient::new(client.clone()),
    );
    let published = provider
        .publish(ServiceDescriptor::new("echo", "1.0"), echo_service())
        .await
        .unwrap();
    assert!(published);

    let addr = RegisterClient::new(client.clone())
        .discover("echo@1.0")
        .await
        .unwrap();
    assert_eq!(addr, "10.0.0.5:9000".parse().unwrap());
}

#[tokio::test]
async fn test_second_publish_sends_nothing() {
    let (center_handle, center) = start_center().await;
    let client = client_for(&center_handle);
    let provider = ServiceProvider::new(
        "10.0.0.5:9000".parse().unwrap(),
        RegisterClient::new(client),
    );
    let descriptor = ServiceDescriptor::new("echo", "1.0");

    assert!(provider.publish(descriptor.clone(), echo_service()).await.unwrap());
    center.entries.clear();
    assert!(!provider.publish(descriptor, echo_service()).await.unwrap());

    assert!(center.entries.is_empty());
}

#[tokio::test]
async fn test_discovery_miss_and_unpublish() {
    let (center, _) = start_center().await;
    let client = client_for(&center);
    let register = RegisterClient::new(client.clone());

    assert!(matches!(
        register.discover("nobody@1.0").await,
        Err(RpcError::DiscoveryMiss(ref name)) if name == "nobody@1.0"
    ));

    let provider = ServiceProvider::new("10.0.0.5:9000".parse().unwrap(), register.clone());
    let descriptor = ServiceDescriptor::new("echo", "1.0");
    provider.publish(descriptor.clone(), echo_service()).await.unwrap();
    assert!(register.discover("echo@1.0").await.is_ok());

    assert!(provider.unpublish(&descriptor).await.unwrap());
    assert!(matches!(
        register.discover("echo@1.0").await,
        Err(RpcError::DiscoveryMiss(_))
    ));
}

#[tokio::test]
async fn test_invoke_discovers_and_calls_provider() {
    let (center, _) = start_center().await;
    let client = client_for(&center);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let provider_addr = listener.local_addr().unwrap();
    let provider = Arc::new(ServiceProvider::new(
        provider_addr,
        RegisterClient::new(client.clone()),
    ));
    let server = RpcServer::with_listener(
        listener,
        Arc::new(ServiceDispatcher::new(provider.clone())),
        Arc::new(SerializerRegistry::with_defaults()),
        ServerConfig::from(&RpcConfig::default()),
    )
    .unwrap()
    .spawn()
    .unwrap();

    let echo = ServiceDescriptor::new("echo", "1.0");
    provider.publish(echo.clone(), echo_service()).await.unwrap();

    let response = client
        .invoke(&echo, "say", json!({"text": "hello"}))
        .await
        .unwrap();
    assert_eq!(response.into_result().unwrap(), Some(json!("hello")));

    // JSON-tagged caller against the same provider
    let json_client = RpcClient::builder()
        .register_center(center.local_addr())
        .serializer(tags::JSON)
        .build()
        .unwrap();
    let response = json_client
        .invoke(&echo, "say", json!({"text": "again"}))
        .await
        .unwrap();
    assert_eq!(response.data, Some(json!("again")));

    server.shutdown();
}

#[tokio::test]
async fn test_concurrent_invokes_resolve_independently() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let provider = Arc::new(ServiceProvider::local(addr));
    let echo = ServiceDescriptor::new("echo", "1.0");
    provider.publish(echo.clone(), echo_service()).await.unwrap();
    let _server = RpcServer::with_listener(
        listener,
        Arc::new(ServiceDispatcher::new(provider)),
        Arc::new(SerializerRegistry::with_defaults()),
        ServerConfig::from(&RpcConfig::default()),
    )
    .unwrap()
    .spawn()
    .unwrap();

    let client = RpcClient::builder().build().unwrap();

    // Shorter sleeps finish first, so responses arrive out of send order
    let calls: Vec<_> = [120u64, 80, 40, 0]
        .into_iter()
        .map(|ms| {
            let client = client.clone();
            let echo = echo.clone();
            tokio::spawn(async move { client.invoke_at(addr, &echo, "slow", json!(ms)).await })
        })
        .collect();

    for (call, ms) in calls.into_iter().zip([120u64, 80, 40, 0]) {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.data, Some(json!(ms)));
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_out_of_order_responses_match_by_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder().build().unwrap();

    let first = client.send(addr, request("a")).await.unwrap();
    let second = client.send(addr, request("b")).await.unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    let received = read_messages(&mut peer, 2).await;
    assert_eq!(received[0].request_id(), Some("a"));

    respond(&mut peer, "b", json!("second")).await;
    respond(&mut peer, "a", json!("first")).await;

    assert_eq!(first.wait().await.unwrap().data, Some(json!("first")));
    assert_eq!(second.wait().await.unwrap().data, Some(json!("second")));
}

#[tokio::test]
async fn test_timeout_then_late_response_is_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder()
        .request_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let future = client.send(addr, request("r1")).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();
    read_messages(&mut peer, 1).await;

    let err = future.wait().await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    assert!(err.is_connection());

    // Late answer is ignored and the connection stays usable
    respond(&mut peer, "r1", json!("late")).await;
    let next = client.send(addr, request("r2")).await.unwrap();
    read_messages(&mut peer, 1).await;
    respond(&mut peer, "r2", json!("on time")).await;

    assert_eq!(next.wait().await.unwrap().data, Some(json!("on time")));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_bad_magic_fails_every_pending_call_with_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder().build().unwrap();

    let futures: Vec<_> = {
        let mut futures = Vec::new();
        for i in 0..3 {
            futures.push(client.send(addr, request(&format!("p{i}"))).await.unwrap());
        }
        futures
    };

    let (mut peer, _) = listener.accept().await.unwrap();
    read_messages(&mut peer, 3).await;
    peer.write_all(&[0xDE, 0xAD, 1, 0, 0, 0, 9, 2, 1]).await.unwrap();

    for future in futures {
        let err = future.wait().await.unwrap_err();
        assert!(err.is_protocol());
        assert!(matches!(err, RpcError::ProtocolMismatch { magic: 0xDEAD }));
    }
    assert_eq!(client.pending_calls(), 0);

    // The broken channel is replaced on the next call
    let future = client.send(addr, request("fresh")).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();
    read_messages(&mut peer, 1).await;
    respond(&mut peer, "fresh", json!(1)).await;
    assert!(future.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_peer_close_fails_all_pending_calls_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder().build().unwrap();

    let mut futures = Vec::new();
    for i in 0..10 {
        futures.push(client.send(addr, request(&format!("c{i}"))).await.unwrap());
    }

    let (mut peer, _) = listener.accept().await.unwrap();
    read_messages(&mut peer, 10).await;
    drop(peer);

    for future in futures {
        assert!(matches!(future.wait().await, Err(RpcError::ConnectionClosed)));
    }
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_duplicate_request_id_fails_at_send() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder().build().unwrap();

    let original = client.send(addr, request("dup")).await.unwrap();
    let err = client.send(addr, request("dup")).await.unwrap_err();
    assert!(matches!(err, RpcError::DuplicateRequestId(ref id) if id == "dup"));

    let (mut peer, _) = listener.accept().await.unwrap();
    let received = read_messages(&mut peer, 1).await;
    assert_eq!(received.len(), 1);
    respond(&mut peer, "dup", json!("once")).await;

    assert_eq!(original.wait().await.unwrap().data, Some(json!("once")));
}

#[tokio::test]
async fn test_close_then_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder().build().unwrap();

    let pending = client.send(addr, request("before")).await.unwrap();
    let (_first_peer, _) = listener.accept().await.unwrap();

    client.close().await;
    assert!(matches!(pending.wait().await, Err(RpcError::ConnectionClosed)));

    let after = client.send(addr, request("after")).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();
    read_messages(&mut peer, 1).await;
    respond(&mut peer, "after", json!(true)).await;
    assert!(after.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_idle_client_sends_heartbeat_and_answers_ping() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = RpcClient::builder()
        .idle_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    client.send_oneway(addr, Message::pong()).await.unwrap();
    let (mut peer, _) = listener.accept().await.unwrap();

    let mut header = [0u8; HEADER_SIZE];
    peer.read_exact(&mut header).await.unwrap();
    assert_eq!(header[7], MessageType::HeartbeatPong.as_u8());

    // Nothing else queued: the writer goes idle and pings
    peer.read_exact(&mut header).await.unwrap();
    assert_eq!(header[7], MessageType::HeartbeatPing.as_u8());

    peer.write_all(OutboundFrame::heartbeat(MessageType::HeartbeatPing).as_bytes())
        .await
        .unwrap();
    loop {
        peer.read_exact(&mut header).await.unwrap();
        if header[7] == MessageType::HeartbeatPong.as_u8() {
            break;
        }
        assert_eq!(header[7], MessageType::HeartbeatPing.as_u8());
    }
}

#[tokio::test]
async fn test_server_closes_connection_on_bad_magic_only() {
    let (center, center_state) = start_center().await;
    let client = client_for(&center);

    let mut rogue = TcpStream::connect(center.local_addr()).await.unwrap();
    rogue.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(rogue.read(&mut buf).await.unwrap_or(0), 0);

    // A well-behaved client on its own connection is unaffected
    RegisterClient::new(client)
        .register("echo@1.0", "10.0.0.5:9000".parse().unwrap())
        .await
        .unwrap();
    let entry = center_state.entries.get("echo@1.0").unwrap();
    assert_eq!(entry.pick(), Some("10.0.0.5:9000".parse().unwrap()));
}

#[tokio::test]
async fn test_registry_command_reaches_center_with_action() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let center = listener.local_addr().unwrap();
    let client = RpcClient::builder().register_center(center).build().unwrap();
    let register = RegisterClient::new(client);

    let call = tokio::spawn(async move {
        register
            .unregister("echo@1.0", "10.0.0.5:9000".parse().unwrap())
            .await
    });

    let (mut peer, _) = listener.accept().await.unwrap();
    let received = read_messages(&mut peer, 1).await;
    let command = match &received[0].body {
        Body::Register(command) => command.clone(),
        other => panic!("unexpected body {other:?}"),
    };
    assert_eq!(command.action, RegistryAction::Unregister);
    assert_eq!(command.service_name, "echo@1.0");

    let bytes = codec()
        .encode(&Message::response(RpcResponse::success(
            command.request_id,
            None,
        )))
        .unwrap();
    peer.write_all(&bytes).await.unwrap();
    call.await.unwrap().unwrap();
}
