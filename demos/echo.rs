//! Echo - register center, provider and caller in one process.
//!
//! This example demonstrates:
//! - Running a register center as a plain [`Dispatcher`]
//! - Publishing a typed service with [`MethodRouter`]
//! - Invoking it by name through discovery
//!
//! ```text
//! RUST_LOG=rpcwire=debug cargo run --example echo
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rpcwire::protocol::Body;
use rpcwire::provider::BoxFuture;
use rpcwire::{
    Dispatcher, Message, MethodRouter, RegisterClient, RegistryEntry, ResponseCode, RpcClient,
    RpcConfig, RpcResponse, RpcServer, ServiceDescriptor, ServiceDispatcher, ServiceError,
    ServiceProvider,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Debug)]
struct EchoOutput {
    echo: String,
}

/// In-memory register center.
#[derive(Default)]
struct Center {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl Dispatcher for Center {
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<Message>> {
        let serializer = message.serializer;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let response = match message.body {
            Body::Register(command) => {
                entries
                    .entry(command.service_name.clone())
                    .or_insert_with(|| RegistryEntry::new(command.service_name.clone()))
                    .apply(&command);
                Some(RpcResponse::success(command.request_id, None))
            }
            Body::Discover(query) => match entries.get(&query.service_name).and_then(|e| e.pick()) {
                Some(addr) => Some(RpcResponse::success(
                    query.request_id,
                    Some(json!(addr.to_string())),
                )),
                None => Some(RpcResponse::fail(query.request_id, ResponseCode::ServiceNotFound)),
            },
            _ => None,
        };

        let reply = response.map(|r| Message::response(r).with_serializer(serializer));
        Box::pin(async move { reply })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rpcwire=info")),
        )
        .init();

    let config = RpcConfig::default();

    // Register center on an ephemeral port
    let center = RpcServer::bind("127.0.0.1:0".parse()?, Center::default(), &config)
        .await?
        .spawn()?;

    let client = RpcClient::builder()
        .config(config.clone())
        .register_center(center.local_addr())
        .build()?;

    // Provider: a wildcard bind advertises the interface facing the center
    let listener = TcpListener::bind("0.0.0.0:0").await?;
    let provider = Arc::new(
        ServiceProvider::for_listener(&listener, RegisterClient::new(client.clone())).await?,
    );
    let _server = RpcServer::with_listener(
        listener,
        Arc::new(ServiceDispatcher::new(provider.clone())),
        Arc::new(rpcwire::codec::SerializerRegistry::with_defaults()),
        (&config).into(),
    )?
    .spawn()?;

    let echo = ServiceDescriptor::new("echo", "1.0");
    provider
        .publish(
            echo.clone(),
            MethodRouter::new().method("echo", |input: EchoInput| async move {
                Ok::<_, ServiceError>(EchoOutput {
                    echo: input.message,
                })
            }),
        )
        .await?;

    let response = client
        .invoke(&echo, "echo", json!({ "message": "hello" }))
        .await?;
    println!("{}", response.into_result()?.unwrap_or_default());

    client.close().await;
    Ok(())
}
