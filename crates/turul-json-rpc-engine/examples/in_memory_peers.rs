//! Two engines talking to each other over in-memory channels.
//!
//! The "server" answers `hello`; the "client" calls it, then calls a method
//! nobody registered to show how a peer error comes back.
//!
//! Run with `RUST_LOG=turul_json_rpc_engine=debug` to see every message.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;
use turul_json_rpc_engine::prelude::*;

/// An engine whose outgoing messages land on a channel
fn peer(name: &str) -> (Engine, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Engine::with_send(EngineConfig::named(name), move |text| {
        let _ = tx.send(text);
    });
    (engine, rx)
}

/// Feed everything `from` writes into `to`
fn wire(mut from: mpsc::UnboundedReceiver<String>, to: Engine) {
    tokio::spawn(async move {
        while let Some(text) = from.recv().await {
            if let Err(e) = to.receive_str(&text) {
                tracing::error!(engine = %to.name(), error = %e, "Peer refused message");
                break;
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (server, server_out) = peer("server");
    let (client, client_out) = peer("client");
    wire(server_out, client.clone());
    wire(client_out, server.clone());

    server.register_method("hello", |params: Option<RequestParams>| async move {
        let name = params
            .as_ref()
            .and_then(|p| p.get("name").or_else(|| p.get_index(0)))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "world".to_string());
        Ok::<_, HandlerError>(json!(format!("Hello {}", name)))
    })?;

    client.on(SignalKind::UnexpectedResponse, |signal| {
        info!(?signal, "Client saw a reply it never asked for");
    });

    let greeting = client.call("hello", None)?.await?;
    info!(%greeting, "Default greeting");

    let params = RequestParams::from(vec![json!("Rust")]);
    let greeting = client.call("hello", Some(params))?.await?;
    info!(%greeting, "Positional greeting");

    match client.call("goodbye", None)?.await {
        Ok(value) => info!(%value, "Unexpected success"),
        Err(e) => info!(code = ?e.code(), error = %e, "Peer rejected call"),
    }

    Ok(())
}
