//! Echo Server - every `message` event is sent straight back.
//!
//! This demo shows:
//! - Building a server with extra namespaces
//! - Reacting to new sockets with `on_connection`
//! - Consuming socket events and answering with `emit` / `ack`
//!
//! # Running
//!
//! ```text
//! cargo run --example echo -- 127.0.0.1:4000
//! ```
//!
//! Peers connect over TCP and speak the framed text protocol: each fragment
//! is `[kind u8][len u32 BE][payload]`, e.g. the text fragment `0` connects
//! to `/` and `2["message","hi"]` is echoed back.

use std::sync::Arc;

use nspwire::namespace::{Socket, SocketEvent};
use nspwire::Server;
use serde_json::Value;

fn echo(socket: Arc<Socket>) {
    let Some(mut events) = socket.take_events() else {
        return;
    };

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SocketEvent::Packet(packet) if packet.event_name() == Some("message") => {
                    let args: Vec<Value> = match &packet.data {
                        Some(Value::Array(items)) => items.iter().skip(1).cloned().collect(),
                        _ => Vec::new(),
                    };
                    match packet.id {
                        Some(id) => socket.ack(id, args),
                        None => socket.emit("message", args),
                    }
                }
                SocketEvent::Packet(_) => {}
                SocketEvent::Error(e) => eprintln!("{} error: {}", socket.id(), e),
                SocketEvent::Closed(reason) => {
                    println!("{} closed: {}", socket.id(), reason);
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string());

    let server = Server::builder().namespace("/chat").build();
    server.of("/").on_connection(echo);
    server.of("/chat").on_connection(echo);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    println!("echo server listening on {}", addr);

    server.serve(listener).await?;
    Ok(())
}
