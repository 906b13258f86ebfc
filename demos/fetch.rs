//! Fetch example
//!
//! Sends one GET through the transport and prints the outcome.
//!
//! Run with: cargo run --example fetch -- http://localhost:8080/

use sockets_transport::{Request, Transport, TransportSettings};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost:8080/".to_string());
    let url = Url::parse(&target).expect("invalid url");

    println!("Sockets Transport Fetch Example");
    println!("===============================\n");
    println!("GET {}", url);

    let transport = Transport::new(TransportSettings {
        max_response_body_size: Some(64 * 1024 * 1024),
        ..Default::default()
    })
    .unwrap();

    let response = transport
        .send(
            Request::get(url),
            Some(Duration::from_millis(500)),
            Duration::from_secs(10),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    println!("code: {}", response.code());
    for (name, value) in response.headers().iter() {
        println!("{}: {}", name, value);
    }
    match response.content() {
        Some(content) => println!("\n{} bytes", content.len()),
        None => println!("\nno body"),
    }
}
