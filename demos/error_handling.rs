//! Example demonstrating error handling.
//!
//! This example shows how to:
//! - Tell connect timeouts from response timeouts
//! - Handle an exhausted redirect budget
//! - Read transport error codes
//! - Deal with deserialization failures
//!
//! Run with: `cargo run --example error_handling`

use microreq::{Encoding, Error, RequestOptions};
use serde::Deserialize;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("microreq=info")
        .init();

    println!("=== Example 1: Timeouts ===");
    let options = RequestOptions::new()
        .with_url("http://httpbin.org/delay/5")
        .with_timeout(Duration::from_millis(500));
    match microreq::request(options, None).await {
        Ok(response) => println!("Unexpected success: {}", response.status),
        Err(e @ Error::ConnectTimeout { .. }) => println!("No response in time: {} ({})", e, e.code()),
        Err(e @ Error::SocketTimeout { .. }) => println!("Response stalled: {} ({})", e, e.code()),
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 2: Redirect Budget ===");
    let options = RequestOptions::new()
        .with_url("http://httpbin.org/redirect/5")
        .with_max_redirects(2);
    match microreq::request(options, None).await {
        Ok(response) => println!("Landed on {}", response.url),
        Err(Error::Redirect {
            location,
            max_redirects,
        }) => println!("Gave up at {} after {} redirects", location, max_redirects),
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 3: Transport Errors ===");
    match microreq::request("http://127.0.0.1:1/", None).await {
        Ok(response) => println!("Unexpected success: {}", response.status),
        Err(e) => {
            println!("Code: {}", e.code());
            println!("Failed before connecting: {}", e.is_connect());
        }
    }
    println!();

    println!("=== Example 4: Deserialization Errors ===");
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    let options = RequestOptions::new()
        .with_url("http://httpbin.org/json")
        .with_encoding(Encoding::Json);
    let response = microreq::request(options, None).await?;
    match response.json::<WrongSchema>() {
        Ok(data) => println!("Unexpected success: {:?}", data),
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            status,
        }) => {
            println!("Status: {}", status);
            println!("Serde error: {}", serde_error);
            println!("Raw response: {:.80}", raw_response);
        }
        Err(e) => println!("Other error: {}", e),
    }

    Ok(())
}
