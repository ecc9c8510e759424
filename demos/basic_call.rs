//! Basic example demonstrating a defaults caller.
//!
//! This example shows how to:
//! - Create a caller with a base URL and JSON decoding
//! - Make GET requests and read typed data
//! - Make POST requests with a JSON body
//! - Access response metadata
//!
//! Run with: `cargo run --example basic_call`

use microreq::{Body, Encoding, Error, RequestOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("microreq=debug,basic_call=info")
        .init();

    let api = microreq::defaults(
        RequestOptions::new()
            .with_base_url("http://jsonplaceholder.typicode.com")
            .with_encoding(Encoding::Json)
            .with_timeout(Duration::from_secs(10))
            .with_max_redirects(3),
    );

    println!("=== GET Request Example ===");
    let response = api.get("/posts/1", None).await?;
    let post: Post = response.json()?;

    println!("Post ID: {}", post.id);
    println!("Title: {}", post.title);
    println!("Request latency: {:?}", response.latency);
    println!("Status code: {}", response.status);
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };

    let response = api.post("/posts", Some(Body::json(&new_post)?)).await?;

    println!("Status code: {}", response.status);
    println!("Body: {:?}", response.body.as_json());
    println!();

    println!("=== Response Metadata ===");
    println!("Final URL: {}", response.url);
    println!("Content-Type: {:?}", response.header("content-type"));
    println!("Redirects followed: {}", response.redirects);

    Ok(())
}
