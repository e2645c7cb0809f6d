//! Tests against a running server backed by PostgreSQL.
//!
//! Start the server with the same `JWT_SECRET`, then run:
//! `cargo test -- --ignored`

use campus_library::models::user::{Role, UserClaims};
use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Helper to sign a token the running server accepts
fn auth_token(user_id: i32, role: Role) -> String {
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    let now = chrono::Utc::now().timestamp();
    UserClaims {
        sub: format!("user{}", user_id),
        user_id,
        role,
        exp: now + 3600,
        iat: now,
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_last_copy_goes_to_one_borrower() {
    let client = Client::new();
    let admin = auth_token(1, Role::Admin);
    let isbn = format!("979{:010}", chrono::Utc::now().timestamp_millis() % 10_000_000_000);

    let book: Value = client
        .post(format!("{}/books", BASE_URL))
        .bearer_auth(&admin)
        .json(&json!({ "isbn": isbn, "title": "Concurrency in Practice", "total_copies": 1 }))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let book_id = book["id"].as_i64().expect("No book id");

    let borrow = |user_id: i32| {
        let client = client.clone();
        let token = auth_token(user_id, Role::Student);
        async move {
            client
                .post(format!("{}/loans", BASE_URL))
                .bearer_auth(token)
                .json(&json!({ "book_id": book_id }))
                .send()
                .await
                .expect("Failed to send request")
                .status()
        }
    };

    let (a, b) = tokio::join!(borrow(900_001), borrow(900_002));
    let created = [a, b].iter().filter(|s| s.as_u16() == 201).count();
    let refused = [a, b].iter().filter(|s| s.as_u16() == 409).count();
    assert_eq!((created, refused), (1, 1));

    let book: Value = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .bearer_auth(&admin)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(book["available_copies"], 0);
}
