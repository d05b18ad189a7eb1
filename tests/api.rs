mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use common::Harness;
use newsdeck::infra::http::{
    self, CACHE_HEADER, CACHE_TIER_HEADER, HttpState, PAGINATION_MODE_HEADER, REQUEST_ID_HEADER,
};

fn router(h: &Harness) -> Router {
    http::build_router(HttpState {
        listing: h.listing.clone(),
        commands: h.commands.clone(),
        cache: Some(h.cache.clone()),
        invalidator: Some(h.invalidator.clone()),
        db: None,
    })
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    router.clone().oneshot(request).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    send(router, Method::GET, uri, None).await
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_value<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn listing_reports_cache_status_and_mode() {
    let h = Harness::new(common::articles(12));
    let app = router(&h);

    let first = get(&app, "/articles?limit=5").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header_value(&first, CACHE_HEADER), Some("miss"));
    assert_eq!(header_value(&first, PAGINATION_MODE_HEADER), Some("offset"));
    let body = json_body(first).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 5);
    assert_eq!(body["total"], 12);
    assert_eq!(body["page_info"]["has_next_page"], true);

    let again = get(&app, "/articles?limit=5").await;
    assert_eq!(header_value(&again, CACHE_HEADER), Some("hit"));

    let cursor = body["page_info"]["end_cursor"].as_str().unwrap().to_string();
    let next = get(&app, &format!("/articles?limit=5&cursor={cursor}")).await;
    assert_eq!(header_value(&next, PAGINATION_MODE_HEADER), Some("cursor"));
    let next = json_body(next).await;
    assert_eq!(next["items"][0]["title"], "Headline 007");
    assert!(next["total"].is_null());
}

#[tokio::test]
async fn filters_and_sorting_apply() {
    let h = Harness::new(common::articles(12));
    let app = router(&h);

    let response = get(&app, "/articles?tag=rust&sort=title&dir=asc").await;
    let body = json_body(response).await;
    let titles: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, [
        "Headline 003",
        "Headline 006",
        "Headline 009",
        "Headline 012"
    ]);

    let response = get(&app, "/articles?source=wire&q=headline%2001").await;
    let body = json_body(response).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn bad_sort_is_a_bad_request() {
    let h = Harness::new(common::articles(2));
    let app = router(&h);

    let response = get(&app, "/articles?sort=popularity").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn article_detail_round_trip() {
    let h = Harness::new(common::articles(3));
    let app = router(&h);
    let id = Uuid::from_u128(2);

    let miss = get(&app, &format!("/articles/{id}")).await;
    assert_eq!(miss.status(), StatusCode::OK);
    assert_eq!(header_value(&miss, CACHE_HEADER), Some("miss"));

    let hit = get(&app, &format!("/articles/{id}")).await;
    assert_eq!(header_value(&hit, CACHE_HEADER), Some("hit"));
    assert_eq!(header_value(&hit, CACHE_TIER_HEADER), Some("hot"));

    let missing = get(&app, &format!("/articles/{}", Uuid::from_u128(99))).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn writes_invalidate_cached_reads() {
    let h = Harness::new(common::articles(3));
    let app = router(&h);

    get(&app, "/articles").await;
    let created = send(
        &app,
        Method::POST,
        "/articles",
        Some(json!({
            "title": "Fresh off the wire",
            "source": "wire",
            "url": "https://news.example/fresh",
            "tags": ["Rust"],
            "published_at": "2030-01-01T00:00:00Z"
        })),
    )
    .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    assert_eq!(created["tags"], json!(["rust"]));

    let listing = get(&app, "/articles").await;
    assert_eq!(header_value(&listing, CACHE_HEADER), Some("miss"));
    let listing = json_body(listing).await;
    assert_eq!(listing["items"][0]["title"], "Fresh off the wire");

    let id = created["id"].as_str().unwrap();
    let patched = send(
        &app,
        Method::PATCH,
        &format!("/articles/{id}"),
        Some(json!({ "title": "Updated" })),
    )
    .await;
    assert_eq!(patched.status(), StatusCode::OK);

    let deleted = send(&app, Method::DELETE, &format!("/articles/{id}"), None).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let gone = get(&app, &format!("/articles/{id}")).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn favorites_lookup_and_toggle() {
    let h = Harness::new(common::articles(4));
    let app = router(&h);
    let user = Uuid::new_v4();
    let (a, b) = (Uuid::from_u128(1), Uuid::from_u128(2));

    let added = send(
        &app,
        Method::PUT,
        &format!("/users/{user}/favorites/{a}"),
        None,
    )
    .await;
    assert_eq!(json_body(added).await, json!({ "favorited": true, "changed": true }));

    let lookup = format!("/users/{user}/favorites/lookup?ids={b},{a}");
    let first = get(&app, &lookup).await;
    assert_eq!(header_value(&first, CACHE_HEADER), Some("miss"));
    assert_eq!(json_body(first).await, json!({ "favorited": [a] }));
    let second = get(&app, &lookup).await;
    assert_eq!(header_value(&second, CACHE_HEADER), Some("hit"));

    send(
        &app,
        Method::DELETE,
        &format!("/users/{user}/favorites/{a}"),
        None,
    )
    .await;
    let after = get(&app, &lookup).await;
    assert_eq!(header_value(&after, CACHE_HEADER), Some("miss"));
    assert_eq!(json_body(after).await, json!({ "favorited": [] }));

    let bad = get(&app, &format!("/users/{user}/favorites/lookup?ids=nope")).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_is_a_retryable_503_unless_cached() {
    let h = Harness::new(common::articles(5));
    let app = router(&h);

    get(&app, "/articles?limit=2").await;
    h.store.set_unavailable(true);

    let cached = get(&app, "/articles?limit=2").await;
    assert_eq!(cached.status(), StatusCode::OK);
    assert_eq!(header_value(&cached, CACHE_HEADER), Some("hit"));

    let uncached = get(&app, "/articles?limit=3").await;
    assert_eq!(uncached.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(header_value(&uncached, header::RETRY_AFTER.as_str()), Some("1"));
    let body = json_body(uncached).await;
    assert_eq!(body["error"]["code"], "unavailable");
}

#[tokio::test]
async fn cache_admin_endpoints() {
    let h = Harness::new(common::articles(5));
    let app = router(&h);

    get(&app, "/articles").await;
    get(&app, "/articles").await;

    let stats = json_body(get(&app, "/admin/cache/stats").await).await;
    assert_eq!(stats["enabled"], true);
    assert_eq!(stats["aggregate"]["hits"], 1);
    assert_eq!(stats["aggregate"]["misses"], 1);
    assert_eq!(stats["tiers"][0]["name"], "hot");

    let purge = send(
        &app,
        Method::POST,
        "/admin/cache/purge",
        Some(json!({ "namespace": "articles.list" })),
    )
    .await;
    assert_eq!(purge.status(), StatusCode::OK);
    let purge = json_body(purge).await;
    assert_eq!(purge["namespace"], "articles.list");
    assert_eq!(purge["evicted"], 2);

    let relisted = get(&app, "/articles").await;
    assert_eq!(header_value(&relisted, CACHE_HEADER), Some("miss"));

    let unknown = send(
        &app,
        Method::POST,
        "/admin/cache/purge",
        Some(json!({ "namespace": "sessions" })),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let reset = json_body(send(&app, Method::POST, "/admin/cache/stats/reset", None).await).await;
    assert_eq!(reset["aggregate"]["misses"], 2);
    let cleared = json_body(get(&app, "/admin/cache/stats").await).await;
    assert_eq!(cleared["aggregate"]["hits"], 0);
}

#[tokio::test]
async fn health_and_request_ids() {
    let h = Harness::new(Vec::new());
    let app = router(&h);

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(header_value(&response, REQUEST_ID_HEADER).is_some());

    let request = Request::builder()
        .uri("/health")
        .header(REQUEST_ID_HEADER, "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(header_value(&response, REQUEST_ID_HEADER), Some("req-42"));
}
