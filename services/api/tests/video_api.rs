//! HTTP behaviour of the video endpoints

mod common;

use axum::http::{Method, StatusCode, header::CONTENT_TYPE};
use common::{body_bytes, body_json, build_test_app, get, send, send_text};
use serde_json::{Value, json};

fn fish() -> Value {
    json!({
        "edx_video_id": "fish",
        "client_video_id": "Shallow Swordfish",
        "duration": 122.0,
        "status": "test",
        "courses": ["animals/fish"],
        "encoded_videos": [
            {"profile": "mobile", "url": "http://www.example.com/fish-mobile.mp4", "file_size": 11, "bitrate": 22},
            {"profile": "desktop", "url": "http://www.example.com/fish-desktop.mp4", "file_size": 33, "bitrate": 44}
        ],
        "subtitles": [
            {"language": "en", "fmt": "srt", "content": "testing 123"}
        ]
    })
}

#[tokio::test]
async fn health_check_returns_ok() {
    let app = build_test_app().await;
    let response = get(&app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_test_app().await;
    let response = get(&app, "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"detail": "Not found."}));
}

#[tokio::test]
async fn create_then_get() {
    let app = build_test_app().await;

    let response = send(&app, Method::POST, "/videos", Some(fish())).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["url"], "/videos/fish");
    assert_eq!(created["encoded_videos"].as_array().unwrap().len(), 2);
    assert_eq!(
        created["subtitles"][0]["content_url"],
        "/videos/fish/subtitles/en/content"
    );

    let response = get(&app, "/videos/fish").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, created);
}

#[tokio::test]
async fn invalid_id_reports_field_error() {
    let app = build_test_app().await;
    let mut body = fish();
    body["edx_video_id"] = json!("***");

    let response = send(&app, Method::POST, "/videos", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"edx_video_id": ["edx_video_id has invalid characters"]})
    );
}

#[tokio::test]
async fn unknown_profile_reports_item_error() {
    let app = build_test_app().await;
    let mut body = fish();
    body["encoded_videos"][1]["profile"] = json!("bird");

    let response = send(&app, Method::POST, "/videos", Some(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({
            "encoded_videos": [
                {},
                {"profile": ["Object with profile_name=bird does not exist."]}
            ]
        })
    );

    let response = get(&app, "/videos/fish").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = build_test_app().await;
    let request = axum::http::Request::builder()
        .method(Method::POST)
        .uri("/videos")
        .header(CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{\"edx_video_id\": "))
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_replaces_children_and_ignores_body_id() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let body = json!({
        "edx_video_id": "shark",
        "duration": 122.0,
        "status": "test",
        "encoded_videos": [
            {"profile": "mobile", "url": "http://www.example.com/fish-mobile-v2.mp4", "file_size": 1, "bitrate": 2}
        ]
    });
    let response = send(&app, Method::PUT, "/videos/fish", Some(body)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let video = body_json(response).await;
    assert_eq!(video["edx_video_id"], "fish");
    assert_eq!(video["encoded_videos"].as_array().unwrap().len(), 1);
    assert_eq!(video["encoded_videos"][0]["profile"], "mobile");
    assert_eq!(video["subtitles"], json!([]));
    assert_eq!(video["courses"], json!([]));

    assert_eq!(get(&app, "/videos/shark").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn patch_keeps_absent_fields() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = send(
        &app,
        Method::PATCH,
        "/videos/fish",
        Some(json!({"status": "file_complete"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let video = body_json(response).await;
    assert_eq!(video["status"], "file_complete");
    assert_eq!(video["client_video_id"], "Shallow Swordfish");
    assert_eq!(video["encoded_videos"].as_array().unwrap().len(), 2);
    assert_eq!(video["courses"], json!(["animals/fish"]));
}

#[tokio::test]
async fn update_of_missing_video_is_404() {
    let app = build_test_app().await;
    let response = send(&app, Method::PATCH, "/videos/ghost", Some(json!({"status": "x"}))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_video() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = send(&app, Method::DELETE, "/videos/fish", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(get(&app, "/videos/fish").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subtitle_content_is_served_raw() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = get(&app, "/videos/fish/subtitles/en/content").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(body_bytes(response).await, b"testing 123");

    let response = send(
        &app,
        Method::PUT,
        "/videos/fish/subtitles/en",
        Some(json!({"fmt": "sjson", "content": "{\"start\": \"00:00:00\""})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Method::PUT,
        "/videos/fish/subtitles/en",
        Some(json!({"fmt": "sjson", "content": "{\"start\": \"00:00:00\"}"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["fmt"], "sjson");

    let response = get(&app, "/videos/fish/subtitles/en/content").await;
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(body_bytes(response).await, br#"{"start": "00:00:00"}"#);
}

#[tokio::test]
async fn missing_subtitle_is_404() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = get(&app, "/videos/fish/subtitles/de").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn course_listing_is_exact_match() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = get(&app, "/courses/animals/fish").await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = get(&app, "/courses/animals/fish/bad").await;
    assert_eq!(body_json(response).await, json!([]));

    let response = get(&app, "/videos?course=animals/fish").await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn list_by_ids_sorted() {
    let app = build_test_app().await;
    for (id, duration) in [("a", 3.0), ("b", 1.0), ("c", 2.0)] {
        let body = json!({"edx_video_id": id, "duration": duration, "status": "test"});
        send(&app, Method::POST, "/videos", Some(body)).await;
    }

    let response = get(&app, "/videos?ids=a,b,zzz&sort=duration&direction=desc").await;
    let ids: Vec<Value> = body_json(response)
        .await
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["edx_video_id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("a"), json!("b")]);
}

#[tokio::test]
async fn profile_urls_and_course_info() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = get(&app, "/videos/fish/urls?profiles=mobile,youtube").await;
    assert_eq!(
        body_json(response).await,
        json!({"mobile": "http://www.example.com/fish-mobile.mp4", "youtube": null})
    );

    let response = get(
        &app,
        "/course-videos/profiles?course_id=animals/fish&profiles=desktop",
    )
    .await;
    assert_eq!(
        body_json(response).await,
        json!({
            "fish": {
                "duration": 122.0,
                "profiles": {
                    "desktop": {"url": "http://www.example.com/fish-desktop.mp4", "file_size": 33}
                }
            }
        })
    );
}

#[tokio::test]
async fn copy_course_videos() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = send(
        &app,
        Method::POST,
        "/course-videos/copy",
        Some(json!({"source_course_id": "animals/fish", "destination_course_id": "sea/life"})),
    )
    .await;
    assert_eq!(body_json(response).await, json!({"copied": 1}));

    let response = get(&app, "/courses/sea/life").await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn profiles_can_be_listed_and_created() {
    let app = build_test_app().await;

    let response = send(
        &app,
        Method::POST,
        "/profiles",
        Some(json!({"profile_name": "hls", "label": "HLS"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        body_json(response).await,
        json!({"profile_name": "hls", "label": "HLS"})
    );

    let response = send(
        &app,
        Method::POST,
        "/profiles",
        Some(json!({"profile_name": "hls"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&app, "/profiles").await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn video_xml_exports_and_imports() {
    let app = build_test_app().await;
    send(&app, Method::POST, "/videos", Some(fish())).await;

    let response = get(&app, "/videos/fish/xml").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/xml");
    let xml = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(xml.starts_with("<edx_video "));
    assert!(!xml.contains("animals/fish"));

    let response = send_text(&app, Method::POST, "/videos/salmon/xml?course_id=sea/life", &xml).await;
    assert_eq!(response.status(), StatusCode::OK);
    let imported = body_json(response).await;
    assert_eq!(imported["edx_video_id"], "salmon");
    assert_eq!(imported["client_video_id"], "Shallow Swordfish");
    assert_eq!(imported["courses"], json!(["sea/life"]));
    assert_eq!(imported["encoded_videos"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn video_xml_errors() {
    let app = build_test_app().await;

    let response = get(&app, "/videos/ghost/xml").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send_text(&app, Method::POST, "/videos/ghost/xml?course_id=sea/life", "<video/>").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send_text(
        &app,
        Method::POST,
        "/videos/ghost/xml?course_id=sea/life",
        r#"<edx_video duration="soon" status="x"/>"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["non_field_errors"][0].as_str().unwrap().starts_with("Invalid XML"));
}
