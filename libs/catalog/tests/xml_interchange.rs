//! Course export and import through the XML interchange format

use std::sync::Arc;

use catalog::{CatalogError, MemoryStore, VideoAggregate, VideoPayload, VideoService};
use serde_json::{Value, json};

async fn service() -> VideoService {
    let store = MemoryStore::with_profiles(&["mobile", "desktop"])
        .await
        .expect("seed profiles");
    VideoService::new(Arc::new(store))
}

fn payload(value: Value) -> VideoPayload {
    serde_json::from_value(value).expect("valid payload json")
}

fn fish() -> VideoPayload {
    payload(json!({
        "edx_video_id": "fish",
        "client_video_id": "Shallow Swordfish",
        "duration": 122.0,
        "status": "test",
        "courses": ["test-course"],
        "encoded_videos": [
            {"profile": "mobile", "url": "http://www.example.com/fish-mobile.mp4", "file_size": 11, "bitrate": 22},
            {"profile": "desktop", "url": "http://www.example.com/fish-desktop.mp4", "file_size": 33, "bitrate": 44}
        ]
    }))
}

fn url_of<'a>(video: &'a VideoAggregate, profile: &str) -> Option<&'a str> {
    video
        .encoded_videos
        .iter()
        .find(|e| e.profile == profile)
        .map(|e| e.url.as_str())
}

const IMPORTED: &str = r#"
<video url_name="abc">
  <edx_video client_video_id="Imported Fish" duration="42.5" status="imported">
    <encoded_videos>
      <encoded_video profile="mobile" url="http://example.com/import-mobile.mp4" file_size="1" bitrate="2"/>
      <encoded_video profile="hls" url="http://example.com/import.m3u8" file_size="3" bitrate="4"/>
    </encoded_videos>
  </edx_video>
</video>
"#;

#[tokio::test]
async fn export_carries_fields_and_variants_but_no_courses() {
    let service = service().await;
    service.create(fish()).await.unwrap();

    let xml = service.queries().export_xml("fish").await.unwrap();
    assert!(xml.starts_with(r#"<edx_video client_video_id="Shallow Swordfish" duration="122.0" status="test">"#));
    assert!(xml.contains(
        r#"<encoded_video profile="mobile" url="http://www.example.com/fish-mobile.mp4" file_size="11" bitrate="22"/>"#
    ));
    assert!(xml.contains(r#"profile="desktop""#));
    assert!(!xml.contains("test-course"));
}

#[tokio::test]
async fn export_of_unknown_video_is_not_found() {
    let service = service().await;
    let err = service.queries().export_xml("ghost").await.unwrap_err();
    assert!(matches!(err, CatalogError::VideoNotFound(_)));
}

#[tokio::test]
async fn exported_video_imports_into_another_catalog() {
    let source = service().await;
    source.create(fish()).await.unwrap();
    let xml = source.queries().export_xml("fish").await.unwrap();

    let target = VideoService::new(Arc::new(MemoryStore::new()));
    let video = target.import_xml(&xml, "fish", "other-course").await.unwrap();

    assert_eq!(video.client_video_id, "Shallow Swordfish");
    assert_eq!(video.duration, 122.0);
    assert_eq!(video.courses, vec!["other-course"]);
    assert_eq!(video.encoded_videos.len(), 2);

    // Profiles unknown to the target were created on the way.
    let names: Vec<String> = target
        .queries()
        .list_profiles()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.profile_name)
        .collect();
    assert_eq!(names, vec!["mobile", "desktop"]);
}

#[tokio::test]
async fn import_into_existing_video_only_adds_new_profiles() {
    let service = service().await;
    service.create(fish()).await.unwrap();

    let video = service.import_xml(IMPORTED, "fish", "sea/life").await.unwrap();

    assert_eq!(video.client_video_id, "Shallow Swordfish");
    assert_eq!(video.status, "test");
    assert_eq!(
        url_of(&video, "mobile"),
        Some("http://www.example.com/fish-mobile.mp4")
    );
    assert_eq!(url_of(&video, "hls"), Some("http://example.com/import.m3u8"));
    assert_eq!(video.encoded_videos.len(), 3);
    assert_eq!(video.courses, vec!["test-course", "sea/life"]);
}

#[tokio::test]
async fn import_creates_missing_video() {
    let service = service().await;

    let video = service.import_xml(IMPORTED, "salmon", "sea/life").await.unwrap();
    assert_eq!(video.edx_video_id, "salmon");
    assert_eq!(video.client_video_id, "Imported Fish");
    assert_eq!(video.duration, 42.5);
    assert_eq!(video.status, "imported");
    assert_eq!(video.encoded_videos.len(), 2);
    assert_eq!(video.courses, vec!["sea/life"]);
}

#[tokio::test]
async fn repeated_import_changes_nothing_but_keeps_the_link() {
    let service = service().await;
    let first = service.import_xml(IMPORTED, "salmon", "sea/life").await.unwrap();
    let second = service.import_xml(IMPORTED, "salmon", "sea/life").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn import_without_element_only_links_existing_video() {
    let service = service().await;
    service.create(fish()).await.unwrap();

    let video = service.import_xml("<video/>", "fish", "sea/life").await.unwrap();
    assert_eq!(video.courses, vec!["test-course", "sea/life"]);
    assert_eq!(video.encoded_videos.len(), 2);

    let err = service.import_xml("<video/>", "ghost", "sea/life").await.unwrap_err();
    assert!(matches!(err, CatalogError::VideoNotFound(_)));
}

#[tokio::test]
async fn invalid_import_leaves_nothing_behind() {
    let service = service().await;
    let xml = r#"<edx_video duration="-1" status="x">
        <encoded_videos>
          <encoded_video profile="hls" url="http://example.com/a.m3u8" file_size="1" bitrate="1"/>
        </encoded_videos>
    </edx_video>"#;

    let err = service.import_xml(xml, "salmon", "sea/life").await.unwrap_err();
    match err {
        CatalogError::Validation(errors) => {
            assert_eq!(
                serde_json::to_value(&errors).unwrap(),
                json!({"duration": ["Ensure this value is greater than or equal to 0."]})
            );
        }
        other => panic!("expected a validation error, got {other:?}"),
    }

    assert!(matches!(
        service.queries().get("salmon").await,
        Err(CatalogError::VideoNotFound(_))
    ));
    assert_eq!(service.queries().list_profiles().await.unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_xml_is_reported() {
    let service = service().await;
    let err = service
        .import_xml(r#"<edx_video duration="ten" status="x"/>"#, "salmon", "sea/life")
        .await
        .unwrap_err();
    match err {
        CatalogError::Validation(errors) => {
            let report = serde_json::to_value(&errors).unwrap();
            assert!(report["non_field_errors"][0]
                .as_str()
                .unwrap()
                .starts_with("Invalid XML"));
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}
