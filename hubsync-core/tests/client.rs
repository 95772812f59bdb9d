use hubsync_core::{
    ApiErrorClass, CommitOperation, EntryType, HubClient, HubError, LfsObject, PreuploadFile,
    RepoRef, RepoType, UploadMode,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dataset() -> RepoRef {
    RepoRef::new(RepoType::Dataset, "alice/nas-backup")
}

#[tokio::test]
async fn whoami_sends_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/whoami-v2"))
        .and(header("authorization", "Bearer hf_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "user",
            "name": "alice"
        })))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let me = client.whoami().await.unwrap();

    assert_eq!(me.name, "alice");
    assert_eq!(me.account_type.as_deref(), Some("user"));
}

#[tokio::test]
async fn whoami_unauthorized_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/whoami-v2"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "bad").unwrap();
    let err = client.whoami().await.expect_err("expected 401");

    assert!(matches!(err, HubError::Api { .. }));
    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(err.is_auth());
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn paths_info_posts_form_and_parses_entries() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/datasets/alice/nas-backup/paths-info/main"))
        .and(body_string_contains("paths=videos%2Fa.mp4"))
        .and(body_string_contains("expand=false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "type": "file",
                "path": "videos/a.mp4",
                "size": 134,
                "oid": "pointer",
                "lfs": { "oid": "abc", "size": 500, "pointerSize": 134 }
            }
        ])))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let entries = client
        .paths_info(&dataset(), &["videos/a.mp4"])
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, EntryType::File);
    assert_eq!(entries[0].file_size(), Some(500));
}

#[tokio::test]
async fn paths_info_returns_empty_list_for_missing_paths() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/datasets/alice/nas-backup/paths-info/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let entries = client.paths_info(&dataset(), &["nope.bin"]).await.unwrap();

    assert!(entries.is_empty());
}

#[tokio::test]
async fn preupload_reports_upload_mode() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/datasets/alice/nas-backup/preupload/main"))
        .and(body_string_contains("\"path\":\"docs/a.txt\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                { "path": "docs/a.txt", "uploadMode": "regular", "shouldIgnore": false }
            ],
            "commitOid": "deadbeef"
        })))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let files = client
        .preupload(
            &dataset(),
            &[PreuploadFile {
                path: "docs/a.txt".into(),
                sample: "aGVsbG8=".into(),
                size: 5,
            }],
        )
        .await
        .unwrap();

    assert_eq!(files[0].upload_mode, UploadMode::Regular);
    assert!(!files[0].should_ignore);
}

#[tokio::test]
async fn lfs_batch_uses_git_lfs_media_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/datasets/alice/nas-backup.git/info/lfs/objects/batch"))
        .and(header("accept", "application/vnd.git-lfs+json"))
        .and(body_string_contains("\"operation\":\"upload\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transfer": "basic",
            "objects": [
                {
                    "oid": "abc",
                    "size": 500,
                    "actions": {
                        "upload": {
                            "href": format!("{}/s3/abc", server.uri()),
                            "header": { "x-amz-meta": "1" }
                        }
                    }
                }
            ]
        })))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let objects = client
        .lfs_batch(
            &dataset(),
            &[LfsObject {
                oid: "abc".into(),
                size: 500,
            }],
        )
        .await
        .unwrap();

    let upload = objects[0]
        .actions
        .as_ref()
        .and_then(|actions| actions.upload.as_ref())
        .unwrap();
    assert!(upload.href.as_str().ends_with("/s3/abc"));
    assert_eq!(upload.header.get("x-amz-meta").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn lfs_object_errors_surface_as_lfs_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/datasets/alice/nas-backup.git/info/lfs/objects/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "objects": [
                { "oid": "abc", "size": 500, "error": { "code": 422, "message": "size mismatch" } }
            ]
        })))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let objects = client
        .lfs_batch(
            &dataset(),
            &[LfsObject {
                oid: "abc".into(),
                size: 500,
            }],
        )
        .await
        .unwrap();
    let err = objects
        .into_iter()
        .next()
        .unwrap()
        .into_result()
        .expect_err("expected object error");

    assert!(matches!(err, HubError::Lfs { ref oid, .. } if oid == "abc"));
}

#[tokio::test]
async fn commit_sends_ndjson_operations() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/datasets/alice/nas-backup/commit/main"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string_contains("\"key\":\"lfsFile\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "commitOid": "c0ffee",
            "commitUrl": "https://hub.example/commit/c0ffee"
        })))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let info = client
        .commit(
            &dataset(),
            "Upload videos/a.mp4 with hubsyncd",
            &[CommitOperation::LfsFile {
                path: "videos/a.mp4".into(),
                oid: "abc".into(),
                size: 500,
            }],
        )
        .await
        .unwrap();

    assert_eq!(info.commit_oid.as_deref(), Some("c0ffee"));
}

#[tokio::test]
async fn commit_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/datasets/alice/nas-backup/commit/main"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = HubClient::with_endpoint(&server.uri(), "hf_test").unwrap();
    let err = client
        .commit(&dataset(), "Upload", &[])
        .await
        .expect_err("expected 503");

    assert!(err.is_retryable());
}
