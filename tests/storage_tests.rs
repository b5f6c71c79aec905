//! Token exchange, freshness checks, bucket listing and image upload against a mock service.

mod common;

use chrono::{TimeZone, Utc};
use cloud_vision_sync_lib::upload::encode_jpeg;
use cloud_vision_sync_lib::{AuthFailure, CloudVision, ModelBranch, SyncConfig, SyncError};
use common::*;
use image::{DynamicImage, Rgb, RgbImage};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_token_exchange() {
    let fixture = Fixture::start().await;
    let token = fixture.client().get_token().await.unwrap();
    assert_eq!(token.secret(), TOKEN);
}

#[tokio::test]
async fn test_rejected_api_key_keeps_iam_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "errorCode": "BXNIM0415E",
            "errorMessage": "Provided API key could not be found",
        })))
        .mount(&server)
        .await;

    let config = SyncConfig {
        endpoint: server.uri(),
        iam_url: format!("{}/oidc/token", server.uri()),
        api_key: "wrong".to_string(),
        ..SyncConfig::default()
    };
    let cloud = CloudVision::new(config).unwrap();

    let err = cloud.get_token().await.unwrap_err();
    assert!(
        matches!(err, SyncError::Authentication { failure: AuthFailure::Rejected, .. }),
        "{:?}",
        err
    );
    assert_eq!(err.status_code(), Some(400));
}

#[tokio::test]
async fn test_token_response_without_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oidc/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer",
        })))
        .mount(&server)
        .await;

    let config = SyncConfig {
        iam_url: format!("{}/oidc/token", server.uri()),
        api_key: API_KEY.to_string(),
        ..SyncConfig::default()
    };
    let cloud = CloudVision::new(config).unwrap();

    let err = cloud.get_token().await.unwrap_err();
    assert!(
        matches!(
            err,
            SyncError::Authentication {
                failure: AuthFailure::MissingAccessToken,
                status: Some(200),
            }
        ),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_unreachable_token_endpoint_is_transport_error() {
    let config = SyncConfig {
        iam_url: "http://127.0.0.1:9/oidc/token".to_string(),
        api_key: API_KEY.to_string(),
        ..SyncConfig::default()
    };
    let cloud = CloudVision::new(config).unwrap();

    let err = cloud.get_token().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)), "{:?}", err);
    assert!(!err.to_string().contains(API_KEY));
}

#[tokio::test]
async fn test_latest_model_date() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers.mlmodel"))
        .and(header("authorization", BEARER))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", CURRENT))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let date = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::default())
        .await
        .unwrap();
    assert_eq!(date, Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap());
}

#[tokio::test]
async fn test_latest_model_date_on_branch() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers-experiment.mlmodel"))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", NEWER))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let date = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::new("experiment"))
        .await
        .unwrap();
    assert_eq!(date, Utc.with_ymd_and_hms(2015, 10, 22, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn test_missing_model_is_not_found() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers.mlmodel"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)), "{:?}", err);
    assert_eq!(err.status_code(), Some(404));
}

#[tokio::test]
async fn test_server_error_keeps_status() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers.mlmodel"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Protocol { status: Some(503), .. }), "{:?}", err);
}

#[tokio::test]
async fn test_missing_last_modified_is_protocol_error() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers.mlmodel"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Protocol { status: Some(200), .. }), "{:?}", err);
}

#[tokio::test]
async fn test_unparseable_last_modified_is_parse_error() {
    let fixture = Fixture::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flowers/flowers.mlmodel"))
        .respond_with(ResponseTemplate::new(200).insert_header("Last-Modified", "2015-10-21T07:28:00Z"))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .client()
        .get_latest_model_date("flowers", &ModelBranch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Parse(_)), "{:?}", err);
}

#[tokio::test]
async fn test_bucket_list() {
    let fixture = Fixture::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("authorization", BEARER))
        .and(header("ibm-service-instance-id", "crn:test"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(&["a", "b", "c"])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let buckets = fixture.client().get_bucket_list("crn:test").await.unwrap();
    assert_eq!(buckets, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_malformed_bucket_list_keeps_partial_names() {
    let fixture = Fixture::start().await;
    let body = "<ListAllMyBucketsResult><Buckets>\
                <Bucket><Name>a</Name></Bucket>\
                <Bucket><Name>b</Name></Wrong>";
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&fixture.server)
        .await;

    let buckets = fixture.client().get_bucket_list("crn:test").await.unwrap();
    assert_eq!(buckets, vec!["a", "b"]);
}

#[tokio::test]
async fn test_bucket_list_rejected() {
    let fixture = Fixture::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&fixture.server)
        .await;

    let err = fixture.client().get_bucket_list("crn:test").await.unwrap_err();
    assert_eq!(err.status_code(), Some(403));
}

#[tokio::test]
async fn test_upload_image() {
    let fixture = Fixture::start().await;
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([10, 120, 240])));
    let expected_len = encode_jpeg(&image).unwrap().len();

    Mock::given(method("PUT"))
        .and(path_regex(r"^/flowers/[0-9a-f-]{36}\.jpg$"))
        .and(header("authorization", BEARER))
        .and(header("content-type", "image/jpeg"))
        .and(header("content-length", expected_len.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let uploaded = fixture.client().upload_image(&image, "flowers").await.unwrap();
    assert_eq!(uploaded.bucket, "flowers");
    assert!(uploaded.key.ends_with(".jpg"));
    assert!(uploaded.url.ends_with(&format!("/flowers/{}", uploaded.key)));
}

#[tokio::test]
async fn test_upload_rejected_keeps_status() {
    let fixture = Fixture::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .client()
        .upload_jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], "missing-bucket")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Protocol { status: Some(404), .. }), "{:?}", err);
}
