use std::time::Duration;

use tiering_domain::entities::ObjectStoreCredentials;
use tiering_domain::ports::{ObjectStoreClient, ObjectStoreClientFactory, ObjectStoreError};
use tiering_infrastructure::{S3ClientFactory, S3ListClient};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn credentials(endpoint: &str) -> ObjectStoreCredentials {
    ObjectStoreCredentials {
        access_key_id: "AKIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        endpoint: endpoint.to_string(),
        bucket: "assets".to_string(),
        region: "us-east-1".to_string(),
    }
}

#[tokio::test]
async fn lists_at_most_one_key_with_signed_request() {
    let body = "<ListBucketResult>\
        <IsTruncated>false</IsTruncated>\
        <Contents><Key>cat.png</Key><LastModified>2024-05-01T10:00:00.000Z</LastModified>\
        <ETag>\"9b2cf535f27731c974343645a3985328\"</ETag><Size>1024</Size></Contents>\
        </ListBucketResult>";
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets"))
        .and(query_param("list-type", "2"))
        .and(query_param("max-keys", "1"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let client = S3ListClient::new(credentials(&server.uri()), Duration::from_secs(2)).unwrap();
    let keys = client.list_objects("assets", 1).await.unwrap();
    assert_eq!(keys, vec!["cat.png".to_string()]);
}

#[tokio::test]
async fn missing_bucket_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets"))
        .respond_with(ResponseTemplate::new(404).set_body_string(
            "<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>",
        ))
        .mount(&server)
        .await;

    let factory = S3ClientFactory::new(Duration::from_secs(2));
    let client = factory.create(&credentials(&server.uri())).unwrap();
    let err = client.list_objects("assets", 1).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::BucketNotFound(_)));
}

#[tokio::test]
async fn bad_key_is_invalid_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            "<Error><Code>InvalidAccessKeyId</Code><Message>unknown key</Message></Error>",
        ))
        .mount(&server)
        .await;

    let client = S3ListClient::new(credentials(&server.uri()), Duration::from_secs(2)).unwrap();
    let err = client.list_objects("assets", 1).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::InvalidCredentials(_)));
}

#[tokio::test]
async fn plain_forbidden_is_access_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = S3ListClient::new(credentials(&server.uri()), Duration::from_secs(2)).unwrap();
    let err = client.list_objects("assets", 1).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::AccessDenied(_)));
}

#[test]
fn invalid_endpoint_is_rejected_up_front() {
    let result = S3ListClient::new(credentials("not a url"), Duration::from_secs(1));
    assert!(matches!(result, Err(ObjectStoreError::Other(_))));
}

#[tokio::test]
async fn dotted_bucket_is_addressed_path_style() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/team.assets-01"))
        .and(query_param("list-type", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = S3ListClient::new(credentials(&server.uri()), Duration::from_secs(2)).unwrap();
    let keys = client.list_objects("team.assets-01", 1).await.unwrap();
    assert!(keys.is_empty());
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client =
        S3ListClient::new(credentials(&server.uri()), Duration::from_millis(200)).unwrap();
    let err = client.list_objects("assets", 1).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::Other(m) if m.contains("timed out")));
}
