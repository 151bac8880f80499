//! Releases published through the HTTP index client to a mock index.

use std::sync::Arc;
use tagship_core::Arch;
use tagship_core::release::{FailureKind, TargetOutcome};
use tagship_publish::HttpPackageIndex;
use tagship_tests::*;
use wiremock::matchers::{basic_auth, header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harness_for(server: &MockServer) -> (ReleaseHarness, Arc<HttpPackageIndex>) {
    let mut harness = ReleaseHarness::new(BUILD_ALL);
    harness.config.index.url = format!("{}/legacy/", server.uri());
    let index = Arc::new(HttpPackageIndex::new(&harness.config.index).unwrap());
    (harness, index)
}

#[tokio::test]
async fn test_release_uploads_every_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/legacy/mypkg/2\.3\.0/[a-z0-9_]+$"))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/legacy/mypkg/2\.3\.0/[a-z0-9_]+/mypkg-2\.3\.0-[a-z0-9_]+\.whl$"))
        .and(basic_auth("__token__", TOKEN))
        .and(header_exists("x-checksum-sha256"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let (harness, index) = harness_for(&server);
    let result = harness
        .coordinator(index)
        .release(&harness.version("2.3.0"), &[])
        .await
        .unwrap();

    assert!(result.is_success(), "{:?}", result.outcomes);
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn test_existing_transient_and_auth_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/legacy/mypkg/2.3.0/x86_64"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/legacy/mypkg/2.3.0/aarch64/mypkg-2.3.0-aarch64.whl"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/legacy/mypkg/2.3.0/aarch64/mypkg-2.3.0-aarch64.whl"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/legacy/mypkg/2.3.0/armv7/mypkg-2.3.0-armv7.whl"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string(format!("token {} lacks upload scope", TOKEN)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (harness, index) = harness_for(&server);
    let result = harness
        .coordinator(index)
        .release(&harness.version("2.3.0"), &[])
        .await
        .unwrap();

    assert!(matches!(
        result.outcome(&Arch::new("x86_64")),
        Some(TargetOutcome::Skipped { .. })
    ));
    assert!(matches!(
        result.outcome(&Arch::new("aarch64")),
        Some(TargetOutcome::Published { .. })
    ));
    match result.outcome(&Arch::new("armv7")) {
        Some(TargetOutcome::Failed { kind, reason, .. }) => {
            assert_eq!(*kind, FailureKind::PublishAuth);
            assert!(reason.contains("403"), "{reason}");
            assert!(!reason.contains(TOKEN), "{reason}");
        }
        other => panic!("expected armv7 auth failure, got {other:?}"),
    }
    assert_eq!(result.failed_targets(), vec![Arch::new("armv7")]);
}
