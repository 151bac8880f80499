//! Serialization tests for tagship-core types.

use pretty_assertions::assert_eq;
use std::path::PathBuf;
use tagship_core::config::ReleaseConfig;
use tagship_core::ids::ReleaseId;
use tagship_core::release::{FailureKind, ReleaseResult, SkipReason, TargetOutcome};
use tagship_core::{Arch, ReleaseVersion};

#[test]
fn test_outcome_wire_format() {
    let failed = TargetOutcome::Failed {
        kind: FailureKind::PublishTransient,
        reason: "503 Service Unavailable".to_string(),
        artifact: Some(PathBuf::from("/staging/2.3.0/x86_64/pkg.whl")),
    };
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        serde_json::json!({
            "outcome": "failed",
            "kind": "publish_transient",
            "reason": "503 Service Unavailable",
            "artifact": "/staging/2.3.0/x86_64/pkg.whl",
        })
    );

    let skipped = TargetOutcome::Skipped {
        reason: SkipReason::AlreadyExists,
    };
    assert_eq!(
        serde_json::to_value(&skipped).unwrap(),
        serde_json::json!({ "outcome": "skipped", "reason": "already_exists" })
    );

    let bare = TargetOutcome::failed(FailureKind::Timeout, "build exceeded 60s");
    let json = serde_json::to_value(&bare).unwrap();
    assert!(json.get("artifact").is_none());
}

#[test]
fn test_release_result_roundtrip() {
    let mut result = ReleaseResult::new(
        ReleaseId::new(),
        ReleaseVersion::parse("2.3.0-rc.1").unwrap(),
        [Arch::new("x86_64"), Arch::new("aarch64")],
    );
    result
        .record(
            Arch::new("x86_64"),
            TargetOutcome::Published {
                checksum: "ab".repeat(32),
            },
        )
        .unwrap();
    result
        .record(
            Arch::new("aarch64"),
            TargetOutcome::failed(FailureKind::Toolchain, "toolchain exited with code 1"),
        )
        .unwrap();
    result.finalize().unwrap();

    let json = serde_json::to_string(&result).expect("serialize");
    let parsed: ReleaseResult = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(parsed.release_id, result.release_id);
    assert_eq!(parsed.version, result.version);
    assert_eq!(parsed.outcomes, result.outcomes);
    assert_eq!(parsed.status(), result.status());
    assert_eq!(parsed.failed_targets(), vec![Arch::new("aarch64")]);
}

#[test]
fn test_version_serializes_as_canonical_string() {
    let version = ReleaseVersion::parse("2.3.0+build.7").unwrap();
    assert_eq!(serde_json::to_value(&version).unwrap(), serde_json::json!("2.3.0+build.7"));

    let err = serde_json::from_str::<ReleaseVersion>("\"2.3\"").unwrap_err();
    assert!(err.to_string().contains("2.3"));
}

#[test]
fn test_config_yaml_survives_reserialization() {
    let yaml = r#"
package: mypkg
tag:
  prefix: release-v
toolchain:
  program: maturin
  args: ["build", "--release", "--out", "dist"]
targets:
  - arch: x86_64
    environment:
      image: ghcr.io/pyo3/maturin:v1.4.0
      toolchain_version: "1.4.0"
    artifact: "mypkg-${{ version }}-cp312-manylinux_${{ arch }}.whl"
  - arch: aarch64
    environment:
      image: ghcr.io/pyo3/maturin:v1.4.0
      toolchain_version: "1.4.0"
      platform: linux/arm64
    build_args: ["--target", "aarch64-unknown-linux-gnu"]
    artifact: "mypkg-${{ version }}-cp312-manylinux_${{ arch }}.whl"
index:
  name: pypi
  url: https://upload.pypi.org/legacy/
  identity: PYPI_TOKEN
secrets:
  provider: file
  path: /run/secrets/tagship.json
"#;
    let config = ReleaseConfig::from_yaml_str(yaml).unwrap();
    let again = ReleaseConfig::from_yaml_str(&serde_yaml::to_string(&config).unwrap()).unwrap();

    assert_eq!(again.targets, config.targets);
    assert_eq!(again.index, config.index);
    assert_eq!(again.secrets, config.secrets);
    assert_eq!(again.policy, config.policy);
    assert_eq!(again.staging_dir, config.staging_dir);
}
