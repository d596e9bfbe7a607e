//! Safety Limits Integration Tests
//!
//! The builder must never write outside its output directory and must reject
//! oversized artifacts before touching the disk.

use forge::core::{BuildError, Builder, SafetyLimits, SafetyViolation};
use forge::domain::{ArtifactFile, BuildArtifact};
use tempfile::TempDir;

fn artifact(files: &[(&str, &str)]) -> BuildArtifact {
    BuildArtifact::new(
        "test",
        files
            .iter()
            .map(|(path, content)| ArtifactFile::new(*path, *content))
            .collect(),
    )
}

#[tokio::test]
async fn test_parent_escape_rejected_without_writing() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("sandbox/out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("previous.txt"), "from last run").unwrap();

    let builder = Builder::new(&out, SafetyLimits::default());
    let result = builder
        .materialize(&artifact(&[
            ("ok.txt", "fine"),
            ("../../etc/passwd", "root::0:0"),
        ]))
        .await;

    match result {
        Err(BuildError::Unsafe(SafetyViolation::PathEscapesRoot { path })) => {
            assert_eq!(path, "../../etc/passwd");
        }
        other => panic!("Expected PathEscapesRoot, got {:?}", other),
    }

    // Nothing written, previous output untouched
    assert!(!dir.path().join("etc/passwd").exists());
    assert!(!out.join("ok.txt").exists());
    assert!(out.join("previous.txt").exists());
}

#[tokio::test]
async fn test_absolute_path_rejected() {
    let dir = TempDir::new().unwrap();
    let builder = Builder::new(dir.path().join("out"), SafetyLimits::default());

    let result = builder.materialize(&artifact(&[("/etc/passwd", "x")])).await;
    assert!(matches!(
        result,
        Err(BuildError::Unsafe(SafetyViolation::AbsolutePath { .. }))
    ));
}

#[tokio::test]
async fn test_inner_parent_segments_allowed() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let builder = Builder::new(&out, SafetyLimits::default());

    let result = builder
        .materialize(&artifact(&[("src/../lib/./util.js", "export {}")]))
        .await
        .unwrap();
    assert_eq!(result.files_written, 1);
    assert!(out.join("lib/util.js").exists());
}

#[tokio::test]
async fn test_max_files() {
    let dir = TempDir::new().unwrap();
    let limits = SafetyLimits {
        max_files: 2,
        ..Default::default()
    };
    let builder = Builder::new(dir.path().join("out"), limits);

    let result = builder
        .materialize(&artifact(&[("a", "1"), ("b", "2"), ("c", "3")]))
        .await;
    match result {
        Err(BuildError::Unsafe(SafetyViolation::TooManyFiles { actual, limit })) => {
            assert_eq!(actual, 3);
            assert_eq!(limit, 2);
        }
        other => panic!("Expected TooManyFiles, got {:?}", other),
    }
}

#[tokio::test]
async fn test_max_file_bytes() {
    let dir = TempDir::new().unwrap();
    let limits = SafetyLimits {
        max_file_bytes: 10,
        ..Default::default()
    };
    let builder = Builder::new(dir.path().join("out"), limits);

    let big = "x".repeat(11);
    let result = builder.materialize(&artifact(&[("big.txt", big.as_str())])).await;
    assert!(matches!(
        result,
        Err(BuildError::Unsafe(SafetyViolation::FileTooLarge { actual: 11, limit: 10, .. }))
    ));
}

#[tokio::test]
async fn test_previous_output_replaced() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");
    let builder = Builder::new(&out, SafetyLimits::default());

    builder
        .materialize(&artifact(&[("old.txt", "old")]))
        .await
        .unwrap();
    builder
        .materialize(&artifact(&[("new.txt", "new")]))
        .await
        .unwrap();

    assert!(!out.join("old.txt").exists());
    assert_eq!(std::fs::read_to_string(out.join("new.txt")).unwrap(), "new");
}
