//! Tests for the public prompt library API
//!
//! Exercises the crate the way a host application would: load config, open a
//! library, write through the manager, and recover from interrupted writes.

use std::fs;
use std::io;
use std::path::PathBuf;

use promptshelf_lib::prompts::store::{atomic_write_with, temp_path_for};
use promptshelf_lib::{
    ConfigPatch, Logger, MetadataParser, PromptConfig, PromptError, PromptId, PromptManager,
    PromptMetadata, SearchFilter,
};
use tempfile::TempDir;

fn open_library() -> (TempDir, PathBuf, PromptManager) {
    let temp_dir = TempDir::new().unwrap();
    let root = fs::canonicalize(temp_dir.path()).unwrap();
    let mut config = PromptConfig::with_root(&root);
    config.watch.enabled = false;
    let manager = PromptManager::new(config, Logger::default());
    (temp_dir, root, manager)
}

#[tokio::test]
async fn test_config_file_drives_manager() {
    let temp_dir = TempDir::new().unwrap();
    let root = fs::canonicalize(temp_dir.path()).unwrap();
    fs::write(root.join("a.md"), "---\ntitle: A\n---\n").unwrap();
    fs::write(root.join("b.txt"), "plain").unwrap();

    let config_path = root.join("settings.json");
    fs::write(
        &config_path,
        format!(
            r#"{{
                "rootDirectory": {:?},
                "includePatterns": ["**/*.md", "**/*.txt"],
                "watch": {{ "enabled": false }}
            }}"#,
            root.display().to_string()
        ),
    )
    .unwrap();

    let config = PromptConfig::load(&config_path).unwrap();
    let manager = PromptManager::new(config, Logger::default());
    manager.initialize().await.unwrap();

    let ids: Vec<String> = manager
        .get_all_prompts()
        .iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"b.txt".to_string()));
}

#[tokio::test]
async fn test_interrupted_save_leaves_original_intact() {
    let (_temp_dir, root, manager) = open_library();
    let original = "---\ntitle: Stable\n---\noriginal body\n";
    fs::write(root.join("stable.md"), original).unwrap();
    manager.initialize().await.unwrap();

    let prompt = manager.get_prompt(&PromptId::from("stable.md")).unwrap();
    let document = MetadataParser::serialize(&prompt.metadata, "half-written").unwrap();

    // Crash between the temp write and the rename.
    let result = atomic_write_with(&prompt.file_path, document.as_bytes(), |_| {
        Err(io::Error::new(io::ErrorKind::Other, "power loss"))
    })
    .await;

    assert!(matches!(result, Err(PromptError::AtomicWrite { .. })));
    assert_eq!(fs::read_to_string(root.join("stable.md")).unwrap(), original);
    let stray: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(stray.is_empty(), "temp files left behind: {:?}", stray);
}

#[tokio::test]
async fn test_save_into_missing_directory_fails_cleanly() {
    let (_temp_dir, root, manager) = open_library();
    manager.initialize().await.unwrap();

    // A file where a directory is expected makes the write fail.
    fs::write(root.join("blocker"), "not a directory").unwrap();
    let mut prompt = manager.create_prompt("Victim", None).await.unwrap();
    prompt.file_path = root.join("blocker/victim.md");

    let err = manager.save_prompt(&prompt).await.unwrap_err();
    assert!(matches!(err, PromptError::Io { .. } | PromptError::AtomicWrite { .. }));
    assert_eq!(fs::read_to_string(root.join("blocker")).unwrap(), "not a directory");
}

/// A rename that fails after the temp file is written leaves the file on
/// disk and the index as they were.
#[tokio::test]
async fn test_failed_save_leaves_disk_and_index_unchanged() {
    let (_temp_dir, root, manager) = open_library();
    let original = "---\ntitle: Stable\n---\noriginal body\n";
    fs::write(root.join("stable.md"), original).unwrap();
    // Renaming a file over a directory fails.
    fs::create_dir_all(root.join("folder.md/inner")).unwrap();
    manager.initialize().await.unwrap();
    let before = manager.get_all_prompts();

    let mut prompt = manager.get_prompt(&PromptId::from("stable.md")).unwrap();
    prompt.file_path = root.join("folder.md");
    prompt.content = "half-written".to_string();

    let err = manager.save_prompt(&prompt).await.unwrap_err();
    assert!(matches!(err, PromptError::AtomicWrite { .. }));

    assert_eq!(fs::read_to_string(root.join("stable.md")).unwrap(), original);
    assert!(root.join("folder.md/inner").is_dir());
    let stray: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(stray.is_empty(), "temp files left behind: {:?}", stray);
    assert_eq!(manager.get_all_prompts(), before);
}

#[tokio::test]
async fn test_temp_paths_are_hidden_siblings() {
    let path = PathBuf::from("/library/team/review.md");
    let temp = temp_path_for(&path);
    assert_eq!(temp.parent(), path.parent());
    let name = temp.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(".review.md."));
    assert!(name.ends_with(".tmp"));
    assert_ne!(temp, temp_path_for(&path));
}

#[tokio::test]
async fn test_paths_outside_root_are_rejected() {
    let (_temp_dir, _root, manager) = open_library();
    manager.initialize().await.unwrap();

    let elsewhere = TempDir::new().unwrap();
    let outside = elsewhere.path().join("x.md");
    fs::write(&outside, "x").unwrap();

    let err = manager.delete_prompt(&outside).await.unwrap_err();
    assert!(matches!(err, PromptError::OutsideRoot { .. }));
    assert!(outside.exists());
}

#[tokio::test]
async fn test_moving_the_root_reloads() {
    let (_temp_dir, root, manager) = open_library();
    fs::write(root.join("first.md"), "first").unwrap();
    manager.initialize().await.unwrap();
    assert_eq!(manager.get_all_prompts().len(), 1);

    let other = TempDir::new().unwrap();
    let other_root = fs::canonicalize(other.path()).unwrap();
    fs::write(other_root.join("one.md"), "1").unwrap();
    fs::write(other_root.join("two.md"), "2").unwrap();

    manager
        .update_config(ConfigPatch {
            root_directory: Some(other_root.clone()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(manager.root(), other_root);
    let found = manager.search_prompts(&SearchFilter::default());
    assert_eq!(found.len(), 2);
}

#[test]
fn test_round_trip_through_public_api() {
    let mut metadata = PromptMetadata::titled("Explain Code");
    metadata.tags = vec!["teaching".to_string()];
    let body = "Explain this snippet:\n\n```rust\nfn main() {}\n```\n";

    let document = MetadataParser::serialize(&metadata, body).unwrap();
    let parsed = MetadataParser::parse_document(&document, Some("explain-code.md"));

    assert!(parsed.success);
    assert_eq!(parsed.metadata, metadata);
    assert_eq!(parsed.content, body);
}
