// End-to-end watcher tests: real filesystem, polling backend, short windows

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::config::PromptConfig;
    use crate::logging::Logger;
    use crate::prompts::{PromptId, PromptManager};
    use crate::watcher::{WatchSession, WatcherEvent, WatcherEventKind};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn polling_config(root: &Path) -> PromptConfig {
        let mut config = PromptConfig::with_root(root);
        config.watch.use_polling = true;
        config.watch.polling_interval_ms = 50;
        config.watch.debounce_ms = 100;
        config
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        condition()
    }

    fn library() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        (dir, root)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_reports_added_and_deleted_files() {
        let (_dir, root) = library();
        let session = WatchSession::start(&root, &polling_config(&root), Logger::default()).unwrap();
        assert!(session.watcher().is_polling());

        let seen: Arc<Mutex<Vec<WatcherEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = session.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let path = root.join("new.md");
        fs::write(&path, "---\ntitle: New\n---\n").unwrap();
        fs::write(root.join("ignored.txt"), "x").unwrap();

        let has = |kind: WatcherEventKind| {
            let seen = Arc::clone(&seen);
            let path = path.clone();
            move || {
                seen.lock()
                    .unwrap()
                    .iter()
                    .any(|e| e.kind == kind && e.file_path == path)
            }
        };
        assert!(wait_until(has(WatcherEventKind::FileAdded)).await);

        fs::remove_file(&path).unwrap();
        assert!(wait_until(has(WatcherEventKind::FileDeleted)).await);

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|e| !e.file_path.ends_with("ignored.txt")));
        session.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_paused_session_drops_events() {
        let (_dir, root) = library();
        let session = WatchSession::start(&root, &polling_config(&root), Logger::default()).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&count);
        let _subscription = session.subscribe(move |_| *counter.lock().unwrap() += 1);

        session.pause();
        fs::write(root.join("quiet.md"), "shh").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(*count.lock().unwrap(), 0);

        session.resume();
        fs::write(root.join("loud.md"), "hello").unwrap();
        let counter = Arc::clone(&count);
        assert!(wait_until(move || *counter.lock().unwrap() > 0).await);
    }

    /// Test: edits made behind the manager's back show up in the index
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_manager_follows_external_edits() {
        let (_dir, root) = library();
        let manager = PromptManager::new(polling_config(&root), Logger::default());
        manager.initialize().await.unwrap();
        assert!(manager.is_watching());

        let id = PromptId::from("team/outside.md");
        fs::create_dir_all(root.join("team")).unwrap();
        fs::write(root.join("team/outside.md"), "---\ntitle: First\n---\nbody").unwrap();

        let m = manager.clone();
        let lookup = id.clone();
        assert!(wait_until(move || m.get_prompt(&lookup).is_some()).await);

        fs::write(root.join("team/outside.md"), "---\ntitle: Second\n---\nbody").unwrap();
        let m = manager.clone();
        let lookup = id.clone();
        assert!(
            wait_until(move || {
                m.get_prompt(&lookup)
                    .map(|p| p.metadata.title == "Second")
                    .unwrap_or(false)
            })
            .await
        );

        fs::remove_file(root.join("team/outside.md")).unwrap();
        let m = manager.clone();
        let lookup = id.clone();
        assert!(wait_until(move || m.get_prompt(&lookup).is_none()).await);

        manager.dispose();
        assert!(!manager.is_watching());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_own_writes_do_not_duplicate_notifications() {
        let (_dir, root) = library();
        let manager = PromptManager::new(polling_config(&root), Logger::default());
        manager.initialize().await.unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&count);
        let _subscription = manager.subscribe(move |_| *counter.lock().unwrap() += 1);

        manager.create_prompt("Self Written", None).await.unwrap();
        // Give the watcher time to observe the write and the debounce to expire.
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The watcher re-parse yields an identical prompt, so no second event.
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(manager.get_all_prompts().len(), 1);
    }

    /// Test: a directory with a dot in its name moved out of the library
    /// takes its prompts with it
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_moving_dotted_directory_out_drops_its_prompts() {
        let (_dir, root) = library();
        let (_elsewhere, outside) = library();
        fs::create_dir_all(root.join("v2.0")).unwrap();
        fs::write(root.join("v2.0/notes.md"), "---\ntitle: Notes\n---\n").unwrap();
        fs::write(root.join("kept.md"), "---\ntitle: Kept\n---\n").unwrap();

        let mut config = PromptConfig::with_root(&root);
        config.watch.debounce_ms = 100;
        let manager = PromptManager::new(config, Logger::default());
        manager.initialize().await.unwrap();
        let id = PromptId::from("v2.0/notes.md");
        assert!(manager.get_prompt(&id).is_some());

        fs::rename(root.join("v2.0"), outside.join("v2.0")).unwrap();

        let m = manager.clone();
        assert!(wait_until(move || m.get_prompt(&id).is_none()).await);
        assert!(manager.get_prompt(&PromptId::from("kept.md")).is_some());
    }

    /// Test: a directory appearing below the depth limit only indexes what
    /// the limit allows
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_directory_respects_depth_from_root() {
        let (_dir, root) = library();
        let mut config = polling_config(&root);
        config.watch.max_depth = 1;
        let manager = PromptManager::new(config, Logger::default());
        manager.initialize().await.unwrap();

        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/deep.md"), "deep").unwrap();
        fs::write(root.join("a/top.md"), "top").unwrap();

        let m = manager.clone();
        assert!(wait_until(move || m.get_prompt(&PromptId::from("a/top.md")).is_some()).await);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(manager.get_prompt(&PromptId::from("a/b/deep.md")).is_none());
        assert_eq!(manager.get_all_prompts().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_paused_manager_ignores_external_edits() {
        let (_dir, root) = library();
        let manager = PromptManager::new(polling_config(&root), Logger::default());
        manager.initialize().await.unwrap();

        manager.pause_watching();
        fs::write(root.join("bulk.md"), "bulk").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(manager.get_all_prompts().is_empty());

        manager.resume_watching();
        fs::write(root.join("after.md"), "after").unwrap();
        let m = manager.clone();
        assert!(wait_until(move || m.get_prompt(&PromptId::from("after.md")).is_some()).await);
    }
}
