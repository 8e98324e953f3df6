//! WorktreeProvisioner against a real local git repository.

use forgehand::workspace::{RepoRef, WorkspaceProvisioner};
use forgehand::WorktreeProvisioner;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@test.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A one-commit origin repository and a repo ref pointing at it.
fn setup_origin(temp: &TempDir) -> RepoRef {
    let origin = temp.path().join("origin");
    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init"]);
    std::fs::write(origin.join("README.md"), "widgets").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-m", "init"]);

    let mut repo = RepoRef::new("octo", "widgets");
    repo.clone_url = origin.to_string_lossy().to_string();
    repo
}

#[tokio::test]
async fn test_issue_worktree_lifecycle() {
    let temp = TempDir::new().unwrap();
    let repo = setup_origin(&temp);
    let base = temp.path().join("base");
    let provisioner = WorktreeProvisioner::new(base.clone(), "forgehand");

    let ws = provisioner.create_for_issue(&repo, 7, "claude").await.unwrap();
    assert!(ws.path.join("README.md").exists());
    assert!(ws.branch.starts_with("forgehand/claude/issue-7-"));
    assert_eq!(git(&ws.path, &["rev-parse", "--abbrev-ref", "HEAD"]), ws.branch);
    assert!(provisioner.clone_dir(&repo).join(".git").exists());

    let moved = provisioner.move_to_pr(&ws, 100).await.unwrap();
    assert_eq!(moved.pr_number, Some(100));
    assert!(!ws.path.exists());
    assert!(moved.path.join("README.md").exists());
    assert!(moved
        .path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("claude-widgets-pr-100-"));

    let with_session = provisioner.create_session_dir(&moved).await.unwrap();
    let session_path = with_session.session_path.clone().unwrap();
    assert!(session_path.is_dir());

    provisioner.cleanup(&with_session).await.unwrap();
    assert!(!with_session.path.exists());
    assert!(!session_path.exists());

    // Cleanup is idempotent.
    provisioner.cleanup(&with_session).await.unwrap();
}

#[tokio::test]
async fn test_pr_worktree_checks_out_head_branch() {
    let temp = TempDir::new().unwrap();
    let repo = setup_origin(&temp);
    let origin = temp.path().join("origin");
    git(&origin, &["checkout", "-b", "feature/login"]);
    std::fs::write(origin.join("login.rs"), "fn login() {}").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "-m", "login"]);

    let provisioner = WorktreeProvisioner::new(temp.path().join("base"), "forgehand");
    let ws = provisioner
        .create_for_pr(&repo, 42, "feature/login", "gemini")
        .await
        .unwrap();

    assert_eq!(ws.pr_number, Some(42));
    assert_eq!(ws.branch, "feature/login");
    assert!(ws.path.join("login.rs").exists());

    provisioner.cleanup(&ws).await.unwrap();
    assert!(!ws.path.exists());
}

#[tokio::test]
async fn test_copy_patterns_reach_new_worktrees() {
    let temp = TempDir::new().unwrap();
    let repo = setup_origin(&temp);
    let provisioner = WorktreeProvisioner::new(temp.path().join("base"), "forgehand");

    // First worktree creates the shared clone.
    provisioner.create_for_issue(&repo, 1, "claude").await.unwrap();
    let clone_dir = provisioner.clone_dir(&repo);
    std::fs::write(clone_dir.join(".forgehand_copy"), "# local files\n.env*\n").unwrap();
    std::fs::write(clone_dir.join(".env.local"), "TOKEN=abc").unwrap();

    let ws = provisioner.create_for_issue(&repo, 2, "claude").await.unwrap();
    assert_eq!(
        std::fs::read_to_string(ws.path.join(".env.local")).unwrap(),
        "TOKEN=abc"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issues_share_one_clone() {
    let temp = TempDir::new().unwrap();
    let repo = setup_origin(&temp);
    let provisioner = Arc::new(WorktreeProvisioner::new(temp.path().join("base"), "forgehand"));

    let mut tasks = Vec::new();
    for issue in 1..=4 {
        let provisioner = Arc::clone(&provisioner);
        let repo = repo.clone();
        tasks.push(tokio::spawn(async move {
            provisioner.create_for_issue(&repo, issue, "claude").await
        }));
    }

    let mut workspaces = Vec::new();
    for task in tasks {
        workspaces.push(task.await.unwrap().unwrap());
    }
    for ws in &workspaces {
        assert!(ws.path.join("README.md").exists());
    }

    let listed = git(&provisioner.clone_dir(&repo), &["worktree", "list"]);
    assert_eq!(listed.lines().count(), 5);

    // Moves and removals on the same clone also run side by side.
    let mut tasks = Vec::new();
    for (i, ws) in workspaces.into_iter().enumerate() {
        let provisioner = Arc::clone(&provisioner);
        tasks.push(tokio::spawn(async move {
            let moved = provisioner.move_to_pr(&ws, 100 + i as u64).await?;
            provisioner.cleanup(&moved).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let listed = git(&provisioner.clone_dir(&repo), &["worktree", "list"]);
    assert_eq!(listed.lines().count(), 1);
}
