//! Version-control checkpoints taken before destructive resets.

use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature};
use std::path::{Path, PathBuf};

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Commit the current contents of `dir`. Returns the commit id.
    async fn checkpoint(&self, dir: &Path, message: &str) -> Result<String>;
}

pub struct GitCheckpointer;

impl GitCheckpointer {
    fn snapshot(dir: &Path, message: &str) -> Result<String> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let repo = match Repository::open(dir) {
            Ok(repo) => repo,
            Err(_) => Repository::init(dir).context("Failed to initialize git repository")?,
        };

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = Signature::now("backforge", "backforge@localhost")?;

        // Unborn HEAD on the first checkpoint.
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("[backforge] {message}"),
            &tree,
            &parents,
        )?;
        Ok(commit_id.to_string())
    }
}

#[async_trait]
impl Checkpointer for GitCheckpointer {
    async fn checkpoint(&self, dir: &Path, message: &str) -> Result<String> {
        let dir: PathBuf = dir.to_path_buf();
        let message = message.to_string();
        let sha = tokio::task::spawn_blocking(move || Self::snapshot(&dir, &message))
            .await
            .context("Checkpoint task panicked")??;
        tracing::info!(commit = %sha, "checkpoint created");
        Ok(sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn first_checkpoint_initializes_repo() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();

        let sha = GitCheckpointer
            .checkpoint(dir.path(), "before reset")
            .await
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.id().to_string(), sha);
        assert_eq!(head.parent_count(), 0);
        assert!(head.message().unwrap().contains("before reset"));
        assert!(head.tree().unwrap().get_name("main.py").is_some());
    }

    #[tokio::test]
    async fn later_checkpoints_chain_onto_head() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "a = 1\n").unwrap();
        let first = GitCheckpointer.checkpoint(dir.path(), "one").await.unwrap();
        std::fs::write(dir.path().join("b.py"), "b = 2\n").unwrap();
        let second = GitCheckpointer.checkpoint(dir.path(), "two").await.unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.id().to_string(), second);
        assert_eq!(head.parent_id(0).unwrap().to_string(), first);
    }

    #[tokio::test]
    async fn missing_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("projects").join("p1");
        assert!(GitCheckpointer.checkpoint(&nested, "empty").await.is_ok());
        assert!(nested.join(".git").exists());
    }
}
