//! Local Git repository operations via `git2`.

use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    BranchType, Cred, CredentialType, ErrorCode, FetchOptions, RemoteCallbacks, Repository,
    ResetType, StatusOptions,
};
use tracing::{debug, info, instrument};

use super::remote_url::{embedded_credentials, redact_credentials};
use super::{CloneOptions, ResetMode, VersionControl};
use crate::errors::GitError;
use crate::models::{CommitInfo, RemoteInfo, WorkingTreeStatus};

/// Credential callbacks give up after this many attempts per operation.
const MAX_AUTH_ATTEMPTS: u32 = 3;

/// `git2`-backed [`VersionControl`] implementation. Stateless: every call
/// opens the repository at the given path.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitClient;

impl GitClient {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Repository, GitError> {
        Repository::open(path).map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))
    }
}

/// Credentials: ssh keys from the agent, user/password from the URL.
fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_AUTH_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some((user, pass)) = embedded_credentials(url) {
                return Cred::userpass_plaintext(&user, &pass);
            }
        }
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(username_from_url.unwrap_or("git"));
        }
        Cred::default()
    });
    callbacks
}

fn commit_info(commit: &git2::Commit<'_>) -> CommitInfo {
    CommitInfo {
        sha: commit.id().to_string(),
        message: commit.message().unwrap_or("").trim_end().to_string(),
        author_name: commit.author().name().unwrap_or("").to_string(),
        author_email: commit.author().email().unwrap_or("").to_string(),
        author_time: commit.author().when().seconds(),
    }
}

fn head_branch(repo: &Repository) -> Result<Option<String>, GitError> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(String::from)),
        Ok(_) => Ok(None),
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            let head = repo.find_reference("HEAD")?;
            Ok(head
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .map(String::from))
        }
        Err(e) => Err(e.into()),
    }
}

impl VersionControl for GitClient {
    #[instrument(skip(self, url, options), fields(url = %redact_credentials(url), path = %path.display()))]
    fn clone_repo(&self, url: &str, path: &Path, options: &CloneOptions) -> Result<(), GitError> {
        info!(branch = ?options.branch, depth = ?options.depth, "cloning git repository");

        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks());
        if let Some(depth) = options.depth {
            fetch_opts.depth(depth as i32);
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        if let Some(branch) = &options.branch {
            builder.branch(branch);
            if options.single_branch {
                let branch = branch.clone();
                builder.remote_create(move |repo, name, url| {
                    let refspec = format!("+refs/heads/{b}:refs/remotes/{n}/{b}", b = branch, n = name);
                    repo.remote_with_fetch(name, url, &refspec)
                });
            }
        }

        let repo = builder.clone(url, path)?;
        if let Some(origin) = &options.origin_url {
            repo.remote_set_url("origin", origin)?;
        }
        info!("clone completed");
        Ok(())
    }

    #[instrument(skip(self, remote), fields(path = %path.display()))]
    fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        let repo = Self::open(path)?;

        // A configured remote name fetches into its own namespace; a bare URL
        // updates the origin tracking ref.
        let (mut fetch_remote, tracking_ns) = match repo.find_remote(remote) {
            Ok(named) => (named, remote.to_string()),
            Err(_) => (repo.remote_anonymous(remote)?, "origin".to_string()),
        };
        let refspec = format!("+refs/heads/{b}:refs/remotes/{n}/{b}", b = branch, n = tracking_ns);
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(remote_callbacks());
        debug!(remote = %redact_credentials(remote), branch, "fetching");
        fetch_remote.fetch(&[&refspec], Some(&mut fetch_opts), None)?;
        drop(fetch_remote);

        let tracking = format!("refs/remotes/{}/{}", tracking_ns, branch);
        let fetched = repo
            .find_reference(&tracking)
            .map_err(|_| GitError::RefNotFound(tracking.clone()))?
            .peel_to_commit()?;
        let annotated = repo.find_annotated_commit(fetched.id())?;
        let (analysis, _) = repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            debug!("already up to date");
            return Ok(());
        }
        if !analysis.is_fast_forward() && !analysis.is_unborn() {
            return Err(GitError::NonFastForward {
                branch: branch.to_string(),
            });
        }

        let local = format!("refs/heads/{}", branch);
        let msg = format!("kfed: fast-forward {} to {}", branch, fetched.id());
        match repo.find_reference(&local) {
            Ok(mut reference) => {
                reference.set_target(fetched.id(), &msg)?;
            }
            Err(_) => {
                repo.reference(&local, fetched.id(), true, &msg)?;
            }
        }
        repo.set_head(&local)?;
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        info!(sha = %fetched.id(), "pull completed");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn checkout(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let repo = Self::open(path)?;
        if head_branch(&repo)?.as_deref() == Some(branch) {
            return Ok(());
        }

        if repo.find_branch(branch, BranchType::Local).is_err() {
            let upstream = format!("origin/{}", branch);
            let commit = repo
                .find_branch(&upstream, BranchType::Remote)
                .map_err(|_| GitError::RefNotFound(upstream.clone()))?
                .get()
                .peel_to_commit()?;
            repo.branch(branch, &commit, false)?;
        }

        let local = format!("refs/heads/{}", branch);
        let target = repo.revparse_single(&local)?;
        repo.checkout_tree(&target, Some(CheckoutBuilder::new().safe()))?;
        repo.set_head(&local)?;
        info!(branch, "checked out branch");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    fn reset(&self, path: &Path, mode: ResetMode, reference: &str) -> Result<(), GitError> {
        let repo = Self::open(path)?;
        let target = repo
            .revparse_single(reference)
            .map_err(|_| GitError::RefNotFound(reference.to_string()))?;
        let kind = match mode {
            ResetMode::Soft => ResetType::Soft,
            ResetMode::Mixed => ResetType::Mixed,
            ResetMode::Hard => ResetType::Hard,
        };
        repo.reset(&target, kind, None)?;
        info!(?mode, reference, "reset working tree");
        Ok(())
    }

    fn log(&self, path: &Path, limit: usize) -> Result<Vec<CommitInfo>, GitError> {
        let repo = Self::open(path)?;
        let mut revwalk = repo.revwalk()?;
        if let Err(e) = revwalk.push_head() {
            if e.code() == ErrorCode::UnbornBranch {
                return Ok(Vec::new());
            }
            return Err(e.into());
        }
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME)?;

        let mut commits = Vec::new();
        for oid in revwalk.take(limit) {
            let commit = repo.find_commit(oid?)?;
            commits.push(commit_info(&commit));
        }
        Ok(commits)
    }

    fn status(&self, path: &Path) -> Result<WorkingTreeStatus, GitError> {
        let repo = Self::open(path)?;
        let branch = head_branch(&repo)?;

        let (ahead, behind) = match &branch {
            Some(name) => {
                let local = repo.refname_to_id(&format!("refs/heads/{}", name));
                let upstream = repo.refname_to_id(&format!("refs/remotes/origin/{}", name));
                match (local, upstream) {
                    // Shallow histories may lack a merge base.
                    (Ok(l), Ok(u)) => repo.graph_ahead_behind(l, u).unwrap_or((0, 0)),
                    _ => (0, 0),
                }
            }
            None => (0, 0),
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = repo.statuses(Some(&mut opts))?;

        let mut modified = Vec::new();
        let mut staged = Vec::new();
        for entry in statuses.iter() {
            let Some(file) = entry.path() else { continue };
            let s = entry.status();
            if s.is_index_new()
                || s.is_index_modified()
                || s.is_index_deleted()
                || s.is_index_renamed()
                || s.is_index_typechange()
            {
                staged.push(file.to_string());
            }
            if s.is_wt_new()
                || s.is_wt_modified()
                || s.is_wt_deleted()
                || s.is_wt_renamed()
                || s.is_wt_typechange()
            {
                modified.push(file.to_string());
            }
        }

        Ok(WorkingTreeStatus {
            branch,
            ahead,
            behind,
            modified,
            staged,
        })
    }

    fn remotes(&self, path: &Path) -> Result<Vec<RemoteInfo>, GitError> {
        let repo = Self::open(path)?;
        let names = repo.remotes()?;
        let mut remotes = Vec::new();
        for name in names.iter().flatten() {
            let remote = repo.find_remote(name)?;
            remotes.push(RemoteInfo {
                name: name.to_string(),
                url: remote.url().unwrap_or("").to_string(),
            });
        }
        Ok(remotes)
    }

    fn rev_parse(&self, path: &Path, spec: &str) -> Result<String, GitError> {
        let repo = Self::open(path)?;
        let object = repo
            .revparse_single(spec)
            .map_err(|_| GitError::RefNotFound(spec.to_string()))?;
        Ok(object.id().to_string())
    }

    fn current_branch(&self, path: &Path) -> Result<Option<String>, GitError> {
        let repo = Self::open(path)?;
        head_branch(&repo)
    }

    fn is_repository(&self, path: &Path) -> bool {
        Repository::open(path).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{RepositoryInitOptions, Signature};
    use std::path::PathBuf;

    fn init_upstream(dir: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        Repository::init_opts(dir, &opts).unwrap()
    }

    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) -> git2::Oid {
        let workdir = repo.workdir().unwrap();
        std::fs::write(workdir.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    fn clone_into(upstream: &Path, target: &Path) {
        let url = upstream.to_str().unwrap();
        let options = CloneOptions {
            branch: Some("main".into()),
            depth: None,
            single_branch: true,
            origin_url: Some(url.to_string()),
        };
        GitClient::new().clone_repo(url, target, &options).unwrap();
    }

    fn dirs() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let upstream = root.path().join("upstream");
        let cache = root.path().join("cache");
        std::fs::create_dir_all(&upstream).unwrap();
        (root, upstream, cache)
    }

    #[test]
    fn test_clone_and_inspect() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "README.md", "hello", "initial commit");

        clone_into(&upstream_path, &cache);
        let git = GitClient::new();

        assert!(git.is_repository(&cache));
        assert_eq!(git.current_branch(&cache).unwrap().as_deref(), Some("main"));
        let log = git.log(&cache, 10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "initial commit");
        assert_eq!(git.rev_parse(&cache, "HEAD").unwrap(), log[0].sha);

        let remotes = git.remotes(&cache).unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "origin");
        assert_eq!(remotes[0].url, upstream_path.to_str().unwrap());
    }

    #[test]
    fn test_pull_fast_forward() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "a.md", "one", "first");
        clone_into(&upstream_path, &cache);

        commit_file(&upstream, "b.md", "two", "second");
        let git = GitClient::new();
        git.pull(&cache, "origin", "main").unwrap();

        assert_eq!(git.log(&cache, 1).unwrap()[0].message, "second");
        assert_eq!(std::fs::read_to_string(cache.join("b.md")).unwrap(), "two");

        // Nothing new: up to date.
        git.pull(&cache, "origin", "main").unwrap();
    }

    #[test]
    fn test_pull_from_url_updates_origin_tracking_ref() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "a.md", "one", "first");
        clone_into(&upstream_path, &cache);
        let tip = commit_file(&upstream, "b.md", "two", "second");

        let git = GitClient::new();
        git.pull(&cache, upstream_path.to_str().unwrap(), "main").unwrap();
        assert_eq!(git.rev_parse(&cache, "origin/main").unwrap(), tip.to_string());
        assert_eq!(git.rev_parse(&cache, "HEAD").unwrap(), tip.to_string());
    }

    #[test]
    fn test_diverged_pull_then_hard_reset() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "a.md", "one", "first");
        clone_into(&upstream_path, &cache);

        commit_file(&upstream, "b.md", "upstream", "upstream change");
        let local = Repository::open(&cache).unwrap();
        commit_file(&local, "c.md", "local", "local change");

        let git = GitClient::new();
        let err = git.pull(&cache, "origin", "main").unwrap_err();
        assert!(matches!(err, GitError::NonFastForward { .. }));

        let status = git.status(&cache).unwrap();
        assert_eq!((status.ahead, status.behind), (1, 1));

        git.reset(&cache, ResetMode::Hard, "origin/main").unwrap();
        git.pull(&cache, "origin", "main").unwrap();
        assert_eq!(git.log(&cache, 1).unwrap()[0].message, "upstream change");
        assert!(!cache.join("c.md").exists());
    }

    #[test]
    fn test_status_reports_modified_and_staged() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "a.md", "one", "first");
        clone_into(&upstream_path, &cache);

        std::fs::write(cache.join("a.md"), "changed").unwrap();
        std::fs::write(cache.join("new.md"), "new").unwrap();
        let repo = Repository::open(&cache).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("new.md")).unwrap();
        index.write().unwrap();

        let status = GitClient::new().status(&cache).unwrap();
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.modified, vec!["a.md".to_string()]);
        assert_eq!(status.staged, vec!["new.md".to_string()]);
    }

    #[test]
    fn test_checkout_unknown_branch() {
        let (_root, upstream_path, cache) = dirs();
        let upstream = init_upstream(&upstream_path);
        commit_file(&upstream, "a.md", "one", "first");
        clone_into(&upstream_path, &cache);

        let git = GitClient::new();
        git.checkout(&cache, "main").unwrap();
        assert!(matches!(
            git.checkout(&cache, "release"),
            Err(GitError::RefNotFound(_))
        ));
    }

    #[test]
    fn test_repo_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitClient::new();
        assert!(!git.is_repository(dir.path()));
        assert!(matches!(
            git.status(dir.path()),
            Err(GitError::RepositoryNotFound(_))
        ));
    }
}
