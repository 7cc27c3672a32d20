use git2::{
    CertificateCheckStatus, Commit, Cred, CredentialType, ErrorCode, FetchOptions, Oid,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature, Tree,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::config::GitConfig;
use crate::error::{Error, Result};
use crate::export::{LineFilter, copy_filtered};
use crate::progress::Transfer;

/// Behaviour switches for [`commit_export`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Show clone/push transfer progress on stderr.
    pub progress: bool,
}

/// What [`commit_export`] did with the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was created and pushed to `branch`.
    Committed { oid: Oid, branch: String },
    /// The filtered export equals the last committed content.
    Unchanged,
}

/// Build remote callbacks for clone and push.
///
/// - With a key file, authenticates over SSH using it (username from the URL,
///   `git` otherwise).
/// - Without one, tries the SSH agent and then default credentials.
/// - SSH host keys are accepted without verification; TLS certificates are
///   left to libgit2.
/// - A ref rejected by the remote during push turns into an error.
fn remote_callbacks(cfg: &GitConfig) -> RemoteCallbacks<'static> {
    let key_file = cfg.key_file.clone();
    let mut attempts = 0u8;

    let mut cb = RemoteCallbacks::new();
    cb.credentials(move |_url, username_from_url, allowed| {
        attempts += 1;
        if attempts > 3 {
            return Err(git2::Error::from_str("authentication rejected"));
        }
        let user = username_from_url.unwrap_or("git");
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        match &key_file {
            Some(key) => Cred::ssh_key(user, None, key, None),
            None => Cred::ssh_key_from_agent(user).or_else(|_| Cred::default()),
        }
    });
    cb.certificate_check(|cert, host| {
        if cert.as_hostkey().is_some() {
            debug!(%host, "accepting git ssh host key");
            Ok(CertificateCheckStatus::CertificateOk)
        } else {
            Ok(CertificateCheckStatus::CertificatePassthrough)
        }
    });
    cb.push_update_reference(|refname, status| match status {
        Some(msg) => Err(git2::Error::from_str(&format!(
            "remote rejected {}: {}",
            refname, msg
        ))),
        None => Ok(()),
    });
    cb
}

/// Clone `cfg.repo_url` into a fresh temporary directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped.
fn clone_ephemeral(cfg: &GitConfig, opts: &CommitOptions) -> Result<(TempDir, Repository)> {
    let dir = tempfile::Builder::new()
        .prefix("mtbackup-")
        .tempdir()
        .map_err(|source| Error::Write {
            path: std::env::temp_dir(),
            source,
        })?;

    let progress = Transfer::new(opts.progress, format!("cloning {}", cfg.repo_url));
    let mut cb = remote_callbacks(cfg);
    progress.attach_fetch(&mut cb);
    let mut fo = FetchOptions::new();
    fo.remote_callbacks(cb);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    if let Some(branch) = cfg.branch.as_deref() {
        builder.branch(branch);
    }
    match builder.clone(&cfg.repo_url, dir.path()) {
        Ok(repo) => {
            progress.finish_ok();
            Ok((dir, repo))
        }
        Err(e) => {
            progress.finish_err(&e);
            Err(Error::git("clone")(e))
        }
    }
}

/// The commit HEAD points to, or `None` on an unborn branch (empty remote).
fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>> {
    match repo.head() {
        Ok(head) => head
            .peel_to_commit()
            .map(Some)
            .map_err(Error::git("resolve HEAD")),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(Error::git("resolve HEAD")(e)),
    }
}

/// Hard-reset the index and working tree to HEAD and force a checkout.
fn reset_worktree(repo: &Repository) -> Result<()> {
    let Some(commit) = head_commit(repo)? else {
        debug!("HEAD is unborn, nothing to reset");
        return Ok(());
    };
    repo.reset(commit.as_object(), ResetType::Hard, None)
        .map_err(Error::git("hard reset"))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))
        .map_err(Error::git("checkout"))?;
    Ok(())
}

fn push_head(repo: &Repository, cfg: &GitConfig, opts: &CommitOptions) -> Result<String> {
    let head = repo.head().map_err(Error::git("resolve HEAD"))?;
    let refname = head
        .name()
        .ok_or_else(|| {
            Error::git("resolve HEAD")(git2::Error::from_str("invalid reference name"))
        })?
        .to_string();
    let branch = head.shorthand().unwrap_or(&refname).to_string();

    let progress = Transfer::new(opts.progress, format!("pushing {}", branch));
    let mut cb = remote_callbacks(cfg);
    progress.attach_push(&mut cb);
    let mut po = PushOptions::new();
    po.remote_callbacks(cb);

    let mut remote = repo.find_remote("origin").map_err(Error::git("find origin"))?;
    match remote.push(&[format!("{}:{}", refname, refname)], Some(&mut po)) {
        Ok(()) => {
            progress.finish_ok();
            Ok(branch)
        }
        Err(e) => {
            progress.finish_err(&e);
            Err(Error::git("push")(e))
        }
    }
}

fn commit_message(template: &str, filename: &str) -> String {
    template.replace("{file}", filename)
}

/// Commit the filtered export as `filename` and push it, if it changed.
///
/// Steps (each depends on the previous one succeeding):
/// 1. Clone the repository into a temporary directory.
/// 2. Hard-reset and check out HEAD.
/// 3. Write `source` to `<workdir>/<filename>`, dropping lines `filter` excludes.
/// 4. Stage the file.
/// 5. Compare the index with HEAD; return [`CommitOutcome::Unchanged`] if equal.
/// 6. Commit as the configured identity and push the branch to `origin`.
///
/// Nothing is rolled back on failure: the clone lives in a temporary
/// directory that is removed on return.
///
/// # Errors
/// `Git` for any repository operation, `Write` if the file cannot be written,
/// `ExportRead` if reading `source` fails.
pub fn commit_export<R: Read>(
    cfg: &GitConfig,
    filename: &str,
    source: R,
    filter: &LineFilter,
    opts: &CommitOptions,
) -> Result<CommitOutcome> {
    let (dir, repo) = clone_ephemeral(cfg, opts)?;
    debug!(path = %dir.path().display(), "cloned {}", cfg.repo_url);
    reset_worktree(&repo)?;

    let path: PathBuf = dir.path().join(filename);
    let file = File::create(&path).map_err(|source| Error::Write {
        path: path.clone(),
        source,
    })?;
    let stats = copy_filtered(source, file, filter, &path)?;
    debug!(
        bytes = stats.bytes,
        kept = stats.kept,
        dropped = stats.dropped,
        "wrote {}",
        filename
    );

    let mut index = repo.index().map_err(Error::git("open index"))?;
    index
        .add_path(Path::new(filename))
        .map_err(Error::git("add"))?;
    index.write().map_err(Error::git("write index"))?;

    let parent = head_commit(&repo)?;
    let head_tree: Option<Tree<'_>> = parent
        .as_ref()
        .map(|c| c.tree())
        .transpose()
        .map_err(Error::git("read HEAD tree"))?;
    let diff = repo
        .diff_tree_to_index(head_tree.as_ref(), Some(&index), None)
        .map_err(Error::git("status"))?;
    let changes = diff.deltas().len();
    debug!(changes, "git status");
    if changes == 0 {
        info!("nothing to commit for {}", filename);
        return Ok(CommitOutcome::Unchanged);
    }

    let tree_id = index.write_tree().map_err(Error::git("write tree"))?;
    let tree = repo.find_tree(tree_id).map_err(Error::git("write tree"))?;
    let sig = Signature::now(&cfg.user, &cfg.email).map_err(Error::git("author signature"))?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    let oid = repo
        .commit(
            Some("HEAD"),
            &sig,
            &sig,
            &commit_message(&cfg.message, filename),
            &tree,
            &parents,
        )
        .map_err(Error::git("commit"))?;

    let branch = push_head(&repo, cfg, opts)?;
    info!("saved: {}", oid);
    Ok(CommitOutcome::Committed { oid, branch })
}
