//! Packaging the source tree and moving it through the staging
//! bucket.
//!
//! The archive never contains secrets: files such as `.env` are
//! excluded from the tarball and uploaded separately under a
//! per-instance `secrets/` prefix. The local archive is a
//! [`tempfile::NamedTempFile`], so it is removed when the transfer
//! returns, whether the upload succeeded or not.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cmd::CommandRunner;
use crate::error::{DeployError, DeployResult};

/// Patterns excluded from every archive unless replaced.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    "*.pyc",
    ".next",
    "dist",
    "build",
    "target",
    ".venv",
    "venv",
    ".env",
    ".env.*",
    "*.log",
    ".DS_Store",
];

/// Shell-style exclusion patterns.
///
/// A pattern without `/` is matched against every component of a
/// relative path, so `node_modules` excludes the directory wherever
/// it appears. A pattern with `/` is matched against the whole
/// relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludeSet {
    patterns: Vec<String>,
}

impl Default for ExcludeSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUDES.iter().copied())
    }
}

impl ExcludeSet {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            patterns: patterns.into_iter().map(String::from).collect(),
        }
    }

    #[must_use]
    pub fn with(mut self, pattern: &str) -> Self {
        self.patterns.push(pattern.to_string());
        self
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    #[must_use]
    pub fn is_excluded(&self, relative: &Path) -> bool {
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let joined = components.join("/");

        self.patterns.iter().any(|pattern| {
            if pattern.contains('/') {
                glob_match(pattern.trim_matches('/'), &joined)
            } else {
                components.iter().any(|c| glob_match(pattern, c))
            }
        })
    }
}

/// Match `text` against a pattern where `*` is any run of
/// characters and `?` exactly one.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Source directories (or single files) of a project, relative to
/// its root, plus exclusion rules.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub root: PathBuf,
    pub sources: Vec<String>,
    pub excludes: ExcludeSet,
}

impl ArtifactBundle {
    #[must_use]
    pub fn new(root: &Path, sources: &[String], excludes: ExcludeSet) -> Self {
        Self {
            root: root.to_path_buf(),
            sources: sources.to_vec(),
            excludes,
        }
    }

    /// Archive name derived from the build time.
    #[must_use]
    pub fn archive_name(prefix: &str, built_at: DateTime<Utc>) -> String {
        format!("{prefix}-{}.tar.gz", built_at.format("%Y%m%d%H%M%S"))
    }

    /// Every file that goes into the archive, relative to the root,
    /// sorted.
    pub fn files(&self) -> DeployResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for source in &self.sources {
            let relative = PathBuf::from(source);
            let absolute = self.root.join(&relative);
            if !absolute.exists() {
                return Err(DeployError::FileNotFound(format!(
                    "source '{}' not found under {}",
                    source,
                    self.root.display()
                )));
            }
            self.collect(&relative, &mut files)?;
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn collect(&self, relative: &Path, out: &mut Vec<PathBuf>) -> DeployResult<()> {
        if self.excludes.is_excluded(relative) {
            debug!(path = %relative.display(), "excluded");
            return Ok(());
        }

        let meta = fs::symlink_metadata(self.root.join(relative))?;
        if meta.is_dir() {
            let mut entries: Vec<_> = fs::read_dir(self.root.join(relative))?
                .filter_map(Result::ok)
                .map(|e| e.file_name())
                .collect();
            entries.sort();
            for name in entries {
                self.collect(&relative.join(name), out)?;
            }
        } else {
            out.push(relative.to_path_buf());
        }
        Ok(())
    }

    /// Write the gzip-compressed tarball. Returns the number of
    /// files archived.
    pub fn write_to<W: Write>(&self, writer: W) -> DeployResult<usize> {
        let files = self.files()?;
        let encoder = GzEncoder::new(writer, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        for file in &files {
            builder.append_path_with_name(self.root.join(file), file)?;
        }

        builder.into_inner()?.finish()?;
        Ok(files.len())
    }
}

/// A secret file uploaded next to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedSecret {
    /// Path relative to the install directory on the instance.
    pub path: String,
    pub uri: String,
}

/// References the remote side needs to fetch a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub archive_uri: String,
    pub secrets: Vec<StagedSecret>,
}

impl StagedArtifact {
    /// Bucket the archive was uploaded to, `gs://` form.
    #[must_use]
    pub fn bucket_uri(&self) -> Option<String> {
        let rest = self.archive_uri.strip_prefix("gs://")?;
        let bucket = rest.split('/').next().filter(|b| !b.is_empty())?;
        Some(format!("gs://{bucket}"))
    }
}

/// Object storage used to hand artifacts to the instance.
pub struct Staging<'r> {
    runner: &'r dyn CommandRunner,
    bucket_uri: String,
    scratch_dir: PathBuf,
}

impl<'r> Staging<'r> {
    #[must_use]
    pub fn new(runner: &'r dyn CommandRunner, bucket_uri: &str) -> Self {
        Self {
            runner,
            bucket_uri: bucket_uri.trim_end_matches('/').to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory the temporary archive is written to.
    #[must_use]
    pub fn scratch_dir(mut self, dir: &Path) -> Self {
        self.scratch_dir = dir.to_path_buf();
        self
    }

    #[must_use]
    pub fn archive_uri(&self, name: &str) -> String {
        format!("{}/artifacts/{name}", self.bucket_uri)
    }

    #[must_use]
    pub fn secret_uri(&self, instance: &str, path: &str) -> String {
        format!("{}/secrets/{instance}/{path}", self.bucket_uri)
    }

    pub fn upload(&self, local: &Path, uri: &str) -> DeployResult<()> {
        let local = local.to_string_lossy();
        self.runner
            .run("gcloud", &["storage", "cp", "--quiet", &local, uri])?;
        Ok(())
    }

    pub fn exists(&self, uri: &str) -> DeployResult<bool> {
        match self.runner.run("gcloud", &["storage", "ls", uri]) {
            Ok(out) => Ok(!out.trim().is_empty()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn remove(&self, uri: &str) -> DeployResult<()> {
        match self.runner.run("gcloud", &["storage", "rm", "--recursive", uri]) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

/// Package the bundle, upload it and the secrets, and return the
/// remote references.
pub fn package_and_upload(
    bundle: &ArtifactBundle,
    secrets: &[String],
    staging: &Staging<'_>,
    instance: &str,
    archive_name: &str,
) -> DeployResult<StagedArtifact> {
    let archive = tempfile::Builder::new()
        .prefix("onager-")
        .suffix(".tar.gz")
        .tempfile_in(&staging.scratch_dir)?;

    let count = bundle.write_to(archive.as_file())?;
    let size = archive.as_file().metadata()?.len();
    info!(files = count, bytes = size, archive = archive_name, "packaged artifact");

    let archive_uri = staging.archive_uri(archive_name);
    staging.upload(archive.path(), &archive_uri)?;
    info!(uri = %archive_uri, "uploaded artifact");

    let mut staged = Vec::with_capacity(secrets.len());
    for secret in secrets {
        let local = bundle.root.join(secret);
        if !local.is_file() {
            return Err(DeployError::FileNotFound(secret.clone()));
        }
        let uri = staging.secret_uri(instance, secret);
        staging.upload(&local, &uri)?;
        debug!(%uri, "uploaded secret");
        staged.push(StagedSecret {
            path: secret.clone(),
            uri,
        });
    }

    Ok(StagedArtifact {
        archive_uri,
        secrets: staged,
    })
}
