//! Localizes remote inputs before a command is launched.
//!
//! Every `-i <http(s) url>` pair in a command is downloaded into a directory
//! private to one job, and the URL is replaced by the local path. The
//! directory lives until the job is torn down.

pub mod fetch;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;

use crate::error::{AgentError, Result};

pub use fetch::{HttpFetcher, MediaFetcher};

/// Flag that introduces an input in an ffmpeg-style argument list.
pub const INPUT_MARKER: &str = "-i";

const MAX_QUERY_CHARS: usize = 96;

/// A command whose remote inputs have been replaced by local copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCommand {
    pub argv: Vec<String>,
    pub dir: PathBuf,
}

#[derive(Clone)]
pub struct MediaStager {
    base_dir: PathBuf,
    fetcher: Arc<dyn MediaFetcher>,
}

impl std::fmt::Debug for MediaStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStager")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

impl MediaStager {
    pub fn new(base_dir: impl Into<PathBuf>, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            base_dir: base_dir.into(),
            fetcher,
        }
    }

    /// Stager downloading over HTTP with a default client.
    pub fn http(base_dir: impl Into<PathBuf>) -> Self {
        Self::new(base_dir, Arc::new(HttpFetcher::default()))
    }

    /// Download every remote input of `argv` into `<base>/<job_key>` and
    /// rewrite the arguments to point at the local files.
    ///
    /// On failure the directory is removed again; nothing partial survives.
    pub async fn stage(&self, job_key: &str, argv: &[String]) -> Result<StagedCommand> {
        // Rewritten inputs must resolve the same from any working directory.
        let dir = std::path::absolute(self.base_dir.join(job_key))?;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!(dir = %dir.display(), "Purged stale staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AgentError::Io(e)),
        }
        tokio::fs::create_dir_all(&dir).await?;

        let mut rewritten = Vec::with_capacity(argv.len());
        let mut used_names = HashSet::new();
        let mut args = argv.iter().enumerate().peekable();

        while let Some((index, arg)) = args.next() {
            rewritten.push(arg.clone());
            if arg != INPUT_MARKER {
                continue;
            }
            let Some((_, url)) = args.next_if(|(_, next)| is_remote(next)) else {
                continue;
            };

            let mut name = local_file_name(url);
            if !used_names.insert(name.clone()) {
                name = format!("{}_{}", index + 1, name);
                used_names.insert(name.clone());
            }
            let dest = dir.join(&name);

            match self.fetcher.fetch(url, &dest).await {
                Ok(bytes) => {
                    tracing::info!(url = %url, dest = %dest.display(), bytes, "Staged input");
                }
                Err(e) => {
                    tracing::error!(url = %url, error = %e, "Failed to stage input");
                    self.unstage(&dir).await;
                    return Err(match e {
                        AgentError::Staging { .. } => e,
                        other => AgentError::Staging {
                            url: url.clone(),
                            message: other.to_string(),
                        },
                    });
                }
            }
            rewritten.push(dest.to_string_lossy().into_owned());
        }

        Ok(StagedCommand {
            argv: rewritten,
            dir,
        })
    }

    /// Remove a staging directory. Missing directories are fine; any other
    /// failure is logged and swallowed.
    pub async fn unstage(&self, dir: &Path) {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => tracing::debug!(dir = %dir.display(), "Removed staging directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove staging directory")
            }
        }
    }
}

/// Whether an argument names an input that has to be downloaded.
pub fn is_remote(arg: &str) -> bool {
    arg.starts_with("http://") || arg.starts_with("https://")
}

/// File name for a downloaded input: the last path segment, with the query
/// string folded in before the extension so differently-parameterised URLs
/// don't collide.
pub fn local_file_name(url: &str) -> String {
    let (segment, query) = match Url::parse(url) {
        Ok(parsed) => (
            parsed
                .path_segments()
                .and_then(|segments| segments.last())
                .map(sanitize)
                .unwrap_or_default(),
            parsed.query().map(sanitize),
        ),
        Err(_) => (String::new(), None),
    };

    let base = match segment.as_str() {
        "" | "." | ".." => "input".to_string(),
        _ => segment,
    };

    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return base;
    };
    let query: String = query.chars().take(MAX_QUERY_CHARS).collect();

    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, query, ext),
        _ => format!("{}_{}", base, query),
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
