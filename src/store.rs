//! Descriptor artifact storage
//!
//! One file per transfer, named `<info hash>.torrent` or `<info hash>.magnet`,
//! so transfers can be re-added after a restart.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::descriptor::Source;
use crate::identifier::InfoHash;

const EXTENSIONS: [&str; 2] = ["torrent", "magnet"];

/// Directory of persisted descriptors
#[derive(Debug, Clone)]
pub struct DescriptorStore {
    dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, info_hash: &InfoHash, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", info_hash.to_hex(), extension))
    }

    /// Persist a source's descriptor, replacing any previous artifact
    pub async fn save(&self, source: &Source) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let path = self.path_for(&source.info_hash(), source.artifact_extension());
        let tmp = path.with_extension("part");
        fs::write(&tmp, source.to_bytes())
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming {}", tmp.display()))?;
        Ok(path)
    }

    /// Remove every artifact for `info_hash`; returns whether one existed
    pub async fn remove(&self, info_hash: &InfoHash) -> Result<bool> {
        let mut removed = false;
        for extension in EXTENSIONS {
            let path = self.path_for(info_hash, extension);
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing {}", path.display()));
                }
            }
        }
        Ok(removed)
    }

    /// Read back every stored descriptor; unreadable artifacts are skipped
    pub async fn load_all(&self) -> Result<Vec<Source>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.dir.display())),
        };

        let mut sources = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if !known {
                continue;
            }

            let data = match fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable descriptor"
                    );
                    continue;
                }
            };
            match Source::from_bytes(&data) {
                Ok(source) => sources.push(source),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping invalid descriptor"
                    );
                }
            }
        }

        sources.sort_by_key(|s| s.info_hash());
        Ok(sources)
    }
}
