pub mod daemon;
pub mod init;
pub mod matches;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use devsync_core::{config, Config};

/// The working copy a command operates on, plus an optional explicit config.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub workdir: PathBuf,
    explicit_config: Option<PathBuf>,
}

impl Workspace {
    pub fn resolve(workdir: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        let workdir = match workdir {
            Some(dir) => dir,
            None => std::env::current_dir().context("cannot read current directory")?,
        };
        let workdir = workdir
            .canonicalize()
            .with_context(|| format!("cannot resolve working copy '{}'", workdir.display()))?;
        Ok(Self {
            workdir,
            explicit_config: config,
        })
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        config::locate(&self.workdir, self.explicit_config.as_deref())
            .context("no DevSync config found; run `devsync init` first")
    }

    pub fn load_config(&self) -> Result<(PathBuf, Config)> {
        let path = self.config_path()?;
        let config = config::load_at(&path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        Ok((path, config))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}
