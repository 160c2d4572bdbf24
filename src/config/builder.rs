use std::{fs::read_to_string, path::PathBuf, sync::LazyLock};

use anyhow::Context;
use clap::Parser;

use super::{ProfdCli, ProfdConfig};

pub(super) struct ProfdConfigBuilder {
    files: Vec<PathBuf>,
}

impl ProfdConfigBuilder {
    pub(super) fn new() -> Self {
        let files = Vec::new();
        ProfdConfigBuilder { files }
    }

    pub(super) fn add_files(
        mut self,
        files: &[impl Into<PathBuf> + AsRef<std::ffi::OsStr>],
    ) -> Self {
        for file in files {
            self.files.push(file.into());
        }
        self
    }

    pub(super) fn build(&self) -> anyhow::Result<ProfdConfig> {
        let mut config = self.load_files()?;

        // Once file configuration is handled, apply CLI arguments
        static CLI_ARGS: LazyLock<ProfdConfig> = LazyLock::new(|| ProfdCli::parse().to_config());
        config.update(&CLI_ARGS);

        Ok(config)
    }

    pub(super) fn load_files(&self) -> anyhow::Result<ProfdConfig> {
        self.files
            .iter()
            .filter(|p| p.exists())
            .map(|p| {
                let content =
                    read_to_string(p).with_context(|| format!("Failed to read {}", p.display()))?;
                ProfdConfig::try_from(content.as_str())
                    .with_context(|| format!("parsing error while processing {}", p.display()))
            })
            .try_fold(
                ProfdConfig::default(),
                |mut config: ProfdConfig, other: anyhow::Result<ProfdConfig>| {
                    config.update(&other?);
                    Ok::<ProfdConfig, anyhow::Error>(config)
                },
            )
    }
}
