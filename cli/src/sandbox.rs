use std::path::PathBuf;

use harness_config::{ConfigError, ConfigFut, Sandbox};

/// A sandbox backed by an already-unpacked environment on disk.
#[derive(Debug)]
pub struct DirectorySandbox {
    root: PathBuf,
}

impl DirectorySandbox {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Sandbox for DirectorySandbox {
    fn environment_root<'a>(&'a self, _args: &'a [String]) -> ConfigFut<'a, PathBuf> {
        Box::pin(async move {
            if self.root.is_dir() {
                Ok(self.root.clone())
            } else {
                Err(ConfigError::Sandbox(format!(
                    "{} is not a directory",
                    self.root.display()
                )))
            }
        })
    }

    fn tear_down(&self) {
        tracing::debug!(root = %self.root.display(), "Sandbox released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = DirectorySandbox::new(dir.path().to_path_buf());
        assert_eq!(sandbox.environment_root(&[]).await.unwrap(), dir.path());

        let missing = DirectorySandbox::new(dir.path().join("missing"));
        assert!(matches!(
            missing.environment_root(&[]).await,
            Err(ConfigError::Sandbox(_))
        ));
    }
}
