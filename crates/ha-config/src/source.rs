//! Loading a [`Configuration`] from disk

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;
use crate::schema::{Configuration, TOKEN_ENV_VAR};
use crate::secrets::SECRETS_FILE;
use ha_template::TemplateEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// A configuration file plus everything needed to evaluate it
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    engine: Arc<TemplateEngine>,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_engine(path, Arc::new(TemplateEngine::new()))
    }

    /// Use `engine` to check the templates in the file
    pub fn with_engine(path: impl Into<PathBuf>, engine: Arc<TemplateEngine>) -> Self {
        Self {
            path: path.into(),
            engine,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, parse and validate the configuration
    pub fn load(&self) -> ConfigResult<Configuration> {
        self.load_tracked().0
    }

    /// Like [`ConfigSource::load`], also returning the files that were read
    ///
    /// The file list is returned even when loading fails so a broken file
    /// can still be watched for its fix.
    pub fn load_tracked(&self) -> (ConfigResult<Configuration>, Vec<PathBuf>) {
        let config_dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut loader = match YamlLoader::new(&config_dir) {
            Ok(loader) => loader,
            Err(e) => {
                let files = vec![self.path.clone(), config_dir.join(SECRETS_FILE)];
                return (Err(e), files);
            }
        };

        let result = self.parse(&mut loader);
        let mut files = loader.files_read();
        if files.len() == 1 {
            // Failed before the main file was opened
            files.insert(0, self.path.clone());
        }

        let result = result.map(|mut config| {
            config.sources = files.clone();
            config
        });
        (result, files)
    }

    fn parse(&self, loader: &mut YamlLoader) -> ConfigResult<Configuration> {
        let file_name = self
            .path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "path".to_string(),
                reason: format!("{} is not a file", self.path.display()),
            })?;

        debug!(path = %self.path.display(), "Loading configuration");
        let value = loader.load_file(&file_name)?;

        let mut config: Configuration =
            serde_yaml::from_value(value).map_err(|e| ConfigError::Schema {
                path: self.path.clone(),
                source: e,
            })?;

        config.validate(&self.engine, std::env::var(TOKEN_ENV_VAR).ok())?;

        info!(
            path = %self.path.display(),
            buttons = config.buttons.len(),
            "Loaded configuration"
        );
        Ok(config)
    }
}
