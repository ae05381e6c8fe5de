#[macro_use]
extern crate tracing;

mod app_config;
mod args;
mod role;

use app_config::AppConfig;
pub use app_config::{
    get_config_dir,
    get_data_dir,
};
pub use args::Args;
use color_eyre::Result;
use eyre::Context as _;
pub use role::BroadcastRole;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten, skip_serializing)]
    pub app_config: AppConfig,
    /// Base URL of the hosted backend the roster adapters talk to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<url::Url>,
    /// Broadcast this process participates in.
    #[serde(default)]
    pub broadcast_id: i64,
    /// User id of this process's viewer/host.
    #[serde(default)]
    pub local_user_id: String,
    /// User id of the broadcast owner.
    #[serde(default)]
    pub host_user_id: String,
}

const DEFAULT_CONFIG: &str = include_str!("default-config.yaml");

impl Default for Config {
    fn default() -> Self {
        serde_yml::from_str(DEFAULT_CONFIG).expect("Failed to parse default config")
    }
}

impl config::Source for Config {
    fn clone_into_box(&self) -> Box<dyn config::Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<config::Map<String, config::Value>, config::ConfigError> {
        let mut cache = config::Map::<String, config::Value>::new();
        if let Some(url) = &self.backend_url {
            cache.insert("backend_url".to_string(), url.to_string().into());
        }
        cache.insert("broadcast_id".to_string(), self.broadcast_id.into());
        cache.insert("local_user_id".to_string(), self.local_user_id.clone().into());
        cache.insert("host_user_id".to_string(), self.host_user_id.clone().into());
        Ok(cache)
    }
}

impl Config {
    pub fn new(args: Args) -> Result<Self, config::ConfigError> {
        let data_dir = get_data_dir();
        let config_dir = get_config_dir();
        let mut builder = config::Config::builder()
            .set_default("data_dir", data_dir.to_str().unwrap_or("."))?
            .set_default("config_dir", config_dir.to_str().unwrap_or("."))?;

        builder = builder.add_source(Config::default());

        let config_files = [("config.yaml", config::FileFormat::Yaml)];

        for (file, format) in &config_files {
            let source = config::File::from(config_dir.join(file))
                .format(*format)
                .required(false);
            builder = builder.add_source(source);
        }

        builder = builder.add_source(args);

        let cfg: Self = builder.build()?.try_deserialize()?;
        debug!(cfg.broadcast_id, %cfg.local_user_id, "Loaded configuration");

        Ok(cfg)
    }

    /// Which cleanup protocol this process runs when a guest drops out
    /// of the media room. Only the host may write to the roster store.
    pub fn role(&self) -> BroadcastRole {
        if !self.local_user_id.is_empty() && self.local_user_id == self.host_user_id {
            BroadcastRole::Host
        } else {
            BroadcastRole::Viewer
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.app_config.data_dir
    }

    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.app_config.config_dir).context("Failed to create config directory")?;
        let path = self.app_config.config_dir.join("config.yaml");
        let content = serde_yml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).wrap_err_with(|| format!("Failed to write config to {:?}", path))
    }
}
