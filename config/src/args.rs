use clap::Parser;

/// Guest co-streaming session coordinator
#[derive(Parser, Debug, Clone)]
#[command(author, version = version(), about, long_about = None)]
pub struct Args {
    /// Optional backend URL to override the stored configuration.
    #[clap(long, value_name = "URL")]
    pub backend_url: Option<String>,

    /// Broadcast to coordinate guests for.
    #[clap(long, value_name = "ID")]
    pub broadcast_id: Option<i64>,

    /// User id this process runs as.
    #[clap(long, value_name = "USER")]
    pub local_user_id: Option<String>,

    /// User id of the broadcast host.
    #[clap(long, value_name = "USER")]
    pub host_user_id: Option<String>,
}

mod config_ext {
    use super::*;
    use config::{
        Map,
        Source,
        Value,
    };
    use std::collections::HashMap;

    impl Source for Args {
        fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
            Box::new((*self).clone())
        }

        fn collect(&self) -> Result<Map<String, Value>, config::ConfigError> {
            let mut cache = HashMap::<String, Value>::new();
            if let Some(backend_url) = &self.backend_url {
                cache.insert("backend_url".to_string(), backend_url.clone().into());
            }
            if let Some(broadcast_id) = self.broadcast_id {
                cache.insert("broadcast_id".to_string(), broadcast_id.into());
            }
            if let Some(local_user_id) = &self.local_user_id {
                cache.insert("local_user_id".to_string(), local_user_id.clone().into());
            }
            if let Some(host_user_id) = &self.host_user_id {
                cache.insert("host_user_id".to_string(), host_user_id.clone().into());
            }
            Ok(cache)
        }
    }
}

pub fn version() -> String {
    let author = clap::crate_authors!();
    let config_dir_path = crate::get_config_dir().display().to_string();
    let data_dir_path = crate::get_data_dir().display().to_string();

    format!(
        "\
Authors: {author}

Config directory: {config_dir_path}
Data directory: {data_dir_path}"
    )
}
