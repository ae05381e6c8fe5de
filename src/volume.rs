use eyre::{
    Context as _,
    Result,
};
use std::{
    collections::HashMap,
    path::{
        Path,
        PathBuf,
    },
};

/// Gain applied when a guest has no stored override.
pub const DEFAULT_GAIN: f64 = 1.0;

const VOLUME_FILE: &str = "guest-volumes.yaml";

/// Per-viewer playback gain overrides, keyed by broadcast and guest.
///
/// The whole file is loaded once per session so attachment events never
/// wait on storage; `set` writes through immediately so overrides
/// survive process and broadcast restarts.
#[derive(Debug)]
pub struct VolumeOverrides {
    path: PathBuf,
    broadcasts: HashMap<String, HashMap<String, f64>>,
}

impl VolumeOverrides {
    pub fn load(data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir.as_ref().join(VOLUME_FILE);
        let broadcasts = match std::fs::read_to_string(&path) {
            Ok(content) => serde_yml::from_str(&content).unwrap_or_else(|err| {
                warn!(?path, "Unreadable volume override file, starting empty: {err}");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { path, broadcasts }
    }

    pub fn get(&self, broadcast_id: i64, guest_user_id: &str) -> f64 {
        self.broadcasts
            .get(&broadcast_id.to_string())
            .and_then(|guests| guests.get(guest_user_id))
            .copied()
            .unwrap_or(DEFAULT_GAIN)
    }

    /// Clamps into `[0.0, 1.0]`, persists immediately and returns the
    /// stored value. A failed write keeps the in-memory override so the
    /// session still hears the requested level.
    pub fn set(&mut self, broadcast_id: i64, guest_user_id: &str, gain: f64) -> f64 {
        let gain = gain.clamp(0.0, 1.0);
        self.broadcasts
            .entry(broadcast_id.to_string())
            .or_default()
            .insert(guest_user_id.to_string(), gain);
        if let Err(err) = self.save() {
            warn!("Failed to persist volume overrides: {err}");
        }
        gain
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
        }
        let content = serde_yml::to_string(&self.broadcasts).context("Failed to serialize volume overrides")?;
        std::fs::write(&self.path, content).wrap_err_with(|| format!("Failed to write overrides to {:?}", self.path))
    }
}
