use std::path::Path;

use api::{surface::MetadataKinds, types::Generation};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver-wide knobs. Loaded once and handed to the device at open time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverSettings {
    /// Minimum size in bytes of a new upload backing buffer.
    pub upload_min_size: u64,
    /// Minimum alignment of every upload. Larger per-call alignments win.
    pub upload_alignment: u64,
    /// Forces the capability table of a specific generation.
    pub generation_override: Option<Generation>,
    /// Metadata kinds that are never enabled on new images.
    pub disable_compression: MetadataKinds,
    /// Keeps dynamic state range checks in release builds.
    pub validate_dynamic_state: bool,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse settings: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("unable to serialize settings: {0}")]
    Serialize(#[from] ron::Error),
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            upload_min_size: 16 * 1024,
            upload_alignment: 16,
            generation_override: None,
            disable_compression: MetadataKinds::empty(),
            validate_dynamic_state: false,
        }
    }
}

impl DriverSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(ron::de::from_reader::<_, DriverSettings>(reader)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        ron::ser::to_writer_pretty(writer, self, PrettyConfig::default())?;
        Ok(())
    }

    /// Loads settings from `path`, falling back to the defaults if the file is missing or
    /// malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(settings) => settings,
            Err(err) => {
                ard_log::warn!(
                    "using default driver settings, could not load `{}`: {err}",
                    path.as_ref().display()
                );
                Self::default()
            }
        }
    }

    /// `true` if dynamic state slot ranges must be checked.
    #[inline(always)]
    pub(crate) fn check_dynamic_state(&self) -> bool {
        cfg!(debug_assertions) || self.validate_dynamic_state
    }
}
