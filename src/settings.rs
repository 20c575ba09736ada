// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use callmedia::DeviceSettings;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const ENV_PREFIX: &str = "KCALL";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub devices: DeviceSettings,
}

impl Settings {
    /// Read `file_name` and apply `KCALL_*` environment overrides.
    pub fn load(file_name: &str) -> Result<Self, ConfigError> {
        Self::build(file_name, true)
    }

    /// Like [`Settings::load`] but a missing file leaves the defaults.
    pub fn load_or_default(file_name: &str) -> Result<Self, ConfigError> {
        Self::build(file_name, false)
    }

    fn build(file_name: &str, required: bool) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(file_name, FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
