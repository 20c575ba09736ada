// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Call handling on top of [`callmedia`]: call state, contents and their media wiring.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

use anyhow::Result;

mod channel;
mod content;
pub mod echo;
mod error;
mod settings;
mod state;

pub use channel::*;
pub use content::*;
pub use error::*;
pub use settings::*;
pub use state::*;

/// Plugins every call needs.
const REQUIRED_PLUGINS: [&str; 9] = [
    "audioconvert",
    "audiomixer",
    "audioresample",
    "audiotestsrc",
    "autodetect",
    "coreelements",
    "level",
    "videotestsrc",
    "volume",
];

/// Initialize GStreamer and check that all required plugins are installed.
pub fn init() -> Result<()> {
    gst::init()?;
    check_plugins()
}

pub fn check_plugins() -> Result<()> {
    let registry = gst::Registry::get();

    let mut missing: Vec<_> = REQUIRED_PLUGINS
        .into_iter()
        .filter(|plug| registry.find_plugin(plug).is_none())
        .collect();

    // merged into one plugin with GStreamer 1.22
    if registry.find_plugin("videoconvertscale").is_none() {
        missing.extend(
            ["videoconvert", "videoscale"]
                .into_iter()
                .filter(|plug| registry.find_plugin(plug).is_none()),
        );
    }

    if !missing.is_empty() {
        anyhow::bail!(
            "The following plugins could not be loaded: {}",
            missing.join(", ")
        );
    }

    Ok(())
}
