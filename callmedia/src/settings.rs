// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Device preferences.

use gst::{Caps, Fraction};
use serde::Deserialize;

pub(crate) const AUDIO_SAMPLE_RATE: i32 = 48_000;
pub(crate) const AUDIO_CHANNELS: i32 = 2;

/// Which elements are used as capture and output devices.
///
/// Every field has a default so that a partial configuration is enough.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Element factory of the microphone.
    pub audio_source: String,
    /// Value of the microphone element's `device` property.
    pub audio_source_device: Option<String>,
    /// Element factory of the speaker.
    pub audio_sink: String,
    /// Value of the speaker element's `device` property.
    pub audio_sink_device: Option<String>,
    /// Element factory of the camera.
    pub video_source: String,
    /// Value of the camera element's `device` property.
    pub video_source_device: Option<String>,
    pub video_width: i32,
    pub video_height: i32,
    pub video_framerate: i32,
    /// Insert a noise reduction stage after the camera if the element is available.
    pub noise_reduction: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            audio_source: "autoaudiosrc".to_owned(),
            audio_source_device: None,
            audio_sink: "autoaudiosink".to_owned(),
            audio_sink_device: None,
            video_source: "autovideosrc".to_owned(),
            video_source_device: None,
            video_width: 320,
            video_height: 240,
            video_framerate: 15,
            noise_reduction: true,
        }
    }
}

impl DeviceSettings {
    /// Caps every audio branch of a source controller produces.
    #[must_use]
    pub fn audio_caps(&self) -> Caps {
        Caps::builder("audio/x-raw")
            .field("format", "S16LE")
            .field("layout", "interleaved")
            .field("rate", AUDIO_SAMPLE_RATE)
            .field("channels", AUDIO_CHANNELS)
            .build()
    }

    /// Caps every video branch of a source controller produces.
    ///
    /// Without `with_framerate` the frame rate is left open, which is needed when no
    /// rate limiting element is available.
    #[must_use]
    pub fn video_caps(&self, with_framerate: bool) -> Caps {
        let builder = Caps::builder("video/x-raw")
            .field("format", "I420")
            .field("width", self.video_width)
            .field("height", self.video_height);

        if with_framerate {
            builder
                .field("framerate", Fraction::new(self.video_framerate, 1))
                .build()
        } else {
            builder.build()
        }
    }
}
