// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Remote participants' incoming media.

use std::sync::Arc;

use crate::{Handle, MediaKind};

mod audio;
mod manager;
mod video;

pub use audio::AudioSinkController;
pub use manager::*;
pub use video::VideoSinkController;

/// Decoded media chain of one remote participant in one content.
#[derive(Debug)]
pub enum SinkController {
    Audio(AudioSinkController),
    Video(VideoSinkController),
}

impl SinkController {
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio(_) => MediaKind::Audio,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Remote handle whose media this controller consumes.
    #[must_use]
    pub fn handle(&self) -> Handle {
        match self {
            Self::Audio(audio) => audio.handle(),
            Self::Video(video) => video.handle(),
        }
    }

    #[must_use]
    pub fn bin(&self) -> &gst::Bin {
        match self {
            Self::Audio(audio) => audio.bin(),
            Self::Video(video) => video.bin(),
        }
    }

    /// Access display handling if this is a video sink.
    #[must_use]
    pub fn as_video(&self) -> Option<&VideoSinkController> {
        match self {
            Self::Video(video) => Some(video),
            Self::Audio(_) => None,
        }
    }
}

/// Notification of a [`SinkManager`], delivered on the main thread.
#[derive(Clone, Debug)]
pub enum SinkEvent<C> {
    /// A remote participant's media is playing and its contact is known.
    Created {
        contact: C,
        sink: Arc<SinkController>,
    },
    /// A previously created sink is gone.
    Destroyed {
        contact: C,
        sink: Arc<SinkController>,
    },
    /// The shared audio output device could not be opened, remote audio is discarded.
    OutputUnavailable(String),
}
