// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Volume and mute of a single `volume` element.

use gst::prelude::*;
use parking_lot::Mutex;
use tokio::sync::broadcast;

/// Highest normalized volume, maps to unit gain.
pub const MAX_VOLUME: u32 = 1000;

const CHANGES_CAPACITY: usize = 16;

/// Change notification of a [`VolumeController`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeChange {
    SupportedChanged(bool),
    VolumeChanged(u32),
    MutedChanged(bool),
}

/// Controls the `volume` and `mute` properties of an element which may come and go.
///
/// While no element is attached the controller is *unsupported*: getters report `0` and
/// `false`, setters are ignored.
#[derive(Debug)]
pub struct VolumeController {
    element: Mutex<Option<gst::Element>>,
    changes: broadcast::Sender<VolumeChange>,
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeController {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGES_CAPACITY);
        Self {
            element: Mutex::new(None),
            changes,
        }
    }

    /// Receive change notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VolumeChange> {
        self.changes.subscribe()
    }

    /// Attach an element or detach the current one with `None`.
    ///
    /// An element without a `volume` and a `mute` property is not attached, the controller is
    /// unsupported then.
    pub fn set_element(&self, element: Option<gst::Element>) {
        let element = element.filter(|element| {
            let usable = has_volume_properties(element);
            if !usable {
                warn!(
                    "element '{}' has no 'volume' and 'mute' properties, volume is unsupported",
                    element.name()
                );
            }
            usable
        });

        let mut current = self.element.lock();
        if *current == element {
            return;
        }

        let was_supported = current.is_some();
        *current = element;

        match current.as_ref() {
            Some(element) => {
                trace!("attaching volume element '{}'", element.name());
                if !was_supported {
                    self.notify(VolumeChange::SupportedChanged(true));
                }
                self.notify(VolumeChange::VolumeChanged(read_volume(element)));
                self.notify(VolumeChange::MutedChanged(element.property::<bool>("mute")));
            }
            None => {
                trace!("detaching volume element");
                self.notify(VolumeChange::SupportedChanged(false));
            }
        }
    }

    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.element.lock().is_some()
    }

    /// Current volume between `0` and [`MAX_VOLUME`].
    #[must_use]
    pub fn volume(&self) -> u32 {
        self.element.lock().as_ref().map_or(0, read_volume)
    }

    /// Set the volume, clamped to [`MAX_VOLUME`], and return the resulting volume.
    pub fn set_volume(&self, volume: u32) -> u32 {
        let element = self.element.lock();
        let Some(element) = element.as_ref() else {
            return 0;
        };

        let volume = volume.min(MAX_VOLUME);
        if read_volume(element) != volume {
            element.set_property("volume", f64::from(volume) / f64::from(MAX_VOLUME));
            self.notify(VolumeChange::VolumeChanged(volume));
        }

        volume
    }

    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.element
            .lock()
            .as_ref()
            .map_or(false, |element| element.property::<bool>("mute"))
    }

    /// Mute or unmute and return the resulting mute state.
    pub fn set_muted(&self, muted: bool) -> bool {
        let element = self.element.lock();
        let Some(element) = element.as_ref() else {
            return false;
        };

        if element.property::<bool>("mute") != muted {
            element.set_property("mute", muted);
            self.notify(VolumeChange::MutedChanged(muted));
        }

        muted
    }

    fn notify(&self, change: VolumeChange) {
        // nobody listening is fine
        let _ = self.changes.send(change);
    }
}

fn has_volume_properties(element: &gst::Element) -> bool {
    let has = |name: &str, value_type: glib::Type| {
        element
            .find_property(name)
            .map_or(false, |property| property.value_type() == value_type)
    };
    has("volume", glib::Type::F64) && has("mute", glib::Type::BOOL)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn read_volume(element: &gst::Element) -> u32 {
    let volume = element.property::<f64>("volume") * f64::from(MAX_VOLUME);
    (volume.round() as u32).min(MAX_VOLUME)
}
