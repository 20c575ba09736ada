// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

/*!
    # Purpose
    The *callmedia* crate controls the [GStreamer](https://gstreamer.freedesktop.org/) side of a call.
    Every media leg of a call (a so-called *content*, audio or video) gets its own set of controllers
    which are linked into one shared call pipeline.

    - [SourceController]
      owns the local outgoing media of a content. It always feeds silence (or black frames) and can be
      switched to a real capture device and back without ever unlinking its consumers.
    - [SinkController]
      owns the decoded media of one remote participant. Audio sinks are mixed into one shared output
      device per content, video sinks fan out to any number of attached displays.
    - [SinkManager]
      creates and destroys sink controllers when the media layer adds or unlinks pads and resolves the
      remote contact of every pad on the main thread through a [SinkDispatcher].
    - [VolumeController]
      exposes volume and mute of a single `volume` element to the user interface.

    # Threads

    Pad events are raised on GStreamer streaming threads. Everything a user interface may observe is
    handed to the *main thread* through a queue which is drained by [SinkDispatcher::turn]. The media
    graph itself is always changed synchronously on the thread which reported the change.

    # Seams

    - [MediaSession]
      is the media layer's session element of one content (e.g. a conference bin).
    - [Contact]
      is a remote member as the signaling layer knows it.
    - [TestSession]
      is a synthetic session which produces remote pads on demand and is used for testing.

    # Debugging

    - [dot](debug::dot) and [debug_dot](debug::debug_dot)
      write DOT files of the pipeline into `GST_DEBUG_DUMP_DOT_DIR`.
    - [name](debug::name)
      generates a name from an element which includes parent names for better tracing.
*/

#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate log;

pub mod debug;
mod error;
mod kind;
mod pads;
mod session;
mod settings;
mod sink;
mod source;
mod volume;

#[cfg(test)]
mod tests;

pub use error::*;
pub use kind::*;
pub use pads::*;
pub use session::*;
pub use settings::*;
pub use sink::*;
pub use source::*;
pub use volume::*;

#[cfg(test)]
pub use tests::testing;
