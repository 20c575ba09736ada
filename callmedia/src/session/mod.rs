// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Seams to the media and signaling layers.

use std::fmt::Debug;

use crate::Handle;

mod test_session;

pub use test_session::*;

/// Remote member of a content as the signaling layer knows it.
pub trait Contact: Clone + Debug + Send + Sync + 'static {
    /// Handle this contact is addressed with by the media layer.
    fn handle(&self) -> Handle;
}

/// Session element of one content provided by the media layer.
///
/// The session element raises a `pad-added` signal for every remote participant's media and
/// accepts the local media on its sink pad.
pub trait MediaSession: Debug + Send + Sync + 'static {
    /// Element to add to the call pipeline.
    fn element(&self) -> gst::Element;

    /// Remote contact handle which sends the media of the given src pad.
    fn remote_handle(&self, pad: &gst::Pad) -> Option<Handle>;

    /// Pad to feed the local outgoing media into.
    fn sink_pad(&self) -> Option<gst::Pad>;
}
