// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Loopback session for testing local devices without a remote party.

use anyhow::{Context, Result};
use callmedia::{Contact, Handle, MediaSession};
use gst::{prelude::*, GhostPad};

/// Handle the looped back media appears with.
pub const ECHO_HANDLE: Handle = 1;

/// Session which plays the local media back as if a remote participant sent it.
#[derive(Debug)]
pub struct EchoSession {
    bin: gst::Bin,
    sink: GhostPad,
}

impl EchoSession {
    pub fn create(name: &str) -> Result<Self> {
        let bin = gst::parse_bin_from_description(
            &format!(
                r#"
                name="{name}"

                queue
                    name=echo
                    max-size-time=200000000
                    leaky=downstream
                "#
            ),
            false,
        )
        .context("could not parse echo session bin")?;

        let echo = bin.by_name("echo").context("unable to find echo queue")?;
        let sink = GhostPad::with_target(
            Some("sink"),
            &echo.static_pad("sink").context("queue has no sink pad")?,
        )
        .context("unable to create ghost pad for local media")?;
        let src = GhostPad::with_target(
            Some(format!("src_{ECHO_HANDLE}").as_str()),
            &echo.static_pad("src").context("queue has no src pad")?,
        )
        .context("unable to create ghost pad for echoed media")?;
        bin.add_pad(&sink)
            .context("unable to add sink ghost pad to echo session")?;
        bin.add_pad(&src)
            .context("unable to add src ghost pad to echo session")?;

        Ok(Self { bin, sink })
    }
}

impl MediaSession for EchoSession {
    fn element(&self) -> gst::Element {
        self.bin.clone().upcast()
    }

    fn remote_handle(&self, pad: &gst::Pad) -> Option<Handle> {
        let name = pad.name();
        let handle = name.strip_prefix("src_")?.parse().ok()?;
        (handle == ECHO_HANDLE).then_some(handle)
    }

    fn sink_pad(&self) -> Option<gst::Pad> {
        Some(self.sink.clone().upcast())
    }
}

/// The local user as the only member of an echo call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoContact {
    pub name: String,
}

impl Default for EchoContact {
    fn default() -> Self {
        Self {
            name: "Echo".to_owned(),
        }
    }
}

impl Contact for EchoContact {
    fn handle(&self) -> Handle {
        ECHO_HANDLE
    }
}
