// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{bail, Context, Result};
use gst::{prelude::*, GhostPad};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{pads, Handle, MediaKind, MediaSession};

const REMOTE_PAD_PREFIX: &str = "src_";

/// Session that generates test media for every remote participant added to it.
///
/// Remote participants appear as `src_<handle>` pads of the session bin. Outgoing media is
/// consumed by a `fakesink` which counts the buffers it receives.
#[derive(Debug)]
pub struct TestSession {
    kind: MediaKind,
    bin: gst::Bin,
    sink: GhostPad,
    received: Arc<AtomicU64>,
    remotes: Mutex<HashMap<Handle, Remote>>,
}

#[derive(Debug)]
struct Remote {
    generator: gst::Bin,
    pad: GhostPad,
}

impl TestSession {
    /// Create a new test session bin.
    ///
    /// # Errors
    ///
    /// This can fail if the `fakesink` cannot be created.
    pub fn create(name: &str, kind: MediaKind) -> Result<Self> {
        trace!("create({name}, {kind})");

        let bin = gst::parse_bin_from_description(
            &format!(
                r#"
                name="{name}"

                fakesink
                    name=outgoing
                    sync=false
                    async=false
                    signal-handoffs=true
                "#
            ),
            false,
        )
        .context("could not parse test session bin")?;

        let outgoing = bin
            .by_name("outgoing")
            .context("unable to find outgoing fakesink")?;
        let received = Arc::new(AtomicU64::new(0));
        outgoing.connect("handoff", false, {
            let received = Arc::clone(&received);
            move |_| {
                received.fetch_add(1, Ordering::Relaxed);
                None
            }
        });

        let sink = GhostPad::with_target(
            Some("sink"),
            &outgoing
                .static_pad("sink")
                .context("fakesink has no sink pad")?,
        )
        .context("unable to create ghost pad for outgoing media")?;
        bin.add_pad(&sink)
            .context("unable to add sink ghost pad to test session")?;

        Ok(Self {
            kind,
            bin,
            sink,
            received,
            remotes: Mutex::new(HashMap::new()),
        })
    }

    /// Number of outgoing buffers received so far.
    #[must_use]
    pub fn received_buffers(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Let a remote participant start sending, which adds a src pad to the session.
    ///
    /// # Errors
    ///
    /// This fails if the handle is already sending or the generator cannot be created.
    pub fn add_remote(&self, handle: Handle) -> Result<gst::Pad> {
        let mut remotes = self.remotes.lock();
        if remotes.contains_key(&handle) {
            bail!("remote {handle} is already sending");
        }

        let description = match self.kind {
            MediaKind::Audio => {
                "audiotestsrc is-live=true wave=sine volume=0.1 ! audio/x-raw,rate=48000,channels=2 ! queue name=out"
            }
            MediaKind::Video => {
                "videotestsrc is-live=true pattern=ball ! video/x-raw,width=320,height=240,framerate=15/1 ! queue name=out"
            }
        };
        let generator = gst::parse_bin_from_description(description, false)
            .context("could not parse remote generator")?;
        generator.set_property("name", format!("remote-{handle}"));
        pads::add_ghost_pad(&generator, "out", "src")
            .context("unable to add ghost pad to remote generator")?;

        self.bin
            .add(&generator)
            .context("unable to add remote generator to session")?;

        let pad = GhostPad::with_target(
            Some(format!("{REMOTE_PAD_PREFIX}{handle}").as_str()),
            &generator
                .static_pad("out")
                .context("remote generator has no src pad")?,
        )
        .context("unable to create remote ghost pad")?;
        if self.bin.current_state() != gst::State::Null {
            pad.set_active(true)
                .context("unable to activate remote pad")?;
        }
        // emits `pad-added`
        self.bin
            .add_pad(&pad)
            .context("unable to add remote pad to session")?;
        generator
            .sync_state_with_parent()
            .context("unable to sync remote generator with session")?;

        remotes.insert(
            handle,
            Remote {
                generator,
                pad: pad.clone(),
            },
        );

        Ok(pad.upcast())
    }

    /// Let a remote participant stop sending, which unlinks and removes its src pad.
    ///
    /// # Errors
    ///
    /// This fails if the handle is not sending.
    pub fn remove_remote(&self, handle: Handle) -> Result<()> {
        let remote = self
            .remotes
            .lock()
            .remove(&handle)
            .with_context(|| format!("remote {handle} is not sending"))?;

        // stop the generator first so nothing is pushed into the unlinked pad
        pads::dispose(remote.generator.upcast_ref());
        // emits `unlinked` on the pad if something is linked to it
        self.bin
            .remove_pad(&remote.pad)
            .context("unable to remove remote pad from session")?;

        Ok(())
    }
}

impl MediaSession for TestSession {
    fn element(&self) -> gst::Element {
        self.bin.clone().upcast()
    }

    fn remote_handle(&self, pad: &gst::Pad) -> Option<Handle> {
        pad.name()
            .strip_prefix(REMOTE_PAD_PREFIX)
            .and_then(|handle| handle.parse().ok())
    }

    fn sink_pad(&self) -> Option<gst::Pad> {
        Some(self.sink.clone().upcast())
    }
}
