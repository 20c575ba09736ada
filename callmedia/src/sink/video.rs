// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{bail, Context, Result};
use gst::{prelude::*, Bin, Element, Pad};
use parking_lot::Mutex;

use crate::{debug, pads, Handle};

/// Remote participant's video, fanned out to any number of displays.
///
/// Without a display the frames are consumed by a `fakesink` so the session keeps flowing.
#[derive(Debug)]
pub struct VideoSinkController {
    handle: Handle,
    bin: Bin,
    fanout: Element,
    state: Mutex<DisplayState>,
}

#[derive(Debug, Default)]
struct DisplayState {
    displays: Vec<Display>,
    next_display: u32,
    unlinked: bool,
}

#[derive(Debug)]
struct Display {
    element: Element,
    queue: Element,
    tee_pad: Pad,
}

impl VideoSinkController {
    pub(crate) fn create(handle: Handle, pad: &Pad, parent: &Bin) -> Result<Self> {
        trace!("create video sink for {handle}, pad {}", debug::name(pad));

        let bin = gst::parse_bin_from_description(
            &format!(
                r#"
                name="remote-video-{handle}"

                queue
                    name=queue
                ! videoconvert
                ! videoscale
                ! tee
                    name=fanout
                    allow-not-linked=true
                ! queue
                    leaky=downstream
                ! fakesink
                    name=discard
                    sync=false
                    async=false
                "#
            ),
            false,
        )
        .context("could not parse remote video bin")?;
        let fanout = bin
            .by_name("fanout")
            .context("unable to find video fanout")?;
        let sink = pads::add_ghost_pad(&bin, "queue", "sink")
            .context("unable to add GhostPad for remote video sink")?;

        parent
            .add(&bin)
            .context("unable to add remote video bin to parent")?;
        let linked = pad
            .link(&sink)
            .context("unable to link remote pad with remote video bin")
            .and_then(|_| {
                bin.sync_state_with_parent()
                    .context("unable to sync remote video bin with parent")
            });
        if let Err(error) = linked {
            pads::dispose(bin.upcast_ref());
            return Err(error);
        }

        Ok(Self {
            handle,
            bin,
            fanout,
            state: Mutex::new(DisplayState::default()),
        })
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn bin(&self) -> &Bin {
        &self.bin
    }

    /// Show the decoded video on `display`, a video sink element without a parent.
    ///
    /// # Errors
    ///
    /// This fails if the sink is already gone, the display is attached already or it cannot be
    /// linked.
    pub fn attach_display(&self, display: &Element) -> Result<()> {
        let mut state = self.state.lock();
        if state.unlinked {
            bail!("video sink for {} is gone", self.handle);
        }
        if state.displays.iter().any(|d| &d.element == display) {
            bail!("display {} is attached already", debug::name(display));
        }

        let queue = pads::make("queue", &format!("display-queue-{}", state.next_display))?;
        state.next_display += 1;
        queue.set_property_from_str("leaky", "downstream");

        self.bin
            .add(&queue)
            .context("unable to add display queue to remote video bin")?;
        if let Err(error) = self.bin.add(display) {
            pads::dispose(&queue);
            return Err(
                anyhow::Error::from(error).context("unable to add display to remote video bin")
            );
        }

        let linked = self
            .fanout
            .request_pad_simple("src_%u")
            .context("unable to request 'src' pad for 'tee'")
            .and_then(|tee_pad| match link_display(&tee_pad, &queue, display) {
                Ok(()) => Ok(tee_pad),
                Err(error) => {
                    if let Some(peer) = tee_pad.peer() {
                        let _ = tee_pad.unlink(&peer);
                    }
                    self.fanout.release_request_pad(&tee_pad);
                    Err(error)
                }
            });
        let tee_pad = match linked {
            Ok(tee_pad) => tee_pad,
            Err(error) => {
                pads::dispose(&queue);
                pads::dispose(display);
                return Err(error);
            }
        };

        debug!("attached display {} to {}", debug::name(display), self.handle);
        state.displays.push(Display {
            element: display.clone(),
            queue,
            tee_pad,
        });

        Ok(())
    }

    /// Stop showing the video on `display` and hand it back without a parent.
    ///
    /// # Errors
    ///
    /// This fails if `display` is not attached.
    pub fn detach_display(&self, display: &Element) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .displays
            .iter()
            .position(|d| &d.element == display)
            .with_context(|| format!("display {} is not attached", debug::name(display)))?;
        let display = state.displays.remove(index);
        self.remove_display(display);

        Ok(())
    }

    #[must_use]
    pub fn display_count(&self) -> usize {
        self.state.lock().displays.len()
    }

    fn remove_display(&self, display: Display) {
        if let Some(peer) = display.tee_pad.peer() {
            if let Err(error) = display.tee_pad.unlink(&peer) {
                warn!("unable to unlink display queue, error: {error}");
            }
        }
        self.fanout.release_request_pad(&display.tee_pad);
        pads::dispose(&display.queue);
        pads::dispose(&display.element);
    }

    /// Drop all displays and remove the bin.
    pub(crate) fn unlink(&self) {
        debug!("unlinking video sink for {}", self.handle);

        let displays = {
            let mut state = self.state.lock();
            state.unlinked = true;
            std::mem::take(&mut state.displays)
        };
        for display in displays {
            self.remove_display(display);
        }

        pads::retire(self.bin.upcast_ref());
    }
}

fn link_display(tee_pad: &Pad, queue: &Element, display: &Element) -> Result<()> {
    queue
        .link(display)
        .context("unable to link display queue with display")?;
    let queue_sink = queue
        .static_pad("sink")
        .context("queue has no sink pad")?;
    tee_pad
        .link(&queue_sink)
        .context("unable to link tee with display queue")?;

    queue
        .sync_state_with_parent()
        .context("unable to sync display queue with parent")?;
    display
        .sync_state_with_parent()
        .context("unable to sync display with parent")?;

    Ok(())
}
