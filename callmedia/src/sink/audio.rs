// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use gst::{prelude::*, Bin, Element, GhostPad, Pad, PadProbeReturn, PadProbeType};

use crate::{debug, pads, DeviceError, DeviceSettings, Handle};

/// Mixer and speaker shared by all audio sinks of a content.
#[derive(Debug)]
pub(crate) struct AudioOutput {
    bin: Bin,
    mixer: Element,
    volume: Element,
}

impl AudioOutput {
    pub(crate) fn create(
        name: &str,
        parent: &Bin,
        settings: &DeviceSettings,
    ) -> Result<Self, DeviceError> {
        let speaker = pads::make_device(
            &settings.audio_sink,
            "speaker",
            settings.audio_sink_device.as_deref(),
        )?;

        let bin = Bin::new(Some(format!("{name}-output").as_str()));
        let mixer = pads::make("audiomixer", "mixer")?;
        let convert = pads::make("audioconvert", "convert")?;
        let resample = pads::make("audioresample", "resample")?;
        let volume = pads::make("volume", "volume")?;

        let chain = [&mixer, &convert, &resample, &volume, &speaker];
        bin.add_many(&chain)
            .context("unable to add 'audiomixer', 'audioconvert', 'audioresample', 'volume' and speaker to bin")?;
        Element::link_many(&chain)
            .context("unable to link 'audiomixer', 'audioconvert', 'audioresample', 'volume' and speaker")?;

        if bin.set_state(gst::State::Ready).is_err() {
            let _ = bin.set_state(gst::State::Null);
            return Err(DeviceError::NotReady(settings.audio_sink.clone()));
        }

        if let Err(error) = parent.add(&bin) {
            let _ = bin.set_state(gst::State::Null);
            return Err(DeviceError::Pipeline(
                anyhow::Error::from(error).context("unable to add audio output to parent"),
            ));
        }
        if let Err(error) = bin.sync_state_with_parent() {
            pads::dispose(bin.upcast_ref());
            return Err(DeviceError::Pipeline(
                anyhow::Error::from(error).context("unable to sync audio output with parent"),
            ));
        }

        debug!("{name}: audio output created");

        Ok(Self { bin, mixer, volume })
    }

    pub(crate) fn volume(&self) -> &Element {
        &self.volume
    }

    /// Link `src` into a new mixer input.
    pub(crate) fn link_src(&self, src: &impl IsA<Pad>) -> Result<GhostPad> {
        let requested_pad = self
            .mixer
            .request_pad_simple("sink_%u")
            .context("unable to request 'sink' pad for 'audiomixer'")?;

        let ghost_pad = GhostPad::with_target(None, &requested_pad)
            .context("unable to create 'GhostPad' for mixer input")?;
        if self.bin.current_state() != gst::State::Null {
            ghost_pad
                .set_active(true)
                .context("unable to activate mixer ghost pad")?;
        }

        self.bin
            .add_pad(&ghost_pad)
            .context("unable to add 'ghost_pad' to 'bin'")?;

        src.link(&ghost_pad)
            .context("unable to link src with mixer input")?;

        Ok(ghost_pad)
    }

    /// Undo [`AudioOutput::link_src`].
    pub(crate) fn release_src(&self, ghost_pad: &GhostPad) {
        let requested_pad = ghost_pad.target();

        if let Some(peer) = ghost_pad.peer() {
            if let Err(error) = peer.unlink(ghost_pad) {
                warn!("unable to unlink mixer input, error: {error}");
            }
        }
        if let Err(error) = self.bin.remove_pad(ghost_pad) {
            warn!("unable to remove mixer ghost pad, error: {error}");
        }
        if let Some(requested_pad) = requested_pad {
            self.mixer.release_request_pad(&requested_pad);
        }
    }

    pub(crate) fn dispose(self) {
        debug!("{}: disposing audio output", debug::name(&self.bin));
        pads::retire(self.bin.upcast_ref());
    }
}

/// Arena slot holding the shared [`AudioOutput`] with an explicit reference count.
#[derive(Debug, Default)]
pub(crate) struct MixerSlot {
    refs: usize,
    output: Option<AudioOutput>,
    error: Option<String>,
}

impl MixerSlot {
    /// Take a reference, creating the output with the first one.
    ///
    /// A failed creation is remembered and not retried.
    pub(crate) fn acquire(
        &mut self,
        create: impl FnOnce() -> Result<AudioOutput, DeviceError>,
    ) -> Result<&AudioOutput, String> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        if self.output.is_none() {
            match create() {
                Ok(output) => self.output = Some(output),
                Err(error) => {
                    let error = error.to_string();
                    self.error = Some(error.clone());
                    return Err(error);
                }
            }
        }

        self.refs += 1;
        self.output.as_ref().ok_or_else(|| "audio output vanished".to_owned())
    }

    /// Drop a reference. Returns the output when the last reference is gone.
    pub(crate) fn release(&mut self) -> Option<AudioOutput> {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 {
            self.output.take()
        } else {
            None
        }
    }

    /// Return `true` if creating the output failed before.
    pub(crate) fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn output(&self) -> Option<&AudioOutput> {
        self.output.as_ref()
    }

    pub(crate) fn refs(&self) -> usize {
        self.refs
    }
}

/// Remote participant's audio mixed into the content's shared output.
#[derive(Debug)]
pub struct AudioSinkController {
    handle: Handle,
    bin: Bin,
    mixer_input: GhostPad,
}

impl AudioSinkController {
    pub(crate) fn create(
        handle: Handle,
        pad: &Pad,
        parent: &Bin,
        output: &AudioOutput,
    ) -> Result<Self> {
        trace!("create audio sink for {handle}, pad {}", debug::name(pad));

        let bin = gst::parse_bin_from_description(
            &format!(
                r#"
                name="remote-audio-{handle}"

                queue
                    name=queue
                ! audioconvert
                ! audioresample
                    name=resample
                "#
            ),
            false,
        )
        .context("could not parse remote audio bin")?;
        let sink = pads::add_ghost_pad(&bin, "queue", "sink")
            .context("unable to add GhostPad for remote audio sink")?;
        let src = pads::add_ghost_pad(&bin, "resample", "src")
            .context("unable to add GhostPad for remote audio src")?;

        parent
            .add(&bin)
            .context("unable to add remote audio bin to parent")?;

        let mixer_input = match output.link_src(&src) {
            Ok(mixer_input) => mixer_input,
            Err(error) => {
                pads::dispose(bin.upcast_ref());
                return Err(error.context("unable to link remote audio into mixer"));
            }
        };

        let linked = pad
            .link(&sink)
            .context("unable to link remote pad with remote audio bin")
            .and_then(|_| {
                bin.sync_state_with_parent()
                    .context("unable to sync remote audio bin with parent")
            });
        if let Err(error) = linked {
            output.release_src(&mixer_input);
            pads::dispose(bin.upcast_ref());
            return Err(error);
        }

        Ok(Self {
            handle,
            bin,
            mixer_input,
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

    /// Unlink from the mixer and remove the bin.
    pub(crate) fn unlink(&self, output: Option<&AudioOutput>) {
        debug!("unlinking audio sink for {}", self.handle);
        // data still queued in the bin must not hit the unlinked pad
        if let Some(src) = self.mixer_input.peer() {
            src.add_probe(PadProbeType::BUFFER | PadProbeType::BUFFER_LIST, |_, _| {
                PadProbeReturn::Drop
            });
        }
        if let Some(output) = output {
            output.release_src(&self.mixer_input);
        }
        pads::retire(self.bin.upcast_ref());
    }
}
