// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Local outgoing media of a content.

use anyhow::{bail, Context, Result};
use gst::{prelude::*, Bin, Element, ElementFactory, GhostPad, Pad, PadProbeReturn, PadProbeType};
use parking_lot::{Condvar, Mutex};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::broadcast;

use crate::{debug, pads, DeviceError, DeviceSettings, MediaKind, VolumeController};

mod audio;
mod video;

/// Upper bound for the switch-over handshake, a buffer is expected far earlier.
const SWITCH_TIMEOUT: Duration = Duration::from_millis(500);

const EVENTS_CAPACITY: usize = 16;

/// Notification of a [`SourceController`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceEvent {
    /// The real device has been connected (`true`) or replaced by silence (`false`).
    Enabled(bool),
    /// The device could not be activated. This is permanent for the controller.
    DeviceFailed(String),
}

/// Output connection point of a [`SourceController`].
///
/// Link [`OutputTap::pad`] to a consumer and hand the tap back to
/// [`SourceController::release_output_tap`] when done.
#[derive(Debug)]
pub struct OutputTap {
    id: u64,
    pad: GhostPad,
}

impl OutputTap {
    #[must_use]
    pub fn pad(&self) -> &GhostPad {
        &self.pad
    }
}

/// Elements of a device handed over by the kind specific builders.
struct Device {
    bin: Bin,
    /// volume element of the device chain if it has one
    gain: Option<Element>,
}

#[derive(Debug)]
struct ConnectedDevice {
    bin: Bin,
    switch_pad: Pad,
}

#[derive(Debug)]
struct TapBranch {
    tee_pad: Pad,
    queue: Element,
    ghost: GhostPad,
}

#[derive(Debug)]
struct SourceBin {
    bin: Bin,
    switch: Element,
    tee: Element,
    /// switch pad fed by the silence or black generator
    silence_pad: Pad,
    device: Option<ConnectedDevice>,
    taps: HashMap<u64, TapBranch>,
}

#[derive(Debug, Default)]
struct SourceState {
    bin: Option<SourceBin>,
    next_tap: u64,
    device_error: Option<String>,
}

/// Supplies outgoing media of one content, backed by a capture device or by a generator.
///
/// The generator (silence or black frames) is always linked to the switch while the controller's
/// bin exists. Enabling links the device to the switch and makes it the active input, disabling
/// goes back to the generator. Consumers attached through output taps stay linked all the time.
#[derive(Debug)]
pub struct SourceController {
    kind: MediaKind,
    name: String,
    parent: Bin,
    settings: Arc<DeviceSettings>,
    volume: VolumeController,
    state: Mutex<SourceState>,
    events: broadcast::Sender<SourceEvent>,
}

impl SourceController {
    /// Create a controller whose bin will be placed into `parent` once it is needed.
    pub fn new(
        kind: MediaKind,
        name: impl Into<String>,
        parent: &impl IsA<Bin>,
        settings: Arc<DeviceSettings>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Self {
            kind,
            name: name.into(),
            parent: parent.clone().upcast(),
            settings,
            volume: VolumeController::new(),
            state: Mutex::new(SourceState::default()),
            events,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive source notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.events.subscribe()
    }

    /// Gain of the capture device, only supported while an audio device is connected.
    #[must_use]
    pub fn volume(&self) -> &VolumeController {
        &self.volume
    }

    /// Return `true` if the controller's bin currently exists.
    #[must_use]
    pub fn has_bin(&self) -> bool {
        self.state.lock().bin.is_some()
    }

    #[must_use]
    pub fn tap_count(&self) -> usize {
        self.state.lock().bin.as_ref().map_or(0, |source| source.taps.len())
    }

    /// Return `true` if the real device feeds the switch.
    #[must_use]
    pub fn source_enabled(&self) -> bool {
        self.state
            .lock()
            .bin
            .as_ref()
            .map_or(false, |source| source.device.is_some())
    }

    /// The reason why the device could not be activated, if it failed.
    #[must_use]
    pub fn device_error(&self) -> Option<String> {
        self.state.lock().device_error.clone()
    }

    /// Request a new independent output of this source.
    ///
    /// # Errors
    ///
    /// This can fail if the controller's bin or the tap's elements cannot be created.
    pub fn request_output_tap(&self) -> Result<OutputTap> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let built = state.bin.is_none();
        if built {
            state.bin = Some(self.build_bin().context("unable to build source bin")?);
        }
        let Some(source) = state.bin.as_mut() else {
            bail!("{}: source bin vanished", self.name);
        };

        let id = state.next_tap;
        state.next_tap += 1;

        let tee_pad = match source.tee.request_pad_simple("src_%u") {
            Some(tee_pad) => tee_pad,
            None => {
                self.discard_unused_bin(state, built);
                bail!("{}: unable to request src pad from tee", self.name);
            }
        };

        let branch = (|| {
            let queue = pads::make("queue", &format!("tap-queue-{id}"))?;
            source
                .bin
                .add(&queue)
                .context("unable to add tap queue to source bin")?;
            tee_pad
                .link(&queue.static_pad("sink").context("queue has no sink pad")?)
                .context("unable to link tee with tap queue")?;

            let ghost = GhostPad::with_target(
                Some(format!("tap_{id}").as_str()),
                &queue.static_pad("src").context("queue has no src pad")?,
            )
            .context("unable to create ghost pad for tap")?;
            if source.bin.current_state() != gst::State::Null {
                ghost
                    .set_active(true)
                    .context("unable to activate tap ghost pad")?;
            }
            source
                .bin
                .add_pad(&ghost)
                .context("unable to add tap ghost pad to source bin")?;
            queue
                .sync_state_with_parent()
                .context("unable to sync tap queue with parent")?;

            Ok::<_, anyhow::Error>(TapBranch {
                tee_pad: tee_pad.clone(),
                queue,
                ghost,
            })
        })();

        let branch = match branch {
            Ok(branch) => branch,
            Err(error) => {
                source.tee.release_request_pad(&tee_pad);
                self.discard_unused_bin(state, built);
                return Err(error);
            }
        };

        debug!("{}: requested output tap {id}", self.name);
        let pad = branch.ghost.clone();
        source.taps.insert(id, branch);

        Ok(OutputTap { id, pad })
    }

    /// Release a tap. The bin goes away with the last tap unless a device is connected.
    ///
    /// # Errors
    ///
    /// This can fail if the tap does not belong to this controller.
    pub fn release_output_tap(&self, tap: OutputTap) -> Result<()> {
        let mut state = self.state.lock();
        let Some(source) = state.bin.as_mut() else {
            bail!("{}: no source bin to release tap {} from", self.name, tap.id);
        };
        let owned = source
            .taps
            .get(&tap.id)
            .map_or(false, |branch| branch.ghost == tap.pad);
        if !owned {
            bail!("{}: output tap {} belongs to another source", self.name, tap.id);
        }
        let branch = source
            .taps
            .remove(&tap.id)
            .with_context(|| format!("{}: unknown output tap {}", self.name, tap.id))?;

        // stop the queue before its consumer goes away
        source.tee.release_request_pad(&branch.tee_pad);
        pads::dispose(&branch.queue);
        if let Some(peer) = branch.ghost.peer() {
            if let Err(error) = branch.ghost.unlink(&peer) {
                warn!("{}: unable to unlink tap {}, error: {error}", self.name, tap.id);
            }
        }
        source
            .bin
            .remove_pad(&branch.ghost)
            .context("unable to remove tap ghost pad")?;
        debug!("{}: released output tap {}", self.name, tap.id);

        if source.taps.is_empty() && source.device.is_none() {
            if let Some(source) = state.bin.take() {
                self.teardown(source);
            }
        }

        Ok(())
    }

    /// Tear down a bin built for a tap request that failed.
    fn discard_unused_bin(&self, state: &mut SourceState, built: bool) {
        let unused = state
            .bin
            .as_ref()
            .map_or(false, |source| source.taps.is_empty() && source.device.is_none());
        if built && unused {
            if let Some(source) = state.bin.take() {
                debug!("{}: tap request failed, dropping the fresh source bin", self.name);
                self.teardown(source);
            }
        }
    }

    /// Switch between the real device and the generator.
    ///
    /// Returns whether the device is enabled afterwards. A device which cannot be activated is
    /// not retried, the controller stays disabled.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        if enabled {
            self.enable()
        } else {
            self.disable();
            false
        }
    }

    fn enable(&self) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state
            .bin
            .as_ref()
            .map_or(false, |source| source.device.is_some())
        {
            return true;
        }

        if let Some(error) = &state.device_error {
            debug!("{}: not retrying failed device: {error}", self.name);
            return false;
        }

        if state.bin.is_none() {
            match self.build_bin() {
                Ok(source) => state.bin = Some(source),
                Err(error) => {
                    error!("{}: unable to build source bin, error: {error:?}", self.name);
                    return false;
                }
            }
        }
        let Some(source) = state.bin.as_mut() else {
            return false;
        };

        match self.connect_device(source) {
            Ok(gain) => {
                info!("{}: {} device enabled", self.name, self.kind);
                self.volume.set_element(gain);
                debug::debug_dot(&source.bin, "source-enabled");
                let _ = self.events.send(SourceEvent::Enabled(true));
                true
            }
            Err(error) => {
                warn!("{}: {} device unavailable: {error}", self.name, self.kind);
                let message = error.to_string();
                state.device_error = Some(message.clone());
                let _ = self.events.send(SourceEvent::DeviceFailed(message));

                if source.taps.is_empty() {
                    if let Some(source) = state.bin.take() {
                        self.teardown(source);
                    }
                }
                false
            }
        }
    }

    fn disable(&self) {
        let mut state = self.state.lock();
        let Some(source) = state.bin.as_mut() else {
            return;
        };
        let Some(device) = source.device.take() else {
            return;
        };

        let flowing = source.bin.current_state() == gst::State::Playing;
        switch_over(&source.switch, &source.silence_pad, flowing);

        self.volume.set_element(None);
        disconnect_device(source, &device);
        info!("{}: {} device disabled", self.name, self.kind);
        let _ = self.events.send(SourceEvent::Enabled(false));

        if source.taps.is_empty() {
            if let Some(source) = state.bin.take() {
                self.teardown(source);
            }
        }
    }

    fn device_factory(&self) -> &str {
        match self.kind {
            MediaKind::Audio => &self.settings.audio_source,
            MediaKind::Video => &self.settings.video_source,
        }
    }

    /// Build, open and link the device. Returns the device's gain element.
    fn connect_device(&self, source: &mut SourceBin) -> Result<Option<Element>, DeviceError> {
        let device = match self.kind {
            MediaKind::Audio => audio::device(&self.name, &self.settings)?,
            MediaKind::Video => video::device(&self.name, &self.settings)?,
        };

        if device.bin.set_state(gst::State::Ready).is_err() {
            let _ = device.bin.set_state(gst::State::Null);
            return Err(DeviceError::NotReady(self.device_factory().to_owned()));
        }

        source
            .bin
            .add(&device.bin)
            .context("unable to add device to source bin")?;

        let switch_pad = match link_device(source, &device.bin) {
            Ok(switch_pad) => switch_pad,
            Err(error) => {
                pads::dispose(device.bin.upcast_ref());
                return Err(error.into());
            }
        };

        source.device = Some(ConnectedDevice {
            bin: device.bin,
            switch_pad,
        });

        Ok(device.gain)
    }

    fn build_bin(&self) -> Result<SourceBin> {
        trace!("{}: building {} source bin", self.name, self.kind);

        let bin = Bin::new(Some(format!("{}-source", self.name).as_str()));

        let generator = match self.kind {
            MediaKind::Audio => audio::silence(&self.settings)?,
            MediaKind::Video => video::black(&self.settings)?,
        };

        let switch = pads::make("input-selector", "switch")?;
        let tee = ElementFactory::make("tee")
            .name("fanout")
            .property("allow-not-linked", true)
            .build()
            .context("unable to build tee")?;
        let discard_queue = pads::make("queue", "discard-queue")?;
        let discard = ElementFactory::make("fakesink")
            .name("discard")
            .property("sync", false)
            .property("async", false)
            .build()
            .context("unable to build fakesink")?;

        let mut elements: Vec<&Element> = generator.iter().collect();
        elements.extend([&switch, &tee, &discard_queue, &discard]);
        bin.add_many(&elements)
            .context("unable to add generator, switch, tee and discard to source bin")?;

        Element::link_many(&generator.iter().collect::<Vec<_>>())
            .context("unable to link generator")?;
        let generator_src = generator
            .last()
            .and_then(|last| last.static_pad("src"))
            .context("generator has no src pad")?;
        let silence_pad = switch
            .request_pad_simple("sink_%u")
            .context("unable to request sink pad for switch")?;
        generator_src
            .link(&silence_pad)
            .context("unable to link generator with switch")?;
        switch.set_property("active-pad", &silence_pad);

        Element::link_many(&[&switch, &tee, &discard_queue, &discard])
            .context("unable to link switch, tee, queue and fakesink")?;

        self.parent
            .add(&bin)
            .context("unable to add source bin to parent")?;
        if let Err(error) = bin.sync_state_with_parent() {
            pads::dispose(bin.upcast_ref());
            return Err(anyhow::Error::from(error).context("unable to sync source bin with parent"));
        }

        Ok(SourceBin {
            bin,
            switch,
            tee,
            silence_pad,
            device: None,
            taps: HashMap::new(),
        })
    }

    fn teardown(&self, source: SourceBin) {
        debug!("{}: tearing down source bin", self.name);
        if let Some(device) = &source.device {
            self.volume.set_element(None);
            disconnect_device(&source, device);
        }
        pads::dispose(source.bin.upcast_ref());
    }
}

impl Drop for SourceController {
    fn drop(&mut self) {
        if let Some(source) = self.state.get_mut().bin.take() {
            self.teardown(source);
        }
    }
}

fn link_device(source: &SourceBin, device: &Bin) -> Result<Pad> {
    let switch_pad = source
        .switch
        .request_pad_simple("sink_%u")
        .context("unable to request sink pad for switch")?;

    let linked = (|| {
        device
            .static_pad("src")
            .context("device has no src pad")?
            .link(&switch_pad)
            .context("unable to link device with switch")?;
        device
            .sync_state_with_parent()
            .context("unable to sync device with source bin")
    })();

    if let Err(error) = linked {
        source.switch.release_request_pad(&switch_pad);
        return Err(error);
    }

    source.switch.set_property("active-pad", &switch_pad);

    Ok(switch_pad)
}

/// Make the silence pad the active input and wait until data passes it.
///
/// The first buffer reaching the silence pad is held back by a blocking probe until it has been
/// seen, then let through. After that no buffer of the previous input can pass the switch anymore.
fn switch_over(switch: &Element, silence_pad: &Pad, flowing: bool) {
    switch.set_property("active-pad", silence_pad);
    if !flowing {
        return;
    }

    let seen = Arc::new((Mutex::new(false), Condvar::new()));
    let probe = silence_pad.add_probe(PadProbeType::BLOCK | PadProbeType::BUFFER, {
        let seen = Arc::clone(&seen);
        move |_, _| {
            let (lock, condvar) = &*seen;
            *lock.lock() = true;
            condvar.notify_all();
            PadProbeReturn::Remove
        }
    });

    let (lock, condvar) = &*seen;
    let mut passed = lock.lock();
    if !*passed {
        condvar.wait_for(&mut passed, SWITCH_TIMEOUT);
    }

    if *passed {
        trace!("switch passes silence now");
    } else {
        warn!(
            "no data on '{}' within {}ms, switching without handshake",
            debug::name(silence_pad),
            SWITCH_TIMEOUT.as_millis()
        );
        if let Some(probe) = probe {
            silence_pad.remove_probe(probe);
        }
    }
}

fn disconnect_device(source: &SourceBin, device: &ConnectedDevice) {
    if let Err(error) = device.bin.set_state(gst::State::Null) {
        warn!("unable to stop device, error: {error}");
    }
    if let Some(src) = device.bin.static_pad("src") {
        if let Err(error) = src.unlink(&device.switch_pad) {
            warn!("unable to unlink device from switch, error: {error}");
        }
    }
    source.switch.release_request_pad(&device.switch_pad);
    if let Err(error) = source.bin.remove(&device.bin) {
        warn!("unable to remove device from source bin, error: {error}");
    }
}
