// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use callmedia::{
    Contact, DeviceSettings, Handle, MediaKind, MediaSession, OutputTap, SinkController,
    SinkManager, SourceController, VolumeController,
};
use gst::prelude::*;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, watch};

use crate::CallEvent;

pub type ContentId = u32;

/// What the signaling layer knows about a new content.
pub struct ContentDescriptor<C: Contact> {
    pub id: ContentId,
    pub kind: MediaKind,
    /// Media layer session element of the content.
    pub session: Arc<dyn MediaSession>,
    /// Current members of the content.
    pub members: watch::Receiver<Vec<C>>,
}

/// Wires one content's session into the call pipeline.
///
/// Remote media goes through a [`SinkManager`], local media comes out of a [`SourceController`]
/// whose output tap feeds the session while sending.
pub struct ContentHandler<C: Contact> {
    id: ContentId,
    kind: MediaKind,
    pipeline: gst::Pipeline,
    session: Arc<dyn MediaSession>,
    source: SourceController,
    sinks: SinkManager<C>,
    tap: Option<OutputTap>,
    sending: bool,
    remote_sending: HashMap<Handle, bool>,
    events: mpsc::UnboundedSender<CallEvent<C>>,
    released: bool,
}

impl<C: Contact> ContentHandler<C> {
    pub(crate) fn create(
        descriptor: ContentDescriptor<C>,
        pipeline: &gst::Pipeline,
        settings: &Arc<DeviceSettings>,
        runtime: &tokio::runtime::Handle,
        events: mpsc::UnboundedSender<CallEvent<C>>,
    ) -> Result<Self> {
        let ContentDescriptor {
            id,
            kind,
            session,
            members,
        } = descriptor;
        let name = format!("content-{id}");
        log::debug!("creating {kind} {name}");

        let element = session.element();
        pipeline
            .add(&element)
            .context("unable to add session to pipeline")?;
        element
            .sync_state_with_parent()
            .context("unable to sync session with pipeline")?;

        let (sink_events, mut sink_events_rx) = mpsc::unbounded_channel();
        let (sinks, dispatcher) = SinkManager::new(
            kind,
            name.as_str(),
            pipeline,
            Arc::clone(settings),
            members,
            sink_events,
        );
        sinks.watch(&session);

        runtime.spawn(dispatcher.run());
        runtime.spawn({
            let events = events.clone();
            async move {
                while let Some(event) = sink_events_rx.recv().await {
                    if events.send(CallEvent::Sink { content: id, event }).is_err() {
                        break;
                    }
                }
            }
        });

        let source = SourceController::new(kind, name, pipeline, Arc::clone(settings));

        Ok(Self {
            id,
            kind,
            pipeline: pipeline.clone(),
            session,
            source,
            sinks,
            tap: None,
            sending: false,
            remote_sending: HashMap::new(),
            events,
            released: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> ContentId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    #[must_use]
    pub fn is_remote_sending(&self, handle: Handle) -> bool {
        self.remote_sending.get(&handle).copied().unwrap_or(false)
    }

    /// Gain of the local capture device.
    #[must_use]
    pub fn input_volume(&self) -> &VolumeController {
        self.source.volume()
    }

    /// Volume of the remote participants' mixed audio.
    #[must_use]
    pub fn output_volume(&self) -> &VolumeController {
        self.sinks.output_volume()
    }

    #[must_use]
    pub fn sink_for(&self, handle: Handle) -> Option<Arc<SinkController>> {
        self.sinks.sink_for(handle)
    }

    /// Start or stop sending the local device. Returns whether the device is sent afterwards.
    ///
    /// While not sending the session keeps receiving silence or black frames.
    pub fn set_sending(&mut self, sending: bool) -> Result<bool> {
        if sending == self.sending {
            return Ok(sending);
        }

        if sending {
            self.link_tap()?;
            if !self.source.set_enabled(true) {
                let reason = self
                    .source
                    .device_error()
                    .unwrap_or_else(|| "device unavailable".to_owned());
                log::warn!("content {}: not sending, {reason}", self.id);
                self.emit(CallEvent::DeviceUnavailable {
                    content: self.id,
                    kind: self.kind,
                    reason,
                });
                return Ok(false);
            }
        } else {
            self.source.set_enabled(false);
        }

        self.sending = sending;
        self.emit(CallEvent::LocalSendingChanged {
            content: self.id,
            sending,
        });

        Ok(sending)
    }

    /// Record whether the remote `handle` sends on this content.
    pub fn set_remote_sending(&mut self, handle: Handle, sending: bool) {
        let previous = self.remote_sending.insert(handle, sending);
        if previous.unwrap_or(false) != sending {
            self.emit(CallEvent::RemoteSendingChanged {
                content: self.id,
                handle,
                sending,
            });
        }
    }

    fn link_tap(&mut self) -> Result<()> {
        if self.tap.is_some() {
            return Ok(());
        }

        let sink_pad = self
            .session
            .sink_pad()
            .context("session takes no local media")?;
        let tap = self.source.request_output_tap()?;
        if let Err(error) = tap.pad().link(&sink_pad) {
            self.source.release_output_tap(tap)?;
            return Err(error).context("unable to link source with session");
        }
        self.tap = Some(tap);

        Ok(())
    }

    /// Take the content out of the pipeline.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        log::debug!("releasing content {}", self.id);

        // a stopped session no longer pushes into the sinks being unlinked
        let element = self.session.element();
        if let Err(error) = element.set_state(gst::State::Null) {
            log::warn!("content {}: unable to stop session: {error}", self.id);
        }

        self.sinks.release();

        self.source.set_enabled(false);
        if let Some(tap) = self.tap.take() {
            if let Err(error) = self.source.release_output_tap(tap) {
                log::warn!("content {}: unable to release output tap: {error:?}", self.id);
            }
        }

        if let Err(error) = self.pipeline.remove(&element) {
            log::warn!("content {}: unable to remove session: {error}", self.id);
        }
    }

    fn emit(&self, event: CallEvent<C>) {
        if self.events.send(event).is_err() {
            log::trace!("content {}: nobody listens to call events", self.id);
        }
    }
}

impl<C: Contact> Drop for ContentHandler<C> {
    fn drop(&mut self) {
        self.release();
    }
}
