// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use callmedia::{
    debug, Contact, DeviceSettings, Handle, MediaKind, SinkController, SinkEvent,
    VolumeController,
};
use gst::{glib, prelude::*};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::mpsc;

use crate::{
    CallError, CallState, ContentDescriptor, ContentHandler, ContentId, EndReason,
};

/// Notification for the user interface.
#[derive(Debug)]
pub enum CallEvent<C> {
    StateChanged(CallState),
    ContentAdded {
        id: ContentId,
        kind: MediaKind,
    },
    ContentRemoved {
        id: ContentId,
        kind: MediaKind,
    },
    LocalSendingChanged {
        content: ContentId,
        sending: bool,
    },
    RemoteSendingChanged {
        content: ContentId,
        handle: Handle,
        sending: bool,
    },
    /// A remote participant's media appeared or went away.
    Sink {
        content: ContentId,
        event: SinkEvent<C>,
    },
    /// The local device of a content could not be used.
    DeviceUnavailable {
        content: ContentId,
        kind: MediaKind,
        reason: String,
    },
    /// An element of the pipeline reported an error.
    MediaError(String),
    /// Sent once as the last event of a call.
    Ended(EndReason),
}

/// Media side of one call.
///
/// Owns the call pipeline (playing from the start) and one [`ContentHandler`] per content. The
/// signaling layer drives it through the `on_*` methods, the user interface through the commands
/// and the [`CallEvent`] receiver returned by [`CallChannel::new`].
pub struct CallChannel<C: Contact> {
    name: String,
    pipeline: gst::Pipeline,
    settings: Arc<DeviceSettings>,
    runtime: tokio::runtime::Handle,
    state: CallState,
    contents: BTreeMap<ContentId, ContentHandler<C>>,
    events: mpsc::UnboundedSender<CallEvent<C>>,
    bus_watch: Option<glib::SourceId>,
}

impl<C: Contact> CallChannel<C> {
    /// Create a call channel. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// This fails outside of a tokio runtime or if the pipeline does not start.
    pub fn new(
        name: &str,
        settings: Arc<DeviceSettings>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CallEvent<C>>)> {
        let runtime =
            tokio::runtime::Handle::try_current().context("call channel needs a tokio runtime")?;
        let (events, receiver) = mpsc::unbounded_channel();

        let pipeline = gst::Pipeline::new(Some(name));
        let bus_watch = watch_bus(&pipeline, events.clone())?;
        pipeline
            .set_state(gst::State::Playing)
            .context("unable to start call pipeline")?;
        log::info!("call {name} created");

        Ok((
            Self {
                name: name.to_owned(),
                pipeline,
                settings,
                runtime,
                state: CallState::Connecting,
                contents: BTreeMap::new(),
                events,
                bus_watch: Some(bus_watch),
            },
            receiver,
        ))
    }

    #[must_use]
    pub fn state(&self) -> &CallState {
        &self.state
    }

    #[must_use]
    pub fn pipeline(&self) -> &gst::Pipeline {
        &self.pipeline
    }

    /// Ids of the contents of the given kind.
    #[must_use]
    pub fn contents(&self, kind: MediaKind) -> Vec<ContentId> {
        self.contents
            .values()
            .filter(|content| content.kind() == kind)
            .map(ContentHandler::id)
            .collect()
    }

    #[must_use]
    pub fn content(&self, id: ContentId) -> Option<&ContentHandler<C>> {
        self.contents.get(&id)
    }

    pub fn on_state_changed(&mut self, state: CallState) -> Result<(), CallError> {
        if state == self.state {
            return Ok(());
        }

        match self.state.clone().transition(state)? {
            CallState::Ended(reason) => self.end(reason),
            state => {
                log::info!("call {}: {} -> {state}", self.name, self.state);
                self.state = state.clone();
                self.emit(CallEvent::StateChanged(state));
            }
        }

        Ok(())
    }

    pub fn on_content_added(&mut self, descriptor: ContentDescriptor<C>) -> Result<(), CallError> {
        self.ensure_running()?;
        let id = descriptor.id;
        let kind = descriptor.kind;
        if self.contents.contains_key(&id) {
            return Err(CallError::DuplicateContent(id));
        }

        let content = ContentHandler::create(
            descriptor,
            &self.pipeline,
            &self.settings,
            &self.runtime,
            self.events.clone(),
        )?;
        self.contents.insert(id, content);
        debug::debug_dot(&self.pipeline, &format!("content-{id}-added"));

        self.emit(CallEvent::ContentAdded { id, kind });

        Ok(())
    }

    pub fn on_content_removed(&mut self, id: ContentId) -> Result<(), CallError> {
        let mut content = self
            .contents
            .remove(&id)
            .ok_or(CallError::UnknownContent(id))?;
        content.release();
        self.emit(CallEvent::ContentRemoved {
            id,
            kind: content.kind(),
        });

        Ok(())
    }

    pub fn on_remote_sending_changed(
        &mut self,
        id: ContentId,
        handle: Handle,
        sending: bool,
    ) -> Result<(), CallError> {
        self.content_mut(id)?.set_remote_sending(handle, sending);
        Ok(())
    }

    /// The signaling channel is gone.
    pub fn on_invalidated(&mut self, reason: &str) {
        log::warn!("call {} invalidated: {reason}", self.name);
        self.end(EndReason::Invalidated(reason.to_owned()));
    }

    /// Start or stop sending on a content. Returns whether the content sends afterwards.
    pub fn set_sending(&mut self, id: ContentId, sending: bool) -> Result<bool, CallError> {
        self.ensure_running()?;
        Ok(self.content_mut(id)?.set_sending(sending)?)
    }

    pub fn hangup(&mut self) {
        self.end(EndReason::LocalHangup);
    }

    #[must_use]
    pub fn input_volume(&self, id: ContentId) -> Option<&VolumeController> {
        self.contents.get(&id).map(ContentHandler::input_volume)
    }

    #[must_use]
    pub fn output_volume(&self, id: ContentId) -> Option<&VolumeController> {
        self.contents.get(&id).map(ContentHandler::output_volume)
    }

    #[must_use]
    pub fn sink_for(&self, id: ContentId, handle: Handle) -> Option<Arc<SinkController>> {
        self.contents.get(&id)?.sink_for(handle)
    }

    fn ensure_running(&self) -> Result<(), CallError> {
        if self.state.is_ended() {
            Err(CallError::Ended)
        } else {
            Ok(())
        }
    }

    fn content_mut(&mut self, id: ContentId) -> Result<&mut ContentHandler<C>, CallError> {
        self.ensure_running()?;
        self.contents
            .get_mut(&id)
            .ok_or(CallError::UnknownContent(id))
    }

    fn end(&mut self, reason: EndReason) {
        if self.state.is_ended() {
            return;
        }
        log::info!("call {} ended, {reason}", self.name);

        for (_, mut content) in std::mem::take(&mut self.contents) {
            content.release();
        }
        if let Err(error) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("call {}: unable to stop pipeline: {error}", self.name);
        }

        self.state = CallState::Ended(reason.clone());
        self.emit(CallEvent::StateChanged(self.state.clone()));
        self.emit(CallEvent::Ended(reason));
    }

    fn emit(&self, event: CallEvent<C>) {
        if self.events.send(event).is_err() {
            log::trace!("call {}: nobody listens to call events", self.name);
        }
    }
}

impl<C: Contact> Drop for CallChannel<C> {
    fn drop(&mut self) {
        self.end(EndReason::LocalHangup);
        if let Some(bus_watch) = self.bus_watch.take() {
            bus_watch.remove();
        }
    }
}

/// Log bus messages and report errors as [`CallEvent::MediaError`].
fn watch_bus<C: Contact>(
    pipeline: &gst::Pipeline,
    events: mpsc::UnboundedSender<CallEvent<C>>,
) -> Result<glib::SourceId> {
    let bus = pipeline.bus().context("failed to get bus of pipeline")?;

    let pipeline_weak = pipeline.downgrade();
    let source_id = bus
        .add_watch(move |_, msg| {
            use gst::MessageView;
            match (msg.view(), &pipeline_weak.upgrade()) {
                (MessageView::Error(err), Some(pipeline)) => {
                    log::error!(
                        "Error received from element {:?}: {}",
                        err.src().map(GstObjectExt::path_string),
                        err.error(),
                    );
                    debug::dot(pipeline, "BUS-ERROR");
                    if let Some(info) = err.debug() {
                        log::debug!("Debugging information: {}", info);
                    }
                    let _ = events.send(CallEvent::MediaError(err.error().to_string()));
                }
                (MessageView::Warning(warn), Some(pipeline)) => {
                    log::warn!(
                        "Warning received from element {:?}: {}",
                        warn.src().map(GstObjectExt::path_string),
                        warn.error(),
                    );
                    debug::dot(pipeline, "BUS-WARNING");
                    if let Some(info) = warn.debug() {
                        log::debug!("Debugging information: {}", info);
                    }
                }
                (MessageView::Latency(_), Some(pipeline)) => {
                    let _ = pipeline.recalculate_latency();
                }
                _ => (),
            }
            glib::Continue(true)
        })
        .context("unable to watch pipeline bus")?;

    Ok(source_id)
}
