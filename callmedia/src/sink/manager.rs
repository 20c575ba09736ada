// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use glib::SignalHandlerId;
use gst::{prelude::*, Bin, Element, Pad};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Weak},
};
use tokio::sync::{mpsc, watch};

use super::{
    audio::{AudioOutput, MixerSlot},
    AudioSinkController, SinkController, SinkEvent, VideoSinkController,
};
use crate::{debug, pads, Contact, DeviceSettings, Handle, MediaKind, MediaSession, VolumeController};

/// Capacity of the queue from the media threads to the main thread.
pub const MAIN_QUEUE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ManagerState {
    Active,
    Releasing,
}

#[derive(Debug)]
enum PadEntry<C> {
    Sink {
        sink: Arc<SinkController>,
        contact: Option<C>,
        unlinked: SignalHandlerId,
    },
    /// Media nobody listens to, ends in a `fakesink`.
    Discard {
        fakesink: Element,
        unlinked: SignalHandlerId,
    },
}

#[derive(Debug)]
struct Shared<C> {
    state: ManagerState,
    pads: HashMap<Pad, PadEntry<C>>,
    /// Sinks whose contact was not a member at the time of resolution.
    waiting: HashMap<Handle, Pad>,
    mixer: MixerSlot,
    session: Option<(Element, SignalHandlerId)>,
    /// Messages posted while the main queue was full, in posting order.
    overflow: VecDeque<Message<C>>,
}

#[derive(Debug)]
enum Message<C> {
    Resolve(Pad),
    Destroy {
        sink: Arc<SinkController>,
        contact: Option<C>,
    },
    OutputUnavailable(String),
    Stop,
}

#[derive(Debug)]
struct Inner<C> {
    kind: MediaKind,
    name: String,
    parent: Bin,
    settings: Arc<DeviceSettings>,
    output_volume: VolumeController,
    shared: Mutex<Shared<C>>,
    messages: mpsc::Sender<Message<C>>,
    events: mpsc::UnboundedSender<SinkEvent<C>>,
}

/// Creates a [`SinkController`] for every remote participant's pad of a content.
///
/// Pads are handled on the media thread that raised them. Contact lookups and all
/// [`SinkEvent`]s happen on the main thread which drives the [`SinkDispatcher`].
#[derive(Debug)]
pub struct SinkManager<C: Contact> {
    inner: Arc<Inner<C>>,
}

/// Main thread side of a [`SinkManager`].
#[derive(Debug)]
pub struct SinkDispatcher<C: Contact> {
    inner: Arc<Inner<C>>,
    messages: mpsc::Receiver<Message<C>>,
    members: watch::Receiver<Vec<C>>,
    members_open: bool,
    stopped: bool,
}

impl<C: Contact> SinkManager<C> {
    /// Create the manager of one content.
    ///
    /// `members` is the content's current member list, kept up to date by the signaling layer.
    pub fn new(
        kind: MediaKind,
        name: impl Into<String>,
        parent: &impl IsA<Bin>,
        settings: Arc<DeviceSettings>,
        members: watch::Receiver<Vec<C>>,
        events: mpsc::UnboundedSender<SinkEvent<C>>,
    ) -> (Self, SinkDispatcher<C>) {
        Self::with_queue_capacity(kind, name, parent, settings, members, events, MAIN_QUEUE_CAPACITY)
    }

    pub(crate) fn with_queue_capacity(
        kind: MediaKind,
        name: impl Into<String>,
        parent: &impl IsA<Bin>,
        settings: Arc<DeviceSettings>,
        members: watch::Receiver<Vec<C>>,
        events: mpsc::UnboundedSender<SinkEvent<C>>,
        capacity: usize,
    ) -> (Self, SinkDispatcher<C>) {
        let (messages, receiver) = mpsc::channel(capacity);

        let inner = Arc::new(Inner {
            kind,
            name: name.into(),
            parent: parent.as_ref().clone(),
            settings,
            output_volume: VolumeController::new(),
            shared: Mutex::new(Shared {
                state: ManagerState::Active,
                pads: HashMap::new(),
                waiting: HashMap::new(),
                mixer: MixerSlot::default(),
                session: None,
                overflow: VecDeque::new(),
            }),
            messages,
            events,
        });

        let dispatcher = SinkDispatcher {
            inner: Arc::clone(&inner),
            messages: receiver,
            members,
            members_open: true,
            stopped: false,
        };

        (Self { inner }, dispatcher)
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Follow the remote participants' pads of `session`, including the ones it already has.
    pub fn watch(&self, session: &Arc<dyn MediaSession>) {
        let element = session.element();

        let weak = Arc::downgrade(&self.inner);
        let handler = element.connect_pad_added({
            let session = Arc::clone(session);
            move |_, pad| on_pad_added(&weak, session.as_ref(), pad)
        });

        let previous = self
            .inner
            .shared
            .lock()
            .session
            .replace((element.clone(), handler));
        if let Some((element, handler)) = previous {
            element.disconnect(handler);
        }

        for pad in element.src_pads() {
            if pad.is_linked() {
                continue;
            }
            if let Some(handle) = session.remote_handle(&pad) {
                self.inner.pad_added(&pad, handle);
            }
        }
    }

    /// Handle a new remote pad of the session. Called on the media thread raising it.
    pub fn src_pad_added(&self, pad: &Pad, handle: Handle) {
        self.inner.pad_added(pad, handle);
    }

    /// Tear down all sinks and stop the dispatcher.
    ///
    /// Every sink which was announced gets its [`SinkEvent::Destroyed`]. Pads or lookups arriving
    /// afterwards are ignored.
    pub fn release(&self) {
        self.inner.release();
    }

    /// Volume of the shared audio output. Unsupported while no remote audio plays.
    #[must_use]
    pub fn output_volume(&self) -> &VolumeController {
        &self.inner.output_volume
    }

    /// Number of remote pads with a sink, announced or not.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.inner
            .shared
            .lock()
            .pads
            .values()
            .filter(|entry| matches!(entry, PadEntry::Sink { .. }))
            .count()
    }

    /// Number of sinks waiting for their contact to become a member.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.inner.shared.lock().waiting.len()
    }

    /// Number of audio sinks sharing the output.
    #[must_use]
    pub fn mixer_refs(&self) -> usize {
        self.inner.shared.lock().mixer.refs()
    }

    #[must_use]
    pub fn has_output(&self) -> bool {
        self.inner.shared.lock().mixer.output().is_some()
    }

    /// Sink consuming the media of `handle`.
    #[must_use]
    pub fn sink_for(&self, handle: Handle) -> Option<Arc<SinkController>> {
        self.inner
            .shared
            .lock()
            .pads
            .values()
            .find_map(|entry| match entry {
                PadEntry::Sink { sink, .. } if sink.handle() == handle => Some(Arc::clone(sink)),
                _ => None,
            })
    }

    #[must_use]
    pub fn is_releasing(&self) -> bool {
        self.inner.shared.lock().state == ManagerState::Releasing
    }
}

impl<C: Contact> Drop for SinkManager<C> {
    fn drop(&mut self) {
        self.inner.release();
    }
}

fn on_pad_added<C: Contact>(inner: &Weak<Inner<C>>, session: &dyn MediaSession, pad: &Pad) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if pad.direction() != gst::PadDirection::Src {
        return;
    }

    match session.remote_handle(pad) {
        Some(handle) => inner.pad_added(pad, handle),
        None => warn!(
            "{}: ignoring pad {} without remote handle",
            inner.name,
            debug::name(pad)
        ),
    }
}

impl<C: Contact> Inner<C> {
    fn pad_added(self: &Arc<Self>, pad: &Pad, handle: Handle) {
        if let Err(error) = self.try_pad_added(pad, handle) {
            error!(
                "{}: unable to handle pad {} of {handle}, error: {error:?}",
                self.name,
                debug::name(pad)
            );
        }
    }

    fn try_pad_added(self: &Arc<Self>, pad: &Pad, handle: Handle) -> Result<()> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if shared.state == ManagerState::Releasing {
            debug!("{}: releasing, ignoring pad of {handle}", self.name);
            return Ok(());
        }
        if shared.pads.contains_key(pad) {
            return Ok(());
        }

        let served = shared.pads.values().any(|entry| match entry {
            PadEntry::Sink { sink, .. } => sink.handle() == handle,
            PadEntry::Discard { .. } => false,
        });
        if served {
            warn!(
                "{}: {handle} already has a sink, discarding pad {}",
                self.name,
                debug::name(pad)
            );
            return self.discard(shared, pad);
        }

        let sink = match self.kind {
            MediaKind::Audio => {
                if shared.mixer.failed() {
                    debug!("{}: no audio output, discarding audio of {handle}", self.name);
                    return self.discard(shared, pad);
                }

                let output = shared.mixer.acquire(|| {
                    AudioOutput::create(&self.name, &self.parent, &self.settings)
                });
                let output = match output {
                    Ok(output) => output,
                    Err(error) => {
                        warn!(
                            "{}: audio output unavailable, discarding audio of {handle}, error: {error}",
                            self.name
                        );
                        self.post(shared, Message::OutputUnavailable(error));
                        return self.discard(shared, pad);
                    }
                };
                let volume = output.volume().clone();

                match AudioSinkController::create(handle, pad, &self.parent, output) {
                    Ok(audio) => {
                        if shared.mixer.refs() == 1 {
                            self.output_volume.set_element(Some(volume));
                        }
                        SinkController::Audio(audio)
                    }
                    Err(error) => {
                        if let Some(output) = shared.mixer.release() {
                            output.dispose();
                        }
                        return Err(error);
                    }
                }
            }
            MediaKind::Video => {
                SinkController::Video(VideoSinkController::create(handle, pad, &self.parent)?)
            }
        };

        debug!("{}: created sink for {handle}", self.name);

        let unlinked = self.watch_unlinked(pad);
        shared.pads.insert(
            pad.clone(),
            PadEntry::Sink {
                sink: Arc::new(sink),
                contact: None,
                unlinked,
            },
        );
        self.post(shared, Message::Resolve(pad.clone()));

        Ok(())
    }

    fn discard(self: &Arc<Self>, shared: &mut Shared<C>, pad: &Pad) -> Result<()> {
        let fakesink = pads::make("fakesink", &format!("discard-{}", pad.name()))?;
        fakesink.set_property("sync", false);
        fakesink.set_property("async", false);

        self.parent
            .add(&fakesink)
            .context("unable to add discarding fakesink to parent")?;
        let sink = fakesink
            .static_pad("sink")
            .context("fakesink has no sink pad")?;
        pad.link(&sink)
            .context("unable to link pad with discarding fakesink")?;
        fakesink
            .sync_state_with_parent()
            .context("unable to sync discarding fakesink with parent")?;

        let unlinked = self.watch_unlinked(pad);
        shared
            .pads
            .insert(pad.clone(), PadEntry::Discard { fakesink, unlinked });

        Ok(())
    }

    fn watch_unlinked(self: &Arc<Self>, pad: &Pad) -> SignalHandlerId {
        let weak = Arc::downgrade(self);
        pad.connect_unlinked(move |pad, _| {
            if let Some(inner) = weak.upgrade() {
                inner.pad_unlinked(pad);
            }
        })
    }

    fn pad_unlinked(&self, pad: &Pad) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if shared.state == ManagerState::Releasing {
            return;
        }
        let Some(entry) = shared.pads.remove(pad) else {
            return;
        };

        match entry {
            PadEntry::Discard { fakesink, unlinked } => {
                pad.disconnect(unlinked);
                pads::retire(&fakesink);
            }
            PadEntry::Sink {
                sink,
                contact,
                unlinked,
            } => {
                pad.disconnect(unlinked);
                shared.waiting.retain(|_, waiting| *waiting != *pad);
                self.unlink_sink(shared, &sink);

                debug!("{}: sink for {} unlinked", self.name, sink.handle());
                self.post(shared, Message::Destroy { sink, contact });
            }
        }
    }

    fn unlink_sink(&self, shared: &mut Shared<C>, sink: &SinkController) {
        match sink {
            SinkController::Audio(audio) => {
                audio.unlink(shared.mixer.output());
                if let Some(output) = shared.mixer.release() {
                    self.output_volume.set_element(None);
                    output.dispose();
                }
            }
            SinkController::Video(video) => video.unlink(),
        }
    }

    fn release(&self) {
        let destroyed = {
            let mut guard = self.shared.lock();
            let shared = &mut *guard;

            if shared.state == ManagerState::Releasing {
                return;
            }
            shared.state = ManagerState::Releasing;
            debug!("{}: releasing", self.name);

            if let Some((element, handler)) = shared.session.take() {
                element.disconnect(handler);
            }
            shared.waiting.clear();

            let mut destroyed = Vec::new();
            let entries: Vec<_> = shared.pads.drain().collect();
            for (pad, entry) in entries {
                // the unlinked handler takes the lock, it has to go before the sink
                let detach = |unlinked: SignalHandlerId| {
                    pad.disconnect(unlinked);
                    if let Some(peer) = pad.peer() {
                        let _ = pad.unlink(&peer);
                    }
                };

                match entry {
                    PadEntry::Discard { fakesink, unlinked } => {
                        detach(unlinked);
                        pads::retire(&fakesink);
                    }
                    PadEntry::Sink {
                        sink,
                        contact,
                        unlinked,
                    } => {
                        detach(unlinked);
                        self.unlink_sink(shared, &sink);
                        if let Some(contact) = contact {
                            destroyed.push(SinkEvent::Destroyed { contact, sink });
                        }
                    }
                }
            }

            destroyed
        };

        for event in destroyed {
            self.emit(event);
        }
        let mut shared = self.shared.lock();
        self.post(&mut shared, Message::Stop);
    }

    /// Queue `message` for the main thread. Never blocks, a full queue spills into the overflow.
    fn post(&self, shared: &mut Shared<C>, message: Message<C>) {
        if !shared.overflow.is_empty() {
            shared.overflow.push_back(message);
            return;
        }
        match self.messages.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                debug!("{}: main queue is full, keeping message in overflow", self.name);
                shared.overflow.push_back(message);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("{}: dispatcher is gone, dropping message", self.name);
            }
        }
    }

    fn emit(&self, event: SinkEvent<C>) {
        if self.events.send(event).is_err() {
            trace!("{}: nobody listens to sink events", self.name);
        }
    }
}

impl<C: Contact> SinkDispatcher<C> {
    /// Handle the next message or member list change.
    ///
    /// Returns `false` once the manager was released.
    pub async fn turn(&mut self) -> bool {
        if self.stopped {
            return false;
        }

        // the queue holds everything posted before the first overflowed message
        if let Ok(message) = self.messages.try_recv() {
            return self.process(Some(message));
        }
        let spilled = self.inner.shared.lock().overflow.pop_front();
        if let Some(message) = spilled {
            return self.process(Some(message));
        }

        tokio::select! {
            biased;

            message = self.messages.recv() => self.process(message),

            changed = self.members.changed(), if self.members_open => {
                match changed {
                    Ok(()) => self.members_changed(),
                    Err(_) => {
                        debug!("{}: member list closed", self.inner.name);
                        self.members_open = false;
                    }
                }
                true
            }
        }
    }

    /// Dispatch until the manager is released.
    pub async fn run(mut self) {
        while self.turn().await {}
    }

    fn process(&mut self, message: Option<Message<C>>) -> bool {
        match message {
            Some(Message::Stop) | None => {
                debug!("{}: dispatcher stopped", self.inner.name);
                self.stopped = true;
                false
            }
            Some(message) => {
                self.handle(message);
                true
            }
        }
    }

    fn handle(&mut self, message: Message<C>) {
        match message {
            Message::Resolve(pad) => self.resolve(&pad),
            Message::Destroy { sink, contact } => match contact {
                Some(contact) => self.inner.emit(SinkEvent::Destroyed { contact, sink }),
                None => debug!(
                    "{}: sink for {} gone before its contact was known",
                    self.inner.name,
                    sink.handle()
                ),
            },
            Message::OutputUnavailable(error) => {
                self.inner.emit(SinkEvent::OutputUnavailable(error));
            }
            Message::Stop => self.stopped = true,
        }
    }

    fn resolve(&mut self, pad: &Pad) {
        let created = {
            let mut guard = self.inner.shared.lock();
            let shared = &mut *guard;

            if shared.state == ManagerState::Releasing {
                return;
            }
            let Some(PadEntry::Sink { sink, contact, .. }) = shared.pads.get_mut(&*pad) else {
                trace!("{}: pad gone before its contact lookup", self.inner.name);
                return;
            };
            if contact.is_some() {
                return;
            }

            let handle = sink.handle();
            let member = self
                .members
                .borrow()
                .iter()
                .find(|member| member.handle() == handle)
                .cloned();

            match member {
                Some(member) => {
                    *contact = Some(member.clone());
                    let sink = Arc::clone(sink);
                    shared.waiting.remove(&handle);
                    SinkEvent::Created {
                        contact: member,
                        sink,
                    }
                }
                None => {
                    debug!("{}: {handle} is no member yet, waiting", self.inner.name);
                    shared.waiting.insert(handle, pad.clone());
                    return;
                }
            }
        };

        self.inner.emit(created);
    }

    fn members_changed(&mut self) {
        let members = self.members.borrow_and_update().clone();

        let created = {
            let mut guard = self.inner.shared.lock();
            let shared = &mut *guard;

            if shared.state == ManagerState::Releasing {
                return;
            }

            let mut created = Vec::new();
            let pads = &mut shared.pads;
            shared.waiting.retain(|handle, pad| {
                let Some(member) = members.iter().find(|member| member.handle() == *handle) else {
                    return true;
                };
                if let Some(PadEntry::Sink { sink, contact, .. }) = pads.get_mut(&*pad) {
                    if contact.is_none() {
                        *contact = Some(member.clone());
                        created.push(SinkEvent::Created {
                            contact: member.clone(),
                            sink: Arc::clone(sink),
                        });
                    }
                }
                false
            });

            created
        };

        for event in created {
            self.inner.emit(event);
        }
    }
}
