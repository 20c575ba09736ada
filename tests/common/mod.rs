// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

#![allow(dead_code)]

use std::{
    sync::{Arc, Once},
    time::Duration,
};

use callmedia::{Contact, DeviceSettings, Handle, MediaKind, MediaSession, TestSession};
use gst::{glib, prelude::*};
use kcall::{CallChannel, CallEvent, ContentDescriptor, ContentId};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::common::logger::ErrorLogger;

mod logger;

/// Upper bound for waiting on a single call event.
pub(crate) const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();
static ERRORS: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Initialize logging, GStreamer and a glib main loop once per test binary.
pub(crate) fn init() {
    INIT.call_once(|| {
        ErrorLogger::install(&ERRORS);

        log::info!("Initialize gstreamer");
        kcall::init().expect("unable to init gst");

        log::info!("Start gstreamers MainLoop");
        std::thread::spawn(|| {
            glib::MainLoop::new(None, false).run();
        });
    });
}

/// Return `true` if anything was logged at error level so far.
pub(crate) fn error_occurred() -> bool {
    let errors = ERRORS.lock();
    for error in errors.iter() {
        eprintln!("logged error: {error}");
    }
    !errors.is_empty()
}

/// Remote member as the tests' signaling layer knows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Member {
    pub(crate) handle: Handle,
    pub(crate) name: String,
}

impl Member {
    pub(crate) fn new(handle: Handle, name: &str) -> Self {
        Self {
            handle,
            name: name.to_owned(),
        }
    }
}

impl Contact for Member {
    fn handle(&self) -> Handle {
        self.handle
    }
}

/// Device settings which only use generators and fake sinks.
pub(crate) fn settings() -> DeviceSettings {
    DeviceSettings {
        audio_source: "audiotestsrc".to_owned(),
        audio_sink: "fakesink".to_owned(),
        video_source: "videotestsrc".to_owned(),
        noise_reduction: false,
        ..DeviceSettings::default()
    }
}

/// Content added to a call together with what the test needs to drive it.
pub(crate) struct TestContent {
    pub(crate) id: ContentId,
    pub(crate) session: Arc<TestSession>,
    pub(crate) members: watch::Sender<Vec<Member>>,
}

/// Add a content backed by a [`TestSession`] to `call`.
pub(crate) fn add_content(
    call: &mut CallChannel<Member>,
    id: ContentId,
    kind: MediaKind,
    members: Vec<Member>,
) -> TestContent {
    let session = Arc::new(TestSession::create(&format!("session-{id}"), kind).unwrap());
    let (members_tx, members_rx) = watch::channel(members);
    let media_session: Arc<dyn MediaSession> = session.clone();

    call.on_content_added(ContentDescriptor {
        id,
        kind,
        session: media_session,
        members: members_rx,
    })
    .unwrap();
    assert!(session.element().parent().is_some());

    TestContent {
        id,
        session,
        members: members_tx,
    }
}

/// Wait for the first event matching `predicate`, skipping others.
pub(crate) async fn wait_for<F>(
    events: &mut mpsc::UnboundedReceiver<CallEvent<Member>>,
    mut predicate: F,
) -> CallEvent<Member>
where
    F: FnMut(&CallEvent<Member>) -> bool,
{
    let wait = async {
        while let Some(event) = events.recv().await {
            log::debug!("event: {event:?}");
            if predicate(&event) {
                return event;
            }
        }
        panic!("call event channel closed");
    };

    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .expect("timeout while waiting for call event")
}

/// Collect all events until the call has ended.
pub(crate) async fn until_ended(
    events: &mut mpsc::UnboundedReceiver<CallEvent<Member>>,
) -> Vec<CallEvent<Member>> {
    let mut collected = Vec::new();
    let wait = async {
        while let Some(event) = events.recv().await {
            let ended = matches!(event, CallEvent::Ended(_));
            collected.push(event);
            if ended {
                return;
            }
        }
    };

    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .expect("timeout while waiting for end of call");
    collected
}

/// Let data flow for a moment.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
