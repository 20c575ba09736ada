// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use core::time::Duration;
use gst::prelude::*;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::{
    testing::{self, TestContact},
    DeviceSettings, MediaKind, MediaSession, SinkDispatcher, SinkEvent, SinkManager, TestSession,
    MAIN_QUEUE_CAPACITY,
};

struct Fixture {
    pipeline: gst::Pipeline,
    session: Arc<TestSession>,
    manager: SinkManager<TestContact>,
    dispatcher: SinkDispatcher<TestContact>,
    members: watch::Sender<Vec<TestContact>>,
    events: mpsc::UnboundedReceiver<SinkEvent<TestContact>>,
}

impl Fixture {
    fn new(name: &str, kind: MediaKind, members: &[u32]) -> Self {
        Self::with_settings(name, kind, members, testing::settings())
    }

    fn with_settings(
        name: &str,
        kind: MediaKind,
        members: &[u32],
        settings: Arc<DeviceSettings>,
    ) -> Self {
        Self::build(name, kind, members, settings, MAIN_QUEUE_CAPACITY)
    }

    fn with_queue_capacity(name: &str, kind: MediaKind, members: &[u32], capacity: usize) -> Self {
        Self::build(name, kind, members, testing::settings(), capacity)
    }

    fn build(
        name: &str,
        kind: MediaKind,
        members: &[u32],
        settings: Arc<DeviceSettings>,
        capacity: usize,
    ) -> Self {
        testing::init();

        let pipeline = testing::pipeline(name);
        let session = Arc::new(TestSession::create(&format!("{name}-session"), kind).unwrap());
        pipeline.add(&session.element()).unwrap();
        session.element().sync_state_with_parent().unwrap();

        let (members, members_rx) =
            watch::channel(members.iter().copied().map(TestContact::new).collect());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (manager, dispatcher) = SinkManager::with_queue_capacity(
            kind, name, &pipeline, settings, members_rx, events_tx, capacity,
        );

        let watched: Arc<dyn MediaSession> = session.clone();
        manager.watch(&watched);

        Self {
            pipeline,
            session,
            manager,
            dispatcher,
            members,
            events,
        }
    }

    /// Let the dispatcher handle everything that is queued.
    async fn dispatch(&mut self) {
        while let Ok(true) =
            tokio::time::timeout(Duration::from_millis(100), self.dispatcher.turn()).await
        {}
    }

    fn drain(&mut self) -> Vec<SinkEvent<TestContact>> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.manager.release();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn created(events: &[SinkEvent<TestContact>]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            SinkEvent::Created { contact, .. } => Some(contact.handle),
            _ => None,
        })
        .collect()
}

fn destroyed(events: &[SinkEvent<TestContact>]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|event| match event {
            SinkEvent::Destroyed { contact, .. } => Some(contact.handle),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_created_once_contact_is_member() {
    let mut fixture = Fixture::new("test_created_once_contact_is_member", MediaKind::Audio, &[1]);

    fixture.session.add_remote(1).unwrap();
    fixture.session.add_remote(2).unwrap();
    assert_eq!(fixture.manager.sink_count(), 2);

    fixture.dispatch().await;
    assert_eq!(created(&fixture.drain()), vec![1]);
    assert_eq!(fixture.manager.waiting_count(), 1);

    fixture
        .members
        .send(vec![TestContact::new(1), TestContact::new(2)])
        .unwrap();
    fixture.dispatch().await;

    let events = fixture.drain();
    assert_eq!(created(&events), vec![2]);
    assert_eq!(fixture.manager.waiting_count(), 0);

    let SinkEvent::Created { sink, .. } = &events[0] else {
        panic!("expected created event");
    };
    assert_eq!(sink.handle(), 2);
    assert_eq!(sink.kind(), MediaKind::Audio);
}

#[tokio::test]
async fn test_one_sink_per_handle() {
    let mut fixture = Fixture::new("test_one_sink_per_handle", MediaKind::Video, &[7]);

    // a second session the manager does not watch delivers the same handle
    let other = TestSession::create("other-session", MediaKind::Video).unwrap();
    fixture.pipeline.add(&other.element()).unwrap();
    other.element().sync_state_with_parent().unwrap();

    fixture.session.add_remote(7).unwrap();
    let duplicate = other.add_remote(7).unwrap();
    fixture.manager.src_pad_added(&duplicate, 7);

    assert_eq!(fixture.manager.sink_count(), 1);
    // discarded, but consumed
    assert!(duplicate.is_linked());

    fixture.dispatch().await;
    assert_eq!(created(&fixture.drain()), vec![7]);

    other.remove_remote(7).unwrap();
    fixture.dispatch().await;
    assert!(fixture.drain().is_empty());
    assert_eq!(fixture.manager.sink_count(), 1);
}

#[tokio::test]
async fn test_shared_audio_output() {
    let mut fixture = Fixture::new("test_shared_audio_output", MediaKind::Audio, &[1, 2]);
    assert!(!fixture.manager.has_output());
    assert!(!fixture.manager.output_volume().is_supported());

    fixture.session.add_remote(1).unwrap();
    fixture.session.add_remote(2).unwrap();
    assert_eq!(fixture.manager.mixer_refs(), 2);
    assert!(fixture.manager.has_output());
    assert!(fixture.manager.output_volume().is_supported());

    fixture.dispatch().await;
    testing::wait();

    fixture.session.remove_remote(1).unwrap();
    assert_eq!(fixture.manager.mixer_refs(), 1);
    assert!(fixture.manager.has_output());

    fixture.session.remove_remote(2).unwrap();
    assert_eq!(fixture.manager.mixer_refs(), 0);
    assert!(!fixture.manager.has_output());
    assert!(!fixture.manager.output_volume().is_supported());

    fixture.dispatch().await;
    let events = fixture.drain();
    assert_eq!(created(&events), vec![1, 2]);
    assert_eq!(destroyed(&events), vec![1, 2]);

    // a new participant brings the output back
    fixture.session.add_remote(2).unwrap();
    assert!(fixture.manager.has_output());
}

#[tokio::test]
async fn test_unlinked_before_lookup() {
    let mut fixture = Fixture::new("test_unlinked_before_lookup", MediaKind::Video, &[3]);

    fixture.session.add_remote(3).unwrap();
    fixture.session.remove_remote(3).unwrap();
    assert_eq!(fixture.manager.sink_count(), 0);

    fixture.dispatch().await;
    assert!(fixture.drain().is_empty());
}

#[tokio::test]
async fn test_waiting_sink_unlinked() {
    let mut fixture = Fixture::new("test_waiting_sink_unlinked", MediaKind::Audio, &[]);

    fixture.session.add_remote(4).unwrap();
    fixture.dispatch().await;
    assert_eq!(fixture.manager.waiting_count(), 1);

    fixture.session.remove_remote(4).unwrap();
    assert_eq!(fixture.manager.waiting_count(), 0);

    fixture.members.send(vec![TestContact::new(4)]).unwrap();
    fixture.dispatch().await;
    assert!(fixture.drain().is_empty());
}

#[tokio::test]
async fn test_release_destroys_announced_sinks() {
    let mut fixture = Fixture::new("test_release_destroys_announced_sinks", MediaKind::Audio, &[1, 2]);

    fixture.session.add_remote(1).unwrap();
    fixture.session.add_remote(2).unwrap();
    fixture.session.add_remote(3).unwrap();
    fixture.dispatch().await;
    assert_eq!(created(&fixture.drain()), vec![1, 2]);

    fixture.manager.release();
    assert!(fixture.manager.is_releasing());
    assert_eq!(fixture.manager.sink_count(), 0);
    assert!(!fixture.manager.has_output());

    let mut gone = destroyed(&fixture.drain());
    gone.sort_unstable();
    assert_eq!(gone, vec![1, 2]);

    // the dispatcher stops and late pads are ignored
    assert!(!fixture.dispatcher.turn().await);
    fixture.session.add_remote(5).unwrap();
    assert_eq!(fixture.manager.sink_count(), 0);

    // releasing twice is harmless
    fixture.manager.release();
    assert!(fixture.drain().is_empty());
}

#[tokio::test]
async fn test_output_unavailable() {
    let settings = Arc::new(DeviceSettings {
        audio_sink: "nonexistentaudiosink".to_owned(),
        ..(*testing::settings()).clone()
    });
    let mut fixture =
        Fixture::with_settings("test_output_unavailable", MediaKind::Audio, &[1], settings);

    let pad = fixture.session.add_remote(1).unwrap();
    assert_eq!(fixture.manager.sink_count(), 0);
    assert!(pad.is_linked());

    fixture.dispatch().await;
    let events = fixture.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SinkEvent::OutputUnavailable(_)));

    // not retried for later participants
    let pad = fixture.session.add_remote(2).unwrap();
    assert!(pad.is_linked());
    assert_eq!(fixture.manager.sink_count(), 0);
    fixture.dispatch().await;
    assert!(fixture.drain().is_empty());
}

#[tokio::test]
async fn test_existing_pads_are_picked_up() {
    testing::init();

    let pipeline = testing::pipeline("test_existing_pads_are_picked_up");
    let session = Arc::new(TestSession::create("early-session", MediaKind::Audio).unwrap());
    pipeline.add(&session.element()).unwrap();
    session.element().sync_state_with_parent().unwrap();
    session.add_remote(8).unwrap();

    let (_members, members_rx) = watch::channel(vec![TestContact::new(8)]);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (manager, mut dispatcher) = SinkManager::new(
        MediaKind::Audio,
        "existing",
        &pipeline,
        testing::settings(),
        members_rx,
        events_tx,
    );
    let watched: Arc<dyn MediaSession> = session.clone();
    manager.watch(&watched);
    assert_eq!(manager.sink_count(), 1);

    assert!(dispatcher.turn().await);
    assert!(matches!(
        events.try_recv().unwrap(),
        SinkEvent::Created { .. }
    ));

    manager.release();
    pipeline.set_state(gst::State::Null).unwrap();
}

#[tokio::test]
async fn test_returning_handle_gets_a_new_sink() {
    for kind in [MediaKind::Audio, MediaKind::Video] {
        let mut fixture = Fixture::new(
            &format!("test_returning_handle_gets_a_new_sink-{kind}"),
            kind,
            &[1],
        );

        fixture.session.add_remote(1).unwrap();
        fixture.dispatch().await;
        assert_eq!(created(&fixture.drain()), vec![1]);

        // leaves and comes back before the main thread ran
        fixture.session.remove_remote(1).unwrap();
        fixture.session.add_remote(1).unwrap();

        assert_eq!(fixture.manager.sink_count(), 1);
        let sink = fixture.manager.sink_for(1).unwrap();
        assert!(sink.bin().parent().is_some());
        if kind.is_audio() {
            assert!(fixture.manager.has_output());
            assert_eq!(fixture.manager.mixer_refs(), 1);
            assert!(fixture.manager.output_volume().is_supported());
        }

        fixture.dispatch().await;
        let events = fixture.drain();
        assert_eq!(destroyed(&events), vec![1]);
        assert_eq!(created(&events), vec![1]);
        assert!(!events
            .iter()
            .any(|event| matches!(event, SinkEvent::OutputUnavailable(_))));
    }
}

#[tokio::test]
async fn test_full_queue_keeps_order() {
    let mut fixture =
        Fixture::with_queue_capacity("test_full_queue_keeps_order", MediaKind::Video, &[1, 2, 3], 1);

    for handle in 1..=4 {
        fixture.session.add_remote(handle).unwrap();
    }
    assert_eq!(fixture.manager.sink_count(), 4);

    fixture.dispatch().await;
    assert_eq!(created(&fixture.drain()), vec![1, 2, 3]);
    assert_eq!(fixture.manager.waiting_count(), 1);

    for handle in 1..=3 {
        fixture.session.remove_remote(handle).unwrap();
    }
    fixture
        .members
        .send(vec![TestContact::new(4)])
        .unwrap();

    fixture.dispatch().await;
    let events = fixture.drain();
    assert_eq!(destroyed(&events), vec![1, 2, 3]);
    assert_eq!(created(&events), vec![4]);
}
