// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use core::time::Duration;
use gst::prelude::*;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use crate::{testing, DeviceSettings, MediaKind, OutputTap, SourceController, SourceEvent};

fn link_tap(pipeline: &gst::Pipeline, tap: &OutputTap, name: &str) -> Arc<AtomicU64> {
    let (sink, count) = testing::counting_sink(pipeline, name);
    tap.pad()
        .link(&sink.static_pad("sink").unwrap())
        .unwrap();
    count
}

#[test]
fn test_disabled_source_feeds_generator() {
    testing::init();

    let pipeline = testing::pipeline("test_disabled_source_feeds_generator");
    let source = SourceController::new(MediaKind::Audio, "audio", &pipeline, testing::settings());

    let tap = source.request_output_tap().unwrap();
    let count = link_tap(&pipeline, &tap, "consumer");
    testing::wait();

    assert!(!source.source_enabled());
    assert!(!source.volume().is_supported());
    assert!(count.load(Ordering::Relaxed) > 0);

    source.release_output_tap(tap).unwrap();
    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_switch_keeps_consumers_linked() {
    testing::init();

    for kind in [MediaKind::Audio, MediaKind::Video] {
        let pipeline = testing::pipeline(&format!("test_switch_keeps_consumers_linked-{kind}"));
        let source = SourceController::new(kind, kind.to_string(), &pipeline, testing::settings());
        let mut events = source.subscribe();

        let tap = source.request_output_tap().unwrap();
        let count = link_tap(&pipeline, &tap, "consumer");
        testing::wait();

        assert!(source.set_enabled(true));
        assert_eq!(events.try_recv().unwrap(), SourceEvent::Enabled(true));
        assert!(source.source_enabled());
        assert_eq!(source.volume().is_supported(), kind.is_audio());
        assert!(tap.pad().is_linked());

        let before = count.load(Ordering::Relaxed);
        testing::wait();
        assert!(count.load(Ordering::Relaxed) > before);

        // enabling twice is a no-op
        assert!(source.set_enabled(true));
        assert!(events.try_recv().is_err());

        assert!(!source.set_enabled(false));
        assert_eq!(events.try_recv().unwrap(), SourceEvent::Enabled(false));
        assert!(!source.source_enabled());
        assert!(!source.volume().is_supported());
        assert!(tap.pad().is_linked());

        let before = count.load(Ordering::Relaxed);
        testing::wait();
        assert!(count.load(Ordering::Relaxed) > before);

        source.release_output_tap(tap).unwrap();
        pipeline.set_state(gst::State::Null).unwrap();
    }
}

#[test]
fn test_failed_device_is_not_retried() {
    testing::init();

    let pipeline = testing::pipeline("test_failed_device_is_not_retried");
    let settings = Arc::new(DeviceSettings {
        audio_source: "nonexistentaudiosrc".to_owned(),
        ..(*testing::settings()).clone()
    });
    let source = SourceController::new(MediaKind::Audio, "audio", &pipeline, settings);
    let mut events = source.subscribe();

    let tap = source.request_output_tap().unwrap();
    let count = link_tap(&pipeline, &tap, "consumer");

    assert!(!source.set_enabled(true));
    assert!(matches!(
        events.try_recv().unwrap(),
        SourceEvent::DeviceFailed(_)
    ));
    assert!(source.device_error().is_some());
    assert!(!source.source_enabled());

    assert!(!source.set_enabled(true));
    assert!(events.try_recv().is_err());

    // consumers still get silence
    testing::wait();
    assert!(count.load(Ordering::Relaxed) > 0);

    source.release_output_tap(tap).unwrap();
    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_bin_lifetime_follows_taps_and_device() {
    testing::init();

    let pipeline = testing::pipeline("test_bin_lifetime_follows_taps_and_device");
    let source = SourceController::new(MediaKind::Audio, "audio", &pipeline, testing::settings());
    assert!(!source.has_bin());

    let first = source.request_output_tap().unwrap();
    let second = source.request_output_tap().unwrap();
    assert!(source.has_bin());
    assert_eq!(source.tap_count(), 2);
    assert_ne!(first.pad().name(), second.pad().name());

    source.release_output_tap(first).unwrap();
    assert!(source.has_bin());
    assert_eq!(source.tap_count(), 1);

    source.release_output_tap(second).unwrap();
    assert!(!source.has_bin());
    assert_eq!(pipeline.children().len(), 0);

    // a connected device keeps the bin without taps
    assert!(source.set_enabled(true));
    assert!(source.has_bin());
    let tap = source.request_output_tap().unwrap();
    source.release_output_tap(tap).unwrap();
    assert!(source.has_bin());

    source.set_enabled(false);
    assert!(!source.has_bin());

    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_release_foreign_tap_fails() {
    testing::init();

    let pipeline = testing::pipeline("test_release_foreign_tap_fails");
    let first = SourceController::new(MediaKind::Video, "first", &pipeline, testing::settings());
    let second = SourceController::new(MediaKind::Video, "second", &pipeline, testing::settings());

    // both hand out tap 0 and tap 1
    let _kept = first.request_output_tap().unwrap();
    let tap = first.request_output_tap().unwrap();
    let own = second.request_output_tap().unwrap();
    let _other = second.request_output_tap().unwrap();

    assert!(second.release_output_tap(tap).is_err());
    assert_eq!(second.tap_count(), 2);
    assert!(own.pad().parent().is_some());

    second.release_output_tap(own).unwrap();
    assert_eq!(second.tap_count(), 1);
    assert_eq!(first.tap_count(), 2);

    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_failed_tap_request_leaves_no_branch() {
    testing::init();

    let pipeline = testing::pipeline("test_failed_tap_request_leaves_no_branch");
    let source = SourceController::new(MediaKind::Audio, "audio", &pipeline, testing::settings());

    let tap = source.request_output_tap().unwrap();
    let bin = tap
        .pad()
        .parent()
        .and_then(|parent| parent.downcast::<gst::Bin>().ok())
        .unwrap();
    let fanout = bin.by_name("fanout").unwrap();
    let branches = fanout.src_pads().len();

    // the next tap's queue name is in use
    let squatter = gst::ElementFactory::make("identity")
        .name("tap-queue-1")
        .build()
        .unwrap();
    bin.add(&squatter).unwrap();

    assert!(source.request_output_tap().is_err());
    assert_eq!(source.tap_count(), 1);
    assert_eq!(fanout.src_pads().len(), branches);
    assert!(bin.static_pad("tap_1").is_none());

    // the following request gets a fresh id and works
    let next = source.request_output_tap().unwrap();
    assert_eq!(source.tap_count(), 2);

    source.release_output_tap(next).unwrap();
    source.release_output_tap(tap).unwrap();
    assert!(!source.has_bin());

    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_quick_toggles_keep_timing() {
    testing::init();

    let pipeline = testing::pipeline("test_quick_toggles_keep_timing");
    let source = SourceController::new(MediaKind::Audio, "audio", &pipeline, testing::settings());

    let tap = source.request_output_tap().unwrap();
    let (sink, _) = testing::counting_sink(&pipeline, "consumer");
    let arrivals = Arc::new(Mutex::new(Vec::<(Instant, Option<gst::ClockTime>)>::new()));
    sink.connect("handoff", false, {
        let arrivals = Arc::clone(&arrivals);
        move |values| {
            let buffer = values[1].get::<gst::Buffer>().ok()?;
            arrivals.lock().push((Instant::now(), buffer.pts()));
            None
        }
    });
    tap.pad()
        .link(&sink.static_pad("sink").unwrap())
        .unwrap();
    testing::wait();

    for enabled in [true, false, true, false, true] {
        assert_eq!(source.set_enabled(enabled), enabled);
        testing::wait_millis(20);
    }
    testing::wait();
    source.set_enabled(false);

    let arrivals = arrivals.lock();
    assert!(arrivals.len() > 10);
    for pair in arrivals.windows(2) {
        let [(before, before_pts), (after, after_pts)] = pair else {
            unreachable!();
        };
        assert!(
            after.duration_since(*before) < Duration::from_millis(200),
            "no buffer for {:?}",
            after.duration_since(*before)
        );
        if let (Some(before_pts), Some(after_pts)) = (before_pts, after_pts) {
            assert_ne!(before_pts, after_pts, "buffer passed the switch twice");
        }
    }
    drop(arrivals);

    source.release_output_tap(tap).unwrap();
    pipeline.set_state(gst::State::Null).unwrap();
}

#[test]
fn test_missing_camera_stays_disabled() {
    testing::init();

    let pipeline = testing::pipeline("test_missing_camera_stays_disabled");
    let settings = Arc::new(DeviceSettings {
        video_source: "nonexistentvideosrc".to_owned(),
        ..(*testing::settings()).clone()
    });
    let source = SourceController::new(MediaKind::Video, "video", &pipeline, settings);
    let mut events = source.subscribe();

    assert!(!source.set_enabled(false));
    assert!(events.try_recv().is_err());

    assert!(!source.set_enabled(true));
    assert!(!source.source_enabled());
    assert!(matches!(
        events.try_recv().unwrap(),
        SourceEvent::DeviceFailed(_)
    ));
    assert!(events.try_recv().is_err());
    // nothing taps the source, so the failed attempt leaves no bin behind
    assert!(!source.has_bin());

    pipeline.set_state(gst::State::Null).unwrap();
}
