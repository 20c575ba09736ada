// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

mod sink_manager;
mod source;

pub mod testing {

    use crate::*;
    use core::time::Duration;
    use gst::prelude::*;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Once,
    };

    static INIT: Once = Once::new();

    /// initialize for testing
    pub fn init() {
        trace!("init()");
        INIT.call_once(init_function);
    }

    fn init_function() {
        // initialize gstreamer
        gst::init().unwrap();
        // init logger
        env_logger::try_init().ok();

        std::thread::spawn({
            let main_loop = glib::MainLoop::new(None, false);
            move || {
                main_loop.run();
            }
        });
    }

    /// Device settings which only use generators and fake sinks.
    pub fn settings() -> Arc<DeviceSettings> {
        Arc::new(DeviceSettings {
            audio_source: "audiotestsrc".to_owned(),
            audio_sink: "fakesink".to_owned(),
            video_source: "videotestsrc".to_owned(),
            noise_reduction: false,
            ..DeviceSettings::default()
        })
    }

    /// Playing pipeline to add the tested controllers to.
    pub fn pipeline(name: &str) -> gst::Pipeline {
        let pipeline = gst::Pipeline::new(Some(name));
        pipeline.set_state(gst::State::Playing).unwrap();
        pipeline
    }

    /// Add a `fakesink` to `pipeline` which counts the buffers it receives.
    pub fn counting_sink(pipeline: &gst::Pipeline, name: &str) -> (gst::Element, Arc<AtomicU64>) {
        let (sink, count) = counting_fakesink(name);
        pipeline.add(&sink).unwrap();
        sink.sync_state_with_parent().unwrap();
        (sink, count)
    }

    /// `fakesink` without parent which counts the buffers it receives.
    pub fn counting_fakesink(name: &str) -> (gst::Element, Arc<AtomicU64>) {
        let sink = gst::ElementFactory::make("fakesink")
            .name(name)
            .property("sync", false)
            .property("async", false)
            .property("signal-handoffs", true)
            .build()
            .unwrap();
        let count = Arc::new(AtomicU64::new(0));
        sink.connect("handoff", false, {
            let count = Arc::clone(&count);
            move |_| {
                count.fetch_add(1, Ordering::Relaxed);
                None
            }
        });
        (sink, count)
    }

    /// Contact as the tests' signaling layer knows it.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct TestContact {
        pub handle: Handle,
        pub name: String,
    }

    impl TestContact {
        pub fn new(handle: Handle) -> Self {
            Self {
                handle,
                name: format!("Participant {handle}"),
            }
        }
    }

    impl Contact for TestContact {
        fn handle(&self) -> Handle {
            self.handle
        }
    }

    /// wait the given amount of milliseconds
    pub fn wait_millis(milliseconds: u64) {
        info!("-- waiting {milliseconds} millisecond(s) --");
        std::thread::sleep(Duration::from_millis(milliseconds));
    }

    /// wait until data had time to flow
    pub fn wait() {
        wait_millis(300);
    }
}
