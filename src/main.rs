// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

#![allow(clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use callmedia::{MediaKind, MediaSession};
use gst::glib;
use kcall::{
    echo::{EchoContact, EchoSession},
    CallChannel, CallEvent, CallState, ContentDescriptor, Settings,
};
use log::warn;
use std::sync::Arc;
use tokio::{
    select,
    signal::{
        ctrl_c,
        unix::{signal, SignalKind},
    },
    sync::watch::{self, Receiver},
};

const CONFIG_FILE: &str = "config.toml";
const DOT_OUTPUT_PATH: &str = "./pipelines";
const ECHO_CONTENT: u32 = 1;

fn main() -> Result<()> {
    env_logger::init();

    if std::env::var("GST_DEBUG_DUMP_DOT_DIR").is_err() {
        warn!("Using default dot path. You need to set GST_DEBUG_DUMP_DOT_DIR in environment to an absolute path to get DOT output.");
        std::env::set_var("GST_DEBUG_DUMP_DOT_DIR", DOT_OUTPUT_PATH);
    };

    kcall::init()?;

    // Run a MainLoop on a separate thread so gstreamer bus watches work
    let main_loop = glib::MainLoop::new(None, false);
    std::thread::spawn({
        let main_loop = main_loop.clone();

        move || {
            main_loop.run();
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio async runtime")?;

    runtime.spawn(async move {
        match signal(SignalKind::terminate()) {
            Ok(mut sig_term) => select! {
                _ = ctrl_c() => { log::info!("received Ctrl-C"); }
                _ = sig_term.recv() => { log::info!("received SIGTERM"); }
            },
            Err(e) => {
                log::error!("can not setup SIGTERM handler: {e}");
                let _ = ctrl_c().await;
                log::info!("received Ctrl-C");
            }
        }
        if shutdown_tx.send(true).is_err() {
            log::error!("failed to send shutdown signal");
        }
    });

    if let Err(e) = runtime.block_on(echo_call(shutdown_rx)) {
        eprintln!("Exit on failure: {e:?}");
        std::process::exit(-1);
    }

    main_loop.quit();

    Ok(())
}

/// Place a call with the local microphone looped back to the speaker.
async fn echo_call(mut shutdown_rx: Receiver<bool>) -> Result<()> {
    let settings = Settings::load_or_default(CONFIG_FILE).context("Failed to read config")?;

    let (mut call, mut events) =
        CallChannel::<EchoContact>::new("echo-call", Arc::new(settings.devices))?;

    let session: Arc<dyn MediaSession> = Arc::new(EchoSession::create("echo-session")?);
    let (_members_tx, members) = watch::channel(vec![EchoContact::default()]);
    call.on_content_added(ContentDescriptor {
        id: ECHO_CONTENT,
        kind: MediaKind::Audio,
        session,
        members,
    })?;
    call.on_state_changed(CallState::Active)?;

    if !call.set_sending(ECHO_CONTENT, true)? {
        warn!("microphone unavailable, echoing silence");
    }

    while !*shutdown_rx.borrow() {
        select! {
            result = shutdown_rx.changed() => {
                result?;
            }
            event = events.recv() => match event {
                Some(CallEvent::Ended(reason)) => {
                    log::info!("call ended: {reason}");
                    return Ok(());
                }
                Some(event) => log::info!("{event:?}"),
                None => return Ok(()),
            }
        }
    }

    call.hangup();

    Ok(())
}
