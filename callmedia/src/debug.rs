// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Functions for debugging pipelines.

use gst::{prelude::*, DebugGraphDetails};
use std::sync::atomic::{AtomicUsize, Ordering};

static DOT_INDEX: AtomicUsize = AtomicUsize::new(0);

/// Write a DOT file of the top level bin of `element` if the log level is `debug`.
pub fn debug_dot(element: &impl IsA<gst::Element>, label: &str) {
    if log::max_level() >= log::Level::Debug {
        dot(element, label);
    }
}

/// Write a DOT file of the top level bin of `element`.
///
/// Nothing happens unless `GST_DEBUG_DUMP_DOT_DIR` is set. File names get a running index as prefix
/// so that a sequence of dumps keeps its order.
pub fn dot(element: &impl IsA<gst::Element>, label: &str) {
    let Ok(path) = std::env::var("GST_DEBUG_DUMP_DOT_DIR") else {
        return;
    };

    if let Err(e) = std::fs::create_dir_all(&path) {
        error!("can not create DOT output directory '{path}': {e:?}");
        return;
    }

    let mut top = element.upcast_ref::<gst::Element>().clone();
    while let Some(parent) = top.parent().and_then(|p| p.downcast::<gst::Element>().ok()) {
        top = parent;
    }

    let Ok(bin) = top.downcast::<gst::Bin>() else {
        error!("can not write DOT file '{label}': top level element is not a bin");
        return;
    };

    let name = format!("{}-{label}", DOT_INDEX.fetch_add(1, Ordering::SeqCst));
    info!("writing DOT file '{path}/{name}.dot'");
    gst::debug_bin_to_dot_file(&bin, DebugGraphDetails::ALL, name);
}

/// Create a name (with parent names as prefix) from a GStreamer object.
pub fn name(object: &impl IsA<gst::Object>) -> glib::GString {
    match object.parent() {
        Some(parent) => format!("{}.{}", name(&parent), object.name()).into(),
        None => object.name(),
    }
}
