// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Element and pad helpers shared by sources and sinks.

use anyhow::{Context, Result};
use gst::{prelude::*, Bin, Element, ElementFactory, GhostPad};

use crate::{debug, DeviceError};

/// Adds a `GhostPad` for a static pad of an element of the given `Bin`.
///
/// # Errors
///
/// There are three reasons why this could fail:
/// - The element name cannot be found in the bin.
/// - The pad cannot be found in the element.
/// - The `GhostPad` cannot be added to the bin.
pub fn add_ghost_pad(bin: &Bin, name: &str, pad: &str) -> Result<GhostPad> {
    trace!(
        "add_ghost_pad({bin}, {name}, {pad})",
        bin = debug::name(bin)
    );
    let pad = bin
        .by_name(name)
        .with_context(|| format!("unable to find element '{name}'"))?
        .static_pad(pad)
        .with_context(|| format!("unable to find pad '{pad}' for element '{name}'"))?;
    let ghost_pad =
        GhostPad::with_target(Some(name), &pad).context("failed to create ghost pad for pad")?;
    bin.add_pad(&ghost_pad)
        .context("unable to add GhostPad to bin")?;

    Ok(ghost_pad)
}

/// Return `true` if an element factory with the given name is installed.
#[must_use]
pub fn is_available(factory: &str) -> bool {
    ElementFactory::find(factory).is_some()
}

/// Create a device element and point it to `device` if one is configured.
///
/// The `device` property is only set when the element has one, so that automatic elements like
/// `autoaudiosrc` can be used with a leftover device preference.
pub(crate) fn make_device(
    factory: &str,
    name: &str,
    device: Option<&str>,
) -> Result<Element, DeviceError> {
    if !is_available(factory) {
        return Err(DeviceError::MissingElement(factory.to_owned()));
    }

    let element = ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|_| DeviceError::MissingElement(factory.to_owned()))?;

    // capture devices are live, generators standing in for them have to be told
    if element.find_property("is-live").is_some() {
        element.set_property("is-live", true);
    }

    if let Some(device) = device {
        if element.find_property("device").is_some() {
            element.set_property_from_str("device", device);
        } else {
            warn!("element '{factory}' has no device property, ignoring device '{device}'");
        }
    }

    Ok(element)
}

/// Create a plain processing element.
pub(crate) fn make(factory: &str, name: &str) -> Result<Element> {
    ElementFactory::make(factory)
        .name(name)
        .build()
        .with_context(|| format!("unable to build '{factory}'"))
}

/// Set an element and everything inside to `Null` and remove it from its parent.
pub(crate) fn dispose(element: &Element) {
    if let Err(error) = element.set_state(gst::State::Null) {
        warn!(
            "unable to set '{}' to the `Null` state, error: {error}",
            debug::name(element)
        );
    }
    if let Some(parent) = element.parent().and_then(|p| p.downcast::<Bin>().ok()) {
        if let Err(error) = parent.remove(element) {
            warn!(
                "unable to remove '{}' from its parent, error: {error}",
                debug::name(element)
            );
        }
    }
}

/// Remove an element from its parent right away and set it to `Null` from a GStreamer thread.
///
/// The element's names are free for reuse once this returns.
pub(crate) fn retire(element: &Element) {
    if let Some(parent) = element.parent().and_then(|p| p.downcast::<Bin>().ok()) {
        if let Err(error) = parent.remove(element) {
            warn!(
                "unable to remove '{}' from its parent, error: {error}",
                debug::name(element)
            );
        }
    }
    element.call_async(|element| {
        if let Err(error) = element.set_state(gst::State::Null) {
            warn!(
                "unable to set '{}' to the `Null` state, error: {error}",
                debug::name(element)
            );
        }
    });
}
