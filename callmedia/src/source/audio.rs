// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use gst::{prelude::*, Bin, Element, ElementFactory, GhostPad};

use super::Device;
use crate::{pads, DeviceError, DeviceSettings};

/// Elements generating silence, in link order.
pub(super) fn silence(settings: &DeviceSettings) -> Result<Vec<Element>> {
    let generator = ElementFactory::make("audiotestsrc")
        .name("silence")
        .property("is-live", true)
        .build()
        .context("unable to build audiotestsrc")?;
    generator.set_property_from_str("wave", "silence");

    let capsfilter = ElementFactory::make("capsfilter")
        .name("silence-caps")
        .property("caps", settings.audio_caps())
        .build()
        .context("unable to build capsfilter")?;

    Ok(vec![
        generator,
        pads::make("audioconvert", "silence-convert")?,
        pads::make("audioresample", "silence-resample")?,
        capsfilter,
    ])
}

/// Microphone followed by gain stage and level meter.
pub(super) fn device(name: &str, settings: &DeviceSettings) -> Result<Device, DeviceError> {
    let capture = pads::make_device(
        &settings.audio_source,
        "capture",
        settings.audio_source_device.as_deref(),
    )?;

    let bin = Bin::new(Some(format!("{name}-microphone").as_str()));
    let convert = pads::make("audioconvert", "convert")?;
    let resample = pads::make("audioresample", "resample")?;
    let gain = pads::make("volume", "gain")?;
    let level = ElementFactory::make("level")
        .name(format!("{name}-level").as_str())
        .property("post-messages", true)
        .build()
        .context("unable to build level")?;
    let capsfilter = ElementFactory::make("capsfilter")
        .name("caps")
        .property("caps", settings.audio_caps())
        .build()
        .context("unable to build capsfilter")?;

    let chain = [&capture, &convert, &resample, &gain, &level, &capsfilter];
    bin.add_many(&chain)
        .context("unable to add microphone elements to bin")?;
    Element::link_many(&chain).context("unable to link microphone elements")?;

    let src = GhostPad::with_target(
        Some("src"),
        &capsfilter
            .static_pad("src")
            .context("capsfilter has no src pad")?,
    )
    .context("unable to create ghost pad for microphone")?;
    bin.add_pad(&src)
        .context("unable to add ghost pad to microphone bin")?;

    Ok(Device {
        bin,
        gain: Some(gain),
    })
}
