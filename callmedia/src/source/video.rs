// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use anyhow::{Context, Result};
use gst::{prelude::*, Bin, Element, ElementFactory, GhostPad};

use super::Device;
use crate::{pads, DeviceError, DeviceSettings};

const RATE_LIMITER: &str = "videorate";
const NOISE_REDUCTION: &str = "postproc_tmpnoise";

/// Elements generating black frames, in link order.
pub(super) fn black(settings: &DeviceSettings) -> Result<Vec<Element>> {
    let generator = ElementFactory::make("videotestsrc")
        .name("black")
        .property("is-live", true)
        .build()
        .context("unable to build videotestsrc")?;
    generator.set_property_from_str("pattern", "black");

    let capsfilter = ElementFactory::make("capsfilter")
        .name("black-caps")
        .property("caps", settings.video_caps(true))
        .build()
        .context("unable to build capsfilter")?;

    Ok(vec![
        generator,
        pads::make("videoconvert", "black-convert")?,
        pads::make("videoscale", "black-scale")?,
        capsfilter,
    ])
}

/// Camera followed by rate limiting, scaling, fixed caps and noise reduction.
///
/// Rate limiting and noise reduction are left out if the elements are not installed, without rate
/// limiting the frame rate is not fixed by the caps.
pub(super) fn device(name: &str, settings: &DeviceSettings) -> Result<Device, DeviceError> {
    let capture = pads::make_device(
        &settings.video_source,
        "capture",
        settings.video_source_device.as_deref(),
    )?;

    let bin = Bin::new(Some(format!("{name}-camera").as_str()));

    let mut chain = vec![capture];

    let rate_limited = pads::is_available(RATE_LIMITER);
    if rate_limited {
        chain.push(
            ElementFactory::make(RATE_LIMITER)
                .name("rate")
                .property("drop-only", true)
                .build()
                .context("unable to build videorate")?,
        );
    } else {
        debug!("{RATE_LIMITER} not available, camera frame rate stays unlimited");
    }

    chain.push(pads::make("videoconvert", "convert")?);
    chain.push(pads::make("videoscale", "scale")?);
    chain.push(
        ElementFactory::make("capsfilter")
            .name("caps")
            .property("caps", settings.video_caps(rate_limited))
            .build()
            .context("unable to build capsfilter")?,
    );

    if settings.noise_reduction {
        if pads::is_available(NOISE_REDUCTION) {
            chain.push(pads::make(NOISE_REDUCTION, "denoise")?);
        } else {
            debug!("{NOISE_REDUCTION} not available, skipping noise reduction");
        }
    }

    let elements: Vec<&Element> = chain.iter().collect();
    bin.add_many(&elements)
        .context("unable to add camera elements to bin")?;
    Element::link_many(&elements).context("unable to link camera elements")?;

    let last = chain.last().context("camera chain is empty")?;
    let src = GhostPad::with_target(
        Some("src"),
        &last.static_pad("src").context("camera chain has no src pad")?,
    )
    .context("unable to create ghost pad for camera")?;
    bin.add_pad(&src)
        .context("unable to add ghost pad to camera bin")?;

    Ok(Device { bin, gain: None })
}
