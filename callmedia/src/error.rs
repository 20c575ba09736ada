// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use thiserror::Error;

/// Reasons why a capture or output device could not be activated.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The element factory is not installed on this system.
    #[error("element '{0}' is not available")]
    MissingElement(String),
    /// The device element refused to go into the `Ready` state.
    #[error("device '{0}' could not be opened")]
    NotReady(String),
    /// Building or linking the surrounding elements failed.
    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}
