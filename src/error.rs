// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use thiserror::Error;

use crate::{CallState, ContentId};

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call can not go from {from} to {to}")]
    InvalidTransition { from: CallState, to: CallState },
    #[error("call has ended")]
    Ended,
    #[error("unknown content {0}")]
    UnknownContent(ContentId),
    #[error("content {0} exists already")]
    DuplicateContent(ContentId),
    /// Setting up the media of a content failed.
    #[error(transparent)]
    Media(#[from] anyhow::Error),
}
