// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

use core::fmt::Display;

use crate::CallError;

/// Why a call ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndReason {
    LocalHangup,
    RemoteHangup,
    /// The signaling channel went away.
    Invalidated(String),
    Error(String),
}

impl Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalHangup => write!(f, "hung up"),
            Self::RemoteHangup => write!(f, "remote hung up"),
            Self::Invalidated(reason) => write!(f, "invalidated: {reason}"),
            Self::Error(error) => write!(f, "error: {error}"),
        }
    }
}

/// State of a call channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallState {
    Connecting,
    Ringing,
    Accepted,
    Active,
    Ended(EndReason),
}

impl CallState {
    #[must_use]
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended(_))
    }

    /// Move to `to` if the call may go there from the current state.
    ///
    /// Calls only move forward and `Ended` is final.
    pub fn transition(self, to: CallState) -> Result<CallState, CallError> {
        if self.is_ended() {
            return Err(CallError::Ended);
        }
        if to.is_ended() || self.rank() < to.rank() {
            Ok(to)
        } else {
            Err(CallError::InvalidTransition { from: self, to })
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Ringing => 1,
            Self::Accepted => 2,
            Self::Active => 3,
            Self::Ended(_) => 4,
        }
    }
}

impl Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Ringing => write!(f, "ringing"),
            Self::Accepted => write!(f, "accepted"),
            Self::Active => write!(f, "active"),
            Self::Ended(reason) => write!(f, "ended ({reason})"),
        }
    }
}
