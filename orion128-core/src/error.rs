// This file is part of orion128.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fmt;

/// Errors surfaced while assembling the machine. Steady-state stepping is
/// total and never fails.
#[derive(Debug)]
pub enum Error {
    InvalidArgument(&'static str),
    InvalidState(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
