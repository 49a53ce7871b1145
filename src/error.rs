// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crate-wide error taxonomy.
//!
//! `ServerError` covers the outcomes that callers (filters, authorizers, the
//! cache, and the task reactor) need to match on. Leaf-level I/O and config
//! plumbing keep using `anyhow::Result` the way the rest of the crate does.

use thiserror::Error;

/// Outcome kinds shared across the filter chain, the cache, and the reactor.
///
/// `Ok` is represented by `Result::Ok(())`, not a variant here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("error: {0}")]
    Error(String),

    #[error("timeout")]
    Timeout,

    #[error("forbidden")]
    Forbidden,

    #[error("unauthorized")]
    Unauthorized,

    #[error("filter chain break")]
    FilterBreak,

    #[error("filter chain return")]
    FilterReturn,

    #[error("end of data")]
    EndData,
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Error(_) => 500,
            ServerError::Timeout => 408,
            ServerError::Forbidden => 403,
            ServerError::Unauthorized => 401,
            ServerError::FilterBreak | ServerError::FilterReturn => 200,
            ServerError::EndData => 404,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
