// SPDX-License-Identifier: AGPL-3.0-or-later

//! The pre-auth / authorize / post-auth / op / trace filter chain a
//! dispatched request runs through.

use std::sync::Arc;

use crate::{error::ServerError, urlspace::RequestContext};

/// Outcome of one filter in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Ok,
    /// Skip remaining filters at this stage, proceed to the next stage.
    Break,
    /// Terminate the request immediately after this stage's filters run.
    Return,
    Error,
    Forbidden,
    Unauthorized,
}

impl FilterResult {
    pub fn into_server_error(self) -> Option<ServerError> {
        match self {
            FilterResult::Ok | FilterResult::Break | FilterResult::Return => None,
            FilterResult::Error => Some(ServerError::Error("filter error".to_string())),
            FilterResult::Forbidden => Some(ServerError::Forbidden),
            FilterResult::Unauthorized => Some(ServerError::Unauthorized),
        }
    }
}

pub type FilterFn = Arc<dyn Fn(&RequestContext) -> FilterResult + Send + Sync>;

#[derive(Clone)]
pub struct FilterChain {
    pre_auth: Vec<FilterFn>,
    authorizers: Vec<FilterFn>,
    post_auth: Vec<FilterFn>,
    trace: Vec<FilterFn>,
    void_trace: Vec<FilterFn>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            pre_auth: Vec::new(),
            authorizers: Vec::new(),
            post_auth: Vec::new(),
            trace: Vec::new(),
            void_trace: Vec::new(),
        }
    }

    pub fn add_pre_auth(&mut self, f: FilterFn) {
        self.pre_auth.push(f);
    }

    pub fn add_authorizer(&mut self, f: FilterFn) {
        self.authorizers.push(f);
    }

    pub fn add_post_auth(&mut self, f: FilterFn) {
        self.post_auth.push(f);
    }

    pub fn add_trace(&mut self, f: FilterFn) {
        self.trace.push(f);
    }

    pub fn add_void_trace(&mut self, f: FilterFn) {
        self.void_trace.push(f);
    }

    /// Runs `filters` in registration order; `BREAK` stops the stage without
    /// failing the request, any other non-`Ok` result is returned as the
    /// stage's outcome for the caller to map to an error response.
    fn run_stage(filters: &[FilterFn], ctx: &RequestContext) -> FilterResult {
        for f in filters {
            match f(ctx) {
                FilterResult::Ok => continue,
                other => return other,
            }
        }
        FilterResult::Ok
    }

    /// Runs pre-auth, authorizers, then post-auth, short-circuiting on the
    /// first non-`Ok`/`Break` result. `TRACE`/`VOID_TRACE` are run
    /// separately via [`FilterChain::run_trace`], always, regardless of this
    /// outcome.
    pub fn run_pre_op(&self, ctx: &RequestContext) -> FilterResult {
        match Self::run_stage(&self.pre_auth, ctx) {
            FilterResult::Ok | FilterResult::Break => {},
            other => return other,
        }
        match Self::run_stage(&self.authorizers, ctx) {
            FilterResult::Ok | FilterResult::Break => {},
            other => return other,
        }
        Self::run_stage(&self.post_auth, ctx)
    }

    /// `TRACE` then `VOID_TRACE`, unconditionally, regardless of earlier
    /// outcomes -- the dispatcher calls this on every path including errors.
    pub fn run_trace(&self, ctx: &RequestContext) {
        for f in &self.trace {
            f(ctx);
        }
        for f in &self.void_trace {
            f(ctx);
        }
    }
}
