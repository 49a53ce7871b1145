// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ties request parsing, URL space resolution, and the filter chain into
//! the per-connection dispatch sequence described for the connection layer.

use std::sync::Arc;

use bitflags::bitflags;

use super::{
    filter::{FilterChain, FilterResult},
    request::Request,
};
use crate::{
    error::{ServerError, ServerResult},
    urlspace::{RequestContext, UrlSpace},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnFlags: u8 {
        const CHUNK    = 0b0001;
        const CONTINUE = 0b0010;
        const KEEPALIVE = 0b0100;
    }
}

pub type OpHandler = Arc<dyn Fn(&Request, &RequestContext) -> ServerResult<()> + Send + Sync>;

/// A per-connection dispatcher bound to one junction's URL space.
pub struct Dispatcher {
    junction_id: u64,
    filters: FilterChain,
}

impl Dispatcher {
    pub fn new(junction_id: u64, filters: FilterChain) -> Self {
        Self { junction_id, filters }
    }

    /// Resolves and runs the handler for `request`, per the stage order:
    /// pre-auth -> authorize -> post-auth -> op -> trace -> void-trace. The
    /// trace stages always run, even if an earlier stage failed.
    pub async fn dispatch(
        &self,
        urlspace: &UrlSpace<OpHandler>,
        request: &Request,
        ctx: &RequestContext,
    ) -> ServerResult<()> {
        let result = self.dispatch_inner(urlspace, request, ctx).await;
        self.filters.run_trace(ctx);
        result
    }

    async fn dispatch_inner(
        &self,
        urlspace: &UrlSpace<OpHandler>,
        request: &Request,
        ctx: &RequestContext,
    ) -> ServerResult<()> {
        match self.filters.run_pre_op(ctx) {
            FilterResult::Ok | FilterResult::Break => {},
            FilterResult::Return => return Ok(()),
            other => return Err(other.into_server_error().unwrap_or(ServerError::Error("filter failed".into()))),
        }

        let found = match urlspace.get(self.junction_id, "*", &request.url, ctx, false).await {
            Some(found) => Some(found),
            None => urlspace.get(self.junction_id, &request.method, &request.url, ctx, false).await,
        };
        let handler = found.ok_or(ServerError::EndData)?;

        (handler.value)(request, ctx)
    }

    /// Re-resolves `new_url` against the same junction and context, as an
    /// internal redirect -- no new connection or request line is read.
    pub async fn redirect(
        &self,
        urlspace: &UrlSpace<OpHandler>,
        request: &Request,
        ctx: &RequestContext,
        new_url: &str,
    ) -> ServerResult<()> {
        let mut redirected = request.clone();
        redirected.url = new_url.to_string();
        self.dispatch(urlspace, &redirected, ctx).await
    }
}
