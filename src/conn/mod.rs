// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request parsing, the pre/post-auth filter chain, and dispatch against a
//! URL space.

pub mod dispatch;
pub mod filter;
pub mod request;

pub use dispatch::{ConnFlags, Dispatcher, OpHandler};
pub use filter::{FilterChain, FilterFn, FilterResult};
pub use request::{HeaderCase, ParseLimits, Request, RequestType, parse_headers};
