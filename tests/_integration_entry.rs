// SPDX-License-Identifier: AGPL-3.0-or-later

mod integration_tests {
    pub mod common;

    pub mod context_gated_routing;
    pub mod multi_route_dispatch;
    pub mod unmatched_url_returns_404;
}
