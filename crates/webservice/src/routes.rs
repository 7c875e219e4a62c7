//! Built-in route table used by the standalone binary.
//!
//! Embedding hosts supply their own [`RouteDispatcher`]; this one only answers
//! a health probe so the binary is useful on its own.

use common::{RouteDispatcher, WebResponse};
use serde::Serialize;
use tracing::warn;

/// Body of the `status` route.
#[derive(Debug, Clone, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Answers `status` (query string ignored); every other route is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusRoutes;

impl RouteDispatcher for StatusRoutes {
    fn dispatch(&self, route: &str) -> Option<WebResponse> {
        let path = route.split('?').next().unwrap_or(route);
        if path != "status" {
            return None;
        }
        let body = StatusBody {
            status: "ok",
            service: "webservice",
            version: env!("CARGO_PKG_VERSION"),
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => Some(WebResponse::ok("application/json", bytes)),
            Err(e) => {
                warn!(error = %e, "failed to encode status body");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_json() {
        let r = StatusRoutes.dispatch("status").unwrap();
        assert_eq!(r.result_code, 200);
        assert_eq!(r.mime_type, "application/json");
        let v: serde_json::Value = serde_json::from_slice(r.bytes.as_deref().unwrap()).unwrap();
        assert_eq!(v["status"], "ok");
    }

    #[test]
    fn query_string_is_ignored() {
        assert!(StatusRoutes.dispatch("status?verbose=1").is_some());
    }

    #[test]
    fn other_routes_are_unknown() {
        assert!(StatusRoutes.dispatch("sgv.json").is_none());
        assert!(StatusRoutes.dispatch("").is_none());
    }
}
