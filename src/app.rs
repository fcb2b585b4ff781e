//! Demo application routes
//!
//! Stand-in for the real application layer: a tiny product-catalog API.
//! Anything beyond these routes answers 404.

use crate::http::{Handler, Request, Response};
use serde_json::json;

pub struct DemoApp;

impl Handler for DemoApp {
    fn handle(&self, req: &Request) -> Response {
        match req.path.as_str() {
            "/products/" => Response::json(200, "OK", json!({ "results": [] })),
            "/health" => Response::json(200, "OK", json!({ "status": "healthy" })),
            _ => Response::json(404, "Not Found", json!({ "error": "Not Found" })),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
