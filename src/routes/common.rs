//! Common routes: health, readiness, version.

use crate::gateway::Gateway;
use crate::middleware::ReqData;
use crate::response::{DataResponse, Envelope};
use crate::routes::{view, Methods};
use axum::extract::Request;
use serde_json::json;

async fn health(_req: Request, _data: ReqData) -> Envelope {
    Envelope::json(json!({ "status": "ok" }))
}

async fn version(_req: Request, _data: ReqData) -> Envelope {
    Envelope::json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Pings the pool. Without a database the process is ready as soon as it serves.
async fn ready(gateway: Option<Gateway>) -> Envelope {
    let Some(gateway) = gateway else {
        return Envelope::json(json!({ "status": "ok" }));
    };
    match gateway.ping().await {
        Ok(()) => Envelope::json(json!({ "status": "ok", "database": "ok" })),
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            Envelope::Json(DataResponse::new(json!({ "status": "degraded", "database": "unavailable" })).with_code(503))
        }
    }
}

/// GET /health, GET /ready, GET /version, ready to hand to `Pipeline::register_methods`.
pub fn common_routes(gateway: Option<Gateway>) -> Vec<(&'static str, Methods)> {
    let ready_view = view(move |_req: Request, _data: ReqData| ready(gateway.clone()));
    vec![
        ("/health", Methods::new().get(view(health))),
        ("/ready", Methods::new().get(ready_view)),
        ("/version", Methods::new().get(view(version))),
    ]
}
