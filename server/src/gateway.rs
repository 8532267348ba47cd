use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use metrics::counter;
use protocol::{AuthGrant, AuthRequest, GrantSigner, WireError};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::router::PrpcRouter;
use crate::session::SessionProvider;

/// Everything the gateway needs per request. Deliberately holds no presence
/// or membership state; the broker is the only source of truth for that.
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<PrpcRouter>,
    pub signer: Arc<GrantSigner>,
    pub sessions: Arc<dyn SessionProvider>,
}

pub fn routes(state: GatewayState) -> axum::Router {
    axum::Router::new()
        .route("/api/prpc/", post(authorize_channel))
        .route("/api/prpc/{route}", post(call_procedure))
        .with_state(state)
}

type Rejection = (StatusCode, Json<WireError>);

/// Channel-authorization requests from the broker client SDK. All failures
/// collapse to the same opaque 403 body.
async fn authorize_channel(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(request): Json<AuthRequest>,
) -> std::result::Result<Json<AuthGrant>, Rejection> {
    match authorize(&state, &headers, &request).await {
        Ok(grant) => {
            counter!("prpc_auth_granted").increment(1);
            Ok(Json(grant))
        }
        Err(e) => {
            counter!("prpc_auth_rejected").increment(1);
            warn!(channel = %request.channel_name, err = ?e, "channel authorization rejected");
            Err((
                StatusCode::FORBIDDEN,
                Json(e.to_wire_error(Some(&request.channel_name))),
            ))
        }
    }
}

pub async fn authorize(
    state: &GatewayState,
    headers: &HeaderMap,
    request: &AuthRequest,
) -> Result<AuthGrant> {
    let session = state.sessions.session(headers).await?;
    let (channel, member) = state.router.authorize(request, session).await?;
    let grant = state
        .signer
        .sign(&request.socket_id, &request.channel_name, Some(&member))?;

    debug!(channel = %channel, socket_id = %request.socket_id, "grant issued");
    Ok(grant)
}

/// Plain procedure calls, forwarded to the route's handler over the same
/// JSON codec the auth side uses.
async fn call_procedure(
    State(state): State<GatewayState>,
    Path(route): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> std::result::Result<Json<Value>, Rejection> {
    match call(&state, &route, &headers, input).await {
        Ok(output) => Ok(Json(output)),
        Err(e) => {
            warn!(route = %route, err = ?e, "procedure call failed");
            Err((status_for(&e), Json(e.to_wire_error(None))))
        }
    }
}

pub async fn call(
    state: &GatewayState,
    route: &str,
    headers: &HeaderMap,
    input: Value,
) -> Result<Value> {
    let session = state.sessions.session(headers).await?;
    state.router.call(route, session, input).await
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UnknownRoute(_) => StatusCode::NOT_FOUND,
        Error::Input(_) => StatusCode::BAD_REQUEST,
        Error::Authorization(_) | Error::Protocol(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
