/// /wallet/* endpoints, authenticated by signed envelope
use crate::{
    api::middleware::require_signed_envelope,
    auth::{IdentityClaims, SignedRequest},
    context::AppContext,
    db::account::Wallet,
    error::{GateError, GateResult},
    metrics::{self, flow},
    wallet::envelope::DEFAULT_ACTION,
};
use axum::{extract::State, middleware, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletLoginResponse {
    pub token: String,
    pub wallet: Wallet,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifiedRequestResponse {
    pub wallet: Wallet,
    pub system: String,
    pub action: String,
    /// Decoded payload, exactly as signed
    pub payload: Value,
}

/// Build wallet routes; every route here takes an envelope body
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .route("/wallet/login", post(login))
        .route("/wallet/verify", post(verify))
        .route_layer(middleware::from_fn_with_state(ctx, require_signed_envelope))
}

/// Trade a signed `login` envelope for a wallet access token
async fn login(
    State(ctx): State<AppContext>,
    SignedRequest(verified): SignedRequest,
) -> GateResult<Json<WalletLoginResponse>> {
    let result = if verified.action() != DEFAULT_ACTION {
        Err(GateError::Unauthorized(format!(
            "Envelope action must be \"{}\"",
            DEFAULT_ACTION
        )))
    } else {
        ctx.tokens
            .issue(
                verified.wallet.id,
                IdentityClaims::Wallet {
                    address: verified.wallet.address.clone(),
                    system: verified.system.clone(),
                },
            )
            .map_err(GateError::from)
    };
    metrics::record_auth_attempt(flow::WALLET, &result);

    let token = result?;
    metrics::record_access_token();
    tracing::info!("Wallet {} logged in", verified.wallet.address);

    Ok(Json(WalletLoginResponse {
        token,
        wallet: verified.wallet.clone(),
    }))
}

/// Echo the verified request back to the signer
async fn verify(SignedRequest(verified): SignedRequest) -> Json<VerifiedRequestResponse> {
    Json(VerifiedRequestResponse {
        wallet: verified.wallet.clone(),
        system: verified.system.clone(),
        action: verified.action().to_string(),
        payload: verified.raw_payload.clone(),
    })
}
