/// /auth/* endpoints: password, refresh, logout, OIDC and current identity
use crate::{
    account::{
        AuthResponse, AuthSession, LoginRequest, LogoutRequest, MeResponse, MessageResponse, OidcTokenRequest,
        RefreshRequest, RefreshResponse, RegisterRequest, SessionResponse,
    },
    api::{
        extract::ValidJson,
        middleware::{optional_auth, require_auth},
    },
    auth::{AuthContext, OptionalAuthContext, RequestIdentity},
    context::AppContext,
    error::{GateError, GateResult},
    metrics::{self, flow},
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};

/// Longest User-Agent kept as device metadata
const MAX_DEVICE_INFO_LEN: usize = 255;

/// Build auth routes
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    let protected = Router::new()
        .route("/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(ctx.clone(), require_auth));

    let optional = Router::new()
        .route("/auth/session", get(session))
        .route_layer(middleware::from_fn_with_state(ctx, optional_auth));

    Router::new()
        .merge(protected)
        .merge(optional)
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/oidc/token", post(oidc_token))
}

/// Register a password account and log it in
async fn register(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> GateResult<(StatusCode, Json<AuthResponse>)> {
    let result = ctx
        .account_manager
        .register_and_login(&req.email, &req.username, &req.password, device_info(&headers).as_deref())
        .await;
    metrics::record_auth_attempt(flow::REGISTER, &result);

    let session = result?;
    metrics::record_token_pair();

    Ok((StatusCode::CREATED, Json(session.into())))
}

/// Password login
async fn login(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ValidJson(req): ValidJson<LoginRequest>,
) -> GateResult<Json<AuthResponse>> {
    let result = ctx
        .account_manager
        .login(&req.email, &req.password, device_info(&headers).as_deref())
        .await;
    metrics::record_auth_attempt(flow::PASSWORD, &result);

    let session = result?;
    metrics::record_token_pair();

    Ok(Json(session.into()))
}

/// New access token for a refresh token
async fn refresh(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<RefreshRequest>,
) -> GateResult<Json<RefreshResponse>> {
    let result = ctx.account_manager.refresh_access_token(&req.refresh_token).await;
    metrics::record_auth_attempt(flow::REFRESH, &result);

    let access_token = result?;
    metrics::record_access_token();

    Ok(Json(RefreshResponse { access_token }))
}

/// Revoke a refresh token
async fn logout(
    State(ctx): State<AppContext>,
    ValidJson(req): ValidJson<LogoutRequest>,
) -> GateResult<Json<MessageResponse>> {
    ctx.account_manager.logout(&req.refresh_token).await?;

    Ok(Json(MessageResponse {
        message: "Logged out successfully".to_string(),
    }))
}

/// Exchange an OIDC authorization code for a token pair
async fn oidc_token(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    ValidJson(req): ValidJson<OidcTokenRequest>,
) -> GateResult<Json<AuthResponse>> {
    let client = ctx.oidc_client()?;

    let result: GateResult<AuthSession> = async {
        let claims = client.authenticate(&req.code).await?;
        ctx.account_manager
            .login_with_oidc(client.provider(), &claims, device_info(&headers).as_deref())
            .await
    }
    .await;
    metrics::record_auth_attempt(flow::OIDC, &result);

    let session = result.map_err(|e| {
        tracing::warn!("OIDC login failed: {}", e);
        e
    })?;
    metrics::record_token_pair();

    Ok(Json(session.into()))
}

/// Current identity behind the bearer token
async fn me(State(ctx): State<AppContext>, auth: AuthContext) -> GateResult<Json<MeResponse>> {
    match auth.identity {
        RequestIdentity::Account(identity) => {
            let account = ctx
                .account_manager
                .get_account(identity.account_id)
                .await?
                .ok_or_else(|| GateError::NotFound("Account not found".to_string()))?;
            Ok(Json(MeResponse::Account(account)))
        }
        RequestIdentity::Wallet(identity) => {
            let wallet = ctx
                .wallet_authenticator
                .store()
                .get_by_id(identity.wallet_id)
                .await?
                .ok_or_else(|| GateError::NotFound("Wallet not found".to_string()))?;
            Ok(Json(MeResponse::Wallet(wallet)))
        }
    }
}

/// Whether the caller holds a valid access token
async fn session(auth: OptionalAuthContext) -> Json<SessionResponse> {
    let response = match auth.identity {
        None => SessionResponse {
            authenticated: false,
            kind: None,
            subject_id: None,
        },
        Some(RequestIdentity::Account(identity)) => SessionResponse {
            authenticated: true,
            kind: Some("account".to_string()),
            subject_id: Some(identity.account_id),
        },
        Some(RequestIdentity::Wallet(identity)) => SessionResponse {
            authenticated: true,
            kind: Some("wallet".to_string()),
            subject_id: Some(identity.wallet_id),
        },
    };

    Json(response)
}

/// User-Agent, bounded, as refresh token device metadata
fn device_info(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(MAX_DEVICE_INFO_LEN).collect())
}
