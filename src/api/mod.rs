/// API routes and handlers
pub mod auth;
pub mod extract;
pub mod middleware;
pub mod wallet;


use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes(ctx: AppContext) -> Router<AppContext> {
    Router::new()
        .merge(auth::routes(ctx.clone()))
        .merge(wallet::routes(ctx))
}
