pub mod containers;
pub mod helpers;
pub mod tokens;
pub mod users;

use axum::Router;

use crate::store::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(users::router())
        .merge(containers::router())
        .merge(tokens::router())
}
