use std::sync::Arc;

use gateway_auth::Authenticator;
use gateway_discussion::templates::TemplateStore;
use gateway_engine::AppContext;

/// Shared application state handed to every axum handler via `State`.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub auth: Arc<Authenticator>,
    pub templates: Arc<TemplateStore>,
}
