use std::sync::Arc;

use kiln_engine::ResourceService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ResourceService>,
    pub auth_token: Arc<String>,
}
