pub mod auth;
pub mod dirs;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod keygen;
pub mod server;
pub mod store;

pub use error::{Error, Result};

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::Store,
    /// Admin secret verification, backed by the same store.
    pub gate: auth::AdminGate,
}

impl AppState {
    pub fn new(store: store::Store) -> Self {
        let gate = auth::AdminGate::new(store.clone());
        Self { store, gate }
    }
}

pub use server::{open_store, resolve_data_dir, router, run, ServerConfig, DB_FILE_NAME};
