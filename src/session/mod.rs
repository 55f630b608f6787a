//! Client-side session: a bearer token and a cached user snapshot kept in
//! local storage, restored on startup and cleared on logout.

pub mod client;
pub mod manager;
pub mod storage;

pub use client::{AuthApi, ClientError, HttpAuthApi};
pub use manager::{SessionManager, SessionState};
pub use storage::{FileStorage, LocalStorage, MemoryStorage, StorageError};

pub const AUTH_TOKEN_KEY: &str = "authToken";
pub const USER_DATA_KEY: &str = "userData";
