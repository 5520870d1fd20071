//! Request authentication: the session gate, its session store and the
//! operator credential store it verifies against.

pub mod credentials;
pub mod gate;
pub mod session;

pub use credentials::{CredentialStore, FileCredentialStore};
pub use gate::{GateRequest, SessionGate, Verdict};
pub use session::{SESSION_COOKIE, SessionStore};
