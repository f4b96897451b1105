//! Security middleware — authentication on top of the pipeline contract.
//!
//! - [`AuthMiddleware`] — rejects callers its [`Authenticator`] does not
//!   recognise with `401`, otherwise stores their [`Principal`].
//! - [`StaticTokenAuthenticator`] — fixed bearer-token table.

mod middleware;

pub use middleware::{AuthMiddleware, Authenticator, Principal, StaticTokenAuthenticator};
