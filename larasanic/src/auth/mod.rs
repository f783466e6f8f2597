//! Token authentication for web and API routes.
//!
//! Users sign in with email and password and receive a JWT access token. The token is
//! both returned in the response body and set as an HTTP-only cookie, so browsers and API
//! clients authenticate the same way:
//!
//! - the `access_token` cookie, checked first
//! - an `Authorization: Bearer <token>` header
//!
//! Logging out revokes the token's id in the cache until the token would have expired.
//!
//! # Modules
//!
//! - [`extract`]: `Auth` and `AuthUser` request extractors
//! - [`handlers`]: the `/api/auth` endpoints
//! - [`password`]: Argon2id hashing
//! - [`provider`]: the [`UserProvider`] trait and an in-memory implementation
//! - [`service`]: [`AuthService`], which ties the pieces together
//! - [`token`]: access token claims and signing
//!
//! # Usage in handlers
//!
//! ```ignore
//! async fn dashboard(auth: Auth) -> Json<Value> {
//!     Json(auth.user_as_json())
//! }
//!
//! async fn profile(AuthUser(user): AuthUser) -> String {
//!     user.email
//! }
//! ```
//!
//! Route protection lives in [`crate::middleware::auth`] as the `auth` and `guest`
//! route middleware.

pub mod extract;
pub mod handlers;
pub mod password;
pub mod provider;
pub mod service;
pub mod token;

pub use extract::{Auth, AuthUser};
pub use provider::{InMemoryUserProvider, NewUser, User, UserProvider};
pub use service::{AuthService, RegisterData};
