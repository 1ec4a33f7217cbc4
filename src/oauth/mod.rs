//! OAuth2 proxying layer
//!
//! The gateway is not a token issuer. It exposes the OAuth surface a
//! dynamically-registering MCP client expects at the gateway's own origin
//! and forwards the real work to the upstream authorization server:
//!
//! - `verifier` resolves bearer tokens to identity facts via the upstream
//!   userinfo endpoint
//! - `clients` caches full client records (including the secret the
//!   upstream lookup endpoint never returns) at registration time
//! - `proxy` serves discovery documents and the authorize/token/register
//!   facade

pub mod clients;
pub mod proxy;
pub mod verifier;

pub use clients::{CachingClientStore, ClientRecord, ClientRegistrar, ClientStore, UpstreamRegistrar};
pub use verifier::{AuthContext, Identity, TokenVerifier, UpstreamVerifier, UserInfo};
