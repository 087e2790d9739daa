//! OAuth2 credential resolution for the Gmail API.
//!
//! [`CredentialResolver`] walks a fixed precedence chain: environment
//! variables, the persisted token file (refreshing it once if needed), then an
//! interactive browser or console authorization. Results that did not come
//! from the environment are written back to the token file.

pub mod client_identity;
pub mod config;
pub mod credential;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod resolver;
pub mod token_store;

pub use crate::client_identity::{ClientIdentity, ClientSecretsFile, IdentitySource};
pub use crate::config::{AuthConfig, InteractiveMode, GMAIL_SCOPES};
pub use crate::credential::{Credential, CredentialSource};
pub use crate::error::{CredentialResolutionError, Result};
pub use crate::flow::{CodeReceiver, LoopbackReceiver, ManualReceiver};
pub use crate::resolver::CredentialResolver;
pub use crate::token_store::TokenStore;
