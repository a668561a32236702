pub mod auth;
pub mod billing;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod money;
pub mod provider;
pub mod routing;
pub mod sweeper;
pub mod vault;
pub mod webhook;

pub use auth::{AuthenticationGateway, ClientIdentity};
pub use billing::{BillingLedger, LedgerConfig};
pub use channel::{Channel, RateCard};
pub use dispatcher::{RelayDispatcher, SendReceipt, SendRequest};
pub use error::RelayError;
pub use routing::RoutingResolver;
pub use sweeper::RecoverySweeper;
pub use vault::CredentialVault;
pub use webhook::WebhookIngestor;
