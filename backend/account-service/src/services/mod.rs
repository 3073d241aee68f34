pub mod account;
pub mod auth;
pub mod outbox;
pub mod two_fa;

pub use account::AccountService;
pub use auth::{AuthPolicy, AuthService};
pub use outbox::{spawn_outbox_relay, OutboxRelayHandle};
pub use two_fa::TwoFaService;
