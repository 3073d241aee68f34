/// Security module for authentication and authorization
///
/// - **jwt**: scoped token issuing/validation (HS256 or RS256)
/// - **password**: Argon2id password hashing
/// - **totp**: TOTP second factor and recovery codes
pub mod jwt;
pub mod password;
pub mod totp;

pub use jwt::{require_scope, Claims, JwtTokenIssuer, Scope, TokenIssuer};
pub use password::{hash_password, verify_password};
pub use totp::{OtpEngine, TotpEngine};
