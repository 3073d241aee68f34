pub mod user;

pub use user::{
    AuthToken, ChangePasswordRequest, CredentialRequest, NewUser, OtpSetup, PasswordResetRequest,
    RecoveryCodes, RegisterRequest, ResetPasswordRequest, TwoFaCodeRequest, User, UserStatus,
};
