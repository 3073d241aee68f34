pub mod events;

pub use events::{
    registration_events, UserChangedEvent, UserRegisteredEvent, UserResetPasswordEvent,
    TOPIC_USER_CHANGED, TOPIC_USER_REGISTERED, TOPIC_USER_RESET_PASSWORD,
};
