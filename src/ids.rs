use std::fmt;

use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }
    };
}

string_id!(
    /// An authenticated participant (requester or provider).
    ParticipantId
);
string_id!(SessionId);
string_id!(
    /// Opaque token shared by both signaling ends of a session, or the
    /// fan-out group of a broadcast.
    RoomId
);
string_id!(StreamId);
string_id!(
    /// One transport connection. Also serves as a viewer's ephemeral tag in
    /// broadcast signaling.
    ConnectionId
);

generated_id!(SessionId);
generated_id!(RoomId);
generated_id!(StreamId);
generated_id!(ConnectionId);

impl From<&StreamId> for RoomId {
    fn from(stream: &StreamId) -> Self {
        RoomId(format!("live:{}", stream.0))
    }
}
