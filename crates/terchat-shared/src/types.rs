use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::SERVER_ID;

// User identity = client-chosen integer, not verified by the server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(pub i32);

impl UserId {
    /// The pseudo-identity used in the `to` / `from` fields for the server itself.
    pub const SERVER: UserId = UserId(SERVER_ID);

    pub fn is_server(&self) -> bool {
        self.0 == SERVER_ID
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i32>().map(UserId)
    }
}

/// Request / response kind carried in the first field of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum RecordKind {
    Disconnect = -1,
    LoginRequest = 0,
    ServerNotice = 1,
    /// Server -> client: RegistrationRequired. Client -> server: RegistrationRequest.
    Registration = 2,
    Confirmation = 3,
    ListContacts = 4,
    AddContact = 5,
    RemoveContact = 6,
    SendMessage = 7,
    CheckUnread = 8,
    MarkRead = 9,
}

impl RecordKind {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Disconnect),
            0 => Some(Self::LoginRequest),
            1 => Some(Self::ServerNotice),
            2 => Some(Self::Registration),
            3 => Some(Self::Confirmation),
            4 => Some(Self::ListContacts),
            5 => Some(Self::AddContact),
            6 => Some(Self::RemoveContact),
            7 => Some(Self::SendMessage),
            8 => Some(Self::CheckUnread),
            9 => Some(Self::MarkRead),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        for code in -1..=9 {
            let kind = RecordKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert_eq!(RecordKind::from_code(10), None);
        assert_eq!(RecordKind::from_code(-2), None);
    }

    #[test]
    fn test_user_id_parse() {
        assert_eq!(" 42".parse::<UserId>().unwrap(), UserId(42));
        assert!("abc".parse::<UserId>().is_err());
        assert!(UserId::SERVER.is_server());
    }
}
