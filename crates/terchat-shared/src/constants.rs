/// Application name
pub const APP_NAME: &str = "TerChat";

/// Identity used for the server in the `to` / `from` record fields
pub const SERVER_ID: i32 = -1;

/// Default TCP listen port
pub const DEFAULT_PORT: u16 = 8081;

/// Default cap on concurrent sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Maximum record body size in bytes (64 KiB)
pub const MAX_BODY_SIZE: usize = 64 * 1024;

/// Fixed part of a frame after the length prefix: kind, to, from, body_len
pub const HEADER_LEN: usize = 16;

/// Size of the big-endian u32 length prefix in front of every frame
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Persisted layout, relative to the data directory
pub const USERS_DIR: &str = "users";
pub const USER_LIST_FILE: &str = "user_list.txt";
pub const CONTACT_LIST_FILE: &str = "contact_list.txt";
pub const MESSAGES_FILE: &str = "messages.txt";

/// Timestamp format used in `messages.txt`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Confirmation texts sent by the server
pub mod replies {
    pub const LOGGED_IN: &str = "logged in";
    pub const REGISTERED: &str = "registered";
    pub const ALREADY_REGISTERED: &str = "User already registered";
    pub const UNAUTHENTICATED: &str = "Unauthenticated: login required";
    pub const CONTACT_LIST_EMPTY: &str = "Contact list is empty";
    pub const CONTACT_ADDED: &str = "User added to contact list";
    pub const CONTACT_EXISTS: &str = "User already exists in contact list";
    pub const CONTACT_REMOVED: &str = "User deleted from contact list";
    pub const MESSAGE_SENT: &str = "Message sent";
    pub const RECIPIENT_NOT_REGISTERED: &str = "Recipient not registered";
    pub const NO_UNREAD: &str = "No unread message";
    pub const MESSAGES_READ: &str = "Messages read";
    pub const SERVER_ERROR: &str = "Error occurred in server";
    pub const SERVER_FULL: &str = "Server is full, try again later";
}
