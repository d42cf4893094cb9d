//! Storage key constants.

/// Keys of the persisted credential triple.
pub struct StorageKeys;

impl StorageKeys {
    /// Short-lived bearer access token
    pub const ACCESS: &'static str = "access";

    /// Long-lived refresh token
    pub const REFRESH: &'static str = "refresh";

    /// Display identity of the principal
    pub const USERNAME: &'static str = "username";

    /// Every credential key, in write order.
    pub const ALL: [&'static str; 3] = [Self::ACCESS, Self::REFRESH, Self::USERNAME];
}
