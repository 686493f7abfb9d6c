//! Hard limits on client-supplied text. Column widths follow the `cliente` schema.

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_PHONE_LEN: usize = 11;
/// Wide enough for a bcrypt hash.
pub const MAX_SECRET_LEN: usize = 60;

/// Longest date/time token accepted before parsing is attempted.
pub const MAX_TIME_TOKEN_LEN: usize = 32;
