pub const EXIT_OK: i32 = 0;
pub const EXIT_NO_PORT: i32 = 10;
pub const EXIT_INVALID_HEX: i32 = 11;
pub const EXIT_PROTOCOL: i32 = 12;
pub const EXIT_TIMEOUT: i32 = 13;
pub const EXIT_AMBIGUOUS: i32 = 14;
pub const EXIT_BAD_IMAGE: i32 = 15;
pub const EXIT_ABORTED: i32 = 16;
pub const EXIT_UNEXPECTED: i32 = 20;
