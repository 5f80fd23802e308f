// shared CLI constants
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9222;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONNECT_TIMEOUT: i32 = 3;
pub const EXIT_PAGE_LOAD: i32 = 4;
pub const EXIT_MULTIPLE_TABS: i32 = 5;
