pub const SOCKET_MAX_ATTEMPTS: usize = 10;
pub const SOCKET_MAX_BACKOFF: usize = 10;
