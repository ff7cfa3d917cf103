//! Security utilities

pub mod headers;
pub mod random;
pub mod timing;

pub use headers::{add_security_headers, with_api_security_headers};
pub use random::{generate_token, hash_token, TOKEN_BYTES};
pub use timing::{constant_time_eq, constant_time_eq_bytes};
