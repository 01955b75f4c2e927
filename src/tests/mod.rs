pub mod common;

mod endpoint_auth_ms;
