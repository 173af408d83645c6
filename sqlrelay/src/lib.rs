//! Library surface behind the `sqlrelay` binary, exposed so integration
//! tests can drive a real listener end to end.

pub mod credentials;
pub mod server;
