//! Request middleware.

pub mod identity;

pub use identity::{Actor, USER_ID_HEADER, identity_middleware};
