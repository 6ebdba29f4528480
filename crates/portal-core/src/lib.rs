//! Review portal core library
//!
//! Domain primitives shared by the portal's authentication gateway and its
//! CRUD surfaces: the closed set of portal roles, the normalization rule that
//! maps free-form stored role strings onto that set, and the user record
//! returned by the user store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod role;
pub mod user;

pub use role::{Role, normalize_role};
pub use user::PortalUser;
