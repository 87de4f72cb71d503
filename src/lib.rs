// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This is p11wrap
//!
//! A strongly typed client side object model for the PKCS#11 API.
//!
//! Attributes and templates are built from typed values and marshaled to
//! and from the flat `CK_ATTRIBUTE` arrays modules understand. Mechanism
//! parameters are validated on construction and laid out in the structs
//! the standard defines. A [Session] tracks the state of every operation
//! it runs and refuses calls that are out of sequence, and a
//! [SessionPool] hands out a fixed set of sessions to concurrent users.
//!
//! The PKCS#11 module itself is reached through the [Module] trait;
//! [FuncList] implements it over the function list of a loaded module.

pub mod pkcs11;

pub mod attribute;
pub mod capability;
pub mod config;
pub mod error;
pub mod mechanism;
pub mod module;
pub mod pool;
pub mod session;
pub mod template;
pub mod trace;

mod misc;

pub use attribute::{AttrKind, AttrValue, Attribute, AttributeRegistry, Date};
pub use capability::{Capabilities, Protocol};
pub use error::{Error, ErrorKind, Result};
pub use mechanism::{Mechanism, MechanismParams};
pub use module::{FuncList, Module};
pub use pool::{PooledSession, SessionPool};
pub use session::{OperationKind, OperationState, Session};
pub use template::{Template, WireTemplate};

#[cfg(test)]
mod tests;
