// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Error type shared by the whole crate
//!
//! Every error carries a `CK_RV` so it can be reported in PKCS#11 terms,
//! the [ErrorKind] tells apart errors returned by the module from the ones
//! raised on the client side before anything is sent to the module.

use std::error;
use std::fmt;
use std::time::Duration;

use crate::pkcs11::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error + Send + Sync>>,
    errmsg: Option<String>,
    ckrv: CK_RV,
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /* A Cryptoki-style error, see ckrv Error field */
    CkError,
    /* A value was rejected when constructing an object */
    InvalidArgument,
    /* The call is not legal in the current operation state */
    InvalidOperationState,
    /* The session pool had nothing to hand out in time */
    NoSessionAvailable,
    /* Data returned by the module could not be decoded */
    Marshal,
    /* The attribute was not found, see errmsg */
    AttributeNotFound,
    /* Other error, see origin */
    Nested,
}

impl Error {
    pub fn ck_rv(ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
        }
    }

    pub fn ck_rv_from_error<E>(ckrv: CK_RV, error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::CkError,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: ckrv,
        }
    }

    pub fn ck_rv_with_errmsg(ckrv: CK_RV, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::CkError,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: ckrv,
        }
    }

    pub fn invalid_argument(errmsg: String) -> Error {
        Error {
            kind: ErrorKind::InvalidArgument,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_ARGUMENTS_BAD,
        }
    }

    pub fn invalid_state(ckrv: CK_RV, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::InvalidOperationState,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: ckrv,
        }
    }

    pub fn no_session(timeout: Duration) -> Error {
        Error {
            kind: ErrorKind::NoSessionAvailable,
            origin: None,
            errmsg: Some(format!(
                "no session available after waiting {:?}",
                timeout
            )),
            ckrv: CKR_SESSION_COUNT,
        }
    }

    pub fn marshal(ckrv: CK_RV, errmsg: String) -> Error {
        Error {
            kind: ErrorKind::Marshal,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: ckrv,
        }
    }

    pub fn not_found(errmsg: String) -> Error {
        Error {
            kind: ErrorKind::AttributeNotFound,
            origin: None,
            errmsg: Some(errmsg),
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn other_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            kind: ErrorKind::Nested,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn attr_not_found(&self) -> bool {
        self.kind == ErrorKind::AttributeNotFound
    }

    pub fn is_invalid_state(&self) -> bool {
        self.kind == ErrorKind::InvalidOperationState
    }

    pub fn is_no_session(&self) -> bool {
        self.kind == ErrorKind::NoSessionAvailable
    }

    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref e) = self.errmsg {
            return write!(f, "{}", e);
        }
        match self.kind {
            ErrorKind::Nested => match self.origin {
                Some(ref o) => o.fmt(f),
                None => write!(f, "unknown error"),
            },
            _ => match rv_name(self.ckrv) {
                Some(name) => write!(f, "{}", name),
                None => write!(f, "CK_RV({:#x})", self.ckrv),
            },
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.origin {
            Some(ref o) => Some(o.as_ref()),
            None => None,
        }
    }
}

impl From<CK_RV> for Error {
    fn from(error: CK_RV) -> Error {
        Error::ck_rv(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::other_error(error)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(error: std::convert::Infallible) -> Error {
        Error::other_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_symbolic_names() {
        let e = Error::ck_rv(CKR_OPERATION_ACTIVE);
        assert_eq!(e.to_string(), "CKR_OPERATION_ACTIVE");
        assert_eq!(e.kind(), ErrorKind::CkError);

        let e: Error = CK_RV::from(0x0fff_fff0u32).into();
        assert_eq!(e.to_string(), "CK_RV(0xffffff0)");
    }

    #[test]
    fn client_side_kinds() {
        let e = Error::no_session(Duration::from_millis(5));
        assert!(e.is_no_session());
        assert_eq!(e.rv(), CKR_SESSION_COUNT);

        let e = Error::invalid_state(
            CKR_OPERATION_NOT_INITIALIZED,
            "sign not initialized".to_string(),
        );
        assert!(e.is_invalid_state());
        assert_eq!(e.to_string(), "sign not initialized");
    }
}
