// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! PKCS#11 API definitions
//!
//! The ABI types and constants come from the `cryptoki-sys` bindings, this
//! module adds the few definitions the bindings lack or get wrong for our
//! purposes, and the resolution of vendor defined codes.

pub use cryptoki_sys::*;

pub mod vendor;

// this is wrongly converted on 32b architecture to too large value
// which can not be represented in CK_ULONG.
pub const CK_UNAVAILABLE_INFORMATION: CK_ULONG = CK_ULONG::MAX;

pub const CK_INVALID_HANDLE: CK_ULONG = 0;

pub const CK_ULONG_SIZE: usize = std::mem::size_of::<CK_ULONG>();
pub const CK_BBOOL_SIZE: usize = std::mem::size_of::<CK_BBOOL>();

/// Returned for vendor names that are not known to the configuration
pub const UNRESOLVED_VENDOR_CODE: CK_ULONG = 0x80000000;

/// Returns the symbolic name of a few well known return values, used
/// to make error messages readable
pub fn rv_name(rv: CK_RV) -> Option<&'static str> {
    macro_rules! rv_names {
        ($rv:expr; $($name:ident),+ $(,)?) => {
            match $rv {
                $($name => Some(stringify!($name)),)+
                _ => None,
            }
        };
    }
    rv_names!(rv;
        CKR_OK,
        CKR_CANCEL,
        CKR_HOST_MEMORY,
        CKR_SLOT_ID_INVALID,
        CKR_GENERAL_ERROR,
        CKR_FUNCTION_FAILED,
        CKR_ARGUMENTS_BAD,
        CKR_ATTRIBUTE_READ_ONLY,
        CKR_ATTRIBUTE_SENSITIVE,
        CKR_ATTRIBUTE_TYPE_INVALID,
        CKR_ATTRIBUTE_VALUE_INVALID,
        CKR_DATA_INVALID,
        CKR_DATA_LEN_RANGE,
        CKR_DEVICE_ERROR,
        CKR_ENCRYPTED_DATA_INVALID,
        CKR_ENCRYPTED_DATA_LEN_RANGE,
        CKR_FUNCTION_NOT_SUPPORTED,
        CKR_KEY_HANDLE_INVALID,
        CKR_KEY_TYPE_INCONSISTENT,
        CKR_KEY_FUNCTION_NOT_PERMITTED,
        CKR_MECHANISM_INVALID,
        CKR_MECHANISM_PARAM_INVALID,
        CKR_OBJECT_HANDLE_INVALID,
        CKR_OPERATION_ACTIVE,
        CKR_OPERATION_NOT_INITIALIZED,
        CKR_SESSION_CLOSED,
        CKR_SESSION_COUNT,
        CKR_SESSION_HANDLE_INVALID,
        CKR_SIGNATURE_INVALID,
        CKR_SIGNATURE_LEN_RANGE,
        CKR_TEMPLATE_INCOMPLETE,
        CKR_TEMPLATE_INCONSISTENT,
        CKR_USER_NOT_LOGGED_IN,
        CKR_BUFFER_TOO_SMALL,
        CKR_CRYPTOKI_NOT_INITIALIZED,
    )
}
