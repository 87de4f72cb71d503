// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! The boundary with the PKCS#11 module
//!
//! [Module] has one method per PKCS#11 function the sessions use, so
//! tests can provide their own implementation. [FuncList] implements it
//! over the function list of a loaded module.
//!
//! Methods that produce output take an optional buffer: `None` asks the
//! module for the needed length, `Some` receives the data. Both return
//! the length reported by the module.

use std::fmt::Debug;

use crate::error::{Error, Result};
use crate::misc::{byte_ptr, ck_len};
use crate::pkcs11::*;

fn not_supported<T>() -> Result<T> {
    Err(CKR_FUNCTION_NOT_SUPPORTED)?
}

/// The PKCS#11 calls used by sessions
///
/// Every method defaults to `CKR_FUNCTION_NOT_SUPPORTED`. Errors are
/// the module's return values, unchanged.
pub trait Module: Debug + Send + Sync {
    fn open_session(
        &self,
        _slot: CK_SLOT_ID,
        _flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        not_supported()
    }
    fn close_session(&self, _session: CK_SESSION_HANDLE) -> Result<()> {
        not_supported()
    }

    fn encrypt_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn encrypt(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn encrypt_update(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn encrypt_final(
        &self,
        _session: CK_SESSION_HANDLE,
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn decrypt_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn decrypt(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn decrypt_update(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn decrypt_final(
        &self,
        _session: CK_SESSION_HANDLE,
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn sign_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn sign(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn sign_update(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
    ) -> Result<()> {
        not_supported()
    }
    fn sign_final(
        &self,
        _session: CK_SESSION_HANDLE,
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn verify_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn verify(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _signature: &[u8],
    ) -> Result<()> {
        not_supported()
    }
    fn verify_update(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
    ) -> Result<()> {
        not_supported()
    }
    fn verify_final(
        &self,
        _session: CK_SESSION_HANDLE,
        _signature: &[u8],
    ) -> Result<()> {
        not_supported()
    }

    fn sign_recover_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn sign_recover(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn verify_recover_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    fn verify_recover(
        &self,
        _session: CK_SESSION_HANDLE,
        _signature: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn digest_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
    ) -> Result<()> {
        not_supported()
    }
    fn digest(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn digest_update(
        &self,
        _session: CK_SESSION_HANDLE,
        _data: &[u8],
    ) -> Result<()> {
        not_supported()
    }
    fn digest_final(
        &self,
        _session: CK_SESSION_HANDLE,
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }

    fn generate_key(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        not_supported()
    }
    fn generate_key_pair(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _public_template: &[CK_ATTRIBUTE],
        _private_template: &[CK_ATTRIBUTE],
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        not_supported()
    }
    fn wrap_key(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _wrapping_key: CK_OBJECT_HANDLE,
        _key: CK_OBJECT_HANDLE,
        _out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        not_supported()
    }
    fn unwrap_key(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _unwrapping_key: CK_OBJECT_HANDLE,
        _wrapped_key: &[u8],
        _template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        not_supported()
    }
    fn derive_key(
        &self,
        _session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        _base_key: CK_OBJECT_HANDLE,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        not_supported()
    }

    fn create_object(
        &self,
        _session: CK_SESSION_HANDLE,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        not_supported()
    }
    fn copy_object(
        &self,
        _session: CK_SESSION_HANDLE,
        _object: CK_OBJECT_HANDLE,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        not_supported()
    }
    fn destroy_object(
        &self,
        _session: CK_SESSION_HANDLE,
        _object: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        not_supported()
    }
    /// Fills the values and lengths of `template`
    ///
    /// As in C_GetAttributeValue, CKR_ATTRIBUTE_SENSITIVE and
    /// CKR_ATTRIBUTE_TYPE_INVALID errors still process every entry.
    fn get_attribute_value(
        &self,
        _session: CK_SESSION_HANDLE,
        _object: CK_OBJECT_HANDLE,
        _template: &mut [CK_ATTRIBUTE],
    ) -> Result<()> {
        not_supported()
    }
    fn set_attribute_value(
        &self,
        _session: CK_SESSION_HANDLE,
        _object: CK_OBJECT_HANDLE,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        not_supported()
    }

    fn find_objects_init(
        &self,
        _session: CK_SESSION_HANDLE,
        _template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        not_supported()
    }
    /// Returns the number of handles stored in `handles`
    fn find_objects(
        &self,
        _session: CK_SESSION_HANDLE,
        _handles: &mut [CK_OBJECT_HANDLE],
    ) -> Result<usize> {
        not_supported()
    }
    fn find_objects_final(&self, _session: CK_SESSION_HANDLE) -> Result<()> {
        not_supported()
    }

    fn generate_random(
        &self,
        _session: CK_SESSION_HANDLE,
        _out: &mut [u8],
    ) -> Result<()> {
        not_supported()
    }
    fn seed_random(
        &self,
        _session: CK_SESSION_HANDLE,
        _seed: &[u8],
    ) -> Result<()> {
        not_supported()
    }
}

/// [Module] over the function list of a loaded PKCS#11 module
#[derive(Debug)]
pub struct FuncList {
    fntable: *mut CK_FUNCTION_LIST,
}

/* PKCS#11 modules initialized with CKF_OS_LOCKING_OK are thread safe */
unsafe impl Send for FuncList {}
unsafe impl Sync for FuncList {}

impl FuncList {
    /// Wraps a function list obtained by the module loader
    ///
    /// # Safety
    ///
    /// The pointer must reference the function list of a module that
    /// stays loaded for the lifetime of the returned object.
    pub unsafe fn from_raw(fntable: *mut CK_FUNCTION_LIST) -> Result<FuncList> {
        if fntable.is_null() {
            return Err(Error::invalid_argument(
                "null pkcs11 function list".to_string(),
            ));
        }
        Ok(FuncList { fntable: fntable })
    }

    /// Calls the module entry point to obtain its function list
    ///
    /// # Safety
    ///
    /// Same requirements as [FuncList::from_raw].
    pub unsafe fn from_get_function_list(
        list_fn: CK_C_GetFunctionList,
    ) -> Result<FuncList> {
        let mut fn_list: *mut CK_FUNCTION_LIST = std::ptr::null_mut();
        let rv = match list_fn {
            None => {
                return Err(Error::invalid_argument(
                    "missing C_GetFunctionList entry point".to_string(),
                ))
            }
            Some(func) => func(&mut fn_list),
        };
        if rv != CKR_OK {
            return Err(Error::ck_rv_with_errmsg(
                rv,
                format!("Failed to load pkcs11 function list: {:#x}", rv),
            ));
        }
        Self::from_raw(fn_list)
    }

    pub fn as_ptr(&self) -> *mut CK_FUNCTION_LIST {
        self.fntable
    }
}

/// Looks up a function in the table and calls it, a non CKR_OK return
/// value is turned into an error
macro_rules! ck_call {
    ($self:expr, $name:ident ( $($arg:expr),* $(,)? )) => {{
        let func = match unsafe { (*$self.fntable).$name } {
            Some(f) => f,
            None => {
                return Err(Error::ck_rv_with_errmsg(
                    CKR_FUNCTION_NOT_SUPPORTED,
                    format!(
                        "Broken pkcs11 module, no {} function",
                        stringify!($name)
                    ),
                ));
            }
        };
        let rv = unsafe { func($($arg),*) };
        if rv != CKR_OK {
            log::debug!("{} failed: {:#x}", stringify!($name), rv);
            return Err(Error::ck_rv(rv));
        }
    }};
}

fn mech_ptr(mechanism: &CK_MECHANISM) -> CK_MECHANISM_PTR {
    mechanism as *const CK_MECHANISM as CK_MECHANISM_PTR
}

fn attrs_ptr(template: &[CK_ATTRIBUTE]) -> CK_ATTRIBUTE_PTR {
    if template.is_empty() {
        std::ptr::null_mut()
    } else {
        template.as_ptr() as CK_ATTRIBUTE_PTR
    }
}

fn out_ptr(out: Option<&mut [u8]>) -> Result<(CK_BYTE_PTR, CK_ULONG)> {
    Ok(match out {
        Some(b) => (b.as_mut_ptr(), ck_len(b.len())?),
        None => (std::ptr::null_mut(), 0),
    })
}

impl Module for FuncList {
    fn open_session(
        &self,
        slot: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        let mut handle: CK_SESSION_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_OpenSession(slot, flags, std::ptr::null_mut(), None, &mut handle)
        );
        Ok(handle)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> Result<()> {
        ck_call!(self, C_CloseSession(session));
        Ok(())
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_EncryptInit(session, mech_ptr(mechanism), key));
        Ok(())
    }

    fn encrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_Encrypt(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_EncryptUpdate(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn encrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(self, C_EncryptFinal(session, ptr, &mut len));
        Ok(len)
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_DecryptInit(session, mech_ptr(mechanism), key));
        Ok(())
    }

    fn decrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_Decrypt(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_DecryptUpdate(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn decrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(self, C_DecryptFinal(session, ptr, &mut len));
        Ok(len)
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_SignInit(session, mech_ptr(mechanism), key));
        Ok(())
    }

    fn sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_Sign(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn sign_update(&self, session: CK_SESSION_HANDLE, data: &[u8]) -> Result<()> {
        ck_call!(
            self,
            C_SignUpdate(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?)
        );
        Ok(())
    }

    fn sign_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(self, C_SignFinal(session, ptr, &mut len));
        Ok(len)
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_VerifyInit(session, mech_ptr(mechanism), key));
        Ok(())
    }

    fn verify(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        ck_call!(
            self,
            C_Verify(
                session,
                byte_ptr!(data.as_ptr()),
                ck_len(data.len())?,
                byte_ptr!(signature.as_ptr()),
                ck_len(signature.len())?
            )
        );
        Ok(())
    }

    fn verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        ck_call!(
            self,
            C_VerifyUpdate(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?)
        );
        Ok(())
    }

    fn verify_final(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
    ) -> Result<()> {
        ck_call!(
            self,
            C_VerifyFinal(
                session,
                byte_ptr!(signature.as_ptr()),
                ck_len(signature.len())?
            )
        );
        Ok(())
    }

    fn sign_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_SignRecoverInit(session, mech_ptr(mechanism), key));
        Ok(())
    }

    fn sign_recover(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_SignRecover(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn verify_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(
            self,
            C_VerifyRecoverInit(session, mech_ptr(mechanism), key)
        );
        Ok(())
    }

    fn verify_recover(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_VerifyRecover(
                session,
                byte_ptr!(signature.as_ptr()),
                ck_len(signature.len())?,
                ptr,
                &mut len
            )
        );
        Ok(len)
    }

    fn digest_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
    ) -> Result<()> {
        ck_call!(self, C_DigestInit(session, mech_ptr(mechanism)));
        Ok(())
    }

    fn digest(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_Digest(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?, ptr, &mut len)
        );
        Ok(len)
    }

    fn digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        ck_call!(
            self,
            C_DigestUpdate(session, byte_ptr!(data.as_ptr()), ck_len(data.len())?)
        );
        Ok(())
    }

    fn digest_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(self, C_DigestFinal(session, ptr, &mut len));
        Ok(len)
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_GenerateKey(
                session,
                mech_ptr(mechanism),
                attrs_ptr(template),
                ck_len(template.len())?,
                &mut handle
            )
        );
        Ok(handle)
    }

    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        public_template: &[CK_ATTRIBUTE],
        private_template: &[CK_ATTRIBUTE],
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let mut pubkey: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        let mut privkey: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_GenerateKeyPair(
                session,
                mech_ptr(mechanism),
                attrs_ptr(public_template),
                ck_len(public_template.len())?,
                attrs_ptr(private_template),
                ck_len(private_template.len())?,
                &mut pubkey,
                &mut privkey
            )
        );
        Ok((pubkey, privkey))
    }

    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let (ptr, mut len) = out_ptr(out)?;
        ck_call!(
            self,
            C_WrapKey(
                session,
                mech_ptr(mechanism),
                wrapping_key,
                key,
                ptr,
                &mut len
            )
        );
        Ok(len)
    }

    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_UnwrapKey(
                session,
                mech_ptr(mechanism),
                unwrapping_key,
                byte_ptr!(wrapped_key.as_ptr()),
                ck_len(wrapped_key.len())?,
                attrs_ptr(template),
                ck_len(template.len())?,
                &mut handle
            )
        );
        Ok(handle)
    }

    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        base_key: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_DeriveKey(
                session,
                mech_ptr(mechanism),
                base_key,
                attrs_ptr(template),
                ck_len(template.len())?,
                &mut handle
            )
        );
        Ok(handle)
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_CreateObject(
                session,
                attrs_ptr(template),
                ck_len(template.len())?,
                &mut handle
            )
        );
        Ok(handle)
    }

    fn copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut handle: CK_OBJECT_HANDLE = CK_INVALID_HANDLE;
        ck_call!(
            self,
            C_CopyObject(
                session,
                object,
                attrs_ptr(template),
                ck_len(template.len())?,
                &mut handle
            )
        );
        Ok(handle)
    }

    fn destroy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        ck_call!(self, C_DestroyObject(session, object));
        Ok(())
    }

    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [CK_ATTRIBUTE],
    ) -> Result<()> {
        ck_call!(
            self,
            C_GetAttributeValue(
                session,
                object,
                template.as_mut_ptr(),
                ck_len(template.len())?
            )
        );
        Ok(())
    }

    fn set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        ck_call!(
            self,
            C_SetAttributeValue(
                session,
                object,
                attrs_ptr(template),
                ck_len(template.len())?
            )
        );
        Ok(())
    }

    fn find_objects_init(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        ck_call!(
            self,
            C_FindObjectsInit(
                session,
                attrs_ptr(template),
                ck_len(template.len())?
            )
        );
        Ok(())
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        handles: &mut [CK_OBJECT_HANDLE],
    ) -> Result<usize> {
        let mut count: CK_ULONG = 0;
        ck_call!(
            self,
            C_FindObjects(
                session,
                handles.as_mut_ptr(),
                ck_len(handles.len())?,
                &mut count
            )
        );
        Ok(usize::try_from(count)?)
    }

    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> Result<()> {
        ck_call!(self, C_FindObjectsFinal(session));
        Ok(())
    }

    fn generate_random(
        &self,
        session: CK_SESSION_HANDLE,
        out: &mut [u8],
    ) -> Result<()> {
        ck_call!(
            self,
            C_GenerateRandom(session, out.as_mut_ptr(), ck_len(out.len())?)
        );
        Ok(())
    }

    fn seed_random(&self, session: CK_SESSION_HANDLE, seed: &[u8]) -> Result<()> {
        ck_call!(
            self,
            C_SeedRandom(session, byte_ptr!(seed.as_ptr()), ck_len(seed.len())?)
        );
        Ok(())
    }
}
