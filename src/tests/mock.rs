// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! An in-memory module that behaves enough like a token to drive
//! sessions through their protocols

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::attribute::{AttrKind, AttributeRegistry};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::pkcs11::*;

#[derive(Clone, Debug, PartialEq)]
pub enum MockValue {
    Bytes(Vec<u8>),
    Nested(Vec<(CK_ATTRIBUTE_TYPE, Vec<u8>)>),
    /// never returned by C_GetAttributeValue
    Sensitive(Vec<u8>),
}

type MockObject = Vec<(CK_ATTRIBUTE_TYPE, MockValue)>;

#[derive(Debug)]
struct MockOp {
    mechanism: CK_MECHANISM_TYPE,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    next_session: CK_SESSION_HANDLE,
    sessions: HashSet<CK_SESSION_HANDLE>,
    next_object: CK_OBJECT_HANDLE,
    objects: HashMap<CK_OBJECT_HANDLE, MockObject>,
    ops: HashMap<(CK_SESSION_HANDLE, &'static str), MockOp>,
    searches: HashMap<CK_SESSION_HANDLE, Vec<CK_OBJECT_HANDLE>>,
    failures: HashMap<&'static str, (usize, CK_RV)>,
    calls: Vec<&'static str>,
}

impl MockState {
    /* the failure injected for this invocation of `call`, if any */
    fn injected(&mut self, call: &'static str) -> Option<CK_RV> {
        let (skip, rv) = *self.failures.get(call)?;
        if skip > 0 {
            self.failures.insert(call, (skip - 1, rv));
            return None;
        }
        self.failures.remove(call);
        Some(rv)
    }

    fn add_object(&mut self, object: MockObject) -> CK_OBJECT_HANDLE {
        self.next_object += 1;
        self.objects.insert(self.next_object, object);
        self.next_object
    }

    fn op(
        &mut self,
        session: CK_SESSION_HANDLE,
        name: &'static str,
    ) -> Result<&mut MockOp> {
        match self.ops.get_mut(&(session, name)) {
            Some(op) => Ok(op),
            None => Err(Error::ck_rv(CKR_OPERATION_NOT_INITIALIZED)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockModule {
    state: Mutex<MockState>,
}

/// Reversible stand-in for a cipher
pub fn mock_cipher(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b ^ 0x5a).collect()
}

/// Stand-in for signatures and digests, depends on the mechanism
pub fn mock_tag(mechanism: CK_MECHANISM_TYPE, data: &[u8]) -> Vec<u8> {
    let mut acc = mechanism as u64;
    for b in data {
        acc = acc.wrapping_mul(31).wrapping_add(*b as u64);
    }
    acc.to_be_bytes().to_vec()
}

fn mock_recover(_: CK_MECHANISM_TYPE, data: &[u8]) -> Vec<u8> {
    data.iter().rev().copied().collect()
}

fn mock_stream(_: CK_MECHANISM_TYPE, data: &[u8]) -> Vec<u8> {
    mock_cipher(data)
}

unsafe fn read_bytes(a: &CK_ATTRIBUTE) -> Vec<u8> {
    if a.pValue.is_null() || a.ulValueLen == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(a.pValue as *const u8, a.ulValueLen as usize)
        .to_vec()
}

fn read_template(template: &[CK_ATTRIBUTE]) -> MockObject {
    let registry = AttributeRegistry::global();
    let mut object = MockObject::new();
    for a in template {
        let value = if registry.kind(a.type_) == AttrKind::Template {
            let count =
                a.ulValueLen as usize / std::mem::size_of::<CK_ATTRIBUTE>();
            let nested: &[CK_ATTRIBUTE] = if count == 0 {
                &[]
            } else {
                unsafe {
                    std::slice::from_raw_parts(
                        a.pValue as *const CK_ATTRIBUTE,
                        count,
                    )
                }
            };
            MockValue::Nested(
                nested
                    .iter()
                    .map(|n| (n.type_, unsafe { read_bytes(n) }))
                    .collect(),
            )
        } else {
            MockValue::Bytes(unsafe { read_bytes(a) })
        };
        object.push((a.type_, value));
    }
    object
}

fn merge(object: &mut MockObject, update: MockObject) {
    for (t, v) in update {
        match object.iter_mut().find(|(ot, _)| *ot == t) {
            Some(entry) => entry.1 = v,
            None => object.push((t, v)),
        }
    }
}

/* CKA_SENSITIVE set to true hides the key value */
fn apply_sensitive(object: &mut MockObject) {
    let sensitive = object.iter().any(|(t, v)| {
        *t == CKA_SENSITIVE && *v == MockValue::Bytes(vec![CK_TRUE])
    });
    if !sensitive {
        return;
    }
    for (t, v) in object.iter_mut() {
        if *t == CKA_VALUE {
            if let MockValue::Bytes(b) = v {
                let secret = b.clone();
                *v = MockValue::Sensitive(secret);
            }
        }
    }
}

/* returns the rv for the entry, CKR_OK if filled or only sized */
fn fill_bytes(a: &mut CK_ATTRIBUTE, value: &[u8]) -> CK_RV {
    let len = value.len() as CK_ULONG;
    if a.pValue.is_null() {
        a.ulValueLen = len;
        return CKR_OK;
    }
    if a.ulValueLen < len {
        a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
        return CKR_BUFFER_TOO_SMALL;
    }
    if !value.is_empty() {
        unsafe {
            std::ptr::copy_nonoverlapping(
                value.as_ptr(),
                a.pValue as *mut u8,
                value.len(),
            );
        }
    }
    a.ulValueLen = len;
    CKR_OK
}

fn fill_nested(
    a: &mut CK_ATTRIBUTE,
    entries: &[(CK_ATTRIBUTE_TYPE, Vec<u8>)],
) -> CK_RV {
    let size = std::mem::size_of::<CK_ATTRIBUTE>();
    let len = (entries.len() * size) as CK_ULONG;
    if a.pValue.is_null() {
        a.ulValueLen = len;
        return CKR_OK;
    }
    if a.ulValueLen < len {
        a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
        return CKR_BUFFER_TOO_SMALL;
    }
    let array = unsafe {
        std::slice::from_raw_parts_mut(
            a.pValue as *mut CK_ATTRIBUTE,
            entries.len(),
        )
    };
    let mut rv = CKR_OK;
    for (n, (t, v)) in array.iter_mut().zip(entries.iter()) {
        n.type_ = *t;
        let r = fill_bytes(n, v);
        if r != CKR_OK {
            rv = r;
        }
    }
    a.ulValueLen = len;
    rv
}

impl MockModule {
    pub fn new() -> MockModule {
        MockModule::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /* records the call, then applies injected failures and checks the
     * session handle */
    fn enter(
        &self,
        call: &'static str,
        session: CK_SESSION_HANDLE,
    ) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(rv) = state.injected(call) {
            /* a failed call ends the operation it belongs to */
            if !call.ends_with("_init") {
                let name =
                    call.trim_end_matches("_update").trim_end_matches("_final");
                state.ops.retain(|(s, n), _| *s != session || *n != name);
            }
            return Err(Error::ck_rv(rv));
        }
        if !state.sessions.contains(&session) {
            return Err(Error::ck_rv(CKR_SESSION_HANDLE_INVALID));
        }
        Ok(state)
    }

    /// Makes the next invocation of `call` fail with `rv`
    pub fn fail_next(&self, call: &'static str, rv: CK_RV) {
        self.fail_after(call, 0, rv);
    }

    /// Lets `skip` invocations of `call` through, then fails the next one
    pub fn fail_after(&self, call: &'static str, skip: usize, rv: CK_RV) {
        self.state().failures.insert(call, (skip, rv));
    }

    /// How many times `call` reached the module
    pub fn calls(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn add_object(&self, object: MockObject) -> CK_OBJECT_HANDLE {
        self.state().add_object(object)
    }

    pub fn object_value(
        &self,
        object: CK_OBJECT_HANDLE,
        t: CK_ATTRIBUTE_TYPE,
    ) -> Option<MockValue> {
        self.state()
            .objects
            .get(&object)?
            .iter()
            .find(|(ot, _)| *ot == t)
            .map(|(_, v)| v.clone())
    }

    pub fn has_object(&self, object: CK_OBJECT_HANDLE) -> bool {
        self.state().objects.contains_key(&object)
    }

    fn op_init(
        &self,
        call: &'static str,
        name: &'static str,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
    ) -> Result<()> {
        let mut state = self.enter(call, session)?;
        if mechanism.mechanism == CKM_VENDOR_DEFINED {
            return Err(Error::ck_rv(CKR_MECHANISM_INVALID));
        }
        if state.ops.contains_key(&(session, name)) {
            return Err(Error::ck_rv(CKR_OPERATION_ACTIVE));
        }
        state.ops.insert(
            (session, name),
            MockOp {
                mechanism: mechanism.mechanism,
                data: Vec::new(),
            },
        );
        Ok(())
    }

    /* one-shot and final calls: a length query keeps the operation,
     * returning data ends it */
    fn op_output(
        &self,
        call: &'static str,
        name: &'static str,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
        f: fn(CK_MECHANISM_TYPE, &[u8]) -> Vec<u8>,
    ) -> Result<CK_ULONG> {
        let mut state = self.enter(call, session)?;
        let op = state.op(session, name)?;
        let mut input = op.data.clone();
        input.extend_from_slice(data);
        let output = f(op.mechanism, &input);
        let buf = match out {
            None => return Ok(output.len() as CK_ULONG),
            Some(b) => b,
        };
        state.ops.remove(&(session, name));
        if buf.len() < output.len() {
            return Err(Error::ck_rv(CKR_BUFFER_TOO_SMALL));
        }
        buf[..output.len()].copy_from_slice(&output);
        Ok(output.len() as CK_ULONG)
    }

    fn op_accumulate(
        &self,
        call: &'static str,
        name: &'static str,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.enter(call, session)?;
        state.op(session, name)?.data.extend_from_slice(data);
        Ok(())
    }

    fn op_stream(
        &self,
        call: &'static str,
        name: &'static str,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let mut state = self.enter(call, session)?;
        let mechanism = state.op(session, name)?.mechanism;
        let output = mock_stream(mechanism, data);
        if let Some(buf) = out {
            if buf.len() < output.len() {
                return Err(Error::ck_rv(CKR_BUFFER_TOO_SMALL));
            }
            buf[..output.len()].copy_from_slice(&output);
        }
        Ok(output.len() as CK_ULONG)
    }

    fn op_check(
        &self,
        call: &'static str,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let mut state = self.enter(call, session)?;
        let op = state.op(session, "verify")?;
        let mut input = op.data.clone();
        input.extend_from_slice(data);
        let expected = mock_tag(op.mechanism, &input);
        state.ops.remove(&(session, "verify"));
        if expected != signature {
            return Err(Error::ck_rv(CKR_SIGNATURE_INVALID));
        }
        Ok(())
    }

    fn new_key(
        state: &mut MockState,
        template: &[CK_ATTRIBUTE],
        value: Vec<u8>,
    ) -> CK_OBJECT_HANDLE {
        let mut object = vec![(CKA_VALUE, MockValue::Bytes(value))];
        merge(&mut object, read_template(template));
        apply_sensitive(&mut object);
        state.add_object(object)
    }
}

impl Module for MockModule {
    fn open_session(
        &self,
        slot: CK_SLOT_ID,
        _flags: CK_FLAGS,
    ) -> Result<CK_SESSION_HANDLE> {
        let mut state = self.state();
        state.calls.push("open_session");
        if let Some(rv) = state.injected("open_session") {
            return Err(Error::ck_rv(rv));
        }
        if slot != 1 {
            return Err(Error::ck_rv(CKR_SLOT_ID_INVALID));
        }
        state.next_session += 1;
        let handle = state.next_session;
        state.sessions.insert(handle);
        Ok(handle)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> Result<()> {
        let mut state = self.enter("close_session", session)?;
        state.sessions.remove(&session);
        state.ops.retain(|(s, _), _| *s != session);
        state.searches.remove(&session);
        Ok(())
    }

    fn encrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init("encrypt_init", "encrypt", session, mechanism)
    }
    fn encrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("encrypt", "encrypt", session, data, out, mock_stream)
    }
    fn encrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_stream("encrypt_update", "encrypt", session, data, out)
    }
    fn encrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("encrypt_final", "encrypt", session, &[], out, mock_stream)
    }

    fn decrypt_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init("decrypt_init", "decrypt", session, mechanism)
    }
    fn decrypt(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("decrypt", "decrypt", session, data, out, mock_stream)
    }
    fn decrypt_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_stream("decrypt_update", "decrypt", session, data, out)
    }
    fn decrypt_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("decrypt_final", "decrypt", session, &[], out, mock_stream)
    }

    fn sign_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init("sign_init", "sign", session, mechanism)
    }
    fn sign(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("sign", "sign", session, data, out, mock_tag)
    }
    fn sign_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        self.op_accumulate("sign_update", "sign", session, data)
    }
    fn sign_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("sign_final", "sign", session, &[], out, mock_tag)
    }

    fn verify_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init("verify_init", "verify", session, mechanism)
    }
    fn verify(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        self.op_check("verify", session, data, signature)
    }
    fn verify_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        self.op_accumulate("verify_update", "verify", session, data)
    }
    fn verify_final(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
    ) -> Result<()> {
        self.op_check("verify_final", session, &[], signature)
    }

    fn sign_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init("sign_recover_init", "sign_recover", session, mechanism)
    }
    fn sign_recover(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output(
            "sign_recover",
            "sign_recover",
            session,
            data,
            out,
            mock_recover,
        )
    }

    fn verify_recover_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        _key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.op_init(
            "verify_recover_init",
            "verify_recover",
            session,
            mechanism,
        )
    }
    fn verify_recover(
        &self,
        session: CK_SESSION_HANDLE,
        signature: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output(
            "verify_recover",
            "verify_recover",
            session,
            signature,
            out,
            mock_recover,
        )
    }

    fn digest_init(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
    ) -> Result<()> {
        self.op_init("digest_init", "digest", session, mechanism)
    }
    fn digest(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("digest", "digest", session, data, out, mock_tag)
    }
    fn digest_update(
        &self,
        session: CK_SESSION_HANDLE,
        data: &[u8],
    ) -> Result<()> {
        self.op_accumulate("digest_update", "digest", session, data)
    }
    fn digest_final(
        &self,
        session: CK_SESSION_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        self.op_output("digest_final", "digest", session, &[], out, mock_tag)
    }

    fn generate_key(
        &self,
        session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut state = self.enter("generate_key", session)?;
        Ok(Self::new_key(&mut state, template, vec![0x42; 16]))
    }
    fn generate_key_pair(
        &self,
        session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        public_template: &[CK_ATTRIBUTE],
        private_template: &[CK_ATTRIBUTE],
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let mut state = self.enter("generate_key_pair", session)?;
        let public = state.add_object(read_template(public_template));
        let private = state.add_object(read_template(private_template));
        Ok((public, private))
    }
    fn wrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
        out: Option<&mut [u8]>,
    ) -> Result<CK_ULONG> {
        let state = self.enter("wrap_key", session)?;
        if !state.objects.contains_key(&wrapping_key) {
            return Err(Error::ck_rv(CKR_WRAPPING_KEY_HANDLE_INVALID));
        }
        let object = match state.objects.get(&key) {
            Some(o) => o,
            None => return Err(Error::ck_rv(CKR_KEY_HANDLE_INVALID)),
        };
        let value = match object.iter().find(|(t, _)| *t == CKA_VALUE) {
            Some((_, MockValue::Bytes(v)))
            | Some((_, MockValue::Sensitive(v))) => v.clone(),
            _ => return Err(Error::ck_rv(CKR_KEY_NOT_WRAPPABLE)),
        };
        let wrapped = mock_cipher(&value);
        if let Some(buf) = out {
            if buf.len() < wrapped.len() {
                return Err(Error::ck_rv(CKR_BUFFER_TOO_SMALL));
            }
            buf[..wrapped.len()].copy_from_slice(&wrapped);
        }
        Ok(wrapped.len() as CK_ULONG)
    }
    fn unwrap_key(
        &self,
        session: CK_SESSION_HANDLE,
        _mechanism: &CK_MECHANISM,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut state = self.enter("unwrap_key", session)?;
        if !state.objects.contains_key(&unwrapping_key) {
            return Err(Error::ck_rv(CKR_UNWRAPPING_KEY_HANDLE_INVALID));
        }
        Ok(Self::new_key(&mut state, template, mock_cipher(wrapped_key)))
    }
    fn derive_key(
        &self,
        session: CK_SESSION_HANDLE,
        mechanism: &CK_MECHANISM,
        base_key: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut state = self.enter("derive_key", session)?;
        if !state.objects.contains_key(&base_key) {
            return Err(Error::ck_rv(CKR_KEY_HANDLE_INVALID));
        }
        match mechanism.mechanism {
            CKM_SSL3_MASTER_KEY_DERIVE
            | CKM_TLS_MASTER_KEY_DERIVE
            | CKM_TLS12_MASTER_KEY_DERIVE => {
                if mechanism.pParameter.is_null() {
                    return Err(Error::ck_rv(CKR_MECHANISM_PARAM_INVALID));
                }
                /* the TLS 1.2 struct extends the SSL3 one */
                let params = unsafe {
                    &*(mechanism.pParameter
                        as *const CK_SSL3_MASTER_KEY_DERIVE_PARAMS)
                };
                if params.RandomInfo.ulClientRandomLen == 0
                    || params.RandomInfo.ulServerRandomLen == 0
                {
                    return Err(Error::ck_rv(CKR_MECHANISM_PARAM_INVALID));
                }
                if !params.pVersion.is_null() {
                    let minor = match mechanism.mechanism {
                        CKM_TLS12_MASTER_KEY_DERIVE => 3,
                        CKM_TLS_MASTER_KEY_DERIVE => 1,
                        _ => 0,
                    };
                    unsafe {
                        (*params.pVersion).major = 3;
                        (*params.pVersion).minor = minor;
                    }
                }
                Ok(Self::new_key(&mut state, template, vec![0x48; 48]))
            }
            CKM_SSL3_KEY_AND_MAC_DERIVE
            | CKM_TLS_KEY_AND_MAC_DERIVE
            | CKM_TLS12_KEY_AND_MAC_DERIVE => {
                if mechanism.pParameter.is_null() {
                    return Err(Error::ck_rv(CKR_MECHANISM_PARAM_INVALID));
                }
                let params = unsafe {
                    &*(mechanism.pParameter as *const CK_SSL3_KEY_MAT_PARAMS)
                };
                if params.pReturnedKeyMaterial.is_null() {
                    return Err(Error::ck_rv(CKR_MECHANISM_PARAM_INVALID));
                }
                let mut handles = [CK_INVALID_HANDLE; 4];
                for (i, h) in handles.iter_mut().enumerate() {
                    *h = state.add_object(vec![(
                        CKA_VALUE,
                        MockValue::Bytes(vec![i as u8; 16]),
                    )]);
                }
                let iv_len = (params.ulIVSizeInBits / 8) as usize;
                unsafe {
                    let out = &mut *params.pReturnedKeyMaterial;
                    out.hClientMacSecret = handles[0];
                    out.hServerMacSecret = handles[1];
                    out.hClientKey = handles[2];
                    out.hServerKey = handles[3];
                    if iv_len > 0 {
                        std::ptr::write_bytes(out.pIVClient, 0xc1, iv_len);
                        std::ptr::write_bytes(out.pIVServer, 0x5e, iv_len);
                    }
                }
                /* no key object is returned by these derivations */
                Ok(CK_INVALID_HANDLE)
            }
            _ => Ok(Self::new_key(&mut state, template, vec![0x44; 32])),
        }
    }

    fn create_object(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut state = self.enter("create_object", session)?;
        let mut object = read_template(template);
        apply_sensitive(&mut object);
        Ok(state.add_object(object))
    }
    fn copy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<CK_OBJECT_HANDLE> {
        let mut state = self.enter("copy_object", session)?;
        let mut copy = match state.objects.get(&object) {
            Some(o) => o.clone(),
            None => return Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        };
        merge(&mut copy, read_template(template));
        Ok(state.add_object(copy))
    }
    fn destroy_object(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        let mut state = self.enter("destroy_object", session)?;
        match state.objects.remove(&object) {
            Some(_) => Ok(()),
            None => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }
    fn get_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &mut [CK_ATTRIBUTE],
    ) -> Result<()> {
        let state = self.enter("get_attribute_value", session)?;
        let object = match state.objects.get(&object) {
            Some(o) => o,
            None => return Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        };
        let mut rv = CKR_OK;
        for a in template.iter_mut() {
            let r = match object.iter().find(|(t, _)| *t == a.type_) {
                None => {
                    a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
                    CKR_ATTRIBUTE_TYPE_INVALID
                }
                Some((_, MockValue::Sensitive(_))) => {
                    a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
                    CKR_ATTRIBUTE_SENSITIVE
                }
                Some((_, MockValue::Bytes(v))) => fill_bytes(a, v),
                Some((_, MockValue::Nested(n))) => fill_nested(a, n),
            };
            /* sensitive wins over the other partial failures */
            if r != CKR_OK && rv != CKR_ATTRIBUTE_SENSITIVE {
                rv = r;
            }
        }
        if rv != CKR_OK {
            return Err(Error::ck_rv(rv));
        }
        Ok(())
    }
    fn set_attribute_value(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        let mut state = self.enter("set_attribute_value", session)?;
        match state.objects.get_mut(&object) {
            Some(o) => {
                merge(o, read_template(template));
                Ok(())
            }
            None => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }

    fn find_objects_init(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[CK_ATTRIBUTE],
    ) -> Result<()> {
        let mut state = self.enter("find_objects_init", session)?;
        if state.searches.contains_key(&session) {
            return Err(Error::ck_rv(CKR_OPERATION_ACTIVE));
        }
        let filter = read_template(template);
        let mut found: Vec<CK_OBJECT_HANDLE> = state
            .objects
            .iter()
            .filter(|(_, o)| filter.iter().all(|f| o.contains(f)))
            .map(|(h, _)| *h)
            .collect();
        found.sort();
        state.searches.insert(session, found);
        Ok(())
    }
    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        handles: &mut [CK_OBJECT_HANDLE],
    ) -> Result<usize> {
        let mut state = self.enter("find_objects", session)?;
        let pending = match state.searches.get_mut(&session) {
            Some(p) => p,
            None => return Err(Error::ck_rv(CKR_OPERATION_NOT_INITIALIZED)),
        };
        let count = std::cmp::min(handles.len(), pending.len());
        for (slot, h) in handles.iter_mut().zip(pending.drain(..count)) {
            *slot = h;
        }
        Ok(count)
    }
    fn find_objects_final(&self, session: CK_SESSION_HANDLE) -> Result<()> {
        let mut state = self.enter("find_objects_final", session)?;
        match state.searches.remove(&session) {
            Some(_) => Ok(()),
            None => Err(Error::ck_rv(CKR_OPERATION_NOT_INITIALIZED)),
        }
    }

    fn generate_random(
        &self,
        session: CK_SESSION_HANDLE,
        out: &mut [u8],
    ) -> Result<()> {
        let _state = self.enter("generate_random", session)?;
        for (i, b) in out.iter_mut().enumerate() {
            *b = i as u8;
        }
        Ok(())
    }
    fn seed_random(
        &self,
        session: CK_SESSION_HANDLE,
        _seed: &[u8],
    ) -> Result<()> {
        let _state = self.enter("seed_random", session)?;
        Ok(())
    }
}
