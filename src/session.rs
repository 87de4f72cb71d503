// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Sessions and the sequencing of their operations
//!
//! Each operation kind has its own state: `Idle`, `Initialized` after a
//! successful init, `Updated` after one or more multi-part updates.
//! Calls that are not legal in the current state fail before anything is
//! sent to the module. Errors returned by the module during an update or
//! a finishing call terminate the operation (as the module does) and are
//! returned unchanged.

use std::sync::Arc;

use crate::attribute::AttributeRegistry;
use crate::capability::{self, Protocol};
use crate::error::{Error, Result};
use crate::mechanism::{mechanism_name, Mechanism};
use crate::module::Module;
use crate::pkcs11::*;
use crate::template::{Template, WireTemplate};

const FIND_BATCH: usize = 64;
const MAX_ATTRIBUTE_PASSES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    SignRecover,
    VerifyRecover,
    Digest,
    FindObjects,
}

const OPERATION_KINDS: usize = 8;

impl OperationKind {
    fn index(self) -> usize {
        match self {
            OperationKind::Encrypt => 0,
            OperationKind::Decrypt => 1,
            OperationKind::Sign => 2,
            OperationKind::Verify => 3,
            OperationKind::SignRecover => 4,
            OperationKind::VerifyRecover => 5,
            OperationKind::Digest => 6,
            OperationKind::FindObjects => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Initialized,
    Updated,
}

#[derive(Debug, Clone, Copy)]
struct ActiveOperation {
    state: OperationState,
    mechanism: CK_MECHANISM_TYPE,
    protocol: Protocol,
}

impl ActiveOperation {
    const IDLE: ActiveOperation = ActiveOperation {
        state: OperationState::Idle,
        mechanism: CK_UNAVAILABLE_INFORMATION,
        protocol: Protocol::Unclassified,
    };

    fn single_step(&self) -> bool {
        matches!(self.protocol, Protocol::SingleShot | Protocol::Recover)
    }
}

/// An open session on a module
///
/// A session is meant to be used by one thread at a time, see
/// [crate::pool::SessionPool] to share sessions between threads.
#[derive(Debug)]
pub struct Session {
    module: Arc<dyn Module>,
    handle: CK_SESSION_HANDLE,
    slot: CK_SLOT_ID,
    ops: [ActiveOperation; OPERATION_KINDS],
    closed: bool,
}

impl Session {
    /// Opens a session, `flags` must include CKF_SERIAL_SESSION
    pub fn open(
        module: Arc<dyn Module>,
        slot: CK_SLOT_ID,
        flags: CK_FLAGS,
    ) -> Result<Session> {
        if flags & CKF_SERIAL_SESSION != CKF_SERIAL_SESSION {
            return Err(Error::invalid_argument(
                "sessions must be opened with CKF_SERIAL_SESSION".to_string(),
            ));
        }
        let handle = module.open_session(slot, flags)?;
        log::debug!("opened session {} on slot {}", handle, slot);
        Ok(Session {
            module: module,
            handle: handle,
            slot: slot,
            ops: [ActiveOperation::IDLE; OPERATION_KINDS],
            closed: false,
        })
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        log::debug!("closing session {}", self.handle);
        self.module.close_session(self.handle)
    }

    pub fn handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    pub fn slot(&self) -> CK_SLOT_ID {
        self.slot
    }

    pub fn state(&self, kind: OperationKind) -> OperationState {
        self.ops[kind.index()].state
    }

    /// The operation kinds that are not idle
    pub fn active_operations(&self) -> Vec<OperationKind> {
        [
            OperationKind::Encrypt,
            OperationKind::Decrypt,
            OperationKind::Sign,
            OperationKind::Verify,
            OperationKind::SignRecover,
            OperationKind::VerifyRecover,
            OperationKind::Digest,
            OperationKind::FindObjects,
        ]
        .into_iter()
        .filter(|k| self.state(*k) != OperationState::Idle)
        .collect()
    }

    pub fn is_idle(&self) -> bool {
        self.ops.iter().all(|o| o.state == OperationState::Idle)
    }

    fn check_init(&self, kind: OperationKind) -> Result<()> {
        let op = &self.ops[kind.index()];
        if op.state != OperationState::Idle {
            return Err(Error::invalid_state(
                CKR_OPERATION_ACTIVE,
                format!(
                    "{:?} operation with {} already active",
                    kind,
                    mechanism_name(op.mechanism)
                ),
            ));
        }
        Ok(())
    }

    fn check_active(&self, kind: OperationKind) -> Result<&ActiveOperation> {
        let op = &self.ops[kind.index()];
        if op.state == OperationState::Idle {
            return Err(Error::invalid_state(
                CKR_OPERATION_NOT_INITIALIZED,
                format!("{:?} operation not initialized", kind),
            ));
        }
        Ok(op)
    }

    fn check_update(&self, kind: OperationKind) -> Result<()> {
        let op = self.check_active(kind)?;
        if op.single_step() {
            return Err(Error::invalid_state(
                CKR_FUNCTION_NOT_SUPPORTED,
                format!(
                    "{} does not support multi-part {:?}",
                    mechanism_name(op.mechanism),
                    kind
                ),
            ));
        }
        Ok(())
    }

    fn check_one_shot(&self, kind: OperationKind) -> Result<()> {
        let op = self.check_active(kind)?;
        if op.state == OperationState::Updated {
            return Err(Error::invalid_state(
                CKR_OPERATION_ACTIVE,
                format!("single part {:?} after update", kind),
            ));
        }
        Ok(())
    }

    fn check_final(&self, kind: OperationKind) -> Result<()> {
        let op = self.check_active(kind)?;
        if op.single_step() {
            return Err(Error::invalid_state(
                CKR_FUNCTION_NOT_SUPPORTED,
                format!(
                    "{} has no multi-part {:?} final",
                    mechanism_name(op.mechanism),
                    kind
                ),
            ));
        }
        Ok(())
    }

    fn set_state(&mut self, kind: OperationKind, state: OperationState) {
        let op = &mut self.ops[kind.index()];
        if op.state != state {
            log::debug!(
                "session {}: {:?} {:?} -> {:?}",
                self.handle,
                kind,
                op.state,
                state
            );
        }
        if state == OperationState::Idle {
            *op = ActiveOperation::IDLE;
        } else {
            op.state = state;
        }
    }

    /// Records the result of a call that ends the operation of `kind`
    fn finishing<T>(&mut self, kind: OperationKind, res: Result<T>) -> Result<T> {
        self.set_state(kind, OperationState::Idle);
        res
    }

    /// Records the result of a call that continues the operation of `kind`
    fn updating<T>(&mut self, kind: OperationKind, res: Result<T>) -> Result<T> {
        match res {
            Ok(v) => {
                self.set_state(kind, OperationState::Updated);
                Ok(v)
            }
            Err(e) => {
                self.set_state(kind, OperationState::Idle);
                Err(e)
            }
        }
    }

    /// Initializes an operation after the module accepted it
    fn init_with<F>(
        &mut self,
        kind: OperationKind,
        mechanism: &Mechanism,
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&dyn Module, CK_SESSION_HANDLE, &CK_MECHANISM) -> Result<()>,
    {
        self.check_init(kind)?;
        let protocol = capability::protocol(mechanism.code(), kind);
        if protocol == Protocol::NotSupported {
            log::debug!(
                "{} is not known to support {:?}",
                mechanism_name(mechanism.code()),
                kind
            );
        }
        let mut mech = mechanism.clone();
        let ck = mech.to_ck()?;
        f(&*self.module, self.handle, ck.as_ck())?;
        let op = &mut self.ops[kind.index()];
        op.mechanism = mechanism.code();
        op.protocol = protocol;
        self.set_state(kind, OperationState::Initialized);
        Ok(())
    }

    /// Calls `f` first to learn the output length, then to get the data
    fn sized_output<F>(&self, mut f: F) -> Result<Vec<u8>>
    where
        F: FnMut(
            &dyn Module,
            CK_SESSION_HANDLE,
            Option<&mut [u8]>,
        ) -> Result<CK_ULONG>,
    {
        let len = f(&*self.module, self.handle, None)?;
        let mut out = vec![0u8; usize::try_from(len)?];
        let len = f(&*self.module, self.handle, Some(out.as_mut_slice()))?;
        out.truncate(usize::try_from(len)?);
        Ok(out)
    }

    pub fn encrypt_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::Encrypt, mechanism, |m, h, ck| {
            m.encrypt_init(h, ck, key)
        })
    }

    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::Encrypt)?;
        let res = self.sized_output(|m, h, out| m.encrypt(h, data, out));
        self.finishing(OperationKind::Encrypt, res)
    }

    pub fn encrypt_update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_update(OperationKind::Encrypt)?;
        let res = self.sized_output(|m, h, out| m.encrypt_update(h, data, out));
        self.updating(OperationKind::Encrypt, res)
    }

    pub fn encrypt_final(&mut self) -> Result<Vec<u8>> {
        self.check_final(OperationKind::Encrypt)?;
        let res = self.sized_output(|m, h, out| m.encrypt_final(h, out));
        self.finishing(OperationKind::Encrypt, res)
    }

    pub fn decrypt_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::Decrypt, mechanism, |m, h, ck| {
            m.decrypt_init(h, ck, key)
        })
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::Decrypt)?;
        let res = self.sized_output(|m, h, out| m.decrypt(h, data, out));
        self.finishing(OperationKind::Decrypt, res)
    }

    pub fn decrypt_update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_update(OperationKind::Decrypt)?;
        let res = self.sized_output(|m, h, out| m.decrypt_update(h, data, out));
        self.updating(OperationKind::Decrypt, res)
    }

    pub fn decrypt_final(&mut self) -> Result<Vec<u8>> {
        self.check_final(OperationKind::Decrypt)?;
        let res = self.sized_output(|m, h, out| m.decrypt_final(h, out));
        self.finishing(OperationKind::Decrypt, res)
    }

    pub fn sign_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::Sign, mechanism, |m, h, ck| {
            m.sign_init(h, ck, key)
        })
    }

    pub fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::Sign)?;
        let res = self.sized_output(|m, h, out| m.sign(h, data, out));
        self.finishing(OperationKind::Sign, res)
    }

    pub fn sign_update(&mut self, data: &[u8]) -> Result<()> {
        self.check_update(OperationKind::Sign)?;
        let res = self.module.sign_update(self.handle, data);
        self.updating(OperationKind::Sign, res)
    }

    pub fn sign_final(&mut self) -> Result<Vec<u8>> {
        self.check_final(OperationKind::Sign)?;
        let res = self.sized_output(|m, h, out| m.sign_final(h, out));
        self.finishing(OperationKind::Sign, res)
    }

    pub fn verify_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::Verify, mechanism, |m, h, ck| {
            m.verify_init(h, ck, key)
        })
    }

    /// Verifies a signature, a bad signature is reported by the module
    /// as CKR_SIGNATURE_INVALID
    pub fn verify(&mut self, data: &[u8], signature: &[u8]) -> Result<()> {
        self.check_one_shot(OperationKind::Verify)?;
        let res = self.module.verify(self.handle, data, signature);
        self.finishing(OperationKind::Verify, res)
    }

    pub fn verify_update(&mut self, data: &[u8]) -> Result<()> {
        self.check_update(OperationKind::Verify)?;
        let res = self.module.verify_update(self.handle, data);
        self.updating(OperationKind::Verify, res)
    }

    pub fn verify_final(&mut self, signature: &[u8]) -> Result<()> {
        self.check_final(OperationKind::Verify)?;
        let res = self.module.verify_final(self.handle, signature);
        self.finishing(OperationKind::Verify, res)
    }

    pub fn sign_recover_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::SignRecover, mechanism, |m, h, ck| {
            m.sign_recover_init(h, ck, key)
        })
    }

    pub fn sign_recover(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::SignRecover)?;
        let res = self.sized_output(|m, h, out| m.sign_recover(h, data, out));
        self.finishing(OperationKind::SignRecover, res)
    }

    pub fn verify_recover_init(
        &mut self,
        mechanism: &Mechanism,
        key: CK_OBJECT_HANDLE,
    ) -> Result<()> {
        self.init_with(OperationKind::VerifyRecover, mechanism, |m, h, ck| {
            m.verify_recover_init(h, ck, key)
        })
    }

    pub fn verify_recover(&mut self, signature: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::VerifyRecover)?;
        let res =
            self.sized_output(|m, h, out| m.verify_recover(h, signature, out));
        self.finishing(OperationKind::VerifyRecover, res)
    }

    pub fn digest_init(&mut self, mechanism: &Mechanism) -> Result<()> {
        self.init_with(OperationKind::Digest, mechanism, |m, h, ck| {
            m.digest_init(h, ck)
        })
    }

    pub fn digest(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.check_one_shot(OperationKind::Digest)?;
        let res = self.sized_output(|m, h, out| m.digest(h, data, out));
        self.finishing(OperationKind::Digest, res)
    }

    pub fn digest_update(&mut self, data: &[u8]) -> Result<()> {
        self.check_update(OperationKind::Digest)?;
        let res = self.module.digest_update(self.handle, data);
        self.updating(OperationKind::Digest, res)
    }

    pub fn digest_final(&mut self) -> Result<Vec<u8>> {
        self.check_final(OperationKind::Digest)?;
        let res = self.sized_output(|m, h, out| m.digest_final(h, out));
        self.finishing(OperationKind::Digest, res)
    }

    pub fn find_objects_init(&mut self, template: &Template) -> Result<()> {
        let kind = OperationKind::FindObjects;
        self.check_init(kind)?;
        let wire = template.to_wire()?;
        self.module.find_objects_init(self.handle, wire.as_slice())?;
        self.set_state(kind, OperationState::Initialized);
        Ok(())
    }

    /// Returns up to `max` handles, an empty vector once the search is
    /// exhausted
    pub fn find_objects_next(
        &mut self,
        max: usize,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        let kind = OperationKind::FindObjects;
        self.check_update(kind)?;
        let mut handles = vec![CK_INVALID_HANDLE; max];
        let res = self.module.find_objects(self.handle, &mut handles);
        let count = self.updating(kind, res)?;
        handles.truncate(count);
        Ok(handles)
    }

    pub fn find_objects_final(&mut self) -> Result<()> {
        let kind = OperationKind::FindObjects;
        self.check_final(kind)?;
        let res = self.module.find_objects_final(self.handle);
        self.finishing(kind, res)
    }

    /// Runs a whole search and returns all the matching handles
    pub fn find_objects(
        &mut self,
        template: &Template,
    ) -> Result<Vec<CK_OBJECT_HANDLE>> {
        self.find_objects_init(template)?;
        let mut found = Vec::new();
        loop {
            let batch = self.find_objects_next(FIND_BATCH)?;
            if batch.is_empty() {
                break;
            }
            found.extend(batch);
        }
        self.find_objects_final()?;
        Ok(found)
    }

    pub fn generate_key(
        &mut self,
        mechanism: &Mechanism,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let wire = template.to_wire()?;
        let mut mech = mechanism.clone();
        let ck = mech.to_ck()?;
        self.module
            .generate_key(self.handle, ck.as_ck(), wire.as_slice())
    }

    pub fn generate_key_pair(
        &mut self,
        mechanism: &Mechanism,
        public_template: &Template,
        private_template: &Template,
    ) -> Result<(CK_OBJECT_HANDLE, CK_OBJECT_HANDLE)> {
        let public = public_template.to_wire()?;
        let private = private_template.to_wire()?;
        let mut mech = mechanism.clone();
        let ck = mech.to_ck()?;
        self.module.generate_key_pair(
            self.handle,
            ck.as_ck(),
            public.as_slice(),
            private.as_slice(),
        )
    }

    pub fn wrap_key(
        &mut self,
        mechanism: &Mechanism,
        wrapping_key: CK_OBJECT_HANDLE,
        key: CK_OBJECT_HANDLE,
    ) -> Result<Vec<u8>> {
        let mut mech = mechanism.clone();
        let ck = mech.to_ck()?;
        self.sized_output(|m, h, out| {
            m.wrap_key(h, ck.as_ck(), wrapping_key, key, out)
        })
    }

    pub fn unwrap_key(
        &mut self,
        mechanism: &Mechanism,
        unwrapping_key: CK_OBJECT_HANDLE,
        wrapped_key: &[u8],
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let wire = template.to_wire()?;
        let mut mech = mechanism.clone();
        let ck = mech.to_ck()?;
        self.module.unwrap_key(
            self.handle,
            ck.as_ck(),
            unwrapping_key,
            wrapped_key,
            wire.as_slice(),
        )
    }

    /// Derives a key; output parameters of `mechanism` become readable
    /// only if the derivation succeeds
    pub fn derive_key(
        &mut self,
        mechanism: &mut Mechanism,
        base_key: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let wire = template.to_wire()?;
        let (handle, outputs) = {
            let ck = mechanism.to_ck()?;
            let handle = self.module.derive_key(
                self.handle,
                ck.as_ck(),
                base_key,
                wire.as_slice(),
            )?;
            (handle, ck.outputs())
        };
        mechanism.complete(outputs);
        Ok(handle)
    }

    pub fn create_object(
        &mut self,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let wire = template.to_wire()?;
        self.module.create_object(self.handle, wire.as_slice())
    }

    pub fn copy_object(
        &mut self,
        object: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<CK_OBJECT_HANDLE> {
        let wire = template.to_wire()?;
        self.module.copy_object(self.handle, object, wire.as_slice())
    }

    pub fn destroy_object(&mut self, object: CK_OBJECT_HANDLE) -> Result<()> {
        self.module.destroy_object(self.handle, object)
    }

    /// Reads attributes of an object
    ///
    /// Attributes the module can not return are absent from the result,
    /// those withheld because they are sensitive are flagged as such.
    pub fn get_attributes(
        &mut self,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> Result<Template> {
        let registry = AttributeRegistry::global();
        let mut wire = WireTemplate::query(types);
        let mut sensitive = false;
        for _ in 0..MAX_ATTRIBUTE_PASSES {
            match self.module.get_attribute_value(
                self.handle,
                object,
                wire.as_mut_slice(),
            ) {
                Ok(()) => (),
                Err(e) if e.rv() == CKR_ATTRIBUTE_SENSITIVE => sensitive = true,
                Err(e) if e.rv() == CKR_ATTRIBUTE_TYPE_INVALID => (),
                Err(e) => return Err(e),
            }
            if !wire.allocate(&registry)? {
                break;
            }
        }
        let mut tmpl = Template::from_wire(&wire)?;
        if sensitive {
            self.flag_sensitive(object, &mut tmpl)?;
        }
        Ok(tmpl)
    }

    /* tells apart sensitive from invalid attributes, the module only
     * reports one error for the whole array */
    fn flag_sensitive(
        &self,
        object: CK_OBJECT_HANDLE,
        tmpl: &mut Template,
    ) -> Result<()> {
        let absent: Vec<CK_ATTRIBUTE_TYPE> = tmpl
            .iter()
            .filter(|a| !a.is_present())
            .map(|a| a.get_type())
            .collect();
        for t in absent {
            let mut probe = WireTemplate::query(&[t]);
            match self.module.get_attribute_value(
                self.handle,
                object,
                probe.as_mut_slice(),
            ) {
                Ok(()) => (),
                Err(e) if e.rv() == CKR_ATTRIBUTE_SENSITIVE => {
                    tmpl.mark_sensitive(t);
                }
                Err(e) if e.rv() == CKR_ATTRIBUTE_TYPE_INVALID => (),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn set_attributes(
        &mut self,
        object: CK_OBJECT_HANDLE,
        template: &Template,
    ) -> Result<()> {
        let wire = template.to_wire()?;
        self.module
            .set_attribute_value(self.handle, object, wire.as_slice())
    }

    pub fn generate_random(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        self.module.generate_random(self.handle, &mut out)?;
        Ok(out)
    }

    pub fn seed_random(&mut self, seed: &[u8]) -> Result<()> {
        self.module.seed_random(self.handle, seed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.module.close_session(self.handle) {
            log::warn!("failed to close session {}: {}", self.handle, e);
        }
    }
}
