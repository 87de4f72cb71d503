// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use super::*;
use crate::pkcs11::*;
use std::sync::Arc;

mod mock;
use mock::*;


const TEST_SLOT: CK_SLOT_ID = 1;

fn test_module() -> Arc<MockModule> {
    Arc::new(MockModule::new())
}

fn test_session(module: &Arc<MockModule>) -> Session {
    Session::open(module.clone(), TEST_SLOT, CKF_SERIAL_SESSION).unwrap()
}

/* a secret key with a readable value */
fn test_key(module: &MockModule, value: &[u8]) -> CK_OBJECT_HANDLE {
    module.add_object(vec![
        (
            CKA_CLASS,
            MockValue::Bytes(CKO_SECRET_KEY.to_ne_bytes().to_vec()),
        ),
        (CKA_VALUE, MockValue::Bytes(value.to_vec())),
    ])
}
