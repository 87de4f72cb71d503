// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Mechanism calling protocol classification
//!
//! Each category lists the mechanisms known to support it. A mechanism may
//! appear in several categories, but never in both the multi-part and the
//! single-shot list of the same category.

use std::collections::HashMap;

use crate::pkcs11::*;
use crate::session::OperationKind;

use bitflags::bitflags;
use once_cell::sync::Lazy;

bitflags! {
    /// The calling protocols a mechanism supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const FULL_ENCRYPT_DECRYPT = 0x0001;
        const SINGLE_ENCRYPT_DECRYPT = 0x0002;
        const FULL_SIGN_VERIFY = 0x0004;
        const SINGLE_SIGN_VERIFY = 0x0008;
        const SIGN_VERIFY_RECOVER = 0x0010;
        const DIGEST = 0x0020;
        const KEY_GENERATION = 0x0040;
        const KEY_PAIR_GENERATION = 0x0080;
        const WRAP_UNWRAP = 0x0100;
        const DERIVE = 0x0200;
    }
}

/// How an operation of a given kind must be driven for a mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// init, any number of updates, final (or the one-shot call)
    MultiPart,
    /// init followed immediately by the one-shot call
    SingleShot,
    /// init followed by the recover call
    Recover,
    /// nothing is known about the mechanism
    Unclassified,
    /// the mechanism is known but not listed for this kind
    NotSupported,
}

macro_rules! mechanism_list {
    ($name:ident; $($m:ident),+ $(,)?) => {
        const $name: &[(CK_MECHANISM_TYPE, &str)] =
            &[$(($m, stringify!($m)),)+];
    };
}

mechanism_list!(FULL_ENCRYPT_DECRYPT;
    CKM_AES_ECB,
    CKM_AES_CBC,
    CKM_AES_CBC_PAD,
    CKM_AES_CTR,
    CKM_AES_OFB,
    CKM_AES_CFB8,
    CKM_AES_CFB128,
    CKM_AES_CTS,
    CKM_DES3_ECB,
    CKM_DES3_CBC,
    CKM_DES3_CBC_PAD,
);

mechanism_list!(SINGLE_ENCRYPT_DECRYPT;
    CKM_RSA_PKCS,
    CKM_RSA_PKCS_OAEP,
    CKM_RSA_X_509,
    CKM_AES_GCM,
    CKM_AES_CCM,
);

mechanism_list!(FULL_SIGN_VERIFY;
    CKM_SHA1_RSA_PKCS,
    CKM_SHA224_RSA_PKCS,
    CKM_SHA256_RSA_PKCS,
    CKM_SHA384_RSA_PKCS,
    CKM_SHA512_RSA_PKCS,
    CKM_SHA3_256_RSA_PKCS,
    CKM_SHA3_384_RSA_PKCS,
    CKM_SHA3_512_RSA_PKCS,
    CKM_SHA1_RSA_PKCS_PSS,
    CKM_SHA224_RSA_PKCS_PSS,
    CKM_SHA256_RSA_PKCS_PSS,
    CKM_SHA384_RSA_PKCS_PSS,
    CKM_SHA512_RSA_PKCS_PSS,
    CKM_ECDSA_SHA1,
    CKM_ECDSA_SHA224,
    CKM_ECDSA_SHA256,
    CKM_ECDSA_SHA384,
    CKM_ECDSA_SHA512,
    CKM_DSA_SHA1,
    CKM_DSA_SHA224,
    CKM_DSA_SHA256,
    CKM_SHA_1_HMAC,
    CKM_SHA224_HMAC,
    CKM_SHA256_HMAC,
    CKM_SHA384_HMAC,
    CKM_SHA512_HMAC,
    CKM_SHA3_256_HMAC,
    CKM_SHA3_512_HMAC,
    CKM_AES_CMAC,
);

mechanism_list!(SINGLE_SIGN_VERIFY;
    CKM_RSA_PKCS,
    CKM_RSA_PKCS_PSS,
    CKM_RSA_X_509,
    CKM_ECDSA,
    CKM_DSA,
    CKM_EDDSA,
);

mechanism_list!(SIGN_VERIFY_RECOVER;
    CKM_RSA_PKCS,
    CKM_RSA_X_509,
    CKM_RSA_9796,
);

mechanism_list!(DIGEST;
    CKM_MD5,
    CKM_SHA_1,
    CKM_SHA224,
    CKM_SHA256,
    CKM_SHA384,
    CKM_SHA512,
    CKM_SHA512_224,
    CKM_SHA512_256,
    CKM_SHA3_224,
    CKM_SHA3_256,
    CKM_SHA3_384,
    CKM_SHA3_512,
);

mechanism_list!(KEY_GENERATION;
    CKM_AES_KEY_GEN,
    CKM_DES3_KEY_GEN,
    CKM_GENERIC_SECRET_KEY_GEN,
    CKM_TLS_PRE_MASTER_KEY_GEN,
);

mechanism_list!(KEY_PAIR_GENERATION;
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_EC_KEY_PAIR_GEN,
    CKM_DSA_KEY_PAIR_GEN,
    CKM_DH_PKCS_KEY_PAIR_GEN,
    CKM_EC_EDWARDS_KEY_PAIR_GEN,
    CKM_EC_MONTGOMERY_KEY_PAIR_GEN,
);

mechanism_list!(WRAP_UNWRAP;
    CKM_RSA_PKCS,
    CKM_RSA_PKCS_OAEP,
    CKM_AES_KEY_WRAP,
    CKM_AES_KEY_WRAP_PAD,
    CKM_AES_ECB,
    CKM_AES_CBC,
    CKM_AES_CBC_PAD,
    CKM_DES3_CBC_PAD,
);

mechanism_list!(DERIVE;
    CKM_ECDH1_DERIVE,
    CKM_ECDH1_COFACTOR_DERIVE,
    CKM_DH_PKCS_DERIVE,
    CKM_CONCATENATE_BASE_AND_KEY,
    CKM_CONCATENATE_BASE_AND_DATA,
    CKM_XOR_BASE_AND_DATA,
    CKM_EXTRACT_KEY_FROM_KEY,
    CKM_SSL3_MASTER_KEY_DERIVE,
    CKM_SSL3_KEY_AND_MAC_DERIVE,
    CKM_TLS_MASTER_KEY_DERIVE,
    CKM_TLS_KEY_AND_MAC_DERIVE,
    CKM_TLS12_MASTER_KEY_DERIVE,
    CKM_TLS12_KEY_AND_MAC_DERIVE,
    CKM_AES_ECB_ENCRYPT_DATA,
    CKM_AES_CBC_ENCRYPT_DATA,
    CKM_HKDF_DERIVE,
);

static CATEGORIES: [(Capabilities, &[(CK_MECHANISM_TYPE, &str)]); 10] = [
    (Capabilities::FULL_ENCRYPT_DECRYPT, FULL_ENCRYPT_DECRYPT),
    (Capabilities::SINGLE_ENCRYPT_DECRYPT, SINGLE_ENCRYPT_DECRYPT),
    (Capabilities::FULL_SIGN_VERIFY, FULL_SIGN_VERIFY),
    (Capabilities::SINGLE_SIGN_VERIFY, SINGLE_SIGN_VERIFY),
    (Capabilities::SIGN_VERIFY_RECOVER, SIGN_VERIFY_RECOVER),
    (Capabilities::DIGEST, DIGEST),
    (Capabilities::KEY_GENERATION, KEY_GENERATION),
    (Capabilities::KEY_PAIR_GENERATION, KEY_PAIR_GENERATION),
    (Capabilities::WRAP_UNWRAP, WRAP_UNWRAP),
    (Capabilities::DERIVE, DERIVE),
];

#[derive(Debug)]
struct Entry {
    caps: Capabilities,
    name: &'static str,
}

static CLASSIFIER: Lazy<HashMap<CK_MECHANISM_TYPE, Entry>> = Lazy::new(|| {
    let mut map = HashMap::<CK_MECHANISM_TYPE, Entry>::new();
    for (cap, list) in CATEGORIES.iter() {
        for (code, name) in list.iter() {
            map.entry(*code)
                .and_modify(|e| e.caps |= *cap)
                .or_insert(Entry {
                    caps: *cap,
                    name: *name,
                });
        }
    }
    map
});

/// Returns the capabilities of a mechanism, `None` if it is unclassified
pub fn classify(code: CK_MECHANISM_TYPE) -> Option<Capabilities> {
    CLASSIFIER.get(&code).map(|e| e.caps)
}

/// The name of a classified mechanism
pub fn known_name(code: CK_MECHANISM_TYPE) -> Option<&'static str> {
    CLASSIFIER.get(&code).map(|e| e.name)
}

/// Returns how an operation of `kind` must be driven with `code`
pub fn protocol(code: CK_MECHANISM_TYPE, kind: OperationKind) -> Protocol {
    let caps = match classify(code) {
        Some(c) => c,
        None => return Protocol::Unclassified,
    };
    let (full, single) = match kind {
        OperationKind::Encrypt | OperationKind::Decrypt => (
            Capabilities::FULL_ENCRYPT_DECRYPT,
            Capabilities::SINGLE_ENCRYPT_DECRYPT,
        ),
        OperationKind::Sign | OperationKind::Verify => (
            Capabilities::FULL_SIGN_VERIFY,
            Capabilities::SINGLE_SIGN_VERIFY,
        ),
        OperationKind::SignRecover | OperationKind::VerifyRecover => {
            return if caps.contains(Capabilities::SIGN_VERIFY_RECOVER) {
                Protocol::Recover
            } else {
                Protocol::NotSupported
            };
        }
        OperationKind::Digest => (Capabilities::DIGEST, Capabilities::empty()),
        /* searches take no mechanism */
        OperationKind::FindObjects => return Protocol::Unclassified,
    };
    if caps.intersects(full) {
        Protocol::MultiPart
    } else if caps.intersects(single) {
        Protocol::SingleShot
    } else {
        Protocol::NotSupported
    }
}
