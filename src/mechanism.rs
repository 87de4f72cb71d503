// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Mechanisms and their parameters
//!
//! Parameters are validated when constructed. [Mechanism::to_ck] lays them
//! out in the fixed structs modules expect; the returned [CkMechanism]
//! borrows the mechanism so the pointers it hands out stay valid for the
//! duration of the call.

use std::fmt;
use std::marker::PhantomData;

use crate::capability;
use crate::error::{Error, Result};
use crate::misc::{ck_len, slice_ptr, void_ptr};
use crate::pkcs11::vendor;
use crate::pkcs11::*;

/// Returns a printable name for a mechanism code
pub fn mechanism_name(code: CK_MECHANISM_TYPE) -> String {
    if let Some(n) = capability::known_name(code) {
        return n.to_string();
    }
    if let Some(n) = vendor::defs().mechanism_name(code) {
        return n.to_string();
    }
    format!("CKM_{:#x}", code)
}

/// Hash mechanisms accepted for PSS and OAEP, each with its matching MGF
const HASH_MGF: [(CK_MECHANISM_TYPE, CK_RSA_PKCS_MGF_TYPE); 8] = [
    (CKM_SHA_1, CKG_MGF1_SHA1),
    (CKM_SHA224, CKG_MGF1_SHA224),
    (CKM_SHA256, CKG_MGF1_SHA256),
    (CKM_SHA384, CKG_MGF1_SHA384),
    (CKM_SHA512, CKG_MGF1_SHA512),
    (CKM_SHA3_256, CKG_MGF1_SHA3_256),
    (CKM_SHA3_384, CKG_MGF1_SHA3_384),
    (CKM_SHA3_512, CKG_MGF1_SHA3_512),
];

fn check_hash_mgf(
    hash_alg: CK_MECHANISM_TYPE,
    mgf: CK_RSA_PKCS_MGF_TYPE,
) -> Result<()> {
    if !HASH_MGF.iter().any(|(h, _)| *h == hash_alg) {
        return Err(Error::invalid_argument(format!(
            "unsupported hash algorithm {}",
            mechanism_name(hash_alg)
        )));
    }
    if !HASH_MGF.iter().any(|(_, m)| *m == mgf) {
        return Err(Error::invalid_argument(format!(
            "unsupported mask generation function {:#x}",
            mgf
        )));
    }
    Ok(())
}

const GCM_TAG_BITS: [CK_ULONG; 7] = [32, 64, 96, 104, 112, 120, 128];
pub const GCM_DEFAULT_TAG_BITS: CK_ULONG = 128;

/// Size of each of the client and server random values of the handshake
/// derivations
pub const HANDSHAKE_RANDOM_LEN: usize = 28;

/// A buffer the module writes during a call
///
/// The value can only be read after a call using it completed
/// successfully; every new call resets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutParam<T> {
    value: T,
    written: bool,
}

impl<T> OutParam<T> {
    pub fn new(init: T) -> OutParam<T> {
        OutParam {
            value: init,
            written: false,
        }
    }

    pub fn get(&self) -> Result<&T> {
        if self.written {
            Ok(&self.value)
        } else {
            Err(Error::invalid_state(
                CKR_OPERATION_NOT_INITIALIZED,
                "output parameter read before the call completed".to_string(),
            ))
        }
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    fn reset(&mut self) {
        self.written = false;
    }

    fn slot(&mut self) -> &mut T {
        &mut self.value
    }

    fn complete(&mut self, value: T) {
        self.value = value;
        self.written = true;
    }
}

/// A protocol version, as returned by the master secret derivations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaPssParams {
    hash_alg: CK_MECHANISM_TYPE,
    mgf: CK_RSA_PKCS_MGF_TYPE,
    salt_len: CK_ULONG,
}

impl RsaPssParams {
    pub fn new(
        hash_alg: CK_MECHANISM_TYPE,
        mgf: CK_RSA_PKCS_MGF_TYPE,
        salt_len: CK_ULONG,
    ) -> Result<RsaPssParams> {
        check_hash_mgf(hash_alg, mgf)?;
        Ok(RsaPssParams {
            hash_alg: hash_alg,
            mgf: mgf,
            salt_len: salt_len,
        })
    }

    pub fn hash_alg(&self) -> CK_MECHANISM_TYPE {
        self.hash_alg
    }

    pub fn mgf(&self) -> CK_RSA_PKCS_MGF_TYPE {
        self.mgf
    }

    pub fn salt_len(&self) -> CK_ULONG {
        self.salt_len
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaOaepParams {
    hash_alg: CK_MECHANISM_TYPE,
    mgf: CK_RSA_PKCS_MGF_TYPE,
    source_data: Vec<u8>,
}

impl RsaOaepParams {
    pub fn new(
        hash_alg: CK_MECHANISM_TYPE,
        mgf: CK_RSA_PKCS_MGF_TYPE,
        source_data: Option<Vec<u8>>,
    ) -> Result<RsaOaepParams> {
        check_hash_mgf(hash_alg, mgf)?;
        Ok(RsaOaepParams {
            hash_alg: hash_alg,
            mgf: mgf,
            source_data: source_data.unwrap_or_default(),
        })
    }

    pub fn hash_alg(&self) -> CK_MECHANISM_TYPE {
        self.hash_alg
    }

    pub fn mgf(&self) -> CK_RSA_PKCS_MGF_TYPE {
        self.mgf
    }

    pub fn source_data(&self) -> &[u8] {
        &self.source_data
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GcmParams {
    iv: Vec<u8>,
    aad: Vec<u8>,
    tag_bits: CK_ULONG,
}

impl GcmParams {
    pub fn new(iv: Vec<u8>, aad: Vec<u8>, tag_bits: CK_ULONG) -> Result<GcmParams> {
        if iv.is_empty() {
            return Err(Error::invalid_argument(
                "GCM requires an initialization vector".to_string(),
            ));
        }
        if !GCM_TAG_BITS.contains(&tag_bits) {
            return Err(Error::invalid_argument(format!(
                "invalid GCM tag length {} bits",
                tag_bits
            )));
        }
        Ok(GcmParams {
            iv: iv,
            aad: aad,
            tag_bits: tag_bits,
        })
    }

    /// Uses the default 128 bit tag
    pub fn with_default_tag(iv: Vec<u8>, aad: Vec<u8>) -> Result<GcmParams> {
        Self::new(iv, aad, GCM_DEFAULT_TAG_BITS)
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn tag_bits(&self) -> CK_ULONG {
        self.tag_bits
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CcmParams {
    data_len: CK_ULONG,
    nonce: Vec<u8>,
    aad: Vec<u8>,
    mac_len: CK_ULONG,
}

impl CcmParams {
    pub fn new(
        data_len: CK_ULONG,
        nonce: Vec<u8>,
        aad: Vec<u8>,
        mac_len: CK_ULONG,
    ) -> Result<CcmParams> {
        if nonce.len() < 7 || nonce.len() > 13 {
            return Err(Error::invalid_argument(format!(
                "invalid CCM nonce length {}",
                nonce.len()
            )));
        }
        if mac_len < 4 || mac_len > 16 || mac_len % 2 != 0 {
            return Err(Error::invalid_argument(format!(
                "invalid CCM MAC length {}",
                mac_len
            )));
        }
        Ok(CcmParams {
            data_len: data_len,
            nonce: nonce,
            aad: aad,
            mac_len: mac_len,
        })
    }

    pub fn data_len(&self) -> CK_ULONG {
        self.data_len
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn mac_len(&self) -> CK_ULONG {
        self.mac_len
    }
}

const EC_KDFS: [CK_EC_KDF_TYPE; 6] = [
    CKD_NULL,
    CKD_SHA1_KDF,
    CKD_SHA224_KDF,
    CKD_SHA256_KDF,
    CKD_SHA384_KDF,
    CKD_SHA512_KDF,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ecdh1DeriveParams {
    kdf: CK_EC_KDF_TYPE,
    shared_data: Vec<u8>,
    public_data: Vec<u8>,
}

impl Ecdh1DeriveParams {
    pub fn new(
        kdf: CK_EC_KDF_TYPE,
        shared_data: Vec<u8>,
        public_data: Vec<u8>,
    ) -> Result<Ecdh1DeriveParams> {
        if !EC_KDFS.contains(&kdf) {
            return Err(Error::invalid_argument(format!(
                "unsupported ECDH KDF {:#x}",
                kdf
            )));
        }
        if kdf == CKD_NULL && !shared_data.is_empty() {
            return Err(Error::invalid_argument(
                "shared data requires a KDF".to_string(),
            ));
        }
        if public_data.is_empty() {
            return Err(Error::invalid_argument(
                "ECDH requires the peer public data".to_string(),
            ));
        }
        Ok(Ecdh1DeriveParams {
            kdf: kdf,
            shared_data: shared_data,
            public_data: public_data,
        })
    }

    pub fn kdf(&self) -> CK_EC_KDF_TYPE {
        self.kdf
    }

    pub fn shared_data(&self) -> &[u8] {
        &self.shared_data
    }

    pub fn public_data(&self) -> &[u8] {
        &self.public_data
    }
}

/// The client and server random values of a handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeRandoms {
    client: [u8; HANDSHAKE_RANDOM_LEN],
    server: [u8; HANDSHAKE_RANDOM_LEN],
}

impl HandshakeRandoms {
    pub fn new(client: &[u8], server: &[u8]) -> Result<HandshakeRandoms> {
        let conv = |v: &[u8], who: &str| -> Result<[u8; HANDSHAKE_RANDOM_LEN]> {
            <[u8; HANDSHAKE_RANDOM_LEN]>::try_from(v).map_err(|_| {
                Error::invalid_argument(format!(
                    "{} random must be {} bytes, got {}",
                    who,
                    HANDSHAKE_RANDOM_LEN,
                    v.len()
                ))
            })
        };
        Ok(HandshakeRandoms {
            client: conv(client, "client")?,
            server: conv(server, "server")?,
        })
    }

    pub fn client(&self) -> &[u8] {
        &self.client
    }

    pub fn server(&self) -> &[u8] {
        &self.server
    }

    fn to_ck(&self) -> Result<CK_SSL3_RANDOM_DATA> {
        Ok(CK_SSL3_RANDOM_DATA {
            pClientRandom: self.client.as_ptr() as CK_BYTE_PTR,
            ulClientRandomLen: ck_len(HANDSHAKE_RANDOM_LEN)?,
            pServerRandom: self.server.as_ptr() as CK_BYTE_PTR,
            ulServerRandomLen: ck_len(HANDSHAKE_RANDOM_LEN)?,
        })
    }
}

/// Parameters of the SSL3, TLS and TLS 1.2 master secret derivations
///
/// A PRF hash mechanism selects the TLS 1.2 layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterKeyDeriveParams {
    randoms: HandshakeRandoms,
    prf: Option<CK_MECHANISM_TYPE>,
    version: OutParam<Version>,
}

impl MasterKeyDeriveParams {
    pub fn new(randoms: HandshakeRandoms) -> MasterKeyDeriveParams {
        MasterKeyDeriveParams {
            randoms: randoms,
            prf: None,
            version: OutParam::new(Version::default()),
        }
    }

    pub fn with_prf(mut self, prf: CK_MECHANISM_TYPE) -> MasterKeyDeriveParams {
        self.prf = Some(prf);
        self
    }

    pub fn randoms(&self) -> &HandshakeRandoms {
        &self.randoms
    }

    /// The protocol version the module found in the pre-master secret
    pub fn version(&self) -> Result<Version> {
        self.version.get().copied()
    }
}

/// Key material returned by the key and MAC derivations
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyMaterial {
    pub client_mac_secret: CK_OBJECT_HANDLE,
    pub server_mac_secret: CK_OBJECT_HANDLE,
    pub client_key: CK_OBJECT_HANDLE,
    pub server_key: CK_OBJECT_HANDLE,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

/// Parameters of the SSL3, TLS and TLS 1.2 key and MAC derivations
///
/// The IV buffers are allocated here from the requested IV size and
/// written by the module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMatDeriveParams {
    mac_bits: CK_ULONG,
    key_bits: CK_ULONG,
    iv_bits: CK_ULONG,
    export: bool,
    randoms: HandshakeRandoms,
    prf: Option<CK_MECHANISM_TYPE>,
    material: OutParam<KeyMaterial>,
}

impl KeyMatDeriveParams {
    pub fn new(
        mac_bits: CK_ULONG,
        key_bits: CK_ULONG,
        iv_bits: CK_ULONG,
        export: bool,
        randoms: HandshakeRandoms,
    ) -> Result<KeyMatDeriveParams> {
        if iv_bits % 8 != 0 {
            return Err(Error::invalid_argument(format!(
                "IV size must be a whole number of bytes, got {} bits",
                iv_bits
            )));
        }
        let iv_len = usize::try_from(iv_bits / 8)?;
        Ok(KeyMatDeriveParams {
            mac_bits: mac_bits,
            key_bits: key_bits,
            iv_bits: iv_bits,
            export: export,
            randoms: randoms,
            prf: None,
            material: OutParam::new(KeyMaterial {
                client_iv: vec![0u8; iv_len],
                server_iv: vec![0u8; iv_len],
                ..Default::default()
            }),
        })
    }

    pub fn with_prf(mut self, prf: CK_MECHANISM_TYPE) -> KeyMatDeriveParams {
        self.prf = Some(prf);
        self
    }

    pub fn randoms(&self) -> &HandshakeRandoms {
        &self.randoms
    }

    pub fn iv_bits(&self) -> CK_ULONG {
        self.iv_bits
    }

    /// The derived handles and IVs, available after a successful call
    pub fn material(&self) -> Result<&KeyMaterial> {
        self.material.get()
    }
}

/// The closed set of mechanism parameter layouts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MechanismParams {
    Iv(Vec<u8>),
    RsaPkcsPss(RsaPssParams),
    RsaPkcsOaep(RsaOaepParams),
    Gcm(GcmParams),
    Ccm(CcmParams),
    Ecdh1Derive(Ecdh1DeriveParams),
    KeyDerivationString(Vec<u8>),
    MasterKeyDerive(MasterKeyDeriveParams),
    KeyMatDerive(KeyMatDeriveParams),
}

/// A mechanism code and its optional parameters
///
/// The pairing of code and parameter layout is not checked, a mismatch
/// is reported by the module when the mechanism is used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mechanism {
    code: CK_MECHANISM_TYPE,
    params: Option<MechanismParams>,
}

impl Mechanism {
    pub fn new(code: CK_MECHANISM_TYPE) -> Mechanism {
        Mechanism {
            code: code,
            params: None,
        }
    }

    pub fn with_params(
        code: CK_MECHANISM_TYPE,
        params: MechanismParams,
    ) -> Mechanism {
        Mechanism {
            code: code,
            params: Some(params),
        }
    }

    pub fn with_iv(code: CK_MECHANISM_TYPE, iv: Vec<u8>) -> Result<Mechanism> {
        if iv.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} requires an initialization vector",
                mechanism_name(code)
            )));
        }
        Ok(Self::with_params(code, MechanismParams::Iv(iv)))
    }

    pub fn code(&self) -> CK_MECHANISM_TYPE {
        self.code
    }

    pub fn params(&self) -> Option<&MechanismParams> {
        self.params.as_ref()
    }

    /// Lays out the mechanism for a module call
    ///
    /// Output parameters are reset, they become readable again only
    /// after [Mechanism::complete] is called with the outputs of a
    /// successful call.
    pub fn to_ck(&mut self) -> Result<CkMechanism<'_>> {
        let code = self.code;
        let params = match self.params.as_mut() {
            None => CkParams::None,
            Some(MechanismParams::Iv(iv)) => CkParams::Bytes(iv.as_slice()),
            Some(MechanismParams::KeyDerivationString(data)) => {
                CkParams::DerivationString(Box::new(
                    CK_KEY_DERIVATION_STRING_DATA {
                        pData: slice_ptr(data),
                        ulLen: ck_len(data.len())?,
                    },
                ))
            }
            Some(MechanismParams::RsaPkcsPss(p)) => {
                CkParams::Pss(Box::new(CK_RSA_PKCS_PSS_PARAMS {
                    hashAlg: p.hash_alg,
                    mgf: p.mgf,
                    sLen: p.salt_len,
                }))
            }
            Some(MechanismParams::RsaPkcsOaep(p)) => {
                let (source, ptr) = if p.source_data.is_empty() {
                    (0, std::ptr::null_mut())
                } else {
                    (CKZ_DATA_SPECIFIED, void_ptr!(p.source_data.as_ptr()))
                };
                CkParams::Oaep(Box::new(CK_RSA_PKCS_OAEP_PARAMS {
                    hashAlg: p.hash_alg,
                    mgf: p.mgf,
                    source: source,
                    pSourceData: ptr,
                    ulSourceDataLen: ck_len(p.source_data.len())?,
                }))
            }
            Some(MechanismParams::Gcm(p)) => {
                CkParams::Gcm(Box::new(CK_GCM_PARAMS {
                    pIv: slice_ptr(&p.iv),
                    ulIvLen: ck_len(p.iv.len())?,
                    ulIvBits: ck_len(p.iv.len())? * 8,
                    pAAD: slice_ptr(&p.aad),
                    ulAADLen: ck_len(p.aad.len())?,
                    ulTagBits: p.tag_bits,
                }))
            }
            Some(MechanismParams::Ccm(p)) => {
                CkParams::Ccm(Box::new(CK_CCM_PARAMS {
                    ulDataLen: p.data_len,
                    pNonce: slice_ptr(&p.nonce),
                    ulNonceLen: ck_len(p.nonce.len())?,
                    pAAD: slice_ptr(&p.aad),
                    ulAADLen: ck_len(p.aad.len())?,
                    ulMACLen: p.mac_len,
                }))
            }
            Some(MechanismParams::Ecdh1Derive(p)) => {
                CkParams::Ecdh(Box::new(CK_ECDH1_DERIVE_PARAMS {
                    kdf: p.kdf,
                    ulSharedDataLen: ck_len(p.shared_data.len())?,
                    pSharedData: slice_ptr(&p.shared_data),
                    ulPublicDataLen: ck_len(p.public_data.len())?,
                    pPublicData: slice_ptr(&p.public_data),
                }))
            }
            Some(MechanismParams::MasterKeyDerive(p)) => {
                p.version.reset();
                let mut version = Box::new(CK_VERSION { major: 0, minor: 0 });
                let random = p.randoms.to_ck()?;
                let pversion = &mut *version as *mut CK_VERSION;
                match p.prf {
                    Some(prf) => CkParams::Tls12MasterKey(
                        Box::new(CK_TLS12_MASTER_KEY_DERIVE_PARAMS {
                            RandomInfo: random,
                            pVersion: pversion,
                            prfHashMechanism: prf,
                        }),
                        version,
                    ),
                    None => CkParams::MasterKey(
                        Box::new(CK_SSL3_MASTER_KEY_DERIVE_PARAMS {
                            RandomInfo: random,
                            pVersion: pversion,
                        }),
                        version,
                    ),
                }
            }
            Some(MechanismParams::KeyMatDerive(p)) => {
                p.material.reset();
                let random = p.randoms.to_ck()?;
                let (mac_bits, key_bits, iv_bits) =
                    (p.mac_bits, p.key_bits, p.iv_bits);
                let export = if p.export { CK_TRUE } else { CK_FALSE };
                let prf = p.prf;
                let material = p.material.slot();
                let mut out = Box::new(CK_SSL3_KEY_MAT_OUT {
                    hClientMacSecret: CK_INVALID_HANDLE,
                    hServerMacSecret: CK_INVALID_HANDLE,
                    hClientKey: CK_INVALID_HANDLE,
                    hServerKey: CK_INVALID_HANDLE,
                    pIVClient: iv_ptr(&mut material.client_iv),
                    pIVServer: iv_ptr(&mut material.server_iv),
                });
                let pout = &mut *out as *mut CK_SSL3_KEY_MAT_OUT;
                match prf {
                    Some(prf) => CkParams::Tls12KeyMat(
                        Box::new(CK_TLS12_KEY_MAT_PARAMS {
                            ulMacSizeInBits: mac_bits,
                            ulKeySizeInBits: key_bits,
                            ulIVSizeInBits: iv_bits,
                            bIsExport: export,
                            RandomInfo: random,
                            pReturnedKeyMaterial: pout,
                            prfHashMechanism: prf,
                        }),
                        out,
                    ),
                    None => CkParams::KeyMat(
                        Box::new(CK_SSL3_KEY_MAT_PARAMS {
                            ulMacSizeInBits: mac_bits,
                            ulKeySizeInBits: key_bits,
                            ulIVSizeInBits: iv_bits,
                            bIsExport: export,
                            RandomInfo: random,
                            pReturnedKeyMaterial: pout,
                        }),
                        out,
                    ),
                }
            }
        };
        CkMechanism::new(code, params)
    }

    /// Stores the outputs of a successful call in the output parameters
    pub fn complete(&mut self, outputs: CkOutputs) {
        match (self.params.as_mut(), outputs) {
            (
                Some(MechanismParams::MasterKeyDerive(p)),
                CkOutputs::Version(v),
            ) => p.version.complete(v),
            (
                Some(MechanismParams::KeyMatDerive(p)),
                CkOutputs::KeyMaterial(handles),
            ) => {
                let mut material = p.material.slot().clone();
                material.client_mac_secret = handles[0];
                material.server_mac_secret = handles[1];
                material.client_key = handles[2];
                material.server_key = handles[3];
                p.material.complete(material);
            }
            _ => (),
        }
    }

    /// True if the parameters have output buffers the module writes
    pub fn has_outputs(&self) -> bool {
        matches!(
            self.params,
            Some(MechanismParams::MasterKeyDerive(_))
                | Some(MechanismParams::KeyMatDerive(_))
        )
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", mechanism_name(self.code))
    }
}

fn iv_ptr(iv: &mut Vec<u8>) -> CK_BYTE_PTR {
    if iv.is_empty() {
        std::ptr::null_mut()
    } else {
        iv.as_mut_ptr()
    }
}

enum CkParams<'a> {
    None,
    Bytes(&'a [u8]),
    DerivationString(Box<CK_KEY_DERIVATION_STRING_DATA>),
    Pss(Box<CK_RSA_PKCS_PSS_PARAMS>),
    Oaep(Box<CK_RSA_PKCS_OAEP_PARAMS>),
    Gcm(Box<CK_GCM_PARAMS>),
    Ccm(Box<CK_CCM_PARAMS>),
    Ecdh(Box<CK_ECDH1_DERIVE_PARAMS>),
    MasterKey(Box<CK_SSL3_MASTER_KEY_DERIVE_PARAMS>, Box<CK_VERSION>),
    Tls12MasterKey(Box<CK_TLS12_MASTER_KEY_DERIVE_PARAMS>, Box<CK_VERSION>),
    KeyMat(Box<CK_SSL3_KEY_MAT_PARAMS>, Box<CK_SSL3_KEY_MAT_OUT>),
    Tls12KeyMat(Box<CK_TLS12_KEY_MAT_PARAMS>, Box<CK_SSL3_KEY_MAT_OUT>),
}

/// Values the module wrote into the parameter structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CkOutputs {
    None,
    Version(Version),
    /// client MAC, server MAC, client key, server key
    KeyMaterial([CK_OBJECT_HANDLE; 4]),
}

/// A `CK_MECHANISM` and the parameter structs it points to
pub struct CkMechanism<'a> {
    mech: CK_MECHANISM,
    params: CkParams<'a>,
    _borrow: PhantomData<&'a mut Mechanism>,
}

fn param_ptr<T>(b: &mut Box<T>) -> Result<(CK_VOID_PTR, CK_ULONG)> {
    let ptr = &mut **b as *mut T as CK_VOID_PTR;
    Ok((ptr, ck_len(std::mem::size_of::<T>())?))
}

impl<'a> CkMechanism<'a> {
    fn new(code: CK_MECHANISM_TYPE, mut params: CkParams<'a>) -> Result<CkMechanism<'a>> {
        let (ptr, len) = match &mut params {
            CkParams::None => (std::ptr::null_mut(), 0),
            CkParams::Bytes(b) => (void_ptr!(b.as_ptr()), ck_len(b.len())?),
            CkParams::DerivationString(b) => param_ptr(b)?,
            CkParams::Pss(b) => param_ptr(b)?,
            CkParams::Oaep(b) => param_ptr(b)?,
            CkParams::Gcm(b) => param_ptr(b)?,
            CkParams::Ccm(b) => param_ptr(b)?,
            CkParams::Ecdh(b) => param_ptr(b)?,
            CkParams::MasterKey(b, _) => param_ptr(b)?,
            CkParams::Tls12MasterKey(b, _) => param_ptr(b)?,
            CkParams::KeyMat(b, _) => param_ptr(b)?,
            CkParams::Tls12KeyMat(b, _) => param_ptr(b)?,
        };
        Ok(CkMechanism {
            mech: CK_MECHANISM {
                mechanism: code,
                pParameter: ptr,
                ulParameterLen: len,
            },
            params: params,
            _borrow: PhantomData,
        })
    }

    pub fn as_ck(&self) -> &CK_MECHANISM {
        &self.mech
    }

    /// Collects what the module wrote into output fields
    ///
    /// Only meaningful after the call succeeded.
    pub fn outputs(&self) -> CkOutputs {
        match &self.params {
            CkParams::MasterKey(_, v) | CkParams::Tls12MasterKey(_, v) => {
                CkOutputs::Version(Version {
                    major: v.major,
                    minor: v.minor,
                })
            }
            CkParams::KeyMat(_, o) | CkParams::Tls12KeyMat(_, o) => {
                CkOutputs::KeyMaterial([
                    o.hClientMacSecret,
                    o.hServerMacSecret,
                    o.hClientKey,
                    o.hServerKey,
                ])
            }
            _ => CkOutputs::None,
        }
    }
}

impl fmt::Debug for CkMechanism<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CkMechanism")
            .field("mechanism", &mechanism_name(self.mech.mechanism))
            .field("ulParameterLen", &self.mech.ulParameterLen)
            .finish()
    }
}
