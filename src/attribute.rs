// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the typed representation of PKCS#11 attributes
//! ([Attribute], [AttrValue]) and the registry that maps attribute type
//! codes to a printable name and to the kind of value they carry
//! ([AttrKind]).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};
use crate::mechanism::mechanism_name;
use crate::pkcs11::vendor::{self, VendorDefs};
use crate::pkcs11::*;
use crate::template::Template;

use constant_time_eq::constant_time_eq;
use itertools::Itertools;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

const SENSITIVE_PLACEHOLDER: &str = "<sensitive>";
const ABSENT_PLACEHOLDER: &str = "<not present>";

/// List of attribute value kinds we understand
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttrKind {
    Bool,
    Ulong,
    Bytes,
    BigInt,
    String,
    Date,
    Mechanism,
    MechanismArray,
    Template,
    ObjectClass,
    KeyType,
    CertificateType,
    HwFeatureType,
    Opaque,
}

/// Struct to map a PKCS#11 attribute to a kind and a printable name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    name: &'a str,
    kind: AttrKind,
    sensitive: bool,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    /// Convenience function to efficiently search for a mapping by id
    fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search_by_key(&id, |a| a.id) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }

    /// Convenience function to search for a mapping by name
    fn search_by_name(s: &str) -> Option<&'static Attrmap<'static>> {
        ATTRMAP.iter().find(|a| a.name == s)
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr; as $kind:ident) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            kind: AttrKind::$kind,
            sensitive: false,
        }
    };
    ($id:expr; as $kind:ident; sensitive) => {
        Attrmap {
            id: $id,
            name: stringify!($id),
            kind: AttrKind::$kind,
            sensitive: true,
        }
    };
}

/// The standard attributes map, must be kept sorted by id
static ATTRMAP: [Attrmap<'_>; 84] = [
    attrmap_element!(CKA_CLASS; as ObjectClass),
    attrmap_element!(CKA_TOKEN; as Bool),
    attrmap_element!(CKA_PRIVATE; as Bool),
    attrmap_element!(CKA_LABEL; as String),
    attrmap_element!(CKA_UNIQUE_ID; as String),
    attrmap_element!(CKA_APPLICATION; as String),
    attrmap_element!(CKA_VALUE; as Bytes),
    attrmap_element!(CKA_OBJECT_ID; as Bytes),
    attrmap_element!(CKA_CERTIFICATE_TYPE; as CertificateType),
    attrmap_element!(CKA_ISSUER; as Bytes),
    attrmap_element!(CKA_SERIAL_NUMBER; as Bytes),
    attrmap_element!(CKA_AC_ISSUER; as Bytes),
    attrmap_element!(CKA_OWNER; as Bytes),
    attrmap_element!(CKA_ATTR_TYPES; as Bytes),
    attrmap_element!(CKA_TRUSTED; as Bool),
    attrmap_element!(CKA_CERTIFICATE_CATEGORY; as Ulong),
    attrmap_element!(CKA_JAVA_MIDP_SECURITY_DOMAIN; as Ulong),
    attrmap_element!(CKA_URL; as String),
    attrmap_element!(CKA_HASH_OF_SUBJECT_PUBLIC_KEY; as Bytes),
    attrmap_element!(CKA_HASH_OF_ISSUER_PUBLIC_KEY; as Bytes),
    attrmap_element!(CKA_NAME_HASH_ALGORITHM; as Mechanism),
    attrmap_element!(CKA_CHECK_VALUE; as Bytes),
    attrmap_element!(CKA_KEY_TYPE; as KeyType),
    attrmap_element!(CKA_SUBJECT; as Bytes),
    attrmap_element!(CKA_ID; as Bytes),
    attrmap_element!(CKA_SENSITIVE; as Bool),
    attrmap_element!(CKA_ENCRYPT; as Bool),
    attrmap_element!(CKA_DECRYPT; as Bool),
    attrmap_element!(CKA_WRAP; as Bool),
    attrmap_element!(CKA_UNWRAP; as Bool),
    attrmap_element!(CKA_SIGN; as Bool),
    attrmap_element!(CKA_SIGN_RECOVER; as Bool),
    attrmap_element!(CKA_VERIFY; as Bool),
    attrmap_element!(CKA_VERIFY_RECOVER; as Bool),
    attrmap_element!(CKA_DERIVE; as Bool),
    attrmap_element!(CKA_START_DATE; as Date),
    attrmap_element!(CKA_END_DATE; as Date),
    attrmap_element!(CKA_MODULUS; as BigInt),
    attrmap_element!(CKA_MODULUS_BITS; as Ulong),
    attrmap_element!(CKA_PUBLIC_EXPONENT; as BigInt),
    attrmap_element!(CKA_PRIVATE_EXPONENT; as BigInt; sensitive),
    attrmap_element!(CKA_PRIME_1; as BigInt; sensitive),
    attrmap_element!(CKA_PRIME_2; as BigInt; sensitive),
    attrmap_element!(CKA_EXPONENT_1; as BigInt; sensitive),
    attrmap_element!(CKA_EXPONENT_2; as BigInt; sensitive),
    attrmap_element!(CKA_COEFFICIENT; as BigInt; sensitive),
    attrmap_element!(CKA_PUBLIC_KEY_INFO; as Bytes),
    attrmap_element!(CKA_PRIME; as BigInt),
    attrmap_element!(CKA_SUBPRIME; as BigInt),
    attrmap_element!(CKA_BASE; as BigInt),
    attrmap_element!(CKA_PRIME_BITS; as Ulong),
    attrmap_element!(CKA_SUBPRIME_BITS; as Ulong),
    attrmap_element!(CKA_VALUE_BITS; as Ulong),
    attrmap_element!(CKA_VALUE_LEN; as Ulong),
    attrmap_element!(CKA_EXTRACTABLE; as Bool),
    attrmap_element!(CKA_LOCAL; as Bool),
    attrmap_element!(CKA_NEVER_EXTRACTABLE; as Bool),
    attrmap_element!(CKA_ALWAYS_SENSITIVE; as Bool),
    attrmap_element!(CKA_KEY_GEN_MECHANISM; as Mechanism),
    attrmap_element!(CKA_MODIFIABLE; as Bool),
    attrmap_element!(CKA_COPYABLE; as Bool),
    attrmap_element!(CKA_DESTROYABLE; as Bool),
    attrmap_element!(CKA_EC_PARAMS; as Bytes),
    attrmap_element!(CKA_EC_POINT; as Bytes),
    attrmap_element!(CKA_ALWAYS_AUTHENTICATE; as Bool),
    attrmap_element!(CKA_WRAP_WITH_TRUSTED; as Bool),
    attrmap_element!(CKA_GOSTR3410_PARAMS; as Bytes),
    attrmap_element!(CKA_GOSTR3411_PARAMS; as Bytes),
    attrmap_element!(CKA_GOST28147_PARAMS; as Bytes),
    attrmap_element!(CKA_HW_FEATURE_TYPE; as HwFeatureType),
    attrmap_element!(CKA_RESET_ON_INIT; as Bool),
    attrmap_element!(CKA_HAS_RESET; as Bool),
    attrmap_element!(CKA_PIXEL_X; as Ulong),
    attrmap_element!(CKA_PIXEL_Y; as Ulong),
    attrmap_element!(CKA_RESOLUTION; as Ulong),
    attrmap_element!(CKA_CHAR_ROWS; as Ulong),
    attrmap_element!(CKA_CHAR_COLUMNS; as Ulong),
    attrmap_element!(CKA_COLOR; as Bool),
    attrmap_element!(CKA_BITS_PER_PIXEL; as Ulong),
    attrmap_element!(CKA_MECHANISM_TYPE; as Mechanism),
    attrmap_element!(CKA_WRAP_TEMPLATE; as Template),
    attrmap_element!(CKA_UNWRAP_TEMPLATE; as Template),
    attrmap_element!(CKA_DERIVE_TEMPLATE; as Template),
    attrmap_element!(CKA_ALLOWED_MECHANISMS; as MechanismArray),
];

/// Resolves attribute type codes to names and value kinds
///
/// Standard attributes come from a static table, vendor attributes from
/// the vendor definitions. Codes unknown to both resolve to
/// [AttrKind::Opaque].
#[derive(Debug, Clone, Copy)]
pub struct AttributeRegistry<'a> {
    vendor: &'a VendorDefs,
}

impl AttributeRegistry<'static> {
    /// The registry backed by the process wide vendor definitions
    pub fn global() -> AttributeRegistry<'static> {
        AttributeRegistry {
            vendor: vendor::defs(),
        }
    }
}

impl<'a> AttributeRegistry<'a> {
    pub fn with_vendor(vendor: &'a VendorDefs) -> AttributeRegistry<'a> {
        AttributeRegistry { vendor: vendor }
    }

    /// Returns the value kind for the attribute type
    pub fn kind(&self, id: CK_ATTRIBUTE_TYPE) -> AttrKind {
        if let Some(a) = Attrmap::search_by_id(id) {
            return a.kind;
        }
        self.vendor.attribute_kind(id).unwrap_or(AttrKind::Opaque)
    }

    /// Returns true if the kind was registered, either as a standard
    /// or as a vendor attribute
    pub fn is_known(&self, id: CK_ATTRIBUTE_TYPE) -> bool {
        Attrmap::search_by_id(id).is_some()
            || self.vendor.attribute_kind(id).is_some()
    }

    /// Returns the printable name, unknown types print as hex
    pub fn name(&self, id: CK_ATTRIBUTE_TYPE) -> String {
        if let Some(a) = Attrmap::search_by_id(id) {
            return a.name.to_string();
        }
        match self.vendor.attribute_name(id) {
            Some(n) => n.to_string(),
            None => format!("CKA_{:#x}", id),
        }
    }

    /// Finds the attribute type and kind from the name
    pub fn by_name(&self, name: &str) -> Result<(CK_ATTRIBUTE_TYPE, AttrKind)> {
        if let Some(a) = Attrmap::search_by_name(name) {
            return Ok((a.id, a.kind));
        }
        match self.vendor.attribute(name) {
            Some(id) => Ok((id, self.kind(id))),
            None => Err(Error::not_found(name.to_string())),
        }
    }

    /// Whether values of this type are secret by nature
    pub fn is_sensitive(&self, id: CK_ATTRIBUTE_TYPE) -> bool {
        match Attrmap::search_by_id(id) {
            Some(a) => a.sensitive,
            None => false,
        }
    }
}

macro_rules! name_table {
    ($(#[$meta:meta])* $fn:ident; $t:ty; $($name:ident),+ $(,)?) => {
        $(#[$meta])*
        pub fn $fn(code: $t) -> Option<&'static str> {
            match code {
                $($name => Some(stringify!($name)),)+
                _ => None,
            }
        }
    };
}

name_table!(
    /// Name of a standard object class
    object_class_name; CK_OBJECT_CLASS;
    CKO_DATA,
    CKO_CERTIFICATE,
    CKO_PUBLIC_KEY,
    CKO_PRIVATE_KEY,
    CKO_SECRET_KEY,
    CKO_HW_FEATURE,
    CKO_DOMAIN_PARAMETERS,
    CKO_MECHANISM,
    CKO_OTP_KEY,
);

name_table!(
    /// Name of a standard key type
    key_type_name; CK_KEY_TYPE;
    CKK_RSA,
    CKK_DSA,
    CKK_DH,
    CKK_EC,
    CKK_X9_42_DH,
    CKK_GENERIC_SECRET,
    CKK_DES,
    CKK_DES2,
    CKK_DES3,
    CKK_AES,
    CKK_CAMELLIA,
    CKK_ARIA,
    CKK_SHA_1_HMAC,
    CKK_SHA256_HMAC,
    CKK_SHA384_HMAC,
    CKK_SHA512_HMAC,
    CKK_EC_EDWARDS,
    CKK_EC_MONTGOMERY,
);

name_table!(
    /// Name of a standard certificate type
    certificate_type_name; CK_CERTIFICATE_TYPE;
    CKC_X_509,
    CKC_X_509_ATTR_CERT,
    CKC_WTLS,
);

name_table!(
    /// Name of a standard hardware feature type
    hw_feature_name; CK_HW_FEATURE_TYPE;
    CKH_MONOTONIC_COUNTER,
    CKH_CLOCK,
    CKH_USER_INTERFACE,
);

/// A calendar date as used by the CKA_START_DATE and CKA_END_DATE
/// attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Date {
    year: u16,
    month: u8,
    day: u8,
}

impl Date {
    pub fn new(year: u16, month: u8, day: u8) -> Result<Date> {
        if year > 9999 || month < 1 || month > 12 || day < 1 || day > 31 {
            return Err(Error::invalid_argument(format!(
                "invalid date {:04}-{:02}-{:02}",
                year, month, day
            )));
        }
        Ok(Date {
            year: year,
            month: month,
            day: day,
        })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    /// The 8 ASCII digits layout of a CK_DATE
    pub fn to_bytes(&self) -> [u8; 8] {
        let s = format!("{:04}{:02}{:02}", self.year, self.month, self.day);
        let mut v = [0u8; 8];
        v.copy_from_slice(s.as_bytes());
        v
    }

    pub fn from_bytes(val: &[u8]) -> Result<Date> {
        if val.len() != 8 || !val.iter().all(|c| c.is_ascii_digit()) {
            return Err(Error::marshal(
                CKR_ATTRIBUTE_VALUE_INVALID,
                format!("malformed CK_DATE value {}", hex::encode(val)),
            ));
        }
        let num = |s: &[u8]| -> u16 {
            s.iter().fold(0u16, |acc, c| acc * 10 + u16::from(c - b'0'))
        };
        let month = u8::try_from(num(&val[4..6]))?;
        let day = u8::try_from(num(&val[6..8]))?;
        Date::new(num(&val[0..4]), month, day).map_err(|e| {
            Error::marshal(CKR_ATTRIBUTE_VALUE_INVALID, e.to_string())
        })
    }

    pub fn to_ck_date(&self) -> CK_DATE {
        let b = self.to_bytes();
        CK_DATE {
            year: [b[0], b[1], b[2], b[3]],
            month: [b[4], b[5]],
            day: [b[6], b[7]],
        }
    }

    pub fn from_ck_date(d: &CK_DATE) -> Result<Date> {
        let mut v = [0u8; 8];
        v[0..4].copy_from_slice(&d.year);
        v[4..6].copy_from_slice(&d.month);
        v[6..8].copy_from_slice(&d.day);
        Self::from_bytes(&v)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// The value carried by an attribute, one variant per [AttrKind]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrValue {
    Bool(bool),
    Ulong(CK_ULONG),
    Bytes(Vec<u8>),
    BigInt(BigUint),
    String(String),
    /// `None` is the empty date, allowed by the standard for unset dates
    Date(Option<Date>),
    Mechanism(CK_MECHANISM_TYPE),
    MechanismArray(Vec<CK_MECHANISM_TYPE>),
    Template(Template),
    ObjectClass(CK_OBJECT_CLASS),
    KeyType(CK_KEY_TYPE),
    CertificateType(CK_CERTIFICATE_TYPE),
    HwFeatureType(CK_HW_FEATURE_TYPE),
    Opaque(Vec<u8>),
}

fn ulong_from_bytes(val: &[u8]) -> Result<CK_ULONG> {
    match <[u8; CK_ULONG_SIZE]>::try_from(val) {
        Ok(a) => Ok(CK_ULONG::from_ne_bytes(a)),
        Err(_) => Err(Error::marshal(
            CKR_ATTRIBUTE_VALUE_INVALID,
            format!("expected {} bytes, got {}", CK_ULONG_SIZE, val.len()),
        )),
    }
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Ulong(_) => AttrKind::Ulong,
            AttrValue::Bytes(_) => AttrKind::Bytes,
            AttrValue::BigInt(_) => AttrKind::BigInt,
            AttrValue::String(_) => AttrKind::String,
            AttrValue::Date(_) => AttrKind::Date,
            AttrValue::Mechanism(_) => AttrKind::Mechanism,
            AttrValue::MechanismArray(_) => AttrKind::MechanismArray,
            AttrValue::Template(_) => AttrKind::Template,
            AttrValue::ObjectClass(_) => AttrKind::ObjectClass,
            AttrValue::KeyType(_) => AttrKind::KeyType,
            AttrValue::CertificateType(_) => AttrKind::CertificateType,
            AttrValue::HwFeatureType(_) => AttrKind::HwFeatureType,
            AttrValue::Opaque(_) => AttrKind::Opaque,
        }
    }

    /// Encodes the value in the layout the module expects
    ///
    /// Nested templates are not flat byte buffers, they are encoded by
    /// [Template::to_wire] instead.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(match self {
            AttrValue::Bool(b) => {
                let v: CK_BBOOL = if *b { CK_TRUE } else { CK_FALSE };
                vec![v]
            }
            AttrValue::Ulong(u)
            | AttrValue::Mechanism(u)
            | AttrValue::ObjectClass(u)
            | AttrValue::KeyType(u)
            | AttrValue::CertificateType(u)
            | AttrValue::HwFeatureType(u) => u.to_ne_bytes().to_vec(),
            AttrValue::Bytes(v) | AttrValue::Opaque(v) => v.clone(),
            AttrValue::BigInt(n) => n.to_bytes_be(),
            AttrValue::String(s) => s.as_bytes().to_vec(),
            AttrValue::Date(Some(d)) => d.to_bytes().to_vec(),
            AttrValue::Date(None) => Vec::new(),
            AttrValue::MechanismArray(m) => {
                let mut v = Vec::with_capacity(m.len() * CK_ULONG_SIZE);
                for e in m {
                    v.extend_from_slice(&e.to_ne_bytes());
                }
                v
            }
            AttrValue::Template(_) => {
                return Err(Error::invalid_argument(
                    "nested templates have no flat encoding".to_string(),
                ))
            }
        })
    }

    /// Decodes a value received from the module
    ///
    /// Enumerated kinds keep values outside the known set, they are
    /// only flagged when displayed.
    pub fn decode(kind: AttrKind, val: &[u8]) -> Result<AttrValue> {
        Ok(match kind {
            AttrKind::Bool => {
                if val.len() != CK_BBOOL_SIZE {
                    return Err(Error::marshal(
                        CKR_ATTRIBUTE_VALUE_INVALID,
                        format!("invalid boolean length {}", val.len()),
                    ));
                }
                AttrValue::Bool(val[0] != CK_FALSE)
            }
            AttrKind::Ulong => AttrValue::Ulong(ulong_from_bytes(val)?),
            AttrKind::Mechanism => AttrValue::Mechanism(ulong_from_bytes(val)?),
            AttrKind::ObjectClass => {
                AttrValue::ObjectClass(ulong_from_bytes(val)?)
            }
            AttrKind::KeyType => AttrValue::KeyType(ulong_from_bytes(val)?),
            AttrKind::CertificateType => {
                AttrValue::CertificateType(ulong_from_bytes(val)?)
            }
            AttrKind::HwFeatureType => {
                AttrValue::HwFeatureType(ulong_from_bytes(val)?)
            }
            AttrKind::Bytes => AttrValue::Bytes(val.to_vec()),
            AttrKind::Opaque => AttrValue::Opaque(val.to_vec()),
            AttrKind::BigInt => AttrValue::BigInt(BigUint::from_bytes_be(val)),
            AttrKind::String => match std::str::from_utf8(val) {
                Ok(s) => AttrValue::String(s.to_string()),
                Err(_) => {
                    return Err(Error::marshal(
                        CKR_ATTRIBUTE_VALUE_INVALID,
                        "string attribute is not valid UTF-8".to_string(),
                    ))
                }
            },
            AttrKind::Date => {
                if val.is_empty() {
                    AttrValue::Date(None)
                } else {
                    AttrValue::Date(Some(Date::from_bytes(val)?))
                }
            }
            AttrKind::MechanismArray => {
                if val.len() % CK_ULONG_SIZE != 0 {
                    return Err(Error::marshal(
                        CKR_ATTRIBUTE_VALUE_INVALID,
                        format!("invalid mechanism array length {}", val.len()),
                    ));
                }
                let mut v = Vec::with_capacity(val.len() / CK_ULONG_SIZE);
                for chunk in val.chunks_exact(CK_ULONG_SIZE) {
                    v.push(ulong_from_bytes(chunk)?);
                }
                AttrValue::MechanismArray(v)
            }
            AttrKind::Template => {
                return Err(Error::marshal(
                    CKR_GENERAL_ERROR,
                    "nested templates are decoded from attribute arrays"
                        .to_string(),
                ))
            }
        })
    }

    /// Returns the value in the form a module value of `kind` decodes to
    ///
    /// Big integers and byte strings convert into each other, in which
    /// case the bytes must be a minimal unsigned encoding. Values for
    /// types we know nothing about become their encoding. Returns None
    /// when there is no such form.
    pub fn conform(&self, kind: AttrKind) -> Option<AttrValue> {
        match (self, kind) {
            (v, k) if v.kind() == k => Some(v.clone()),
            (AttrValue::Bytes(b), AttrKind::BigInt) => match b.as_slice() {
                [] => None,
                [0, _, ..] => None,
                _ => Some(AttrValue::BigInt(BigUint::from_bytes_be(b))),
            },
            (AttrValue::BigInt(n), AttrKind::Bytes) => {
                Some(AttrValue::Bytes(n.to_bytes_be()))
            }
            (v, AttrKind::Opaque) => v.encode().ok().map(AttrValue::Opaque),
            _ => None,
        }
    }
}

fn enum_name(
    f: &mut fmt::Formatter,
    code: CK_ULONG,
    std_name: Option<&'static str>,
    vendor_name: Option<&str>,
) -> fmt::Result {
    match std_name.or(vendor_name) {
        Some(n) => write!(f, "{}", n),
        None => write!(f, "unknown ({:#x})", code),
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let defs = vendor::defs();
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Ulong(u) => write!(f, "{}", u),
            AttrValue::Bytes(v) | AttrValue::Opaque(v) => {
                write!(f, "{}", hex::encode(v))
            }
            AttrValue::BigInt(n) => write!(f, "{:#x}", n),
            AttrValue::String(s) => write!(f, "{:?}", s),
            AttrValue::Date(Some(d)) => write!(f, "{}", d),
            AttrValue::Date(None) => write!(f, "<empty date>"),
            AttrValue::Mechanism(m) => write!(f, "{}", mechanism_name(*m)),
            AttrValue::MechanismArray(m) => write!(
                f,
                "[{}]",
                m.iter().map(|c| mechanism_name(*c)).join(", ")
            ),
            AttrValue::Template(t) => write!(f, "{}", t),
            AttrValue::ObjectClass(c) => enum_name(
                f,
                *c,
                object_class_name(*c),
                defs.object_class_name(*c),
            ),
            AttrValue::KeyType(k) => {
                enum_name(f, *k, key_type_name(*k), defs.key_type_name(*k))
            }
            AttrValue::CertificateType(c) => {
                enum_name(f, *c, certificate_type_name(*c), None)
            }
            AttrValue::HwFeatureType(h) => {
                enum_name(f, *h, hw_feature_name(*h), None)
            }
        }
    }
}

/// A Rust native, typed attribute
///
/// An attribute without a value is "not present": it names a type to
/// query, or reports a value the module could not return. Sensitive
/// attributes never print their value.
#[derive(Clone)]
pub struct Attribute {
    ck_type: CK_ATTRIBUTE_TYPE,
    value: Option<AttrValue>,
    sensitive: bool,
}

macro_rules! attr_constructor {
    ($(#[$meta:meta])* $name:ident; $t:ty; $variant:ident) => {
        $(#[$meta])*
        pub fn $name(t: CK_ATTRIBUTE_TYPE, val: $t) -> Attribute {
            Attribute::new(t, AttrValue::$variant(val))
        }
    };
}

macro_rules! attr_getter {
    ($(#[$meta:meta])* $name:ident; $r:ty; $variant:ident) => {
        $(#[$meta])*
        pub fn $name(&self) -> Result<$r> {
            match &self.value {
                Some(AttrValue::$variant(v)) => Ok(v.clone()),
                Some(_) => Err(CKR_ATTRIBUTE_TYPE_INVALID)?,
                None => Err(Error::not_found(self.name())),
            }
        }
    };
}

impl Attribute {
    /// Creates a present attribute, the sensitive flag defaults to what
    /// the registry says about the type
    pub fn new(t: CK_ATTRIBUTE_TYPE, value: AttrValue) -> Attribute {
        Attribute {
            ck_type: t,
            value: Some(value),
            sensitive: AttributeRegistry::global().is_sensitive(t),
        }
    }

    /// Creates an attribute with no value
    pub fn absent(t: CK_ATTRIBUTE_TYPE) -> Attribute {
        Attribute {
            ck_type: t,
            value: None,
            sensitive: false,
        }
    }

    attr_constructor!(from_bool; bool; Bool);
    attr_constructor!(from_ulong; CK_ULONG; Ulong);
    attr_constructor!(from_bytes; Vec<u8>; Bytes);
    attr_constructor!(from_string; String; String);
    attr_constructor!(from_mechanism; CK_MECHANISM_TYPE; Mechanism);
    attr_constructor!(
        /// Creates a mechanism list attribute such as
        /// CKA_ALLOWED_MECHANISMS
        from_mechanisms; Vec<CK_MECHANISM_TYPE>; MechanismArray
    );
    attr_constructor!(from_template; Template; Template);
    attr_constructor!(from_object_class; CK_OBJECT_CLASS; ObjectClass);
    attr_constructor!(from_key_type; CK_KEY_TYPE; KeyType);
    attr_constructor!(
        from_certificate_type; CK_CERTIFICATE_TYPE; CertificateType
    );
    attr_constructor!(from_hw_feature; CK_HW_FEATURE_TYPE; HwFeatureType);
    attr_constructor!(from_opaque; Vec<u8>; Opaque);

    /// Creates a big integer attribute, encoded unsigned big-endian with
    /// no leading zeros
    pub fn from_biguint(t: CK_ATTRIBUTE_TYPE, val: BigUint) -> Attribute {
        Attribute::new(t, AttrValue::BigInt(val))
    }

    /// Creates a date attribute, `None` creates the empty date
    pub fn from_date(t: CK_ATTRIBUTE_TYPE, val: Option<Date>) -> Attribute {
        Attribute::new(t, AttrValue::Date(val))
    }

    /// Marks the attribute as sensitive
    pub fn sensitive(mut self) -> Attribute {
        self.sensitive = true;
        self
    }

    pub fn set_sensitive(&mut self, sensitive: bool) {
        self.sensitive = sensitive;
    }

    /// Returns the PKCS#11 attribute 'type' which is the attribute ID
    pub fn get_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.ck_type
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn value(&self) -> Option<&AttrValue> {
        self.value.as_ref()
    }

    /// Returns the name of the attribute as an allocated String
    pub fn name(&self) -> String {
        AttributeRegistry::global().name(self.ck_type)
    }

    /// Returns the value converted to the kind registered for the type
    fn conformed(
        &self,
        registry: &AttributeRegistry<'_>,
    ) -> Result<Option<AttrValue>> {
        let value = match &self.value {
            Some(v) => v,
            None => return Ok(None),
        };
        let kind = registry.kind(self.ck_type);
        let conformed = match value.conform(kind) {
            Some(v) => v,
            None => {
                return Err(Error::invalid_argument(format!(
                    "{} expects a {:?} value, got {:?}",
                    registry.name(self.ck_type),
                    kind,
                    value.kind()
                )))
            }
        };
        if let AttrValue::Template(t) = value {
            for a in t.iter() {
                a.check(registry)?;
            }
        }
        Ok(Some(conformed))
    }

    /// Checks the value can be represented as the kind registered for
    /// the type
    pub fn check(&self, registry: &AttributeRegistry<'_>) -> Result<()> {
        self.conformed(registry)?;
        Ok(())
    }

    /// Returns the attribute with its value in the form the module
    /// returns it, so that it reads back unchanged
    pub fn normalize(self, registry: &AttributeRegistry<'_>) -> Result<Attribute> {
        let value = self.conformed(registry)?;
        Ok(Attribute {
            ck_type: self.ck_type,
            value: value,
            sensitive: self.sensitive,
        })
    }

    /// Returns the type and the encoded value of a present attribute
    pub fn encode(&self) -> Result<(CK_ATTRIBUTE_TYPE, Vec<u8>)> {
        match &self.value {
            Some(v) => Ok((self.ck_type, v.encode()?)),
            None => Err(Error::not_found(self.name())),
        }
    }

    /// Creates a present attribute decoding the value with the kind
    /// registered for the type
    pub fn decode(
        registry: &AttributeRegistry<'_>,
        t: CK_ATTRIBUTE_TYPE,
        val: &[u8],
    ) -> Result<Attribute> {
        let value = AttrValue::decode(registry.kind(t), val)?;
        Ok(Attribute {
            ck_type: t,
            value: Some(value),
            sensitive: registry.is_sensitive(t),
        })
    }

    attr_getter!(to_bool; bool; Bool);
    attr_getter!(to_ulong; CK_ULONG; Ulong);
    attr_getter!(to_string; String; String);
    attr_getter!(to_biguint; BigUint; BigInt);
    attr_getter!(to_date; Option<Date>; Date);
    attr_getter!(to_mechanism; CK_MECHANISM_TYPE; Mechanism);
    attr_getter!(to_mechanisms; Vec<CK_MECHANISM_TYPE>; MechanismArray);
    attr_getter!(to_template; Template; Template);
    attr_getter!(to_object_class; CK_OBJECT_CLASS; ObjectClass);
    attr_getter!(to_key_type; CK_KEY_TYPE; KeyType);

    /// Returns the value as raw bytes for the byte-like kinds
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.value {
            Some(AttrValue::Bytes(v)) | Some(AttrValue::Opaque(v)) => {
                Ok(v.clone())
            }
            Some(AttrValue::BigInt(n)) => Ok(n.to_bytes_be()),
            Some(_) => Err(CKR_ATTRIBUTE_TYPE_INVALID)?,
            None => Err(Error::not_found(self.name())),
        }
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Attribute) -> bool {
        match (&self.value, &other.value) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                if self.ck_type != other.ck_type
                    || self.sensitive != other.sensitive
                {
                    return false;
                }
                if self.sensitive {
                    if let (Ok(ea), Ok(eb)) = (a.encode(), b.encode()) {
                        return a.kind() == b.kind()
                            && constant_time_eq(&ea, &eb);
                    }
                }
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.value {
            /* all absent attributes are equal */
            None => 0u8.hash(state),
            Some(v) => {
                1u8.hash(state);
                self.ck_type.hash(state);
                self.sensitive.hash(state);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: ", self.name())?;
        match &self.value {
            None => write!(f, "{}", ABSENT_PLACEHOLDER),
            Some(_) if self.sensitive => write!(f, "{}", SENSITIVE_PLACEHOLDER),
            Some(v) => write!(f, "{}", v),
        }
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let value: &dyn fmt::Debug = match &self.value {
            None => &ABSENT_PLACEHOLDER,
            Some(_) if self.sensitive => &SENSITIVE_PLACEHOLDER,
            Some(v) => v,
        };
        f.debug_struct("Attribute")
            .field("type", &self.name())
            .field("value", value)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_order_of_attrmap() {
        let mut copy = ATTRMAP.clone();
        copy.sort();
        assert_eq!(ATTRMAP, copy);
        for w in ATTRMAP.windows(2) {
            assert_ne!(w[0].id, w[1].id);
        }
    }

    #[test]
    fn lookups() {
        let reg = AttributeRegistry::global();
        assert_eq!(reg.kind(CKA_LABEL), AttrKind::String);
        assert_eq!(reg.kind(CKA_WRAP_TEMPLATE), AttrKind::Template);
        assert_eq!(reg.name(CKA_MODULUS), "CKA_MODULUS");
        assert_eq!(reg.by_name("CKA_ID").unwrap(), (CKA_ID, AttrKind::Bytes));
        assert_eq!(reg.kind(0x7fff_0000), AttrKind::Opaque);
        assert_eq!(reg.name(0x7fff_0000), "CKA_0x7fff0000");
        assert!(reg.is_sensitive(CKA_PRIVATE_EXPONENT));
        assert!(!reg.is_sensitive(CKA_MODULUS));
    }
}
