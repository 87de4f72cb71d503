// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! PKCS#11 API Vendor extensions
//!
//! Resolution of vendor defined names to codes. The definitions are read
//! once, on first use, from the vendor configuration (see
//! [crate::config::VendorConfig]).

use crate::attribute::AttrKind;
use crate::config::VendorConfig;
use crate::error::{Error, Result};
use crate::pkcs11::*;

use bimap::BiMap;
use once_cell::sync::Lazy;

/// Name to code maps for each family of vendor definitions
#[derive(Debug, Default)]
pub struct VendorDefs {
    mechanisms: BiMap<String, CK_MECHANISM_TYPE>,
    attributes: BiMap<String, CK_ATTRIBUTE_TYPE>,
    attribute_kinds: Vec<(CK_ATTRIBUTE_TYPE, AttrKind)>,
    object_classes: BiMap<String, CK_OBJECT_CLASS>,
    key_types: BiMap<String, CK_KEY_TYPE>,
}

fn fill(map: &mut BiMap<String, CK_ULONG>, name: &str, code: CK_ULONG) {
    if let Err((n, c)) = map.insert_no_overwrite(name.to_string(), code) {
        log::warn!("duplicate vendor definition {} = {:#x} ignored", n, c);
    }
}

impl VendorDefs {
    pub fn from_config(conf: &VendorConfig) -> VendorDefs {
        let mut defs = VendorDefs::default();
        for (name, code) in &conf.mechanisms {
            fill(&mut defs.mechanisms, name, *code);
        }
        for (name, attr) in &conf.attributes {
            fill(&mut defs.attributes, name, attr.code);
            defs.attribute_kinds.push((attr.code, attr.kind));
        }
        for (name, code) in &conf.object_classes {
            fill(&mut defs.object_classes, name, *code);
        }
        for (name, code) in &conf.key_types {
            fill(&mut defs.key_types, name, *code);
        }
        defs.attribute_kinds.sort_by_key(|(c, _)| *c);
        defs.attribute_kinds.dedup_by_key(|(c, _)| *c);
        defs
    }

    pub fn mechanism(&self, name: &str) -> Option<CK_MECHANISM_TYPE> {
        self.mechanisms.get_by_left(name).copied()
    }

    pub fn attribute(&self, name: &str) -> Option<CK_ATTRIBUTE_TYPE> {
        self.attributes.get_by_left(name).copied()
    }

    pub fn object_class(&self, name: &str) -> Option<CK_OBJECT_CLASS> {
        self.object_classes.get_by_left(name).copied()
    }

    pub fn key_type(&self, name: &str) -> Option<CK_KEY_TYPE> {
        self.key_types.get_by_left(name).copied()
    }

    pub fn mechanism_name(&self, code: CK_MECHANISM_TYPE) -> Option<&str> {
        self.mechanisms.get_by_right(&code).map(|s| s.as_str())
    }

    pub fn attribute_name(&self, code: CK_ATTRIBUTE_TYPE) -> Option<&str> {
        self.attributes.get_by_right(&code).map(|s| s.as_str())
    }

    pub fn object_class_name(&self, code: CK_OBJECT_CLASS) -> Option<&str> {
        self.object_classes.get_by_right(&code).map(|s| s.as_str())
    }

    pub fn key_type_name(&self, code: CK_KEY_TYPE) -> Option<&str> {
        self.key_types.get_by_right(&code).map(|s| s.as_str())
    }

    /// Returns the value kind of a vendor attribute
    pub fn attribute_kind(&self, code: CK_ATTRIBUTE_TYPE) -> Option<AttrKind> {
        match self.attribute_kinds.binary_search_by_key(&code, |(c, _)| *c) {
            Ok(i) => Some(self.attribute_kinds[i].1),
            Err(_) => None,
        }
    }
}

static VENDOR_DEFS: Lazy<VendorDefs> = Lazy::new(|| {
    match VendorConfig::load() {
        Ok(conf) => VendorDefs::from_config(&conf),
        Err(e) => {
            log::error!("no usable vendor definitions: {}", e);
            VendorDefs::default()
        }
    }
});

/// The process wide vendor definitions
pub fn defs() -> &'static VendorDefs {
    &VENDOR_DEFS
}

fn unresolved(family: &str, name: &str) -> CK_ULONG {
    log::warn!(
        "unknown vendor {} {}, resolving to {:#x}",
        family,
        name,
        UNRESOLVED_VENDOR_CODE
    );
    UNRESOLVED_VENDOR_CODE
}

fn not_found(family: &str, name: &str) -> Error {
    Error::not_found(format!("unknown vendor {} {}", family, name))
}

/// Resolves a vendor mechanism name, unknown names resolve to
/// [UNRESOLVED_VENDOR_CODE]
pub fn mechanism(name: &str) -> CK_MECHANISM_TYPE {
    defs()
        .mechanism(name)
        .unwrap_or_else(|| unresolved("mechanism", name))
}

/// Resolves a vendor attribute name, unknown names resolve to
/// [UNRESOLVED_VENDOR_CODE]
pub fn attribute(name: &str) -> CK_ATTRIBUTE_TYPE {
    defs()
        .attribute(name)
        .unwrap_or_else(|| unresolved("attribute", name))
}

/// Resolves a vendor object class name, unknown names resolve to
/// [UNRESOLVED_VENDOR_CODE]
pub fn object_class(name: &str) -> CK_OBJECT_CLASS {
    defs()
        .object_class(name)
        .unwrap_or_else(|| unresolved("object class", name))
}

/// Resolves a vendor key type name, unknown names resolve to
/// [UNRESOLVED_VENDOR_CODE]
pub fn key_type(name: &str) -> CK_KEY_TYPE {
    defs()
        .key_type(name)
        .unwrap_or_else(|| unresolved("key type", name))
}

pub fn try_mechanism(name: &str) -> Result<CK_MECHANISM_TYPE> {
    defs()
        .mechanism(name)
        .ok_or_else(|| not_found("mechanism", name))
}

pub fn try_attribute(name: &str) -> Result<CK_ATTRIBUTE_TYPE> {
    defs()
        .attribute(name)
        .ok_or_else(|| not_found("attribute", name))
}

pub fn try_object_class(name: &str) -> Result<CK_OBJECT_CLASS> {
    defs()
        .object_class(name)
        .ok_or_else(|| not_found("object class", name))
}

pub fn try_key_type(name: &str) -> Result<CK_KEY_TYPE> {
    defs()
        .key_type(name)
        .ok_or_else(|| not_found("key type", name))
}
