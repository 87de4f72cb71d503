// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! Vendor definitions configuration
//!
//! Vendor defined mechanisms, attributes, object classes and key types are
//! not part of the standard tables, their codes are looked up by name in a
//! TOML file. The file named by the `P11WRAP_VENDOR_CONF` environment
//! variable is consulted first, the definitions bundled with the crate are
//! used when that is not set or can't be loaded.

use std::collections::BTreeMap;
use std::env;
use std::fs;

use crate::attribute::AttrKind;
use crate::error::{Error, Result};
use crate::pkcs11::*;

use serde::de;
use serde::{Deserialize, Serialize};

pub const VENDOR_CONF_ENV: &str = "P11WRAP_VENDOR_CONF";

const BUNDLED_VENDOR_CONF: &str = include_str!("vendor.toml");

/// A vendor defined attribute, the kind selects how values are encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorAttribute {
    pub code: CK_ULONG,
    pub kind: AttrKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorConfig {
    #[serde(default)]
    pub mechanisms: BTreeMap<String, CK_ULONG>,
    #[serde(default)]
    pub attributes: BTreeMap<String, VendorAttribute>,
    #[serde(default)]
    pub object_classes: BTreeMap<String, CK_ULONG>,
    #[serde(default)]
    pub key_types: BTreeMap<String, CK_ULONG>,
}

fn config_error<E: de::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::ck_rv_from_error(CKR_ARGUMENTS_BAD, error)
}

impl VendorConfig {
    pub fn new() -> VendorConfig {
        VendorConfig::default()
    }

    pub fn from_str(config_str: &str) -> Result<VendorConfig> {
        let conf: VendorConfig =
            toml::from_str(config_str).map_err(config_error)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_file(filename: &str) -> Result<VendorConfig> {
        let config_str = fs::read_to_string(filename)?;
        Self::from_str(&config_str)
    }

    /// The definitions shipped with the crate
    pub fn bundled() -> Result<VendorConfig> {
        Self::from_str(BUNDLED_VENDOR_CONF)
    }

    /// Loads the override file if one is given, falls back to the
    /// bundled definitions if there is none or it fails to load
    pub fn load_from(path: Option<&str>) -> Result<VendorConfig> {
        if let Some(p) = path {
            match Self::from_file(p) {
                Ok(conf) => {
                    log::debug!("vendor definitions loaded from {}", p);
                    return Ok(conf);
                }
                Err(e) => {
                    log::warn!(
                        "failed to load vendor definitions from {}: {}, \
                         using bundled defaults",
                        p,
                        e
                    );
                }
            }
        }
        Self::bundled()
    }

    /// Loads the configuration for the process, see [VENDOR_CONF_ENV]
    pub fn load() -> Result<VendorConfig> {
        let path = env::var(VENDOR_CONF_ENV).ok();
        Self::load_from(path.as_deref())
    }

    /// Vendor codes must live in the vendor defined range, anything
    /// else would collide with standard definitions
    fn validate(&self) -> Result<()> {
        let codes = self
            .mechanisms
            .iter()
            .chain(self.object_classes.iter())
            .chain(self.key_types.iter())
            .map(|(n, c)| (n, *c))
            .chain(self.attributes.iter().map(|(n, a)| (n, a.code)));
        for (name, code) in codes {
            if code & CKA_VENDOR_DEFINED != CKA_VENDOR_DEFINED {
                return Err(Error::invalid_argument(format!(
                    "vendor code {:#x} for {} is outside the vendor range",
                    code, name
                )));
            }
        }
        Ok(())
    }
}
