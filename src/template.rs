// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

//! Ordered attribute collections and their marshaling to the flat
//! `CK_ATTRIBUTE` arrays modules consume and fill.

use std::fmt;

use crate::attribute::{AttrKind, AttrValue, Attribute, AttributeRegistry};
use crate::error::{Error, Result};
use crate::misc::{bytes_to_vec, ck_len, sizeof, void_ptr, zeromem};
use crate::pkcs11::*;

use itertools::Itertools;

/// An ordered set of attributes, at most one per attribute type
///
/// Insertion order is kept and determines the order of the wire array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Template {
    attrs: Vec<Attribute>,
}

impl Template {
    pub fn new() -> Template {
        Template::default()
    }

    /// Builds a template from a list of attributes, later entries replace
    /// earlier entries of the same type
    pub fn with(attrs: Vec<Attribute>) -> Result<Template> {
        let mut t = Template::new();
        for a in attrs {
            t.set(a)?;
        }
        Ok(t)
    }

    /// Adds an attribute, replacing in place one of the same type
    ///
    /// Values are stored as the kind registered for the type, values
    /// that cannot be represented that way are rejected here, not when
    /// the template is encoded.
    pub fn set(&mut self, attr: Attribute) -> Result<()> {
        let attr = attr.normalize(&AttributeRegistry::global())?;
        self.insert(attr);
        Ok(())
    }

    fn insert(&mut self, attr: Attribute) {
        match self
            .attrs
            .iter_mut()
            .find(|a| a.get_type() == attr.get_type())
        {
            Some(a) => *a = attr,
            None => self.attrs.push(attr),
        }
    }

    pub fn get(&self, t: CK_ATTRIBUTE_TYPE) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.get_type() == t)
    }

    pub fn remove(&mut self, t: CK_ATTRIBUTE_TYPE) -> Option<Attribute> {
        match self.attrs.iter().position(|a| a.get_type() == t) {
            Some(idx) => Some(self.attrs.remove(idx)),
            None => None,
        }
    }

    /// Flags an attribute the module withheld as sensitive
    pub(crate) fn mark_sensitive(&mut self, t: CK_ATTRIBUTE_TYPE) {
        if let Some(a) = self.attrs.iter_mut().find(|a| a.get_type() == t) {
            a.set_sensitive(true);
        }
    }

    pub fn contains(&self, t: CK_ATTRIBUTE_TYPE) -> bool {
        self.get(t).is_some()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.iter()
    }

    pub fn types(&self) -> Vec<CK_ATTRIBUTE_TYPE> {
        self.attrs.iter().map(|a| a.get_type()).collect()
    }

    /// A copy holding only the attributes that carry a value
    pub fn present(&self) -> Template {
        Template {
            attrs: self
                .attrs
                .iter()
                .filter(|a| a.is_present())
                .cloned()
                .collect(),
        }
    }

    /// Encodes the present attributes, in order, for a module call
    pub fn to_wire(&self) -> Result<WireTemplate> {
        let mut wire = WireTemplate::new();
        for a in self.attrs.iter().filter(|a| a.is_present()) {
            match a.value() {
                Some(AttrValue::Template(t)) => {
                    wire.push_nested(
                        a.get_type(),
                        t.to_wire()?,
                        a.is_sensitive(),
                    )?;
                }
                _ => {
                    let (t, v) = a.encode()?;
                    wire.push_bytes(t, v, a.is_sensitive())?;
                }
            }
        }
        Ok(wire)
    }

    /// Decodes the entries of a wire template after a module call
    pub fn from_wire(wire: &WireTemplate) -> Result<Template> {
        wire.decode(&AttributeRegistry::global())
    }

    /// Decodes an attribute array owned by someone else
    ///
    /// # Safety
    ///
    /// Every entry that is not marked unavailable must point to at least
    /// `ulValueLen` readable bytes, nested templates to arrays of
    /// `CK_ATTRIBUTE` satisfying the same condition.
    pub unsafe fn from_ck_attrs(attrs: &[CK_ATTRIBUTE]) -> Result<Template> {
        decode_raw(&AttributeRegistry::global(), attrs)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ {} }}", self.attrs.iter().join(", "))
    }
}

unsafe fn decode_raw(
    registry: &AttributeRegistry<'_>,
    attrs: &[CK_ATTRIBUTE],
) -> Result<Template> {
    let mut tmpl = Template::new();
    for a in attrs {
        if a.ulValueLen == CK_UNAVAILABLE_INFORMATION {
            tmpl.insert(Attribute::absent(a.type_));
            continue;
        }
        if a.pValue.is_null() && a.ulValueLen != 0 {
            return Err(missing_value(registry, a.type_));
        }
        let attr = if registry.kind(a.type_) == AttrKind::Template {
            let count = nested_count(registry, a.type_, a.ulValueLen)?;
            let nested = if count == 0 {
                Template::new()
            } else {
                let arr = std::slice::from_raw_parts(
                    a.pValue as *const CK_ATTRIBUTE,
                    count,
                );
                decode_raw(registry, arr)?
            };
            Attribute::from_template(a.type_, nested)
        } else {
            let v = bytes_to_vec!(a.pValue, a.ulValueLen);
            Attribute::decode(registry, a.type_, &v)?
        };
        tmpl.insert(attr);
    }
    Ok(tmpl)
}

fn missing_value(registry: &AttributeRegistry<'_>, t: CK_ATTRIBUTE_TYPE) -> Error {
    Error::marshal(
        CKR_GENERAL_ERROR,
        format!("{} returned a length but no value", registry.name(t)),
    )
}

fn nested_count(
    registry: &AttributeRegistry<'_>,
    t: CK_ATTRIBUTE_TYPE,
    len: CK_ULONG,
) -> Result<usize> {
    let size = sizeof!(CK_ATTRIBUTE);
    if len % size != 0 {
        return Err(Error::marshal(
            CKR_ATTRIBUTE_VALUE_INVALID,
            format!("{} length {} is not an attribute array", registry.name(t), len),
        ));
    }
    Ok(usize::try_from(len / size)?)
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Empty,
    Buffer(usize),
    Nested(usize),
}

/// The wire form of a template: a `CK_ATTRIBUTE` array and the buffers
/// its entries point into
///
/// Buffers are owned here, so the array stays valid for as long as the
/// WireTemplate lives and is not modified. Buffers are zeroized on drop.
pub struct WireTemplate {
    attrs: Vec<CK_ATTRIBUTE>,
    slots: Vec<Slot>,
    sensitive: Vec<bool>,
    bufs: Vec<Vec<u8>>,
    nested: Vec<WireTemplate>,
}

impl WireTemplate {
    pub fn new() -> WireTemplate {
        WireTemplate {
            attrs: Vec::new(),
            slots: Vec::new(),
            sensitive: Vec::new(),
            bufs: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Builds the array for a `C_GetAttributeValue` length query
    ///
    /// All entries start with no buffer, [WireTemplate::allocate] adds
    /// buffers once the module reported the lengths.
    pub fn query(types: &[CK_ATTRIBUTE_TYPE]) -> WireTemplate {
        let registry = AttributeRegistry::global();
        let mut wire = WireTemplate::new();
        for t in types {
            wire.push_empty(*t, registry.is_sensitive(*t));
        }
        wire
    }

    fn blank(count: usize) -> WireTemplate {
        let mut wire = WireTemplate::new();
        for _ in 0..count {
            wire.push_empty(0, false);
        }
        wire
    }

    fn push_empty(&mut self, t: CK_ATTRIBUTE_TYPE, sensitive: bool) {
        self.attrs.push(CK_ATTRIBUTE {
            type_: t,
            pValue: std::ptr::null_mut(),
            ulValueLen: 0,
        });
        self.slots.push(Slot::Empty);
        self.sensitive.push(sensitive);
    }

    fn push_bytes(
        &mut self,
        t: CK_ATTRIBUTE_TYPE,
        value: Vec<u8>,
        sensitive: bool,
    ) -> Result<()> {
        let len = ck_len(value.len())?;
        let ptr = if value.is_empty() {
            std::ptr::null_mut()
        } else {
            void_ptr!(value.as_ptr())
        };
        self.attrs.push(CK_ATTRIBUTE {
            type_: t,
            pValue: ptr,
            ulValueLen: len,
        });
        self.slots.push(Slot::Buffer(self.bufs.len()));
        self.sensitive.push(sensitive);
        self.bufs.push(value);
        Ok(())
    }

    fn push_nested(
        &mut self,
        t: CK_ATTRIBUTE_TYPE,
        nested: WireTemplate,
        sensitive: bool,
    ) -> Result<()> {
        let len = ck_len(nested.attrs.len())? * sizeof!(CK_ATTRIBUTE);
        let ptr = if nested.attrs.is_empty() {
            std::ptr::null_mut()
        } else {
            void_ptr!(nested.attrs.as_ptr())
        };
        self.attrs.push(CK_ATTRIBUTE {
            type_: t,
            pValue: ptr,
            ulValueLen: len,
        });
        self.slots.push(Slot::Nested(self.nested.len()));
        self.sensitive.push(sensitive);
        self.nested.push(nested);
        Ok(())
    }

    /// Allocates buffers for the entries the module reported a length
    /// for; returns true if anything was allocated, in which case the
    /// module must be called again to fill them
    pub fn allocate(&mut self, registry: &AttributeRegistry<'_>) -> Result<bool> {
        let mut changed = false;
        for i in 0..self.attrs.len() {
            match self.slots[i] {
                Slot::Nested(n) => {
                    changed |= self.nested[n].allocate(registry)?;
                }
                Slot::Buffer(_) => (),
                Slot::Empty => {
                    let t = self.attrs[i].type_;
                    let len = self.attrs[i].ulValueLen;
                    if len == 0 || len == CK_UNAVAILABLE_INFORMATION {
                        continue;
                    }
                    if registry.kind(t) == AttrKind::Template {
                        let count = nested_count(registry, t, len)?;
                        let mut nested = WireTemplate::blank(count);
                        self.attrs[i].pValue = void_ptr!(nested.attrs.as_mut_ptr());
                        self.slots[i] = Slot::Nested(self.nested.len());
                        self.nested.push(nested);
                    } else {
                        let buf = vec![0u8; usize::try_from(len)?];
                        self.attrs[i].pValue = void_ptr!(buf.as_ptr());
                        self.slots[i] = Slot::Buffer(self.bufs.len());
                        self.bufs.push(buf);
                    }
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Marks an entry as unavailable, the module does this for sensitive
    /// or unknown attributes
    pub fn mark_unavailable(&mut self, idx: usize) {
        if let Some(a) = self.attrs.get_mut(idx) {
            a.ulValueLen = CK_UNAVAILABLE_INFORMATION;
        }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn ck_len(&self) -> Result<CK_ULONG> {
        ck_len(self.attrs.len())
    }

    pub fn as_slice(&self) -> &[CK_ATTRIBUTE] {
        self.attrs.as_slice()
    }

    /// The array handed to module calls that fill in values
    pub fn as_mut_slice(&mut self) -> &mut [CK_ATTRIBUTE] {
        self.attrs.as_mut_slice()
    }

    /// Iterates over the `(type, length, bytes)` triples of the array
    ///
    /// Unavailable entries report the sentinel length and no bytes,
    /// nested templates report the raw bytes of their attribute array.
    pub fn entries(
        &self,
    ) -> impl Iterator<Item = (CK_ATTRIBUTE_TYPE, CK_ULONG, &[u8])> + '_ {
        self.attrs
            .iter()
            .zip(self.slots.iter())
            .map(move |(a, slot)| (a.type_, a.ulValueLen, self.slot_bytes(a, *slot)))
    }

    fn slot_bytes(&self, a: &CK_ATTRIBUTE, slot: Slot) -> &[u8] {
        let len = match usize::try_from(a.ulValueLen) {
            Ok(l) => l,
            Err(_) => return &[],
        };
        match slot {
            Slot::Empty => &[],
            Slot::Buffer(b) => {
                let buf = &self.bufs[b];
                &buf[..std::cmp::min(len, buf.len())]
            }
            Slot::Nested(n) => {
                let arr = &self.nested[n].attrs;
                let size = std::mem::size_of::<CK_ATTRIBUTE>() * arr.len();
                /* the array is owned by self and outlives the borrow */
                let raw = unsafe {
                    std::slice::from_raw_parts(arr.as_ptr() as *const u8, size)
                };
                &raw[..std::cmp::min(len, size)]
            }
        }
    }

    fn decode(&self, registry: &AttributeRegistry<'_>) -> Result<Template> {
        let mut tmpl = Template::new();
        for (i, a) in self.attrs.iter().enumerate() {
            if a.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                let mut absent = Attribute::absent(a.type_);
                absent.set_sensitive(self.sensitive[i]);
                tmpl.insert(absent);
                continue;
            }
            let mut attr = match self.slots[i] {
                Slot::Nested(n) => {
                    let count = nested_count(registry, a.type_, a.ulValueLen)?;
                    let mut nested = self.nested[n].decode(registry)?;
                    nested.attrs.truncate(count);
                    Attribute::from_template(a.type_, nested)
                }
                Slot::Buffer(_) => {
                    let v = self.slot_bytes(a, self.slots[i]);
                    Attribute::decode(registry, a.type_, v)?
                }
                Slot::Empty => {
                    if a.ulValueLen != 0 {
                        return Err(missing_value(registry, a.type_));
                    }
                    if registry.kind(a.type_) == AttrKind::Template {
                        Attribute::from_template(a.type_, Template::new())
                    } else {
                        Attribute::decode(registry, a.type_, &[])?
                    }
                }
            };
            if self.sensitive[i] {
                attr.set_sensitive(true);
            }
            tmpl.insert(attr);
        }
        Ok(tmpl)
    }
}

impl Default for WireTemplate {
    fn default() -> WireTemplate {
        WireTemplate::new()
    }
}

impl fmt::Debug for WireTemplate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let registry = AttributeRegistry::global();
        let mut list = f.debug_list();
        for (i, a) in self.attrs.iter().enumerate() {
            if self.sensitive[i] {
                list.entry(&format_args!("{} <sensitive>", registry.name(a.type_)));
            } else {
                list.entry(&format_args!(
                    "{} len={}",
                    registry.name(a.type_),
                    a.ulValueLen
                ));
            }
        }
        list.finish()
    }
}

impl Drop for WireTemplate {
    fn drop(&mut self) {
        for b in self.bufs.iter_mut() {
            zeromem(b.as_mut_slice());
        }
    }
}
