//! PKCS#12 safe contents built bag by bag
//!
//! `PKCS12_create` offers no way to attach bag attributes before OpenSSL
//! 3.2, yet the JDK keystore only lists a certificate bag as a trusted entry
//! when it carries the Oracle trusted-key-usage attribute. The archive is
//! therefore assembled from individual safe bags here, the way `PKCS12_create`
//! does it internally.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int, c_uchar, c_void, CStr, CString};
use std::ptr;

use foreign_types_shared::{ForeignType, ForeignTypeRef};
use openssl::asn1::Asn1Object;
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::X509Ref;
use openssl_sys::{EVP_PKEY, OPENSSL_STACK, PKCS12, X509};

/// Oracle JDK trusted key usage (`2.16.840.1.113894.746875.1.1`)
pub const JDK_TRUSTED_KEY_USAGE: &str = "2.16.840.1.113894.746875.1.1";

/// `anyExtendedKeyUsage`, the usage keytool records for imported trust anchors
const ANY_EXTENDED_KEY_USAGE: &str = "2.5.29.37.0";

/// Key derivation and MAC iterations, the `PKCS12_create` default
const ITERATIONS: c_int = 2048;

pub enum PKCS12_SAFEBAG {}

extern "C" {
    fn X509_alias_set1(x: *mut X509, name: *const c_uchar, len: c_int) -> c_int;

    fn PKCS12_add_cert(pbags: *mut *mut OPENSSL_STACK, cert: *mut X509) -> *mut PKCS12_SAFEBAG;
    fn PKCS12_add_key(
        pbags: *mut *mut OPENSSL_STACK,
        key: *mut EVP_PKEY,
        key_usage: c_int,
        iter: c_int,
        key_nid: c_int,
        pass: *const c_char,
    ) -> *mut PKCS12_SAFEBAG;
    fn PKCS12_add_localkeyid(bag: *mut PKCS12_SAFEBAG, name: *mut c_uchar, namelen: c_int) -> c_int;
    fn PKCS12_add_friendlyname_utf8(bag: *mut PKCS12_SAFEBAG, name: *const c_char, namelen: c_int) -> c_int;
    fn PKCS12_add1_attr_by_txt(
        bag: *mut PKCS12_SAFEBAG,
        attrname: *const c_char,
        attrtype: c_int,
        bytes: *const c_uchar,
        len: c_int,
    ) -> c_int;
    fn PKCS12_add_safe(
        psafes: *mut *mut OPENSSL_STACK,
        bags: *mut OPENSSL_STACK,
        safe_nid: c_int,
        iter: c_int,
        pass: *const c_char,
    ) -> c_int;
    fn PKCS12_add_safes(safes: *mut OPENSSL_STACK, p7_nid: c_int) -> *mut PKCS12;
    fn PKCS12_SAFEBAG_free(bag: *mut PKCS12_SAFEBAG);
}

fn cvt(r: c_int) -> Result<c_int, ErrorStack> {
    if r <= 0 {
        Err(ErrorStack::get())
    } else {
        Ok(r)
    }
}

fn cvt_p<T>(p: *mut T) -> Result<*mut T, ErrorStack> {
    if p.is_null() {
        Err(ErrorStack::get())
    } else {
        Ok(p)
    }
}

fn c_len(bytes: &[u8]) -> Result<c_int, ErrorStack> {
    c_int::try_from(bytes.len()).map_err(|_| ErrorStack::get())
}

/// Set the auxiliary alias that becomes a bag's friendly name
pub fn set_alias(cert: &X509Ref, alias: &str) -> Result<(), ErrorStack> {
    // SAFETY: the certificate is valid and the name is copied by the call.
    cvt(unsafe { X509_alias_set1(cert.as_ptr(), alias.as_ptr(), c_len(alias.as_bytes())?) }).map(|_| ())
}

unsafe extern "C" fn free_bag(bag: *mut c_void) {
    PKCS12_SAFEBAG_free(bag.cast());
}

unsafe extern "C" fn free_safe(safe: *mut c_void) {
    openssl_sys::PKCS7_free(safe.cast());
}

/// Owned `STACK_OF(PKCS12_SAFEBAG)`, created on the first added bag
pub struct SafeBags {
    stack: *mut OPENSSL_STACK,
}

impl SafeBags {
    pub fn new() -> Self {
        Self { stack: ptr::null_mut() }
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_null()
    }

    /// Certificate bag trusted for any purpose
    ///
    /// The friendly name comes from the certificate's alias.
    pub fn add_trusted_cert(&mut self, cert: &X509Ref) -> Result<(), ErrorStack> {
        let usage = Asn1Object::from_str(ANY_EXTENDED_KEY_USAGE)?;
        let attr = CString::new(JDK_TRUSTED_KEY_USAGE).map_err(|_| ErrorStack::get())?;
        // SAFETY: the bag is owned by `self.stack`; the attribute value is
        // an ASN1_OBJECT (len -1), which OpenSSL duplicates.
        unsafe {
            let bag = cvt_p(PKCS12_add_cert(&mut self.stack, cert.as_ptr()))?;
            cvt(PKCS12_add1_attr_by_txt(
                bag,
                attr.as_ptr(),
                openssl_sys::V_ASN1_OBJECT,
                usage.as_ptr() as *const c_uchar,
                -1,
            ))?;
        }
        Ok(())
    }

    /// Certificate bag belonging to the key with `key_id`
    pub fn add_key_cert(&mut self, cert: &X509Ref, key_id: &[u8]) -> Result<(), ErrorStack> {
        let mut key_id = key_id.to_vec();
        // SAFETY: as above; the key id is copied into the bag.
        unsafe {
            let bag = cvt_p(PKCS12_add_cert(&mut self.stack, cert.as_ptr()))?;
            cvt(PKCS12_add_localkeyid(bag, key_id.as_mut_ptr(), c_len(&key_id)?))?;
        }
        Ok(())
    }

    /// Shrouded key bag, encrypted with AES-256-CBC under `password`
    pub fn add_key(
        &mut self,
        key: &PKeyRef<Private>,
        alias: &str,
        key_id: &[u8],
        password: &CStr,
    ) -> Result<(), ErrorStack> {
        let mut key_id = key_id.to_vec();
        // SAFETY: the key is copied into a new bag owned by `self.stack`.
        unsafe {
            let bag = cvt_p(PKCS12_add_key(
                &mut self.stack,
                key.as_ptr(),
                0,
                ITERATIONS,
                openssl_sys::NID_aes_256_cbc,
                password.as_ptr(),
            ))?;
            cvt(PKCS12_add_friendlyname_utf8(
                bag,
                alias.as_ptr() as *const c_char,
                c_len(alias.as_bytes())?,
            ))?;
            cvt(PKCS12_add_localkeyid(bag, key_id.as_mut_ptr(), c_len(&key_id)?))?;
        }
        Ok(())
    }
}

impl Default for SafeBags {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SafeBags {
    fn drop(&mut self) {
        if !self.stack.is_null() {
            // SAFETY: every element is a bag owned by this stack.
            unsafe { openssl_sys::OPENSSL_sk_pop_free(self.stack, Some(free_bag)) }
        }
    }
}

/// Owned `STACK_OF(PKCS7)` of the archive's safes
pub struct AuthSafes {
    stack: *mut OPENSSL_STACK,
}

impl AuthSafes {
    pub fn new() -> Self {
        Self { stack: ptr::null_mut() }
    }

    /// Add `bags` as a password-encrypted safe (PBES2, AES-256-CBC)
    pub fn add_encrypted(&mut self, bags: &SafeBags, password: &CStr) -> Result<(), ErrorStack> {
        // SAFETY: `bags` is only read; the safe holds an encoded copy.
        cvt(unsafe {
            PKCS12_add_safe(
                &mut self.stack,
                bags.stack,
                openssl_sys::NID_aes_256_cbc,
                ITERATIONS,
                password.as_ptr(),
            )
        })
        .map(|_| ())
    }

    /// Add `bags` as a plain data safe, for bags that are shrouded already
    pub fn add_plain(&mut self, bags: &SafeBags) -> Result<(), ErrorStack> {
        // SAFETY: as above; no password is used for a data safe.
        cvt(unsafe { PKCS12_add_safe(&mut self.stack, bags.stack, -1, 0, ptr::null()) }).map(|_| ())
    }

    /// Pack the safes and protect the archive with a SHA-256 MAC
    pub fn into_pkcs12(mut self, password: &CStr) -> Result<Pkcs12, ErrorStack> {
        // SAFETY: the stack outlives packing, which encodes it; the returned
        // PKCS12 is owned by the wrapper.
        unsafe {
            if self.stack.is_null() {
                self.stack = cvt_p(openssl_sys::OPENSSL_sk_new_null())?;
            }
            let p12 = Pkcs12::from_ptr(cvt_p(PKCS12_add_safes(self.stack, 0))?);
            cvt(openssl_sys::PKCS12_set_mac(
                p12.as_ptr(),
                password.as_ptr(),
                -1,
                ptr::null_mut(),
                0,
                ITERATIONS,
                openssl_sys::EVP_sha256(),
            ))?;
            Ok(p12)
        }
    }
}

impl Default for AuthSafes {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AuthSafes {
    fn drop(&mut self) {
        if !self.stack.is_null() {
            // SAFETY: every element is a PKCS7 safe owned by this stack.
            unsafe { openssl_sys::OPENSSL_sk_pop_free(self.stack, Some(free_safe)) }
        }
    }
}

/// Count certificate bags, and those marked as JDK trusted, in `der`
#[cfg(test)]
pub(crate) fn certificate_bags(der: &[u8], password: &CStr) -> Result<(usize, usize), ErrorStack> {
    extern "C" {
        fn PKCS12_unpack_authsafes(p12: *const PKCS12) -> *mut OPENSSL_STACK;
        fn PKCS12_unpack_p7data(p7: *mut openssl_sys::PKCS7) -> *mut OPENSSL_STACK;
        fn PKCS12_unpack_p7encdata(
            p7: *mut openssl_sys::PKCS7,
            pass: *const c_char,
            passlen: c_int,
        ) -> *mut OPENSSL_STACK;
        fn PKCS12_SAFEBAG_get_nid(bag: *const PKCS12_SAFEBAG) -> c_int;
        fn PKCS12_SAFEBAG_get0_attrs(bag: *const PKCS12_SAFEBAG) -> *const OPENSSL_STACK;
    }

    let p12 = Pkcs12::from_der(der)?;
    let trust = Asn1Object::from_str(JDK_TRUSTED_KEY_USAGE)?;
    let mut total = 0;
    let mut trusted = 0;

    // SAFETY: test-only walk over stacks owned by this function.
    unsafe {
        let safes = cvt_p(PKCS12_unpack_authsafes(p12.as_ptr()))?;
        for i in 0..openssl_sys::OPENSSL_sk_num(safes) {
            let p7 = openssl_sys::OPENSSL_sk_value(safes, i) as *mut openssl_sys::PKCS7;
            let bags = match openssl_sys::OBJ_obj2nid((*p7).type_) {
                openssl_sys::NID_pkcs7_data => PKCS12_unpack_p7data(p7),
                openssl_sys::NID_pkcs7_encrypted => PKCS12_unpack_p7encdata(p7, password.as_ptr(), -1),
                _ => ptr::null_mut(),
            };
            let bags = cvt_p(bags)?;
            for j in 0..openssl_sys::OPENSSL_sk_num(bags) {
                let bag = openssl_sys::OPENSSL_sk_value(bags, j) as *const PKCS12_SAFEBAG;
                if PKCS12_SAFEBAG_get_nid(bag) != openssl_sys::NID_certBag {
                    continue;
                }
                total += 1;
                let attrs = PKCS12_SAFEBAG_get0_attrs(bag);
                let marked = !attrs.is_null()
                    && (0..openssl_sys::OPENSSL_sk_num(attrs)).any(|k| {
                        let attr = openssl_sys::OPENSSL_sk_value(attrs, k) as *mut openssl_sys::X509_ATTRIBUTE;
                        openssl_sys::OBJ_cmp(openssl_sys::X509_ATTRIBUTE_get0_object(attr), trust.as_ptr()) == 0
                    });
                if marked {
                    trusted += 1;
                }
            }
            openssl_sys::OPENSSL_sk_pop_free(bags, Some(free_bag));
        }
        openssl_sys::OPENSSL_sk_pop_free(safes, Some(free_safe));
    }

    Ok((total, trusted))
}
