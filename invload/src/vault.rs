//! Ansible Vault `1.1`/`1.2` AES256 payloads, as whole files or as `!vault`
//! tagged values.
//!
//! The envelope is a `$ANSIBLE_VAULT;<version>;AES256` header followed by
//! hex lines. Those decode to three more hex fields: salt, HMAC and
//! ciphertext. PBKDF2-SHA256 over the password and salt gives the AES-CTR
//! key, the HMAC key and the counter block.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use invload_common::{
    error::Error,
    value::{VarMap, VarValue},
};
use sha2::Sha256;

pub const HEADER: &str = "$ANSIBLE_VAULT";

const CIPHER: &str = "AES256";
const ITERATIONS: u32 = 10_000;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub fn is_encrypted(data: &str) -> bool {
    data.trim_start().starts_with(HEADER)
}

/// Decrypts a vault envelope. A wrong password (or a modified payload) is a
/// `Config` error, anything that isn't a well formed envelope is `Parse`.
pub fn decrypt(data: &str, password: &str) -> Result<String, Error> {
    let mut lines = data.trim().lines();
    let header = lines.next().unwrap_or_default().trim();
    let mut fields = header.split(';');
    if fields.next() != Some(HEADER) {
        return Error::parse(format!("vault should start with {HEADER}")).err();
    }
    match fields.next() {
        Some("1.1" | "1.2") => {}
        Some(version) => return Error::parse(format!("unsupported vault version {version}")).err(),
        None => return Error::parse("vault header has no version").err(),
    }
    if fields.next() != Some(CIPHER) {
        return Error::parse(format!("vault cipher should be {CIPHER}")).err();
    }

    let envelope: String = lines.flat_map(str::split_whitespace).collect();
    let payload = String::from_utf8(unhex(&envelope)?)
        .map_err(|_| Error::parse("vault payload isn't text"))?;
    let mut parts = payload.split('\n').map(str::trim);
    let (Some(salt), Some(mac), Some(ciphertext), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Error::parse("vault payload should hold salt, hmac and ciphertext").err();
    };
    let salt = unhex(salt)?;
    let mac = unhex(mac)?;
    let mut buf = unhex(ciphertext)?;

    let mut derived = [0u8; 2 * KEY_LEN + IV_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, ITERATIONS, &mut derived);
    let (key, rest) = derived.split_at(KEY_LEN);
    let (mac_key, iv) = rest.split_at(KEY_LEN);

    let mut hmac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key)
        .map_err(|e| Error::parse(format!("vault hmac key: {e}")))?;
    hmac.update(&buf);
    hmac.verify_slice(&mac)
        .map_err(|_| Error::config("vault password is wrong or the vault was modified"))?;

    let mut cipher = Aes256Ctr::new_from_slices(key, iv)
        .map_err(|e| Error::parse(format!("vault cipher key: {e}")))?;
    cipher.apply_keystream(&mut buf);
    unpad(&mut buf)?;
    String::from_utf8(buf).map_err(|_| Error::parse("decrypted vault isn't UTF-8 text"))
}

/// Replaces every vault string in `vars`, nested ones included, with its
/// plaintext.
pub fn decrypt_vars(vars: &mut VarMap, password: &str) -> Result<(), Error> {
    for (key, value) in vars.iter_mut() {
        decrypt_value(value, password)
            .map_err(|e| Error::new(e.kind, format!("variable {key}: {}", e.message)))?;
    }
    Ok(())
}

fn decrypt_value(value: &mut VarValue, password: &str) -> Result<(), Error> {
    match value {
        VarValue::String(text) if is_encrypted(text) => *text = decrypt(text, password)?,
        VarValue::List(items) => {
            for item in items {
                decrypt_value(item, password)?;
            }
        }
        VarValue::Map(map) => {
            for item in map.values_mut() {
                decrypt_value(item, password)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn unhex(s: &str) -> Result<Vec<u8>, Error> {
    hex::decode(s).map_err(|e| Error::parse(format!("vault payload isn't hex: {e}")))
}

// PKCS#7 over 16 byte blocks
fn unpad(buf: &mut Vec<u8>) -> Result<(), Error> {
    let n = buf.last().copied().unwrap_or(0) as usize;
    let valid = (1..=IV_LEN).contains(&n)
        && n <= buf.len()
        && buf[buf.len() - n..].iter().all(|b| *b as usize == n);
    if !valid {
        return Error::parse("vault plaintext has bad padding").err();
    }
    buf.truncate(buf.len() - n);
    Ok(())
}
