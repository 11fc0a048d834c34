//! The wire envelope codec.
//!
//! Every body exchanged with the game API is msgpack encoded, PKCS7 padded
//! and AES-128-CBC encrypted with a fixed per-region key/IV pair. Decoding
//! offers both a typed path and an order-preserving dynamic path; the
//! restoration pipeline depends on map-key order, so the dynamic path goes
//! through `rmpv` instead of blind `serde` deserialization.

use aes::Aes128;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use indexmap::IndexMap;
use sekai_core::{Result, SekaiError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_SIZE: usize = 16;
const MSGPACK_NIL: u8 = 0xc0;

/// Symmetric envelope codec for one region.
///
/// The key/IV pair is fixed for the lifetime of the process; no rotation.
#[derive(Clone)]
pub struct SekaiCryptor {
    key: [u8; BLOCK_SIZE],
    iv: [u8; BLOCK_SIZE],
}

impl SekaiCryptor {
    /// Builds a codec from hex-encoded key and IV (16 bytes each).
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self> {
        let key = decode_block("AES key", key_hex)?;
        let iv = decode_block("AES IV", iv_hex)?;
        Ok(Self { key, iv })
    }

    /// Serializes `data` to msgpack (named fields) and encrypts it.
    pub fn pack<T: Serialize>(&self, data: &T) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec_named(data)
            .map_err(|e| SekaiError::decode(format!("msgpack encode: {}", e)))?;
        // A lone nil marker means the caller passed no payload at all.
        if encoded.is_empty() || encoded == [MSGPACK_NIL] {
            return Err(SekaiError::EmptyPayload);
        }
        Ok(self.encrypt(&encoded))
    }

    /// Encrypts an already msgpack-encoded payload.
    pub fn pack_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(SekaiError::EmptyPayload);
        }
        Ok(self.encrypt(data))
    }

    /// Decrypts and decodes into a typed value.
    pub fn unpack<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let plaintext = self.decrypt(data)?;
        rmp_serde::from_slice(&plaintext).map_err(|e| SekaiError::decode(e.to_string()))
    }

    /// Decrypts and decodes into a dynamic value, preserving map-key order.
    pub fn unpack_value(&self, data: &[u8]) -> Result<JsonValue> {
        let plaintext = self.decrypt(data)?;
        let mut cursor = std::io::Cursor::new(plaintext.as_slice());
        let value = rmpv::decode::read_value(&mut cursor)
            .map_err(|e| SekaiError::decode(e.to_string()))?;
        rmpv_to_json(value)
    }

    /// Decrypts and decodes an object payload into an ordered map.
    ///
    /// Fails when the top-level msgpack value is not a map.
    pub fn unpack_ordered(&self, data: &[u8]) -> Result<IndexMap<String, JsonValue>> {
        match self.unpack_value(data)? {
            JsonValue::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(SekaiError::decode("expected object at top level")),
        }
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let padded = pkcs7_pad(data);
        let encryptor = Aes128CbcEnc::new(&self.key.into(), &self.iv.into());
        encryptor.encrypt_padded_vec_mut::<NoPadding>(&padded)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(SekaiError::EmptyContent);
        }
        if data.len() % BLOCK_SIZE != 0 {
            return Err(SekaiError::InvalidBlockSize);
        }
        let decryptor = Aes128CbcDec::new(&self.key.into(), &self.iv.into());
        let mut buf = data.to_vec();
        let decrypted = decryptor
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| SekaiError::Padding)?;
        let unpadded = pkcs7_unpad(decrypted)?;
        Ok(unpadded.to_vec())
    }
}

fn decode_block(what: &str, value_hex: &str) -> Result<[u8; BLOCK_SIZE]> {
    let bytes = hex::decode(value_hex)
        .map_err(|e| SekaiError::config(format!("invalid {} hex: {}", what, e)))?;
    bytes.as_slice().try_into().map_err(|_| {
        SekaiError::config(format!(
            "invalid {} length: got {}, want {}",
            what,
            bytes.len(),
            BLOCK_SIZE
        ))
    })
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let padding_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(data.len() + padding_len);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat_n(padding_len as u8, padding_len));
    padded
}

fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    let Some(&last) = data.last() else {
        return Err(SekaiError::Padding);
    };
    let padding_len = last as usize;
    if padding_len == 0 || padding_len > BLOCK_SIZE || padding_len > data.len() {
        return Err(SekaiError::Padding);
    }
    if data[data.len() - padding_len..].iter().any(|&b| b != last) {
        return Err(SekaiError::Padding);
    }
    Ok(&data[..data.len() - padding_len])
}

fn rmpv_to_json(value: rmpv::Value) -> Result<JsonValue> {
    use rmpv::Value;
    match value {
        Value::Nil => Ok(JsonValue::Null),
        Value::Boolean(b) => Ok(JsonValue::Bool(b)),
        Value::Integer(i) => {
            if let Some(n) = i.as_i64() {
                Ok(JsonValue::Number(n.into()))
            } else if let Some(n) = i.as_u64() {
                Ok(JsonValue::Number(n.into()))
            } else {
                Ok(JsonValue::Null)
            }
        }
        Value::F32(f) => Ok(serde_json::Number::from_f64(f64::from(f))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)),
        Value::F64(f) => Ok(serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)),
        Value::String(s) => Ok(JsonValue::String(
            s.into_str().unwrap_or_default().to_string(),
        )),
        Value::Binary(b) => Ok(JsonValue::String(BASE64_STANDARD.encode(b))),
        Value::Array(arr) => {
            let converted: Result<Vec<JsonValue>> = arr.into_iter().map(rmpv_to_json).collect();
            Ok(JsonValue::Array(converted?))
        }
        Value::Map(map) => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => s.into_str().unwrap_or_default().to_string(),
                    Value::Integer(i) => i.to_string(),
                    // Other key types have never been observed on the wire.
                    _ => continue,
                };
                object.insert(key, rmpv_to_json(v)?);
            }
            Ok(JsonValue::Object(object))
        }
        Value::Ext(_, data) => Ok(JsonValue::String(BASE64_STANDARD.encode(data))),
    }
}
