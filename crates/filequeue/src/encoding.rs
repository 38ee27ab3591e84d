//! Text encodings for file contents.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FsError, Result};

/// How file bytes map to text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8
    #[default]
    Utf8,
    /// One byte per char, U+0000..=U+00FF.
    Latin1,
    /// Lowercase hex digits
    Hex,
    /// Standard padded base64
    Base64,
}

impl Encoding {
    /// Turns file bytes into text.
    pub fn decode(self, data: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(data.to_vec()).map_err(|e| FsError::InvalidData {
                reason: format!("invalid utf-8: {}", e),
            }),
            Encoding::Latin1 => Ok(data.iter().map(|&b| b as char).collect()),
            Encoding::Hex => Ok(hex::encode(data)),
            Encoding::Base64 => Ok(STANDARD.encode(data)),
        }
    }

    /// Turns text back into file bytes.
    pub fn encode(self, text: &str) -> Result<Bytes> {
        match self {
            Encoding::Utf8 => Ok(Bytes::copy_from_slice(text.as_bytes())),
            Encoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| FsError::InvalidData {
                        reason: format!("character {:?} is outside latin1", c),
                    })
                })
                .collect::<Result<Vec<u8>>>()
                .map(Bytes::from),
            Encoding::Hex => hex::decode(text)
                .map(Bytes::from)
                .map_err(|e| FsError::InvalidData {
                    reason: format!("invalid hex: {}", e),
                }),
            Encoding::Base64 => STANDARD
                .decode(text)
                .map(Bytes::from)
                .map_err(|e| FsError::InvalidData {
                    reason: format!("invalid base64: {}", e),
                }),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "latin1" | "binary" => Ok(Encoding::Latin1),
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            other => Err(FsError::InvalidData {
                reason: format!("unknown encoding: {}", other),
            }),
        }
    }
}

/// File contents: raw bytes, or text produced with an [`Encoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    /// Raw bytes
    Bytes(Bytes),
    /// Decoded text
    Text(String),
}

impl FileData {
    /// Raw bytes; text is encoded with `encoding`.
    pub fn into_bytes(self, encoding: Encoding) -> Result<Bytes> {
        match self {
            FileData::Bytes(bytes) => Ok(bytes),
            FileData::Text(text) => encoding.encode(&text),
        }
    }

    /// The text, if this is [`FileData::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileData::Text(text) => Some(text),
            FileData::Bytes(_) => None,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        match self {
            FileData::Bytes(bytes) => bytes.len(),
            FileData::Text(text) => text.len(),
        }
    }

    /// True when there is no content.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for FileData {
    fn from(bytes: Bytes) -> Self {
        FileData::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FileData {
    fn from(bytes: Vec<u8>) -> Self {
        FileData::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for FileData {
    fn from(bytes: &[u8]) -> Self {
        FileData::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for FileData {
    fn from(text: String) -> Self {
        FileData::Text(text)
    }
}

impl From<&str> for FileData {
    fn from(text: &str) -> Self {
        FileData::Text(text.to_string())
    }
}

impl PartialEq<&str> for FileData {
    fn eq(&self, other: &&str) -> bool {
        match self {
            FileData::Text(text) => text == other,
            FileData::Bytes(bytes) => bytes.as_ref() == other.as_bytes(),
        }
    }
}
