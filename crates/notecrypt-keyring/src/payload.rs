//! Wire/storage shapes for note payloads.
//!
//! [`NotePayload`] is resolved once, where a note record enters the client,
//! so call sites never re-inspect optional fields to guess whether a note is
//! legacy plaintext.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// One note's sensitive fields after encryption. All four fields are padded
/// standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedNotePayload {
    /// `ciphertext ∥ tag` of the UTF-8 title.
    pub encrypted_title: String,
    /// `ciphertext ∥ tag` of the UTF-8 content.
    pub encrypted_content: String,
    /// 16-byte random IV, fresh per encryption.
    pub iv: String,
    /// 32-byte random salt, fresh per encryption.
    pub salt: String,
}

/// Decrypted title and content. Zeroized on drop; `Debug` is masked.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DecryptedNote {
    /// Note title.
    pub title: String,
    /// Note body.
    pub content: String,
}

impl DecryptedNote {
    /// Build from owned strings.
    #[must_use]
    pub const fn new(title: String, content: String) -> Self {
        Self { title, content }
    }
}

impl fmt::Debug for DecryptedNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptedNote(***)")
    }
}

/// A note stored before encryption was introduced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaintextNote {
    /// Note title.
    #[serde(default)]
    pub title: String,
    /// Note body.
    #[serde(default)]
    pub content: String,
}

/// A note record classified at the data-access boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotePayload {
    /// All four encrypted fields are present as strings.
    Encrypted(EncryptedNotePayload),
    /// Anything else: read `title`/`content` as legacy plaintext.
    Plaintext(PlaintextNote),
}

impl NotePayload {
    /// Classify a raw note record (e.g. a JSON body from the server).
    ///
    /// The record is `Encrypted` only when `encryptedTitle`,
    /// `encryptedContent`, `iv` and `salt` are all present and string-typed.
    #[must_use]
    pub fn classify(record: &Value) -> Self {
        let field = |name: &str| record.get(name).and_then(Value::as_str);
        if let (Some(title), Some(content), Some(iv), Some(salt)) = (
            field("encryptedTitle"),
            field("encryptedContent"),
            field("iv"),
            field("salt"),
        ) {
            return Self::Encrypted(EncryptedNotePayload {
                encrypted_title: title.to_owned(),
                encrypted_content: content.to_owned(),
                iv: iv.to_owned(),
                salt: salt.to_owned(),
            });
        }
        Self::Plaintext(PlaintextNote {
            title: field("title").unwrap_or_default().to_owned(),
            content: field("content").unwrap_or_default().to_owned(),
        })
    }

    /// `true` for [`NotePayload::Encrypted`].
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// Structural check used to tell encrypted notes from legacy plaintext ones.
#[must_use]
pub fn is_note_encrypted(record: &Value) -> bool {
    NotePayload::classify(record).is_encrypted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_serializes_camel_case() {
        let payload = EncryptedNotePayload {
            encrypted_title: "dA==".into(),
            encrypted_content: "Yw==".into(),
            iv: "aQ==".into(),
            salt: "cw==".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["encryptedTitle"], "dA==");
        assert_eq!(value["encryptedContent"], "Yw==");
        assert!(value.get("encrypted_title").is_none());
    }

    #[test]
    fn classify_requires_all_four_string_fields() {
        let full = json!({
            "id": 7,
            "encryptedTitle": "a",
            "encryptedContent": "b",
            "iv": "c",
            "salt": "d"
        });
        assert!(is_note_encrypted(&full));

        let missing_salt = json!({"encryptedTitle": "a", "encryptedContent": "b", "iv": "c"});
        assert!(!is_note_encrypted(&missing_salt));

        let wrong_type = json!({
            "encryptedTitle": "a",
            "encryptedContent": "b",
            "iv": 3,
            "salt": "d"
        });
        assert!(!is_note_encrypted(&wrong_type));
    }

    #[test]
    fn classify_reads_legacy_plaintext() {
        let legacy = json!({"title": "Groceries", "content": "milk"});
        assert_eq!(
            NotePayload::classify(&legacy),
            NotePayload::Plaintext(PlaintextNote {
                title: "Groceries".into(),
                content: "milk".into(),
            })
        );

        let empty = NotePayload::classify(&json!(null));
        assert_eq!(empty, NotePayload::Plaintext(PlaintextNote::default()));
    }

    #[test]
    fn decrypted_note_debug_is_masked() {
        let note = DecryptedNote::new("Hello".into(), "World".into());
        let debug = format!("{note:?}");
        assert_eq!(debug, "DecryptedNote(***)");
    }
}
