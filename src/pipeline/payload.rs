//! Extraction of the classification input from a message body.

use std::borrow::Cow;

use crate::error::ClassifyError;

/// Where the classification input lives in a message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PayloadSource {
    /// The whole body is the input.
    #[default]
    Raw,
    /// The body is a JSON object; the named string field is the input.
    JsonField(String),
}

impl PayloadSource {
    /// Returns the classification input for `body`.
    ///
    /// # Errors
    ///
    /// `ClassifyError::InvalidPayload` when the body is not a JSON object
    /// carrying the configured field as a string.
    pub fn extract<'a>(&self, body: &'a [u8]) -> Result<Cow<'a, [u8]>, ClassifyError> {
        match self {
            Self::Raw => Ok(Cow::Borrowed(body)),
            Self::JsonField(field) => {
                let value: serde_json::Value = serde_json::from_slice(body)
                    .map_err(|e| ClassifyError::InvalidPayload(e.to_string()))?;

                match value.get(field) {
                    Some(serde_json::Value::String(s)) => Ok(Cow::Owned(s.clone().into_bytes())),
                    Some(other) => Err(ClassifyError::InvalidPayload(format!(
                        "field '{}' is not a string: {}",
                        field, other
                    ))),
                    None => Err(ClassifyError::InvalidPayload(format!(
                        "field '{}' missing",
                        field
                    ))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_borrows_body() {
        let body = b"https://img.example/1.jpg";
        let extracted = PayloadSource::Raw.extract(body).unwrap();
        assert!(matches!(extracted, Cow::Borrowed(_)));
        assert_eq!(extracted.as_ref(), body);
    }

    #[test]
    fn test_json_field() {
        let source = PayloadSource::JsonField("image_url".to_string());
        let body = br#"{"image_url": "https://img.example/1.jpg", "offer_title": "Red shoes"}"#;
        let extracted = source.extract(body).unwrap();
        assert_eq!(extracted.as_ref(), b"https://img.example/1.jpg");
    }

    #[test]
    fn test_json_field_missing() {
        let source = PayloadSource::JsonField("image_url".to_string());
        let err = source.extract(br#"{"title": "x"}"#).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_json_field_wrong_type() {
        let source = PayloadSource::JsonField("image_url".to_string());
        let err = source.extract(br#"{"image_url": 42}"#).unwrap_err();
        assert!(err.to_string().contains("not a string"));
    }

    #[test]
    fn test_json_field_not_json() {
        let source = PayloadSource::JsonField("image_url".to_string());
        assert!(matches!(
            source.extract(b"plain text"),
            Err(ClassifyError::InvalidPayload(_))
        ));
    }
}
