use encoding_rs::SHIFT_JIS;
use thiserror::Error;

// the Gamecube edition stores all of its quest header text as Shift-JIS, regardless of what
// language the quest itself is written in

#[derive(Error, Debug)]
pub enum TextError {
    #[error("Error decoding bytes as {0}")]
    DecodeError(String),

    #[error("Error encoding string to {0}")]
    EncodeError(String),
}

pub fn decode_text(bytes: &[u8]) -> Result<String, TextError> {
    let (cow, encoding_used, had_errors) = SHIFT_JIS.decode(bytes);
    if had_errors {
        Err(TextError::DecodeError(encoding_used.name().to_string()))
    } else {
        Ok(cow.to_string())
    }
}

pub fn encode_text(s: &str) -> Result<Vec<u8>, TextError> {
    let (cow, encoding_used, had_errors) = SHIFT_JIS.encode(s);
    if had_errors {
        Err(TextError::EncodeError(encoding_used.name().to_string()))
    } else {
        Ok(cow.to_vec())
    }
}
