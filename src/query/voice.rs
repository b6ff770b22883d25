use serde::{Deserialize, Serialize};

/// Intermediate states of a recognition run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceProgress {
    Listening,
    HeardSomething,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("voice recognition is not available")]
    Unavailable,
    #[error("no audio was captured")]
    NoAudio,
    #[error("{0}")]
    Failed(String),
}

/// A speech recognizer constrained to a vocabulary of command labels.
pub trait VoiceEngine {
    /// Blocks until a phrase is recognized. `vocabulary` holds the label
    /// paths of every command that may be spoken.
    fn listen(
        &self,
        vocabulary: &[Vec<String>],
        progress: &mut dyn FnMut(VoiceProgress),
    ) -> Result<String, VoiceError>;
}

pub struct NoVoice;

impl VoiceEngine for NoVoice {
    fn listen(
        &self,
        _vocabulary: &[Vec<String>],
        _progress: &mut dyn FnMut(VoiceProgress),
    ) -> Result<String, VoiceError> {
        Err(VoiceError::Unavailable)
    }
}
