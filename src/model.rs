use crate::{config::ModelConfig, error::RemoteError, upload::ReceiptImage};
use std::fmt;

/// Secret used to authenticate calls to the model service.
///
/// Blank input never produces a credential, and the secret is redacted from `Debug` output
/// so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// One segment of a multimodal prompt.
#[derive(Clone, Debug)]
pub enum PromptPart {
    Text(String),
    Image(ReceiptImage),
}

/// An ordered sequence of text and image segments sent as a single request.
#[derive(Clone, Debug, Default)]
pub struct MultimodalPrompt {
    pub parts: Vec<PromptPart>,
}

impl MultimodalPrompt {
    /// Builds the `[system_prompt, image, question]` triple.
    pub fn receipt_question(system_prompt: &str, image: &ReceiptImage, question: &str) -> Self {
        Self {
            parts: vec![
                PromptPart::Text(system_prompt.to_string()),
                PromptPart::Image(image.clone()),
                PromptPart::Text(question.to_string()),
            ],
        }
    }
}

/// A bound model handle able to answer multimodal prompts.
///
/// Implementations perform one blocking call per [`ReceiptModel::generate`] and return the
/// plain response text untouched.
pub trait ReceiptModel {
    fn generate(&self, prompt: &MultimodalPrompt) -> Result<String, RemoteError>;
}

/// Builds model handles from a credential and the immutable model configuration.
pub trait ModelFactory: Send + Sync + 'static {
    type Model: ReceiptModel + Send + Sync + 'static;

    fn create(
        &self,
        credential: &Credential,
        config: &ModelConfig,
    ) -> Result<Self::Model, RemoteError>;
}
