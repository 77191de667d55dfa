//! Ask questions about receipt images using a hosted multimodal model.
//!
//! A [`Session`] collects a credential, an image and a question; an explicit trigger hands
//! them to the [`InferenceGateway`], which builds the model handle once, sends the
//! `[system prompt, image, question]` prompt in one blocking call, and returns the answer
//! text verbatim. Every failure is turned into a display message and the session always
//! returns to [`AnalysisState::Idle`].
//!
//! ```no_run
//! use receipt_analyzer::{GeminiFactory, ImageUpload, InferenceGateway, ModelConfig, Session};
//!
//! let gateway = InferenceGateway::new(GeminiFactory::default(), ModelConfig::default());
//! let mut session = Session::new();
//! session.set_credential("my-api-key");
//! session.set_image(ImageUpload::new("receipt.jpg", std::fs::read("receipt.jpg")?));
//! session.set_question("What is the total amount?");
//! println!("{:?}", session.trigger(&gateway)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod model;
pub mod page;
pub mod server;
pub mod session;
pub mod upload;

pub use config::{
    GenerationConfig, HarmBlockThreshold, HarmCategory, ModelConfig, SYSTEM_PROMPT, SafetySetting,
};
pub use error::{AnalyzerError, ErrorKind, MissingInput, RemoteError};
pub use gateway::{AnalysisJob, InferenceGateway, analyze};
pub use gemini::{GeminiFactory, GeminiModel};
pub use model::{Credential, ModelFactory, MultimodalPrompt, PromptPart, ReceiptModel};
pub use server::{AppState, OpenSession, SessionStore, router};
pub use session::{AnalysisResult, AnalysisState, Session, SessionView};
pub use upload::{ImageUpload, ReceiptImage};
