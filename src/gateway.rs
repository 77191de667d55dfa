use crate::{
    config::{ModelConfig, SYSTEM_PROMPT},
    error::{AnalyzerError, MissingInput},
    model::{Credential, ModelFactory, MultimodalPrompt, ReceiptModel},
    upload::{ImageUpload, ReceiptImage},
};
use std::sync::{Arc, Mutex, PoisonError};

/// Inputs captured from a session when an analysis is triggered.
#[derive(Clone, Debug)]
pub struct AnalysisJob {
    pub credential: Credential,
    pub image: ImageUpload,
    pub question: String,
}

/// Thin wrapper around the remote model: memoizes the model handle and turns a
/// `(system prompt, image, question)` triple into one blocking call.
///
/// The handle slot is filled by the first successful construction and never replaced, so a
/// different credential supplied later is ignored for the lifetime of the gateway. Use
/// [`InferenceGateway::fork`] to give each user scope its own slot.
pub struct InferenceGateway<F: ModelFactory> {
    factory: Arc<F>,
    config: ModelConfig,
    system_prompt: String,
    slot: Mutex<Option<Arc<F::Model>>>,
}

impl<F: ModelFactory> InferenceGateway<F> {
    pub fn new(factory: F, config: ModelConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            config,
            system_prompt: SYSTEM_PROMPT.to_string(),
            slot: Mutex::new(None),
        }
    }

    /// Returns a gateway sharing this one's factory, config and system prompt, with an empty
    /// handle slot.
    pub fn fork(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            config: self.config.clone(),
            system_prompt: self.system_prompt.clone(),
            slot: Mutex::new(None),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Returns true once a model handle has been built.
    pub fn is_model_ready(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns the cached model handle, building it on first use.
    ///
    /// The slot lock is held while building so concurrent callers never construct twice.
    /// A failed construction leaves the slot empty.
    pub fn get_or_create_model(
        &self,
        credential: &Credential,
    ) -> Result<Arc<F::Model>, AnalyzerError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        log::debug!("Building model handle for {}", self.config.model);
        let model = Arc::new(self.factory.create(credential, &self.config)?);
        *slot = Some(model.clone());
        log::info!("Model handle for {} is ready", self.config.model);

        Ok(model)
    }

    /// Decodes the uploaded image and runs one analysis with the cached model handle.
    pub fn run(&self, job: &AnalysisJob) -> Result<String, AnalyzerError> {
        if job.question.trim().is_empty() {
            return Err(AnalyzerError::MissingInput(MissingInput::Question));
        }

        let image = job.image.decode()?;
        let model = self.get_or_create_model(&job.credential)?;
        analyze(model.as_ref(), &self.system_prompt, &image, &job.question)
    }
}

/// Sends `[system_prompt, image, question]` to the model as one prompt and returns the
/// response text verbatim.
pub fn analyze<M: ReceiptModel + ?Sized>(
    handle: &M,
    system_prompt: &str,
    image: &ReceiptImage,
    question: &str,
) -> Result<String, AnalyzerError> {
    let prompt = MultimodalPrompt::receipt_question(system_prompt, image, question);
    Ok(handle.generate(&prompt)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{error::RemoteError, model::PromptPart};
    use image::ImageFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every prompt with a fixed outcome and records what it saw.
    pub(crate) struct ScriptedModel {
        pub(crate) reply: Result<String, String>,
        pub(crate) prompts: Mutex<Vec<MultimodalPrompt>>,
    }

    impl ReceiptModel for ScriptedModel {
        fn generate(&self, prompt: &MultimodalPrompt) -> Result<String, RemoteError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.reply.clone().map_err(RemoteError::InvalidResponse)
        }
    }

    #[derive(Clone)]
    pub(crate) struct CountingFactory {
        pub(crate) reply: Result<String, String>,
        pub(crate) reject_credential: Option<String>,
        pub(crate) builds: Arc<AtomicUsize>,
        pub(crate) keys: Arc<Mutex<Vec<String>>>,
    }

    impl CountingFactory {
        pub(crate) fn replying(reply: Result<&str, &str>) -> Self {
            Self {
                reply: reply.map(str::to_string).map_err(str::to_string),
                reject_credential: None,
                builds: Arc::new(AtomicUsize::new(0)),
                keys: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    impl ModelFactory for CountingFactory {
        type Model = ScriptedModel;

        fn create(
            &self,
            credential: &Credential,
            _config: &ModelConfig,
        ) -> Result<Self::Model, RemoteError> {
            if self.reject_credential.as_deref() == Some(credential.expose()) {
                return Err(RemoteError::Api {
                    status: reqwest::StatusCode::BAD_REQUEST,
                    message: "API key not valid".to_string(),
                });
            }
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.keys.lock().unwrap().push(credential.expose().to_string());
            Ok(ScriptedModel {
                reply: self.reply.clone(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    fn job(key: &str, question: &str) -> AnalysisJob {
        AnalysisJob {
            credential: Credential::new(key).unwrap(),
            image: ImageUpload::new(
                "receipt.png",
                crate::upload::tests::encoded(ImageFormat::Png),
            ),
            question: question.to_string(),
        }
    }

    #[test]
    fn model_is_built_once_for_many_analyses() {
        let factory = CountingFactory::replying(Ok("$42.17"));
        let gateway = InferenceGateway::new(factory.clone(), ModelConfig::default());

        for _ in 0..5 {
            assert_eq!(gateway.run(&job("VALID", "Total?")).unwrap(), "$42.17");
        }

        assert_eq!(factory.builds(), 1);
        assert!(gateway.is_model_ready());
    }

    #[test]
    fn later_credentials_are_ignored_once_built() {
        let factory = CountingFactory::replying(Ok("ok"));
        let gateway = InferenceGateway::new(factory.clone(), ModelConfig::default());

        gateway.run(&job("FIRST", "Total?")).unwrap();
        gateway.run(&job("SECOND", "Total?")).unwrap();

        assert_eq!(factory.builds(), 1);
        assert_eq!(*factory.keys.lock().unwrap(), vec!["FIRST".to_string()]);
    }

    #[test]
    fn failed_construction_leaves_slot_empty() {
        let mut factory = CountingFactory::replying(Ok("ok"));
        factory.reject_credential = Some("BAD".to_string());
        let gateway = InferenceGateway::new(factory.clone(), ModelConfig::default());

        let err = gateway.run(&job("BAD", "Total?")).unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
        assert!(!gateway.is_model_ready());

        gateway.run(&job("GOOD", "Total?")).unwrap();
        assert_eq!(factory.builds(), 1);
    }

    #[test]
    fn forked_gateways_build_their_own_handles() {
        let factory = CountingFactory::replying(Ok("ok"));
        let gateway = InferenceGateway::new(factory.clone(), ModelConfig::default())
            .with_system_prompt("You read receipts.");
        gateway.run(&job("ALICE", "Total?")).unwrap();

        let forked = gateway.fork();
        assert!(!forked.is_model_ready());
        assert_eq!(forked.system_prompt(), "You read receipts.");
        forked.run(&job("BOB", "Total?")).unwrap();

        assert_eq!(factory.builds(), 2);
        assert_eq!(
            *factory.keys.lock().unwrap(),
            vec!["ALICE".to_string(), "BOB".to_string()]
        );
    }

    #[test]
    fn corrupt_image_fails_before_any_remote_work() {
        let factory = CountingFactory::replying(Ok("ok"));
        let gateway = InferenceGateway::new(factory.clone(), ModelConfig::default());
        let mut job = job("VALID", "Total?");
        job.image = ImageUpload::new("receipt.jpg", b"garbage".to_vec());

        let err = gateway.run(&job).unwrap_err();
        assert!(matches!(err, AnalyzerError::InvalidImage(_)));
        assert_eq!(factory.builds(), 0);
    }

    #[test]
    fn sends_system_prompt_image_and_question_in_order() {
        let gateway = InferenceGateway::new(
            CountingFactory::replying(Ok("ok")),
            ModelConfig::default(),
        )
        .with_system_prompt("You read receipts.");

        gateway.run(&job("VALID", "What is the total amount?")).unwrap();

        let model = gateway
            .get_or_create_model(&Credential::new("VALID").unwrap())
            .unwrap();
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        let parts = &prompts[0].parts;
        assert!(matches!(&parts[0], PromptPart::Text(t) if t == "You read receipts."));
        assert!(matches!(&parts[1], PromptPart::Image(i) if i.mime_type == "image/png"));
        assert!(matches!(&parts[2], PromptPart::Text(t) if t == "What is the total amount?"));
    }

    #[test]
    fn remote_failure_is_propagated() {
        let gateway = InferenceGateway::new(
            CountingFactory::replying(Err("quota exceeded")),
            ModelConfig::default(),
        );
        let err = gateway.run(&job("VALID", "Total?")).unwrap_err();
        assert!(matches!(err, AnalyzerError::Remote(_)));
        assert!(err.display_message().contains("quota exceeded"));
    }
}
