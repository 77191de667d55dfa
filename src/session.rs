use crate::{
    error::{AnalyzerError, MissingInput},
    gateway::{AnalysisJob, InferenceGateway},
    model::{Credential, ModelFactory},
    upload::ImageUpload,
};
use serde::Serialize;

/// Shown whenever no API key has been entered.
pub const CREDENTIAL_PROMPT: &str = "Please enter your Google API key to proceed!";

/// Shown when a receipt and a question are ready but the API key is missing.
pub const CREDENTIAL_REQUIRED: &str = "Please enter your Google API key above to continue!";

/// Represents where a session is in its analysis cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisState {
    /// Waiting for inputs and an explicit trigger.
    Idle,
    /// A blocking call to the model is in flight.
    Requesting,
}

impl AnalysisState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Idle => "idle",
            AnalysisState::Requesting => "requesting",
        }
    }
}

/// Outcome of the last analysis, rendered in the result region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum AnalysisResult {
    Success(String),
    Failure(String),
}

/// Ephemeral per-user state: inputs, last result, and the analysis state machine.
#[derive(Debug)]
pub struct Session {
    credential: Option<Credential>,
    image: Option<ImageUpload>,
    question: String,
    result: Option<AnalysisResult>,
    notice: Option<String>,
    state: AnalysisState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            credential: None,
            image: None,
            question: String::new(),
            result: None,
            notice: None,
            state: AnalysisState::Idle,
        }
    }

    /// Replaces the credential; blank input clears it.
    pub fn set_credential(&mut self, secret: &str) {
        self.credential = Credential::new(secret);
    }

    /// Replaces the current image, discarding the previous one.
    pub fn set_image(&mut self, upload: ImageUpload) {
        self.image = Some(upload);
    }

    pub fn set_question(&mut self, question: &str) {
        self.question = question.to_string();
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn image(&self) -> Option<&ImageUpload> {
        self.image.as_ref()
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    /// Warning raised by the last rejected trigger, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Checks that every input is present and moves to [`AnalysisState::Requesting`].
    ///
    /// A rejected trigger only records a notice: no job is produced and the previous result
    /// is left untouched.
    pub fn begin_analysis(&mut self) -> Result<AnalysisJob, AnalyzerError> {
        if self.state == AnalysisState::Requesting {
            return Err(AnalyzerError::AnalysisInProgress);
        }

        let guard = match (&self.credential, &self.image) {
            (None, _) => Err(AnalyzerError::MissingCredential),
            (Some(_), None) => Err(AnalyzerError::MissingInput(MissingInput::Image)),
            (Some(_), Some(_)) if self.question.trim().is_empty() => {
                Err(AnalyzerError::MissingInput(MissingInput::Question))
            }
            (Some(credential), Some(image)) => Ok(AnalysisJob {
                credential: credential.clone(),
                image: image.clone(),
                question: self.question.clone(),
            }),
        };

        match guard {
            Ok(job) => {
                self.notice = None;
                self.state = AnalysisState::Requesting;
                log::debug!("Analysis requested for {}", job.image.file_name);
                Ok(job)
            }
            Err(err) => {
                log::debug!("Analysis not started: {err}");
                self.notice = Some(self.notice_for(&err));
                Err(err)
            }
        }
    }

    /// Records the outcome of a call started by [`Session::begin_analysis`] and returns to
    /// [`AnalysisState::Idle`], whatever the outcome.
    pub fn finish_analysis(&mut self, outcome: Result<String, AnalyzerError>) -> &AnalysisResult {
        let result = match outcome {
            Ok(text) => {
                log::info!("Analysis completed ({} chars)", text.len());
                AnalysisResult::Success(text)
            }
            Err(err) => {
                log::warn!("Analysis failed: {err}");
                AnalysisResult::Failure(err.display_message())
            }
        };
        self.state = AnalysisState::Idle;
        self.result.insert(result)
    }

    /// Runs one full analysis cycle on the calling thread.
    pub fn trigger<F: ModelFactory>(
        &mut self,
        gateway: &InferenceGateway<F>,
    ) -> Result<&AnalysisResult, AnalyzerError> {
        let job = self.begin_analysis()?;
        let outcome = gateway.run(&job);
        Ok(self.finish_analysis(outcome))
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state.as_str(),
            has_credential: self.has_credential(),
            image: self.image.as_ref().map(|i| i.file_name.clone()),
            question: self.question.clone(),
            result: self.result.clone(),
            notice: self.notice.clone(),
            warning: (!self.has_credential()).then(|| CREDENTIAL_PROMPT.to_string()),
        }
    }

    fn notice_for(&self, err: &AnalyzerError) -> String {
        match err {
            AnalyzerError::MissingCredential
                if self.image.is_some() && !self.question.trim().is_empty() =>
            {
                CREDENTIAL_REQUIRED.to_string()
            }
            AnalyzerError::MissingCredential => CREDENTIAL_PROMPT.to_string(),
            AnalyzerError::MissingInput(MissingInput::Image) => {
                "Please upload a receipt image (JPG/PNG) to continue!".to_string()
            }
            AnalyzerError::MissingInput(MissingInput::Question) => {
                "Please ask a question about the receipt to continue!".to_string()
            }
            other => other.to_string(),
        }
    }
}


/// Snapshot of a session as rendered to the user. Never carries the credential itself.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub state: &'static str,
    pub has_credential: bool,
    pub image: Option<String>,
    pub question: String,
    pub result: Option<AnalysisResult>,
    pub notice: Option<String>,
    pub warning: Option<String>,
}
