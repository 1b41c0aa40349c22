use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Short-lived token that authorizes one session connection.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: SecretString,
}

#[derive(Deserialize)]
pub(crate) struct SessionTokenResponse {
    pub token: String,
}

impl From<SessionTokenResponse> for SessionToken {
    fn from(response: SessionTokenResponse) -> Self {
        Self {
            token: SecretString::from(response.token),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Voice activity detection thresholds, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VadSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseCancelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
}

/// Call timeout behaviour. Unlike the rest of the agent, these fields are
/// camelCase on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<f64>,
    /// `end_call` or `transfer_call`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_counter: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_timeout_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_transfer_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_transfer_message: Option<String>,
}

/// An agent as returned by `GET /v1/agents`. The service omits fields freely,
/// so everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    /// `active` or `inactive`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarize_calls: Option<bool>,
    /// `elevenlabs`, `openai` or `cartesia`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_cancel_settings: Option<NoiseCancelSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_settings: Option<VadSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_first_message_outbound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_settings: Option<VoiceSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_settings: Option<TimeoutSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyterms: Option<Vec<String>>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("active")
    }
}
