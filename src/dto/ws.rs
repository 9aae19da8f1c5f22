use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{dto::validation::validate_display_name, state::participant::DeviceInfo};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from participant WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipantInboundMessage {
    /// First frame of every connection.
    Join(JoinRequest),
    /// Fastest-finger ordering such as `B,A,D,C`.
    SubmitFffAnswer { sequence: String },
    /// Audience poll vote, one of `A`..`D`.
    CastAtaVote { option: String },
    #[serde(other)]
    Unknown,
}

impl ParticipantInboundMessage {
    pub fn join_request(&self) -> Option<&JoinRequest> {
        match self {
            Self::Join(request) => Some(request),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema, Validate)]
/// Registration (or reconnection when `participant_id` is set) into a session.
pub struct JoinRequest {
    pub session_id: Uuid,
    #[validate(custom(function = "validate_display_name"))]
    pub display_name: String,
    #[serde(default)]
    pub participant_id: Option<Uuid>,
    /// Token from the welcome frame; required together with `participant_id`.
    #[serde(default)]
    pub reconnect_token: Option<Uuid>,
    #[serde(default)]
    pub device: DeviceInfo,
}

#[derive(Debug, Serialize, ToSchema)]
/// Rejection sent back on the participant socket; the connection stays open.
pub struct ParticipantErrorFrame {
    /// Always `error`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Machine readable reason, e.g. `late_submission`.
    pub code: String,
    pub message: String,
}

impl ParticipantErrorFrame {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            code: code.into(),
            message: message.into(),
        }
    }
}
