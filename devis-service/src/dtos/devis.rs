use crate::models::LineInput;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDevisRequest {
    pub client_id: Uuid,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Line inputs are flattened, so the body is the `LineInput` JSON plus an
/// optional `description`.
#[derive(Debug, Deserialize, Validate)]
pub struct AddLineRequest {
    #[serde(flatten)]
    pub input: LineInput,

    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddServiceRequest {
    pub service_id: Uuid,
}
