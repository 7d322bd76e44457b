use crate::models::NewClient;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 255, message = "Client name is required"))]
    pub name: String,

    #[validate(length(max = 64))]
    pub phone: Option<String>,

    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,

    pub address: Option<String>,
    pub notes: Option<String>,
}

impl From<CreateClientRequest> for NewClient {
    fn from(req: CreateClientRequest) -> Self {
        Self {
            name: req.name,
            phone: req.phone,
            email: req.email,
            address: req.address,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct SetMachinePriceRequest {
    pub price_per_unit: Decimal,

    #[validate(length(max = 500))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMaterialRequest {
    #[validate(length(min = 1, max = 255, message = "Material name is required"))]
    pub name: String,

    pub price_per_unit: Decimal,

    #[validate(length(min = 1, max = 32, message = "Unit is required"))]
    pub unit: String,

    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequest {
    #[validate(length(min = 1, max = 255, message = "Service name is required"))]
    pub name: String,

    pub price: Decimal,

    pub description: Option<String>,
}

/// New unit price for a material or fixed service.
#[derive(Debug, Deserialize)]
pub struct UpdatePriceRequest {
    pub price: Decimal,
}
