pub mod billing;
pub mod catalog;
pub mod devis;
pub mod finance;

pub use billing::{
    CreateDirectInvoiceRequest, CreateInvoiceFromDevisRequest, CreatePaymentRequest,
    InvoiceResponse,
};
pub use catalog::{
    CreateClientRequest, CreateMaterialRequest, CreateServiceRequest, SetMachinePriceRequest,
    UpdatePriceRequest,
};
pub use devis::{AddLineRequest, AddServiceRequest, CreateDevisRequest};
pub use finance::{CloseRegisterRequest, CreateExpenseRequest, ScopeParams, UpdateExpenseRequest};
