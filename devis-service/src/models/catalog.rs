//! Clients and the price catalog (machines, materials, fixed services).

use super::error::{ensure_positive, LedgerError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Clients
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

impl Client {
    pub fn create(new: NewClient, now: DateTime<Utc>) -> Result<Self, LedgerError> {
        let name = new.name.trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("Client name is required"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            phone: new.phone,
            email: new.email,
            address: new.address,
            notes: new.notes,
            created_utc: now,
        })
    }
}

// ============================================================================
// Machines
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineType {
    Cnc,
    Laser,
    Champs,
    Panneaux,
    ServiceMaintenance,
    VenteMateriau,
    Pliage,
}

impl MachineType {
    pub const ALL: [MachineType; 7] = [
        Self::Cnc,
        Self::Laser,
        Self::Champs,
        Self::Panneaux,
        Self::ServiceMaintenance,
        Self::VenteMateriau,
        Self::Pliage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cnc => "CNC",
            Self::Laser => "LASER",
            Self::Champs => "CHAMPS",
            Self::Panneaux => "PANNEAUX",
            Self::ServiceMaintenance => "SERVICE_MAINTENANCE",
            Self::VenteMateriau => "VENTE_MATERIAU",
            Self::Pliage => "PLIAGE",
        }
    }
}

impl FromStr for MachineType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| LedgerError::validation(format!("Unknown machine type '{}'", s)))
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-level default unit price (per minute, meter or piece depending on the machine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachinePricing {
    pub machine_type: MachineType,
    pub price_per_unit: Decimal,
    pub description: Option<String>,
    pub updated_utc: DateTime<Utc>,
}

impl MachinePricing {
    pub fn new(
        machine_type: MachineType,
        price_per_unit: Decimal,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        ensure_positive("price_per_unit", price_per_unit)?;
        Ok(Self {
            machine_type,
            price_per_unit,
            description,
            updated_utc: now,
        })
    }
}

// ============================================================================
// Materials & fixed services
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Material {
    pub id: Uuid,
    pub name: String,
    pub price_per_unit: Decimal,
    pub unit: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Material {
    pub fn create(
        name: String,
        price_per_unit: Decimal,
        unit: String,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        ensure_positive("price_per_unit", price_per_unit)?;
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Material name is required"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            price_per_unit,
            unit,
            description,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FixedService {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl FixedService {
    pub fn create(
        name: String,
        price: Decimal,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        ensure_positive("price", price)?;
        if name.trim().is_empty() {
            return Err(LedgerError::validation("Service name is required"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            price,
            description,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        })
    }
}

// ============================================================================
// Catalog lookups
// ============================================================================

/// Read access to current catalog prices.
pub trait PriceCatalog {
    fn machine_price(&self, machine: MachineType) -> Option<Decimal>;
    fn material(&self, id: Uuid) -> Option<&Material>;
    fn service(&self, id: Uuid) -> Option<&FixedService>;
}

/// Point-in-time copy of the catalog, loaded once per pricing call.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub machine_prices: HashMap<MachineType, Decimal>,
    pub materials: HashMap<Uuid, Material>,
    pub services: HashMap<Uuid, FixedService>,
}

impl CatalogSnapshot {
    pub fn with_machine_price(mut self, machine: MachineType, price: Decimal) -> Self {
        self.machine_prices.insert(machine, price);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.materials.insert(material.id, material);
        self
    }

    pub fn with_service(mut self, service: FixedService) -> Self {
        self.services.insert(service.id, service);
        self
    }
}

impl PriceCatalog for CatalogSnapshot {
    fn machine_price(&self, machine: MachineType) -> Option<Decimal> {
        self.machine_prices.get(&machine).copied()
    }

    fn material(&self, id: Uuid) -> Option<&Material> {
        self.materials.get(&id).filter(|m| m.is_active)
    }

    fn service(&self, id: Uuid) -> Option<&FixedService> {
        self.services.get(&id).filter(|s| s.is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_type_parses_its_own_label() {
        for machine in MachineType::ALL {
            assert_eq!(machine.as_str().parse::<MachineType>().unwrap(), machine);
        }
        assert!("DRILL".parse::<MachineType>().is_err());
    }

    #[test]
    fn machine_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&MachineType::VenteMateriau).unwrap();
        assert_eq!(json, "\"VENTE_MATERIAU\"");
    }

    #[test]
    fn catalog_prices_must_be_positive() {
        let now = Utc::now();
        assert!(Material::create("Acier".into(), Decimal::ZERO, "m2".into(), None, now).is_err());
        assert!(FixedService::create("Pose".into(), Decimal::new(-5, 0), None, now).is_err());
        assert!(MachinePricing::new(MachineType::Cnc, Decimal::ZERO, None, now).is_err());
    }

    #[test]
    fn blank_client_name_is_rejected() {
        let new = NewClient {
            name: "   ".into(),
            ..Default::default()
        };
        assert!(matches!(
            Client::create(new, Utc::now()),
            Err(LedgerError::Validation(_))
        ));
    }
}
