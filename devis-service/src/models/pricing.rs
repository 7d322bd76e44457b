//! Pricing resolver: raw machine measurements to a priced line.
//!
//! Each machine type carries only the inputs its rule needs, and [`resolve`]
//! matches exhaustively over them. Results are snapshotted onto the quote line,
//! so later catalog changes never touch existing lines.

use super::catalog::{FixedService, MachineType, Material, PriceCatalog};
use super::error::{checked_add, checked_mul, ensure_positive, LedgerError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionUnit {
    #[default]
    M,
    Cm,
}

impl DimensionUnit {
    fn to_meters(self) -> Decimal {
        match self {
            Self::M => Decimal::ONE,
            Self::Cm => Decimal::new(1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: Decimal,
    pub height: Decimal,
    #[serde(default)]
    pub unit: DimensionUnit,
}

impl Dimensions {
    pub fn new(width: Decimal, height: Decimal, unit: DimensionUnit) -> Self {
        Self {
            width,
            height,
            unit,
        }
    }

    /// Surface in square meters. Both axes are converted before multiplying.
    pub fn area(&self) -> Result<Decimal, LedgerError> {
        ensure_positive("width", self.width)?;
        ensure_positive("height", self.height)?;
        let factor = self.unit.to_meters();
        checked_mul(
            checked_mul(self.width, factor)?,
            checked_mul(self.height, factor)?,
        )
    }
}

/// How a maintenance line is priced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceMode {
    Manual { unit_price: Decimal },
    Material { material_id: Uuid, quantity: Decimal },
    Service { service_id: Uuid, quantity: Decimal },
}

/// Raw inputs of a quote line, one variant per machine type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "machine_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineInput {
    Cnc {
        minutes: Decimal,
        #[serde(default)]
        dimensions: Option<Dimensions>,
        #[serde(default)]
        material_id: Option<Uuid>,
    },
    Laser {
        minutes: Decimal,
        #[serde(default)]
        dimensions: Option<Dimensions>,
        #[serde(default)]
        material_id: Option<Uuid>,
    },
    Champs {
        meters: Decimal,
    },
    Panneaux {
        quantity: Decimal,
    },
    Pliage {
        machine_meters: Decimal,
        material_meters: Decimal,
        #[serde(default)]
        material_id: Option<Uuid>,
    },
    ServiceMaintenance {
        mode: MaintenanceMode,
    },
    VenteMateriau {
        material_id: Uuid,
        dimensions: Dimensions,
    },
}

impl LineInput {
    pub fn machine_type(&self) -> MachineType {
        match self {
            Self::Cnc { .. } => MachineType::Cnc,
            Self::Laser { .. } => MachineType::Laser,
            Self::Champs { .. } => MachineType::Champs,
            Self::Panneaux { .. } => MachineType::Panneaux,
            Self::Pliage { .. } => MachineType::Pliage,
            Self::ServiceMaintenance { .. } => MachineType::ServiceMaintenance,
            Self::VenteMateriau { .. } => MachineType::VenteMateriau,
        }
    }

    /// Material referenced by this line, if any.
    pub fn material_ref(&self) -> Option<Uuid> {
        match self {
            Self::Cnc { material_id, .. }
            | Self::Laser { material_id, .. }
            | Self::Pliage { material_id, .. } => *material_id,
            Self::VenteMateriau { material_id, .. } => Some(*material_id),
            Self::ServiceMaintenance {
                mode: MaintenanceMode::Material { material_id, .. },
            } => Some(*material_id),
            _ => None,
        }
    }

    /// Fixed service referenced by this line, if any.
    pub fn service_ref(&self) -> Option<Uuid> {
        match self {
            Self::ServiceMaintenance {
                mode: MaintenanceMode::Service { service_id, .. },
            } => Some(*service_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub unit_price: Decimal,
    pub material_cost: Decimal,
    pub line_total: Decimal,
}

fn machine_price<C: PriceCatalog + ?Sized>(
    catalog: &C,
    machine: MachineType,
) -> Result<Decimal, LedgerError> {
    catalog.machine_price(machine).ok_or_else(|| {
        LedgerError::not_found(format!("No price configured for machine type {}", machine))
    })
}

fn material<C: PriceCatalog + ?Sized>(catalog: &C, id: Uuid) -> Result<&Material, LedgerError> {
    catalog
        .material(id)
        .filter(|m| m.is_active)
        .ok_or_else(|| LedgerError::not_found(format!("Material {} not found", id)))
}

fn service<C: PriceCatalog + ?Sized>(catalog: &C, id: Uuid) -> Result<&FixedService, LedgerError> {
    catalog
        .service(id)
        .filter(|s| s.is_active)
        .ok_or_else(|| LedgerError::not_found(format!("Service {} not found", id)))
}

fn timed_line<C: PriceCatalog + ?Sized>(
    catalog: &C,
    machine: MachineType,
    minutes: Decimal,
    dimensions: Option<&Dimensions>,
    material_id: Option<Uuid>,
) -> Result<ResolvedPrice, LedgerError> {
    ensure_positive("minutes", minutes)?;
    let unit_price = machine_price(catalog, machine)?;

    let material_cost = match (material_id, dimensions) {
        (Some(id), Some(dims)) => {
            checked_mul(dims.area()?, material(catalog, id)?.price_per_unit)?
        }
        (Some(_), None) => {
            return Err(LedgerError::validation(
                "dimensions are required when a material is selected",
            ))
        }
        (None, Some(dims)) => {
            dims.area()?;
            Decimal::ZERO
        }
        (None, None) => Decimal::ZERO,
    };

    Ok(ResolvedPrice {
        unit_price,
        material_cost,
        line_total: checked_add(checked_mul(minutes, unit_price)?, material_cost)?,
    })
}

fn per_unit_line<C: PriceCatalog + ?Sized>(
    catalog: &C,
    machine: MachineType,
    field: &str,
    amount: Decimal,
) -> Result<ResolvedPrice, LedgerError> {
    ensure_positive(field, amount)?;
    let unit_price = machine_price(catalog, machine)?;
    Ok(ResolvedPrice {
        unit_price,
        material_cost: Decimal::ZERO,
        line_total: checked_mul(amount, unit_price)?,
    })
}

/// Price a line against the given catalog.
pub fn resolve<C: PriceCatalog + ?Sized>(
    input: &LineInput,
    catalog: &C,
) -> Result<ResolvedPrice, LedgerError> {
    match input {
        LineInput::Cnc {
            minutes,
            dimensions,
            material_id,
        } => timed_line(
            catalog,
            MachineType::Cnc,
            *minutes,
            dimensions.as_ref(),
            *material_id,
        ),
        LineInput::Laser {
            minutes,
            dimensions,
            material_id,
        } => timed_line(
            catalog,
            MachineType::Laser,
            *minutes,
            dimensions.as_ref(),
            *material_id,
        ),
        LineInput::Champs { meters } => {
            per_unit_line(catalog, MachineType::Champs, "meters", *meters)
        }
        LineInput::Panneaux { quantity } => {
            per_unit_line(catalog, MachineType::Panneaux, "quantity", *quantity)
        }
        LineInput::Pliage {
            machine_meters,
            material_meters,
            material_id,
        } => {
            ensure_positive("machine_meters", *machine_meters)?;
            if *material_meters < Decimal::ZERO {
                return Err(LedgerError::validation(
                    "material_meters must not be negative",
                ));
            }
            let unit_price = machine_price(catalog, MachineType::Pliage)?;
            let material_cost = match material_id {
                Some(id) => checked_mul(*material_meters, material(catalog, *id)?.price_per_unit)?,
                None => Decimal::ZERO,
            };
            Ok(ResolvedPrice {
                unit_price,
                material_cost,
                line_total: checked_add(checked_mul(*machine_meters, unit_price)?, material_cost)?,
            })
        }
        LineInput::ServiceMaintenance { mode } => match mode {
            MaintenanceMode::Manual { unit_price } => {
                ensure_positive("unit_price", *unit_price)?;
                Ok(ResolvedPrice {
                    unit_price: *unit_price,
                    material_cost: Decimal::ZERO,
                    line_total: *unit_price,
                })
            }
            MaintenanceMode::Material {
                material_id,
                quantity,
            } => {
                ensure_positive("quantity", *quantity)?;
                let unit_price = material(catalog, *material_id)?.price_per_unit;
                let cost = checked_mul(*quantity, unit_price)?;
                Ok(ResolvedPrice {
                    unit_price,
                    material_cost: cost,
                    line_total: cost,
                })
            }
            MaintenanceMode::Service {
                service_id,
                quantity,
            } => {
                ensure_positive("quantity", *quantity)?;
                let unit_price = service(catalog, *service_id)?.price;
                Ok(ResolvedPrice {
                    unit_price,
                    material_cost: Decimal::ZERO,
                    line_total: checked_mul(*quantity, unit_price)?,
                })
            }
        },
        LineInput::VenteMateriau {
            material_id,
            dimensions,
        } => {
            let area = dimensions.area()?;
            let unit_price = material(catalog, *material_id)?.price_per_unit;
            let cost = checked_mul(area, unit_price)?;
            Ok(ResolvedPrice {
                unit_price,
                material_cost: cost,
                line_total: cost,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::CatalogSnapshot;
    use chrono::Utc;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn material_at(price: &str) -> Material {
        Material::create("Plexiglas".into(), d(price), "m2".into(), None, Utc::now()).unwrap()
    }

    fn service_at(price: &str) -> FixedService {
        FixedService::create("Pose".into(), d(price), None, Utc::now()).unwrap()
    }

    #[test]
    fn cnc_without_material_is_minutes_times_machine_price() {
        let catalog = CatalogSnapshot::default().with_machine_price(MachineType::Cnc, d("2.0"));
        let input = LineInput::Cnc {
            minutes: d("30"),
            dimensions: None,
            material_id: None,
        };

        let price = resolve(&input, &catalog).unwrap();

        assert_eq!(price.line_total, d("60.0"));
        assert_eq!(price.unit_price, d("2.0"));
        assert_eq!(price.material_cost, Decimal::ZERO);
    }

    #[test]
    fn vente_materiau_uses_area_in_square_meters() {
        let plexi = material_at("10");
        let catalog = CatalogSnapshot::default().with_material(plexi.clone());
        let input = LineInput::VenteMateriau {
            material_id: plexi.id,
            dimensions: Dimensions::new(d("2"), d("1.5"), DimensionUnit::M),
        };

        let price = resolve(&input, &catalog).unwrap();

        assert_eq!(price.line_total, d("30.0"));
        assert_eq!(price.material_cost, d("30.0"));
    }

    #[test]
    fn centimeters_convert_on_both_axes() {
        let plexi = material_at("10");
        let catalog = CatalogSnapshot::default().with_material(plexi.clone());
        let input = LineInput::VenteMateriau {
            material_id: plexi.id,
            dimensions: Dimensions::new(d("200"), d("150"), DimensionUnit::Cm),
        };

        assert_eq!(resolve(&input, &catalog).unwrap().line_total, d("30"));
    }

    #[test]
    fn dimension_unit_defaults_to_meters() {
        let dims: Dimensions = serde_json::from_str(r#"{"width": "2", "height": "3"}"#).unwrap();
        assert_eq!(dims.unit, DimensionUnit::M);
        assert_eq!(dims.area().unwrap(), d("6"));
    }

    #[test]
    fn laser_with_material_adds_material_cost() {
        let wood = material_at("12.5");
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Laser, d("1.5"))
            .with_material(wood.clone());
        let input = LineInput::Laser {
            minutes: d("20"),
            dimensions: Some(Dimensions::new(d("50"), d("40"), DimensionUnit::Cm)),
            material_id: Some(wood.id),
        };

        let price = resolve(&input, &catalog).unwrap();

        // 0.5 m x 0.4 m x 12.5 = 2.5
        assert_eq!(price.material_cost, d("2.5"));
        assert_eq!(price.line_total, d("32.5"));
    }

    #[test]
    fn material_without_dimensions_is_rejected() {
        let wood = material_at("12.5");
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Cnc, d("2"))
            .with_material(wood.clone());
        let input = LineInput::Cnc {
            minutes: d("10"),
            dimensions: None,
            material_id: Some(wood.id),
        };

        assert!(matches!(
            resolve(&input, &catalog),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn champs_and_panneaux_are_linear() {
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Champs, d("4"))
            .with_machine_price(MachineType::Panneaux, d("25"));

        let champs = resolve(&LineInput::Champs { meters: d("3.5") }, &catalog).unwrap();
        let panneaux = resolve(&LineInput::Panneaux { quantity: d("2") }, &catalog).unwrap();

        assert_eq!(champs.line_total, d("14"));
        assert_eq!(panneaux.line_total, d("50"));
    }

    #[test]
    fn pliage_accepts_zero_material_meters() {
        let steel = material_at("8");
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Pliage, d("3"))
            .with_material(steel.clone());

        let with_material = LineInput::Pliage {
            machine_meters: d("5"),
            material_meters: d("2"),
            material_id: Some(steel.id),
        };
        let without_material_meters = LineInput::Pliage {
            machine_meters: d("5"),
            material_meters: Decimal::ZERO,
            material_id: Some(steel.id),
        };

        assert_eq!(resolve(&with_material, &catalog).unwrap().line_total, d("31"));
        assert_eq!(
            resolve(&without_material_meters, &catalog).unwrap().line_total,
            d("15")
        );
    }

    #[test]
    fn maintenance_modes() {
        let steel = material_at("8");
        let pose = service_at("45");
        let catalog = CatalogSnapshot::default()
            .with_material(steel.clone())
            .with_service(pose.clone());

        let manual = LineInput::ServiceMaintenance {
            mode: MaintenanceMode::Manual {
                unit_price: d("120"),
            },
        };
        let by_material = LineInput::ServiceMaintenance {
            mode: MaintenanceMode::Material {
                material_id: steel.id,
                quantity: d("3"),
            },
        };
        let by_service = LineInput::ServiceMaintenance {
            mode: MaintenanceMode::Service {
                service_id: pose.id,
                quantity: d("2"),
            },
        };

        assert_eq!(resolve(&manual, &catalog).unwrap().line_total, d("120"));
        let material_price = resolve(&by_material, &catalog).unwrap();
        assert_eq!(material_price.line_total, d("24"));
        assert_eq!(material_price.material_cost, d("24"));
        assert_eq!(resolve(&by_service, &catalog).unwrap().line_total, d("90"));
    }

    #[test]
    fn non_positive_inputs_are_rejected() {
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Cnc, d("2"))
            .with_machine_price(MachineType::Champs, d("2"));

        let zero_minutes = LineInput::Cnc {
            minutes: Decimal::ZERO,
            dimensions: None,
            material_id: None,
        };
        let negative_meters = LineInput::Champs { meters: d("-1") };

        assert!(matches!(
            resolve(&zero_minutes, &catalog),
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(
            resolve(&negative_meters, &catalog),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn overflowing_totals_are_rejected() {
        let plexi = material_at("10");
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Cnc, d("2"))
            .with_material(plexi.clone());
        let endless = LineInput::Cnc {
            minutes: Decimal::MAX,
            dimensions: None,
            material_id: None,
        };
        let huge_sheet = LineInput::VenteMateriau {
            material_id: plexi.id,
            dimensions: Dimensions::new(Decimal::MAX, d("2"), DimensionUnit::M),
        };

        for input in [endless, huge_sheet] {
            assert!(matches!(
                resolve(&input, &catalog),
                Err(LedgerError::Validation(msg)) if msg == "amount out of range"
            ));
        }
    }

    #[test]
    fn unknown_references_are_not_found() {
        let catalog = CatalogSnapshot::default();
        let unknown_material = LineInput::VenteMateriau {
            material_id: Uuid::new_v4(),
            dimensions: Dimensions::new(d("1"), d("1"), DimensionUnit::M),
        };
        let unpriced_machine = LineInput::Panneaux { quantity: d("1") };

        assert!(matches!(
            resolve(&unknown_material, &catalog),
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            resolve(&unpriced_machine, &catalog),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn resolution_is_idempotent() {
        let wood = material_at("9.9");
        let catalog = CatalogSnapshot::default()
            .with_machine_price(MachineType::Laser, d("1.75"))
            .with_material(wood.clone());
        let input = LineInput::Laser {
            minutes: d("13"),
            dimensions: Some(Dimensions::new(d("33"), d("21"), DimensionUnit::Cm)),
            material_id: Some(wood.id),
        };

        assert_eq!(
            resolve(&input, &catalog).unwrap(),
            resolve(&input, &catalog).unwrap()
        );
    }

    #[test]
    fn line_input_is_tagged_by_machine_type() {
        let json = r#"{
            "machine_type": "SERVICE_MAINTENANCE",
            "mode": { "kind": "MANUAL", "unit_price": "80" }
        }"#;
        let input: LineInput = serde_json::from_str(json).unwrap();

        assert_eq!(input.machine_type(), MachineType::ServiceMaintenance);
        assert_eq!(
            input,
            LineInput::ServiceMaintenance {
                mode: MaintenanceMode::Manual {
                    unit_price: d("80")
                }
            }
        );
    }
}
