use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use forecourt_core::domain::actor::ActorId;
use forecourt_core::domain::tank::{FuelType, TankInventory};
use forecourt_core::store::{StoreError, TankStore};

/// Canonical starter tanks for a fresh forecourt.
const SEED_TANKS: &[SeedTankContract] = &[
    SeedTankContract {
        fuel_type: "petrol",
        capacity_litres: 20_000,
        initial_level_litres: 12_000,
        description: "Unleaded petrol, main underground tank",
    },
    SeedTankContract {
        fuel_type: "diesel",
        capacity_litres: 15_000,
        initial_level_litres: 9_000,
        description: "Automotive diesel",
    },
    SeedTankContract {
        fuel_type: "kerosene",
        capacity_litres: 5_000,
        initial_level_litres: 2_500,
        description: "Household kerosene",
    },
];

const SEED_ACTOR: &str = "seed";

pub struct SeedDataset;

impl SeedDataset {
    /// Registers every seed tank that is not already present. Existing tanks are left
    /// untouched, so loading twice is harmless.
    pub async fn load<S>(store: &S) -> Result<SeedResult, StoreError>
    where
        S: TankStore + ?Sized,
    {
        let now = Utc::now();
        let mut tanks = Vec::with_capacity(SEED_TANKS.len());

        for contract in SEED_TANKS {
            let inserted = match store.insert_tank(&contract.to_tank(now)).await {
                Ok(()) => true,
                Err(StoreError::Duplicate(_)) => false,
                Err(error) => return Err(error),
            };
            tanks.push(TankSeedInfo {
                fuel_type: contract.fuel_type,
                description: contract.description,
                inserted,
            });
        }

        Ok(SeedResult { tanks })
    }

    /// Checks that each seed tank exists with its seeded capacity and a level inside bounds.
    pub async fn verify<S>(store: &S) -> Result<VerificationResult, StoreError>
    where
        S: TankStore + ?Sized,
    {
        let mut checks = Vec::with_capacity(SEED_TANKS.len());

        for contract in SEED_TANKS {
            let ok = store
                .find_tank(&FuelType::new(contract.fuel_type))
                .await?
                .is_some_and(|tank| {
                    tank.capacity == Decimal::from(contract.capacity_litres) && tank.is_within_bounds()
                });
            checks.push((contract.fuel_type, ok));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub fn fuel_types() -> Vec<FuelType> {
        SEED_TANKS.iter().map(|contract| FuelType::new(contract.fuel_type)).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedTankContract {
    fuel_type: &'static str,
    capacity_litres: u32,
    initial_level_litres: u32,
    description: &'static str,
}

impl SeedTankContract {
    fn to_tank(self, now: DateTime<Utc>) -> TankInventory {
        TankInventory {
            fuel_type: FuelType::new(self.fuel_type),
            capacity: Decimal::from(self.capacity_litres),
            current_level: Decimal::from(self.initial_level_litres),
            last_refill_amount: None,
            last_refill_date: None,
            updated_by: Some(ActorId(SEED_ACTOR.to_owned())),
            version: 1,
            updated_at: now,
        }
    }
}

#[derive(Debug)]
pub struct SeedResult {
    pub tanks: Vec<TankSeedInfo>,
}

impl SeedResult {
    pub fn inserted_count(&self) -> usize {
        self.tanks.iter().filter(|tank| tank.inserted).count()
    }
}

#[derive(Debug)]
pub struct TankSeedInfo {
    pub fuel_type: &'static str,
    pub description: &'static str,
    pub inserted: bool,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
