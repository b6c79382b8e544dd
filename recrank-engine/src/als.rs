//! Explicit-feedback alternating least squares
//!
//! Factorizes the sparse user × item rating matrix into `rank`-dimensional
//! user and item factors. Each half-step fixes one side and solves a
//! regularized least-squares problem per row:
//!
//! `(Yᵀ Y + λ·nᵤ·I) xᵤ = Yᵀ rᵤ`
//!
//! where `nᵤ` is the number of ratings for that row (weighted-λ
//! regularization).

use crate::error::BoxError;
use crate::model::{Model, UnknownEntity};
use crate::trainer::Trainer;
use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use recrank_common::config::TrainerSettings;
use recrank_common::Rating;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// ALS hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct AlsTrainer {
    rank: usize,
    iterations: usize,
    lambda: f64,
    seed: u64,
}

impl Default for AlsTrainer {
    fn default() -> Self {
        Self {
            rank: 10,
            iterations: 10,
            lambda: 0.01,
            seed: 42,
        }
    }
}

impl AlsTrainer {
    pub fn new(rank: usize, iterations: usize, lambda: f64) -> Result<Self> {
        if rank == 0 {
            return Err(Error::InvalidConfig("ALS rank must be greater than zero".to_string()));
        }
        if !(lambda >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "ALS lambda must be non-negative, got {}",
                lambda
            )));
        }
        Ok(Self {
            rank,
            iterations,
            lambda,
            ..Self::default()
        })
    }

    pub fn from_settings(settings: &TrainerSettings) -> Result<Self> {
        Ok(Self::new(settings.rank, settings.iterations, settings.lambda)?.with_seed(settings.seed))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Run ALS and return the concrete factor model
    pub fn fit(&self, ratings: &[Rating]) -> std::result::Result<FactorModel, BoxError> {
        let users = IdIndex::build(ratings.iter().map(|r| r.user_id));
        let items = IdIndex::build(ratings.iter().map(|r| r.item_id));

        let mut by_user = vec![Vec::new(); users.len()];
        let mut by_item = vec![Vec::new(); items.len()];
        for r in ratings {
            let u = users.position(r.user_id);
            let i = items.position(r.item_id);
            by_user[u].push((i, r.value));
            by_item[i].push((u, r.value));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let scale = 1.0 / (self.rank as f64).sqrt();
        let mut user_factors = DMatrix::from_fn(users.len(), self.rank, |_, _| rng.gen::<f64>() * scale);
        let mut item_factors = DMatrix::from_fn(items.len(), self.rank, |_, _| rng.gen::<f64>() * scale);

        for iteration in 0..self.iterations {
            user_factors = self.solve_side(&item_factors, &by_user)?;
            item_factors = self.solve_side(&user_factors, &by_item)?;
            debug!(iteration, "ALS iteration complete");
        }

        Ok(FactorModel {
            rank: self.rank,
            users,
            items,
            user_factors,
            item_factors,
        })
    }

    /// Solve every row of one side with the other side held fixed
    fn solve_side(
        &self,
        fixed: &DMatrix<f64>,
        rows: &[Vec<(usize, f64)>],
    ) -> std::result::Result<DMatrix<f64>, BoxError> {
        let mut solved = DMatrix::zeros(rows.len(), self.rank);

        for (row_idx, observations) in rows.iter().enumerate() {
            let mut gram = DMatrix::<f64>::zeros(self.rank, self.rank);
            let mut rhs = DVector::<f64>::zeros(self.rank);

            for &(col, value) in observations {
                let y: DVector<f64> = fixed.row(col).transpose();
                gram += &y * y.transpose();
                rhs += &y * value;
            }

            let reg = self.lambda * observations.len() as f64;
            for d in 0..self.rank {
                gram[(d, d)] += reg;
            }

            let x = match gram.clone().cholesky() {
                Some(chol) => chol.solve(&rhs),
                None => gram
                    .lu()
                    .solve(&rhs)
                    .ok_or_else(|| format!("singular normal equations for row {}", row_idx))?,
            };
            solved.set_row(row_idx, &x.transpose());
        }

        Ok(solved)
    }
}

impl Trainer for AlsTrainer {
    fn train(&self, ratings: &[Rating]) -> std::result::Result<Arc<dyn Model>, BoxError> {
        Ok(Arc::new(self.fit(ratings)?))
    }
}

/// Dense position for each distinct identifier, in first-seen order
#[derive(Debug, Clone, Default)]
struct IdIndex {
    positions: HashMap<i32, usize>,
}

impl IdIndex {
    fn build(ids: impl Iterator<Item = i32>) -> Self {
        let mut positions = HashMap::new();
        for id in ids {
            let next = positions.len();
            positions.entry(id).or_insert(next);
        }
        Self { positions }
    }

    fn len(&self) -> usize {
        self.positions.len()
    }

    fn get(&self, id: i32) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Position of an id known to be indexed
    fn position(&self, id: i32) -> usize {
        self.positions[&id]
    }
}

/// User and item latent factors produced by [`AlsTrainer`]
pub struct FactorModel {
    rank: usize,
    users: IdIndex,
    items: IdIndex,
    user_factors: DMatrix<f64>,
    item_factors: DMatrix<f64>,
}

impl FactorModel {
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }
}

impl fmt::Debug for FactorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorModel")
            .field("rank", &self.rank)
            .field("users", &self.users.len())
            .field("items", &self.items.len())
            .finish()
    }
}

impl Model for FactorModel {
    fn predict(&self, user_id: i32, item_id: i32) -> std::result::Result<f64, UnknownEntity> {
        let u = self.users.get(user_id).ok_or(UnknownEntity::User(user_id))?;
        let i = self.items.get(item_id).ok_or(UnknownEntity::Item(item_id))?;
        Ok(self.user_factors.row(u).dot(&self.item_factors.row(i)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ratings() -> Vec<Rating> {
        vec![
            Rating::new(1, 10, 4.0),
            Rating::new(1, 11, 2.0),
            Rating::new(2, 10, 5.0),
            Rating::new(2, 12, 1.0),
            Rating::new(3, 11, 3.0),
            Rating::new(3, 12, 4.0),
        ]
    }

    #[test]
    fn test_rejects_zero_rank() {
        assert!(matches!(AlsTrainer::new(0, 10, 0.01), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_negative_lambda() {
        assert!(matches!(AlsTrainer::new(4, 10, -1.0), Err(Error::InvalidConfig(_))));
        assert!(matches!(AlsTrainer::new(4, 10, f64::NAN), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_fits_observed_ratings() {
        let trainer = AlsTrainer::new(5, 20, 0.01).unwrap();
        let model = trainer.fit(&sample_ratings()).unwrap();

        assert_eq!(model.num_users(), 3);
        assert_eq!(model.num_items(), 3);
        for r in sample_ratings() {
            let predicted = model.predict(r.user_id, r.item_id).unwrap();
            assert!(
                (predicted - r.value).abs() < 0.5,
                "user {} item {}: predicted {} expected {}",
                r.user_id,
                r.item_id,
                predicted,
                r.value
            );
        }
    }

    #[test]
    fn test_unknown_identifiers() {
        let model = AlsTrainer::default().fit(&sample_ratings()).unwrap();

        assert_eq!(model.predict(99, 10), Err(UnknownEntity::User(99)));
        assert_eq!(model.predict(1, 99), Err(UnknownEntity::Item(99)));
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = AlsTrainer::default().fit(&sample_ratings()).unwrap();
        let b = AlsTrainer::default().fit(&sample_ratings()).unwrap();

        assert_eq!(a.predict(3, 10).unwrap(), b.predict(3, 10).unwrap());
    }

    #[test]
    fn test_from_settings() {
        let settings = TrainerSettings {
            rank: 3,
            iterations: 2,
            lambda: 0.1,
            seed: 9,
        };
        let trainer = AlsTrainer::from_settings(&settings).unwrap();
        assert_eq!(trainer.rank(), 3);
        assert_eq!(trainer, AlsTrainer::new(3, 2, 0.1).unwrap().with_seed(9));
    }
}
