use crate::models::question::{Difficulty, Question};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Question ids available for drawing, grouped by difficulty tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionPool {
    pub easy: Vec<Uuid>,
    pub medium: Vec<Uuid>,
    pub hard: Vec<Uuid>,
}

impl QuestionPool {
    pub fn from_questions(questions: &[Question]) -> Self {
        let mut pool = Self::default();
        for q in questions {
            pool.tier_mut(q.difficulty).push(q.id);
        }
        pool
    }

    pub fn tier(&self, difficulty: Difficulty) -> &[Uuid] {
        match difficulty {
            Difficulty::Easy => &self.easy,
            Difficulty::Medium => &self.medium,
            Difficulty::Hard => &self.hard,
        }
    }

    fn tier_mut(&mut self, difficulty: Difficulty) -> &mut Vec<Uuid> {
        match difficulty {
            Difficulty::Easy => &mut self.easy,
            Difficulty::Medium => &mut self.medium,
            Difficulty::Hard => &mut self.hard,
        }
    }
}

/// Requested number of questions per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyConfig {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl DifficultyConfig {
    pub fn requested(&self, difficulty: Difficulty) -> usize {
        match difficulty {
            Difficulty::Easy => self.easy as usize,
            Difficulty::Medium => self.medium as usize,
            Difficulty::Hard => self.hard as usize,
        }
    }

    /// All tiers zero: no stratification, the whole exam is used.
    pub fn is_empty(&self) -> bool {
        self.easy == 0 && self.medium == 0 && self.hard == 0
    }
}

/// Draws `min(requested, available)` ids per tier, uniformly and without
/// replacement. Short tiers under-fill silently. Output is grouped easy, medium, hard.
pub fn select_questions<R>(pool: &QuestionPool, requested: &DifficultyConfig, rng: &mut R) -> Vec<Uuid>
where
    R: Rng + ?Sized,
{
    if requested.is_empty() {
        return Vec::new();
    }

    let mut selected = Vec::new();
    for difficulty in Difficulty::ALL {
        let wanted = requested.requested(difficulty);
        if wanted == 0 {
            continue;
        }
        let mut tier = pool.tier(difficulty).to_vec();
        tier.shuffle(rng);
        tier.truncate(wanted);
        selected.extend(tier);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn pool(easy: usize, medium: usize, hard: usize) -> QuestionPool {
        QuestionPool {
            easy: ids(easy),
            medium: ids(medium),
            hard: ids(hard),
        }
    }

    fn count_in(selected: &[Uuid], tier: &[Uuid]) -> usize {
        selected.iter().filter(|id| tier.contains(id)).count()
    }

    #[test]
    fn honours_counts_capped_by_availability() {
        let mut rng = StdRng::seed_from_u64(7);
        let cases = [
            ((5, 5, 5), (2, 3, 1)),
            ((1, 0, 4), (3, 2, 4)),
            ((0, 0, 0), (1, 1, 1)),
            ((10, 2, 3), (10, 0, 7)),
        ];
        for ((e, m, h), (re, rm, rh)) in cases {
            let pool = pool(e, m, h);
            let req = DifficultyConfig { easy: re, medium: rm, hard: rh };
            let selected = select_questions(&pool, &req, &mut rng);

            assert_eq!(count_in(&selected, &pool.easy), (re as usize).min(e));
            assert_eq!(count_in(&selected, &pool.medium), (rm as usize).min(m));
            assert_eq!(count_in(&selected, &pool.hard), (rh as usize).min(h));
            let unique: HashSet<_> = selected.iter().collect();
            assert_eq!(unique.len(), selected.len());
        }
    }

    #[test]
    fn empty_request_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let selected = select_questions(&pool(3, 3, 3), &DifficultyConfig::default(), &mut rng);
        assert!(selected.is_empty());
    }

    #[test]
    fn same_seed_same_draw() {
        let pool = pool(20, 20, 20);
        let req = DifficultyConfig { easy: 3, medium: 3, hard: 3 };
        let first = select_questions(&pool, &req, &mut StdRng::seed_from_u64(42));
        let second = select_questions(&pool, &req, &mut StdRng::seed_from_u64(42));
        assert_eq!(first, second);
    }

    #[test]
    fn draws_vary_across_the_pool() {
        let pool = pool(30, 0, 0);
        let req = DifficultyConfig { easy: 1, medium: 0, hard: 0 };
        let mut rng = StdRng::seed_from_u64(3);
        let seen: HashSet<Uuid> = (0..200)
            .flat_map(|_| select_questions(&pool, &req, &mut rng))
            .collect();
        assert!(seen.len() > 10);
    }
}
