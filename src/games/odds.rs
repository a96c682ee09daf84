//! Odds engine
//!
//! Pure functions: win chances, multipliers and payouts per variant. The
//! only input from outside is the random source handed to `draw_outcome`.

use crate::common::traits::RandomSource;
use crate::games::types::{CoinSide, CrackerSlot, Draw, Outcome, Selection};

/// Discount applied to the fair chest chance
pub const CHEST_HOUSE_EDGE: f64 = 0.05;
pub const CHEST_MIN_CHANCE: f64 = 0.0001;
pub const CHEST_MAX_CHANCE: f64 = 0.95;

/// Fraction of the fair cracker multiplier that is paid out
pub const CRACKER_HOUSE_EDGE: f64 = 0.97;
pub const CRACKER_SLOT_COUNT: usize = 6;

/// Chest win chance for staking `bet` against a pool worth `pool_value`.
/// An empty pool can never be won.
pub fn chest_win_chance(bet: u64, pool_value: u64) -> f64 {
    if pool_value == 0 {
        return 0.0;
    }
    let fair = bet as f64 / pool_value as f64;
    (fair * (1.0 - CHEST_HOUSE_EDGE)).clamp(CHEST_MIN_CHANCE, CHEST_MAX_CHANCE)
}

/// Cracker multiplier in tenths, e.g. 58 for 5.8x. Zero for invalid pick counts.
pub fn cracker_multiplier_tenths(picks: usize) -> u64 {
    if picks == 0 || picks >= CRACKER_SLOT_COUNT {
        return 0;
    }
    let multiplier = CRACKER_SLOT_COUNT as f64 / picks as f64 * CRACKER_HOUSE_EDGE;
    (multiplier * 10.0).round() as u64
}

/// Cracker multiplier rounded to one decimal
pub fn cracker_multiplier(picks: usize) -> f64 {
    cracker_multiplier_tenths(picks) as f64 / 10.0
}

/// Gross cracker payout for a winning pull
pub fn cracker_payout(bet: u64, picks: usize) -> u64 {
    let scaled = bet as u128 * cracker_multiplier_tenths(picks) as u128 / 10;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Gross coin payout under the configured multiplier
pub fn coin_payout(bet: u64, multiplier: f64) -> u64 {
    if multiplier <= 0.0 || !multiplier.is_finite() {
        return 0;
    }
    let payout = (bet as f64 * multiplier).round();
    if payout >= u64::MAX as f64 {
        u64::MAX
    } else {
        payout as u64
    }
}

/// Draw and score an outcome for the persisted selection
pub fn draw_outcome(
    bet: u64,
    selection: &Selection,
    coin_multiplier: f64,
    rng: &dyn RandomSource,
) -> Outcome {
    match selection {
        Selection::Coin { side } => {
            let landed = CoinSide::from_bool(rng.coin());
            let won = landed == *side;
            Outcome::new(Draw::Coin { side: landed }, won, coin_payout(bet, coin_multiplier))
        }
        Selection::Chest { .. } => {
            let pool_value = selection.pool_value();
            let win_chance = chest_win_chance(bet, pool_value);
            let roll = rng.unit();
            let won = roll < win_chance;
            Outcome::new(Draw::Chest { roll, win_chance }, won, pool_value)
        }
        Selection::Cracker { slots } => {
            let slot = CrackerSlot::ALL[rng.index(CRACKER_SLOT_COUNT)];
            let won = slots.contains(&slot);
            Outcome::new(Draw::Cracker { slot }, won, cracker_payout(bet, slots.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::random::{ScriptedDraw, ScriptedRandom};
    use crate::games::types::ChestPick;

    #[test]
    fn test_chest_win_chance() {
        assert!((chest_win_chance(100, 1000) - 0.095).abs() < 1e-9);
        assert_eq!(chest_win_chance(1053, 1000), CHEST_MAX_CHANCE);
        assert_eq!(chest_win_chance(500, 0), 0.0);
        assert_eq!(chest_win_chance(0, 0), 0.0);
        assert_eq!(chest_win_chance(1, 1_000_000_000), CHEST_MIN_CHANCE);
    }

    #[test]
    fn test_cracker_multiplier_table() {
        assert_eq!(cracker_multiplier(1), 5.8);
        assert_eq!(cracker_multiplier(2), 2.9);
        assert_eq!(cracker_multiplier(3), 1.9);
        assert_eq!(cracker_multiplier(4), 1.5);
        assert_eq!(cracker_multiplier(5), 1.2);
        assert_eq!(cracker_multiplier(0), 0.0);
        assert_eq!(cracker_multiplier(6), 0.0);
        assert_eq!(cracker_multiplier(7), 0.0);
    }

    #[test]
    fn test_cracker_payout_uses_table() {
        assert_eq!(cracker_payout(1000, 1), 5800);
        assert_eq!(cracker_payout(1000, 4), 1500);
        assert_eq!(cracker_payout(15, 5), 18);
        assert_eq!(cracker_payout(1000, 6), 0);
    }

    #[test]
    fn test_coin_payout() {
        assert_eq!(coin_payout(1000, 2.0), 2000);
        assert_eq!(coin_payout(1000, 1.95), 1950);
        assert_eq!(coin_payout(1000, 0.0), 0);
        assert_eq!(coin_payout(1000, f64::NAN), 0);
    }

    #[test]
    fn test_coin_draw() {
        let rng = ScriptedRandom::new([ScriptedDraw::Coin(true), ScriptedDraw::Coin(false)]);
        let selection = Selection::Coin { side: CoinSide::Heads };

        let win = draw_outcome(1000, &selection, 2.0, &rng);
        assert!(win.won);
        assert_eq!(win.payout, 2000);

        let loss = draw_outcome(1000, &selection, 2.0, &rng);
        assert!(!loss.won);
        assert_eq!(loss.payout, 0);
        assert_eq!(loss.draw, Draw::Coin { side: CoinSide::Tails });
    }

    #[test]
    fn test_chest_draw_pays_pool() {
        let selection = Selection::Chest {
            items: vec![ChestPick { item_id: "crown".to_string(), value: 1000 }],
        };
        let rng = ScriptedRandom::new([ScriptedDraw::Unit(0.05), ScriptedDraw::Unit(0.5)]);

        let win = draw_outcome(100, &selection, 2.0, &rng);
        assert!(win.won);
        assert_eq!(win.payout, 1000);

        let loss = draw_outcome(100, &selection, 2.0, &rng);
        assert!(!loss.won);
        assert_eq!(loss.payout, 0);
    }

    #[test]
    fn test_cracker_draw() {
        let selection = Selection::Cracker {
            slots: [CrackerSlot::Red, CrackerSlot::Blue].into_iter().collect(),
        };
        // index 4 is Blue, index 1 is Orange
        let rng = ScriptedRandom::new([ScriptedDraw::Index(4), ScriptedDraw::Index(1)]);

        let win = draw_outcome(1000, &selection, 2.0, &rng);
        assert_eq!(win.draw, Draw::Cracker { slot: CrackerSlot::Blue });
        assert_eq!(win.payout, 2900);

        let loss = draw_outcome(1000, &selection, 2.0, &rng);
        assert!(!loss.won);
        assert_eq!(loss.payout, 0);
    }
}
