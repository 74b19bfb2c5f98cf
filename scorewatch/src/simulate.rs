// scorewatch/src/simulate.rs
//
// Synthetic prediction table for demos and load testing.
//
// Shape of the data:
//   - a handful of accounts with different base rates of electronics
//   - dates spread over 2023-01-01 .. 2023-06-30, ~1% unparseable
//   - training_score separates the classes well
//   - prod_score starts like training_score and drifts down for positives
//     as the months go by, so the monitoring tab has something to show

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Dataset, Record};

pub const ACCOUNTS: &[(&str, f64)] = &[
    ("Abernathy, Reichel and Murray", 0.55),
    ("Berge & Berge",                  0.30),
    ("Fritsch & Fritsch",              0.70),
    ("Hintz, Jerde and Collier",       0.45),
    ("Wolff Ltd",                      0.20),
];

const ELECTRONICS: &[&str] = &[
    "USB-C charging cable 2m", "Noise cancelling headphones", "27 inch monitor",
    "Mechanical keyboard", "Wireless mouse", "Portable SSD 1TB", "Smart plug",
    "Bluetooth speaker", "HDMI switch", "Laptop stand with hub",
];

const OTHER: &[&str] = &[
    "Cast iron skillet", "Wool socks, 3 pack", "Garden hose 15m", "Yoga mat",
    "Ceramic teapot", "Hardcover notebook", "Stainless water bottle",
    "Linen tea towel", "Dog leash", "Scented candle",
];

fn clamp01(x: f64) -> f64 { x.clamp(0.0, 1.0) }

/// Sum of uniforms, roughly normal around 0 with the given spread.
fn noise(rng: &mut StdRng, spread: f64) -> f64 {
    let s: f64 = (0..4).map(|_| rng.gen::<f64>() - 0.5).sum();
    s * spread
}

pub fn generate(rows: usize, seed: u64) -> Dataset {
    let mut rng  = StdRng::seed_from_u64(seed);
    let start    = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap_or_default();
    let span     = 180i64;

    let records = (0..rows).map(|i| {
        let (account, base_rate) = ACCOUNTS[rng.gen_range(0..ACCOUNTS.len())];
        let is_electronics = rng.gen_bool(base_rate);
        let day  = rng.gen_range(0..span);
        let date = start + Duration::days(day);
        let date_raw = if rng.gen_bool(0.01) {
            "unknown".to_string()
        } else {
            format!("{} {:02}:{:02}:00", date, rng.gen_range(0..24), rng.gen_range(0..60))
        };

        let pool = if is_electronics { ELECTRONICS } else { OTHER };
        let text = pool[rng.gen_range(0..pool.len())].to_string();

        let centre   = if is_electronics { 0.75 } else { 0.25 };
        let training = clamp01(centre + noise(&mut rng, 0.35));
        let drift    = if is_electronics { -0.25 * day as f64 / span as f64 } else { 0.0 };
        let prod     = clamp01(centre + drift + noise(&mut rng, 0.40));

        Record::new((i + 1).to_string(), account, &date_raw)
            .with_text(text)
            .with_scores((training * 1e4).round() / 1e4, (prod * 1e4).round() / 1e4)
            .with_truth(is_electronics)
    }).collect();

    Dataset::new(records)
}
