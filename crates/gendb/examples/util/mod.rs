//! Helpers shared by the `gendb` demos.

use std::{fmt, time::Duration};

/// Time an expression and print how long it took.
pub mod timeit {
    macro_rules! timeit {
        ($name:expr, $code:expr) => {{
            use util::DisplayDuration;
            let start = std::time::Instant::now();
            let r = $code;
            println!("⏱  {}: {}", $name, DisplayDuration(start.elapsed()));
            r
        }};
    }

    pub(crate) use timeit;
}

/// A duration printed in μs, ms or s, whichever keeps the value readable.
pub struct DisplayDuration(pub Duration);

impl fmt::Display for DisplayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.0.as_micros();
        match micros {
            0..=999 => write!(f, "{micros} μs"),
            1_000..=999_999 => write!(f, "{:.1} ms", micros as f64 / 1e3),
            _ => write!(f, "{:.2} s", self.0.as_secs_f64()),
        }
    }
}

/// Generate a random genotype table of `num_columns` columns of `num_rows`
/// values in {0, 1, 2}.
pub fn generate_genotypes(num_rows: usize, num_columns: usize) -> Vec<Vec<u64>> {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..num_columns)
        .map(|_| (0..num_rows).map(|_| rng.random_range(0..3)).collect())
        .collect()
}
