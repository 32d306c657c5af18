use std::env;
use std::str::FromStr;

/// Machine limits and knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of cons cells.
    pub heap_cells: usize,
    /// Allocations between collection cycles.
    pub gc_threshold: usize,
    /// Step budget per top-level evaluation; `u64::MAX` for no limit.
    pub max_steps: u64,
    /// Seed for the `random` foreign group; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_cells: 16_000_000,
            gc_threshold: 64 * 1024,
            max_steps: u64::MAX,
            seed: None,
        }
    }
}

impl Config {
    /// Defaults overridden by `LYSP_HEAP_CELLS`, `LYSP_GC_THRESHOLD`,
    /// `LYSP_MAX_STEPS` and `LYSP_SEED`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            heap_cells: var_or("LYSP_HEAP_CELLS", defaults.heap_cells),
            gc_threshold: var_or("LYSP_GC_THRESHOLD", defaults.gc_threshold),
            max_steps: var_or("LYSP_MAX_STEPS", defaults.max_steps),
            seed: env::var("LYSP_SEED").ok().and_then(|v| v.trim().parse().ok()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_heap_cells(mut self, heap_cells: usize) -> Self {
        self.heap_cells = heap_cells;
        self
    }

    pub fn with_gc_threshold(mut self, gc_threshold: usize) -> Self {
        self.gc_threshold = gc_threshold;
        self
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = Config::default()
            .with_seed(7)
            .with_max_steps(1000)
            .with_heap_cells(64)
            .with_gc_threshold(16);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_steps, 1000);
        assert_eq!(config.heap_cells, 64);
        assert_eq!(config.gc_threshold, 16);
    }

    #[test]
    fn unparseable_values_fall_back() {
        assert_eq!(var_or("LYSP_TEST_SURELY_UNSET_VARIABLE", 42usize), 42);
    }
}
