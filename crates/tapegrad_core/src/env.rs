/// Runtime flags consumed by the engine.
///
/// `is_test` and `prod` gate the cost of extra bookkeeping: leak checking only
/// runs in test mode outside production builds, and override warnings are
/// silenced in production.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvFlags {
    pub is_test: bool,
    pub prod: bool,
    pub debug: bool,
    pub check_computation_for_errors: bool,
}

pub const ENV_IS_TEST: &str = "TAPEGRAD_IS_TEST";
pub const ENV_PROD: &str = "TAPEGRAD_PROD";
pub const ENV_DEBUG: &str = "TAPEGRAD_DEBUG";
pub const ENV_CHECK_COMPUTATION: &str = "TAPEGRAD_CHECK_COMPUTATION";

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl EnvFlags {
    pub fn from_process_env() -> Self {
        Self {
            is_test: env_bool(ENV_IS_TEST),
            prod: env_bool(ENV_PROD),
            debug: env_bool(ENV_DEBUG),
            check_computation_for_errors: env_bool(ENV_CHECK_COMPUTATION),
        }
    }

    /// Flags for test runs: leak checking on.
    pub fn test() -> Self {
        Self {
            is_test: true,
            ..Self::default()
        }
    }

    pub fn with_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn with_prod(mut self, prod: bool) -> Self {
        self.prod = prod;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_check_computation(mut self, check: bool) -> Self {
        self.check_computation_for_errors = check;
        self
    }

    pub fn leak_checking(&self) -> bool {
        self.is_test && !self.prod
    }

    pub fn warn_on_override(&self) -> bool {
        !self.prod
    }
}
