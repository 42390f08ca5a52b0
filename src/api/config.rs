//! Heap proxy configuration.

use crate::diagnostics::strict::StrictMode;
use crate::util::size::{kb, mb, parse_bytes};

/// Largest redzone a heap accepts.
pub const MAX_REDZONE_SIZE: usize = kb(4);

/// Where quarantine budget enforcement runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimMode {
    /// The freeing thread evicts before `free()` returns.
    #[default]
    Inline,
    /// The freeing thread only signals; the manager's worker evicts.
    Deferred,
}

impl TrimMode {
    /// Parse `inline` / `deferred`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "inline" | "sync" => Some(Self::Inline),
            "deferred" | "async" | "background" => Some(Self::Deferred),
            _ => None,
        }
    }
}

/// Configuration for a heap proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Byte budget of the quarantine (default: 16 MB)
    pub quarantine_size: usize,

    /// Size of each redzone, rounded up to 16 bytes (default: 16, at most
    /// [`MAX_REDZONE_SIZE`])
    pub redzone_size: usize,

    /// Inline or deferred trimming
    pub trim_mode: TrimMode,

    /// Fill freed user regions with 0xCD and check them on eviction
    pub poison_freed: bool,

    /// Check redzones and footer when a block is freed
    pub check_on_free: bool,

    /// Per-heap strict mode; `None` follows the global setting
    pub strict: Option<StrictMode>,

    /// Record allocation/free stacks (needs the `debug` feature)
    pub capture_backtraces: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            quarantine_size: mb(16),
            redzone_size: 16,
            trim_mode: TrimMode::Inline,
            poison_freed: true,
            check_on_free: true,
            strict: None,
            capture_backtraces: cfg!(feature = "debug"),
        }
    }
}

impl ProxyConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            quarantine_size: kb(256),
            redzone_size: 16,
            trim_mode: TrimMode::Inline,
            poison_freed: false,
            check_on_free: true,
            strict: None,
            capture_backtraces: false,
        }
    }

    /// Create a config that favors detection over memory use.
    pub fn high_detection() -> Self {
        Self {
            quarantine_size: mb(256),
            redzone_size: 128,
            trim_mode: TrimMode::Deferred,
            poison_freed: true,
            check_on_free: true,
            strict: None,
            capture_backtraces: cfg!(feature = "debug"),
        }
    }

    /// Read overrides from the environment on top of the defaults.
    ///
    /// - `REDZONE_QUARANTINE_SIZE`: bytes, with optional `k`/`m` suffix
    /// - `REDZONE_REDZONE_SIZE`: bytes, at most [`MAX_REDZONE_SIZE`]
    /// - `REDZONE_TRIM_MODE`: `inline` or `deferred`
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    fn with_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(size) = var("REDZONE_QUARANTINE_SIZE").as_deref().and_then(parse_bytes) {
            self.quarantine_size = size;
        }
        match var("REDZONE_REDZONE_SIZE").as_deref().and_then(parse_bytes) {
            Some(size) if size <= MAX_REDZONE_SIZE => self.redzone_size = size,
            Some(_size) => {
                #[cfg(feature = "log")]
                log::warn!(
                    "REDZONE_REDZONE_SIZE={} exceeds {} bytes, keeping {}",
                    _size,
                    MAX_REDZONE_SIZE,
                    self.redzone_size
                );
            }
            None => {}
        }
        if let Some(mode) = var("REDZONE_TRIM_MODE").as_deref().and_then(TrimMode::parse) {
            self.trim_mode = mode;
        }
        self
    }

    /// Builder pattern: set quarantine budget.
    pub fn with_quarantine_size(mut self, size: usize) -> Self {
        self.quarantine_size = size;
        self
    }

    /// Builder pattern: set redzone size.
    pub fn with_redzone_size(mut self, size: usize) -> Self {
        self.redzone_size = size;
        self
    }

    /// Builder pattern: set trimming mode.
    pub fn with_trim_mode(mut self, mode: TrimMode) -> Self {
        self.trim_mode = mode;
        self
    }

    /// Builder pattern: enable freed-memory poisoning.
    pub fn with_poison(mut self, enable: bool) -> Self {
        self.poison_freed = enable;
        self
    }

    /// Builder pattern: enable check-on-free.
    pub fn with_check_on_free(mut self, enable: bool) -> Self {
        self.check_on_free = enable;
        self
    }

    /// Builder pattern: pin strict mode for this heap.
    pub fn with_strict(mut self, mode: StrictMode) -> Self {
        self.strict = Some(mode);
        self
    }

    /// Builder pattern: record allocation/free stacks.
    pub fn with_backtraces(mut self, enable: bool) -> Self {
        self.capture_backtraces = enable;
        self
    }
}
