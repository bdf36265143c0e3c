//! Workbook-wide configuration (SPEC_FULL §10.3).

/// Default memory ceiling for a workbook's cell-store arenas: 4 GiB (spec §3.4, §5).
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Default deflate compression level for saved ZIP entries (spec §6).
pub const DEFAULT_DEFLATE_LEVEL: u8 = 6;
/// Default resource budget for the advanced task scheduler (spec §4.12).
pub const DEFAULT_RESOURCE_BUDGET_BYTES: u64 = 512 * 1024 * 1024;
/// Default maximum iterations for the (currently unimplemented) iterative solver (spec §4.7).
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
/// Default convergence threshold for the iterative solver (spec §4.7).
pub const DEFAULT_MAX_CHANGE: f64 = 1e-3;

/// Workbook-scoped configuration, built once at construction.
#[derive(Debug, Clone)]
pub struct WorkbookConfig {
    pub memory_ceiling_bytes: u64,
    pub deflate_level: u8,
    pub thread_pool_size: usize,
    pub resource_budget_bytes: u64,
    pub auto_calculate: bool,
    pub iterative: bool,
    pub max_iterations: u32,
    pub max_change: f64,
    pub precision_as_displayed: bool,
    pub date_system_1904: bool,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: DEFAULT_MEMORY_CEILING_BYTES,
            deflate_level: DEFAULT_DEFLATE_LEVEL,
            thread_pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            resource_budget_bytes: DEFAULT_RESOURCE_BUDGET_BYTES,
            auto_calculate: true,
            iterative: false,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_change: DEFAULT_MAX_CHANGE,
            precision_as_displayed: false,
            date_system_1904: false,
        }
    }
}

/// Builder for `WorkbookConfig`, mirroring the teacher's feature-driven construction style.
#[derive(Debug, Clone, Default)]
pub struct WorkbookConfigBuilder {
    config: WorkbookConfig,
}

impl WorkbookConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_ceiling_bytes(mut self, bytes: u64) -> Self {
        self.config.memory_ceiling_bytes = bytes;
        self
    }

    pub fn deflate_level(mut self, level: u8) -> Self {
        self.config.deflate_level = level.min(9);
        self
    }

    pub fn thread_pool_size(mut self, size: usize) -> Self {
        self.config.thread_pool_size = size.max(1);
        self
    }

    pub fn resource_budget_bytes(mut self, bytes: u64) -> Self {
        self.config.resource_budget_bytes = bytes;
        self
    }

    pub fn auto_calculate(mut self, value: bool) -> Self {
        self.config.auto_calculate = value;
        self
    }

    pub fn build(self) -> WorkbookConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = WorkbookConfigBuilder::new()
            .deflate_level(9)
            .memory_ceiling_bytes(1024)
            .build();
        assert_eq!(cfg.deflate_level, 9);
        assert_eq!(cfg.memory_ceiling_bytes, 1024);
    }
}
