//! Frozen per-interpreter configuration
//!
//! Set once at interpreter creation and never mutated afterward, mirroring
//! `PyConfig`'s role once `Py_InitializeFromConfig` has run. This crate only
//! carries the fields that other modules in scope actually consult
//! (recursion budgets); the rest are kept as inert metadata an embedder
//! would otherwise populate.

#[derive(Debug, Clone)]
pub struct Config {
    pub module_search_paths: Vec<String>,
    pub recursion_limit: i32,
    pub c_recursion_limit: i32,
    pub dev_mode: bool,
    pub isolated: bool,
}

impl Config {
    pub fn recursion_limits(&self) -> (i32, i32) {
        (self.recursion_limit, self.c_recursion_limit)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            module_search_paths: Vec::new(),
            // Matches CPython's default `sys.getrecursionlimit()`.
            recursion_limit: 1000,
            // Matches CPython's default C-stack recursion budget.
            c_recursion_limit: 1500,
            dev_mode: false,
            isolated: false,
        }
    }
}

impl From<&crate::preconfig::PreConfig> for Config {
    fn from(pre: &crate::preconfig::PreConfig) -> Self {
        Self {
            dev_mode: pre.dev_mode,
            isolated: pre.isolated,
            ..Default::default()
        }
    }
}
