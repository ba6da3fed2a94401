//! Engine-wide constants
//!
//! Single source of truth for the defaults used by [`crate::config`] and the
//! builtin node definitions.

pub mod defaults {
    /// Maximum number of ports on one side of a node with numbered ports.
    pub const MAX_NUMBERED_PORTS: usize = 6;

    /// Suffix of data files allocated for output ports.
    pub const DATA_SUFFIX: &str = "sydata";

    /// Directory under the user cache dir holding session data files.
    pub const SESSION_DIR_NAME: &str = "flow-engine/sessions";

    /// Name base of new subflows.
    pub const SUBFLOW_BASE_NAME: &str = "Subflow";

    /// Name base of new lambdas.
    pub const LAMBDA_BASE_NAME: &str = "New Lambda";

    /// Type of ports created without a definition.
    pub const ANY_PORT_TYPE: &str = "<a>";

    /// Port name of flow inputs created without a definition.
    pub const FLOW_INPUT_NAME: &str = "Input";

    /// Port name of flow outputs created without a definition.
    pub const FLOW_OUTPUT_NAME: &str = "Output";

    /// Name of a lambda's function output.
    pub const LAMBDA_OUTPUT_NAME: &str = "Function";
}

/// Identifiers of the builtin node kinds.
pub mod builtin {
    pub const APPLY: &str = "org.sysess.builtin.apply";
    pub const MAP: &str = "org.sysess.builtin.map";
    pub const EXTRACT_LAMBDAS: &str = "org.sysess.builtin.extractlambdas";
    pub const EMPTY: &str = "org.sysess.builtin.empty";
}
