//! Error handling for the port graph
//!
//! Three families with different lifecycles: [`PortError`] is an API fault
//! returned straight to the caller and never accumulated; metadata
//! diagnostics ([`crate::metadata::MetadataError`]) are accumulated per port
//! during the dry-run pass; [`DataError`] and [`ProcessError`] belong to the
//! data pass.

use thiserror::Error;

/// Wiring and container misuse.
#[derive(Error, Debug)]
pub enum PortError {
    /// Connect was asked to rewire a port that already has a counterpart.
    #[error("Port '{port}' is already connected")]
    AlreadyConnected { port: String },

    /// Disconnect (or a connection query) hit an unconnected port.
    #[error("Port '{port}' is not connected")]
    NotConnected { port: String },

    /// Connections run from an output to an input, never any other pairing.
    #[error("Cannot connect '{from}' to '{to}': connections run output to input")]
    Direction { from: String, to: String },

    /// Both ends of a connection must live in the same subprocess scope.
    #[error("Ports '{from}' and '{to}' live in different connection contexts")]
    CrossContext { from: String, to: String },

    /// The connection would make the operator order within the unit circular.
    #[error("Connecting '{from}' to '{to}' would create a cycle")]
    CycleDetected { from: String, to: String },

    /// Port names are unique within their container at all times.
    #[error("Port name '{name}' is already taken")]
    DuplicateName { name: String },

    /// The port exists but belongs to a different container.
    #[error("Port '{port}' does not belong to this container")]
    ForeignPort { port: String },

    /// Operator names are unique within the whole graph.
    #[error("Operator name '{name}' is already taken")]
    DuplicateOperator { name: String },

    #[error("Port '{port}' is an input port; only output ports deliver")]
    DeliverOnInput { port: String },

    #[error("Port '{port}' is an output port; only input ports receive")]
    ReceiveOnOutput { port: String },

    /// The root operator anchors the graph and cannot be removed.
    #[error("The root operator cannot be removed")]
    RootOperator,

    /// Name-based port lookup found nothing.
    #[error("No port named '{name}'")]
    UnknownPort { name: String },

    /// Pair groups span one input-direction and one output-direction bank.
    #[error("Port group '{group}' needs an input bank and an output bank")]
    BankDirection { group: String },

    /// The operation needs input/output pairs the group does not manage.
    #[error("Port group '{name}' manages no input/output pairs")]
    NotPaired { name: String },

    /// A collect/reset call reached a port group that does not accumulate.
    #[error("Port group '{name}' does not collect")]
    NotCollecting { name: String },

    /// Generational miss: the handle outlived the slot it pointed at.
    #[error("Stale or unknown {kind} handle")]
    Stale { kind: &'static str },
}

pub type PortResult<T> = std::result::Result<T, PortError>;

/// Data-pass failures raised by operator logic or typed fetches.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data at port '{port}'")]
    Missing { port: String },

    #[error("Port '{port}' holds {found}, expected {requested}")]
    WrongKind {
        port: String,
        requested: &'static str,
        found: &'static str,
    },

    /// The payload advertised a conversion to the requested type but
    /// produced something else.
    #[error("Data at port '{port}' could not be converted to {requested}")]
    NotConvertible {
        port: String,
        requested: &'static str,
    },
}

/// Run-level failures of the two-phase engine.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The metadata pass left Error-severity diagnostics; the data pass
    /// refuses to start graph-wide.
    #[error("Metadata pass reported {errors} blocking error(s); refusing to execute")]
    Blocked { errors: usize },

    /// One operator's logic failed; the run halts, earlier results stand.
    #[error("Operator '{operator}' failed: {source}")]
    OperatorFailed {
        operator: String,
        #[source]
        source: DataError,
    },

    /// A data error not yet attributed to an operator. The engine rewraps
    /// it as [`ProcessError::OperatorFailed`] at the operator boundary.
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Port(#[from] PortError),
}

/// Configuration load/save failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
