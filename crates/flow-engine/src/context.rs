//! Per-document services
//!
//! [`DocumentContext`] bundles everything one open document shares across
//! its flows: configuration, filename allocation, event delivery, the
//! outbox of requests for the external executor and the type inference
//! state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::datatype::{GenericIdSupply, TypeAliases};
use crate::events::{EventSink, FlowEvent};
use crate::filenames::{FilenameAllocator, SessionFilenames};
use crate::ids::{generate_uuid, Executable, PortId};

/// Work the core hands to the external executor
///
/// Results come back through `validate_done`, `set_done` and `abort_done`
/// on the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", content = "target", rename_all = "snake_case")]
pub enum HostRequest {
    Validate(Executable),
    /// Execute the listed executables in order
    Execute(Vec<Executable>),
    Abort(Executable),
}

pub struct DocumentContext {
    pub(crate) config: EngineConfig,
    pub(crate) filenames: Box<dyn FilenameAllocator>,
    sinks: Vec<Arc<dyn EventSink>>,
    requests: Vec<HostRequest>,
    pub(crate) generic_ids: GenericIdSupply,
    pub(crate) aliases: TypeAliases,
    /// Connections made during a delayed inference transaction
    pub(crate) delayed: Option<Vec<(PortId, Option<PortId>)>>,
    namespace_uuid: String,
}

impl fmt::Debug for DocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentContext")
            .field("config", &self.config)
            .field("sinks", &self.sinks.len())
            .field("requests", &self.requests)
            .field("namespace_uuid", &self.namespace_uuid)
            .finish()
    }
}

impl DocumentContext {
    /// Context allocating filenames below `config.session_folder`
    pub fn new(config: EngineConfig) -> Self {
        let filenames = Box::new(SessionFilenames::new(config.session_folder.clone()));
        Self::with_filenames(config, filenames)
    }

    pub fn with_filenames(config: EngineConfig, filenames: Box<dyn FilenameAllocator>) -> Self {
        Self {
            config,
            filenames,
            sinks: Vec::new(),
            requests: Vec::new(),
            generic_ids: GenericIdSupply::new(),
            aliases: TypeAliases::new(),
            delayed: None,
            namespace_uuid: generate_uuid(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn namespace_uuid(&self) -> &str {
        &self.namespace_uuid
    }

    pub fn aliases(&self) -> &TypeAliases {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut TypeAliases {
        &mut self.aliases
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Deliver an event to every sink. Failures are logged and dropped.
    pub(crate) fn emit(&self, event: FlowEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event.clone()) {
                log::warn!("Failed to deliver {:?}: {}", event, e);
            }
        }
    }

    pub(crate) fn request(&mut self, request: HostRequest) {
        log::debug!("Queued host request {:?}", request);
        self.requests.push(request);
    }

    /// Drop the abort requests queued after the first `from` requests.
    pub(crate) fn discard_aborts_since(&mut self, from: usize) {
        let mut index = 0;
        self.requests.retain(|request| {
            index += 1;
            index <= from || !matches!(request, HostRequest::Abort(_))
        });
    }

    pub fn pending_requests(&self) -> &[HostRequest] {
        &self.requests
    }

    /// Drain the outbox.
    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        std::mem::take(&mut self.requests)
    }

    pub(crate) fn in_delayed_inference(&self) -> bool {
        self.delayed.is_some()
    }
}
