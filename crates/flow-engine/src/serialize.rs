//! Dictionary form of a flow for persistence and execution manifests
//!
//! Loading is handled by the persistence layer; this module only produces
//! the nested shapes.

use serde::{Deserialize, Serialize};

use crate::capabilities::HasPorts;
use crate::document::Document;
use crate::error::Result;
use crate::ids::{ConnectionId, Executable, FlowId, FlowIoId, NodeId, PortId, TextFieldId};
use crate::port::PortOwner;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDict {
    pub uuid: String,
    pub label: String,
    pub cls: String,
    pub x: f64,
    pub y: f64,
    pub is_locked: bool,
    pub broken_link: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub ports: PortsDict,
    #[serde(default)]
    pub nodes: Vec<NodeDict>,
    #[serde(default)]
    pub flows: Vec<FlowDict>,
    #[serde(default)]
    pub connections: Vec<ConnectionDict>,
    #[serde(default)]
    pub text_fields: Vec<TextFieldDict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortsDict {
    pub inputs: Vec<PortDict>,
    pub outputs: Vec<PortDict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDict {
    pub id: String,
    pub uuid: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub parameters: serde_json::Value,
    pub ports: PortsDict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchical_uuid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDict {
    pub uuid: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub datatype: String,
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Parent port uuid of a flow input or output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDict {
    pub uuid: String,
    #[serde(rename = "type")]
    pub datatype: String,
    pub source: PortRefDict,
    pub destination: PortRefDict,
    pub route: Vec<RoutePointDict>,
}

/// Port addressed through the uuid of its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRefDict {
    pub node: String,
    pub port: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePointDict {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFieldDict {
    pub uuid: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: String,
    pub color: String,
}

#[derive(Clone, Copy)]
struct DictOptions {
    /// Namespace-joined uuids, hierarchical uuids
    execute: bool,
    /// No filenames or states
    copy: bool,
}

impl Document {
    /// Nested mapping of `flow`. With `stub` only the flow's own fields and
    /// ports are included.
    pub fn to_dict(&self, flow: FlowId, execute: bool, stub: bool) -> Result<FlowDict> {
        self.flow_dict(flow, DictOptions { execute, copy: false }, stub)
    }

    /// Mapping for copy and paste, without filenames and states.
    pub fn to_copy_dict(&self, flow: FlowId) -> Result<FlowDict> {
        self.flow_dict(flow, DictOptions { execute: false, copy: true }, false)
    }

    fn dict_uuid(&self, uuid: &str, options: DictOptions) -> String {
        if options.execute {
            self.full_uuid(uuid)
        } else {
            uuid.to_string()
        }
    }

    fn dict_state(&self, executable: Executable, options: DictOptions) -> Option<String> {
        if options.copy {
            return None;
        }
        self.state_string(executable).ok()
    }

    fn flow_dict(&self, flow: FlowId, options: DictOptions, stub: bool) -> Result<FlowDict> {
        let f = self.flow(flow)?;
        let ports = PortsDict {
            inputs: f
                .flow_inputs()
                .iter()
                .map(|io| self.flow_io_dict(*io, options))
                .collect::<Result<_>>()?,
            outputs: f
                .flow_outputs()
                .iter()
                .map(|io| self.flow_io_dict(*io, options))
                .collect::<Result<_>>()?,
        };
        let mut dict = FlowDict {
            uuid: self.dict_uuid(&f.uuid, options),
            label: f.name.clone(),
            cls: if f.is_lambda() { "Lambda" } else { "Flow" }.to_string(),
            x: f.position.x,
            y: f.position.y,
            is_locked: f.locked,
            broken_link: f.broken_link,
            state: if f.parent.is_some() {
                self.dict_state(Executable::Flow(flow), options)
            } else {
                None
            },
            ports,
            nodes: Vec::new(),
            flows: Vec::new(),
            connections: Vec::new(),
            text_fields: Vec::new(),
        };
        if stub {
            return Ok(dict);
        }

        dict.nodes = f.nodes().iter().map(|n| self.node_dict(*n, options)).collect::<Result<_>>()?;
        dict.flows = f
            .subflows()
            .iter()
            .map(|s| self.flow_dict(*s, options, false))
            .collect::<Result<_>>()?;
        dict.connections = f
            .connections()
            .iter()
            .map(|c| self.connection_dict(*c, options))
            .collect::<Result<_>>()?;
        dict.text_fields = f
            .text_fields()
            .iter()
            .map(|t| self.text_field_dict(*t, options))
            .collect::<Result<_>>()?;
        Ok(dict)
    }

    fn node_dict(&self, node: NodeId, options: DictOptions) -> Result<NodeDict> {
        let n = self.node(node)?;
        let executable = Executable::Node(node);
        Ok(NodeDict {
            id: n.identifier().to_string(),
            uuid: self.dict_uuid(&n.uuid, options),
            label: n.name.clone(),
            x: n.position.x,
            y: n.position.y,
            parameters: n.parameters.clone(),
            ports: PortsDict {
                inputs: self.port_dicts(n.input_ports(), options)?,
                outputs: self.port_dicts(n.output_ports(), options)?,
            },
            state: self.dict_state(executable, options),
            hierarchical_uuid: if options.execute {
                Some(self.hierarchical_uuid(executable)?)
            } else {
                None
            },
        })
    }

    fn port_dicts(&self, ports: &[PortId], options: DictOptions) -> Result<Vec<PortDict>> {
        ports
            .iter()
            .enumerate()
            .map(|(index, port)| self.port_dict(*port, index, options))
            .collect()
    }

    fn port_dict(&self, port: PortId, index: usize, options: DictOptions) -> Result<PortDict> {
        let p = self.port(port)?;
        let filename = (!options.copy && !p.filename.is_empty()).then(|| p.filename.clone());
        Ok(PortDict {
            uuid: self.dict_uuid(&p.uuid, options),
            name: p.name().to_string(),
            description: p.description().to_string(),
            datatype: p.datatype().to_string(),
            index,
            filename,
            parent: None,
        })
    }

    fn flow_io_dict(&self, flow_io: FlowIoId, options: DictOptions) -> Result<PortDict> {
        let io = self.flow_io(flow_io)?;
        let f = self.flow(io.flow())?;
        let index = f
            .flow_inputs()
            .iter()
            .chain(f.flow_outputs())
            .filter(|other| self.flow_io(**other).map(|o| o.kind() == io.kind()).unwrap_or(false))
            .position(|other| *other == flow_io)
            .unwrap_or_default();
        let mut dict = self.port_dict(io.port(), index, options)?;
        dict.uuid = self.dict_uuid(&io.uuid, options);
        dict.parent = match io.parent_port() {
            Some(parent) => Some(self.dict_uuid(&self.port(parent)?.uuid, options)),
            None => None,
        };
        Ok(dict)
    }

    fn port_ref(&self, port: PortId, options: DictOptions) -> Result<PortRefDict> {
        let p = self.port(port)?;
        let owner = match p.owner() {
            PortOwner::Node(id) => &self.node(id)?.uuid,
            PortOwner::Flow(id) => &self.flow(id)?.uuid,
            PortOwner::FlowIo(id) => &self.flow_io(id)?.uuid,
        };
        Ok(PortRefDict {
            node: self.dict_uuid(owner, options),
            port: self.dict_uuid(&p.uuid, options),
        })
    }

    fn connection_dict(&self, connection: ConnectionId, options: DictOptions) -> Result<ConnectionDict> {
        let c = self.connection(connection)?;
        Ok(ConnectionDict {
            uuid: self.dict_uuid(&c.uuid, options),
            datatype: self.port(c.source())?.datatype().to_string(),
            source: self.port_ref(c.source(), options)?,
            destination: self.port_ref(c.destination(), options)?,
            route: c
                .route_points()
                .iter()
                .map(|p| RoutePointDict { x: p.x, y: p.y })
                .collect(),
        })
    }

    fn text_field_dict(&self, text_field: TextFieldId, options: DictOptions) -> Result<TextFieldDict> {
        let t = self.text_field(text_field)?;
        Ok(TextFieldDict {
            uuid: self.dict_uuid(&t.uuid, options),
            x: t.rect.x,
            y: t.rect.y,
            width: t.rect.width,
            height: t.rect.height,
            text: t.text.clone(),
            color: t.color.clone(),
        })
    }
}
