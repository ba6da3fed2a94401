//! Text field annotations placed on a flow canvas

use serde::{Deserialize, Serialize};

use crate::capabilities::GraphElement;
use crate::document::{Document, Rect};
use crate::error::Result;
use crate::events::FlowEvent;
use crate::ids::{generate_uuid, FlowId, TextFieldId};

/// Stacking change for [`Document::change_text_field_order`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFieldOrder {
    Front,
    Forward,
    Backward,
    Back,
}

#[derive(Debug, Clone)]
pub struct TextField {
    pub(crate) id: TextFieldId,
    pub(crate) uuid: String,
    pub(crate) flow: FlowId,
    pub(crate) rect: Rect,
    pub(crate) text: String,
    pub(crate) color: String,
}

impl TextField {
    pub fn id(&self) -> TextFieldId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn color(&self) -> &str {
        &self.color
    }
}

impl GraphElement for TextField {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        Some(self.flow)
    }
}

impl Document {
    pub fn create_text_field(&mut self, flow: FlowId, rect: Rect, text: impl Into<String>) -> Result<TextFieldId> {
        self.flow(flow)?;
        let id = TextFieldId(self.next_id());
        self.text_fields.insert(
            id,
            TextField {
                id,
                uuid: generate_uuid(),
                flow,
                rect,
                text: text.into(),
                color: String::from("yellow"),
            },
        );
        self.flow_mut(flow)?.text_fields.push(id);
        self.emit(FlowEvent::TextFieldCreated { flow, text_field: id });
        Ok(id)
    }

    pub fn remove_text_field(&mut self, text_field: TextFieldId) -> Result<()> {
        let flow = self.text_field(text_field)?.flow;
        self.flow_mut(flow)?.text_fields.retain(|t| *t != text_field);
        self.text_fields.remove(&text_field);
        self.emit(FlowEvent::TextFieldRemoved { flow, text_field });
        Ok(())
    }

    pub fn set_text_field_text(&mut self, text_field: TextFieldId, text: impl Into<String>) -> Result<()> {
        self.text_field_mut(text_field)?.text = text.into();
        Ok(())
    }

    pub fn set_text_field_rect(&mut self, text_field: TextFieldId, rect: Rect) -> Result<()> {
        self.text_field_mut(text_field)?.rect = rect;
        Ok(())
    }

    pub fn set_text_field_color(&mut self, text_field: TextFieldId, color: impl Into<String>) -> Result<()> {
        self.text_field_mut(text_field)?.color = color.into();
        Ok(())
    }

    /// Move a text field in the stacking order. The flow's list runs from
    /// back to front.
    pub fn change_text_field_order(&mut self, text_field: TextFieldId, order: TextFieldOrder) -> Result<()> {
        let flow = self.text_field(text_field)?.flow;
        let fields = &mut self.flow_mut(flow)?.text_fields;
        let Some(index) = fields.iter().position(|t| *t == text_field) else {
            return Ok(());
        };
        let last = fields.len() - 1;
        match order {
            TextFieldOrder::Front => {
                let id = fields.remove(index);
                fields.push(id);
            }
            TextFieldOrder::Back => {
                let id = fields.remove(index);
                fields.insert(0, id);
            }
            TextFieldOrder::Forward if index < last => fields.swap(index, index + 1),
            TextFieldOrder::Backward if index > 0 => fields.swap(index, index - 1),
            TextFieldOrder::Forward | TextFieldOrder::Backward => {}
        }
        Ok(())
    }
}
