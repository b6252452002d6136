//! Stored surrogate models

use serde::{Deserialize, Serialize};

use crate::table::SourceId;

/// Metamodel id; doubles as the measure source id of its outputs
pub type MetamodelId = SourceId;

/// A serialized surrogate model. The payload format belongs to whoever
/// trains the model; the store keeps the bytes verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metamodel {
    /// Id the model already carries, used when a write gives none
    #[serde(default)]
    pub metamodel_id: Option<MetamodelId>,
    #[serde(default)]
    pub name: String,
    pub payload: Vec<u8>,
}

impl Metamodel {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            metamodel_id: None,
            name: String::new(),
            payload: payload.into(),
        }
    }

    pub fn with_id(mut self, id: MetamodelId) -> Self {
        self.metamodel_id = Some(id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
