//! Additional-attribute filtering.
//!
//! A filter decides which caller supplied attributes (and software statement
//! claims) become service provider properties, and which stored properties
//! are echoed back in responses.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::dcr::types::{
    AdditionalAttributes, Claims, RegistrationRequest, ServiceProvider, ServiceProviderProperty,
    UpdateRequest,
};
use crate::errors::DcrmError;

/// Filtered attribute values, kept as JSON until written as properties.
pub type Attributes = HashMap<String, Value>;

pub trait AdditionalAttributeFilter: Send + Sync {
    fn filter_register_attributes(
        &self,
        request: &RegistrationRequest,
        claims: Option<&Claims>,
    ) -> Result<Attributes, DcrmError>;

    fn filter_update_attributes(
        &self,
        request: &UpdateRequest,
        claims: Option<&Claims>,
        existing: &[ServiceProviderProperty],
    ) -> Result<Attributes, DcrmError>;

    /// Property names that may be returned to callers.
    fn response_attribute_keys(&self) -> Vec<String>;

    fn process_get_attributes(&self, attributes: Attributes) -> Attributes;
}

/// Copy filtered attributes onto the service provider. On update existing
/// values are overwritten, on create they are kept.
pub fn add_sp_properties(attributes: &Attributes, sp: &mut ServiceProvider, update: bool) {
    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();
    for name in names {
        let value = value_to_property(&attributes[name]);
        if update {
            sp.upsert_property(name, value);
        } else {
            sp.insert_property(name, value);
        }
    }
}

/// Restrict attributes to the keys the filter allows in responses.
pub fn response_attributes(
    filter: &dyn AdditionalAttributeFilter,
    attributes: &Attributes,
) -> AdditionalAttributes {
    let keys: HashSet<String> = filter.response_attribute_keys().into_iter().collect();
    attributes
        .iter()
        .filter(|(name, _)| keys.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Stored properties that are visible in a read, after the filter post
/// processed them.
pub fn stored_response_attributes(
    filter: &dyn AdditionalAttributeFilter,
    sp: &ServiceProvider,
) -> AdditionalAttributes {
    let keys: HashSet<String> = filter.response_attribute_keys().into_iter().collect();
    let stored: Attributes = sp
        .properties
        .iter()
        .filter(|property| keys.contains(&property.name))
        .map(|property| (property.name.clone(), Value::String(property.value.clone())))
        .collect();
    filter.process_get_attributes(stored)
}

/// Filter that admits a fixed set of attribute names, taken from the
/// request's additional attributes or, failing that, from statement claims.
#[derive(Debug, Clone, Default)]
pub struct KeyListAttributeFilter {
    keys: Vec<String>,
}

impl KeyListAttributeFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    fn select(&self, attributes: &AdditionalAttributes, claims: Option<&Claims>) -> Attributes {
        self.keys
            .iter()
            .filter_map(|key| {
                attributes
                    .get(key)
                    .or_else(|| claims.and_then(|claims| claims.get(key)))
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect()
    }
}

impl AdditionalAttributeFilter for KeyListAttributeFilter {
    fn filter_register_attributes(
        &self,
        request: &RegistrationRequest,
        claims: Option<&Claims>,
    ) -> Result<Attributes, DcrmError> {
        Ok(self.select(&request.additional_attributes, claims))
    }

    fn filter_update_attributes(
        &self,
        request: &UpdateRequest,
        claims: Option<&Claims>,
        _existing: &[ServiceProviderProperty],
    ) -> Result<Attributes, DcrmError> {
        Ok(self.select(&request.additional_attributes, claims))
    }

    fn response_attribute_keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn process_get_attributes(&self, attributes: Attributes) -> Attributes {
        attributes
    }
}

fn value_to_property(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}
