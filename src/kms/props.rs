//! DRM property resolution.
//!
//! Property ids are handed out dynamically by the kernel and are not stable
//! across objects, so they must never be hard-coded. Each lookup goes through
//! a [`PropertyTable`] queried fresh for the object at hand; name comparison
//! is exact and case-sensitive.

use drm::control::{connector, crtc, plane, property, Device as ControlDevice};

use super::device::Card;
use super::{KmsError, KmsResult};

/// A KMS object that carries properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsObject {
    Connector(connector::Handle),
    Crtc(crtc::Handle),
    Plane(plane::Handle),
}

/// One object's property table: name to (handle, current value).
#[derive(Debug)]
pub struct PropertyTable {
    object: KmsObject,
    entries: Vec<PropertyEntry>,
}

#[derive(Debug)]
pub struct PropertyEntry {
    pub name: String,
    pub handle: property::Handle,
    pub value: property::RawValue,
}

impl PropertyTable {
    /// Query the full property list of `object`.
    ///
    /// Properties whose info cannot be fetched or whose name is not valid
    /// UTF-8 are skipped rather than failing the whole table.
    pub fn query(card: &Card, object: KmsObject) -> KmsResult<Self> {
        let props = match object {
            KmsObject::Connector(handle) => card.get_properties(handle),
            KmsObject::Crtc(handle) => card.get_properties(handle),
            KmsObject::Plane(handle) => card.get_properties(handle),
        }
        .map_err(KmsError::ResourceUnavailable)?;

        let mut entries = Vec::new();
        for (&handle, &value) in props.iter() {
            let Ok(info) = card.get_property(handle) else {
                continue;
            };
            let Ok(name) = info.name().to_str() else {
                continue;
            };
            entries.push(PropertyEntry {
                name: name.to_owned(),
                handle,
                value,
            });
        }

        Ok(Self { object, entries })
    }

    /// Resolve a property name to its id.
    pub fn id(&self, name: &str) -> KmsResult<property::Handle> {
        self.find(name).map(|entry| entry.handle)
    }

    /// Resolve a property name to its current raw value.
    pub fn value(&self, name: &str) -> KmsResult<property::RawValue> {
        self.find(name).map(|entry| entry.value)
    }

    fn find(&self, name: &str) -> KmsResult<&PropertyEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| KmsError::PropertyNotFound {
                object: self.object,
                name: name.to_owned(),
            })
    }

    #[cfg(test)]
    pub(crate) fn synthetic(object: KmsObject, entries: &[(&str, u32, u64)]) -> Self {
        use std::num::NonZeroU32;

        let entries = entries
            .iter()
            .map(|&(name, id, value)| PropertyEntry {
                name: name.to_owned(),
                handle: property::Handle::from(NonZeroU32::new(id).unwrap()),
                value,
            })
            .collect();
        Self { object, entries }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;

    fn plane_object() -> KmsObject {
        KmsObject::Plane(plane::Handle::from(NonZeroU32::new(31).unwrap()))
    }

    fn table() -> PropertyTable {
        PropertyTable::synthetic(
            plane_object(),
            &[("FB_ID", 17, 0), ("CRTC_ID", 20, 0), ("type", 8, 1)],
        )
    }

    #[test]
    fn id_returns_the_stored_handle() {
        let table = table();
        assert_eq!(
            table.id("CRTC_ID").unwrap(),
            property::Handle::from(NonZeroU32::new(20).unwrap())
        );
        assert_eq!(table.value("type").unwrap(), 1);
    }

    #[test]
    fn missing_name_is_property_not_found() {
        let err = table().id("IN_FORMATS").unwrap_err();
        match err {
            KmsError::PropertyNotFound { object, name } => {
                assert_eq!(object, plane_object());
                assert_eq!(name, "IN_FORMATS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn lookup_is_case_sensitive() {
        assert!(matches!(
            table().id("fb_id"),
            Err(KmsError::PropertyNotFound { .. })
        ));
        assert!(matches!(
            table().value("Type"),
            Err(KmsError::PropertyNotFound { .. })
        ));
    }
}
