//! Identity keys for GATT operation targets
//!
//! An [`IdentityKey`] names the attribute a request is aimed at. Completion
//! events carry a key of their own, and [`IdentityKey::matches`] decides
//! whether an inbound event answers a pending request.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new DeviceId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Disambiguates attributes that share a UUID on the same device.
///
/// `Unspecified` acts as a wildcard on either side of a comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceId {
    #[default]
    Unspecified,
    Index(u32),
}

impl InstanceId {
    /// Wildcard comparison used for response matching.
    ///
    /// ```
    /// use event_bus::InstanceId;
    ///
    /// assert!(InstanceId::Unspecified.matches(InstanceId::Index(3)));
    /// assert!(InstanceId::Index(3).matches(InstanceId::Unspecified));
    /// assert!(!InstanceId::Index(5).matches(InstanceId::Index(6)));
    /// ```
    pub fn matches(self, other: InstanceId) -> bool {
        match (self, other) {
            (InstanceId::Index(a), InstanceId::Index(b)) => a == b,
            _ => true,
        }
    }
}

impl From<Option<u32>> for InstanceId {
    fn from(index: Option<u32>) -> Self {
        index.map_or(InstanceId::Unspecified, InstanceId::Index)
    }
}

/// Composite key identifying the target of a remote operation.
///
/// `Eq` and `Hash` are structural over every field, which makes the key
/// suitable for caching. Matching a response against a pending request goes
/// through [`IdentityKey::matches`] instead, because instance ids compare as
/// wildcards there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub device_id: DeviceId,
    pub service_id: Uuid,
    /// Primary service that includes `service_id`, for secondary services
    pub parent_service_id: Option<Uuid>,
    pub characteristic_id: Uuid,
    /// Absent for characteristic-level operations
    pub descriptor_id: Option<Uuid>,
    #[serde(default)]
    pub instance_id: InstanceId,
}

impl IdentityKey {
    /// Key for a characteristic-level operation
    pub fn characteristic(
        device_id: impl Into<DeviceId>,
        service_id: Uuid,
        characteristic_id: Uuid,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            service_id,
            parent_service_id: None,
            characteristic_id,
            descriptor_id: None,
            instance_id: InstanceId::Unspecified,
        }
    }

    /// Target a descriptor of this characteristic
    pub fn with_descriptor(mut self, descriptor_id: Uuid) -> Self {
        self.descriptor_id = Some(descriptor_id);
        self
    }

    /// Mark the service as secondary, included by `parent_service_id`
    pub fn with_parent_service(mut self, parent_service_id: Uuid) -> Self {
        self.parent_service_id = Some(parent_service_id);
        self
    }

    pub fn with_instance(mut self, index: u32) -> Self {
        self.instance_id = InstanceId::Index(index);
        self
    }

    pub fn is_descriptor(&self) -> bool {
        self.descriptor_id.is_some()
    }

    /// Whether `response` answers a request aimed at this key.
    ///
    /// Device, service, parent service, characteristic and descriptor must be
    /// equal, absence included: a characteristic-level request never matches
    /// a descriptor response. Instance ids match as wildcards in both
    /// directions.
    pub fn matches(&self, response: &IdentityKey) -> bool {
        self.device_id == response.device_id
            && self.service_id == response.service_id
            && self.parent_service_id == response.parent_service_id
            && self.characteristic_id == response.characteristic_id
            && self.descriptor_id == response.descriptor_id
            && self.instance_id.matches(response.instance_id)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.service_id)?;
        if let Some(parent) = &self.parent_service_id {
            write!(f, "/{}", parent)?;
        }
        write!(f, "/{}", self.characteristic_id)?;
        if let Some(descriptor) = &self.descriptor_id {
            write!(f, "/{}", descriptor)?;
        }
        if let InstanceId::Index(index) = self.instance_id {
            write!(f, "#{}", index)?;
        }
        Ok(())
    }
}
