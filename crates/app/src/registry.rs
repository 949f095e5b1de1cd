//! Device registry — owns every device, its binding, groups and scenes.
//!
//! Devices sit behind one async mutex each. Holding a device's guard is
//! the per-device exclusion scope: the router keeps it across apply and
//! adapter dispatch, and status ingestion takes the same guard, so the two
//! paths never interleave on one device.
//!
//! The registry itself is immutable once built; reloading configuration
//! builds a new one and swaps it in the router.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::{Mutex, MutexGuard};

use synhome_domain::binding::PhysicalBinding;
use synhome_domain::config::DeviceCatalog;
use synhome_domain::device::Device;
use synhome_domain::error::{DefinitionError, NotFoundError};
use synhome_domain::intent::ALL_DEVICES;
use synhome_domain::scene::{DeviceGroup, Scene};
use synhome_domain::snapshot::DeviceSnapshot;
use synhome_domain::status_map::{StatusMap, StatusMapper};

/// A device's binding with its compiled status mapper.
#[derive(Debug, Clone)]
pub struct BoundDevice {
    pub binding: PhysicalBinding,
    pub mapper: StatusMapper,
}

#[derive(Debug)]
struct Entry {
    device_type: String,
    device: Mutex<Device>,
    bound: Option<BoundDevice>,
}

/// All devices known to the core.
#[derive(Debug)]
pub struct DeviceRegistry {
    entries: BTreeMap<String, Entry>,
    reverse: HashMap<(String, String), String>,
    groups: HashMap<String, DeviceGroup>,
    scenes: HashMap<String, Scene>,
}

impl DeviceRegistry {
    /// Create a builder for constructing a [`DeviceRegistry`].
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build a registry from configuration.
    ///
    /// `adapter_maps` lists every configured adapter with its default status
    /// map; a physical device without its own map uses its adapter's.
    ///
    /// # Errors
    ///
    /// Returns a [`DefinitionError`] when any definition is invalid or
    /// references something undeclared.
    pub fn from_catalog(
        catalog: &DeviceCatalog,
        adapter_maps: &HashMap<String, StatusMap>,
    ) -> Result<Self, DefinitionError> {
        let rules = catalog.state_rules.rules();
        let mut builder = Self::builder().adapters(adapter_maps.keys().cloned());
        for config in &catalog.devices {
            builder = builder.device(config.build(&rules)?);
        }
        for config in &catalog.physical_devices {
            let status_map = config
                .status_map
                .clone()
                .or_else(|| adapter_maps.get(&config.adapter_id).cloned())
                .unwrap_or_default();
            builder = builder.bound_device(
                config.device.build(&rules)?,
                &config.adapter_id,
                &config.external_device_id,
                status_map,
            );
        }
        for group in &catalog.device_groups {
            builder = builder.group(group.clone());
        }
        for scene in &catalog.scenes {
            builder = builder.scene(scene.clone());
        }
        builder.build()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    /// Device ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Snapshot of one device.
    pub async fn get(&self, device_id: &str) -> Option<DeviceSnapshot> {
        let entry = self.entries.get(device_id)?;
        let device = entry.device.lock().await;
        Some(DeviceSnapshot::from(&*device))
    }

    /// Snapshot of every device, sorted by id.
    pub async fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            let device = entry.device.lock().await;
            snapshots.push(DeviceSnapshot::from(&*device));
        }
        snapshots
    }

    /// First device (by id) whose type matches, ignoring case.
    #[must_use]
    pub fn find_by_type(&self, device_type: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.device_type.eq_ignore_ascii_case(device_type))
            .map(|(id, _)| id.as_str())
    }

    #[must_use]
    pub fn binding_for(&self, device_id: &str) -> Option<&BoundDevice> {
        self.entries.get(device_id)?.bound.as_ref()
    }

    /// Device bound to `external_device_id` on `adapter_id`.
    #[must_use]
    pub fn resolve_binding(&self, adapter_id: &str, external_device_id: &str) -> Option<&str> {
        self.reverse
            .get(&(adapter_id.to_string(), external_device_id.to_string()))
            .map(String::as_str)
    }

    /// Bindings handled by `adapter_id`.
    pub fn bindings_of<'a>(&'a self, adapter_id: &'a str) -> impl Iterator<Item = &'a PhysicalBinding> {
        self.entries
            .values()
            .filter_map(|entry| entry.bound.as_ref())
            .map(|bound| &bound.binding)
            .filter(move |binding| binding.adapter_id == adapter_id)
    }

    #[must_use]
    pub fn group(&self, group_id: &str) -> Option<&DeviceGroup> {
        self.groups.get(group_id)
    }

    #[must_use]
    pub fn scene(&self, scene_id: &str) -> Option<&Scene> {
        self.scenes.get(scene_id)
    }

    /// Enter the device's exclusion scope.
    pub(crate) async fn lock(&self, device_id: &str) -> Result<MutexGuard<'_, Device>, NotFoundError> {
        let entry = self.entries.get(device_id).ok_or_else(|| NotFoundError {
            entity: "device",
            id: device_id.to_string(),
        })?;
        Ok(entry.device.lock().await)
    }
}

/// Step-by-step builder for [`DeviceRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    devices: Vec<(Device, Option<BoundDevice>)>,
    groups: Vec<DeviceGroup>,
    scenes: Vec<Scene>,
    adapters: Option<HashSet<String>>,
}

impl RegistryBuilder {
    /// Restrict bindings to these adapter ids.
    #[must_use]
    pub fn adapters(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.adapters = Some(ids.into_iter().collect());
        self
    }

    /// Add a virtual device.
    #[must_use]
    pub fn device(mut self, device: Device) -> Self {
        self.devices.push((device, None));
        self
    }

    /// Add a device bound to `external_device_id` on `adapter_id`.
    #[must_use]
    pub fn bound_device(
        mut self,
        device: Device,
        adapter_id: &str,
        external_device_id: &str,
        status_map: StatusMap,
    ) -> Self {
        let bound = BoundDevice {
            binding: PhysicalBinding::new(device.id(), adapter_id, external_device_id),
            mapper: StatusMapper::new(status_map),
        };
        self.devices.push((device, Some(bound)));
        self
    }

    #[must_use]
    pub fn group(mut self, group: DeviceGroup) -> Self {
        self.groups.push(group);
        self
    }

    #[must_use]
    pub fn scene(mut self, scene: Scene) -> Self {
        self.scenes.push(scene);
        self
    }

    /// Consume the builder, validate, and return a [`DeviceRegistry`].
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::Duplicate`] for repeated device, binding,
    /// group or scene ids, [`DefinitionError::UnknownReference`] for
    /// bindings to undeclared adapters or groups/scenes naming unknown
    /// devices, and [`DefinitionError::SceneStep`] for unusable scene steps.
    pub fn build(self) -> Result<DeviceRegistry, DefinitionError> {
        let mut entries = BTreeMap::new();
        let mut reverse = HashMap::new();

        for (device, bound) in self.devices {
            let id = device.id().to_string();
            if entries.contains_key(&id) {
                return Err(DefinitionError::Duplicate { entity: "device", id });
            }
            if let Some(bound) = &bound {
                let binding = &bound.binding;
                if let Some(adapters) = &self.adapters {
                    if !adapters.contains(&binding.adapter_id) {
                        return Err(DefinitionError::UnknownReference {
                            entity: "device",
                            id,
                            reference: "adapter",
                            target: binding.adapter_id.clone(),
                        });
                    }
                }
                if let Some(other) = reverse.insert(binding.external_key(), id.clone()) {
                    return Err(DefinitionError::Duplicate {
                        entity: "binding",
                        id: format!(
                            "{}/{} (devices {other} and {id})",
                            binding.adapter_id, binding.external_device_id
                        ),
                    });
                }
            }
            entries.insert(
                id,
                Entry {
                    device_type: device.device_type().to_string(),
                    device: Mutex::new(device),
                    bound,
                },
            );
        }

        let mut groups = HashMap::new();
        for group in self.groups {
            if let Some(missing) = group.devices.iter().find(|id| !entries.contains_key(*id)) {
                return Err(DefinitionError::UnknownReference {
                    entity: "group",
                    id: group.id.clone(),
                    reference: "device",
                    target: missing.clone(),
                });
            }
            if groups.contains_key(&group.id) {
                return Err(DefinitionError::Duplicate {
                    entity: "group",
                    id: group.id,
                });
            }
            groups.insert(group.id.clone(), group);
        }

        let mut scenes = HashMap::new();
        for scene in self.scenes {
            for (index, step) in scene.steps.iter().enumerate() {
                if step.device_id != ALL_DEVICES && !entries.contains_key(&step.device_id) {
                    return Err(DefinitionError::UnknownReference {
                        entity: "scene",
                        id: scene.id.clone(),
                        reference: "device",
                        target: step.device_id.clone(),
                    });
                }
                step.to_commands()
                    .map_err(|err| DefinitionError::SceneStep {
                        scene_id: scene.id.clone(),
                        index,
                        reason: err.to_string(),
                    })?;
            }
            if scenes.contains_key(&scene.id) {
                return Err(DefinitionError::Duplicate {
                    entity: "scene",
                    id: scene.id,
                });
            }
            scenes.insert(scene.id.clone(), scene);
        }

        Ok(DeviceRegistry {
            entries,
            reverse,
            groups,
            scenes,
        })
    }
}
