//! Command router: the single path through which devices change.
//!
//! Outbound, a command is applied to the device under its exclusion scope,
//! published as events, then translated through the device's status
//! mapper and sent to its adapter while the scope is still held. Dispatch
//! failures are logged and reported but never roll back the local change;
//! later telemetry corrects it.
//!
//! Inbound, adapter status is resolved through the binding reverse index
//! and applied as telemetry under the same exclusion scope.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use synhome_domain::device::{AppliedResult, ApplyMode, CommandSet, Device, POWER};
use synhome_domain::error::{
    CommandError, DefinitionError, IntentParseError, NotFoundError, SynHomeError,
};
use synhome_domain::event::DeviceEvent;
use synhome_domain::intent::{Intent, Target};
use synhome_domain::snapshot::DeviceSnapshot;
use synhome_domain::value::CapabilityValue;

use crate::ports::{Adapter, CommandPayload, EventPublisher, IntentExtractor};
use crate::registry::{BoundDevice, DeviceRegistry};
use crate::report::{
    CommandOutcome, DeviceOutcome, Dispatch, RouteReport, SceneReport, StepReport,
};

/// Routes commands to devices and adapter status back into them.
pub struct CommandRouter<P> {
    registry: RwLock<Arc<DeviceRegistry>>,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    publisher: P,
    extractor: Option<Arc<dyn IntentExtractor>>,
}

impl<P: EventPublisher + Send + Sync> CommandRouter<P> {
    /// Create a router over `registry`, publishing events through
    /// `publisher`.
    pub fn new(registry: DeviceRegistry, publisher: P) -> Self {
        Self {
            registry: RwLock::new(Arc::new(registry)),
            adapters: HashMap::new(),
            publisher,
            extractor: None,
        }
    }

    /// Register an adapter that bound devices dispatch through.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter.id().to_string(), adapter);
        self
    }

    /// Enable [`submit`](Self::submit) for free-text commands.
    #[must_use]
    pub fn with_intent_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// The registry currently in use.
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a freshly built registry. Operations already running finish
    /// against the previous one.
    pub fn replace_registry(&self, registry: DeviceRegistry) {
        let count = registry.len();
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(registry);
        tracing::info!(devices = count, "device registry replaced");
    }

    fn adapter(&self, adapter_id: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.get(adapter_id)
    }

    /// Every adapter the router dispatches to.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        self.adapters.values()
    }

    /// Read-only view of every device, sorted by id.
    pub async fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.registry().snapshot().await
    }

    /// Apply `commands` to one device and dispatch the changes to its
    /// adapter, if bound.
    ///
    /// # Errors
    ///
    /// Returns [`SynHomeError::NotFound`] for an unknown device, or the
    /// error from [`Device::apply`]. Dispatch failures are not errors; they
    /// are reported in [`DeviceOutcome::dispatch`].
    #[tracing::instrument(skip(self, commands))]
    pub async fn route_to_device(
        &self,
        device_id: &str,
        commands: &CommandSet,
    ) -> Result<DeviceOutcome, SynHomeError> {
        let registry = self.registry();
        let mut device = registry.lock(device_id).await?;
        self.apply_and_dispatch(&registry, &mut device, commands)
            .await
    }

    /// Apply `commands` to every device exposing all referenced
    /// capabilities. Others are skipped.
    #[tracing::instrument(skip(self, commands))]
    pub async fn route_broadcast(&self, commands: &CommandSet) -> RouteReport {
        let registry = self.registry();
        let mut report = RouteReport::default();
        for device_id in registry.ids() {
            self.route_member(&registry, device_id, commands, &mut report)
                .await;
        }
        report
    }

    /// Set `power` to `value` on every device that has it.
    pub async fn route_all(&self, value: &str) -> RouteReport {
        let commands = CommandSet::from([(POWER.to_string(), CapabilityValue::from(value))]);
        self.route_broadcast(&commands).await
    }

    /// Broadcast restricted to one group's members.
    ///
    /// # Errors
    ///
    /// Returns [`SynHomeError::NotFound`] for an unknown group.
    #[tracing::instrument(skip(self, commands))]
    pub async fn route_group(
        &self,
        group_id: &str,
        commands: &CommandSet,
    ) -> Result<RouteReport, SynHomeError> {
        let registry = self.registry();
        let group = registry.group(group_id).ok_or_else(|| NotFoundError {
            entity: "group",
            id: group_id.to_string(),
        })?;
        let mut report = RouteReport::default();
        for device_id in &group.devices {
            self.route_member(&registry, device_id, commands, &mut report)
                .await;
        }
        Ok(report)
    }

    /// Run a scene's steps in order. A failing step is recorded and the
    /// following steps still run.
    ///
    /// # Errors
    ///
    /// Returns [`SynHomeError::NotFound`] for an unknown scene.
    #[tracing::instrument(skip(self))]
    pub async fn run_scene(&self, scene_id: &str) -> Result<SceneReport, SynHomeError> {
        let registry = self.registry();
        let scene = registry.scene(scene_id).ok_or_else(|| NotFoundError {
            entity: "scene",
            id: scene_id.to_string(),
        })?;

        let mut steps = Vec::with_capacity(scene.steps.len());
        for (index, step) in scene.steps.iter().enumerate() {
            let result = match step.to_commands() {
                Ok(commands) => match step.target() {
                    Target::All => Ok(self.route_broadcast(&commands).await),
                    Target::Device(id) => self
                        .route_to_device(&id, &commands)
                        .await
                        .map(RouteReport::single),
                    Target::Devices(ids) => Ok(self.route_each(&ids, &commands).await),
                },
                Err(err) => Err(DefinitionError::SceneStep {
                    scene_id: scene_id.to_string(),
                    index,
                    reason: err.to_string(),
                }
                .into()),
            };
            if let Err(err) = &result {
                tracing::warn!(scene_id, index, error = %err, "scene step failed");
            }
            steps.push(StepReport {
                index,
                device_id: step.device_id.clone(),
                result,
            });
        }
        Ok(SceneReport {
            scene_id: scene_id.to_string(),
            steps,
        })
    }

    /// Dispatch a validated intent by its target.
    ///
    /// A single target naming no device is read as a device type and
    /// resolved to the first device of that type.
    ///
    /// # Errors
    ///
    /// For a single-device target, the error from
    /// [`route_to_device`](Self::route_to_device). Multi-device targets
    /// collect failures in the report instead.
    pub async fn route_intent(&self, intent: &Intent) -> Result<RouteReport, SynHomeError> {
        match &intent.target {
            Target::Device(hint) => {
                let registry = self.registry();
                let device_id = if registry.contains(hint) {
                    hint.as_str()
                } else {
                    registry.find_by_type(hint).unwrap_or(hint)
                };
                self.route_to_device(device_id, &intent.capability_values)
                    .await
                    .map(RouteReport::single)
            }
            Target::Devices(ids) => Ok(self.route_each(ids, &intent.capability_values).await),
            Target::All => Ok(self.route_broadcast(&intent.capability_values).await),
        }
    }

    /// Interpret and route a free-text command.
    ///
    /// # Errors
    ///
    /// Returns [`SynHomeError::IntentParse`] when no extractor is configured
    /// or its reply is rejected or malformed; nothing is mutated then.
    /// Otherwise see [`route_intent`](Self::route_intent).
    #[tracing::instrument(skip(self))]
    pub async fn try_submit(&self, raw_command: &str) -> Result<RouteReport, SynHomeError> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or(IntentParseError::Unavailable)?;
        let devices = self.snapshot().await;
        let reply = extractor.extract(raw_command, &devices).await?;
        let intent = Intent::from_reply(&reply)?;
        tracing::debug!(target = ?intent.target, "intent extracted");
        self.route_intent(&intent).await
    }

    /// [`try_submit`](Self::try_submit) folded into the outward reply.
    pub async fn submit(&self, raw_command: &str) -> CommandOutcome {
        match self.try_submit(raw_command).await {
            Ok(report) => CommandOutcome::from_report(&report),
            Err(err) => CommandOutcome::failure(&err),
        }
    }

    /// Apply inbound status from `adapter_id` for `external_device_id`.
    ///
    /// Returns `Ok(None)` when the external device is not bound through
    /// this adapter, or when no reported field names a capability of the
    /// device.
    ///
    /// # Errors
    ///
    /// Returns the error from [`Device::apply_with`] when a reported value
    /// violates its constraint; the device is left unchanged.
    pub async fn on_adapter_status(
        &self,
        adapter_id: &str,
        external_device_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<AppliedResult>, SynHomeError> {
        let registry = self.registry();
        let Some(device_id) = registry.resolve_binding(adapter_id, external_device_id) else {
            tracing::debug!(adapter_id, external_device_id, "status for unbound device ignored");
            return Ok(None);
        };
        let Some(bound) = registry.binding_for(device_id) else {
            return Ok(None);
        };

        let mut device = registry.lock(device_id).await?;
        let mut values = bound.mapper.to_internal(fields);
        values.retain(|name, _| device.has_capability(name));
        if values.is_empty() {
            return Ok(None);
        }

        let applied = device.apply_with(&values, ApplyMode::Telemetry)?;
        self.publish(&applied, ApplyMode::Telemetry).await;
        tracing::trace!(device_id, changes = applied.changes.len(), "telemetry applied");
        Ok(Some(applied))
    }

    async fn route_each(&self, device_ids: &[String], commands: &CommandSet) -> RouteReport {
        let mut report = RouteReport::default();
        for device_id in device_ids {
            match self.route_to_device(device_id, commands).await {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => report.failures.push((device_id.clone(), err)),
            }
        }
        report
    }

    async fn route_member(
        &self,
        registry: &DeviceRegistry,
        device_id: &str,
        commands: &CommandSet,
        report: &mut RouteReport,
    ) {
        let mut device = match registry.lock(device_id).await {
            Ok(device) => device,
            Err(err) => {
                report.failures.push((device_id.to_string(), err.into()));
                return;
            }
        };
        if !device.supports(commands) {
            report.skipped.push(device_id.to_string());
            return;
        }
        match self.apply_and_dispatch(registry, &mut device, commands).await {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(err) => report.failures.push((device_id.to_string(), err)),
        }
    }

    /// Caller holds the device's exclusion scope.
    async fn apply_and_dispatch(
        &self,
        registry: &DeviceRegistry,
        device: &mut Device,
        commands: &CommandSet,
    ) -> Result<DeviceOutcome, SynHomeError> {
        let applied = device.apply(commands)?;
        self.publish(&applied, ApplyMode::Command).await;
        let dispatch = match registry.binding_for(device.id()) {
            None => Dispatch::Local,
            Some(_) if applied.changes.is_empty() => Dispatch::Unchanged,
            Some(bound) => self.dispatch(bound, &applied).await,
        };
        Ok(DeviceOutcome { applied, dispatch })
    }

    async fn dispatch(&self, bound: &BoundDevice, applied: &AppliedResult) -> Dispatch {
        let binding = &bound.binding;
        let Some(adapter) = self.adapter(&binding.adapter_id) else {
            tracing::warn!(
                device_id = %binding.device_id,
                adapter_id = %binding.adapter_id,
                "adapter not registered, command kept local"
            );
            return Dispatch::Failed(CommandError::Rejected(format!(
                "adapter {} is not registered",
                binding.adapter_id
            )));
        };

        let params = applied
            .changes
            .iter()
            .map(|change| bound.mapper.to_external(&change.capability, &change.new))
            .collect();
        match adapter
            .send_command(&binding.external_device_id, CommandPayload::set(params))
            .await
        {
            Ok(ack) => Dispatch::Sent(ack),
            Err(err) => {
                tracing::warn!(
                    device_id = %binding.device_id,
                    adapter_id = %binding.adapter_id,
                    error = %err,
                    "command dispatch failed, local state kept"
                );
                Dispatch::Failed(err)
            }
        }
    }

    async fn publish(&self, applied: &AppliedResult, origin: ApplyMode) {
        for event in DeviceEvent::from_applied(applied, origin) {
            if let Err(err) = self.publisher.publish(event).await {
                tracing::warn!(device_id = %applied.device_id, error = %err, "failed to publish device event");
            }
        }
    }
}
