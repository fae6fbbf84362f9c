//! Session-scoped attribute pools and the recording entry points.
//!
//! [`AttributeRegistry`] owns two name-unique pools: system attributes seeded
//! from the device at initialization, and user attributes set by the host
//! application (at most [`MAX_USER_ATTRIBUTES`]). Persistent user attributes
//! are mirrored into an [`AttributeStore`] and reloaded on the next
//! initialization. Events recorded through the registry are stamped with
//! session state and queued in its [`EventBuffer`]; [`AttributeRegistry::harvest`]
//! claims them together with the current session attributes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::attribute::{names, Attribute, AttributeSet, AttributeValue};
use crate::buffer::EventBuffer;
use crate::config::BeaconConfig;
use crate::device::{self, DeviceInfoProvider};
use crate::error::{BeaconError, Result};
use crate::event::{Event, EventCategory, EventFactory};
use crate::network::{self, HttpTransaction, TransactionOutcome};
use crate::store::{AttributeStore, EventStore};
use crate::transform::EventTransformAdapter;
use crate::validator;

/// Upper bound on the number of user attributes.
pub const MAX_USER_ATTRIBUTES: usize = 128;

struct Session {
    id: Uuid,
    started: Instant,
}

impl Session {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn persistence(action: &str, e: BeaconError) -> BeaconError {
    error!(error = %e, "Failed to {}", action);
    BeaconError::Persistence(format!("failed to {}: {}", action, e))
}

// =============================================================================
// HarvestPayload
// =============================================================================

/// What one harvest cycle hands to the transport.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestPayload {
    pub session_attributes: AttributeSet,
    pub events: Vec<Event>,
}

impl HarvestPayload {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// =============================================================================
// AttributeRegistry
// =============================================================================

/// Attribute pools, session state and the event buffer of one agent instance.
pub struct AttributeRegistry {
    config: BeaconConfig,
    system_attributes: RwLock<AttributeSet>,
    user_attributes: RwLock<AttributeSet>,
    event_buffer: EventBuffer,
    attribute_store: Arc<dyn AttributeStore>,
    event_store: Option<Arc<dyn EventStore>>,
    /// Serializes event store writes against the harvest hand-off.
    event_store_lock: Mutex<()>,
    device: Arc<dyn DeviceInfoProvider>,
    session: RwLock<Session>,
    initialized: AtomicBool,
    enabled: AtomicBool,
    offline: AtomicBool,
    background: AtomicBool,
}

impl AttributeRegistry {
    /// Build an uninitialized registry whose buffer uses the configured limits.
    pub fn new(
        config: BeaconConfig,
        attribute_store: Arc<dyn AttributeStore>,
        device: Arc<dyn DeviceInfoProvider>,
    ) -> Self {
        let event_buffer = EventBuffer::new();
        event_buffer.set_max_event_pool_size(config.events.max_event_pool_size);
        event_buffer.set_max_event_buffer_time(config.events.max_event_buffer_time_secs);

        let registry = Self {
            enabled: AtomicBool::new(config.features.analytics_events),
            config,
            system_attributes: RwLock::new(AttributeSet::new()),
            user_attributes: RwLock::new(AttributeSet::new()),
            event_buffer,
            attribute_store,
            event_store: None,
            event_store_lock: Mutex::new(()),
            device,
            session: RwLock::new(Session::start()),
            initialized: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            background: AtomicBool::new(false),
        };
        registry.install_url_transforms();
        registry
    }

    /// Mirror buffered events into `store` when event persistence is enabled.
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Replace the event buffer, keeping its limits as given.
    pub fn with_event_buffer(mut self, buffer: EventBuffer) -> Self {
        self.event_buffer = buffer;
        self.install_url_transforms();
        self
    }

    fn install_url_transforms(&self) {
        let transforms = &self.config.network.url_transforms;
        if transforms.is_empty() {
            return;
        }
        let adapter = EventTransformAdapter::network_requests(transforms);
        debug!(rules = adapter.rule_count(), "Installing request URL transforms");
        self.event_buffer.set_event_listener(Some(Arc::new(adapter)));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a session: reset pools and buffer, reload persistent attributes
    /// and seed the system attributes.
    ///
    /// Calling this on an initialized registry does nothing.
    pub fn initialize(&self) {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Attribute registry already initialized, bypassing");
            return;
        }

        write(&self.system_attributes).clear();
        write(&self.user_attributes).clear();
        self.event_buffer.initialize();

        let session_id = {
            let mut session = write(&self.session);
            *session = Session::start();
            session.id
        };

        if let Err(e) = self.load_persistent_attributes() {
            error!(error = %e, "Failed to load persistent attributes");
        }

        let info = self.device.device_information();
        let seeded =
            device::system_attributes(&info, &self.config.general, &session_id.to_string());
        {
            let mut system = write(&self.system_attributes);
            for attribute in seeded {
                system.replace(attribute);
            }
        }

        if self.config.features.event_persistence {
            self.recover_persisted_events();
        }

        info!(
            session_id = %session_id,
            system_attributes = self.system_attribute_count(),
            user_attributes = self.user_attribute_count(),
            "Attribute registry initialized"
        );
    }

    /// Stop accepting events. Buffered events remain for a final harvest.
    pub fn shutdown(&self) {
        self.event_buffer.shutdown();
        self.initialized.store(false, Ordering::SeqCst);
        info!("Attribute registry shut down");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "Attribute registry enablement changed");
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn event_buffer(&self) -> &EventBuffer {
        &self.event_buffer
    }

    pub fn session_id(&self) -> Uuid {
        read(&self.session).id
    }

    /// Seconds since the current session started.
    pub fn session_duration_secs(&self) -> f64 {
        read(&self.session).started.elapsed().as_secs_f64()
    }

    /// Host-reported connectivity state.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Host-reported foreground state.
    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::SeqCst);
    }

    fn check_state(&self) -> Result<()> {
        if !self.is_initialized() {
            warn!("Attribute registry not initialized");
            return Err(BeaconError::NotInitialized);
        }
        if !self.is_enabled() {
            warn!("Attribute registry disabled");
            return Err(BeaconError::Disabled);
        }
        Ok(())
    }

    /// Copy stored attributes into the user pool, up to the cap.
    ///
    /// Returns how many were loaded.
    pub fn load_persistent_attributes(&self) -> Result<usize> {
        let stored = self.attribute_store.fetch_all()?;
        debug!(count = stored.len(), "Found attributes in the attribute store");

        let mut user = write(&self.user_attributes);
        let mut loaded = 0;
        for attribute in stored {
            if user.len() >= MAX_USER_ATTRIBUTES {
                warn!(
                    name = attribute.name(),
                    "User attribute limit reached, stored attribute not loaded"
                );
                continue;
            }
            if user.insert(attribute) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    fn recover_persisted_events(&self) {
        let Some(store) = &self.event_store else {
            return;
        };
        let events = match store.fetch_all() {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "Failed to read persisted events");
                return;
            }
        };
        if events.is_empty() {
            return;
        }
        if let Err(e) = store.clear() {
            error!(error = %e, "Failed to clear persisted events");
            return;
        }

        let total = events.len();
        let mut recovered = 0;
        for event in events {
            if self.queue_event(event).is_ok() {
                recovered += 1;
            }
        }
        info!(recovered, total, "Recovered persisted events");
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Set a user attribute, or update an existing attribute of either pool.
    pub fn set_attribute(
        &self,
        name: &str,
        value: impl Into<AttributeValue>,
        persistent: bool,
    ) -> Result<()> {
        self.check_state()?;
        let value = value.into();
        debug!(name, value = %value, persistent, "Setting attribute");

        if !validator::is_valid_attribute_name(name) {
            return Err(BeaconError::Validation(format!(
                "invalid attribute name: {}",
                name
            )));
        }
        match &value {
            AttributeValue::String(s) if !validator::is_valid_attribute_value(name, s) => {
                return Err(BeaconError::Validation(format!(
                    "invalid value for attribute: {}",
                    name
                )));
            }
            AttributeValue::Void => {
                return Err(BeaconError::Validation(format!(
                    "attribute has no value: {}",
                    name
                )));
            }
            _ => {}
        }

        let updated = self.update_existing(name, |attribute| {
            attribute.set_value(value.clone());
            attribute.set_persistent(persistent);
            Ok(())
        });

        match updated {
            Some(Ok(attribute)) => self.sync_store(&attribute),
            Some(Err(e)) => Err(e),
            None => {
                self.insert_user_attribute(Attribute::with_persistence(name, value, persistent))
            }
        }
    }

    /// Add `delta` to a numeric attribute, creating it with `delta` if absent.
    pub fn increment_attribute(&self, name: &str, delta: f64, persistent: bool) -> Result<()> {
        self.check_state()?;
        debug!(name, delta, persistent, "Incrementing attribute");

        if !validator::is_valid_attribute_name(name) {
            return Err(BeaconError::Validation(format!(
                "invalid attribute name: {}",
                name
            )));
        }

        let updated = self.update_existing(name, |attribute| {
            let Some(current) = attribute.double_value() else {
                return Err(BeaconError::Validation(format!(
                    "attribute is not numeric: {}",
                    name
                )));
            };
            attribute.set_value(current + delta);
            attribute.set_persistent(persistent);
            Ok(())
        });

        match updated {
            Some(Ok(attribute)) => self.sync_store(&attribute),
            Some(Err(e)) => {
                warn!(name, "Cannot increment attribute, existing value is not numeric");
                Err(e)
            }
            None => {
                self.insert_user_attribute(Attribute::with_persistence(name, delta, persistent))
            }
        }
    }

    /// Set an agent-owned attribute in the system pool.
    ///
    /// Reserved names are allowed; key-name and value-length limits still
    /// apply.
    pub fn add_attribute_unchecked(
        &self,
        name: &str,
        value: impl Into<AttributeValue>,
        persistent: bool,
    ) -> Result<()> {
        self.check_state()?;
        let attribute = Attribute::with_persistence(name, value, persistent);

        if !validator::is_valid_key_name(name) {
            return Err(BeaconError::Validation(format!(
                "invalid attribute name: {}",
                name
            )));
        }
        if let Some(s) = attribute.string_value() {
            if !validator::is_valid_attribute_value(name, s) {
                return Err(BeaconError::Validation(format!(
                    "invalid value for attribute: {}",
                    name
                )));
            }
        }

        write(&self.system_attributes).replace(attribute.clone());

        if attribute.is_persistent() {
            self.attribute_store
                .store(&attribute)
                .map_err(|e| persistence("store attribute", e))?;
        }
        Ok(())
    }

    /// Remove a user attribute. Returns whether it existed.
    pub fn remove_attribute(&self, name: &str) -> Result<bool> {
        self.check_state()?;
        let removed = write(&self.user_attributes).remove(name);
        match removed {
            Some(attribute) => {
                debug!(name, "Removed attribute");
                if attribute.is_persistent() {
                    self.attribute_store
                        .delete(&attribute)
                        .map_err(|e| persistence("delete attribute", e))?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every user attribute and clear the attribute store.
    pub fn remove_all_attributes(&self) -> Result<()> {
        self.check_state()?;
        let cleared = {
            let mut user = write(&self.user_attributes);
            let count = user.len();
            user.clear();
            count
        };
        debug!(cleared, "Removed all user attributes");
        self.attribute_store
            .clear()
            .map_err(|e| persistence("clear attribute store", e))
    }

    /// Look up by name, user pool first.
    pub fn get_attribute(&self, name: &str) -> Option<Attribute> {
        if let Some(attribute) = read(&self.user_attributes).get(name) {
            return Some(attribute.clone());
        }
        read(&self.system_attributes).get(name).cloned()
    }

    pub fn system_attributes(&self) -> Vec<Attribute> {
        read(&self.system_attributes).to_vec()
    }

    pub fn user_attributes(&self) -> Vec<Attribute> {
        read(&self.user_attributes)
            .iter()
            .take(MAX_USER_ATTRIBUTES)
            .cloned()
            .collect()
    }

    /// System attributes followed by user attributes, first name wins.
    pub fn session_attributes(&self) -> AttributeSet {
        let mut session = read(&self.system_attributes).clone();
        for attribute in read(&self.user_attributes).iter() {
            session.insert(attribute.clone());
        }
        session
    }

    pub fn system_attribute_count(&self) -> usize {
        read(&self.system_attributes).len()
    }

    pub fn user_attribute_count(&self) -> usize {
        read(&self.user_attributes).len()
    }

    pub fn session_attribute_count(&self) -> usize {
        self.system_attribute_count() + self.user_attribute_count()
    }

    /// Apply `update` to the named attribute of the user pool, else the
    /// system pool, under that pool's write lock. `None` when absent from both.
    fn update_existing<F>(&self, name: &str, update: F) -> Option<Result<Attribute>>
    where
        F: Fn(&mut Attribute) -> Result<()>,
    {
        for pool in [&self.user_attributes, &self.system_attributes] {
            let mut attributes = write(pool);
            if let Some(attribute) = attributes.get_mut(name) {
                return Some(update(attribute).map(|_| attribute.clone()));
            }
        }
        None
    }

    fn insert_user_attribute(&self, attribute: Attribute) -> Result<()> {
        {
            let mut user = write(&self.user_attributes);
            if let Some(existing) = user.get_mut(attribute.name()) {
                *existing = attribute.clone();
            } else if user.len() >= MAX_USER_ATTRIBUTES {
                warn!(
                    name = attribute.name(),
                    limit = MAX_USER_ATTRIBUTES,
                    "User attribute limit reached, attribute not added"
                );
                return Err(BeaconError::CapacityExceeded {
                    limit: MAX_USER_ATTRIBUTES,
                });
            } else {
                user.insert(attribute.clone());
            }
        }

        if attribute.is_persistent() {
            self.attribute_store
                .store(&attribute)
                .map_err(|e| persistence("store attribute", e))?;
        }
        Ok(())
    }

    fn sync_store(&self, attribute: &Attribute) -> Result<()> {
        if attribute.is_persistent() {
            self.attribute_store
                .store(attribute)
                .map_err(|e| persistence("store attribute", e))
        } else {
            self.attribute_store
                .delete(attribute)
                .map_err(|e| persistence("delete attribute", e))
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Stamp session state onto `event` and queue it.
    pub fn add_event(&self, mut event: Event) -> Result<()> {
        self.check_state()?;
        debug!(
            name = event.name().unwrap_or(event.event_type()),
            "Adding event"
        );

        let elapsed = Attribute::transient(
            names::EVENT_SESSION_ELAPSED_TIME,
            self.session_duration_secs(),
        );
        event.add_attributes([&elapsed]);

        let features = &self.config.features;
        if features.offline_storage && self.offline.load(Ordering::SeqCst) {
            event.add_internal_attribute(Attribute::transient(names::OFFLINE, true));
        }
        if features.background_reporting && self.background.load(Ordering::SeqCst) {
            event.add_internal_attribute(Attribute::transient(names::BACKGROUND, true));
        }

        self.queue_event(event)
    }

    fn queue_event(&self, event: Event) -> Result<()> {
        let store = match &self.event_store {
            Some(store) if self.config.features.event_persistence => store,
            _ => return self.event_buffer.add_event(event),
        };

        let _guard = lock(&self.event_store_lock);
        let insertion = self.event_buffer.insert(event)?;

        if let Some(evicted) = &insertion.evicted {
            if let Err(e) = store.delete(evicted) {
                error!(event_id = %evicted.id(), error = %e, "Failed to delete evicted event");
            }
        }
        // The queued copy carries any listener rewrites.
        match &insertion.queued {
            Some(queued) => store
                .store(queued)
                .map_err(|e| persistence("store event", e)),
            None => Ok(()),
        }
    }

    /// Record a custom event of the default `Mobile` type.
    pub fn record_event(
        &self,
        name: &str,
        attributes: &HashMap<String, AttributeValue>,
    ) -> Result<()> {
        self.check_state()?;
        if !validator::is_valid_event_name(name) {
            return Err(BeaconError::Validation(format!("invalid event name: {}", name)));
        }
        let attributes = validator::to_validated_attributes(attributes);
        let event = EventFactory::create_event(
            Some(name),
            EventCategory::Custom,
            Some(validator::DEFAULT_EVENT_TYPE),
            &attributes,
        );
        self.add_event(event)
    }

    /// Record a custom event of a caller-defined type.
    ///
    /// A `name` attribute, when present, becomes the event name.
    pub fn record_custom_event(
        &self,
        event_type: &str,
        attributes: &HashMap<String, AttributeValue>,
    ) -> Result<()> {
        self.check_state()?;
        if !validator::is_valid_event_type(event_type)
            || validator::is_reserved_event_type(event_type)
        {
            return Err(BeaconError::Validation(format!(
                "invalid event type: {}",
                event_type
            )));
        }

        let name = match attributes.get(names::EVENT_NAME) {
            Some(AttributeValue::String(name)) if validator::is_valid_event_name(name) => {
                Some(name.clone())
            }
            _ => None,
        };
        let attributes: Vec<Attribute> = validator::to_validated_attributes(attributes)
            .into_iter()
            .filter(|a| a.name() != names::EVENT_NAME)
            .collect();

        let event = EventFactory::create_event(
            name.as_deref(),
            EventCategory::Custom,
            Some(event_type),
            &attributes,
        );
        self.add_event(event)
    }

    /// Record a `MobileBreadcrumb` event.
    pub fn record_breadcrumb(
        &self,
        name: &str,
        attributes: &HashMap<String, AttributeValue>,
    ) -> Result<()> {
        self.check_state()?;
        if !validator::is_valid_event_name(name) {
            return Err(BeaconError::Validation(format!("invalid event name: {}", name)));
        }
        let attributes = validator::to_validated_attributes(attributes);
        let event =
            EventFactory::create_event(Some(name), EventCategory::Breadcrumb, None, &attributes);
        self.add_event(event)
    }

    /// Record an agent-generated event with pre-built attributes.
    pub fn internal_record_event(
        &self,
        name: &str,
        category: EventCategory,
        event_type: Option<&str>,
        attributes: &[Attribute],
    ) -> Result<()> {
        self.check_state()?;
        let attributes = validator::validated_copies(attributes);
        let event = EventFactory::create_event(Some(name), category, event_type, &attributes);
        self.add_event(event)
    }

    /// Record a completed user interaction and remember it as the last one.
    pub fn record_interaction(&self, name: &str, duration_secs: f64) -> Result<()> {
        self.check_state()?;
        let attributes = [Attribute::transient(
            names::INTERACTION_DURATION,
            duration_secs,
        )];
        let event =
            EventFactory::create_event(Some(name), EventCategory::Interaction, None, &attributes);
        self.add_event(event)?;
        self.set_last_interaction(name)
    }

    pub fn set_last_interaction(&self, name: &str) -> Result<()> {
        self.add_attribute_unchecked(names::LAST_INTERACTION, name, true)
    }

    // =========================================================================
    // Network
    // =========================================================================

    /// Record the event matching a completed HTTP transaction.
    ///
    /// Returns `Ok(false)` when nothing was recorded: the transaction was
    /// incomplete, its feature is off, or its host is ignored.
    pub fn create_network_request_events(&self, txn: &HttpTransaction) -> Result<bool> {
        self.check_state()?;

        if network::is_ignored_domain(&txn.url, &self.config.network.ignored_domains) {
            debug!(url = txn.url.as_str(), "Request to ignored domain not recorded");
            return Ok(false);
        }

        let features = &self.config.features;
        let event = match txn.outcome() {
            TransactionOutcome::HttpError if features.network_error_requests => {
                network::http_error_event(txn, features.http_response_body_capture)
            }
            TransactionOutcome::NetworkFailure if features.network_error_requests => {
                network::network_failure_event(txn, features.http_response_body_capture)
            }
            TransactionOutcome::Success if features.network_requests => {
                network::network_request_event(txn)
            }
            _ => return Ok(false),
        };

        self.add_event(event)?;
        Ok(true)
    }

    // =========================================================================
    // Harvest
    // =========================================================================

    /// Claim the buffered events when a transmit is due.
    pub fn harvest(&self) -> Option<HarvestPayload> {
        if !self.is_enabled() || !self.config.features.analytics_events {
            return None;
        }
        if !self.event_buffer.is_transmit_required() {
            return None;
        }

        let session_attributes = self.session_attributes();
        let events = {
            let _guard = lock(&self.event_store_lock);
            let events = self.event_buffer.get_queued_events_snapshot();
            if let Some(store) = &self.event_store {
                for event in &events {
                    if let Err(e) = store.delete(event) {
                        error!(event_id = %event.id(), error = %e, "Failed to delete harvested event");
                    }
                }
            }
            events
        };

        let remaining = self.event_buffer.size();
        if remaining > 0 {
            warn!(remaining, "Events arrived in the buffer during hand-off");
        }
        debug!(count = events.len(), "Events moved from buffer to harvest payload");

        Some(HarvestPayload {
            session_attributes,
            events,
        })
    }
}

impl std::fmt::Debug for AttributeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeRegistry")
            .field("initialized", &self.is_initialized())
            .field("enabled", &self.is_enabled())
            .field("system_attributes", &self.system_attribute_count())
            .field("user_attributes", &self.user_attribute_count())
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}
