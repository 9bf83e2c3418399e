//! Shared invocation context.
//!
//! One `InvocationContext` exists per invocation attempt. The invoker binds allocated
//! devices and attributes during setup; listeners read it (and may add attributes)
//! while tests run. Once the invocation's identity is final the attributes are locked:
//! every later attribute write fails with [`ContextError::AttributesLocked`].
//!
//! Device bindings are deliberately not gated by the lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use harness_types::{BuildInfo, MultiMap};
use thiserror::Error;

use crate::device::TestDevice;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("invocation attributes are locked; cannot add '{key}'")]
    AttributesLocked { key: String },
}

#[derive(Debug, Clone)]
struct DeviceBinding {
    name: String,
    device: Arc<dyn TestDevice>,
}

#[derive(Debug, Default)]
pub struct InvocationContext {
    devices: RwLock<Vec<DeviceBinding>>,
    build_infos: RwLock<BTreeMap<String, BuildInfo>>,
    attributes: Mutex<MultiMap>,
    locked: AtomicBool,
}

impl InvocationContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device` to the configuration name `name`.
    ///
    /// Re-binding an existing name replaces the previous device.
    pub fn add_allocated_device(&self, name: impl Into<String>, device: Arc<dyn TestDevice>) {
        let name = name.into();
        let mut devices = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match devices.iter_mut().find(|binding| binding.name == name) {
            Some(binding) => binding.device = device,
            None => devices.push(DeviceBinding { name, device }),
        }
    }

    /// Reverse lookup of the configuration name a device was allocated under.
    #[must_use]
    pub fn get_device_name(&self, device: &dyn TestDevice) -> Option<String> {
        let serial = device.serial_number();
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|binding| binding.device.serial_number() == serial)
            .map(|binding| binding.name.clone())
    }

    #[must_use]
    pub fn device(&self, name: &str) -> Option<Arc<dyn TestDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| Arc::clone(&binding.device))
    }

    /// Allocated devices in allocation order.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<dyn TestDevice>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|binding| Arc::clone(&binding.device))
            .collect()
    }

    #[must_use]
    pub fn device_names(&self) -> Vec<String> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|binding| binding.name.clone())
            .collect()
    }

    #[must_use]
    pub fn serials(&self) -> Vec<String> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|binding| binding.device.serial_number().to_string())
            .collect()
    }

    pub fn add_device_build_info(&self, name: impl Into<String>, build: BuildInfo) {
        self.build_infos
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), build);
    }

    #[must_use]
    pub fn build_info(&self, name: &str) -> Option<BuildInfo> {
        self.build_infos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn build_infos(&self) -> Vec<BuildInfo> {
        self.build_infos
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Append `value` under `key`.
    pub fn add_invocation_attribute(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContextError> {
        let key = key.into();
        let mut attributes = self
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.locked.load(Ordering::Acquire) {
            return Err(ContextError::AttributesLocked { key });
        }
        attributes.put(key, value);
        Ok(())
    }

    /// Append every value of `values`. Fails as a whole once locked, even when empty.
    pub fn add_invocation_attributes(&self, values: &MultiMap) -> Result<(), ContextError> {
        let mut attributes = self
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.locked.load(Ordering::Acquire) {
            let key = values.keys().next().unwrap_or_default().to_string();
            return Err(ContextError::AttributesLocked { key });
        }
        attributes.put_all(values);
        Ok(())
    }

    /// Snapshot of the attributes. Mutating the returned map never affects the context.
    #[must_use]
    pub fn get_attributes(&self) -> MultiMap {
        self.attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Freeze the attributes. Calling this more than once is a no-op.
    pub fn lock_attributes(&self) {
        // Taken under the attribute mutex so no writer can interleave between its
        // lock check and its push.
        let _attributes = self
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.locked.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;

    fn device(serial: &str) -> Arc<dyn TestDevice> {
        Arc::new(NullDevice::new(serial))
    }

    #[test]
    fn get_device_name_is_a_reverse_lookup() {
        let context = InvocationContext::new();
        let device1 = device("serial-1");
        let device2 = device("serial-2");

        assert!(context.get_device_name(device1.as_ref()).is_none());
        context.add_allocated_device("test1", Arc::clone(&device1));
        assert_eq!(
            context.get_device_name(device1.as_ref()).as_deref(),
            Some("test1")
        );
        assert!(context.get_device_name(device2.as_ref()).is_none());
    }

    #[test]
    fn rebinding_a_name_replaces_the_device() {
        let context = InvocationContext::new();
        context.add_allocated_device("primary", device("a"));
        context.add_allocated_device("primary", device("b"));

        assert_eq!(context.device_names(), vec!["primary".to_string()]);
        assert_eq!(context.serials(), vec!["b".to_string()]);
        assert!(context.get_device_name(device("a").as_ref()).is_none());
    }

    #[test]
    fn devices_keep_allocation_order() {
        let context = InvocationContext::new();
        context.add_allocated_device("dut", device("s2"));
        context.add_allocated_device("companion", device("s1"));
        assert_eq!(context.device_names(), vec!["dut", "companion"]);
        assert_eq!(
            context.device("companion").map(|d| d.serial_number().to_string()),
            Some("s1".to_string())
        );
        assert_eq!(context.devices().len(), 2);
    }

    #[test]
    fn get_attributes_returns_an_independent_copy() {
        let context = InvocationContext::new();
        context
            .add_invocation_attribute("TEST_KEY", "TEST_VALUE")
            .unwrap();
        assert_eq!(
            context.get_attributes().get("TEST_KEY"),
            Some(&["TEST_VALUE".to_string()][..])
        );

        let mut copy = context.get_attributes();
        copy.remove("TEST_KEY");

        assert_eq!(
            context.get_attributes().get("TEST_KEY"),
            Some(&["TEST_VALUE".to_string()][..])
        );
    }

    #[test]
    fn locked_context_rejects_attributes() {
        let context = InvocationContext::new();
        context.lock_attributes();

        assert!(matches!(
            context.add_invocation_attribute("test", "Test"),
            Err(ContextError::AttributesLocked { .. })
        ));
        assert!(matches!(
            context.add_invocation_attributes(&MultiMap::new()),
            Err(ContextError::AttributesLocked { .. })
        ));
        assert!(context.get_attributes().is_empty());
    }

    #[test]
    fn lock_attributes_is_idempotent() {
        let context = InvocationContext::new();
        context.add_invocation_attribute("branch", "main").unwrap();
        context.lock_attributes();
        context.lock_attributes();
        assert!(context.is_locked());
        assert_eq!(context.get_attributes().len(), 1);
    }

    #[test]
    fn device_bindings_survive_the_attribute_lock() {
        let context = InvocationContext::new();
        context.lock_attributes();
        context.add_allocated_device("late", device("late-serial"));
        context.add_device_build_info("late", BuildInfo::new("42"));
        assert_eq!(
            context.get_device_name(device("late-serial").as_ref()).as_deref(),
            Some("late")
        );
        assert_eq!(context.build_info("late").map(|b| b.build_id), Some("42".into()));
    }

    #[test]
    fn bulk_add_preserves_per_key_order() {
        let context = InvocationContext::new();
        context.add_invocation_attribute("tag", "first").unwrap();
        let more: MultiMap = [("tag", "second"), ("build", "7")].into_iter().collect();
        context.add_invocation_attributes(&more).unwrap();

        let attributes = context.get_attributes();
        assert_eq!(
            attributes.get("tag"),
            Some(&["first".to_string(), "second".to_string()][..])
        );
        assert_eq!(attributes.get("build"), Some(&["7".to_string()][..]));
    }

    #[test]
    fn concurrent_writers_either_land_or_fail_cleanly() {
        let context = InvocationContext::new();
        let results: Vec<Result<(), ContextError>> = std::thread::scope(|scope| {
            let writers: Vec<_> = (0..8)
                .map(|i| {
                    let context = &context;
                    scope.spawn(move || context.add_invocation_attribute("k", i.to_string()))
                })
                .collect();
            context.lock_attributes();
            writers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let landed = results.iter().filter(|r| r.is_ok()).count();
        let stored = context.get_attributes().get("k").map_or(0, <[String]>::len);
        assert_eq!(landed, stored);
        assert!(context.add_invocation_attribute("k", "late").is_err());
    }
}
