use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::PinHandle;

#[derive(Default)]
pub struct PinRegistry {
    pins: FxHashMap<String, Arc<PinHandle>>,
    order: Vec<String>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pin: PinHandle) -> Result<Arc<PinHandle>, AppError> {
        if self.pins.contains_key(pin.name()) {
            return Err(AppError::InvalidState(format!(
                "pin {} is already registered",
                pin.name()
            )));
        }
        if let Some(other) = self.pins.values().find(|p| p.line() == pin.line()) {
            return Err(AppError::InvalidState(format!(
                "GPIO{} is already registered as {}",
                pin.line(),
                other.name()
            )));
        }

        let pin = Arc::new(pin);
        self.order.push(pin.name().to_string());
        self.pins.insert(pin.name().to_string(), pin.clone());
        Ok(pin)
    }

    pub fn find(&self, name: &str) -> Result<Arc<PinHandle>, AppError> {
        self.pins
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFoundPin(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PinHandle>> {
        self.order.iter().filter_map(|name| self.pins.get(name))
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl Drop for PinRegistry {
    fn drop(&mut self) {
        // unexport in reverse registration order
        while let Some(name) = self.order.pop() {
            self.pins.remove(&name);
        }
    }
}
