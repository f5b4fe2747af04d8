//! In-memory registry of virtual display records.
//!
//! The registry is a plain owned value. It does no locking and no I/O; the
//! dispatcher wraps it in a single mutex and holds that lock only for one
//! call into this type.

use tracing::debug;

use crate::config::DEFAULT_FIRST_DISPLAY_ID;
use crate::error::RequestError;
use crate::protocol::{
    CreateParams, DEFAULT_HEIGHT, DEFAULT_NAME, DEFAULT_REFRESH_RATE, DEFAULT_WIDTH, Display,
};

/// Ordered collection of displays keyed by id.
///
/// Insertion order is list order. Ids are handed out monotonically and are
/// never reused, even after the display holding one is removed.
#[derive(Debug, Clone)]
pub struct DisplayRegistry {
    displays: Vec<Display>,
    next_id: Option<u32>,
}

impl Default for DisplayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_FIRST_DISPLAY_ID)
    }

    /// Create an empty registry whose first display gets `first_id`.
    pub fn starting_at(first_id: u32) -> Self {
        Self {
            displays: Vec::new(),
            next_id: Some(first_id),
        }
    }

    /// Append a display, filling in defaults for missing fields.
    ///
    /// # Returns
    /// * `Ok(Display)` - The stored record, including its fresh id
    /// * `Err(RequestError::IdsExhausted)` - Every id has been handed out
    pub fn create(&mut self, params: &CreateParams) -> Result<Display, RequestError> {
        let id = self.next_id.ok_or(RequestError::IdsExhausted)?;
        self.next_id = id.checked_add(1);

        let record = Display {
            id,
            name: params
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            width: params.width.unwrap_or(DEFAULT_WIDTH),
            height: params.height.unwrap_or(DEFAULT_HEIGHT),
            refresh_rate: params.refresh_rate.unwrap_or(DEFAULT_REFRESH_RATE),
        };
        debug!(
            "Registered display {} ({}x{}@{})",
            record.id, record.width, record.height, record.refresh_rate
        );
        self.displays.push(record.clone());
        Ok(record)
    }

    /// Remove the display with `id`.
    pub fn remove(&mut self, id: u32) -> Result<Display, RequestError> {
        let index = self
            .displays
            .iter()
            .position(|d| d.id == id)
            .ok_or(RequestError::NotFound(id))?;
        debug!("Unregistered display {}", id);
        Ok(self.displays.remove(index))
    }

    /// Snapshot of all displays in insertion order.
    pub fn list(&self) -> Vec<Display> {
        self.displays.clone()
    }

    pub fn get(&self, id: u32) -> Option<&Display> {
        self.displays.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displays.is_empty()
    }
}
