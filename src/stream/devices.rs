// src/stream/devices.rs - Device slot arena
//
// One view per controller slot, kept in a Vec indexed by the slot number the
// tracking runtime reports. Views are created on first use; slots skipped over
// while growing are created too, but left inactive.

use crate::error::{Error, Result};
use crate::stream::frame::{ControllerFrame, JoystickFrame, Quat, Vec3};
use log::{debug, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Whatever visualizes one tracked device.
pub trait DeviceView {
    fn set_active(&mut self, active: bool) -> Result<()>;

    fn set_pose(&mut self, position: Vec3, rotation: Quat) -> Result<()>;
}

/// Creates the view for a slot.
pub type DeviceFactory<D> = Box<dyn FnMut(usize) -> Result<D> + Send>;

/// Outcome of updating one slot.
#[derive(Debug)]
pub enum SlotResult {
    /// Pose applied to an active view.
    Updated,
    /// Controller not attached; the view was hidden.
    Inactive,
    Failed(Error),
}

impl SlotResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, SlotResult::Failed(_))
    }
}

pub struct DeviceSlots<D> {
    slots: Vec<D>,
    factory: DeviceFactory<D>,
}

impl<D: DeviceView> DeviceSlots<D> {
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut(usize) -> Result<D> + Send + 'static,
    {
        Self {
            slots: Vec::new(),
            factory: Box::new(factory),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&D> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut D> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.slots.iter()
    }

    /// View for `index`, creating it and any missing slots before it.
    pub fn slot(&mut self, index: usize) -> Result<&mut D> {
        while self.slots.len() <= index {
            let next = self.slots.len();
            let mut view = (self.factory)(next)?;
            view.set_active(false)?;
            debug!("Created device slot {next}");
            self.slots.push(view);
        }
        Ok(&mut self.slots[index])
    }

    /// Mirror a batch of controller samples, slot `i` taking `frames[i]`.
    ///
    /// Each slot is updated independently: a failing view is logged and
    /// reported in its result, and the rest of the batch still runs. Slots
    /// beyond the batch are hidden.
    pub fn update_controllers(&mut self, frames: &[ControllerFrame]) -> Vec<SlotResult> {
        let results = frames
            .iter()
            .enumerate()
            .map(|(index, frame)| {
                self.guarded(index, |slots| slots.apply_controller(index, frame))
            })
            .collect();

        for index in frames.len()..self.slots.len() {
            let result = self.guarded(index, |slots| {
                slots.slots[index].set_active(false)?;
                Ok(SlotResult::Inactive)
            });
            if result.is_failed() {
                debug!("Could not hide device slot {index}");
            }
        }
        results
    }

    /// Mirror a single joystick pose into slot `index`.
    pub fn update_joystick(&mut self, index: usize, frame: &JoystickFrame) -> SlotResult {
        self.guarded(index, |slots| {
            let view = slots.slot(index)?;
            view.set_active(true)?;
            view.set_pose(frame.position, frame.rotation)?;
            Ok(SlotResult::Updated)
        })
    }

    fn apply_controller(&mut self, index: usize, frame: &ControllerFrame) -> Result<SlotResult> {
        let view = self.slot(index)?;
        view.set_active(frame.attached)?;
        if !frame.attached {
            return Ok(SlotResult::Inactive);
        }
        view.set_pose(frame.position, frame.rotation)?;
        Ok(SlotResult::Updated)
    }

    /// Run one slot update, turning errors and panics into a logged `Failed`.
    fn guarded<F>(&mut self, index: usize, update: F) -> SlotResult
    where
        F: FnOnce(&mut Self) -> Result<SlotResult>,
    {
        let error = match catch_unwind(AssertUnwindSafe(|| update(self))) {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => e,
            Err(_) => Error::Device {
                slot: index,
                message: "view panicked during update".to_string(),
            },
        };
        warn!("Failed to update device slot {index}: {error}");
        SlotResult::Failed(error)
    }
}
