// src/stream/frame.rs - Frame model
//
// Pose samples produced by the embedding application and the payload
// type the transport carries once a frame has been encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A frame that can be flagged as mandatory-to-deliver.
///
/// Keyframes bypass the producer's rate limit. The staged queue itself is
/// not keyframe-aware: latest-only truncation may still discard one.
pub trait KeyFrame {
    fn is_key_frame(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Pose sample of a single joystick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoystickFrame {
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    /// Buttons or axes changed state in this sample.
    pub key_frame: bool,
}

impl KeyFrame for JoystickFrame {
    fn is_key_frame(&self) -> bool {
        self.key_frame
    }
}

/// All joysticks sampled on one application frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoysticksFrame {
    pub joysticks: Vec<JoystickFrame>,
}

impl JoysticksFrame {
    pub fn new(joysticks: Vec<JoystickFrame>) -> Self {
        Self { joysticks }
    }
}

impl KeyFrame for JoysticksFrame {
    /// A batch is a keyframe when any joystick in it is.
    fn is_key_frame(&self) -> bool {
        self.joysticks.iter().any(KeyFrame::is_key_frame)
    }
}

/// Pose sample of a tracked controller, indexed by its slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerFrame {
    pub attached: bool,
    pub position: Vec3,
    pub rotation: Quat,
}

/// An encoded frame as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(data) => data,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joystick(key_frame: bool) -> JoystickFrame {
        JoystickFrame {
            name: "left".to_string(),
            position: Vec3::new(0.1, 1.2, -0.3),
            rotation: Quat::IDENTITY,
            key_frame,
        }
    }

    #[test]
    fn test_batch_is_key_frame_if_any_joystick_is() {
        assert!(!JoysticksFrame::new(vec![joystick(false), joystick(false)]).is_key_frame());
        assert!(JoysticksFrame::new(vec![joystick(false), joystick(true)]).is_key_frame());
    }

    #[test]
    fn test_empty_batch_is_not_key_frame() {
        assert!(!JoysticksFrame::default().is_key_frame());
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Payload::from("abc").len(), 3);
        assert_eq!(Payload::from(vec![1u8, 2]).as_bytes(), &[1, 2]);
        assert!(Payload::Binary(Bytes::new()).is_empty());
    }
}
