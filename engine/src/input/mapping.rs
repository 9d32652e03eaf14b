use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Offset separating mouse buttons from keyboard codes.
pub const MOUSE_BUTTON_BASE: u64 = 1024;

/// A host-side key or button, packed into one id.
///
/// Keyboard codes are used as-is, mouse buttons are offset by 1024 and
/// joystick buttons carry their device id in the upper bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalInput(pub u64);

impl PhysicalInput {
    pub const fn keyboard(code: u16) -> Self {
        Self(code as u64)
    }

    pub const fn mouse(button: u16) -> Self {
        Self(button as u64 + MOUSE_BUTTON_BASE)
    }

    pub const fn joystick(device: u32, button: u16) -> Self {
        Self(((device as u64) << 16) | button as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PhysicalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let device = self.0 >> 16;
        let code = self.0 & 0xFFFF;
        if device != 0 {
            write!(f, "joystick {device} button {code}")
        } else if code >= MOUSE_BUTTON_BASE {
            write!(f, "mouse button {}", code - MOUSE_BUTTON_BASE)
        } else {
            write!(f, "key {code}")
        }
    }
}

/// A button on the emulated side: port, sub-index and button id.
///
/// Index 0 is the digital pad, 1 and 2 are the left and right analog sticks.
/// For sticks, id bit 0 picks the axis and bit 1 the negative direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub struct LogicalButton {
    pub port: u8,
    pub index: u8,
    pub id: u8,
}

impl LogicalButton {
    pub const fn joypad(port: u8, id: u8) -> Self {
        Self { port, index: 0, id }
    }

    pub const fn pack(self) -> u32 {
        ((self.port as u32) << 16) | ((self.index as u32) << 8) | self.id as u32
    }

    pub const fn unpack(raw: u32) -> Self {
        Self {
            port: (raw >> 16) as u8,
            index: (raw >> 8) as u8,
            id: raw as u8,
        }
    }
}

impl From<u32> for LogicalButton {
    fn from(raw: u32) -> Self {
        Self::unpack(raw)
    }
}

impl From<LogicalButton> for u32 {
    fn from(button: LogicalButton) -> Self {
        button.pack()
    }
}

/// Result of a rebind that displaced another physical input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Displaced {
    pub physical: PhysicalInput,
    /// What the displaced input is bound to now, if anything.
    pub now_bound_to: Option<LogicalButton>,
}

/// Bidirectional physical/logical map. Every logical button has at most one
/// physical input and vice versa.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingTable {
    forward: HashMap<PhysicalInput, LogicalButton>,
    reverse: HashMap<LogicalButton, PhysicalInput>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn logical(&self, physical: PhysicalInput) -> Option<LogicalButton> {
        self.forward.get(&physical).copied()
    }

    pub fn physical(&self, logical: LogicalButton) -> Option<PhysicalInput> {
        self.reverse.get(&logical).copied()
    }

    /// Binds `physical` to `logical`. If another input already held `logical`,
    /// it takes over whatever `physical` was bound to before, or becomes
    /// unbound when `physical` had nothing.
    pub fn bind(&mut self, physical: PhysicalInput, logical: LogicalButton) -> Option<Displaced> {
        let previous_target = self.forward.get(&physical).copied();
        let previous_owner = self.reverse.get(&logical).copied();
        if previous_owner == Some(physical) {
            return None;
        }

        if let Some(target) = previous_target {
            self.reverse.remove(&target);
        }
        self.forward.insert(physical, logical);
        self.reverse.insert(logical, physical);

        let owner = previous_owner?;
        match previous_target {
            Some(target) => {
                self.forward.insert(owner, target);
                self.reverse.insert(target, owner);
            }
            None => {
                self.forward.remove(&owner);
            }
        }
        Some(Displaced {
            physical: owner,
            now_bound_to: previous_target,
        })
    }

    pub fn unbind(&mut self, physical: PhysicalInput) -> Option<LogicalButton> {
        let logical = self.forward.remove(&physical)?;
        self.reverse.remove(&logical);
        Some(logical)
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Bindings ordered by logical button.
    pub fn entries(&self) -> Vec<(PhysicalInput, LogicalButton)> {
        let mut entries: Vec<_> = self
            .reverse
            .iter()
            .map(|(logical, physical)| (*physical, *logical))
            .collect();
        entries.sort_by_key(|(_, logical)| *logical);
        entries
    }
}
