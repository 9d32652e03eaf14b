pub mod mapping;

use crate::abi;
use crate::error::StoreError;
pub use mapping::{Displaced, LogicalButton, MappingTable, PhysicalInput};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

pub const MAX_PORTS: usize = 8;
const AXIS_MAX: i16 = 0x7FFF;
const AXIS_MIN: i16 = -0x8000;

/// USB HID keyboard usages bound to the sixteen joypad buttons, in
/// `B Y SELECT START UP DOWN LEFT RIGHT A X L R L2 R2 L3 R3` order.
pub const DEFAULT_KEYMAP: [u16; 16] = [
    14, // K
    13, // J
    6,  // C
    25, // V
    26, // W
    22, // S
    4,  // A
    7,  // D
    15, // L
    12, // I
    20, // Q
    8,  // E
    30, // 1
    32, // 3
    29, // Z
    27, // X
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputMode {
    #[default]
    Game,
    Menu,
    /// Waiting for a key to bind; events only record the last pressed input.
    Capture,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortState {
    pub enabled: bool,
    pub device: u32,
    pub buttons: u16,
    pub axes: [[i16; 2]; 2],
}

impl PortState {
    fn clear_state(&mut self) {
        self.buttons = 0;
        self.axes = [[0; 2]; 2];
    }

    fn set_button(&mut self, id: u8, pressed: bool) {
        if id >= 16 {
            return;
        }
        if pressed {
            self.buttons |= 1 << id;
        } else {
            self.buttons &= !(1 << id);
        }
    }

    fn button_state(&self, id: u32) -> i16 {
        if id == abi::DEVICE_ID_JOYPAD_MASK {
            self.buttons as i16
        } else if id < 16 {
            ((self.buttons >> id) & 1) as i16
        } else {
            0
        }
    }
}

/// One entry of the core's input descriptor table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonDescriptor {
    pub port: u32,
    pub device: u32,
    pub index: u32,
    pub id: u32,
    pub description: String,
}

impl ButtonDescriptor {
    /// Logical button addressed by this descriptor. Analog indexes are shifted
    /// so the digital pad sits at index 0.
    pub fn logical(&self) -> Option<LogicalButton> {
        let port = u8::try_from(self.port).ok()?;
        let id = u8::try_from(self.id).ok()?;
        let index = match self.device & abi::DEVICE_MASK {
            abi::DEVICE_ANALOG => match self.index {
                abi::DEVICE_INDEX_ANALOG_BUTTON => 0,
                i if i < abi::DEVICE_INDEX_ANALOG_BUTTON => i as u8 + 1,
                _ => return None,
            },
            _ => 0,
        };
        Some(LogicalButton { port, index, id })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMapping {
    physical: PhysicalInput,
    logical: LogicalButton,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredInput {
    mappings: Vec<StoredMapping>,
}

/// Host input to emulated ports: bindings, pressed state and descriptors.
#[derive(Debug)]
pub struct InputBinding {
    mapping: MappingTable,
    ports: [PortState; MAX_PORTS],
    menu: PortState,
    mode: InputMode,
    descriptors: Vec<ButtonDescriptor>,
    last_input: Option<PhysicalInput>,
}

impl Default for InputBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl InputBinding {
    pub fn new() -> Self {
        Self {
            mapping: MappingTable::new(),
            ports: [PortState::default(); MAX_PORTS],
            menu: PortState {
                enabled: true,
                device: abi::DEVICE_JOYPAD,
                ..PortState::default()
            },
            mode: InputMode::Game,
            descriptors: Vec::new(),
            last_input: None,
        }
    }

    pub fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    pub fn set_mapping(&mut self, physical: PhysicalInput, logical: LogicalButton) -> Option<Displaced> {
        let displaced = self.mapping.bind(physical, logical);
        if let Some(d) = &displaced {
            debug!("Rebinding {physical} displaced {}", d.physical);
        }
        displaced
    }

    pub fn install_default_keymap(&mut self) {
        for (id, code) in DEFAULT_KEYMAP.iter().enumerate() {
            self.mapping.bind(
                PhysicalInput::keyboard(*code),
                LogicalButton::joypad(0, id as u8),
            );
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Switching mode releases everything so no button stays held across it.
    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode == mode {
            return;
        }
        for port in &mut self.ports {
            port.clear_state();
        }
        self.menu.clear_state();
        self.mode = mode;
    }

    pub fn port(&self, port: usize) -> Option<&PortState> {
        self.ports.get(port)
    }

    pub fn menu_state(&self) -> &PortState {
        &self.menu
    }

    pub fn set_port_device(&mut self, port: usize, device: u32) {
        let Some(state) = self.ports.get_mut(port) else {
            return;
        };
        state.device = device & abi::DEVICE_MASK;
        state.enabled = state.device != abi::DEVICE_NONE;
        state.clear_state();
    }

    pub fn descriptors(&self) -> &[ButtonDescriptor] {
        &self.descriptors
    }

    /// Replaces the descriptor table and adopts the device type each
    /// described port uses.
    pub fn set_descriptors(&mut self, descriptors: Vec<ButtonDescriptor>) {
        for desc in &descriptors {
            let Some(state) = self.ports.get_mut(desc.port as usize) else {
                continue;
            };
            let device = desc.device & abi::DEVICE_MASK;
            if state.device != device {
                // analog pads also describe their digital buttons as joypad
                if state.device == abi::DEVICE_ANALOG && device == abi::DEVICE_JOYPAD {
                    continue;
                }
                if state.device != abi::DEVICE_NONE && device != abi::DEVICE_ANALOG {
                    warn!(
                        "Port {} described as device {device}, was {}",
                        desc.port, state.device
                    );
                }
                state.device = device;
            }
            state.enabled = true;
        }
        self.descriptors = descriptors;
    }

    pub fn take_last_input(&mut self) -> Option<PhysicalInput> {
        self.last_input.take()
    }

    /// Feeds one host key/button transition.
    pub fn on_input(&mut self, physical: PhysicalInput, pressed: bool) {
        if self.mode == InputMode::Capture {
            if pressed {
                self.last_input = Some(physical);
            }
            return;
        }
        let Some(logical) = self.mapping.logical(physical) else {
            return;
        };
        let state = match self.mode {
            InputMode::Menu => &mut self.menu,
            _ => match self.ports.get_mut(logical.port as usize) {
                Some(state) => state,
                None => return,
            },
        };
        match logical.index {
            0 => state.set_button(logical.id, pressed),
            1 | 2 => {
                let value = match (pressed, logical.id >> 1 != 0) {
                    (false, _) => 0,
                    (true, false) => AXIS_MAX,
                    (true, true) => AXIS_MIN,
                };
                state.axes[logical.index as usize - 1][logical.id as usize & 1] = value;
            }
            _ => {}
        }
    }

    /// Answers the core's input query. Disabled ports and unsupported devices
    /// read as zero.
    pub fn input_state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        let Some(state) = self.ports.get(port as usize) else {
            return 0;
        };
        if !state.enabled {
            return 0;
        }
        match device & abi::DEVICE_MASK {
            abi::DEVICE_JOYPAD => state.button_state(id),
            abi::DEVICE_ANALOG => match index {
                abi::DEVICE_INDEX_ANALOG_LEFT | abi::DEVICE_INDEX_ANALOG_RIGHT => {
                    if id <= abi::DEVICE_ID_ANALOG_Y {
                        state.axes[index as usize][id as usize]
                    } else {
                        0
                    }
                }
                abi::DEVICE_INDEX_ANALOG_BUTTON => state.button_state(id),
                _ => 0,
            },
            _ => 0,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let stored = StoredInput {
            mappings: self
                .mapping
                .entries()
                .into_iter()
                .map(|(physical, logical)| StoredMapping { physical, logical })
                .collect(),
        };
        serde_json::to_string_pretty(&stored)
    }

    /// Replaces all bindings with the ones in `json`.
    pub fn load_json(&mut self, json: &str) -> Result<(), serde_json::Error> {
        let stored: StoredInput = serde_json::from_str(json)?;
        self.mapping.clear();
        for entry in stored.mappings {
            self.mapping.bind(entry.physical, entry.logical);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = self.to_json().map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads bindings from `path`, falling back to the default keymap when the
    /// file is missing or holds no bindings.
    pub fn load_or_default(&mut self, path: &Path) -> Result<(), StoreError> {
        match std::fs::read_to_string(path) {
            Ok(json) => self.load_json(&json).map_err(|source| StoreError::Json {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        if self.mapping.is_empty() {
            self.install_default_keymap();
        }
        Ok(())
    }
}
